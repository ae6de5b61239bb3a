//! List audio output devices.

use clap::Args;
use tandem_io::backend_by_name;

#[derive(Args)]
pub struct DevicesArgs {
    /// Audio backend: cpal or null
    #[arg(short, long, default_value = "cpal")]
    backend: String,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    let backend = backend_by_name(&args.backend)?;
    let devices = backend.list_devices()?;

    if devices.is_empty() {
        println!("No audio output devices found ({} backend).", backend.name());
        return Ok(());
    }

    println!("Output Devices ({})", backend.name());
    println!("==============\n");
    for (idx, device) in devices.iter().enumerate() {
        let default = if device.is_default { " (default)" } else { "" };
        println!(
            "  [{}] {} ({} Hz){}",
            idx, device.name, device.default_sample_rate, default
        );
    }
    println!();
    println!("Tip: pass a partial name with --device:");
    println!("  tandem run --device \"{}\"", devices[0].name);
    Ok(())
}
