//! Built-in modules.
//!
//! Small reference implementations of the [`Module`](crate::Module) contract:
//! enough DSP to build and audit patches, nothing more.

mod envelope;
mod filter;
mod gain;
mod oscillator;

pub use envelope::{Envelope, EnvelopeStage};
pub use filter::LowPass;
pub use gain::Gain;
pub use oscillator::{Oscillator, Waveform};
