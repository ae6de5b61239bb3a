//! Tandem SHM - shared-memory rings between supervisor and workers
//!
//! Each worker slot gets one file-backed segment (normally on `/dev/shm`)
//! that both processes map. The segment carries everything the two sides
//! exchange, and nothing else is shared:
//!
//! - [`AudioRing`] - worker → audio boundary, skip-ahead, never blocks
//! - [`CommandRing`] - supervisor → worker, 64-byte records, back-pressure on
//!   the producer only
//! - [`Control`] - heartbeat, counters, ready/shutdown flags
//! - [`ParamTable`] - seqlock-published parameter values for state queries
//!
//! Every ring is single-producer/single-consumer. All shared fields are
//! atomics; correctness rests on release/acquire ordering of the
//! write-then-publish sequence, not on locks.
//!
//! [`SegmentRegistry`] records which process owns which segment so a
//! restarted supervisor can reclaim segments left behind by a SIGKILL.
//!
//! # Example
//!
//! ```rust,no_run
//! use tandem_shm::{SegmentLayout, SlotSegment};
//!
//! let layout = SegmentLayout::new(8, 256, 256, 128)?;
//! let supervisor = SlotSegment::create("/dev/shm/tandem-demo", layout)?;
//! let worker = SlotSegment::open("/dev/shm/tandem-demo")?;
//!
//! worker.audio().write(&[0.0; 256]);
//! let mut out = [0.0f32; 256];
//! assert!(supervisor.audio().read_latest(&mut out).has_audio());
//! # Ok::<(), tandem_shm::ShmError>(())
//! ```

mod audio_ring;
mod command_ring;
mod control;
mod error;
mod layout;
mod param_table;
mod registry;
mod segment;
mod slot;

pub use audio_ring::{AudioRing, ReadStatus};
pub use command_ring::CommandRing;
pub use control::{Control, WorkerCounters};
pub use error::{Result, ShmError};
pub use layout::{LAYOUT_VERSION, SegmentLayout};
pub use param_table::{ParamEntry, ParamPublisher, ParamTable};
pub use registry::{REGISTRY_FILE, RegistryEntry, SegmentRegistry, process_alive};
pub use segment::Segment;
pub use slot::SlotSegment;
