//! Stream registry and viewer fan-out
//!
//! The registry maps stream ids to their state and owns one bounded queue
//! per attached viewer. Ingestion workers call [`StreamRegistry::cast`] for
//! every packet; viewer writers drain their own queue.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Id,    │
//!                     │   StreamEntry {         │
//!                     │     codecs: Arc<Vec>,   │
//!                     │     viewers: {Uuid ->   │
//!                     │       ViewerQueue },    │
//!                     │     run: RunState,      │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!   [Ingest worker]         [Viewer writer]         [Viewer writer]
//!   next_event()            rx.recv()               rx.recv()
//!         │                       │                       │
//!         └──► registry.cast() ──► try_send ──► sink.write()
//! ```
//!
//! A full queue drops the packet on offer; `cast` never waits on a viewer.
//! Packets carry `bytes::Bytes`, so each queue holds a reference, not a copy.

pub mod config;
pub mod entry;
pub mod error;
pub mod queue;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{RunState, StreamOptions, StreamSnapshot, WorkerId};
pub use error::RegistryError;
pub use queue::{Delivery, ViewerGuard, ViewerQueue, ViewerReceiver};
pub use store::{FanOut, StreamRegistry, Teardown};
