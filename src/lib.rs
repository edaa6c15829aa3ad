//! Per-address traffic profiling and streaming record output.
//!
//! [`profile::ProfileStore`] folds packet observations into long-lived
//! per-address profiles; [`writer::StreamingWriter`] persists the finished
//! profiles through a framed, optionally buffered and compressed chain, or
//! hands them to a bounded [`writer::ChannelSink`].

pub mod decoder;
pub mod error;
pub mod logging;
pub mod observation;
pub mod profile;
pub mod resolvers;
pub mod writer;

pub use error::{Error, Result};
pub use observation::{Observation, Transport, TransportFlow};
pub use profile::{Profile, ProfileStore, StoreConfig};
pub use writer::{StreamingWriter, WriterConfig};
