//! Loadwatch core - host load telemetry protocol
//!
//! This crate holds everything both ends of a loadwatch link agree on:
//! - Versioned binary load messages with length-prefixed subpackets
//! - Conversion of cumulative kernel counters into per-interval rates
//! - Append-only, date-rotated message logs for later replay
//! - Compact timestamps counted from 2000-01-01T00:00:00Z

pub mod codec;
pub mod error;
pub mod logfile;
pub mod message;
pub mod normalizer;
pub mod probe;
pub mod timestamp;

pub use error::{Error, Result};
pub use logfile::{LogFile, LogRecord, OpenMode};
pub use message::{
    CpuItem, CpuLoad, DiskItem, InterfaceItem, IoLoad, LoadMessage, MemoryLoad, NetworkLoad,
    ProcLoad, Subpacket, SubpacketKind, MESSAGE_VERSION,
};
pub use normalizer::{CounterSource, Counters, Domain, NamedCounters, RateNormalizer, Rates, Snapshot};
pub use probe::Prober;
