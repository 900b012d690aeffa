//! Key-value records of training progress and their sinks.
//!
//! * [`Record`] - a set of named [`RecordValue`]s produced by the trainer and the agent
//! * [`Recorder`] - the interface of an output destination of records
//! * [`BufferedRecorder`] - keeps records in memory
//! * [`NullRecorder`] - discards all records
//!
//! ```rust
//! use minefield_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("episode", 1.0);
//! record.insert("reward", RecordValue::Scalar(-1.0));
//! assert_eq!(record.get_scalar("reward").unwrap(), -1.0);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
