//! # tfo-events
//!
//! Human-readable events the operator emits about the records it reconciles.
//!
//! ## Design Principles
//!
//! - Events describe what happened to one record, never secret values
//! - Warning events accompany every failed or blocked reconciliation
//! - Recording never fails and never blocks the reconciliation pass
//!
//! ## Event Envelope
//!
//! Every event carries:
//! - A recorder-assigned `sequence` (monotonic per recorder)
//! - The involved record (`kind`, `namespace`, `name`)
//! - A type (`Normal` / `Warning`), a machine-readable `reason` and a message

mod envelope;
mod error;
mod recorder;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use recorder::*;
pub use types::*;
