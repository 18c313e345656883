#![forbid(unsafe_code)]

//! Dose scheduling and compliance engine for networked pill dispensers.
//!
//! This crate provides:
//! - Domain types (devices, slot assignments, dose events)
//! - Time-of-day codec for device schedule payloads
//! - Device registry with atomic, per-device locked updates
//! - Append-only dose event log (JSONL)
//! - Compliance reporting, missed-dose detection, CSV export

pub mod types;
pub mod error;
pub mod clock;
pub mod config;
pub mod logging;
pub mod time_codec;
pub mod store;
pub mod registry;
pub mod event_log;
pub mod report;
pub mod schedule;
pub mod export;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, ErrorKind, Result};
pub use types::*;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use event_log::{EventSink, JsonlSink};
pub use report::{ComplianceReport, StatusCounts};
pub use schedule::OverdueDose;
pub use engine::DoseEngine;
