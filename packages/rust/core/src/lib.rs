//! Core scan pipeline and domain logic for SubjectScan.
//!
//! This crate ties together search, keyword learning and the per-subject
//! knowledge store into the end-to-end scan workflow exposed by
//! [`service::ScanService`].

pub mod completion;
pub mod export;
pub mod jobs;
pub mod knowledge;
pub mod learner;
pub mod orchestrator;
pub mod scoring;
pub mod service;
pub mod stats;

pub use export::{ExportFormat, ExportedFile};
pub use orchestrator::{ProgressReporter, ScanEnd, ScanOutcome, SilentProgress};
pub use service::{KeywordSource, ScanAck, ScanReport, ScanRequest, ScanService};
pub use stats::ContentStats;
