//! incbuild Core Library
//!
//! Batch orchestration for RTS-aware incremental builds: cache gating of
//! build artifacts, bounded-parallel project jobs, telemetry normalization
//! and the batch summary.

pub mod aggregate;
pub mod benchmark;
pub mod cache_gate;
pub mod config;
pub mod domain;
pub mod driver;
pub mod log_analysis;
pub mod normalize;
pub mod obs;
pub mod reporting;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use domain::{
    IncbuildError, JobFailure, JobRecord, JobStatus, Project, ProjectConfig, ProjectId, Result,
    RtsMode, RtsStats, RunSummary,
};

pub use aggregate::aggregate;
pub use benchmark::{compare, render_benchmark_md, BenchmarkReport};
pub use cache_gate::{decide_build, decide_push, BuildDecision, CacheGate, GateReport, PushDecision};
pub use config::{validate_projects, BatchManifest, ConfigEcho, ManifestProject, PushMode, RunConfig};
pub use driver::{DriverFlags, DriverOutput, ProjectDriver};
pub use log_analysis::{analyze_log, analyze_log_file, parse_duration_secs, LogAnalysis};
pub use normalize::{normalize, parse_markers, NormalizedTelemetry, RtsMarkers, TelemetrySource};
pub use reporting::{
    render_summary_md, write_summary_json, write_summary_md, ProjectResultArtifact,
    SummaryArtifact, SUMMARY_JSON, SUMMARY_MD,
};
pub use scheduler::{BatchOutcome, Scheduler};
pub use store::{ResultStore, LOG_FILE, RESULT_FILE};

pub use artifact_registry::{ArtifactBackend, ArtifactKind, ArtifactLocation, ArtifactRef};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
