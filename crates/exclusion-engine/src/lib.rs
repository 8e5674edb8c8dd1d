//! Exclusion Engine
//!
//! Escalates exclusions for tests that break under RTS instrumentation and
//! works out which build configuration units must carry them.
//!
//! ## Features
//!
//! - **Escalation**: instrumentation-level exclusion first, execution-level
//!   exclusion if the test keeps failing
//! - **Ownership resolution**: every module that physically contains a test
//!   is an edit target, never its ancestors
//! - **Hierarchy model**: declared plugins versus plugin management as two
//!   explicit inheritance kinds, loaded from `pom.xml` files
//! - **Ledger**: per-project JSON record of exclusions whose levels only rise

pub mod error;
pub mod escalation;
pub mod fragment;
pub mod hierarchy;
pub mod ledger;
pub mod plugins;
pub mod pom;
pub mod resolver;

pub use error::{ExclusionError, Result};
pub use escalation::{
    classify, EditPlan, EscalationOutcome, ExclusionEngine, ExclusionEntry, ExclusionLevel,
    LevelChange, Probe, ProbeOutcome, UnitEdit, UnresolvedTest,
};
pub use fragment::render_plugin_fragment;
pub use hierarchy::{
    ApplyReport, ConfigHierarchy, ConfigUnit, EdgeKind, PluginBlock, UnitPath,
};
pub use ledger::{render_exclude_file, ExclusionLedger, EXCLUDE_FILE, LEDGER_FILE};
pub use plugins::{PluginKey, RtsTool};
pub use pom::load_hierarchy;
pub use resolver::{locate_test_files, resolve_owners, OwnerUnit, Resolution, TestId};
