//! incbuild Driver
//!
//! Process-backed implementation of [`incbuild_core::ProjectDriver`]: each
//! project is built and tested by an external program whose combined output
//! becomes the job log.

pub mod process;

pub use process::ProcessDriver;
