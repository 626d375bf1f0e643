//! Enforcement service for Lockwarden: process surveillance and the
//! daemon/CLI entry point live here; cryptographic and record machinery
//! comes from `warden-core`.

pub mod guard;
pub mod process;
