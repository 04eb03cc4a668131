//! End-to-end test suite for Strand.
//!
//! Drives a complete node (header chain, download queue, sync pipeline,
//! block archive and coinview) through syncs, reorganizations and restarts.

pub mod helpers;
