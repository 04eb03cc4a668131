//! # strand-core
//! Shared types, errors and collaborator traits for the Strand node.

pub mod chain;
pub mod error;
pub mod genesis;
pub mod traits;
pub mod types;
