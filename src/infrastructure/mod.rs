//! Infrastructure layer.
//!
//! Technical concerns that support the persistence layer without containing
//! orchestration logic.
//!
//! # Submodules
//!
//! - [`config`] - Configuration loading and validation
//! - [`factory`] - Store and notifier construction

pub mod config;
pub mod factory;
