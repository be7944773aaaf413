//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`store`] - `ScriptedStore`, a store with failure injection and call counters.
//! - [`container`] - `MemoryContainer`, an in-memory [`DataContainer`](crate::port::DataContainer).
//! - [`recording`] - Recording notifier, interceptor chain and transaction manager.
//! - [`harness`] - A manager wired to all of the above.
//! - [`domain`] - Builders for keys and entries.
//! - [`config`] - Canonical test configurations.

pub mod config;
pub mod container;
pub mod domain;
pub mod harness;
pub mod recording;
pub mod store;
