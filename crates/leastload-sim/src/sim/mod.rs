//! Simulation driver for the `leastload` dispatcher.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/environment configuration.
//! - [`requester`] - The producer loop run by each simulated requester.
//! - [`telemetry`] - `tracing-subscriber` initialization.

pub mod config;
pub mod requester;
pub mod telemetry;
