//! # testforge-rs
//!
//! Provisions isolated workspaces for generated API test projects.
//!
//! A single-worker priority queue ([`engine::ExecutionQueue`]) drives the
//! generation pipeline, which shells out to external tooling
//! ([`process`]), renders project files ([`template`]), and manages
//! workspace directories ([`workspace`]). Failed generations run a cleanup
//! cascade that restores or removes partially built state.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod process;
pub mod store;
pub mod telemetry;
pub mod template;
pub mod workspace;

pub use error::{Error, Result};
