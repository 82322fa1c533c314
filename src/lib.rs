//! Storage and sequencing core for a tile-based, tamper-evident append-only
//! log, plus the ambient stack (config, CLI, HTTP personality, metrics)
//! needed to run it as a service.

pub mod app;
pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
pub mod follower;
pub mod hash;
pub mod integrator;
pub mod layout;
pub mod metrics;
pub mod proof;
pub mod publisher;
pub mod sequencer;
pub mod server;
pub mod shutdown;
pub mod signer;
pub mod storage;
pub mod tile;
pub mod tracker;

pub use app::App;
pub use error::{Error, Result};
