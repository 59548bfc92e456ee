//! git-lfs custom transfer adapter storing objects in S3-compatible buckets.
//!
//! This crate wires configuration, logging and the per-request
//! [`Dispatcher`] around the transfer engine. Reading requests from
//! stdin and exiting belong to whatever process embeds it.

pub mod config;
pub mod dispatch;
mod error;
pub mod logging;

use std::sync::Arc;

use lfs_s3_compression::Catalog;
use lfs_s3_remote::S3Store;
use lfs_s3_transfer::Engine;
use tracing::info;

pub use config::AdapterConfig;
pub use dispatch::{Dispatcher, EngineFactory, Flow};
pub use error::AdapterError;

/// Validates `config`, connects to the bucket and builds the engine.
pub fn build_engine(config: &AdapterConfig) -> Result<Engine, AdapterError> {
    let catalog = Arc::new(Catalog::standard());
    config.validate(&catalog)?;

    let store = S3Store::connect(config.s3_config())?;
    info!(bucket = store.bucket(), "connected to object store");
    Ok(Engine::new(Arc::new(store), catalog, config.engine_config())?)
}
