//! # Muster Core
//!
//! The request routing and dispatch core of the muster cluster
//! manager.
//!
//! ## Overview
//!
//! A REST-like hierarchical resource tree spans nodes, node ranges,
//! node groups, users, events, discovery, and networking. This crate
//! translates a path + operation + input payload into concurrent
//! invocations of pluggable hardware-management handlers and fans the
//! results back as one streaming response:
//!
//! - **Schema registry** ([`schema`]): the declarative resource trees
//! - **Path resolver** ([`resolver`]): path → collection, route, or
//!   custom-interface sentinel
//! - **Fan-out executor** ([`executor`] via [`api::Core`]): groups
//!   nodes by selected handler, runs handlers concurrently, merges
//!   their streams with per-worker completion markers
//! - **Collective dispatcher** ([`collective`]): forwards sub-requests
//!   for peer-owned nodes over fingerprint-pinned TLS and splices the
//!   peer's streamed responses back in
//!
//! ## Getting a core
//!
//! ```rust
//! use muster_core::{Core, MemoryConfigManager};
//! use muster_plugin_sdk::{Operation, PluginRegistry};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), muster_plugin_sdk::ApiError> {
//! let registry = PluginRegistry::builder()
//!     .register(Arc::new(muster_core::plugins::AttributesPlugin))
//!     .build();
//! let core = Core::builder(Arc::new(MemoryConfigManager::new()))
//!     .with_registry(registry)
//!     .build();
//! let stream = core.handle_request("/nodes/", Operation::Retrieve, None, true).await?;
//! # let _ = stream;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod collective;
pub mod config;
pub mod executor;
pub mod noderange;
pub mod plugins;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod tls;
pub mod tlv;
mod users;

pub use api::{AlertDecoder, ApiCollaborator, Core, CoreBuilder, HealthMonitor};
pub use collective::{
    handle_dispatch, CollectiveConfig, CollectiveServer, DispatchEnvelope, DispatchItem,
    DEFAULT_COLLECTIVE_PORT,
};
pub use config::Config;
pub use executor::DISPATCH_PLUGINS;
pub use store::MemoryConfigManager;
pub use tls::TlsIdentity;
