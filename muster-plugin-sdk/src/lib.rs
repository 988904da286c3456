//! # Muster Plugin SDK
//!
//! Shared contract between the muster dispatch core and its
//! hardware-management plugins.
//!
//! ## Overview
//!
//! The SDK provides:
//! - **Response items** ([`messages::ResponseItem`]): the complete
//!   vocabulary of streamed results, including per-node error items
//! - **The plugin trait** ([`plugin::Plugin`]): four CRUD verbs over a
//!   lazy [`plugin::ResponseStream`], unimplemented verbs answering
//!   NotImplemented
//! - **The registry** ([`registry::PluginRegistry`]): one-shot
//!   registration at process start, lock-free reads thereafter
//! - **The attribute-store interface** ([`config::ConfigManager`]):
//!   nodes, groups, users, collective members, and the quorum predicate
//! - **Errors** ([`error::ApiError`]): request-level failures plus the
//!   serializable [`error::WireError`] mirror for peer transport
//!
//! Plugins depend only on this crate. The dispatch core selects a
//! plugin per node from node attributes, coalesces nodes that resolved
//! to the same plugin into one invocation, and merges the resulting
//! streams; the SDK deliberately contains no routing or transport
//! logic.

pub mod config;
pub mod error;
pub mod messages;
pub mod plugin;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    AttrValue, AttributeSnapshot, CollectiveMember, ConfigManager, UserRecord,
};
pub use error::{ApiError, WireError, WireErrorKind};
pub use messages::{InputData, ResponseItem};
pub use plugin::{
    empty_stream, item_stream, once_stream, Operation, Plugin, PluginRequest, ResponseStream,
};
pub use registry::{PluginRegistry, PluginRegistryBuilder};
