//! Built-in plugins.
//!
//! Hardware-management backends (IPMI, Redfish, consoles) live outside
//! this crate and register through the SDK. The only handler the
//! schema names that belongs to the core itself is the attribute
//! plugin, since it is a pure view over the attribute store.

pub mod attributes;

pub use attributes::AttributesPlugin;
