//! # Authreg - Client registry and address matching for a network authentication server
//!
//! This library decides, for every inbound protocol packet, whether the
//! sending peer is a recognized, authorized client, and retrieves that
//! client's configuration: shared secret, transport requirements,
//! per-connection limits and virtual-server scope.
//!
//! ## Overview
//!
//! Clients are registered by address prefix (0-128 bits, both IP
//! families) with optional transport-protocol discrimination. Lookups
//! use longest-prefix-match: the registered range with the most specific
//! prefix containing the query address wins. Four independent
//! construction paths converge on one validated record before anything
//! is inserted.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `section`: parsed key/value configuration-section tree and YAML loading
//! - `net`: address-with-prefix values, masking and reverse-name formatting
//! - `client`: the validated client record and its four builders
//! - `registry`: prefix-tree registries, virtual-server scoping, bulk loading
//! - `error`: the error taxonomy for construction and registration
//!
//! ## Example Usage
//!
//! ```rust
//! use authreg::client::BuilderOpts;
//! use authreg::{load_clients, AddrPrefix, Protocol, Section, StaticServers};
//!
//! let section = Section::from_yaml_str(r#"
//! client dell-switch:
//!   ipaddr: 192.0.2.0/24
//!   secret: s3cr3t
//! "#)?;
//!
//! let registry = load_clients(
//!     &section,
//!     None,
//!     false,
//!     &StaticServers::default(),
//!     &BuilderOpts::default(),
//! )?;
//!
//! let addr = AddrPrefix::parse("192.0.2.7")?;
//! let client = registry.find(&addr, Protocol::Udp).expect("registered");
//! assert_eq!(client.shortname, "dell-switch");
//! # Ok::<(), authreg::ClientError>(())
//! ```
//!
//! ## Concurrency
//!
//! Registry construction and bulk population are control-plane
//! operations. `find` is read-only and lock-free; mutating a registry
//! that workers are concurrently reading must be serialized externally,
//! typically by funneling mutation through one owner task or swapping in
//! a freshly built registry.

pub mod client;
pub mod error;
pub mod net;
pub mod registry;
pub mod section;

// Re-export commonly used types
pub use client::{Client, ConnectionLimits, Protocol};
pub use error::ClientError;
pub use net::{AddrPrefix, NumericResolver, ReverseResolver};
pub use registry::{
    load_clients, ClientRegistry, ClientStore, StaticServers, VirtualServer, VirtualServers,
};
pub use section::Section;
