//! Client records and their construction paths.

pub mod builder;
pub mod record;

// Re-export commonly used types
pub use builder::{from_query, from_section, BuilderOpts};
#[cfg(feature = "dynamic-clients")]
pub use builder::{from_file, from_request, ControlAttribute, RequestContext};
pub use record::{Client, ConnectionLimits, Protocol};
