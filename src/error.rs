//! Error types for client construction and registration.

use std::time::Duration;

/// Errors produced while building or registering a client.
///
/// Identical re-registration of a client is not an error: `add` drops the
/// redundant record, logs a warning and returns `Ok`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("missing client name")]
    MissingClientName,

    #[error("no 'ipaddr', 'ipv4addr' or 'ipv6addr' directive found in client {0}")]
    MissingAddress(String),

    #[error("failed parsing address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("failed parsing src_ipaddr: {0}")]
    InvalidSourceAddress(String),

    #[error("unknown proto \"{0}\"")]
    UnknownProto(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("response_window {window:?} is outside the allowed range {min:?}..={max:?}")]
    ResponseWindowOutOfRange {
        window: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("secret must be at least 1 character long")]
    EmptySecret,

    #[error("failed reading client file {path}: {reason}")]
    InvalidClientFile { path: String, reason: String },

    #[error("client file {path} must contain exactly one client definition, found {count}")]
    NotExactlyOneClient { path: String, count: usize },

    #[error("invalid client definition in {path}: IP address {addr} does not match name {name}")]
    FileNameMismatch {
        path: String,
        addr: String,
        name: String,
    },

    #[error("failed to add duplicate client {0}")]
    DuplicateClient(String),

    #[error("clients inside of a 'server' section cannot point to a virtual server")]
    NestedServerConflict,

    #[error("failed to find virtual server {0}")]
    UnknownVirtualServer(String),

    #[error("client IP address {client} IP version does not match the source network {network} of the packet")]
    NetworkFamilyMismatch { client: String, network: String },

    #[error("client IP address {client} is not within the defined network {network}")]
    OutsideListenerNetwork { client: String, network: String },

    #[error("client {0} does not have the same TLS configuration as the listener")]
    TlsConfigMismatch(String),
}

impl ClientError {
    /// True for errors that are registration conflicts rather than
    /// malformed input.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ClientError::DuplicateClient(_)
                | ClientError::NestedServerConflict
                | ClientError::UnknownVirtualServer(_)
                | ClientError::NetworkFamilyMismatch { .. }
                | ClientError::OutsideListenerNetwork { .. }
                | ClientError::TlsConfigMismatch(_)
        )
    }
}
