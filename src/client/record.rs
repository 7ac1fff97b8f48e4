//! The validated client record.
//!
//! A `Client` describes one peer authorized to exchange packets with the
//! server. Records are produced by the builders in [`crate::client::builder`]
//! and handed over to a registry; the rest of the server only ever sees
//! references borrowed from a registry lookup.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;

use crate::error::ClientError;
use crate::net::AddrPrefix;

/// Transport protocol a client is registered for.
///
/// `Any` is the wildcard: it matches every query protocol, and no other
/// entry can share its address slot. `Radsec` is the legacy spelling of
/// TLS; both require transport security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Any,
    Udp,
    Tcp,
    Tls,
    Radsec,
}

impl Protocol {
    /// Parse a `proto` configuration token.
    pub fn from_token(token: &str) -> Result<Self, ClientError> {
        match token {
            "*" => Ok(Protocol::Any),
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            "tls" => Ok(Protocol::Tls),
            "radsec" => Ok(Protocol::Radsec),
            _ => Err(ClientError::UnknownProto(token.to_string())),
        }
    }

    /// True for transports that perform their own authentication.
    pub fn requires_tls(&self) -> bool {
        matches!(self, Protocol::Tls | Protocol::Radsec)
    }

    /// Connection limits only apply to connection-oriented transports.
    /// `Any` counts: the client may be reached over one.
    pub fn is_connection_oriented(&self) -> bool {
        !matches!(self, Protocol::Udp)
    }

    /// Wildcard-aware protocol match: `Any` on either side matches, two
    /// differing explicit protocols never do.
    pub fn matches(&self, other: Protocol) -> bool {
        *self == Protocol::Any || other == Protocol::Any || *self == other
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Protocol::Any => "*",
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
            Protocol::Tls => "tls",
            Protocol::Radsec => "radsec",
        };
        f.write_str(token)
    }
}

/// Per-client connection limits, in seconds where applicable.
///
/// Meaningful only for connection-oriented transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionLimits {
    pub max_connections: u32,
    pub lifetime: u32,
    pub idle_timeout: u32,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        ConnectionLimits {
            max_connections: 16,
            lifetime: 0,
            idle_timeout: 30,
        }
    }
}

impl ConnectionLimits {
    /// Floor sub-five-second timers to five seconds, and drop the idle
    /// timeout entirely when it exceeds the connection lifetime.
    pub(crate) fn clamp(&mut self) {
        if self.idle_timeout > 0 && self.idle_timeout < 5 {
            self.idle_timeout = 5;
        }
        if self.lifetime > 0 && self.lifetime < 5 {
            self.lifetime = 5;
        }
        if self.lifetime > 0 && self.idle_timeout > self.lifetime {
            self.idle_timeout = 0;
        }
    }
}

/// One authorized peer.
///
/// The `secret` is sensitive and is never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    /// Reverse textual form of the address.
    pub longname: String,
    /// User-supplied label, defaulting to the section's name.
    pub shortname: String,
    pub addr: AddrPrefix,
    pub proto: Protocol,
    #[serde(skip_serializing)]
    pub secret: String,
    pub require_message_authenticator: bool,
    pub limits: ConnectionLimits,
    /// Virtual server this client is scoped to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Source address override used on replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_addr: Option<IpAddr>,
    /// Response timing window; zero/absent is ignored by server timers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_window: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nas_type: Option<String>,
    pub tls_required: bool,
    /// True for records created at runtime rather than from static
    /// configuration.
    pub dynamic: bool,
    #[cfg(feature = "stats")]
    #[serde(skip_serializing)]
    pub(crate) number: u32,
}

impl Client {
    /// Minimal record with defaults; builders fill in the rest.
    pub(crate) fn base(addr: AddrPrefix, longname: String, shortname: String, secret: String) -> Self {
        Client {
            longname,
            shortname,
            addr,
            proto: Protocol::Udp,
            secret,
            require_message_authenticator: false,
            limits: ConnectionLimits::default(),
            server: None,
            src_addr: None,
            response_window: None,
            nas_type: None,
            tls_required: false,
            dynamic: false,
            #[cfg(feature = "stats")]
            number: 0,
        }
    }

    /// Sequential id assigned at insertion, for the statistics surface.
    #[cfg(feature = "stats")]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Apply the connection-limit invariants for connection-oriented
    /// transports.
    pub(crate) fn normalize_limits(&mut self) {
        if self.proto.is_connection_oriented() {
            self.limits.clamp();
        }
    }

    /// Extended identity used for duplicate resolution: two records with
    /// the same key are a benign re-registration only when all of these
    /// agree.
    pub(crate) fn same_identity(&self, other: &Client) -> bool {
        self.longname == other.longname
            && self.secret == other.secret
            && self.shortname == other.shortname
            && self.nas_type == other.nas_type
            && self.server == other.server
            && self.require_message_authenticator == other.require_message_authenticator
    }
}
