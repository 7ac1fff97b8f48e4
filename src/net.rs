//! IP address and prefix handling.
//!
//! This module provides the address-with-prefix value type used as the
//! client lookup key, along with the reverse-name formatting used for
//! client long names and file-name verification.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use serde::{Serialize, Serializer};

use crate::error::ClientError;

/// An IP address together with a prefix length.
///
/// The stored address always has its host bits cleared, so two
/// `AddrPrefix` values describing the same network compare equal no
/// matter how they were written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrPrefix {
    addr: IpAddr,
    prefix: u8,
}

impl AddrPrefix {
    /// Build from an address and prefix length, clearing host bits.
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, ClientError> {
        let max = family_max(&addr);
        if prefix > max {
            return Err(ClientError::InvalidAddress {
                addr: format!("{}/{}", addr, prefix),
                reason: format!("prefix length {} exceeds family maximum {}", prefix, max),
            });
        }
        Ok(AddrPrefix {
            addr: mask_addr(&addr, prefix),
            prefix,
        })
    }

    /// A single host address (full-length prefix).
    pub fn host(addr: IpAddr) -> Self {
        AddrPrefix {
            prefix: family_max(&addr),
            addr,
        }
    }

    /// Parse an address or subnet of either family.
    ///
    /// Accepts "192.0.2.1", "192.0.2.0/24", "2001:db8::1" and
    /// "2001:db8::/32". A bare address gets the full-length prefix.
    pub fn parse(s: &str) -> Result<Self, ClientError> {
        let s = s.trim();
        if s.contains('/') {
            let net: IpNet = s.parse().map_err(|e| ClientError::InvalidAddress {
                addr: s.to_string(),
                reason: format!("{}", e),
            })?;
            let net = net.trunc();
            Ok(AddrPrefix {
                addr: net.network(),
                prefix: net.prefix_len(),
            })
        } else {
            let addr: IpAddr = s.parse().map_err(|e| ClientError::InvalidAddress {
                addr: s.to_string(),
                reason: format!("{}", e),
            })?;
            Ok(AddrPrefix::host(addr))
        }
    }

    /// Parse an IPv4 address or subnet; IPv6 input is rejected.
    pub fn parse_v4(s: &str) -> Result<Self, ClientError> {
        let parsed = Self::parse(s)?;
        if !parsed.addr.is_ipv4() {
            return Err(ClientError::InvalidAddress {
                addr: s.to_string(),
                reason: "expected an IPv4 address".to_string(),
            });
        }
        Ok(parsed)
    }

    /// Parse an IPv6 address or subnet; IPv4 input is rejected.
    pub fn parse_v6(s: &str) -> Result<Self, ClientError> {
        let parsed = Self::parse(s)?;
        if !parsed.addr.is_ipv6() {
            return Err(ClientError::InvalidAddress {
                addr: s.to_string(),
                reason: "expected an IPv6 address".to_string(),
            });
        }
        Ok(parsed)
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Maximum prefix length for this address family: 32 or 128.
    pub fn family_max(&self) -> u8 {
        family_max(&self.addr)
    }

    /// True when the address is the all-zero value of its family.
    pub fn is_any_addr(&self) -> bool {
        match self.addr {
            IpAddr::V4(v4) => v4 == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(v6) => v6 == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// The address masked down to `len` bits, preserving the family.
    pub fn masked(&self, len: u8) -> IpAddr {
        mask_addr(&self.addr, len)
    }

    /// Replace the prefix length, re-masking the address.
    pub fn with_prefix(&self, prefix: u8) -> Self {
        AddrPrefix {
            addr: mask_addr(&self.addr, prefix),
            prefix,
        }
    }
}

impl fmt::Display for AddrPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl Serialize for AddrPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn family_max(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask_addr(addr: &IpAddr, len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let mask = if len == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(len.min(32)))
            };
            IpAddr::V4(Ipv4Addr::from(u32::from(*v4) & mask))
        }
        IpAddr::V6(v6) => {
            let mask = if len == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(len.min(128)))
            };
            IpAddr::V6(Ipv6Addr::from(u128::from(*v6) & mask))
        }
    }
}

/// Reverse lookup of an address to its textual name.
///
/// Client long names and file-name verification go through this seam so
/// a real DNS resolver can be plugged in; resolution is outside this
/// crate's scope.
pub trait ReverseResolver {
    fn reverse(&self, addr: &IpAddr) -> String;
}

/// Formats the address numerically, with no DNS involved.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericResolver;

impl ReverseResolver for NumericResolver {
    fn reverse(&self, addr: &IpAddr) -> String {
        addr.to_string()
    }
}

/// The reverse textual form of an address used for client long names.
pub fn reverse_name(addr: &IpAddr) -> String {
    NumericResolver.reverse(addr)
}
