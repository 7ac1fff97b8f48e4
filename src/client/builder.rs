//! Client construction paths.
//!
//! Four independent sources converge on one validated [`Client`]: a parsed
//! configuration section, an external data-store tuple, the attribute set
//! of a live request, and a standalone file holding a single definition.
//! Each path fails fast; no partially built record survives an error.

use std::time::Duration;

use crate::client::record::{Client, Protocol};
use crate::error::ClientError;
use crate::net::{reverse_name, AddrPrefix};
use crate::registry::VirtualServers;
use crate::section::Section;

/// Server-wide bounds the builders validate against.
#[derive(Debug, Clone, Copy)]
pub struct BuilderOpts {
    /// Upper bound for a client's `response_window`; mirrors the server's
    /// global maximum request time.
    pub max_request_time: Duration,
}

impl Default for BuilderOpts {
    fn default() -> Self {
        BuilderOpts {
            max_request_time: Duration::from_secs(30),
        }
    }
}

const RESPONSE_WINDOW_MIN: Duration = Duration::from_millis(1);
const RESPONSE_WINDOW_MAX: Duration = Duration::from_secs(60);

/// Default secret substituted for clients whose transport performs its
/// own authentication (RFC 6614).
const TLS_DEFAULT_SECRET: &str = "radsec";

/// Build a client from a parsed configuration section.
///
/// `enclosing_server` is the virtual server whose section the client
/// definition is nested in, if any; a client nested that way cannot also
/// name a `virtual_server` of its own.
pub fn from_section(
    section: &Section,
    enclosing_server: Option<&str>,
    servers: &dyn VirtualServers,
    opts: &BuilderOpts,
) -> Result<Client, ClientError> {
    let label = section.label().ok_or(ClientError::MissingClientName)?;

    // Address keys, newest form first. The old bare-address-as-name
    // syntax is not accepted.
    let addr = if let Some(raw) = section.value("ipaddr") {
        AddrPrefix::parse(raw)?
    } else if let Some(raw) = section.value("ipv4addr") {
        AddrPrefix::parse_v4(raw)?
    } else if let Some(raw) = section.value("ipv6addr") {
        AddrPrefix::parse_v6(raw)?
    } else {
        return Err(ClientError::MissingAddress(label.to_string()));
    };

    let longname = reverse_name(&addr.addr());
    let shortname = section.value("shortname").unwrap_or(label).to_string();

    let server = match section.value("virtual_server") {
        Some(name) => {
            if enclosing_server.is_some() {
                return Err(ClientError::NestedServerConflict);
            }
            servers
                .lookup(name)
                .ok_or_else(|| ClientError::UnknownVirtualServer(name.to_string()))?;
            Some(name.to_string())
        }
        None => enclosing_server.map(String::from),
    };

    let proto = match section.value("proto") {
        Some(token) => Protocol::from_token(token)?,
        None => Protocol::Udp,
    };

    let src_addr = match section.value("src_ipaddr") {
        Some(raw) => Some(parse_src_addr(raw, &addr)?),
        None => None,
    };

    let response_window = match section.duration_value("response_window")? {
        Some(window) => {
            let max = RESPONSE_WINDOW_MAX.min(opts.max_request_time);
            if window < RESPONSE_WINDOW_MIN || window > max {
                return Err(ClientError::ResponseWindowOutOfRange {
                    window,
                    min: RESPONSE_WINDOW_MIN,
                    max,
                });
            }
            Some(window)
        }
        None => None,
    };

    let secret = match section.value("secret") {
        Some(s) if !s.is_empty() => s.to_string(),
        _ if proto.requires_tls() => TLS_DEFAULT_SECRET.to_string(),
        _ => return Err(ClientError::EmptySecret),
    };

    let mut client = Client::base(addr, longname, shortname, secret);
    client.proto = proto;
    client.tls_required = proto.requires_tls();
    client.server = server;
    client.src_addr = src_addr;
    client.response_window = response_window;
    client.require_message_authenticator =
        section.bool_value("require_message_authenticator", false)?;
    client.nas_type = section.value("nas_type").map(String::from);

    if let Some(limit) = section.section("limit") {
        client.limits.max_connections = limit.u32_value("max_connections", 16)?;
        client.limits.lifetime = limit.u32_value("lifetime", 0)?;
        client.limits.idle_timeout = limit.u32_value("idle_timeout", 30)?;
    }
    client.normalize_limits();

    Ok(client)
}

fn parse_src_addr(raw: &str, addr: &AddrPrefix) -> Result<std::net::IpAddr, ClientError> {
    match addr.addr() {
        std::net::IpAddr::V4(_) => raw
            .parse::<std::net::Ipv4Addr>()
            .map(std::net::IpAddr::V4)
            .map_err(|e| ClientError::InvalidSourceAddress(format!("{}", e))),
        std::net::IpAddr::V6(_) => raw
            .parse::<std::net::Ipv6Addr>()
            .map(std::net::IpAddr::V6)
            .map_err(|e| ClientError::InvalidSourceAddress(format!("{}", e))),
    }
}

/// Build a client from an external data-store tuple.
///
/// `identifier` is an address or subnet string of unspecified family. The
/// record matches any transport, mirroring stores that do not carry a
/// protocol column.
pub fn from_query(
    identifier: &str,
    secret: &str,
    shortname: Option<&str>,
    nas_type: Option<&str>,
    server: Option<&str>,
    require_message_authenticator: bool,
) -> Result<Client, ClientError> {
    let addr = AddrPrefix::parse(identifier)?;

    if secret.is_empty() {
        return Err(ClientError::EmptySecret);
    }

    let longname = reverse_name(&addr.addr());
    let shortname = shortname.unwrap_or(&longname).to_string();

    let mut client = Client::base(addr, longname, shortname, secret.to_string());
    client.proto = Protocol::Any;
    client.nas_type = nas_type.map(String::from);
    client.server = server.map(String::from);
    client.require_message_authenticator = require_message_authenticator;
    client.dynamic = true;
    client.normalize_limits();

    Ok(client)
}

#[cfg(feature = "dynamic-clients")]
pub use dynamic::{from_file, from_request, ControlAttribute, RequestContext};

#[cfg(feature = "dynamic-clients")]
mod dynamic {
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    use ipnet::{Ipv4Net, Ipv6Net};
    use log::debug;

    use super::{from_section, BuilderOpts};
    use crate::client::record::Client;
    use crate::error::ClientError;
    use crate::net::{AddrPrefix, ReverseResolver};
    use crate::registry::VirtualServers;
    use crate::section::Section;

    /// Control attributes a request may carry to describe a new client.
    ///
    /// Everything outside this closed set is ignored with a diagnostic.
    #[derive(Debug, Clone)]
    pub enum ControlAttribute {
        ClientIpAddress(Ipv4Addr),
        ClientIpPrefix(Ipv4Net),
        ClientIpv6Address(Ipv6Addr),
        ClientIpv6Prefix(Ipv6Net),
        ClientSecret(String),
        ClientShortname(String),
        ClientNasType(String),
        Other { name: String, value: String },
    }

    /// What the dynamic-client path needs from an inbound request.
    #[derive(Debug, Clone)]
    pub struct RequestContext {
        /// The request's mutable attribute set.
        pub attributes: Vec<ControlAttribute>,
        /// The request's own virtual-server scope.
        pub server: Option<String>,
        /// The listener network the request arrived on.
        pub network: AddrPrefix,
    }

    static DYNAMIC_LABEL: AtomicU32 = AtomicU32::new(0);

    /// Build a client from the attribute set of a live request.
    ///
    /// The recognized attributes are projected into a synthetic client
    /// section and run through [`from_section`]. The produced record must
    /// stay within the listener network the request arrived on: same
    /// address family, a prefix at least as specific, and an address
    /// inside the network.
    pub fn from_request(
        request: &RequestContext,
        servers: &dyn VirtualServers,
        opts: &BuilderOpts,
    ) -> Result<Client, ClientError> {
        let label = format!("dynamic{}", DYNAMIC_LABEL.fetch_add(1, Ordering::Relaxed));
        let mut section = Section::new("client", Some(&label));

        for attribute in &request.attributes {
            match attribute {
                ControlAttribute::ClientIpAddress(ip) => {
                    section.push_value("ipv4addr", &ip.to_string())
                }
                ControlAttribute::ClientIpPrefix(net) => {
                    section.push_value("ipv4addr", &net.to_string())
                }
                ControlAttribute::ClientIpv6Address(ip) => {
                    section.push_value("ipv6addr", &ip.to_string())
                }
                ControlAttribute::ClientIpv6Prefix(net) => {
                    section.push_value("ipv6addr", &net.to_string())
                }
                ControlAttribute::ClientSecret(secret) => section.push_value("secret", secret),
                ControlAttribute::ClientShortname(name) => section.push_value("shortname", name),
                ControlAttribute::ClientNasType(nas_type) => {
                    section.push_value("nas_type", nas_type)
                }
                ControlAttribute::Other { name, .. } => {
                    debug!("Ignoring attribute {}", name);
                }
            }
        }

        let mut client = from_section(&section, request.server.as_deref(), servers, opts)?;
        client.dynamic = true;

        let network = &request.network;
        if client.addr.addr().is_ipv4() != network.addr().is_ipv4() {
            return Err(ClientError::NetworkFamilyMismatch {
                client: client.addr.to_string(),
                network: network.to_string(),
            });
        }
        if network.prefix() > client.addr.prefix()
            || client.addr.masked(network.prefix()) != network.addr()
        {
            return Err(ClientError::OutsideListenerNetwork {
                client: client.addr.to_string(),
                network: network.to_string(),
            });
        }

        Ok(client)
    }

    /// Read a single client definition from a file.
    ///
    /// Supports runtime loading of staged definitions. With `verify_name`
    /// set, the file's base name must equal the reverse-lookup form of
    /// the client's address, guarding against definitions filed under the
    /// wrong name. Performs disk I/O; keep it off the packet path.
    pub fn from_file(
        path: &Path,
        enclosing_server: Option<&str>,
        verify_name: bool,
        resolver: &dyn ReverseResolver,
        servers: &dyn VirtualServers,
        opts: &BuilderOpts,
    ) -> Result<Client, ClientError> {
        let root = Section::from_yaml_file(path)?;

        let definitions: Vec<&Section> = root.sections("client").collect();
        if definitions.len() != 1 {
            return Err(ClientError::NotExactlyOneClient {
                path: path.display().to_string(),
                count: definitions.len(),
            });
        }

        let mut client = from_section(definitions[0], enclosing_server, servers, opts)?;
        client.dynamic = true;

        if verify_name {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let reverse = resolver.reverse(&client.addr.addr());
            if name != reverse {
                return Err(ClientError::FileNameMismatch {
                    path: path.display().to_string(),
                    addr: reverse,
                    name,
                });
            }
        }

        Ok(client)
    }
}
