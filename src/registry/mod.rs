//! Client registries and address matching.
//!
//! A [`ClientRegistry`] owns one ordered tree per prefix length and
//! answers longest-prefix-match lookups over both address families. The
//! [`ClientStore`] holds the root registry plus any per-virtual-server
//! registries, so client scoping is an explicit handle threaded through
//! startup and request processing rather than hidden global state.
//!
//! `find` takes `&self` and performs no locking; concurrent readers are
//! safe as long as no mutation is in flight. Runtime mutation while
//! workers are reading must be serialized externally, either through a
//! single owner task or by swapping in a freshly built registry.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use log::{debug, info, warn};

use crate::client::builder::{self, BuilderOpts};
use crate::client::record::{Client, Protocol};
use crate::error::ClientError;
use crate::net::AddrPrefix;
use crate::section::Section;

/// Prefix lengths 0..=128, inclusive.
const PREFIX_SLOTS: usize = 129;

/// Locator for a registered client, stored in the number index.
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy)]
struct ClientKey {
    prefix: u8,
    addr: IpAddr,
}

/// An owning set of clients sharing one scope.
#[derive(Debug)]
pub struct ClientRegistry {
    name: String,
    /// One ordered tree per prefix length; lazily created.
    trees: Vec<Option<BTreeMap<IpAddr, Vec<Client>>>>,
    /// Narrowest populated prefix length. Never grows back after a
    /// delete; emptied trees are simply skipped by lookups.
    min_prefix: u8,
    len: usize,
    #[cfg(feature = "stats")]
    num_index: BTreeMap<u32, ClientKey>,
    #[cfg(feature = "stats")]
    next_number: u32,
}

impl ClientRegistry {
    /// New empty registry. The name defaults to "root".
    pub fn new(label: Option<&str>) -> Self {
        ClientRegistry {
            name: label.unwrap_or("root").to_string(),
            trees: (0..PREFIX_SLOTS).map(|_| None).collect(),
            min_prefix: 128,
            len: 0,
            #[cfg(feature = "stats")]
            num_index: BTreeMap::new(),
            #[cfg(feature = "stats")]
            next_number: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a client, taking ownership.
    ///
    /// A record identical in all identity fields to one already present
    /// is dropped with a warning and reported as success. A record that
    /// shares a key but diverges in identity is rejected with
    /// [`ClientError::DuplicateClient`] and nothing is modified.
    pub fn add(&mut self, mut client: Client) -> Result<(), ClientError> {
        // An all-zero address with a full-length prefix is configuration
        // shorthand for "any address".
        if client.addr.is_any_addr() && client.addr.prefix() == client.addr.family_max() {
            client.addr = client.addr.with_prefix(0);
        }

        let prefix = client.addr.prefix();
        let key = client.addr.addr();
        debug!(
            "Adding client {} ({}) to prefix tree {}",
            client.addr, client.longname, prefix
        );

        let tree = self.trees[prefix as usize].get_or_insert_with(BTreeMap::new);

        if let Some(slot) = tree.get(&key) {
            if let Some(old) = slot.iter().find(|c| c.proto.matches(client.proto)) {
                if old.same_identity(&client) {
                    warn!("Ignoring duplicate client {}", client.longname);
                    return Ok(());
                }
                return Err(ClientError::DuplicateClient(client.shortname.clone()));
            }
        }

        #[cfg(feature = "stats")]
        {
            client.number = self.next_number;
            self.next_number += 1;
            self.num_index.insert(client.number, ClientKey { prefix, addr: key });
        }

        if prefix < self.min_prefix {
            self.min_prefix = prefix;
        }
        tree.entry(key).or_default().push(client);
        self.len += 1;
        Ok(())
    }

    /// Remove the client registered at exactly this address and prefix,
    /// returning it.
    #[cfg(feature = "dynamic-clients")]
    pub fn delete(&mut self, addr: &AddrPrefix, proto: Protocol) -> Option<Client> {
        let prefix = addr.prefix();
        let key = addr.masked(prefix);

        let tree = self.trees[prefix as usize].as_mut()?;
        let slot = tree.get_mut(&key)?;
        let index = slot.iter().position(|c| c.proto.matches(proto))?;
        let client = slot.remove(index);
        if slot.is_empty() {
            tree.remove(&key);
        }
        self.len -= 1;

        #[cfg(feature = "stats")]
        self.num_index.remove(&client.number);

        debug!(
            "Removed client {} from prefix tree {}",
            client.longname, prefix
        );
        Some(client)
    }

    /// Longest-prefix-match lookup.
    ///
    /// Scans candidate prefix lengths from the most specific down to the
    /// narrowest registered one, masking the query address at each step.
    /// A query address carrying its own prefix restricts the scan to
    /// matches at or below that prefix. The returned reference is
    /// borrowed; removal goes through [`ClientRegistry::delete`].
    pub fn find(&self, addr: &AddrPrefix, proto: Protocol) -> Option<&Client> {
        let mut max_prefix = addr.family_max();
        if addr.prefix() < max_prefix {
            max_prefix = addr.prefix();
        }

        let mut i = i32::from(max_prefix);
        while i >= i32::from(self.min_prefix) {
            let len = i as u8;
            if let Some(tree) = self.trees[i as usize].as_ref() {
                let probe = addr.masked(len);
                if let Some(slot) = tree.get(&probe) {
                    if let Some(client) = slot.iter().find(|c| c.proto.matches(proto)) {
                        return Some(client);
                    }
                }
            }
            i -= 1;
        }
        None
    }

    /// Look up a client by its sequential number.
    ///
    /// Numbers at or beyond the next-to-assign counter, and numbers
    /// whose client has been deleted, yield `None`.
    #[cfg(feature = "stats")]
    pub fn find_by_number(&self, number: u32) -> Option<&Client> {
        if number >= self.next_number {
            return None;
        }
        let key = self.num_index.get(&number)?;
        self.trees[key.prefix as usize]
            .as_ref()?
            .get(&key.addr)?
            .iter()
            .find(|c| c.number == number)
    }

    /// All registered clients, most specific prefixes first.
    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.trees
            .iter()
            .rev()
            .flatten()
            .flat_map(|tree| tree.values().flatten())
    }
}

/// A named virtual-server scope.
#[derive(Debug, Clone)]
pub struct VirtualServer {
    pub name: String,
    /// Whether the server defines its own listener section. Servers
    /// without one share the root client registry.
    pub has_listener: bool,
}

/// Virtual-server name resolution, consumed as an external collaborator.
pub trait VirtualServers {
    fn lookup(&self, name: &str) -> Option<VirtualServer>;
}

/// Map-backed resolver for startup wiring and tests.
#[derive(Debug, Default)]
pub struct StaticServers {
    servers: HashMap<String, VirtualServer>,
}

impl StaticServers {
    pub fn insert(&mut self, name: &str, has_listener: bool) {
        self.servers.insert(
            name.to_string(),
            VirtualServer {
                name: name.to_string(),
                has_listener,
            },
        );
    }
}

impl VirtualServers for StaticServers {
    fn lookup(&self, name: &str) -> Option<VirtualServer> {
        self.servers.get(name).cloned()
    }
}

/// The root client registry plus per-virtual-server registries.
///
/// Construct one at startup and pass it by reference; registries scoped
/// to a virtual server live and die with their entry here.
#[derive(Debug, Default)]
pub struct ClientStore {
    root: Option<ClientRegistry>,
    by_server: HashMap<String, ClientRegistry>,
}

impl ClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client, resolving the target registry from its
    /// virtual-server association. Registries are created lazily.
    pub fn add(
        &mut self,
        client: Client,
        servers: &dyn VirtualServers,
    ) -> Result<(), ClientError> {
        if let Some(name) = client.server.clone() {
            let server = servers
                .lookup(&name)
                .ok_or_else(|| ClientError::UnknownVirtualServer(name.clone()))?;
            if server.has_listener {
                return self
                    .by_server
                    .entry(name.clone())
                    .or_insert_with(|| ClientRegistry::new(Some(&name)))
                    .add(client);
            }
            // No listener section: fall through to the root registry.
        }
        self.root_mut().add(client)
    }

    /// Mutable access to the root registry, creating it if needed. The
    /// dynamic-client control path removes records through this.
    pub fn root_mut(&mut self) -> &mut ClientRegistry {
        self.root.get_or_insert_with(|| ClientRegistry::new(None))
    }

    /// The root registry, if any client has been added to it.
    pub fn root(&self) -> Option<&ClientRegistry> {
        self.root.as_ref()
    }

    pub fn server_registry(&self, name: &str) -> Option<&ClientRegistry> {
        self.by_server.get(name)
    }

    pub fn server_registry_mut(&mut self, name: &str) -> Option<&mut ClientRegistry> {
        self.by_server.get_mut(name)
    }

    /// Look up a client within the given scope.
    pub fn find(
        &self,
        server: Option<&str>,
        addr: &AddrPrefix,
        proto: Protocol,
    ) -> Option<&Client> {
        match server {
            Some(name) => self.by_server.get(name)?.find(addr, proto),
            None => self.root.as_ref()?.find(addr, proto),
        }
    }
}

/// Create a registry from every `client` definition in a section.
///
/// The first builder or insertion failure aborts the whole load and
/// discards the partially built registry; a partial client list is never
/// left in place. Clients whose transport-security requirement differs
/// from the listener's are rejected.
pub fn load_clients(
    section: &Section,
    enclosing_server: Option<&str>,
    tls_required: bool,
    servers: &dyn VirtualServers,
    opts: &BuilderOpts,
) -> Result<ClientRegistry, ClientError> {
    let mut registry = ClientRegistry::new(Some(section.name()));

    for definition in section.sections("client") {
        let client = builder::from_section(definition, enclosing_server, servers, opts)?;

        if client.tls_required != tls_required {
            return Err(ClientError::TlsConfigMismatch(client.shortname));
        }

        registry.add(client)?;
    }

    info!(
        "Loaded {} clients into registry \"{}\"",
        registry.len(),
        registry.name()
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::reverse_name;

    fn client(addr: &str, shortname: &str, proto: Protocol) -> Client {
        let addr = AddrPrefix::parse(addr).unwrap();
        let mut c = Client::base(
            addr,
            reverse_name(&addr.addr()),
            shortname.to_string(),
            "s3cr3t".to_string(),
        );
        c.proto = proto;
        c
    }

    fn query(addr: &str) -> AddrPrefix {
        AddrPrefix::parse(addr).unwrap()
    }

    #[test]
    fn test_exact_find_after_add() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("192.0.2.1", "nas1", Protocol::Udp))
            .unwrap();

        let found = registry.find(&query("192.0.2.1"), Protocol::Udp).unwrap();
        assert_eq!(found.shortname, "nas1");
        assert!(registry.find(&query("192.0.2.2"), Protocol::Udp).is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("10.0.0.0/8", "wide", Protocol::Udp))
            .unwrap();
        registry
            .add(client("10.0.0.0/24", "narrow", Protocol::Udp))
            .unwrap();

        let found = registry.find(&query("10.0.0.5"), Protocol::Udp).unwrap();
        assert_eq!(found.shortname, "narrow");

        let found = registry.find(&query("10.0.1.5"), Protocol::Udp).unwrap();
        assert_eq!(found.shortname, "wide");
    }

    #[test]
    fn test_benign_duplicate_keeps_size() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("192.0.2.1", "nas1", Protocol::Udp))
            .unwrap();
        registry
            .add(client("192.0.2.1", "nas1", Protocol::Udp))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_divergent_duplicate_conflicts() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("192.0.2.1", "nas1", Protocol::Udp))
            .unwrap();

        let mut other = client("192.0.2.1", "nas1", Protocol::Udp);
        other.secret = "different".to_string();
        let err = registry.add(other).unwrap_err();
        assert!(matches!(err, ClientError::DuplicateClient(ref name) if name == "nas1"));
        assert!(err.is_conflict());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_wildcard_address_normalized() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("0.0.0.0/32", "any", Protocol::Udp))
            .unwrap();

        // Normalized to /0, so any v4 address matches when nothing more
        // specific is registered.
        let found = registry.find(&query("1.2.3.4"), Protocol::Udp).unwrap();
        assert_eq!(found.shortname, "any");
        assert_eq!(found.addr.prefix(), 0);
    }

    #[test]
    fn test_more_specific_beats_wildcard() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("0.0.0.0/0", "any", Protocol::Udp))
            .unwrap();
        registry
            .add(client("192.0.2.1", "exact", Protocol::Udp))
            .unwrap();

        let found = registry.find(&query("192.0.2.1"), Protocol::Udp).unwrap();
        assert_eq!(found.shortname, "exact");
        let found = registry.find(&query("8.8.8.8"), Protocol::Udp).unwrap();
        assert_eq!(found.shortname, "any");
    }

    #[test]
    fn test_query_prefix_restricts_scan() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("10.0.0.0/8", "wide", Protocol::Udp))
            .unwrap();
        registry
            .add(client("10.1.0.0/16", "site", Protocol::Udp))
            .unwrap();

        // Asking for 10.1.0.0/12 skips the /16 entry and lands on the /8.
        let found = registry.find(&query("10.1.0.0/12"), Protocol::Udp).unwrap();
        assert_eq!(found.shortname, "wide");
    }

    #[test]
    fn test_protocol_wildcard_matching() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("192.0.2.1", "dual", Protocol::Any))
            .unwrap();
        registry
            .add(client("192.0.2.2", "tcp-only", Protocol::Tcp))
            .unwrap();

        assert!(registry.find(&query("192.0.2.1"), Protocol::Udp).is_some());
        assert!(registry.find(&query("192.0.2.1"), Protocol::Tcp).is_some());
        assert!(registry.find(&query("192.0.2.2"), Protocol::Tcp).is_some());
        assert!(registry.find(&query("192.0.2.2"), Protocol::Udp).is_none());
    }

    #[test]
    fn test_distinct_protocols_coexist_at_one_address() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("192.0.2.1", "udp-side", Protocol::Udp))
            .unwrap();
        registry
            .add(client("192.0.2.1", "tcp-side", Protocol::Tcp))
            .unwrap();

        assert_eq!(registry.len(), 2);
        let found = registry.find(&query("192.0.2.1"), Protocol::Tcp).unwrap();
        assert_eq!(found.shortname, "tcp-side");
    }

    #[test]
    fn test_any_proto_conflicts_with_explicit() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("192.0.2.1", "dual", Protocol::Any))
            .unwrap();

        let err = registry
            .add(client("192.0.2.1", "tcp-side", Protocol::Tcp))
            .unwrap_err();
        assert!(matches!(err, ClientError::DuplicateClient(_)));
    }

    #[test]
    fn test_ipv6_lookup() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("2001:db8::/32", "v6net", Protocol::Udp))
            .unwrap();

        let found = registry
            .find(&query("2001:db8::42"), Protocol::Udp)
            .unwrap();
        assert_eq!(found.shortname, "v6net");
        // A v4 query never matches a v6 network.
        assert!(registry.find(&query("1.2.3.4"), Protocol::Udp).is_none());
    }

    #[cfg(feature = "dynamic-clients")]
    #[test]
    fn test_delete_removes_client() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("10.0.0.0/8", "wide", Protocol::Udp))
            .unwrap();
        registry
            .add(client("192.0.2.1", "nas1", Protocol::Udp))
            .unwrap();

        let removed = registry.delete(&query("192.0.2.1"), Protocol::Udp).unwrap();
        assert_eq!(removed.shortname, "nas1");
        assert_eq!(registry.len(), 1);
        assert!(registry.find(&query("192.0.2.1"), Protocol::Udp).is_none());

        // min_prefix stays stale but lookups remain correct.
        let found = registry.find(&query("10.9.9.9"), Protocol::Udp).unwrap();
        assert_eq!(found.shortname, "wide");
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_find_by_number() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("192.0.2.1", "first", Protocol::Udp))
            .unwrap();
        registry
            .add(client("192.0.2.2", "second", Protocol::Udp))
            .unwrap();

        assert_eq!(registry.find_by_number(0).unwrap().shortname, "first");
        assert_eq!(registry.find_by_number(1).unwrap().shortname, "second");
        assert!(registry.find_by_number(2).is_none());
        assert!(registry.find_by_number(100).is_none());
    }

    #[cfg(all(feature = "stats", feature = "dynamic-clients"))]
    #[test]
    fn test_numbers_not_reused_after_delete() {
        let mut registry = ClientRegistry::new(None);
        registry
            .add(client("192.0.2.1", "first", Protocol::Udp))
            .unwrap();
        registry.delete(&query("192.0.2.1"), Protocol::Udp).unwrap();
        registry
            .add(client("192.0.2.2", "second", Protocol::Udp))
            .unwrap();

        // Deleted numbers stay holes; ids are monotonic.
        assert!(registry.find_by_number(0).is_none());
        assert_eq!(registry.find_by_number(1).unwrap().shortname, "second");
    }

    #[test]
    fn test_store_scopes_by_virtual_server() {
        let mut servers = StaticServers::default();
        servers.insert("site-a", true);
        servers.insert("no-listener", false);

        let mut store = ClientStore::new();

        let mut scoped = client("10.0.0.1", "scoped", Protocol::Udp);
        scoped.server = Some("site-a".to_string());
        store.add(scoped, &servers).unwrap();

        let mut shared = client("10.0.0.2", "shared", Protocol::Udp);
        shared.server = Some("no-listener".to_string());
        store.add(shared, &servers).unwrap();

        store
            .add(client("10.0.0.3", "global", Protocol::Udp), &servers)
            .unwrap();

        // The scoped client lives in the server's own registry.
        assert!(store
            .find(Some("site-a"), &query("10.0.0.1"), Protocol::Udp)
            .is_some());
        assert!(store.find(None, &query("10.0.0.1"), Protocol::Udp).is_none());

        // The listener-less server's client fell back to the root.
        assert!(store.find(None, &query("10.0.0.2"), Protocol::Udp).is_some());
        assert!(store.find(None, &query("10.0.0.3"), Protocol::Udp).is_some());
    }

    #[test]
    fn test_store_rejects_unknown_server() {
        let mut store = ClientStore::new();
        let mut c = client("10.0.0.1", "orphan", Protocol::Udp);
        c.server = Some("missing".to_string());
        let err = store.add(c, &StaticServers::default()).unwrap_err();
        assert!(matches!(err, ClientError::UnknownVirtualServer(_)));
        assert!(store.root().is_none());
    }

    #[test]
    fn test_load_clients_from_section() {
        let yaml = r#"
client alpha:
  ipaddr: 192.0.2.1
  secret: one
client beta:
  ipaddr: 192.0.2.0/24
  secret: two
"#;
        let section = Section::from_yaml_str(yaml).unwrap();
        let registry = load_clients(
            &section,
            None,
            false,
            &StaticServers::default(),
            &BuilderOpts::default(),
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry
                .find(&query("192.0.2.1"), Protocol::Udp)
                .unwrap()
                .shortname,
            "alpha"
        );
        assert_eq!(
            registry
                .find(&query("192.0.2.99"), Protocol::Udp)
                .unwrap()
                .shortname,
            "beta"
        );
    }

    #[test]
    fn test_load_clients_aborts_on_first_error() {
        let yaml = r#"
client good:
  ipaddr: 192.0.2.1
  secret: one
client bad:
  ipaddr: not-an-address
  secret: two
"#;
        let section = Section::from_yaml_str(yaml).unwrap();
        let err = load_clients(
            &section,
            None,
            false,
            &StaticServers::default(),
            &BuilderOpts::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress { .. }));
    }

    #[test]
    fn test_load_clients_enforces_listener_tls() {
        let yaml = r#"
client secure:
  ipaddr: 192.0.2.1
  proto: tls
"#;
        let section = Section::from_yaml_str(yaml).unwrap();
        let err = load_clients(
            &section,
            None,
            false,
            &StaticServers::default(),
            &BuilderOpts::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::TlsConfigMismatch(ref name) if name == "secure"));

        let registry = load_clients(
            &section,
            None,
            true,
            &StaticServers::default(),
            &BuilderOpts::default(),
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
    }
}
