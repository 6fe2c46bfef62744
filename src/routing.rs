/*
 * Copyright (C) 2026 Argon developers
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use ipnet::IpNet;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path_prefix: String,
    pub document_root: Option<PathBuf>,
    pub autoindex: bool,
}

impl Location {
    pub fn new(path_prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            document_root: None,
            autoindex: false,
        }
    }
}

/// A named routing target bound to a port.
///
/// The rate limit and network ranges are carried as data only. Nothing in
/// the request path enforces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHost {
    pub primary_name: String,
    pub alternate_names: Vec<String>,
    pub listen_port: u16,
    pub rate_limit: Option<u32>,
    pub allow: Vec<IpNet>,
    pub deny: Vec<IpNet>,
    pub locations: Vec<Location>,
}

impl VirtualHost {
    pub fn new(primary_name: impl Into<String>, listen_port: u16) -> Self {
        Self {
            primary_name: primary_name.into(),
            alternate_names: Vec::new(),
            listen_port,
            rate_limit: None,
            allow: Vec::new(),
            deny: Vec::new(),
            locations: Vec::new(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_name.as_str())
            .chain(self.alternate_names.iter().map(|s| s.as_str()))
    }

    // exact, case-sensitive. no wildcards
    pub fn matches(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    /// Returns the location with the longest prefix of `path`, if any.
    pub fn location_for(&self, path: &str) -> Option<&Location> {
        self.locations
            .iter()
            .filter(|l| path.starts_with(l.path_prefix.as_str()))
            .max_by_key(|l| l.path_prefix.len())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("virtual host on port {0} has no name")]
    MissingName(u16),

    #[error("duplicate server_name {0}")]
    DuplicateName(String),
}

/// Immutable virtual host table, shared by all workers without locking.
#[derive(Debug)]
pub struct RoutingTable {
    hosts: Vec<VirtualHost>,
    by_name: HashMap<String, usize>,

    // values are indexes into hosts, in declaration order
    by_port: BTreeMap<u16, Vec<usize>>,
}

impl RoutingTable {
    pub fn new(hosts: Vec<VirtualHost>) -> Result<Self, TableError> {
        let mut by_name = HashMap::with_capacity(hosts.len());
        let mut by_port: BTreeMap<u16, Vec<usize>> = BTreeMap::new();

        for (i, host) in hosts.iter().enumerate() {
            if host.primary_name.is_empty() {
                return Err(TableError::MissingName(host.listen_port));
            }

            if by_name.insert(host.primary_name.clone(), i).is_some() {
                return Err(TableError::DuplicateName(host.primary_name.clone()));
            }

            by_port.entry(host.listen_port).or_default().push(i);
        }

        Ok(Self {
            hosts,
            by_name,
            by_port,
        })
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, primary_name: &str) -> Option<&VirtualHost> {
        self.by_name.get(primary_name).map(|&i| &self.hosts[i])
    }

    /// All hosts, in declaration order.
    pub fn hosts(&self) -> &[VirtualHost] {
        &self.hosts
    }

    /// Distinct configured ports, ascending.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.by_port.keys().copied()
    }

    pub fn candidates(&self, port: u16) -> impl Iterator<Item = &VirtualHost> {
        self.by_port
            .get(&port)
            .into_iter()
            .flatten()
            .map(move |&i| &self.hosts[i])
    }

    /// Selects the host for a connection accepted on `port`.
    ///
    /// The first candidate naming `host` wins. If none does, or no host was
    /// given, the first host declared on the port is the default. `None`
    /// means nothing is configured on the port.
    pub fn resolve(&self, port: u16, host: Option<&str>) -> Option<&VirtualHost> {
        let mut candidates = self.candidates(port).peekable();

        let default = *candidates.peek()?;

        if let Some(host) = host {
            if let Some(vhost) = candidates.find(|c| c.matches(host)) {
                return Some(vhost);
            }
        }

        Some(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_hosts() -> RoutingTable {
        let mut a = VirtualHost::new("a.com", 80);
        a.alternate_names.push("www.a.com".to_string());

        let b = VirtualHost::new("b.com", 80);

        RoutingTable::new(vec![a, b]).unwrap()
    }

    #[test]
    fn resolve_by_name_and_default() {
        let table = two_hosts();

        assert_eq!(
            table.resolve(80, Some("www.a.com")).unwrap().primary_name,
            "a.com"
        );
        assert_eq!(table.resolve(80, Some("b.com")).unwrap().primary_name, "b.com");
        assert_eq!(table.resolve(80, Some("c.com")).unwrap().primary_name, "a.com");
        assert_eq!(table.resolve(80, None).unwrap().primary_name, "a.com");
        assert!(table.resolve(9090, Some("a.com")).is_none());
        assert!(table.resolve(9090, None).is_none());
    }

    #[test]
    fn resolve_is_case_sensitive() {
        let mut a = VirtualHost::new("a.com", 80);
        a.alternate_names.push("www.a.com".to_string());
        let b = VirtualHost::new("B.com", 80);

        let table = RoutingTable::new(vec![a, b]).unwrap();

        assert_eq!(table.resolve(80, Some("b.com")).unwrap().primary_name, "a.com");
        assert_eq!(table.resolve(80, Some("B.com")).unwrap().primary_name, "B.com");
    }

    #[test]
    fn resolve_scopes_by_port() {
        let a = VirtualHost::new("a.com", 80);
        let b = VirtualHost::new("b.com", 8080);
        let c = VirtualHost::new("c.com", 8080);

        let table = RoutingTable::new(vec![a, b, c]).unwrap();

        // a.com is not reachable through port 8080
        assert_eq!(
            table.resolve(8080, Some("a.com")).unwrap().primary_name,
            "b.com"
        );
        assert_eq!(
            table.resolve(8080, Some("c.com")).unwrap().primary_name,
            "c.com"
        );
        assert_eq!(table.resolve(80, Some("c.com")).unwrap().primary_name, "a.com");
    }

    #[test]
    fn index() {
        let a = VirtualHost::new("a.com", 8080);
        let b = VirtualHost::new("b.com", 80);
        let c = VirtualHost::new("c.com", 8080);

        let table = RoutingTable::new(vec![a, b, c]).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.ports().collect::<Vec<_>>(), vec![80, 8080]);

        let names: Vec<&str> = table
            .candidates(8080)
            .map(|h| h.primary_name.as_str())
            .collect();
        assert_eq!(names, vec!["a.com", "c.com"]);

        assert_eq!(table.candidates(443).count(), 0);

        assert_eq!(table.get("b.com").unwrap().listen_port, 80);
        assert!(table.get("d.com").is_none());

        for host in table.hosts() {
            assert!(table.candidates(host.listen_port).any(|h| h == host));
        }
    }

    #[test]
    fn duplicate_primary_name() {
        let a = VirtualHost::new("a.com", 80);
        let b = VirtualHost::new("a.com", 8080);

        assert_eq!(
            RoutingTable::new(vec![a, b]).unwrap_err(),
            TableError::DuplicateName("a.com".to_string())
        );
    }

    #[test]
    fn alternate_name_may_repeat_primary() {
        // only primary names are identity keys
        let a = VirtualHost::new("a.com", 80);
        let mut b = VirtualHost::new("b.com", 80);
        b.alternate_names.push("a.com".to_string());

        let table = RoutingTable::new(vec![a, b]).unwrap();

        assert_eq!(table.resolve(80, Some("a.com")).unwrap().primary_name, "a.com");
    }

    #[test]
    fn missing_name() {
        let a = VirtualHost::new("", 80);

        assert_eq!(
            RoutingTable::new(vec![a]).unwrap_err(),
            TableError::MissingName(80)
        );
    }

    #[test]
    fn location_longest_prefix() {
        let mut a = VirtualHost::new("a.com", 80);
        a.locations.push(Location::new("/"));
        a.locations.push(Location::new("/static"));
        a.locations.push(Location::new("/static/img"));

        assert_eq!(a.location_for("/index.html").unwrap().path_prefix, "/");
        assert_eq!(a.location_for("/static/app.js").unwrap().path_prefix, "/static");
        assert_eq!(
            a.location_for("/static/img/logo.png").unwrap().path_prefix,
            "/static/img"
        );

        let b = VirtualHost::new("b.com", 80);
        assert!(b.location_for("/").is_none());
    }
}
