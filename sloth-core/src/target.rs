//! Target URL parsing and resolution

use crate::{Error, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use url::{Host, Url};

/// The HTTP server under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    port: u16,
}

impl Target {
    /// Parse `http://host[:port][/path][?query]`
    ///
    /// A bare `host[:port]/path` is taken as plain http. Any other scheme is
    /// rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let url = if input.contains("://") {
            Url::parse(input)?
        } else {
            Url::parse(&format!("http://{input}"))?
        };

        if url.scheme() != "http" {
            return Err(Error::Target(format!(
                "unsupported scheme '{}' in {input}: only plain http targets are supported",
                url.scheme()
            )));
        }
        if url.host().is_none() {
            return Err(Error::Target(format!("no host in {input}")));
        }
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Self { url, port })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host as written in the URL; IPv6 literals keep their brackets
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request target: path plus query, never empty
    pub fn path(&self) -> String {
        let mut path = match self.url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        if let Some(query) = self.url.query() {
            path.push('?');
            path.push_str(query);
        }
        path
    }

    /// `Host` header value; the port is only spelled out when it is not 80
    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host().to_string()
        } else {
            format!("{}:{}", self.host(), self.port)
        }
    }

    /// Resolve to every socket address the host maps to
    pub fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = match self.url.host() {
            Some(Host::Ipv4(ip)) => vec![SocketAddr::from((ip, self.port))],
            Some(Host::Ipv6(ip)) => vec![SocketAddr::from((ip, self.port))],
            Some(Host::Domain(name)) => (name, self.port)
                .to_socket_addrs()
                .map_err(|e| Error::Target(format!("cannot resolve {name}: {e}")))?
                .collect(),
            None => Vec::new(),
        };

        if addrs.is_empty() {
            return Err(Error::Target(format!("no addresses for {}", self.url)));
        }
        Ok(addrs)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}
