//! Options decoded from forwarder scheme urls, e.g.
//! `httpobfs://1.2.3.4:8080/path?host=cdn.example.com` or
//! `doh://1.1.1.1:443/dns-query?timeout=5`.

use std::time::Duration;

use url::Url;

use crate::{Error, Result};

pub const HTTP_OBFS_SCHEME: &str = "httpobfs";
pub const DOH_SCHEME: &str = "doh";

pub const DEFAULT_OBFS_PATH: &str = "/";
pub const DEFAULT_DOH_PATH: &str = "/dns-query";
pub const DEFAULT_DOH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq)]
pub struct HttpObfsOption {
    /// `host:port` of the obfs server, empty to dial the upstream's address
    pub addr: String,
    /// value of the `Host` header
    pub host: String,
    /// request path, never empty
    pub path: String,
}

impl TryFrom<&Url> for HttpObfsOption {
    type Error = Error;

    fn try_from(u: &Url) -> Result<Self> {
        expect_scheme(u, HTTP_OBFS_SCHEME)?;

        let addr = match u.host_str() {
            Some(host) if !host.is_empty() => {
                let port = u.port().ok_or_else(|| {
                    Error::InvalidConfig(format!("{HTTP_OBFS_SCHEME}: missing port"))
                })?;
                format!("{host}:{port}")
            }
            _ => String::new(),
        };

        let host = query_value(u, "host")
            .or_else(|| u.host_str().map(ToOwned::to_owned))
            .unwrap_or_default();

        let path = if u.path().is_empty() {
            DEFAULT_OBFS_PATH.to_owned()
        } else {
            u.path().to_owned()
        };

        Ok(Self { addr, host, path })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DohOption {
    /// `host[:port]` of the resolver
    pub addr: String,
    pub path: String,
    pub timeout: Duration,
}

impl TryFrom<&Url> for DohOption {
    type Error = Error;

    fn try_from(u: &Url) -> Result<Self> {
        expect_scheme(u, DOH_SCHEME)?;

        let addr = match (u.host_str(), u.port()) {
            (Some(host), Some(port)) if !host.is_empty() => format!("{host}:{port}"),
            (Some(host), None) if !host.is_empty() => host.to_owned(),
            _ => String::new(),
        };

        let path = if u.path().is_empty() || u.path() == "/" {
            DEFAULT_DOH_PATH.to_owned()
        } else {
            u.path().to_owned()
        };

        let timeout = query_value(u, "timeout")
            .and_then(|t| t.parse::<u64>().ok())
            .filter(|t| *t > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_DOH_TIMEOUT);

        Ok(Self {
            addr,
            path,
            timeout,
        })
    }
}

fn expect_scheme(u: &Url, scheme: &str) -> Result<()> {
    if u.scheme() != scheme {
        return Err(Error::InvalidConfig(format!(
            "unexpected scheme {}, want {scheme}",
            u.scheme()
        )));
    }
    Ok(())
}

fn query_value(u: &Url, key: &str) -> Option<String> {
    u.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
