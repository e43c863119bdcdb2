use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::ConfigError;

/// One `LocalForward` directive: listen locally, relay to `remote_host:remote_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalForwardSpec {
    pub bind_addr: IpAddr,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl LocalForwardSpec {
    /// Parse `"<port> <host>:<port>"`, optionally with a bind address on the
    /// listening side (`127.0.0.1:8080 host:80`) or a bracketed IPv6 remote.
    pub fn parse(directive: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidLocalForward {
            directive: directive.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = directive.split_whitespace();
        let (Some(listen), Some(remote), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected '<port> <host>:<port>'"));
        };

        let (bind_addr, local_port) = match listen.rsplit_once(':') {
            Some((addr, port)) => {
                let addr = addr.trim_start_matches('[').trim_end_matches(']');
                let addr = if addr == "localhost" {
                    IpAddr::V4(Ipv4Addr::LOCALHOST)
                } else {
                    addr.parse::<IpAddr>()
                        .map_err(|_| invalid("bad bind address"))?
                };
                (addr, parse_port(port).ok_or_else(|| invalid("bad local port"))?)
            }
            None => (
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                parse_port(listen).ok_or_else(|| invalid("bad local port"))?,
            ),
        };

        let (remote_host, remote_port) = split_host_port(remote)
            .ok_or_else(|| invalid("expected remote '<host>:<port>'"))?;
        let remote_port = parse_port(remote_port).ok_or_else(|| invalid("bad remote port"))?;

        Ok(Self {
            bind_addr,
            local_port,
            remote_host: remote_host.to_string(),
            remote_port,
        })
    }

    pub fn remote(&self) -> String {
        if self.remote_host.contains(':') {
            format!("[{}]:{}", self.remote_host, self.remote_port)
        } else {
            format!("{}:{}", self.remote_host, self.remote_port)
        }
    }
}

impl FromStr for LocalForwardSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LocalForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}", self.bind_addr, self.local_port, self.remote())
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.parse::<u16>().ok().filter(|port| *port != 0)
}

fn split_host_port(raw: &str) -> Option<(&str, &str)> {
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        return (!host.is_empty()).then_some((host, port));
    }
    let (host, port) = raw.rsplit_once(':')?;
    (!host.is_empty() && !host.contains(':')).then_some((host, port))
}
