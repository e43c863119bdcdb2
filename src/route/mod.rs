//! Route resolution: turns a named ssh config entry into the chain of hops
//! that must be established to reach it.

pub mod forward_spec;
pub mod resolver;

use std::fmt;
use std::path::PathBuf;

use secrecy::SecretSlice;

pub use forward_spec::LocalForwardSpec;
pub use resolver::resolve;

/// One SSH session in a route.
///
/// Built fresh for every connection attempt, never reused across reconnects.
#[derive(Debug)]
pub struct HopDescriptor {
    /// The config entry this hop came from.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_path: PathBuf,
    pub private_key: SecretSlice<u8>,
    pub local_forwards: Vec<LocalForwardSpec>,
}

impl fmt::Display for HopDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Hops ordered target-first, outermost jump host last.
#[derive(Debug)]
pub struct HopChain {
    hops: Vec<HopDescriptor>,
}

impl HopChain {
    pub(crate) fn new(hops: Vec<HopDescriptor>) -> Self {
        Self { hops }
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// The final destination.
    pub fn target(&self) -> Option<&HopDescriptor> {
        self.hops.first()
    }

    /// Resolution order: target first.
    pub fn hops(&self) -> &[HopDescriptor] {
        &self.hops
    }

    /// The order sessions must be opened in: the directly reachable host
    /// first, each later hop tunnelled through the one before it.
    pub fn establishment_order(&self) -> impl Iterator<Item = &HopDescriptor> {
        self.hops.iter().rev()
    }
}
