use std::path::{Path, PathBuf};

use secrecy::SecretSlice;

use super::{HopChain, HopDescriptor, LocalForwardSpec};
use crate::config::{HostEntry, Paths, SshConfig};
use crate::error::ConfigError;

const DEFAULT_SSH_PORT: u16 = 22;

/// Expand `name` into its hop chain, following `ProxyJump` references.
///
/// The result is ordered target-first. Any error fails the whole
/// resolution; a partial chain is never returned.
pub fn resolve(name: &str, config: &SshConfig, paths: &Paths) -> Result<HopChain, ConfigError> {
    resolve_from(name, config, paths, &[]).map(HopChain::new)
}

fn resolve_from(
    name: &str,
    config: &SshConfig,
    paths: &Paths,
    downstream: &[&str],
) -> Result<Vec<HopDescriptor>, ConfigError> {
    if downstream.contains(&name) {
        return Err(ConfigError::JumpCycle(name.to_string()));
    }

    let entry = config
        .query(name)
        .ok_or_else(|| ConfigError::UnknownHost(name.to_string()))?;
    let hop = build_hop(&entry, paths)?;

    let mut chain = vec![hop];
    if let Some(jump) = entry.proxy_jump.as_deref() {
        let mut seen = downstream.to_vec();
        seen.push(name);
        chain.extend(resolve_from(jump, config, paths, &seen)?);
    }
    Ok(chain)
}

fn build_hop(entry: &HostEntry, paths: &Paths) -> Result<HopDescriptor, ConfigError> {
    let host = entry.hostname.clone().unwrap_or_else(|| entry.name.clone());

    let port = match entry.port.as_deref() {
        Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidPort {
            host: entry.name.clone(),
            value: raw.to_string(),
        })?,
        None => DEFAULT_SSH_PORT,
    };

    let username = entry.user.clone().unwrap_or_else(|| paths.user.clone());

    let key_path = identity_path(entry, paths)?;
    let private_key = read_key(&key_path)?;

    let local_forwards = entry
        .local_forwards
        .iter()
        .map(|raw| LocalForwardSpec::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HopDescriptor {
        name: entry.name.clone(),
        host,
        port,
        username,
        key_path,
        private_key,
        local_forwards,
    })
}

/// The last listed `IdentityFile` wins; without one, the first default
/// identity that exists.
fn identity_path(entry: &HostEntry, paths: &Paths) -> Result<PathBuf, ConfigError> {
    if let Some(raw) = entry.identity_files.last() {
        return Ok(paths.resolve_identity(raw));
    }
    paths
        .default_identities
        .iter()
        .find(|path| path.exists())
        .cloned()
        .ok_or(ConfigError::NoIdentity)
}

fn read_key(path: &Path) -> Result<SecretSlice<u8>, ConfigError> {
    let bytes = std::fs::read(path).map_err(|e| ConfigError::KeyFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(SecretSlice::from(bytes))
}
