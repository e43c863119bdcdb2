use std::sync::Arc;

use russh::client;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg};
use secrecy::ExposeSecret;

use crate::error::SshError;
use crate::route::HopDescriptor;

use super::handler::ClientHandler;

/// Decode the hop's private key material.
pub fn decode_key(hop: &HopDescriptor) -> Result<PrivateKeyWithHashAlg, SshError> {
    let path = hop.key_path.display();
    let content = std::str::from_utf8(hop.private_key.expose_secret())
        .map_err(|_| SshError::KeyFile(format!("Key file {} is not valid text", path)))?;

    // Check if this is actually a public key (common mistake)
    let first_line = content.lines().next().unwrap_or("");
    if first_line.starts_with("ssh-") || first_line.starts_with("ecdsa-") {
        return Err(SshError::KeyFile(format!(
            "File {} contains a PUBLIC key, not a private key",
            path
        )));
    }

    if !first_line.starts_with("-----BEGIN") {
        return Err(SshError::KeyFile(format!(
            "File {} does not appear to be a valid SSH private key",
            path
        )));
    }

    let key = russh::keys::decode_secret_key(content, None)
        .map_err(|e| SshError::KeyFile(format!("Failed to load key {}: {}", path, e)))?;

    // Only use SHA-512 hash algorithm for RSA keys
    let hash_alg = if key.algorithm().is_rsa() {
        Some(HashAlg::Sha512)
    } else {
        None
    };
    Ok(PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
}

/// Public key authentication for one hop.
pub async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    hop: &HopDescriptor,
) -> Result<(), SshError> {
    let key = decode_key(hop)?;
    tracing::debug!("Authenticating {} with {}", hop, hop.key_path.display());

    let result = handle
        .authenticate_publickey(hop.username.as_str(), key)
        .await
        .map_err(|e| {
            tracing::debug!("Public key auth to {} errored: {}", hop, e);
            SshError::AuthenticationFailed {
                user: hop.username.clone(),
                host: hop.host.clone(),
            }
        })?;

    if !result.success() {
        return Err(SshError::AuthenticationFailed {
            user: hop.username.clone(),
            host: hop.host.clone(),
        });
    }
    Ok(())
}
