//! Client key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex characters of the origin hash kept in anonymous keys.
const ORIGIN_HASH_LEN: usize = 16;

/// A stable key identifying a caller.
///
/// Either `user:<id>` for authenticated callers or `ip:<hash>` for anonymous
/// ones. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientKey(String);

impl ClientKey {
    /// Key an authenticated caller by user id.
    pub fn user(user_id: &str) -> Self {
        Self(format!("user:{}", user_id))
    }

    /// Key an anonymous caller by a truncated hash of its origin.
    ///
    /// Raw addresses and user agents are never stored.
    pub fn origin(address: &str, user_agent: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(address.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(user_agent.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(ORIGIN_HASH_LEN);
        Self(format!("ip:{}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity attached to a request by the authentication layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ClientIdentity {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
        }
    }
}

/// What the admission layer needs to know about an inbound request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub path: String,
    #[serde(default)]
    pub identity: Option<ClientIdentity>,
    #[serde(default)]
    pub remote_addr: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl RequestMetadata {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_origin(mut self, remote_addr: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Roles of the caller, empty when anonymous.
    pub fn roles(&self) -> &[String] {
        self.identity
            .as_ref()
            .map(|identity| identity.roles.as_slice())
            .unwrap_or(&[])
    }
}

/// Derive the client key for a request.
///
/// An authenticated identity wins so rotating addresses does not reset quota.
/// An identity with an empty user id is treated as anonymous.
pub fn identify(request: &RequestMetadata) -> ClientKey {
    match &request.identity {
        Some(identity) if !identity.user_id.is_empty() => ClientKey::user(&identity.user_id),
        _ => ClientKey::origin(
            request.remote_addr.as_deref().unwrap_or("unknown"),
            request.user_agent.as_deref().unwrap_or(""),
        ),
    }
}
