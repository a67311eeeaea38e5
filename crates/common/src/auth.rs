//! Request signing and session state
//!
//! Every API call carries `{ username, hash }` where
//! `hash = sha256(username + "_" + operation + "_" + sha256(password))`.
//! The password digest is computed once at login and is the only form of the
//! secret kept in memory. Tokens are bound to an operation name but carry no
//! nonce, so a captured token stays valid for that operation until the
//! password changes.

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::{Error, Result};

/// SHA-256 digest, rendered as lowercase hex on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Digest arbitrary bytes
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        Self(hasher.finalize().into())
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidInput(format!("bad digest: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput("digest must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Username plus password digest. The plaintext password is never stored.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password_digest: Digest,
}

impl Credential {
    /// Digest the password locally and build a credential
    pub fn from_password(username: &str, password: &str) -> Result<Self> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::InvalidInput(
                "Username and password are required".to_string(),
            ));
        }
        Ok(Self::from_digest(username, Digest::of(password)))
    }

    /// Build a credential from an already computed password digest
    pub fn from_digest(username: &str, password_digest: Digest) -> Self {
        Self {
            username: username.to_string(),
            password_digest,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password_digest", &"<redacted>")
            .finish()
    }
}

/// Auth envelope merged into every request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthPayload {
    pub username: String,
    pub hash: Digest,
}

/// Derive the per-operation token for a credential
pub fn sign(credential: &Credential, operation: &str) -> AuthPayload {
    let composed = format!(
        "{}_{}_{}",
        credential.username,
        operation,
        credential.password_digest.to_hex()
    );
    AuthPayload {
        username: credential.username.clone(),
        hash: Digest::of(composed),
    }
}

/// Holds at most one credential for the lifetime of a session.
///
/// Cloning shares the same slot. The credential can only leave the store
/// as a signed [`AuthPayload`].
#[derive(Clone, Default)]
pub struct SessionStore {
    credential: Arc<RwLock<Option<Credential>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored credential
    pub fn store(&self, credential: Credential) {
        debug!("Session opened for {}", credential.username);
        *self.credential.write() = Some(credential);
    }

    /// Forget the credential. Signing fails closed afterwards.
    pub fn clear(&self) {
        if self.credential.write().take().is_some() {
            debug!("Session cleared");
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.read().is_some()
    }

    pub fn username(&self) -> Option<String> {
        self.credential.read().as_ref().map(|c| c.username.clone())
    }

    /// Sign an operation with the stored credential
    pub fn sign(&self, operation: &str) -> Result<AuthPayload> {
        self.credential
            .read()
            .as_ref()
            .map(|c| sign(c, operation))
            .ok_or(Error::NotAuthenticated)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("username", &self.username())
            .finish()
    }
}
