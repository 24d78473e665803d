//! Credential resolution.
//!
//! Secrets are addressed by reference, `"<relationship-name>:<field>"`, and
//! resolved only while a login is in progress. Resolved values travel as
//! `secrecy::SecretString` so they are redacted from `Debug` output and are
//! zeroized on drop; nothing in this crate logs, serializes, or retains them
//! past the login call that asked for them.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::types::{Result, TallyError};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Backing store for secret values. Vault, keychain, encrypted file, or
/// environment variables; substitutable.
///
/// Each call is independent and idempotent: repeated resolution of the same
/// reference returns the same value for the duration of a run. Callers may
/// invoke it concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn retrieve_secret(&self, reference: &str) -> Result<SecretString>;
}

/// Environment-variable-backed secret store.
///
/// Reference `"everyday:password"` resolves from `TALLY_SECRET_EVERYDAY_PASSWORD`.
/// Pairs with `dotenv` loading at startup.
pub struct EnvSecretStore;

impl EnvSecretStore {
    /// Env var name for a reference: the reference uppercased with every
    /// non-alphanumeric character mapped to `_`, under a fixed prefix.
    fn env_name(reference: &str) -> String {
        let suffix: String = reference
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("TALLY_SECRET_{suffix}")
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn retrieve_secret(&self, reference: &str) -> Result<SecretString> {
        let var = Self::env_name(reference);
        match std::env::var(&var) {
            Ok(value) => Ok(SecretString::new(value)),
            Err(_) => Err(TallyError::SecretNotFound(reference.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-relationship context
// ---------------------------------------------------------------------------

/// Secret-resolution context handed to a provider's `login`.
///
/// Scopes every key to one relationship: a provider asks for `"password"`,
/// the context resolves `"<relationship-name>:password"`. The provider never
/// sees or chooses the relationship prefix.
pub struct SecretContext<'a> {
    relationship: &'a str,
    store: &'a dyn SecretStore,
}

impl<'a> SecretContext<'a> {
    pub fn new(relationship: &'a str, store: &'a dyn SecretStore) -> Self {
        Self {
            relationship,
            store,
        }
    }

    /// Resolve one credential field for this relationship.
    pub async fn get(&self, key: &str) -> Result<SecretString> {
        let reference = format!("{}:{}", self.relationship, key);
        self.store.retrieve_secret(&reference).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
