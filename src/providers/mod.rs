//! Institution providers.
//!
//! Defines the `BankDataProvider` trait, the uniform lifecycle every
//! institution integration implements, and the registry that resolves
//! provider ids from configuration to instances.
//!
//! A provider owns its session resources (HTTP client, auth token, browser
//! context) exclusively for the span of login through logout; the
//! orchestrator never reaches into them.

pub mod demobank;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::secrets::SecretContext;
use crate::types::{AccountBalance, ExecutionContext, Result, TallyError};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Lifecycle contract for one institution's automated session.
///
/// The login/balances/documents/logout split lets the orchestrator treat
/// every institution uniformly while each provider hides arbitrarily
/// different authentication ceremonies (multi-step forms, virtual keypads,
/// token exchanges) behind one `login` call.
///
/// Implementations must never place secret values in errors or logs.
#[async_trait]
pub trait BankDataProvider: Send {
    /// Provider id / institution name for logging and registry lookup.
    fn name(&self) -> &str;

    /// Establish an authenticated session.
    ///
    /// Credential fields are resolved through `secrets`, which scopes every
    /// key to the relationship being fetched. On failure the provider must
    /// leave no half-open session behind: either it releases whatever it
    /// opened before returning the error, or `logout` remains safe to call.
    async fn login(&mut self, secrets: &SecretContext<'_>) -> Result<()>;

    /// Fetch all account balances visible in the session.
    ///
    /// Requires a prior successful `login`; fails with `NotAuthenticated`
    /// otherwise. Returns a finite list; ordering is institution-defined
    /// and not stable across runs.
    async fn get_balances(&mut self) -> Result<Vec<AccountBalance>>;

    /// Whether this provider can enumerate statement documents.
    ///
    /// Checked once after construction; `get_documents` is only invoked
    /// when this returns true.
    fn supports_documents(&self) -> bool {
        false
    }

    /// Enumerate statement-style documents for each discovered account.
    ///
    /// Informational side effect only; a failure here never prevents logout.
    async fn get_documents(&mut self) -> Result<()> {
        Ok(())
    }

    /// Tear down the session and release every resource it held.
    ///
    /// Must be safe to call when `login` failed part-way or never ran, and
    /// must release resources on every path. Errors are reserved for
    /// conditions that cannot be safely ignored; the orchestrator logs them
    /// without changing the relationship's outcome.
    async fn logout(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Factory producing a provider instance for one relationship.
pub type ProviderFactory =
    Box<dyn Fn(&ExecutionContext, &toml::Table) -> Result<Box<dyn BankDataProvider>> + Send + Sync>;

/// Registry mapping provider ids to factories.
///
/// Populated at process start; no runtime code loading. Unknown ids fail
/// with `ProviderNotFound` and the failure stays scoped to the relationship
/// that referenced them.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all shipped providers registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("demobank", |ctx, options| {
            Ok(Box::new(demobank::DemobankProvider::from_options(ctx, options)?))
        });
        registry
    }

    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&ExecutionContext, &toml::Table) -> Result<Box<dyn BankDataProvider>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(id.to_string(), Box::new(factory));
    }

    /// Construct a provider instance for `id`.
    pub fn create(
        &self,
        id: &str,
        ctx: &ExecutionContext,
        options: &toml::Table,
    ) -> Result<Box<dyn BankDataProvider>> {
        match self.factories.get(id) {
            Some(factory) => factory(ctx, options),
            None => Err(TallyError::ProviderNotFound(id.to_string())),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_id() {
        let registry = ProviderRegistry::builtin();
        let ctx = ExecutionContext::default();
        let err = registry
            .create("atlantisbank", &ctx, &toml::Table::new())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "No provider registered under 'atlantisbank'");
    }

    #[test]
    fn test_builtin_contains_demobank() {
        let registry = ProviderRegistry::builtin();
        assert!(registry.contains("demobank"));
        assert!(!registry.contains("ing"));
    }

    #[test]
    fn test_create_demobank() {
        let registry = ProviderRegistry::builtin();
        let ctx = ExecutionContext::default();
        let mut options = toml::Table::new();
        options.insert(
            "base_url".into(),
            toml::Value::String("https://bank.example.com/api".into()),
        );
        let provider = registry.create("demobank", &ctx, &options).unwrap();
        assert_eq!(provider.name(), "demobank");
        assert!(provider.supports_documents());
    }

    #[test]
    fn test_create_demobank_requires_base_url() {
        let registry = ProviderRegistry::builtin();
        let ctx = ExecutionContext::default();
        let err = registry
            .create("demobank", &ctx, &toml::Table::new())
            .err()
            .unwrap();
        assert!(matches!(err, TallyError::Config(_)));
    }
}
