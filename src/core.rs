//! Orchestration core.
//!
//! Loads the configuration, resolves a provider per relationship, drives
//! each one through login → balances → documents → logout, and persists
//! balances write-through. Failures stay scoped to their relationship: one
//! institution misbehaving never stops the rest of the run. The data store
//! is opened once before the relationship loop and closed once after, on
//! every exit path.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Relationship};
use crate::providers::{BankDataProvider, ProviderRegistry};
use crate::secrets::{SecretContext, SecretStore};
use crate::store::DataStore;
use crate::types::{
    AccountBalance, ExecutionContext, FetchSummary, Outcome, RelationshipReport, Result, Stage,
    TallyError,
};

// ---------------------------------------------------------------------------
// Deadline wrapper
// ---------------------------------------------------------------------------

/// Run one provider lifecycle step under a deadline so a hung session
/// cannot stall the whole run.
async fn with_deadline<T>(
    limit: Duration,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, step).await {
        Ok(result) => result,
        Err(_) => Err(TallyError::Timeout(limit)),
    }
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// The run orchestrator. Owns the configuration path, the provider
/// registry, the data store, and the secret store; providers own their
/// sessions themselves.
pub struct Core {
    config_path: PathBuf,
    registry: ProviderRegistry,
    store: Box<dyn DataStore>,
    secrets: Box<dyn SecretStore>,
}

impl Core {
    pub fn new(
        config_path: impl Into<PathBuf>,
        registry: ProviderRegistry,
        store: Box<dyn DataStore>,
        secrets: Box<dyn SecretStore>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            registry,
            store,
            secrets,
        }
    }

    /// Prepare the data store (creates the database file on first run).
    /// Close is attempted even when open fails.
    pub async fn init(&mut self) -> Result<()> {
        let opened = self.store.open().await;
        let closed = self.store.close().await;
        opened?;
        closed
    }

    /// Load and validate the configuration, returning `(name, provider)`
    /// pairs. Never returns credentials or provider options: the original
    /// motivation for this command was a config dump that could leak
    /// secrets, and this surface is deliberately too narrow to.
    pub fn validate(&self) -> Result<Vec<(String, String)>> {
        let config = Config::load(&self.config_path)?;

        for relationship in &config.relationships {
            if !self.registry.contains(&relationship.provider) {
                warn!(
                    relationship = relationship.effective_name(),
                    provider = %relationship.provider,
                    "Unknown provider id; this relationship will fail at fetch time"
                );
            }
        }

        Ok(config
            .relationships
            .iter()
            .map(|r| (r.effective_name().to_string(), r.provider.clone()))
            .collect())
    }

    /// Run a full fetch: every configured relationship, sequentially.
    ///
    /// Configuration errors abort before any provider runs or the store
    /// opens. Store errors are run-fatal; everything else is scoped to its
    /// relationship. The store sees exactly one `open` and one `close` per
    /// run, the `close` on every exit path.
    pub async fn fetch(&mut self, ctx: &ExecutionContext) -> Result<FetchSummary> {
        let config = Config::load(&self.config_path)?;

        let run_id = uuid::Uuid::new_v4();
        info!(
            %run_id,
            relationships = config.relationships.len(),
            "Relationships to fetch from"
        );

        self.store.open().await?;
        let result = self.run_relationships(ctx, &config, run_id).await;
        let closed = self.store.close().await;

        let summary = result?;
        closed?;

        info!(%run_id, %summary, "Fetch complete");
        Ok(summary)
    }

    async fn run_relationships(
        &mut self,
        ctx: &ExecutionContext,
        config: &Config,
        run_id: uuid::Uuid,
    ) -> Result<FetchSummary> {
        let step_timeout = config.step_timeout();
        let mut summary = FetchSummary {
            run_id,
            started_at: Utc::now(),
            relationships: Vec::with_capacity(config.relationships.len()),
            balances: Vec::new(),
        };

        let registry = &self.registry;
        let secrets: &dyn SecretStore = &*self.secrets;
        let store: &mut dyn DataStore = &mut *self.store;

        for relationship in &config.relationships {
            let report = Self::fetch_relationship(
                registry,
                secrets,
                store,
                ctx,
                relationship,
                step_timeout,
                &mut summary.balances,
            )
            .await?;
            summary.relationships.push(report);
        }

        Ok(summary)
    }

    /// Drive one relationship through the state machine.
    ///
    /// Returns `Err` only for run-fatal store failures; every
    /// provider-side failure lands in the report's outcome instead.
    async fn fetch_relationship(
        registry: &ProviderRegistry,
        secrets: &dyn SecretStore,
        store: &mut dyn DataStore,
        ctx: &ExecutionContext,
        relationship: &Relationship,
        step_timeout: Duration,
        balances: &mut Vec<AccountBalance>,
    ) -> Result<RelationshipReport> {
        let name = relationship.effective_name().to_string();
        let report = |outcome: Outcome| RelationshipReport {
            name: relationship.effective_name().to_string(),
            provider: relationship.provider.clone(),
            outcome,
        };

        if !relationship.enabled {
            info!(relationship = %name, "Disabled in configuration; skipping");
            return Ok(report(Outcome::Skipped));
        }

        info!(
            relationship = %name,
            provider = %relationship.provider,
            "Fetching"
        );

        // 1. Resolve. Unknown ids fail this relationship, never the run.
        let mut provider =
            match registry.create(&relationship.provider, ctx, &relationship.options) {
                Ok(provider) => provider,
                Err(e) => {
                    error!(relationship = %name, stage = %Stage::Resolve, error = %e, "Provider resolution failed");
                    return Ok(report(Outcome::Failed {
                        stage: Stage::Resolve,
                        message: e.to_string(),
                    }));
                }
            };

        // 2–4. The session steps share one resource scope; their result is
        // held rather than returned so logout runs on every path.
        let secret_ctx = SecretContext::new(&name, secrets);
        let (outcome, fatal) = Self::run_session(
            provider.as_mut(),
            &secret_ctx,
            store,
            step_timeout,
            balances,
            &name,
        )
        .await;

        // 5. Logout, exactly once per resolved provider. Failure is
        // surfaced but never changes the already-determined outcome.
        if let Err(e) = with_deadline(step_timeout, provider.logout()).await {
            warn!(relationship = %name, stage = %Stage::Logout, error = %e, "Logout failed");
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(report(outcome))
    }

    /// Steps 2–4: login, balance fetch with write-through persistence, and
    /// conditional document enumeration.
    ///
    /// The second return value carries a run-fatal store error, kept
    /// separate so the caller can still log out before propagating it.
    async fn run_session(
        provider: &mut dyn BankDataProvider,
        secrets: &SecretContext<'_>,
        store: &mut dyn DataStore,
        step_timeout: Duration,
        balances: &mut Vec<AccountBalance>,
        name: &str,
    ) -> (Outcome, Option<TallyError>) {
        // 2. Login
        if let Err(e) = with_deadline(step_timeout, provider.login(secrets)).await {
            error!(
                relationship = %name,
                provider = provider.name(),
                stage = %Stage::Login,
                error = %e,
                "Login failed"
            );
            return (
                Outcome::Failed {
                    stage: Stage::Login,
                    message: e.to_string(),
                },
                None,
            );
        }

        // 3. Balances, written through individually so partial progress
        // survives a later crash.
        let fetched = match with_deadline(step_timeout, provider.get_balances()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(
                    relationship = %name,
                    provider = provider.name(),
                    stage = %Stage::Balances,
                    error = %e,
                    "Balance fetch failed"
                );
                return (
                    Outcome::Failed {
                        stage: Stage::Balances,
                        message: e.to_string(),
                    },
                    None,
                );
            }
        };
        info!(relationship = %name, accounts = fetched.len(), "Found accounts");

        let mut accounts = 0;
        for balance in fetched {
            if let Err(e) = store.add_balance(&balance).await {
                let message = e.to_string();
                return (
                    Outcome::Failed {
                        stage: Stage::Balances,
                        message,
                    },
                    Some(e),
                );
            }
            balances.push(balance);
            accounts += 1;
        }

        // 4. Documents, only where the capability exists. Absence is a
        // deliberate skip; failure is logged and never blocks logout.
        if provider.supports_documents() {
            if let Err(e) = with_deadline(step_timeout, provider.get_documents()).await {
                warn!(relationship = %name, stage = %Stage::Documents, error = %e, "Document enumeration failed");
            }
        } else {
            debug!(relationship = %name, "Provider has no document support; skipping");
        }

        (Outcome::Succeeded { accounts }, None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
