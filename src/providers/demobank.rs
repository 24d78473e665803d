//! Demobank reference provider.
//!
//! Drives a token-authenticated HTTP JSON session against a Demobank-style
//! internet banking API. This is the reference implementation of the
//! `BankDataProvider` lifecycle: real institutions substitute their own
//! authentication ceremony and scraping behind the same four calls.
//!
//! Session shape:
//! - `POST   {base}/session`                      → `{ token }`
//! - `GET    {base}/accounts`                     → account list + balances
//! - `GET    {base}/accounts/{number}/statements` → statement enumeration
//! - `DELETE {base}/session`                      → invalidates the token

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::BankDataProvider;
use crate::secrets::SecretContext;
use crate::types::{AccountBalance, ExecutionContext, Result, TallyError};

const PROVIDER_NAME: &str = "demobank";
const INSTITUTION: &str = "Demobank";

/// Per-request timeout; the orchestrator applies its own per-step deadline
/// on top of this.
const HTTP_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// API response types (Demobank JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<ApiAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAccount {
    account_name: String,
    account_number: String,
    current_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct StatementsResponse {
    #[serde(default)]
    statements: Vec<ApiStatement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiStatement {
    id: String,
    period_end: String,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Demobank session provider. One instance per relationship per run; the
/// HTTP client and bearer token are the session resources it owns.
pub struct DemobankProvider {
    ctx: ExecutionContext,
    http: Client,
    base_url: String,
    /// Present only between a successful login and logout.
    token: Option<String>,
}

impl DemobankProvider {
    pub fn new(ctx: &ExecutionContext, base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| TallyError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            ctx: *ctx,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Construct from relationship options. Requires `base_url`.
    pub fn from_options(ctx: &ExecutionContext, options: &toml::Table) -> Result<Self> {
        let base_url = options
            .get("base_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TallyError::Config(format!(
                    "{PROVIDER_NAME}: missing required option 'base_url'"
                ))
            })?;
        Self::new(ctx, base_url)
    }

    fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or(TallyError::NotAuthenticated)
    }

    /// Stage checkpoint logging, enabled in debug runs only.
    fn debug_stage(&self, stage: &str, position: u32) {
        if self.ctx.debug {
            debug!(provider = PROVIDER_NAME, stage, position, "checkpoint");
        }
    }

    fn login_error(message: impl Into<String>) -> TallyError {
        TallyError::Login {
            provider: PROVIDER_NAME.to_string(),
            message: message.into(),
        }
    }

    fn provider_error(message: impl Into<String>) -> TallyError {
        TallyError::Provider {
            provider: PROVIDER_NAME.to_string(),
            message: message.into(),
        }
    }

    async fn fetch_statements_for(&self, account_number: &str) -> Result<usize> {
        let token = self.token()?;
        let response = self
            .http
            .get(format!("{}/accounts/{}/statements", self.base_url, account_number))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("statement request failed: {e}")))?;

        if !response.status().is_success() {
            warn!(
                provider = PROVIDER_NAME,
                account = account_number,
                status = %response.status(),
                "Statement enumeration unavailable for account"
            );
            return Ok(0);
        }

        let statements: StatementsResponse = response
            .json()
            .await
            .map_err(|e| Self::provider_error(format!("statement response malformed: {e}")))?;

        for statement in &statements.statements {
            let filename = format!(
                "{} {} {} Statement {}.pdf",
                statement.period_end, INSTITUTION, account_number, statement.id
            );
            info!(provider = PROVIDER_NAME, %filename, "Found statement");
        }

        Ok(statements.statements.len())
    }
}

#[async_trait]
impl BankDataProvider for DemobankProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn login(&mut self, secrets: &SecretContext<'_>) -> Result<()> {
        self.debug_stage("login", 0);

        let username = secrets.get("username").await?;
        let password = secrets.get("password").await?;
        self.debug_stage("login", 1);

        let response = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(&serde_json::json!({
                "username": username.expose_secret(),
                "password": password.expose_secret(),
            }))
            .send()
            .await
            .map_err(|e| Self::login_error(format!("session request failed: {e}")))?;
        self.debug_stage("login", 2);

        if !response.status().is_success() {
            // No token was issued, so there is no session to clean up.
            return Err(Self::login_error(format!(
                "institution rejected login (status {})",
                response.status()
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| Self::login_error(format!("session response malformed: {e}")))?;

        self.token = Some(session.token);
        self.debug_stage("login", 3);
        Ok(())
    }

    async fn get_balances(&mut self) -> Result<Vec<AccountBalance>> {
        let token = self.token()?;
        self.debug_stage("get_balances", 0);

        let response = self
            .http
            .get(format!("{}/accounts", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("accounts request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TallyError::NotAuthenticated);
        }
        if !response.status().is_success() {
            return Err(Self::provider_error(format!(
                "accounts request returned status {}",
                response.status()
            )));
        }
        self.debug_stage("get_balances", 1);

        let accounts: AccountsResponse = response
            .json()
            .await
            .map_err(|e| Self::provider_error(format!("accounts response malformed: {e}")))?;

        let balances = accounts
            .accounts
            .into_iter()
            .map(|account| AccountBalance {
                institution: INSTITUTION.to_string(),
                account_name: account.account_name,
                account_number: account.account_number,
                balance: account.current_balance,
            })
            .collect::<Vec<_>>();
        self.debug_stage("get_balances", 2);

        Ok(balances)
    }

    fn supports_documents(&self) -> bool {
        true
    }

    async fn get_documents(&mut self) -> Result<()> {
        self.token()?;
        self.debug_stage("get_documents", 0);

        // Re-list accounts so enumeration covers accounts discovered after
        // the balance fetch.
        let accounts = self.get_balances().await?;
        self.debug_stage("get_documents", 1);

        let mut total = 0;
        for account in &accounts {
            total += self.fetch_statements_for(&account.account_number).await?;
        }

        info!(
            provider = PROVIDER_NAME,
            accounts = accounts.len(),
            statements = total,
            "Statement enumeration complete"
        );
        self.debug_stage("get_documents", 2);
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        // Idempotent: without a token there is no session to tear down.
        let Some(token) = self.token.take() else {
            self.debug_stage("logout", 0);
            return Ok(());
        };

        let response = self
            .http
            .delete(format!("{}/session", self.base_url))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| TallyError::Logout {
                provider: PROVIDER_NAME.to_string(),
                message: format!("session teardown failed: {e}"),
            })?;
        self.debug_stage("logout", 1);

        if !response.status().is_success() {
            // The token is already dropped locally; the server side will
            // expire it. Not worth failing the relationship over.
            warn!(
                provider = PROVIDER_NAME,
                status = %response.status(),
                "Logout returned non-success status"
            );
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> DemobankProvider {
        let ctx = ExecutionContext::default();
        DemobankProvider::new(&ctx, "https://bank.example.com/api/").unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p = provider();
        assert_eq!(p.base_url, "https://bank.example.com/api");
    }

    #[tokio::test]
    async fn test_balances_require_login() {
        let mut p = provider();
        let err = p.get_balances().await.unwrap_err();
        assert!(matches!(err, TallyError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_documents_require_login() {
        let mut p = provider();
        let err = p.get_documents().await.unwrap_err();
        assert!(matches!(err, TallyError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_logout_without_login_is_noop() {
        let mut p = provider();
        assert!(p.logout().await.is_ok());
        // And stays safe on repeat calls.
        assert!(p.logout().await.is_ok());
    }

    #[test]
    fn test_from_options_missing_base_url() {
        let ctx = ExecutionContext::default();
        let err = DemobankProvider::from_options(&ctx, &toml::Table::new()).err().unwrap();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_account_json_shape() {
        let json = r#"{
            "accounts": [
                { "accountName": "Everyday", "accountNumber": "123-456", "currentBalance": 1024.55 },
                { "accountName": "Savings", "accountNumber": "789-012", "currentBalance": 15000.00 }
            ]
        }"#;
        let parsed: AccountsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.accounts.len(), 2);
        assert_eq!(parsed.accounts[0].account_name, "Everyday");
        assert_eq!(parsed.accounts[1].account_number, "789-012");
    }
}
