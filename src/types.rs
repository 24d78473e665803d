//! Core domain types shared across the crate.
//!
//! Balance records, the execution context threaded through every provider,
//! per-relationship outcomes, the run summary, and the error taxonomy.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

/// One account balance as reported by an institution.
///
/// Produced only by providers, consumed by the data store and the run's
/// aggregate result list. Carries no identity beyond its fields; this layer
/// does not deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Institution display name (e.g. "Demobank").
    pub institution: String,
    pub account_name: String,
    pub account_number: String,
    pub balance: Decimal,
}

impl fmt::Display for AccountBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} ({}): {}",
            self.institution, self.account_name, self.account_number, self.balance
        )
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Run-wide execution context, immutable after creation.
///
/// Passed by reference to every provider instance. `debug` controls
/// per-stage provider logging and, for session-driving providers, whether
/// the session runs in a visible/verbose mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionContext {
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Per-relationship outcomes
// ---------------------------------------------------------------------------

/// Lifecycle stage a relationship failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Login,
    Balances,
    Documents,
    Logout,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Resolve => "resolve",
            Stage::Login => "login",
            Stage::Balances => "balances",
            Stage::Documents => "documents",
            Stage::Logout => "logout",
        };
        f.write_str(s)
    }
}

/// Terminal state of one relationship within a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Login, balance fetch, and (where supported) document enumeration
    /// completed. `accounts` is the number of balances collected.
    Succeeded { accounts: usize },
    /// The relationship failed at `stage`; later relationships still run.
    Failed { stage: Stage, message: String },
    /// Relationship disabled in configuration; no provider was constructed.
    Skipped,
}

/// Report for one relationship's pass through the state machine.
#[derive(Debug, Clone)]
pub struct RelationshipReport {
    pub name: String,
    pub provider: String,
    pub outcome: Outcome,
}

impl RelationshipReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded { .. })
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Summary of a whole fetch run.
#[derive(Debug)]
pub struct FetchSummary {
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub relationships: Vec<RelationshipReport>,
    /// Aggregate balance list across all succeeding relationships. Ordering
    /// follows configuration order; no consumer depends on it.
    pub balances: Vec<AccountBalance>,
}

impl FetchSummary {
    pub fn succeeded(&self) -> usize {
        self.relationships.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.relationships
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.relationships
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Skipped))
            .count()
    }
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} balances written; relationships: {} ok, {} failed, {} skipped",
            self.balances.len(),
            self.succeeded(),
            self.failed(),
            self.skipped(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Domain errors.
///
/// `Config`, `DuplicateRelationships`, and `Store` are run-fatal; the rest
/// are relationship-scoped: logged, the relationship is marked failed, and
/// the run continues. Error messages must never contain secret values;
/// `SecretNotFound` carries the reference only.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Duplicate relationship names: {}. Relationship names default to the \
         provider id; give each relationship an explicit unique 'name' to \
         disambiguate.",
        .0.join(", ")
    )]
    DuplicateRelationships(Vec<String>),

    #[error("No provider registered under '{0}'")]
    ProviderNotFound(String),

    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("Login failed ({provider}): {message}")]
    Login { provider: String, message: String },

    #[error("Not authenticated: login has not completed for this session")]
    NotAuthenticated,

    #[error("Logout failed ({provider}): {message}")]
    Logout { provider: String, message: String },

    #[error("Secret not found for reference '{0}'")]
    SecretNotFound(String),

    #[error("Data store error: {0}")]
    Store(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, TallyError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance(n: &str) -> AccountBalance {
        AccountBalance {
            institution: "Demobank".into(),
            account_name: n.into(),
            account_number: "123-456".into(),
            balance: dec!(1024.55),
        }
    }

    #[test]
    fn test_balance_display() {
        let b = balance("Everyday");
        assert_eq!(b.to_string(), "Demobank / Everyday (123-456): 1024.55");
    }

    #[test]
    fn test_summary_counts() {
        let summary = FetchSummary {
            run_id: uuid::Uuid::new_v4(),
            started_at: Utc::now(),
            relationships: vec![
                RelationshipReport {
                    name: "a".into(),
                    provider: "x".into(),
                    outcome: Outcome::Succeeded { accounts: 2 },
                },
                RelationshipReport {
                    name: "b".into(),
                    provider: "y".into(),
                    outcome: Outcome::Failed {
                        stage: Stage::Login,
                        message: "bad credentials".into(),
                    },
                },
                RelationshipReport {
                    name: "c".into(),
                    provider: "z".into(),
                    outcome: Outcome::Skipped,
                },
            ],
            balances: vec![balance("One"), balance("Two")],
        };

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.skipped(), 1);
        assert!(summary.to_string().starts_with("2 balances written"));
    }

    #[test]
    fn test_duplicate_error_lists_all_names() {
        let err = TallyError::DuplicateRelationships(vec!["x".into(), "y".into()]);
        let msg = err.to_string();
        assert!(msg.contains("x, y"));
        assert!(msg.contains("explicit unique 'name'"));
    }

    #[test]
    fn test_secret_error_carries_reference_only() {
        let err = TallyError::SecretNotFound("everyday:password".into());
        assert_eq!(
            err.to_string(),
            "Secret not found for reference 'everyday:password'"
        );
    }
}
