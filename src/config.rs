//! Configuration loading from TOML.
//!
//! The configuration is a list of institution relationships plus a few
//! run-level knobs. Credentials never live here; providers resolve them at
//! login time through the secret store (see `secrets`). Loading is a pure
//! transform of the file's bytes: no provider runs, no secret is resolved.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{Result, TallyError};

/// Default per-step deadline for provider lifecycle calls.
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 180;

/// Default SQLite database path for the balance store.
const DEFAULT_STORE_PATH: &str = "tally.sqlite";

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// One configured institution/credential pairing to fetch from.
#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    /// Display name, unique within the configuration. Defaults to the
    /// provider id when omitted.
    #[serde(default)]
    pub name: Option<String>,
    /// Provider id used for registry lookup.
    pub provider: String,
    /// Disabled relationships are reported as skipped, never constructed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Provider-specific options, opaque to this layer.
    #[serde(default)]
    pub options: toml::Table,
}

fn default_enabled() -> bool {
    true
}

impl Relationship {
    /// The name this relationship goes by after defaulting.
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.provider)
    }
}

/// Top-level run configuration. Loaded once per run, immutable thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

fn default_step_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_store_path() -> String {
    DEFAULT_STORE_PATH.to_string()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// Fails with `TallyError::Config` when the file is unreadable or
    /// malformed, and with `TallyError::DuplicateRelationships` when two
    /// relationships share a name after defaulting. All duplicate names are
    /// reported together. A rejected configuration never reaches a provider.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            TallyError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&contents).map_err(|e| {
            TallyError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Uniqueness check over effective names. Two unnamed uses of the same
    /// provider collide on the provider id and are rejected like any other
    /// duplicate.
    fn validate(&self) -> Result<()> {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for relationship in &self.relationships {
            *seen.entry(relationship.effective_name()).or_insert(0) += 1;
        }

        let duplicates: Vec<String> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name.to_string())
            .collect();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(TallyError::DuplicateRelationships(duplicates))
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Starter configuration written by `tally init`.
    pub fn default_file() -> &'static str {
        r#"# tally configuration
#
# Each [[relationships]] entry is one institution to fetch balances from.
# Names must be unique; they default to the provider id when omitted, so
# two relationships on the same provider need explicit names.
#
# Credentials are never stored here. Providers request them at login time
# by reference "<relationship-name>:<field>", resolved from the secret
# store (environment variables: TALLY_SECRET_<NAME>_<FIELD>).

# step_timeout_secs = 180
# store_path = "tally.sqlite"

[[relationships]]
provider = "demobank"
# name = "everyday"
# enabled = true

[relationships.options]
base_url = "https://bank.example.com/api"
"#
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
