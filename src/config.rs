// ============================================================================
// Engine Configuration
// ============================================================================
//
// Environment driven (with .env support via dotenv):
//
//   GOVERNANCE_MEMBERS        comma separated signer addresses
//   RESOLVER_DEFAULT_CHECKER  checker kind behind the "dao" slot
//   RESOLVER_LOG              tracing filter directive
//
// ============================================================================

use std::sync::Arc;

use tracing::warn;

use crate::governance::{Checker, Governance, SignatureAttestationChecker, StaticChecker};

pub const ENV_GOVERNANCE_MEMBERS: &str = "GOVERNANCE_MEMBERS";
pub const ENV_DEFAULT_CHECKER: &str = "RESOLVER_DEFAULT_CHECKER";
pub const ENV_LOG: &str = "RESOLVER_LOG";

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Which checker backs the default slot handed to resolution logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultCheckerKind {
    /// Recover the signer and test governance membership
    GovernanceSignature,
    /// Offline fixture: every well-formed attestation passes
    StaticAllow,
    /// Offline fixture: every well-formed attestation fails
    StaticDeny,
}

impl DefaultCheckerKind {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "governance-signature" => Ok(Self::GovernanceSignature),
            "static-allow" => Ok(Self::StaticAllow),
            "static-deny" => Ok(Self::StaticDeny),
            other => Err(ConfigError::UnknownChecker(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidMember(String),
    UnknownChecker(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidMember(addr) => {
                write!(f, "{} entry '{}' is not a 0x-prefixed 20-byte address", ENV_GOVERNANCE_MEMBERS, addr)
            }
            ConfigError::UnknownChecker(kind) => write!(
                f,
                "{} must be governance-signature, static-allow or static-deny (got '{}')",
                ENV_DEFAULT_CHECKER, kind
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub governance_members: Vec<String>,
    pub default_checker: DefaultCheckerKind,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            governance_members: Vec::new(),
            default_checker: DefaultCheckerKind::GovernanceSignature,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map here)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let governance_members = match lookup(ENV_GOVERNANCE_MEMBERS) {
            Some(raw) => parse_members(&raw)?,
            None => {
                warn!("{} not set; every attestation will be rejected", ENV_GOVERNANCE_MEMBERS);
                Vec::new()
            }
        };

        let default_checker = match lookup(ENV_DEFAULT_CHECKER) {
            Some(raw) => DefaultCheckerKind::parse(&raw)?,
            None => DefaultCheckerKind::GovernanceSignature,
        };

        let log_filter = lookup(ENV_LOG)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self { governance_members, default_checker, log_filter })
    }

    pub fn governance(&self) -> Governance {
        Governance::new(self.governance_members.iter().cloned())
    }

    pub fn default_checker(&self) -> Arc<dyn Checker> {
        match self.default_checker {
            DefaultCheckerKind::GovernanceSignature => {
                Arc::new(SignatureAttestationChecker::new(Arc::new(self.governance())))
            }
            DefaultCheckerKind::StaticAllow => Arc::new(StaticChecker { verdict: true }),
            DefaultCheckerKind::StaticDeny => Arc::new(StaticChecker { verdict: false }),
        }
    }
}

fn parse_members(raw: &str) -> Result<Vec<String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|addr| {
            let hex_part = addr
                .strip_prefix("0x")
                .or_else(|| addr.strip_prefix("0X"))
                .ok_or_else(|| ConfigError::InvalidMember(addr.to_string()))?;
            if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::InvalidMember(addr.to_string()));
            }
            Ok(addr.to_string())
        })
        .collect()
}
