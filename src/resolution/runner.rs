//! Resolution function runner
//!
//! Compiles a resolution logic description once and runs it per game with
//! fresh arguments: `(picks, data, signature, checkers)`.
//!
//! Flow:
//!   1. `new` parses the description (compilation failures surface here)
//!   2. `run` builds a fresh sandbox, snapshots the pick table and checkers
//!   3. the logic executes, suspending only while a checker verifies
//!   4. a returned pending verification is awaited before handing back
//!   5. thrown values become `ResolveError::Logic` with the message intact

use std::sync::Arc;

use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::ast::Function;
use super::error::ResolveError;
use super::interpreter::{settle, Fault, Limits, Machine};
use super::parser::parse_function;
use super::value::Value;
use crate::crypto;
use crate::governance::{Checker, CheckerTable, DEFAULT_CHECKER_NAME};
use crate::wagers::PickTable;

/// Compiled resolution logic plus the checker it falls back to
#[derive(Clone)]
pub struct ResolutionFunctionRunner {
    function: Arc<Function>,
    default_checker: Arc<dyn Checker>,
    source_hash: String,
    limits: Limits,
}

impl ResolutionFunctionRunner {
    pub fn new(source: &str, default_checker: Arc<dyn Checker>) -> Result<Self, ResolveError> {
        let source_hash = crypto::to_hex(&crypto::keccak256(source.as_bytes()));
        let function = parse_function(source).map_err(|e| {
            warn!(%source_hash, error = %e, "resolution logic failed to compile");
            e
        })?;

        debug!(
            %source_hash,
            is_async = function.is_async,
            params = function.params.len(),
            "compiled resolution logic"
        );

        Ok(Self {
            function: Arc::new(function),
            default_checker,
            source_hash,
            limits: Limits::default(),
        })
    }

    /// Override the per-run resource ceilings
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Keccak-256 of the logic source, for audit logs
    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    pub fn is_async(&self) -> bool {
        self.function.is_async
    }

    /// Checker table the logic sees: the supplied table, with the default
    /// checker filling the conventional slot when the caller left it empty.
    fn checker_table(&self, supplied: Option<&CheckerTable>) -> CheckerTable {
        let mut table = supplied.cloned().unwrap_or_default();
        table
            .entry(DEFAULT_CHECKER_NAME.to_string())
            .or_insert_with(|| Arc::clone(&self.default_checker));
        table
    }

    /// Run the logic against one game's picks and attestation.
    ///
    /// The returned value is not checked against the pick table; that is the
    /// settlement side's call.
    pub async fn run(
        &self,
        picks: &PickTable,
        data: &str,
        signature: Option<&str>,
        checkers: Option<&CheckerTable>,
    ) -> Result<Value, ResolveError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("resolution_run", %run_id, source = %self.source_hash);

        async move {
            let checkers = self.checker_table(checkers);
            let args = vec![
                Value::from_picks(picks),
                Value::str(data),
                signature.map(Value::str).unwrap_or(Value::Null),
                Value::from_checkers(&checkers),
            ];

            let mut machine = Machine::with_limits(self.limits);
            let outcome = match machine.call(&self.function, args).await {
                Ok(value) => settle(value).await,
                Err(fault) => Err(fault),
            };

            match outcome {
                Ok(value) => {
                    info!(outcome = %value, picks = picks.len(), "resolution logic completed");
                    Ok(value)
                }
                Err(fault) => {
                    let error = fault_to_error(fault);
                    warn!(error = %error, "resolution logic failed");
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// `run`, requiring the outcome to be a pick label string
    pub async fn run_to_pick(
        &self,
        picks: &PickTable,
        data: &str,
        signature: Option<&str>,
        checkers: Option<&CheckerTable>,
    ) -> Result<String, ResolveError> {
        match self.run(picks, data, signature, checkers).await? {
            Value::Str(label) => Ok(label),
            other => Err(ResolveError::NonStringOutcome(other.type_of().to_string())),
        }
    }
}

impl std::fmt::Debug for ResolutionFunctionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionFunctionRunner")
            .field("source_hash", &self.source_hash)
            .field("is_async", &self.function.is_async)
            .field("default_checker", &self.default_checker.kind())
            .field("limits", &self.limits)
            .finish()
    }
}

fn fault_to_error(fault: Fault) -> ResolveError {
    match fault {
        Fault::Checker(e) => ResolveError::Checker(e),
        Fault::Throw(value) => match value.get("message") {
            Some(message) => ResolveError::Logic {
                name: value.get("name").and_then(Value::as_str).map(str::to_string),
                message: message.to_display(),
            },
            None => ResolveError::Logic { name: None, message: value.to_display() },
        },
    }
}
