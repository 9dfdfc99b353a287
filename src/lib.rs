//! BlackBook Outcome Resolver
//! Governance-attested, sandboxed resolution of game outcomes

pub mod cli;
pub mod config;
pub mod crypto;
pub mod governance;
pub mod resolution;
pub mod settlement;
pub mod wagers;

pub use config::{ConfigError, DefaultCheckerKind, EngineConfig};
pub use crypto::{AttestationSigner, CryptoError};
pub use governance::{
    Checker, CheckerError, CheckerTable, Governance, SignatureAttestationChecker, StaticChecker,
    DEFAULT_CHECKER_NAME,
};
pub use resolution::{Limits, ResolutionFunctionRunner, ResolveError, Value};
pub use settlement::{
    ActiveGames, FundsTransfer, InMemoryWallet, Payout, Settlement, SettlementError, SettlementReceipt,
};
pub use wagers::{PickTable, Wager};
