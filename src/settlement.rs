// ============================================================================
// Settlement - Paying Out a Resolved Game
// ============================================================================
//
// The resolver only names a winning pick. Settlement turns that into money:
//
//   1. The outcome must be a string that is a key of the pick table
//   2. Every wager on the winning pick is credited back its stake through
//      the funds-transfer primitive, in table order
//   3. The game is cleared from the active-game registry
//
// A failed transfer stops settlement and leaves the game registered so the
// caller can retry. No fees are taken.
//
// ============================================================================

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

use crate::resolution::{ResolutionFunctionRunner, ResolveError, Value};
use crate::governance::CheckerTable;
use crate::wagers::PickTable;

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Funds-transfer primitive keyed by player/token/amount
pub trait FundsTransfer {
    fn transfer(&mut self, player: &str, token_address: &str, amount: u64) -> Result<(), String>;
}

/// Simple balance book implementing `FundsTransfer`
#[derive(Debug, Clone, Default)]
pub struct InMemoryWallet {
    balances: HashMap<(String, String), u64>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, player: &str, token_address: &str) -> u64 {
        self.balances
            .get(&(player.to_lowercase(), token_address.to_lowercase()))
            .copied()
            .unwrap_or(0)
    }
}

impl FundsTransfer for InMemoryWallet {
    fn transfer(&mut self, player: &str, token_address: &str, amount: u64) -> Result<(), String> {
        let entry = self
            .balances
            .entry((player.to_lowercase(), token_address.to_lowercase()))
            .or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| format!("balance overflow for {}", player))?;
        Ok(())
    }
}

/// Explicit registry of games awaiting resolution
#[derive(Debug, Clone, Default)]
pub struct ActiveGames {
    games: HashSet<String>,
}

impl ActiveGames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the game was already registered
    pub fn register(&mut self, game_id: &str) -> bool {
        self.games.insert(game_id.to_string())
    }

    pub fn is_active(&self, game_id: &str) -> bool {
        self.games.contains(game_id)
    }

    pub fn remove(&mut self, game_id: &str) -> bool {
        self.games.remove(game_id)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementError {
    GameNotActive(String),
    NonStringOutcome(String),
    UnknownPick(String),
    AmountOverflow(String),
    TransferFailed { player: String, reason: String },
    Resolution(ResolveError),
}

impl std::fmt::Display for SettlementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementError::GameNotActive(id) => write!(f, "Game {} is not active", id),
            SettlementError::NonStringOutcome(kind) => {
                write!(f, "Outcome must be a pick label, got {}", kind)
            }
            SettlementError::UnknownPick(label) => write!(f, "Outcome '{}' is not a pick of this game", label),
            SettlementError::AmountOverflow(label) => {
                write!(f, "Total staked on '{}' does not fit in 64 bits", label)
            }
            SettlementError::TransferFailed { player, reason } => {
                write!(f, "Transfer to {} failed: {}", player, reason)
            }
            SettlementError::Resolution(e) => write!(f, "Resolution failed: {}", e),
        }
    }
}

impl std::error::Error for SettlementError {}

impl From<ResolveError> for SettlementError {
    fn from(e: ResolveError) -> Self {
        SettlementError::Resolution(e)
    }
}

// ============================================================================
// RECEIPTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Payout {
    pub payout_id: String,
    pub player: String,
    pub token_address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt {
    pub game_id: String,
    pub winning_pick: String,
    pub payouts: Vec<Payout>,
    pub total_paid: u64,
    pub settled_at: u64,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// SETTLEMENT
// ============================================================================

/// Pays out resolved games. Stateless; the registry and wallet are passed in.
pub struct Settlement;

impl Settlement {
    /// Credit the winners of `game_id` and clear it from the registry
    pub fn settle<W: FundsTransfer>(
        game_id: &str,
        picks: &PickTable,
        outcome: &Value,
        wallet: &mut W,
        games: &mut ActiveGames,
    ) -> Result<SettlementReceipt, SettlementError> {
        if !games.is_active(game_id) {
            return Err(SettlementError::GameNotActive(game_id.to_string()));
        }

        let winning_pick = outcome
            .as_str()
            .ok_or_else(|| SettlementError::NonStringOutcome(outcome.type_of().to_string()))?;
        let wagers = picks
            .get(winning_pick)
            .ok_or_else(|| SettlementError::UnknownPick(winning_pick.to_string()))?;
        // Checked before any money moves
        let total_paid = picks
            .total_staked(winning_pick)
            .ok_or_else(|| SettlementError::AmountOverflow(winning_pick.to_string()))?;

        let mut payouts = Vec::with_capacity(wagers.len());
        for wager in wagers {
            if let Err(reason) = wallet.transfer(&wager.player, &wager.token_address, wager.amount) {
                warn!(game_id, player = %wager.player, %reason, "payout transfer failed");
                return Err(SettlementError::TransferFailed { player: wager.player.clone(), reason });
            }
            payouts.push(Payout {
                payout_id: format!("payout_{}", &Uuid::new_v4().simple().to_string()[..12]),
                player: wager.player.clone(),
                token_address: wager.token_address.clone(),
                amount: wager.amount,
            });
        }

        games.remove(game_id);
        info!(game_id, winning_pick, winners = payouts.len(), total_paid, "game settled");

        Ok(SettlementReceipt {
            game_id: game_id.to_string(),
            winning_pick: winning_pick.to_string(),
            payouts,
            total_paid,
            settled_at: now(),
        })
    }

    /// Run the resolution logic, then settle on its outcome
    #[allow(clippy::too_many_arguments)]
    pub async fn resolve_and_settle<W: FundsTransfer>(
        runner: &ResolutionFunctionRunner,
        game_id: &str,
        picks: &PickTable,
        data: &str,
        signature: Option<&str>,
        checkers: Option<&CheckerTable>,
        wallet: &mut W,
        games: &mut ActiveGames,
    ) -> Result<SettlementReceipt, SettlementError> {
        if !games.is_active(game_id) {
            return Err(SettlementError::GameNotActive(game_id.to_string()));
        }
        let outcome = runner.run(picks, data, signature, checkers).await?;
        Self::settle(game_id, picks, &outcome, wallet, games)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wagers::Wager;

    const TOKEN: &str = "0x00000000000000000000000000000000000000aa";

    fn picks() -> PickTable {
        let mut picks = PickTable::new();
        picks.place(Wager::new("home", "0xA1", TOKEN, 100));
        picks.place(Wager::new("away", "0xB2", TOKEN, 50));
        picks.place(Wager::new("home", "0xC3", TOKEN, 25));
        picks
    }

    struct FailingWallet;

    impl FundsTransfer for FailingWallet {
        fn transfer(&mut self, _: &str, _: &str, _: u64) -> Result<(), String> {
            Err("wallet offline".into())
        }
    }

    #[test]
    fn test_settle_pays_winning_pick() {
        let mut wallet = InMemoryWallet::new();
        let mut games = ActiveGames::new();
        games.register("game_1");

        let receipt = Settlement::settle("game_1", &picks(), &Value::str("home"), &mut wallet, &mut games).unwrap();

        assert_eq!(receipt.winning_pick, "home");
        assert_eq!(receipt.payouts.len(), 2);
        assert_eq!(receipt.total_paid, 125);
        assert_eq!(receipt.payouts[0].player, "0xA1");
        assert!(receipt.payouts[0].payout_id.starts_with("payout_"));
        assert_eq!(wallet.balance("0xa1", TOKEN), 100);
        assert_eq!(wallet.balance("0xC3", TOKEN), 25);
        assert_eq!(wallet.balance("0xB2", TOKEN), 0);
        assert!(!games.is_active("game_1"));
    }

    #[test]
    fn test_settle_rejects_unknown_and_non_string_outcomes() {
        let mut wallet = InMemoryWallet::new();
        let mut games = ActiveGames::new();
        games.register("game_1");

        assert_eq!(
            Settlement::settle("game_1", &picks(), &Value::str("draw"), &mut wallet, &mut games).unwrap_err(),
            SettlementError::UnknownPick("draw".into())
        );
        assert_eq!(
            Settlement::settle("game_1", &picks(), &Value::Undefined, &mut wallet, &mut games).unwrap_err(),
            SettlementError::NonStringOutcome("undefined".into())
        );
        assert!(games.is_active("game_1"));
    }

    #[test]
    fn test_failed_transfer_keeps_game_active() {
        let mut games = ActiveGames::new();
        games.register("game_1");

        let err = Settlement::settle("game_1", &picks(), &Value::str("away"), &mut FailingWallet, &mut games).unwrap_err();
        assert!(matches!(err, SettlementError::TransferFailed { .. }));
        assert!(games.is_active("game_1"));
    }

    #[test]
    fn test_overflowing_total_is_rejected_before_any_transfer() {
        let mut table = PickTable::new();
        table.place(Wager::new("home", "0xA1", TOKEN, u64::MAX));
        table.place(Wager::new("home", "0xB2", TOKEN, 1));
        let mut wallet = InMemoryWallet::new();
        let mut games = ActiveGames::new();
        games.register("game_1");

        let err = Settlement::settle("game_1", &table, &Value::str("home"), &mut wallet, &mut games).unwrap_err();

        assert_eq!(err, SettlementError::AmountOverflow("home".into()));
        assert_eq!(wallet.balance("0xA1", TOKEN), 0);
        assert!(games.is_active("game_1"));
    }

    #[test]
    fn test_max_single_stake_settles() {
        let mut table = PickTable::new();
        table.place(Wager::new("home", "0xA1", TOKEN, u64::MAX));
        let mut wallet = InMemoryWallet::new();
        let mut games = ActiveGames::new();
        games.register("game_1");

        let receipt = Settlement::settle("game_1", &table, &Value::str("home"), &mut wallet, &mut games).unwrap();
        assert_eq!(receipt.total_paid, u64::MAX);
    }

    #[test]
    fn test_inactive_game_is_rejected() {
        let mut wallet = InMemoryWallet::new();
        let mut games = ActiveGames::new();
        assert_eq!(
            Settlement::settle("ghost", &picks(), &Value::str("home"), &mut wallet, &mut games).unwrap_err(),
            SettlementError::GameNotActive("ghost".into())
        );
    }

    #[test]
    fn test_winning_pick_without_wagers_settles_empty() {
        let mut table = picks();
        table.add_pick("draw");
        let mut wallet = InMemoryWallet::new();
        let mut games = ActiveGames::new();
        games.register("g");

        let receipt = Settlement::settle("g", &table, &Value::str("draw"), &mut wallet, &mut games).unwrap();
        assert!(receipt.payouts.is_empty());
        assert_eq!(receipt.total_paid, 0);
        assert!(games.is_empty());
    }
}
