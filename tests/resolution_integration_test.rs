//! End-to-end resolution tests
//!
//! Governance members are deterministic seed-derived keys, so signatures in
//! these tests are reproducible. The keys are fixtures only.

use std::sync::Arc;

use blackbook_resolver::crypto::{self, AttestationSigner};
use blackbook_resolver::{
    ActiveGames, Checker, CheckerTable, Governance, InMemoryWallet, PickTable,
    ResolutionFunctionRunner, ResolveError, Settlement, SettlementError,
    SignatureAttestationChecker, StaticChecker, Value, Wager,
};

// ============================================================================
// FIXTURES
// ============================================================================

const SEED: &[u8] = b"blackbook_resolver_fixture_v1";
const TOKEN: &str = "0x00000000000000000000000000000000000000bb";

const DAO_LOGIC: &str = r#"
async (picks, data, signature, checkers) => {
    const ok = await checkers.dao.verify(crypto.hashMessage(data), signature);
    if (!ok) {
        throw new Error("Failed to verify dao signature");
    }
    return Object.keys(picks)[0];
}
"#;

fn alice() -> AttestationSigner {
    AttestationSigner::from_seed(SEED, "alice").unwrap()
}

fn bob() -> AttestationSigner {
    AttestationSigner::from_seed(SEED, "bob").unwrap()
}

fn dao_checker() -> Arc<dyn Checker> {
    let governance = Governance::new([alice().address]);
    Arc::new(SignatureAttestationChecker::new(Arc::new(governance)))
}

fn game_picks() -> PickTable {
    let mut picks = PickTable::new();
    picks.place(Wager::new("test_pick", "0x1111111111111111111111111111111111111111", TOKEN, 40));
    picks.place(Wager::new("test_pick2", "0x2222222222222222222222222222222222222222", TOKEN, 60));
    picks.place(Wager::new("test_pick", "0x3333333333333333333333333333333333333333", TOKEN, 15));
    picks
}

// ============================================================================
// ATTESTED RESOLUTION
// ============================================================================

#[tokio::test]
async fn test_member_attestation_resolves_first_pick() {
    let data = "0x123456";
    let signature = alice().sign_message(data.as_bytes());

    let runner = ResolutionFunctionRunner::new(DAO_LOGIC, dao_checker()).unwrap();
    let outcome = runner.run(&game_picks(), data, Some(&signature), None).await.unwrap();

    assert_eq!(outcome, Value::str("test_pick"));
}

#[tokio::test]
async fn test_tampered_data_fails_verification() {
    let signature = alice().sign_message(b"0x123456");

    let runner = ResolutionFunctionRunner::new(DAO_LOGIC, dao_checker()).unwrap();
    let err = runner.run(&game_picks(), "0x123457", Some(&signature), None).await.unwrap_err();

    assert_eq!(err.to_string(), "Failed to verify dao signature");
}

#[tokio::test]
async fn test_non_member_attestation_is_rejected() {
    let data = "0x123456";
    let signature = bob().sign_message(data.as_bytes());

    let runner = ResolutionFunctionRunner::new(DAO_LOGIC, dao_checker()).unwrap();
    let err = runner.run(&game_picks(), data, Some(&signature), None).await.unwrap_err();

    assert!(matches!(err, ResolveError::Logic { .. }));
}

#[tokio::test]
async fn test_missing_signature_is_a_checker_error() {
    let runner = ResolutionFunctionRunner::new(DAO_LOGIC, dao_checker()).unwrap();
    let err = runner.run(&game_picks(), "0x123456", None, None).await.unwrap_err();

    assert!(matches!(err, ResolveError::Checker(_)));
}

#[tokio::test]
async fn test_data_driven_winner() {
    let logic = r#"
        async (picks, data, signature, checkers) => {
            if (!(await checkers.dao.verify(crypto.hashMessage(data), signature))) {
                throw new Error("Failed to verify dao signature");
            }
            const report = JSON.parse(data);
            return Object.keys(picks).includes(report.winner) ? report.winner : Object.keys(picks)[0];
        }
    "#;
    let data = r#"{"winner":"test_pick2","score":"2-1"}"#;
    let signature = alice().sign_message(data.as_bytes());
    let runner = ResolutionFunctionRunner::new(logic, dao_checker()).unwrap();
    let outcome = runner.run(&game_picks(), data, Some(&signature), None).await.unwrap();
    assert_eq!(outcome, Value::str("test_pick2"));
}

#[tokio::test]
async fn test_concurrent_runs_share_one_runner() {
    let runner = Arc::new(ResolutionFunctionRunner::new(DAO_LOGIC, dao_checker()).unwrap());
    let signer = alice();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let runner = Arc::clone(&runner);
            let data = format!("0x0{}", i);
            let signature = signer.sign_message(data.as_bytes());
            tokio::spawn(async move { runner.run(&game_picks(), &data, Some(&signature), None).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Value::str("test_pick"));
    }
}

// ============================================================================
// SANDBOX
// ============================================================================

#[tokio::test]
async fn test_host_globals_are_unreachable() {
    for source in ["() => require('fs')", "() => process.exit(1)", "async () => await fetch('http://x')"] {
        let runner = ResolutionFunctionRunner::new(source, dao_checker()).unwrap();
        let err = runner.run(&PickTable::new(), "", None, None).await.unwrap_err();
        match err {
            ResolveError::Logic { name, .. } => assert_eq!(name.as_deref(), Some("ReferenceError")),
            other => panic!("expected ReferenceError, got {:?}", other),
        }
    }
}

// ============================================================================
// SETTLEMENT
// ============================================================================

#[tokio::test]
async fn test_resolve_and_settle_pays_first_pick() {
    let data = "0xfeed";
    let signature = alice().sign_message(data.as_bytes());
    let runner = ResolutionFunctionRunner::new(DAO_LOGIC, dao_checker()).unwrap();

    let mut games = ActiveGames::new();
    games.register("game_42");
    let mut wallet = InMemoryWallet::new();

    let receipt = Settlement::resolve_and_settle(
        &runner,
        "game_42",
        &game_picks(),
        data,
        Some(&signature),
        None,
        &mut wallet,
        &mut games,
    )
    .await
    .unwrap();

    assert_eq!(receipt.winning_pick, "test_pick");
    assert_eq!(receipt.total_paid, 55);
    assert_eq!(wallet.balance("0x1111111111111111111111111111111111111111", TOKEN), 40);
    assert_eq!(wallet.balance("0x2222222222222222222222222222222222222222", TOKEN), 0);
    assert!(!games.is_active("game_42"));
}

#[tokio::test]
async fn test_failed_resolution_leaves_game_active() {
    let runner = ResolutionFunctionRunner::new(DAO_LOGIC, dao_checker()).unwrap();
    let signature = bob().sign_message(b"0xfeed");

    let mut games = ActiveGames::new();
    games.register("game_42");
    let mut wallet = InMemoryWallet::new();

    let err = Settlement::resolve_and_settle(
        &runner,
        "game_42",
        &game_picks(),
        "0xfeed",
        Some(&signature),
        None,
        &mut wallet,
        &mut games,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SettlementError::Resolution(_)));
    assert!(games.is_active("game_42"));
}

#[tokio::test]
async fn test_override_checker_table() {
    let mut checkers = CheckerTable::new();
    checkers.insert("dao".into(), Arc::new(StaticChecker { verdict: true }) as Arc<dyn Checker>);

    let runner = ResolutionFunctionRunner::new(DAO_LOGIC, dao_checker()).unwrap();
    let signature = bob().sign_message(b"0x01");
    let outcome = runner.run(&game_picks(), "0x01", Some(&signature), Some(&checkers)).await.unwrap();

    assert_eq!(outcome, Value::str("test_pick"));
}
