// ============================================================================
// Request Files
// ============================================================================
//
// The `resolve` command reads a JSON request, runs its logic and, when a
// game id is supplied, settles the winning pick against an in-memory wallet.
//
// ============================================================================

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::config::EngineConfig;
use crate::resolution::ResolutionFunctionRunner;
use crate::settlement::{ActiveGames, InMemoryWallet, Settlement};
use crate::wagers::PickTable;

pub type CliError = Box<dyn std::error::Error + Send + Sync>;

/// Request file accepted by `resolve`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub logic: String,
    #[serde(default)]
    pub picks: PickTable,
    #[serde(default)]
    pub data: String,
    pub signature: Option<String>,
    /// When present the outcome is settled against an in-memory wallet
    pub game_id: Option<String>,
}

pub async fn resolve_file(config: &EngineConfig, path: impl AsRef<Path>) -> Result<serde_json::Value, CliError> {
    let raw = std::fs::read_to_string(path)?;
    resolve_request(config, &raw).await
}

/// Outcome as JSON, or the settlement receipt when the request names a game
pub async fn resolve_request(config: &EngineConfig, raw: &str) -> Result<serde_json::Value, CliError> {
    let request: ResolveRequest = serde_json::from_str(raw)?;

    info!(
        members = config.governance_members.len(),
        checker = ?config.default_checker,
        picks = request.picks.len(),
        "resolving request"
    );

    let runner = ResolutionFunctionRunner::new(&request.logic, config.default_checker())?;
    let signature = request.signature.as_deref();

    match request.game_id {
        Some(game_id) => {
            let mut games = ActiveGames::new();
            games.register(&game_id);
            let mut wallet = InMemoryWallet::new();
            let receipt = Settlement::resolve_and_settle(
                &runner,
                &game_id,
                &request.picks,
                &request.data,
                signature,
                None,
                &mut wallet,
                &mut games,
            )
            .await?;
            Ok(serde_json::to_value(&receipt)?)
        }
        None => Ok(runner.run(&request.picks, &request.data, signature, None).await?.to_json()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultCheckerKind;

    const REQUEST: &str = r#"{
        "logic": "async (picks, data, signature, checkers) => { if (!(await checkers.dao.verify(crypto.hashMessage(data), signature))) { throw new Error('Failed to verify dao signature'); } return Object.keys(picks)[1]; }",
        "picks": {
            "home": [{ "player": "0x1111111111111111111111111111111111111111", "tokenAddress": "0x00000000000000000000000000000000000000bb", "amount": 40 }],
            "away": [
                { "player": "0x2222222222222222222222222222222222222222", "tokenAddress": "0x00000000000000000000000000000000000000bb", "amount": 25 },
                { "player": "0x3333333333333333333333333333333333333333", "tokenAddress": "0x00000000000000000000000000000000000000bb", "amount": 5 }
            ]
        },
        "data": "final:1-2",
        "signature": "0x<SIG>"
    }"#;

    fn config(kind: DefaultCheckerKind) -> EngineConfig {
        EngineConfig { default_checker: kind, ..EngineConfig::default() }
    }

    fn request_with_signature() -> String {
        REQUEST.replace("0x<SIG>", &format!("0x{}", "11".repeat(65)))
    }

    #[tokio::test]
    async fn test_request_file_resolves_outcome() {
        let path = std::env::temp_dir().join(format!("resolve_request_{}.json", uuid::Uuid::new_v4().simple()));
        std::fs::write(&path, request_with_signature()).unwrap();

        let outcome = resolve_file(&config(DefaultCheckerKind::StaticAllow), &path).await;
        std::fs::remove_file(&path).ok();

        assert_eq!(outcome.unwrap(), serde_json::json!("away"));
    }

    #[tokio::test]
    async fn test_request_with_game_id_returns_receipt() {
        let mut request: serde_json::Value = serde_json::from_str(&request_with_signature()).unwrap();
        request["gameId"] = serde_json::json!("game_7");

        let receipt = resolve_request(&config(DefaultCheckerKind::StaticAllow), &request.to_string())
            .await
            .unwrap();

        assert_eq!(receipt["game_id"], "game_7");
        assert_eq!(receipt["winning_pick"], "away");
        assert_eq!(receipt["total_paid"], 30);
        assert_eq!(receipt["payouts"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_rejected_attestation_surfaces_logic_message() {
        let err = resolve_request(&config(DefaultCheckerKind::StaticDeny), &request_with_signature())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to verify dao signature");
    }

    #[tokio::test]
    async fn test_malformed_request_is_an_error() {
        let config = config(DefaultCheckerKind::StaticAllow);
        assert!(resolve_request(&config, "{\"picks\": {}}").await.is_err());
        assert!(resolve_file(&config, "/nonexistent/request.json").await.is_err());
    }
}
