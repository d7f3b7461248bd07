//! End-to-end engine flow against the mock exchange backend.

use quorum::application::engine::Engine;
use quorum::config::{
    Config, HeliosEnvConfig, Mode, ObservabilityEnvConfig, OrchestratorEnvConfig,
    RestEnvConfig, RugShieldEnvConfig, SafetyEnvConfig, StopLossEnvConfig, TradingConfig,
};
use quorum::domain::decision::CategoryWeights;
use quorum::domain::helios::{DeploymentStatus, HeliosPhase, PhaseOutcome};
use rust_decimal_macros::dec;
use std::time::Duration;

fn test_config() -> Config {
    Config {
        mode: Mode::Mock,
        database_url: "sqlite::memory:".to_string(),
        trading: TradingConfig {
            enabled: false,
            pairs: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            cycle_interval_s: 60,
            cycle_jitter: false,
            trade_quantity: dec!(0.01),
        },
        safety: SafetyEnvConfig {
            rate_limit_per_minute: 1000,
            rate_limit_per_second: 1000,
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout_s: 60,
            call_timeout_s: 10,
            rate_limit_backoff_s: 5,
        },
        orchestrator: OrchestratorEnvConfig {
            decision_threshold: 0.15,
            dissent_gate: 0.4,
            category_weights: CategoryWeights::default(),
            bot_timeout_ms: 2_000,
        },
        rug_shield: RugShieldEnvConfig {
            min_liquidity_usd: 1_000.0,
            min_volume_24h_usd: 1_000.0,
            max_spread_pct: 1.0,
            blacklist: vec![],
        },
        stop_loss: StopLossEnvConfig {
            base_pct: 2.0,
            atr_multiplier: 1.5,
            min_pct: 0.5,
            max_pct: 5.0,
            atr_period: 14,
        },
        helios: HeliosEnvConfig {
            monitoring_interval_s: 1,
            stable_version_retention: 10,
            snapshot_dir: std::env::temp_dir()
                .join("quorum-test-snapshots")
                .display()
                .to_string(),
            restore_target: std::env::temp_dir()
                .join("quorum-test-live")
                .display()
                .to_string(),
        },
        rest: RestEnvConfig {
            base_url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
        },
        observability: ObservabilityEnvConfig {
            enabled: false,
            interval_s: 60,
        },
    }
}

#[tokio::test]
async fn test_cycles_complete_in_monitoring_mode() {
    let engine = Engine::build(test_config()).await.unwrap();

    for cycle in 1..=3 {
        engine.run_cycle(cycle).await;
    }

    let status = engine.status_snapshot().await.unwrap();
    assert_eq!(status["backend"], "mock");
    assert_eq!(status["trading_enabled"], false);
    assert_eq!(status["registry"]["total_bots"], 10);
    // Monitoring-only mode never opens positions
    assert_eq!(status["open_positions"], 0);
    assert_eq!(status["safety"]["circuit"]["state"], "Closed");
}

#[tokio::test]
async fn test_helios_gate_through_engine() {
    let engine = Engine::build(test_config()).await.unwrap();
    let helios = engine.helios();

    helios.mark_version_stable("v1.1", None).await.unwrap();
    helios
        .register_deployment("D1", "v1.2", "engine test")
        .await
        .unwrap();
    helios
        .record_phase_decision("D1", HeliosPhase::PreDeployment, PhaseOutcome::Go, "ok")
        .await
        .unwrap();
    helios
        .record_phase_decision(
            "D1",
            HeliosPhase::Verification,
            PhaseOutcome::NoGo,
            "latency regression",
        )
        .await
        .unwrap();

    // Rollback worker runs off the main loop; cycles keep turning while
    // the deployment converges to ROLLED_BACK
    let mut rolled_back = false;
    for cycle in 1..=50 {
        engine.run_cycle(cycle).await;
        let deployment = helios.get_deployment("D1").await.unwrap();
        if deployment.status == DeploymentStatus::RolledBack {
            rolled_back = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(rolled_back, "NO-GO must converge to ROLLED_BACK");

    // Deployment gate is closed until the postmortem resolves
    let mut blocked_reason = None;
    for _ in 0..100 {
        let (allowed, reason) = helios.can_deploy().await.unwrap();
        if !allowed {
            blocked_reason = Some(reason);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let reason = blocked_reason.expect("S1 postmortem should block deployments");
    let postmortem_id = reason
        .split("postmortem(s): ")
        .nth(1)
        .expect("reason names the postmortem")
        .trim()
        .to_string();

    assert!(
        helios
            .register_deployment("D2", "v1.3", "should be refused")
            .await
            .is_err()
    );

    helios
        .complete_postmortem(
            &postmortem_id,
            "cache miss storm",
            &["add warmup".to_string()],
        )
        .await
        .unwrap();

    let (allowed, _) = helios.can_deploy().await.unwrap();
    assert!(allowed);
}
