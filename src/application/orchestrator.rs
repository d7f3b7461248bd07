//! Per-cycle signal aggregation: fan out one snapshot to every analyzing
//! bot, bucket the answers by category, and reduce them to a single
//! weighted decision per symbol.

use crate::application::bots::BotRegistry;
use crate::domain::decision::{CategoryWeights, Decision, VetoRecord};
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{BotCategory, Signal, SignalAction};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// |aggregate| must exceed this to act; exactly equal prefers HOLD
    pub decision_threshold: f64,
    /// Dissent ratio above which the action is downgraded to HOLD
    pub dissent_gate: f64,
    pub weights: CategoryWeights,
    /// Per-bot analyze budget
    pub bot_timeout: Duration,
    /// RISK SELL signals at or above this confidence veto the vote
    pub veto_confidence: f64,
    /// Errors within the window that isolate a bot
    pub error_isolation_threshold: u32,
    /// Window length, in cycles, for error counting
    pub error_window_cycles: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 0.15,
            dissent_gate: 0.4,
            weights: CategoryWeights::default(),
            bot_timeout: Duration::from_secs(2),
            veto_confidence: 0.9,
            error_isolation_threshold: 3,
            error_window_cycles: 10,
        }
    }
}

/// Raw material collected from one fan-out
#[derive(Debug, Default)]
pub struct GatherOutcome {
    pub signals: Vec<Signal>,
    pub stale: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Default)]
struct ErrorWindow {
    /// Cycle numbers of recent errors
    recent: Vec<u64>,
    isolated: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<BotRegistry>,
    health: RwLock<HashMap<String, ErrorWindow>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, registry: Arc<BotRegistry>) -> Self {
        Self {
            config,
            registry,
            health: RwLock::new(HashMap::new()),
        }
    }

    /// Full per-symbol pass: gather then aggregate
    pub async fn decide(
        &self,
        cycle: u64,
        snapshot: &Arc<MarketSnapshot>,
        has_open_position: bool,
    ) -> Decision {
        let outcome = self.gather(cycle, snapshot).await;
        self.aggregate(&snapshot.symbol, &outcome, has_open_position)
    }

    /// Fans the snapshot out to every analyzer-capable, non-isolated bot
    /// with an individual timeout, and joins before returning.
    pub async fn gather(&self, cycle: u64, snapshot: &Arc<MarketSnapshot>) -> GatherOutcome {
        let bots = self.registry.all_active().await;

        let mut handles = Vec::new();
        for (name, category, bot) in bots {
            if bot.as_analyzer().is_none() {
                continue;
            }
            if self.is_isolated(&name, &bot).await {
                debug!("Orchestrator: {} is isolated, skipping", name);
                continue;
            }

            let snapshot = Arc::clone(snapshot);
            let timeout = self.config.bot_timeout;
            handles.push((
                name.clone(),
                category,
                tokio::spawn(async move {
                    let analyzer = bot.as_analyzer().expect("capability checked above");
                    tokio::time::timeout(timeout, analyzer.analyze(&snapshot)).await
                }),
            ));
        }

        let mut outcome = GatherOutcome::default();
        for (name, category, handle) in handles {
            match handle.await {
                // Timed out: tallied as stale, never cancels the cycle
                Ok(Err(_elapsed)) => {
                    warn!("Orchestrator: {} exceeded its analyze budget", name);
                    outcome.stale += 1;
                }
                Ok(Ok(Ok(Some(mut signal)))) => {
                    // The registry's categorization is authoritative
                    signal.category = category;
                    outcome.signals.push(signal);
                }
                Ok(Ok(Ok(None))) => {}
                Ok(Ok(Err(e))) => {
                    warn!("Orchestrator: {} errored during analyze: {}", name, e);
                    outcome.errored += 1;
                    self.record_error(&name, cycle).await;
                }
                Err(join_error) => {
                    warn!("Orchestrator: {} task died: {}", name, join_error);
                    outcome.errored += 1;
                    self.record_error(&name, cycle).await;
                }
            }
        }

        outcome
    }

    /// Pure aggregation step, unit-testable without any bots.
    pub fn aggregate(
        &self,
        symbol: &str,
        outcome: &GatherOutcome,
        has_open_position: bool,
    ) -> Decision {
        let weights = self.config.weights.clone();
        let threshold = self.config.decision_threshold;

        // Bucket by category
        let mut buckets: HashMap<BotCategory, Vec<&Signal>> = HashMap::new();
        for signal in &outcome.signals {
            buckets.entry(signal.category).or_default().push(signal);
        }

        // Weighted directional masses
        let mut aggregate = 0.0;
        let mut buy_weight = 0.0;
        let mut sell_weight = 0.0;
        for (category, signals) in &buckets {
            let weight = weights.get(*category);
            if weight == 0.0 || signals.is_empty() {
                continue;
            }

            let count = signals.len() as f64;
            let bucket_score: f64 = signals
                .iter()
                .map(|s| s.confidence * s.action.direction_sign())
                .sum::<f64>()
                / count;
            aggregate += weight * bucket_score;

            let buy_score: f64 = signals
                .iter()
                .filter(|s| s.action == SignalAction::Buy)
                .map(|s| s.confidence)
                .sum::<f64>()
                / count;
            let sell_score: f64 = signals
                .iter()
                .filter(|s| s.action == SignalAction::Sell)
                .map(|s| s.confidence)
                .sum::<f64>()
                / count;
            buy_weight += weight * buy_score;
            sell_weight += weight * sell_score;
        }

        let dissent_ratio = if buy_weight + sell_weight > 0.0 {
            buy_weight.min(sell_weight) / (buy_weight + sell_weight)
        } else {
            0.0
        };

        // Threshold step; exact tie prefers HOLD
        let mut final_action = if aggregate > threshold {
            SignalAction::Buy
        } else if aggregate < -threshold {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        };
        let mut confidence = aggregate.abs().clamp(0.0, 1.0);

        // Conflict gate
        if dissent_ratio > self.config.dissent_gate && final_action != SignalAction::Hold {
            info!(
                "Orchestrator: {} dissent {:.2} above gate, downgrading {} to HOLD",
                symbol, dissent_ratio, final_action
            );
            final_action = SignalAction::Hold;
            confidence = 0.0;
        }

        // RISK veto trumps everything
        let veto = self.resolve_veto(&outcome.signals);
        if let Some(veto) = &veto {
            match veto {
                VetoResolution::Forced(record) => {
                    final_action = if has_open_position {
                        SignalAction::Sell
                    } else {
                        SignalAction::Hold
                    };
                    confidence = record.confidence;
                    info!(
                        "Orchestrator: {} risk veto by {} (confidence {:.2}) -> {}",
                        symbol, record.bot_name, record.confidence, final_action
                    );
                }
                VetoResolution::Deadlocked => {
                    final_action = SignalAction::Hold;
                    confidence = 0.0;
                    warn!("Orchestrator: {} conflicting risk vetoes, holding", symbol);
                }
            }
        }

        let veto_record = match veto {
            Some(VetoResolution::Forced(record)) => Some(record),
            _ => None,
        };

        Decision {
            symbol: symbol.to_string(),
            final_action,
            confidence,
            contributing_signals: outcome.signals.len(),
            stale_signals: outcome.stale,
            errored_signals: outcome.errored,
            dissent_ratio,
            weights_applied: weights,
            veto: veto_record,
            timestamp: Utc::now(),
        }
    }

    fn resolve_veto(&self, signals: &[Signal]) -> Option<VetoResolution> {
        let vetoes: Vec<&Signal> = signals
            .iter()
            .filter(|s| {
                s.category == BotCategory::Risk
                    && s.action == SignalAction::Sell
                    && s.confidence >= self.config.veto_confidence
            })
            .collect();

        let strongest = vetoes
            .iter()
            .cloned()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

        // Equal top confidences cannot be ranked; hold instead
        let top_count = vetoes
            .iter()
            .filter(|s| s.confidence == strongest.confidence)
            .count();
        if top_count > 1 {
            return Some(VetoResolution::Deadlocked);
        }

        Some(VetoResolution::Forced(VetoRecord {
            bot_name: strongest.bot_name.clone(),
            confidence: strongest.confidence,
            reason: strongest.reason.clone(),
        }))
    }

    async fn is_isolated(&self, name: &str, bot: &Arc<dyn crate::application::bots::Bot>) -> bool {
        let mut health = self.health.write().await;
        let Some(window) = health.get_mut(name) else {
            return false;
        };
        if window.isolated && bot.status().healthy {
            // Bot reports healthy again: lift the isolation
            info!("Orchestrator: {} reports healthy, lifting isolation", name);
            window.isolated = false;
            window.recent.clear();
        }
        window.isolated
    }

    async fn record_error(&self, name: &str, cycle: u64) {
        let mut health = self.health.write().await;
        let window = health.entry(name.to_string()).or_default();

        let floor = cycle.saturating_sub(self.config.error_window_cycles);
        window.recent.retain(|c| *c >= floor);
        window.recent.push(cycle);

        if window.recent.len() as u32 >= self.config.error_isolation_threshold {
            warn!(
                "Orchestrator: isolating {} after {} errors in {} cycles",
                name,
                window.recent.len(),
                self.config.error_window_cycles
            );
            window.isolated = true;
        }
    }

    pub async fn isolated_bots(&self) -> Vec<String> {
        self.health
            .read()
            .await
            .iter()
            .filter(|(_, w)| w.isolated)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

enum VetoResolution {
    Forced(VetoRecord),
    Deadlocked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bots::{
        Bot, BotCore, BotRegistry, BotStatus, CategoryRules, SignalAnalyzer,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn signal(
        bot: &str,
        category: BotCategory,
        action: SignalAction,
        confidence: f64,
    ) -> Signal {
        Signal::new(bot, category, action, confidence, "test")
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(BotRegistry::new(CategoryRules::default())),
        )
    }

    fn outcome(signals: Vec<Signal>) -> GatherOutcome {
        GatherOutcome {
            signals,
            stale: 0,
            errored: 0,
        }
    }

    #[test]
    fn test_happy_path_weighted_buy() {
        let orch = orchestrator();
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![
                signal("lstm_sentinel", BotCategory::AiMl, SignalAction::Buy, 0.8),
                signal("rsi_oracle", BotCategory::Indicator, SignalAction::Hold, 0.0),
                signal("grid_weaver", BotCategory::Strategy, SignalAction::Buy, 0.6),
            ]),
            false,
        );

        assert_eq!(decision.final_action, SignalAction::Buy);
        // 0.25 * 0.8 + 0.20 * 0.6
        assert!((decision.confidence - 0.32).abs() < 1e-9);
        assert_eq!(decision.dissent_ratio, 0.0);
        assert_eq!(decision.contributing_signals, 3);
        assert!(decision.veto.is_none());
    }

    #[test]
    fn test_risk_veto_forces_sell_with_position() {
        let orch = orchestrator();
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![
                signal("lstm_sentinel", BotCategory::AiMl, SignalAction::Buy, 0.8),
                signal("grid_weaver", BotCategory::Strategy, SignalAction::Buy, 0.6),
                signal("var_warden", BotCategory::Risk, SignalAction::Sell, 0.95),
            ]),
            true,
        );

        assert_eq!(decision.final_action, SignalAction::Sell);
        assert!(decision.confidence >= 0.9);
        let veto = decision.veto.expect("veto should be recorded");
        assert_eq!(veto.bot_name, "var_warden");
    }

    #[test]
    fn test_risk_veto_without_position_holds() {
        let orch = orchestrator();
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![signal(
                "var_warden",
                BotCategory::Risk,
                SignalAction::Sell,
                0.95,
            )]),
            false,
        );

        assert_eq!(decision.final_action, SignalAction::Hold);
        assert!(decision.veto.is_some());
    }

    #[test]
    fn test_low_confidence_risk_sell_is_not_a_veto() {
        let orch = orchestrator();
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![
                signal("lstm_sentinel", BotCategory::AiMl, SignalAction::Buy, 0.9),
                signal("grid_weaver", BotCategory::Strategy, SignalAction::Buy, 0.9),
                signal("var_warden", BotCategory::Risk, SignalAction::Sell, 0.5),
            ]),
            true,
        );

        assert!(decision.veto.is_none());
        assert_eq!(decision.final_action, SignalAction::Buy);
    }

    #[test]
    fn test_dissent_gate_downgrades_to_hold() {
        let orch = orchestrator();
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![
                signal("lstm_sentinel", BotCategory::AiMl, SignalAction::Buy, 0.9),
                signal("grid_weaver", BotCategory::Strategy, SignalAction::Sell, 0.9),
            ]),
            false,
        );

        // aggregate = 0.25*0.9 - 0.20*0.9 = 0.045 (under threshold anyway),
        // dissent = 0.18/0.405 = 0.444 (over the gate)
        assert_eq!(decision.final_action, SignalAction::Hold);
        assert!(decision.dissent_ratio > 0.4);
        assert!(decision.dissent_ratio < 0.5);
    }

    #[test]
    fn test_dissent_gate_overrides_strong_aggregate() {
        let mut config = OrchestratorConfig::default();
        config.decision_threshold = 0.02;
        let orch = Orchestrator::new(
            config,
            Arc::new(BotRegistry::new(CategoryRules::default())),
        );

        // Aggregate (0.045) clears the lowered threshold but dissent
        // (0.444) is over the gate
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![
                signal("lstm_sentinel", BotCategory::AiMl, SignalAction::Buy, 0.9),
                signal("grid_weaver", BotCategory::Strategy, SignalAction::Sell, 0.9),
            ]),
            false,
        );

        assert_eq!(decision.final_action, SignalAction::Hold);
        assert!(decision.dissent_ratio > 0.4);
    }

    #[test]
    fn test_exact_threshold_prefers_hold() {
        let orch = orchestrator();
        // AI_ML bucket alone: 0.25 * 0.6 = 0.15 == threshold
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![signal(
                "lstm_sentinel",
                BotCategory::AiMl,
                SignalAction::Buy,
                0.6,
            )]),
            false,
        );

        assert_eq!(decision.final_action, SignalAction::Hold);
    }

    #[test]
    fn test_equal_conflicting_vetoes_hold() {
        let orch = orchestrator();
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![
                signal("var_warden", BotCategory::Risk, SignalAction::Sell, 0.95),
                signal("cvar_sentry", BotCategory::Risk, SignalAction::Sell, 0.95),
            ]),
            true,
        );

        assert_eq!(decision.final_action, SignalAction::Hold);
        assert!(decision.veto.is_none());
    }

    #[test]
    fn test_higher_confidence_veto_wins() {
        let orch = orchestrator();
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![
                signal("var_warden", BotCategory::Risk, SignalAction::Sell, 0.92),
                signal("cvar_sentry", BotCategory::Risk, SignalAction::Sell, 0.97),
            ]),
            true,
        );

        assert_eq!(decision.final_action, SignalAction::Sell);
        assert_eq!(decision.veto.unwrap().bot_name, "cvar_sentry");
    }

    #[test]
    fn test_hold_signals_dilute_their_bucket() {
        let orch = orchestrator();
        // Two HOLDs halve the strategy bucket score of the single BUY
        let decision = orch.aggregate(
            "BTC/USDT",
            &outcome(vec![
                signal("grid_weaver", BotCategory::Strategy, SignalAction::Buy, 0.9),
                signal("pairs_probe", BotCategory::Strategy, SignalAction::Hold, 0.0),
                signal("arbitrage_scout", BotCategory::Strategy, SignalAction::Hold, 0.0),
            ]),
            false,
        );

        // 0.20 * (0.9 / 3) = 0.06 < threshold
        assert_eq!(decision.final_action, SignalAction::Hold);
        assert_eq!(decision.dissent_ratio, 0.0);
    }

    #[test]
    fn test_no_signals_is_a_quiet_hold() {
        let orch = orchestrator();
        let decision = orch.aggregate("BTC/USDT", &outcome(vec![]), false);

        assert_eq!(decision.final_action, SignalAction::Hold);
        assert_eq!(decision.confidence, 0.0);
        assert_eq!(decision.contributing_signals, 0);
    }

    // ===== Gather-path tests with live (stub) bots =====

    struct FixedBot {
        core: BotCore,
        action: SignalAction,
        confidence: f64,
    }

    impl FixedBot {
        fn named(name: &str, action: SignalAction, confidence: f64) -> Arc<dyn Bot> {
            Arc::new(Self {
                core: BotCore::new(name, "1.0.0"),
                action,
                confidence,
            })
        }
    }

    impl Bot for FixedBot {
        fn name(&self) -> &str {
            self.core.name()
        }
        fn status(&self) -> BotStatus {
            self.core.status()
        }
        fn as_analyzer(&self) -> Option<&dyn SignalAnalyzer> {
            Some(self)
        }
    }

    #[async_trait]
    impl SignalAnalyzer for FixedBot {
        async fn analyze(&self, _snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
            Ok(Some(Signal::new(
                self.core.name(),
                BotCategory::General,
                self.action,
                self.confidence,
                "fixed",
            )))
        }
    }

    struct FaultyBot {
        core: BotCore,
        healthy: AtomicBool,
    }

    impl Bot for FaultyBot {
        fn name(&self) -> &str {
            self.core.name()
        }
        fn status(&self) -> BotStatus {
            let mut status = self.core.status();
            status.healthy = self.healthy.load(Ordering::SeqCst);
            status
        }
        fn as_analyzer(&self) -> Option<&dyn SignalAnalyzer> {
            Some(self)
        }
    }

    #[async_trait]
    impl SignalAnalyzer for FaultyBot {
        async fn analyze(&self, _snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
            anyhow::bail!("inference backend offline")
        }
    }

    struct SlowBot {
        core: BotCore,
    }

    impl Bot for SlowBot {
        fn name(&self) -> &str {
            self.core.name()
        }
        fn status(&self) -> BotStatus {
            self.core.status()
        }
        fn as_analyzer(&self) -> Option<&dyn SignalAnalyzer> {
            Some(self)
        }
    }

    #[async_trait]
    impl SignalAnalyzer for SlowBot {
        async fn analyze(&self, _snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    fn snapshot() -> Arc<MarketSnapshot> {
        let ticker = crate::domain::market::Ticker {
            symbol: "BTC/USDT".to_string(),
            last: dec!(50000),
            bid: dec!(49990),
            ask: dec!(50010),
            volume_24h: dec!(100),
            high_24h: dec!(51000),
            low_24h: dec!(49000),
            change_24h: dec!(0.0),
        };
        Arc::new(MarketSnapshot::new(&ticker, vec![]).unwrap())
    }

    #[tokio::test]
    async fn test_gather_collects_from_capable_bots() {
        let registry = Arc::new(BotRegistry::new(CategoryRules::default()));
        registry
            .register(
                "momentum_rider",
                FixedBot::named("momentum_rider", SignalAction::Buy, 0.7),
            )
            .await
            .unwrap();

        let orch = Orchestrator::new(OrchestratorConfig::default(), registry);
        let outcome = orch.gather(1, &snapshot()).await;

        assert_eq!(outcome.signals.len(), 1);
        assert_eq!(outcome.stale, 0);
        assert_eq!(outcome.errored, 0);
    }

    #[tokio::test]
    async fn test_slow_bot_tallies_stale_without_blocking() {
        let registry = Arc::new(BotRegistry::new(CategoryRules::default()));
        registry
            .register(
                "slow_probe",
                Arc::new(SlowBot {
                    core: BotCore::new("slow_probe", "1.0.0"),
                }) as Arc<dyn Bot>,
            )
            .await
            .unwrap();
        registry
            .register(
                "momentum_rider",
                FixedBot::named("momentum_rider", SignalAction::Buy, 0.7),
            )
            .await
            .unwrap();

        let mut config = OrchestratorConfig::default();
        config.bot_timeout = Duration::from_millis(50);
        let orch = Orchestrator::new(config, registry);

        let outcome = orch.gather(1, &snapshot()).await;
        assert_eq!(outcome.stale, 1);
        assert_eq!(outcome.signals.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_errors_isolate_until_healthy() {
        let registry = Arc::new(BotRegistry::new(CategoryRules::default()));
        let faulty = Arc::new(FaultyBot {
            core: BotCore::new("lstm_sentinel", "1.0.0"),
            healthy: AtomicBool::new(false),
        });
        registry
            .register("lstm_sentinel", Arc::clone(&faulty) as Arc<dyn Bot>)
            .await
            .unwrap();

        let mut config = OrchestratorConfig::default();
        config.error_isolation_threshold = 3;
        let orch = Orchestrator::new(config, registry);

        for cycle in 1..=3 {
            let outcome = orch.gather(cycle, &snapshot()).await;
            assert_eq!(outcome.errored, 1);
        }
        assert_eq!(orch.isolated_bots().await, vec!["lstm_sentinel".to_string()]);

        // While isolated it is skipped entirely
        let outcome = orch.gather(4, &snapshot()).await;
        assert_eq!(outcome.errored, 0);

        // Health restored: isolation lifts and the bot runs again
        faulty.healthy.store(true, Ordering::SeqCst);
        let outcome = orch.gather(5, &snapshot()).await;
        assert_eq!(outcome.errored, 1);
        assert!(orch.isolated_bots().await.is_empty());
    }

    #[tokio::test]
    async fn test_gathered_category_follows_registry() {
        let registry = Arc::new(BotRegistry::new(CategoryRules::default()));
        // Bot claims GENERAL in its own signal, but the name maps to STRATEGY
        registry
            .register(
                "grid_weaver",
                FixedBot::named("grid_weaver", SignalAction::Buy, 0.6),
            )
            .await
            .unwrap();

        let orch = Orchestrator::new(OrchestratorConfig::default(), registry);
        let outcome = orch.gather(1, &snapshot()).await;
        assert_eq!(outcome.signals[0].category, BotCategory::Strategy);
    }
}
