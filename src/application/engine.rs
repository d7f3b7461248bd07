//! Composition root and main loop: one Engine owns every component and
//! drives the cycle clock. Within a cycle, per-symbol work fans out to
//! bots and re-converges before the decision step; a failed cycle is
//! logged and never kills the loop.

use crate::application::bots::builtin::builtin_manifest;
use crate::application::bots::{BotContext, BotRegistry, CategoryRules, GuardianVerdict};
use crate::application::helios::{HeliosProtocol, SnapshotDirRestorer};
use crate::application::intelligence::IntelligenceHub;
use crate::application::orchestrator::Orchestrator;
use crate::application::safety::SafetyEnvelope;
use crate::application::safety::CircuitState;
use crate::config::{Config, Mode};
use crate::domain::events::EngineEvent;
use crate::domain::market::{MarketSnapshot, Timeframe};
use crate::domain::order::{OrderRequest, OrderSide};
use crate::domain::ports::{ExchangeBackend, PositionLedger};
use crate::domain::position::{OpenPositionRequest, Position, PositionSide};
use crate::domain::signal::SignalAction;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::exchange::{
    ExchangeAdapter, ExchangeAdapterConfig, MockBackend, RestBackend, RestBackendConfig,
};
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::{Database, SqliteHeliosStore, SqlitePositionLedger};
use anyhow::{Context, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How many OHLCV rows each snapshot carries
const SNAPSHOT_CANDLES: usize = 100;
/// Health check cadence, in cycles
const HEALTH_CHECK_EVERY: u64 = 5;

pub struct Engine {
    config: Config,
    adapter: Arc<ExchangeAdapter>,
    envelope: Arc<SafetyEnvelope>,
    ledger: Arc<dyn PositionLedger>,
    registry: Arc<BotRegistry>,
    orchestrator: Arc<Orchestrator>,
    intelligence: IntelligenceHub,
    helios: Arc<HeliosProtocol>,
    events: EventBus,
    metrics: Metrics,
}

impl Engine {
    /// Builds the whole object graph. Any failure here is fatal; nothing
    /// is retried.
    pub async fn build(config: Config) -> Result<Engine> {
        let events = EventBus::new();
        events.spawn_log_sink();

        let metrics = Metrics::new().context("Failed to register metrics")?;
        metrics.spawn_event_sink(&events);

        let envelope = Arc::new(SafetyEnvelope::new(
            config.safety.rate_limiter(),
            config.safety.circuit_breaker(),
            config.rug_shield.rug_shield(),
            config.stop_loss.stop_loss(),
        ));

        let backend: Arc<dyn ExchangeBackend> = match config.mode {
            Mode::Mock => Arc::new(MockBackend::new()),
            Mode::Rest => Arc::new(RestBackend::new(RestBackendConfig {
                base_url: config.rest.base_url.clone(),
                api_key: config.rest.api_key.clone(),
                api_secret: config.rest.api_secret.clone(),
            })),
        };

        let adapter = Arc::new(ExchangeAdapter::new(
            backend,
            Arc::clone(&envelope),
            events.clone(),
            ExchangeAdapterConfig {
                call_timeout: Duration::from_secs(config.safety.call_timeout_s),
                max_rate_limit_backoff: Duration::from_secs(config.safety.rate_limit_backoff_s),
            },
        ));

        let database = Database::new(&config.database_url)
            .await
            .context("Failed to open database")?;
        let ledger: Arc<dyn PositionLedger> =
            Arc::new(SqlitePositionLedger::new(database.pool.clone()));

        let helios = Arc::new(HeliosProtocol::new(
            Arc::new(SqliteHeliosStore::new(
                database.pool.clone(),
                config.helios.stable_version_retention,
            )),
            Arc::new(SnapshotDirRestorer::new(
                &config.helios.snapshot_dir,
                &config.helios.restore_target,
            )),
            events.clone(),
            Duration::from_secs(config.helios.monitoring_interval_s),
        ));

        let registry = Arc::new(BotRegistry::new(CategoryRules::default()));
        let bot_context = BotContext {
            adapter: Arc::clone(&adapter),
            ledger: Arc::clone(&ledger),
            envelope: Arc::clone(&envelope),
        };
        let report = registry.discover(&builtin_manifest(), &bot_context).await;
        info!(
            "Engine: discovered {} bots ({} errors)",
            report.discovered,
            report.errors.len()
        );

        let orchestrator = Arc::new(Orchestrator::new(
            config.orchestrator.orchestrator(),
            Arc::clone(&registry),
        ));

        let intelligence = IntelligenceHub::new(
            Arc::clone(&registry),
            Duration::from_millis(config.orchestrator.bot_timeout_ms),
        );

        Ok(Engine {
            config,
            adapter,
            envelope,
            ledger,
            registry,
            orchestrator,
            intelligence,
            helios,
            events,
            metrics,
        })
    }

    pub fn helios(&self) -> Arc<HeliosProtocol> {
        Arc::clone(&self.helios)
    }

    /// Runs until a shutdown signal arrives. Startup reconciliation first,
    /// then the cycle clock.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Engine: starting (mode {:?}, {} pairs, {}s cadence, trading {})",
            self.config.mode,
            self.config.trading.pairs.len(),
            self.config.trading.cycle_interval_s,
            if self.config.trading.enabled {
                "LIVE"
            } else {
                "monitoring-only"
            }
        );

        self.reconcile_at_startup().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
        });

        self.helios.spawn_monitor(shutdown_rx.clone());

        if self.config.observability.enabled {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.observability.interval_s,
            );
            let reporter_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                reporter.run(reporter_shutdown).await;
            });
        }

        let mut shutdown = shutdown_rx;
        let mut cycle: u64 = 0;
        let base_interval = Duration::from_secs(self.config.trading.cycle_interval_s);

        loop {
            let interval = if self.config.trading.cycle_jitter {
                // Up to 10% jitter keeps fleets from thundering together
                let jitter_ms =
                    rand::rng().random_range(0..=base_interval.as_millis() as u64 / 10);
                base_interval + Duration::from_millis(jitter_ms)
            } else {
                base_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    cycle += 1;
                    self.run_cycle(cycle).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Engine: draining and flushing before exit");
        if let Err(e) = self.ledger.flush().await {
            error!("Engine: ledger flush failed during shutdown: {}", e);
        }
        self.events.publish(EngineEvent::EngineStopped {
            cycles_completed: cycle,
        });
        info!("Engine: shutdown complete after {} cycles", cycle);
        Ok(())
    }

    /// One full cycle over all configured pairs. Never returns an error:
    /// per-symbol failures are logged and the loop continues.
    pub async fn run_cycle(&self, cycle: u64) {
        let mut decisions = 0usize;
        let mut symbols_processed = 0usize;

        for symbol in self.config.trading.pairs.clone() {
            match self.process_symbol(cycle, &symbol).await {
                Ok(acted) => {
                    symbols_processed += 1;
                    if acted {
                        decisions += 1;
                    }
                }
                Err(e) => warn!("Engine: cycle {} skipped {}: {}", cycle, symbol, e),
            }
        }

        let health = if cycle % HEALTH_CHECK_EVERY == 0 {
            self.health_check().await
        } else {
            "ok".to_string()
        };

        self.metrics.cycles_total.inc();
        if let Ok(open) = self.ledger.open_positions().await {
            self.metrics.open_positions.set(open.len() as f64);
        }
        self.metrics
            .set_circuit_state(self.envelope.circuit_state().await);

        self.events.publish(EngineEvent::CycleCompleted {
            cycle,
            symbols_processed,
            decisions,
            health_status: health,
        });
    }

    /// Snapshot -> intelligence -> stops/guardians -> decision -> action.
    /// Returns true when an actionable decision was executed (or would
    /// have been, in monitoring-only mode).
    async fn process_symbol(&self, cycle: u64, symbol: &str) -> Result<bool> {
        let ticker = self.adapter.get_ticker(symbol).await?;
        let candles = self
            .adapter
            .get_ohlcv(symbol, Timeframe::H1, SNAPSHOT_CANDLES)
            .await
            .unwrap_or_else(|e| {
                // Stale decisions beat no decisions; bots tolerate gaps
                warn!("Engine: no fresh candles for {}: {}", symbol, e);
                Vec::new()
            });

        let snapshot = Arc::new(MarketSnapshot::new(&ticker, candles)?);

        let report = self.intelligence.gather(&snapshot).await;
        if report.timed_out {
            warn!(
                "Engine: intelligence bundle for {} is partial ({} sources)",
                symbol,
                report.sources_consulted.len()
            );
        }

        let open_for_symbol = self.open_positions_for(symbol).await?;
        self.protect_positions(&open_for_symbol, &snapshot).await;

        // Re-read: protection may have closed something this tick
        let open_for_symbol = self.open_positions_for(symbol).await?;
        let has_open_position = !open_for_symbol.is_empty();

        let decision = self
            .orchestrator
            .decide(cycle, &snapshot, has_open_position)
            .await;

        self.metrics
            .decisions_total
            .with_label_values(&[&decision.final_action.to_string()])
            .inc();
        self.events.publish(EngineEvent::decision(&decision));

        if !decision.is_actionable() {
            return Ok(false);
        }

        match decision.final_action {
            SignalAction::Buy if !has_open_position => {
                self.enter_position(cycle, &snapshot, decision.confidence)
                    .await?;
            }
            SignalAction::Buy => {
                info!("Engine: {} already held, BUY not stacked", symbol);
            }
            SignalAction::Sell if has_open_position => {
                for position in &open_for_symbol {
                    self.exit_position(position, &snapshot, "sell decision")
                        .await?;
                }
            }
            SignalAction::Sell => {
                info!("Engine: no {} position to sell, skipping", symbol);
            }
            SignalAction::Hold => {}
        }

        Ok(true)
    }

    async fn open_positions_for(&self, symbol: &str) -> Result<Vec<Position>> {
        Ok(self
            .ledger
            .open_positions()
            .await?
            .into_iter()
            .filter(|p| p.symbol == symbol)
            .collect())
    }

    /// Stop-loss ticks plus guardian verdicts for every open position on
    /// this symbol.
    async fn protect_positions(&self, positions: &[Position], snapshot: &Arc<MarketSnapshot>) {
        for position in positions {
            if let Some(directive) = self
                .envelope
                .stops()
                .on_tick(&position.position_id, snapshot.last_price, &snapshot.ohlcv)
                .await
            {
                self.metrics.stops_triggered_total.inc();
                self.events.publish(EngineEvent::StopTriggered {
                    position_id: directive.position_id.clone(),
                    symbol: directive.symbol.clone(),
                    stop_price: directive.stop_price,
                    last_price: directive.last_price,
                });
                if let Err(e) = self.exit_position(position, snapshot, "stop loss").await {
                    error!(
                        "Engine: stop-loss close failed for {}: {}",
                        position.position_id, e
                    );
                }
                continue;
            }

            for (name, _, bot) in self.registry.all_active().await {
                let Some(guardian) = bot.as_guardian() else {
                    continue;
                };
                let GuardianVerdict { close, adjust_stop } =
                    guardian.evaluate(position, snapshot).await;

                if let Some(reason) = close {
                    info!("Engine: {} orders close of {}: {}", name, position.position_id, reason);
                    if let Err(e) = self.exit_position(position, snapshot, &reason).await {
                        error!("Engine: guardian close failed: {}", e);
                    }
                    break;
                }
                if adjust_stop.is_some() {
                    // Guardians may only tighten; the stop engine enforces
                    // monotonicity on the next tick
                    continue;
                }
            }
        }
    }

    async fn enter_position(
        &self,
        cycle: u64,
        snapshot: &Arc<MarketSnapshot>,
        confidence: f64,
    ) -> Result<()> {
        let symbol = &snapshot.symbol;

        // Rug shield gates every new order
        let assessment = match self.adapter.get_order_book(symbol, 20).await {
            Ok(book) => self.envelope.shield().assess(snapshot, &book).await,
            Err(e) => {
                warn!(
                    "Engine: no order book for {} ({}), using snapshot screen",
                    symbol, e
                );
                self.envelope.shield().assess_snapshot(snapshot).await
            }
        };
        if !assessment.safe {
            warn!(
                "Engine: rug shield blocked entry into {} (score {})",
                symbol, assessment.score
            );
            return Ok(());
        }

        let amount = self.config.trading.trade_quantity;

        if !self.config.trading.enabled {
            info!(
                "Engine: monitoring-only - would BUY {} {} @ {} (confidence {:.2})",
                amount, symbol, snapshot.last_price, confidence
            );
            return Ok(());
        }

        let request = OrderRequest::market(symbol.clone(), OrderSide::Buy, amount)
            .with_client_order_id(format!("c{}-{}", cycle, symbol));
        let ack = match self.adapter.place_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                // Recorded, not retried: the next cycle re-decides
                warn!("Engine: BUY {} failed: {}", symbol, e);
                return Ok(());
            }
        };

        let entry_price = ack.fill_price.unwrap_or(snapshot.last_price);
        let position = self
            .ledger
            .open_position(OpenPositionRequest {
                symbol: symbol.clone(),
                side: PositionSide::Long,
                entry_price,
                amount: ack.amount,
                strategy: "quorum".to_string(),
                metadata: serde_json::json!({
                    "order_id": ack.order_id,
                    "decision_confidence": confidence,
                }),
            })
            .await?;

        let stop = self
            .envelope
            .stops()
            .arm(&position, &snapshot.ohlcv)
            .await;
        info!(
            "Engine: opened {} ({} @ {}), stop armed at {}",
            position.position_id, symbol, entry_price, stop.stop_price
        );

        self.events.publish(EngineEvent::position_opened(&position));
        Ok(())
    }

    async fn exit_position(
        &self,
        position: &Position,
        snapshot: &Arc<MarketSnapshot>,
        reason: &str,
    ) -> Result<()> {
        if self.config.trading.enabled {
            let request = OrderRequest::market(
                position.symbol.clone(),
                OrderSide::Sell,
                position.amount,
            )
            .with_client_order_id(format!("close-{}", position.position_id));
            if let Err(e) = self.adapter.place_order(&request).await {
                warn!(
                    "Engine: close order for {} failed ({}); ledger not touched",
                    position.position_id, e
                );
                return Ok(());
            }
        } else {
            info!(
                "Engine: monitoring-only - would SELL {} {} @ {} ({})",
                position.amount, position.symbol, snapshot.last_price, reason
            );
        }

        let closed = self
            .ledger
            .close_position(
                &position.position_id,
                snapshot.last_price,
                reason,
                rust_decimal::Decimal::ZERO,
            )
            .await?;
        self.envelope.stops().disarm(&position.position_id).await;

        self.events.publish(EngineEvent::position_closed(&closed));
        Ok(())
    }

    async fn reconcile_at_startup(&self) {
        let holdings = match self.adapter.holdings_snapshot().await {
            Ok(holdings) => holdings,
            Err(e) => {
                warn!("Engine: startup reconciliation skipped ({})", e);
                return;
            }
        };

        match self.ledger.reconcile(&holdings).await {
            Ok(summary) => {
                if summary.is_clean() {
                    info!(
                        "Engine: ledger reconciled clean ({} open positions)",
                        summary.open_positions_checked
                    );
                } else {
                    for discrepancy in &summary.discrepancies {
                        self.events.publish(EngineEvent::discrepancy(discrepancy));
                    }
                    warn!(
                        "Engine: reconciliation found {} discrepancies - operator action required",
                        summary.discrepancies.len()
                    );
                }
            }
            Err(e) => error!("Engine: startup reconciliation failed: {}", e),
        }
    }

    async fn health_check(&self) -> String {
        let safety = self.envelope.state().await;
        let registry = self.registry.status_summary().await;
        let isolated = self.orchestrator.isolated_bots().await;

        let status = if matches!(safety.circuit.state, CircuitState::Open | CircuitState::HalfOpen)
        {
            "degraded"
        } else if !isolated.is_empty() {
            "partial"
        } else {
            "ok"
        };

        info!(
            "Engine health: circuit {:?}, {} bots ({} isolated), {} requests in window",
            safety.circuit.state,
            registry.total_bots,
            isolated.len(),
            safety.rate_limiter.requests_in_minute
        );
        status.to_string()
    }

    /// One-shot status snapshot for the CLI
    pub async fn status_snapshot(&self) -> Result<serde_json::Value> {
        let safety = self.envelope.state().await;
        let registry = self.registry.status_summary().await;
        let helios = self.helios.status().await?;
        let open_positions = self.ledger.open_positions().await?;

        Ok(serde_json::json!({
            "backend": self.adapter.backend_name(),
            "trading_enabled": self.config.trading.enabled,
            "pairs": self.config.trading.pairs,
            "registry": registry,
            "safety": safety,
            "helios": helios,
            "open_positions": open_positions.len(),
        }))
    }
}
