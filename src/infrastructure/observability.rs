//! Prometheus metrics, push-style: a reporter task periodically emits a
//! `METRICS_JSON:` line to stdout for log-based collectors. No HTTP server.

use crate::application::safety::CircuitState;
use prometheus::{
    CounterVec, Gauge, IntCounter, Opts, Registry,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Completed scheduler cycles
    pub cycles_total: IntCounter,
    /// Decisions by final action
    pub decisions_total: CounterVec,
    /// Signals gathered, by category
    pub signals_total: CounterVec,
    /// Circuit state as a gauge (0=closed, 1=half-open, 2=open)
    pub circuit_state: GenericGauge<AtomicF64>,
    /// Currently open positions
    pub open_positions: GenericGauge<AtomicF64>,
    /// Rate limit denials absorbed or surfaced
    pub rate_limit_hits_total: IntCounter,
    /// Automatic rollbacks triggered
    pub rollbacks_total: IntCounter,
    /// Stop-loss close directives emitted
    pub stops_triggered_total: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cycles_total =
            IntCounter::with_opts(Opts::new("quorum_cycles_total", "Completed scheduler cycles"))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let decisions_total = CounterVec::new(
            Opts::new("quorum_decisions_total", "Decisions by final action"),
            &["action"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let signals_total = CounterVec::new(
            Opts::new("quorum_signals_total", "Signals gathered by category"),
            &["category"],
        )?;
        registry.register(Box::new(signals_total.clone()))?;

        let circuit_state = Gauge::with_opts(Opts::new(
            "quorum_circuit_state",
            "Circuit state (0=closed, 1=half-open, 2=open)",
        ))?;
        registry.register(Box::new(circuit_state.clone()))?;

        let open_positions = Gauge::with_opts(Opts::new(
            "quorum_open_positions",
            "Currently open positions",
        ))?;
        registry.register(Box::new(open_positions.clone()))?;

        let rate_limit_hits_total = IntCounter::with_opts(Opts::new(
            "quorum_rate_limit_hits_total",
            "Rate limit denials",
        ))?;
        registry.register(Box::new(rate_limit_hits_total.clone()))?;

        let rollbacks_total = IntCounter::with_opts(Opts::new(
            "quorum_rollbacks_total",
            "Automatic rollbacks triggered",
        ))?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        let stops_triggered_total = IntCounter::with_opts(Opts::new(
            "quorum_stops_triggered_total",
            "Stop-loss close directives emitted",
        ))?;
        registry.register(Box::new(stops_triggered_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            cycles_total,
            decisions_total,
            signals_total,
            circuit_state,
            open_positions,
            rate_limit_hits_total,
            rollbacks_total,
            stops_triggered_total,
        })
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        self.circuit_state.set(value);
    }

    /// Flattens the registry into a {metric{labels}: value} JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for family in self.registry.gather() {
            for metric in family.get_metric() {
                let labels: Vec<String> = metric
                    .get_label()
                    .iter()
                    .map(|l| format!("{}={}", l.name(), l.value()))
                    .collect();
                let key = if labels.is_empty() {
                    family.name().to_string()
                } else {
                    format!("{}{{{}}}", family.name(), labels.join(","))
                };
                let value = if metric.counter.is_some() {
                    metric.counter.value()
                } else if metric.gauge.is_some() {
                    metric.gauge.value()
                } else {
                    continue;
                };
                out.insert(key, serde_json::json!(value));
            }
        }
        serde_json::Value::Object(out)
    }
}

impl Metrics {
    /// Tails the event stream and keeps counters current without the hot
    /// paths knowing about prometheus. Runs until the bus closes.
    pub fn spawn_event_sink(
        &self,
        bus: &crate::infrastructure::event_bus::EventBus,
    ) -> tokio::task::JoinHandle<()> {
        use crate::domain::events::EngineEvent;
        use tokio::sync::broadcast::error::RecvError;

        let metrics = self.clone();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(EngineEvent::RateLimitHit { .. }) => {
                        metrics.rate_limit_hits_total.inc();
                    }
                    Ok(EngineEvent::RollbackTriggered { .. }) => {
                        metrics.rollbacks_total.inc();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("metrics event sink lagged, dropped {} events", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Emits the metrics JSON line on a fixed interval until shutdown
pub struct MetricsReporter {
    metrics: Metrics,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_s: u64) -> Self {
        Self {
            metrics,
            interval: Duration::from_secs(interval_s.max(1)),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!("METRICS_JSON:{}", self.metrics.to_json());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("MetricsReporter: shutdown signal received");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_flatten_to_json() {
        let metrics = Metrics::new().unwrap();
        metrics.cycles_total.inc();
        metrics.cycles_total.inc();
        metrics.decisions_total.with_label_values(&["BUY"]).inc();
        metrics.set_circuit_state(CircuitState::Open);

        let json = metrics.to_json();
        assert_eq!(json["quorum_cycles_total"], 2.0);
        assert_eq!(json["quorum_decisions_total{action=BUY}"], 1.0);
        assert_eq!(json["quorum_circuit_state"], 2.0);
    }

    #[test]
    fn test_registry_rejects_duplicate_names_once() {
        // Two independent Metrics instances each own a private registry
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.cycles_total.inc();
        assert_eq!(b.to_json()["quorum_cycles_total"], 0.0);
    }

    #[tokio::test]
    async fn test_event_sink_tallies_safety_events() {
        use crate::domain::events::EngineEvent;
        use crate::infrastructure::event_bus::EventBus;

        let metrics = Metrics::new().unwrap();
        let bus = EventBus::new();
        metrics.spawn_event_sink(&bus);

        bus.publish(EngineEvent::RateLimitHit { wait_s: 0.5 });
        bus.publish(EngineEvent::RollbackTriggered {
            deployment_id: "D1".into(),
            phase: "VERIFICATION".into(),
            reason: "latency".into(),
        });
        // Untracked events pass through untallied
        bus.publish(EngineEvent::EngineStopped {
            cycles_completed: 1,
        });

        // The sink is a detached task; poll until the counters land
        for _ in 0..100 {
            if metrics.rate_limit_hits_total.get() == 1 && metrics.rollbacks_total.get() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("event sink never consumed the events");
    }
}
