//! Market intelligence hub: fans one snapshot out to every feature-source
//! and observer bot, and folds the contributions into a single bundle the
//! orchestrator attaches to its inputs.

use crate::application::bots::BotRegistry;
use crate::domain::market::MarketSnapshot;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct IntelligenceReport {
    pub sources_consulted: Vec<String>,
    pub features: HashMap<String, f64>,
    pub warnings: Vec<String>,
    /// True when the budget expired before every source answered
    pub timed_out: bool,
}

pub struct IntelligenceHub {
    registry: Arc<BotRegistry>,
    /// Whole-gather budget; partial results are returned on expiry
    budget: Duration,
}

impl IntelligenceHub {
    pub fn new(registry: Arc<BotRegistry>, budget: Duration) -> Self {
        Self { registry, budget }
    }

    /// Collects features within the budget. Idempotent within a cycle:
    /// sources read the immutable snapshot; observers receive it once.
    pub async fn gather(&self, snapshot: &Arc<MarketSnapshot>) -> IntelligenceReport {
        let bots = self.registry.all_active().await;

        let (tx, mut rx) = mpsc::channel::<(String, HashMap<String, f64>)>(bots.len().max(1));
        let mut expected = 0usize;

        for (name, _category, bot) in bots {
            // Observers get the snapshot regardless of features
            if bot.as_observer().is_some() {
                let observer_bot = Arc::clone(&bot);
                let observer_snapshot = Arc::clone(snapshot);
                tokio::spawn(async move {
                    if let Some(observer) = observer_bot.as_observer() {
                        observer.update(&observer_snapshot).await;
                    }
                });
            }

            if bot.as_feature_source().is_none() {
                continue;
            }
            expected += 1;

            let tx = tx.clone();
            let snapshot = Arc::clone(snapshot);
            tokio::spawn(async move {
                if let Some(source) = bot.as_feature_source() {
                    let features = source.features(&snapshot).await;
                    let _ = tx.send((name, features)).await;
                }
            });
        }
        drop(tx);

        let mut report = IntelligenceReport {
            sources_consulted: Vec::new(),
            features: HashMap::new(),
            warnings: Vec::new(),
            timed_out: false,
        };

        let deadline = tokio::time::Instant::now() + self.budget;
        while report.sources_consulted.len() < expected {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((name, features))) => {
                    for (key, value) in features {
                        if let Some(previous) = report.features.insert(key.clone(), value) {
                            debug!(
                                "IntelligenceHub: feature {} overwritten ({} -> {})",
                                key, previous, value
                            );
                        }
                    }
                    report.sources_consulted.push(name);
                }
                Ok(None) => break,
                Err(_) => {
                    let missing = expected - report.sources_consulted.len();
                    warn!(
                        "IntelligenceHub: budget expired with {} source(s) outstanding",
                        missing
                    );
                    report.timed_out = true;
                    report
                        .warnings
                        .push(format!("{} source(s) missed the budget", missing));
                    break;
                }
            }
        }

        report.sources_consulted.sort();
        report
    }
}
