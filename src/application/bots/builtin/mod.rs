//! Built-in bot fleet shipped with the engine. Each bot is small and
//! self-contained; the manifest below is what discovery scans.

pub mod grid_weaver;
pub mod lstm_sentinel;
pub mod macd_herald;
pub mod momentum_rider;
pub mod profit_lock;
pub mod rsi_oracle;
pub mod rug_shield_bot;
pub mod twap_pacer;
pub mod var_warden;
pub mod whale_watch;

use crate::application::bots::BotDescriptor;

pub fn builtin_manifest() -> Vec<BotDescriptor> {
    vec![
        BotDescriptor {
            name: "lstm_sentinel",
            build: lstm_sentinel::build,
        },
        BotDescriptor {
            name: "grid_weaver",
            build: grid_weaver::build,
        },
        BotDescriptor {
            name: "momentum_rider",
            build: momentum_rider::build,
        },
        BotDescriptor {
            name: "rsi_oracle",
            build: rsi_oracle::build,
        },
        BotDescriptor {
            name: "macd_herald",
            build: macd_herald::build,
        },
        BotDescriptor {
            name: "var_warden",
            build: var_warden::build,
        },
        BotDescriptor {
            name: "rug_shield",
            build: rug_shield_bot::build,
        },
        BotDescriptor {
            name: "profit_lock",
            build: profit_lock::build,
        },
        BotDescriptor {
            name: "whale_watch",
            build: whale_watch::build,
        },
        BotDescriptor {
            name: "twap_pacer",
            build: twap_pacer::build,
        },
    ]
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bots::{BotContext, BotRegistry, CategoryRules};
    use crate::application::safety::{
        CircuitBreakerConfig, RateLimiterConfig, RugShieldConfig, SafetyEnvelope, StopLossConfig,
    };
    use crate::domain::signal::BotCategory;
    use crate::infrastructure::exchange::{ExchangeAdapter, ExchangeAdapterConfig, MockBackend};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::persistence::{Database, SqlitePositionLedger};
    use std::sync::Arc;

    async fn context() -> BotContext {
        let envelope = Arc::new(SafetyEnvelope::new(
            RateLimiterConfig::default(),
            CircuitBreakerConfig::default(),
            RugShieldConfig::default(),
            StopLossConfig::default(),
        ));
        let adapter = Arc::new(ExchangeAdapter::new(
            Arc::new(MockBackend::new()),
            Arc::clone(&envelope),
            EventBus::new(),
            ExchangeAdapterConfig::default(),
        ));
        let db = Database::new("sqlite::memory:").await.unwrap();
        BotContext {
            adapter,
            ledger: Arc::new(SqlitePositionLedger::new(db.pool)),
            envelope,
        }
    }

    #[tokio::test]
    async fn test_manifest_discovers_full_fleet() {
        let registry = BotRegistry::new(CategoryRules::default());
        let context = context().await;

        let report = registry.discover(&builtin_manifest(), &context).await;
        assert_eq!(report.discovered, 10);
        assert!(report.errors.is_empty());

        let status = registry.status_summary().await;
        assert_eq!(status.total_bots, 10);
        assert_eq!(status.categories.get("AI_ML"), Some(&1));
        assert_eq!(status.categories.get("STRATEGY"), Some(&1));
        assert_eq!(status.categories.get("INDICATOR"), Some(&2));
        assert_eq!(status.categories.get("RISK"), Some(&1));
        assert_eq!(status.categories.get("PROTECTION"), Some(&2));
        assert_eq!(status.categories.get("EXECUTION"), Some(&1));
        assert_eq!(status.categories.get("GENERAL"), Some(&2));
    }

    #[tokio::test]
    async fn test_discovery_tolerates_failing_constructor() {
        fn broken(_ctx: &BotContext) -> anyhow::Result<Arc<dyn crate::application::bots::Bot>> {
            anyhow::bail!("missing model weights")
        }

        let mut manifest = builtin_manifest();
        manifest.push(BotDescriptor {
            name: "gan_dreamer",
            build: broken,
        });

        let registry = BotRegistry::new(CategoryRules::default());
        let context = context().await;
        let report = registry.discover(&manifest, &context).await;

        assert_eq!(report.discovered, 10);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "gan_dreamer");

        let status = registry.status_summary().await;
        assert_eq!(status.failed_bots, 1);
        assert_eq!(status.total_bots, 10);
    }

    #[tokio::test]
    async fn test_capability_routing_matches_fleet() {
        let registry = BotRegistry::new(CategoryRules::default());
        let context = context().await;
        registry.discover(&builtin_manifest(), &context).await;

        let mut analyzers = 0;
        let mut observers = 0;
        let mut guardians = 0;
        let mut feature_sources = 0;
        for (_, _, bot) in registry.all_active().await {
            if bot.as_analyzer().is_some() {
                analyzers += 1;
            }
            if bot.as_observer().is_some() {
                observers += 1;
            }
            if bot.as_guardian().is_some() {
                guardians += 1;
            }
            if bot.as_feature_source().is_some() {
                feature_sources += 1;
            }
        }

        assert_eq!(analyzers, 7);
        assert_eq!(observers, 1);
        assert_eq!(guardians, 1);
        assert!(feature_sources >= 3);

        // Registered categories drive weighting downstream
        assert_eq!(
            registry.category_of("lstm_sentinel").await,
            Some(BotCategory::AiMl)
        );
    }
}
