use crate::application::bots::{Bot, BotContext};
use crate::domain::signal::BotCategory;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One entry in the static bot manifest: a name plus a constructor.
/// The compile-time analogue of scanning a plugin directory.
pub struct BotDescriptor {
    pub name: &'static str,
    pub build: fn(&BotContext) -> anyhow::Result<Arc<dyn Bot>>,
}

/// Ordered substring -> category table. Categorization is data: the
/// default table can be replaced wholesale at construction.
#[derive(Debug, Clone)]
pub struct CategoryRules {
    rules: Vec<(String, BotCategory)>,
}

impl CategoryRules {
    pub fn new(rules: Vec<(String, BotCategory)>) -> Self {
        Self { rules }
    }

    pub fn categorize(&self, bot_name: &str) -> BotCategory {
        for (needle, category) in &self.rules {
            if bot_name.contains(needle.as_str()) {
                return *category;
            }
        }
        BotCategory::General
    }
}

impl Default for CategoryRules {
    fn default() -> Self {
        let table: &[(&str, BotCategory)] = &[
            ("lstm", BotCategory::AiMl),
            ("gan", BotCategory::AiMl),
            ("transformer", BotCategory::AiMl),
            ("xgboost", BotCategory::AiMl),
            ("grid", BotCategory::Strategy),
            ("market_making", BotCategory::Strategy),
            ("arbitrage", BotCategory::Strategy),
            ("pairs", BotCategory::Strategy),
            ("vwap", BotCategory::Execution),
            ("twap", BotCategory::Execution),
            ("iceberg", BotCategory::Execution),
            ("sniper", BotCategory::Execution),
            ("var", BotCategory::Risk),
            ("cvar", BotCategory::Risk),
            ("monte_carlo", BotCategory::Risk),
            ("black_swan", BotCategory::Risk),
            ("rsi", BotCategory::Indicator),
            ("macd", BotCategory::Indicator),
            ("bollinger", BotCategory::Indicator),
            ("ichimoku", BotCategory::Indicator),
            ("fibonacci", BotCategory::Indicator),
            ("profit_lock", BotCategory::Protection),
            ("rug_shield", BotCategory::Protection),
            ("crash_shield", BotCategory::Protection),
        ];
        Self::new(
            table
                .iter()
                .map(|(needle, category)| (needle.to_string(), *category))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub discovered: usize,
    pub bots: Vec<String>,
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub total_bots: usize,
    pub categories: HashMap<String, usize>,
    pub failed_bots: u64,
    pub discovery_runs: u64,
}

struct RegisteredBot {
    instance: Arc<dyn Bot>,
    category: BotCategory,
    #[allow(dead_code)]
    registered_at: DateTime<Utc>,
}

/// Owns every bot instance. Read-mostly after discovery; registration
/// takes the exclusive lock.
pub struct BotRegistry {
    bots: RwLock<HashMap<String, RegisteredBot>>,
    rules: CategoryRules,
    discovery_runs: AtomicU64,
    failed_bots: AtomicU64,
}

impl BotRegistry {
    pub fn new(rules: CategoryRules) -> Self {
        Self {
            bots: RwLock::new(HashMap::new()),
            rules,
            discovery_runs: AtomicU64::new(0),
            failed_bots: AtomicU64::new(0),
        }
    }

    /// Constructs one instance per manifest entry. A failing constructor
    /// is recorded and skipped, never fatal.
    pub async fn discover(
        &self,
        manifest: &[BotDescriptor],
        context: &BotContext,
    ) -> DiscoveryReport {
        self.discovery_runs.fetch_add(1, Ordering::Relaxed);

        let mut discovered = Vec::new();
        let mut errors = Vec::new();

        for descriptor in manifest {
            match (descriptor.build)(context) {
                Ok(instance) => match self.register(descriptor.name, instance).await {
                    Ok(category) => {
                        info!(
                            "Registry: discovered {} ({})",
                            descriptor.name, category
                        );
                        discovered.push(descriptor.name.to_string());
                    }
                    Err(e) => {
                        warn!("Registry: could not register {}: {}", descriptor.name, e);
                        self.failed_bots.fetch_add(1, Ordering::Relaxed);
                        errors.push((descriptor.name.to_string(), e.to_string()));
                    }
                },
                Err(e) => {
                    warn!(
                        "Registry: could not instantiate {}: {}",
                        descriptor.name, e
                    );
                    self.failed_bots.fetch_add(1, Ordering::Relaxed);
                    errors.push((descriptor.name.to_string(), e.to_string()));
                }
            }
        }

        DiscoveryReport {
            discovered: discovered.len(),
            bots: discovered,
            errors,
        }
    }

    /// Adds a bot under a unique name, categorized by the rule table
    pub async fn register(
        &self,
        name: &str,
        instance: Arc<dyn Bot>,
    ) -> anyhow::Result<BotCategory> {
        let category = self.rules.categorize(name);
        let mut bots = self.bots.write().await;

        if bots.contains_key(name) {
            anyhow::bail!("bot '{}' is already registered", name);
        }

        bots.insert(
            name.to_string(),
            RegisteredBot {
                instance,
                category,
                registered_at: Utc::now(),
            },
        );
        Ok(category)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Bot>> {
        self.bots.read().await.get(name).map(|b| Arc::clone(&b.instance))
    }

    pub async fn category_of(&self, name: &str) -> Option<BotCategory> {
        self.bots.read().await.get(name).map(|b| b.category)
    }

    pub async fn by_category(&self, category: BotCategory) -> Vec<Arc<dyn Bot>> {
        self.bots
            .read()
            .await
            .values()
            .filter(|b| b.category == category)
            .map(|b| Arc::clone(&b.instance))
            .collect()
    }

    /// Every registered bot with its category, name-sorted for
    /// deterministic iteration
    pub async fn all_active(&self) -> Vec<(String, BotCategory, Arc<dyn Bot>)> {
        let bots = self.bots.read().await;
        let mut all: Vec<_> = bots
            .iter()
            .map(|(name, b)| (name.clone(), b.category, Arc::clone(&b.instance)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn status_summary(&self) -> RegistryStatus {
        let bots = self.bots.read().await;
        let mut categories: HashMap<String, usize> = HashMap::new();
        for bot in bots.values() {
            *categories.entry(bot.category.to_string()).or_insert(0) += 1;
        }
        RegistryStatus {
            total_bots: bots.len(),
            categories,
            failed_bots: self.failed_bots.load(Ordering::Relaxed),
            discovery_runs: self.discovery_runs.load(Ordering::Relaxed),
        }
    }
}
