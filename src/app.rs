use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    api,
    clients::{TrendLlmClient, TrendSource},
    config::Config,
    diversity::{BulkModeController, DiversityLedger},
    observability::Telemetry,
    scheduler,
    selection::{FallbackCatalog, TopicSelector, TrendCache},
    util::time::{Clock, SystemClock},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    ledger: Arc<DiversityLedger>,
    bulk: Arc<BulkModeController>,
    cache: Arc<TrendCache>,
    selector: Arc<TopicSelector>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn selector(&self) -> &TopicSelector {
        &self.registry.selector
    }

    pub(crate) fn ledger(&self) -> &DiversityLedger {
        &self.registry.ledger
    }

    pub(crate) fn bulk(&self) -> &BulkModeController {
        &self.registry.bulk
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化、HTTP クライアント構築、組み込みトピック集の検証が失敗した場合はエラーを返す。
    pub fn build(config: Config) -> Result<Self> {
        let telemetry = Telemetry::new()?;
        let source = Arc::new(
            TrendLlmClient::new(
                config.trend_llm_base_url(),
                config.trend_llm_api_key().map(str::to_string),
                config.trend_llm_model(),
                config.trend_llm_timeout(),
            )
            .context("failed to build trend LLM client")?,
        );
        Self::from_parts(config, telemetry, source, Arc::new(SystemClock))
    }

    /// 任意のトレンドソースとクロックでレジストリを組み立てる。
    ///
    /// # Errors
    /// 組み込みトピック集の検証が失敗した場合はエラーを返す。
    pub fn from_parts(
        config: Config,
        telemetry: Telemetry,
        source: Arc<dyn TrendSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let tunables = config.tunables();
        let metrics = telemetry.metrics_arc();

        let catalog = FallbackCatalog::builtin().context("invalid fallback topic catalog")?;
        for (audience, count) in catalog.counts() {
            info!(%audience, count, "fallback topics loaded");
        }

        let ledger = Arc::new(DiversityLedger::new(&tunables, Arc::clone(&clock)));
        let bulk = Arc::new(BulkModeController::new(&tunables, Arc::clone(&clock)));
        let cache = Arc::new(TrendCache::new(
            source,
            Arc::clone(&clock),
            Arc::clone(&metrics),
            tunables.cache_ttl,
            config.trend_llm_timeout(),
        ));
        let selector = Arc::new(TopicSelector::new(
            Arc::clone(&ledger),
            Arc::clone(&bulk),
            Arc::clone(&cache),
            catalog,
            clock,
            metrics,
        ));

        Ok(Self {
            config,
            telemetry,
            ledger,
            bulk,
            cache,
            selector,
        })
    }

    /// 定期掃除タスクを起動する。
    #[must_use]
    pub fn spawn_janitor(&self) -> JoinHandle<()> {
        scheduler::spawn_janitor(
            Arc::clone(&self.ledger),
            Arc::clone(&self.cache),
            self.telemetry.metrics_arc(),
            self.config.janitor_interval(),
            self.config.trend_cache_ttl(),
        )
    }

    #[must_use]
    pub fn selector(&self) -> Arc<TopicSelector> {
        Arc::clone(&self.selector)
    }

    #[must_use]
    pub fn ledger(&self) -> Arc<DiversityLedger> {
        Arc::clone(&self.ledger)
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use crate::selection::{SelectionRequest, SelectionTier};
    use crate::topic::{Audience, ContentContext};

    #[tokio::test]
    async fn component_registry_builds_and_selects() {
        let registry = failing_registry();

        let selection = registry
            .selector()
            .select_topic(&SelectionRequest::new(Audience::High, ContentContext::Free))
            .await;

        assert_eq!(selection.tier, SelectionTier::StaticFallback);
        assert_eq!(registry.ledger().stats().tracked_topics, 1);
    }

    #[tokio::test]
    async fn janitor_can_be_spawned_and_stopped() {
        let registry = failing_registry();
        let handle = registry.spawn_janitor();
        handle.abort();
        assert!(handle.await.expect_err("aborted").is_cancelled());
    }
}
