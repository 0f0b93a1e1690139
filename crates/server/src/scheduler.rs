//! Periodic price refresh.
//!
//! Each pass refreshes the configured tracked products plus the products
//! whose stored record has gone stale, a few at a time, then purges expired
//! cache entries. Failures are logged per product and never stop the loop.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pricekeep_core::{AppConfig, PriceService};
use tokio::time::MissedTickBehavior;

/// Stale products picked up from the store per pass.
const STALE_BATCH: usize = 100;

/// Products refreshed concurrently.
const CONCURRENCY: usize = 4;

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub refreshed: usize,
    pub failed: usize,
    pub purged: u64,
}

pub struct Scheduler {
    service: Arc<PriceService>,
    tracked: Vec<String>,
    interval: Duration,
    freshness_window: Duration,
}

impl Scheduler {
    pub fn new(service: Arc<PriceService>, config: &AppConfig) -> Self {
        Self {
            service,
            tracked: config.tracked_products.clone(),
            interval: config.refresh_interval(),
            freshness_window: config.freshness_window(),
        }
    }

    /// Run passes on the configured interval until `shutdown` completes.
    ///
    /// The first pass starts immediately.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.run_pass().await;
                    tracing::info!(
                        refreshed = report.refreshed,
                        failed = report.failed,
                        purged = report.purged,
                        "refresh pass finished"
                    );
                }
            }
        }
    }

    /// Refresh every due product once.
    pub async fn run_pass(&self) -> PassReport {
        let ids = self.due_products().await;

        let outcomes: Vec<bool> = futures::stream::iter(ids)
            .map(|id| async move {
                match self.service.refresh(&id).await {
                    Ok(resolution) => {
                        tracing::debug!(product_id = %id, price = resolution.price, source = %resolution.source, "refreshed");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(product_id = %id, error = %e, "refresh failed");
                        false
                    }
                }
            })
            .buffer_unordered(CONCURRENCY)
            .collect()
            .await;

        let refreshed = outcomes.iter().filter(|ok| **ok).count();
        let purged = match self.service.cache() {
            Some(cache) => cache.purge_expired().await,
            None => 0,
        };

        PassReport { refreshed, failed: outcomes.len() - refreshed, purged }
    }

    /// Tracked products first, then stale ones, without duplicates.
    async fn due_products(&self) -> Vec<String> {
        let stale = match self
            .service
            .resolver()
            .store()
            .stale_product_ids(self.freshness_window, STALE_BATCH)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(source = "store", error = %e, "failed to list stale products");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        self.tracked
            .iter()
            .map(|id| id.trim().to_string())
            .chain(stale)
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect()
    }
}
