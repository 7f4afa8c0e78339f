use crate::config::Settings;
use crate::http::build_probe_client;
use crate::marketplace::detector;
use crate::models::MarketplaceLink;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::{
    sync::Semaphore,
    time::{Duration, timeout},
};
use tracing::{info, warn};

/// Slack on top of the per-request timeout for the outer guard, which also
/// covers body decoding and result detection.
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The page shows at least one listing (or no signal contradicted it).
    Listings,
    /// The page explicitly reports zero results.
    Empty,
    /// Fetch or parse failed; nothing was learned about the link.
    Inconclusive,
}

impl ProbeOutcome {
    fn label(self) -> &'static str {
        match self {
            ProbeOutcome::Listings => "listings",
            ProbeOutcome::Empty => "empty",
            ProbeOutcome::Inconclusive => "inconclusive",
        }
    }
}

#[derive(Debug, Error)]
enum ProbeError {
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(StatusCode),
    #[error("unreadable body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Request(err.to_string())
        }
    }
}

/// Probes candidate links concurrently and drops the ones whose search page
/// is confirmed empty. Cheap to clone; clones share the connection pool and
/// the fan-out limit.
///
/// The timeout applies per link once it holds a permit. Time spent waiting
/// for a permit is not counted, so `validate` takes at most
/// `ceil(links / max_concurrent) * (timeout + 250ms)`.
#[derive(Clone)]
pub struct LinkValidator {
    http: Client,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl LinkValidator {
    pub fn new(http: Client, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            http,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            build_probe_client(),
            settings.link_validation_timeout,
            settings.link_validation_concurrency,
        )
    }

    /// Returns the links worth showing, in input order.
    ///
    /// Failed probes keep their link. If every probe failed, or every page was
    /// confirmed empty, only the first input link is returned. Empty input
    /// stays empty.
    pub async fn validate(&self, links: Vec<MarketplaceLink>) -> Vec<MarketplaceLink> {
        let Some(first) = links.first().cloned() else {
            return links;
        };
        let total = links.len();
        info!(
            target = "photosearch.validator",
            count = total,
            "validating_marketplace_links"
        );

        let handles = links
            .iter()
            .cloned()
            .map(|link| {
                let validator = self.clone();
                tokio::spawn(async move { validator.probe(&link).await })
            })
            .collect::<Vec<_>>();

        let outcomes = join_all(handles)
            .await
            .into_iter()
            .zip(&links)
            .map(|(joined, link)| match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(
                        target = "photosearch.validator",
                        url = %link.url(),
                        error = %err,
                        "probe_task_failed_keeping_link"
                    );
                    ProbeOutcome::Inconclusive
                }
            })
            .collect::<Vec<_>>();

        let all_inconclusive = outcomes.iter().all(|o| *o == ProbeOutcome::Inconclusive);
        let survivors = if all_inconclusive {
            Vec::new()
        } else {
            links
                .into_iter()
                .zip(&outcomes)
                .filter(|(_, outcome)| **outcome != ProbeOutcome::Empty)
                .map(|(link, _)| link)
                .collect::<Vec<_>>()
        };

        if survivors.is_empty() {
            warn!(
                target = "photosearch.validator",
                url = %first.url(),
                all_inconclusive,
                "no_confirmed_links_returning_first"
            );
            crate::metrics::validation_fallback(first.marketplace().as_str());
            return vec![first];
        }

        info!(
            target = "photosearch.validator",
            kept = survivors.len(),
            total,
            "validation_complete"
        );
        survivors
    }

    async fn probe(&self, link: &MarketplaceLink) -> ProbeOutcome {
        let started = Instant::now();
        // The semaphore is never closed, so acquisition only fails on shutdown.
        let Ok(_permit) = self.permits.acquire().await else {
            return ProbeOutcome::Inconclusive;
        };

        let outcome = match timeout(self.timeout + TIMEOUT_GRACE, self.fetch(link)).await {
            Ok(Ok(body)) => {
                if detector::has_results(&body, link.marketplace().as_str()) {
                    ProbeOutcome::Listings
                } else {
                    ProbeOutcome::Empty
                }
            }
            Ok(Err(err)) => {
                warn!(
                    target = "photosearch.validator",
                    url = %link.url(),
                    error = %err,
                    "probe_failed_keeping_link"
                );
                ProbeOutcome::Inconclusive
            }
            Err(_) => {
                warn!(
                    target = "photosearch.validator",
                    url = %link.url(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "probe_timed_out_keeping_link"
                );
                ProbeOutcome::Inconclusive
            }
        };

        let elapsed_ms = started.elapsed().as_millis();
        info!(
            target = "photosearch.validator",
            marketplace = link.marketplace().as_str(),
            outcome = outcome.label(),
            elapsed_ms = elapsed_ms as u64,
            "link_probed"
        );
        crate::metrics::link_probe(link.marketplace().as_str(), outcome.label(), elapsed_ms);
        outcome
    }

    async fn fetch(&self, link: &MarketplaceLink) -> Result<String, ProbeError> {
        let response = self
            .http
            .get(link.url())
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status));
        }
        response
            .text()
            .await
            .map_err(|err| match ProbeError::from(err) {
                ProbeError::Request(detail) => ProbeError::Body(detail),
                other => other,
            })
    }
}
