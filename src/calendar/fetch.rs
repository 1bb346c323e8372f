//! Feed retrieval with validation, rate limiting and last-known-good
//! fallback.
//!
//! A short network or feed outage at exactly the trigger instant must not
//! block a scheduled action, so every failure path falls back to the cached
//! event list when one exists. The cache is only ever overwritten by a
//! successful fetch.

use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;

use crate::calendar::{self, common};
use crate::models::{CalendarEvent, ScheduleState, Settings};
use crate::utils::logging;

/// Minimum spacing between live fetches; inside this window the cache is
/// served instead.
pub const MIN_FETCH_INTERVAL_MINUTES: i64 = 5;

/// Raw feed retrieval capability. The production implementation speaks HTTPS
/// via reqwest; tests substitute canned bodies and failures.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_raw(&self, url: &str) -> Result<String>;
}

pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent("staylock/1.0")
            .connect_timeout(std::time::Duration::from_secs(20))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {e}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_raw(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP {}", response.status()));
        }

        response
            .text()
            .await
            .map_err(|e| anyhow!("failed to read response body: {e}"))
    }
}

/// Fetches and parses the calendar feed, updating `state` in place.
///
/// Guards run in order: the HTTPS gate (never bypassed, even when forced),
/// then the rate limit (bypassed by `force` or the debug override), then
/// retrieval and container validation. Success replaces the cache and the
/// fetch timestamp; any failure leaves `state` untouched and serves the
/// cached list, or `None` when no cache exists; the caller must then skip
/// the action and surface the outage to the user.
pub async fn fetch_events(
    source: &dyn FeedSource,
    settings: &Settings,
    state: &mut ScheduleState,
    now: DateTime<Utc>,
    force: bool,
) -> Option<Vec<CalendarEvent>> {
    if let Err(e) = common::validate_feed_url(&settings.calendar_url) {
        log::error!("[Calendar] Refusing fetch: {}", e);
        return cached_fallback(state);
    }

    if !force && !settings.rate_limit_override {
        if let Some(last) = state.last_fetch {
            let age = now - last;
            if age < Duration::minutes(MIN_FETCH_INTERVAL_MINUTES) {
                log::debug!(
                    "[Calendar] Rate limited ({}s since last fetch), serving cache",
                    age.num_seconds()
                );
                return cached_fallback(state);
            }
        }
    }

    let started = Instant::now();
    let body = match source.fetch_raw(&settings.calendar_url).await {
        Ok(body) => body,
        Err(e) => {
            log::warn!("[Calendar] Fetch failed: {}", e);
            return cached_fallback(state);
        }
    };

    if body.trim().is_empty() || !common::has_container(&body) {
        log::warn!(
            "[Calendar] Response is not a calendar feed ({} bytes), treating as fetch failure",
            body.len()
        );
        return cached_fallback(state);
    }

    let events = calendar::parse(settings.format, &body);
    logging::log_feed_fetch(
        &settings.calendar_url,
        events.len(),
        started.elapsed().as_millis() as u64,
    );

    state.cached_events = Some(events.clone());
    state.last_fetch = Some(now);
    Some(events)
}

fn cached_fallback(state: &ScheduleState) -> Option<Vec<CalendarEvent>> {
    match &state.cached_events {
        Some(events) => {
            log::info!(
                "[Calendar] Serving {} cached events as fallback",
                events.len()
            );
            Some(events.clone())
        }
        None => None,
    }
}
