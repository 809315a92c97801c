// src/services/page.rs

//! Schedule page scraper.
//!
//! Fetches a subject's public page and counts the "open slot" markers on it.
//! Which elements count as markers is configuration, since the upstream
//! markup changes without notice.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{AvailabilityReading, Config};
use crate::services::{AvailabilitySource, NameResolver};
use crate::utils::http::create_async_client;
use crate::utils::{collapse_whitespace, is_site_root};

/// Result of a page request before the body is looked at.
enum PageOutcome {
    Body(String),
    Missing,
    Failed(String),
}

/// HTML scraping implementation of [`AvailabilitySource`] and [`NameResolver`].
pub struct PageScraper {
    client: Client,
    url_template: String,
    fetch_timeout: Duration,
    marker_selector: String,
    marker_text: Option<Regex>,
    name_selector: String,
}

impl PageScraper {
    /// Build a scraper from configuration.
    ///
    /// Selectors and the marker regex are checked here so a typo fails at
    /// startup rather than on every fetch.
    pub fn new(config: &Config) -> Result<Self> {
        let scrape = &config.scrape;
        Self::parse_selector(&scrape.marker_selector)?;
        Self::parse_selector(&scrape.name_selector)?;
        let marker_text = scrape
            .marker_text_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| AppError::config(format!("marker_text_pattern: {e}")))?;

        Ok(Self {
            client: create_async_client(&config.http)?,
            url_template: scrape.subject_url_template.clone(),
            fetch_timeout: config.watcher.fetch_timeout(),
            marker_selector: scrape.marker_selector.clone(),
            marker_text,
            name_selector: scrape.name_selector.clone(),
        })
    }

    /// Page URL for a subject.
    pub fn subject_url(&self, subject_id: &str) -> Result<Url> {
        let encoded: String = url::form_urlencoded::byte_serialize(subject_id.as_bytes()).collect();
        Ok(Url::parse(&self.url_template.replace("{id}", &encoded))?)
    }

    async fn get_page(&self, subject_id: &str, timeout: Duration) -> PageOutcome {
        let url = match self.subject_url(subject_id) {
            Ok(url) => url,
            Err(e) => return PageOutcome::Failed(e.to_string()),
        };

        let response = match self.client.get(url.clone()).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return PageOutcome::Failed(format!("request to {url} failed: {e}")),
        };

        if let Some(reading) = Self::classify(&url, response.url(), response.status()) {
            return match reading {
                AvailabilityReading::NotFound => PageOutcome::Missing,
                AvailabilityReading::TransientError(reason) => PageOutcome::Failed(reason),
                AvailabilityReading::Count(_) => PageOutcome::Failed("unexpected count".into()),
            };
        }

        match response.text().await {
            Ok(body) => PageOutcome::Body(body),
            Err(e) => PageOutcome::Failed(format!("reading body of {url} failed: {e}")),
        }
    }

    /// Map the response envelope to a reading, or `None` when the body
    /// should be parsed.
    fn classify(requested: &Url, final_url: &Url, status: StatusCode) -> Option<AvailabilityReading> {
        if is_site_root(requested, final_url) {
            return Some(AvailabilityReading::NotFound);
        }
        match status {
            StatusCode::OK => None,
            StatusCode::NOT_FOUND => Some(AvailabilityReading::NotFound),
            other => Some(AvailabilityReading::TransientError(format!(
                "unexpected status {} from {}",
                other, final_url
            ))),
        }
    }

    /// Count slot markers in a page body.
    fn count_markers(&self, html: &str) -> Result<u32> {
        let document = Html::parse_document(html);
        let selector = Self::parse_selector(&self.marker_selector)?;
        let count = document
            .select(&selector)
            .filter(|element| match &self.marker_text {
                Some(pattern) => pattern.is_match(&element.text().collect::<String>()),
                None => true,
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Text of the first name element, whitespace-normalized.
    fn extract_name(&self, html: &str) -> Result<Option<String>> {
        let document = Html::parse_document(html);
        let selector = Self::parse_selector(&self.name_selector)?;
        Ok(document
            .select(&selector)
            .next()
            .map(|element| collapse_whitespace(&element.text().collect::<String>()))
            .filter(|name| !name.is_empty()))
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

#[async_trait]
impl AvailabilitySource for PageScraper {
    async fn fetch_state(&self, subject_id: &str) -> AvailabilityReading {
        match self.get_page(subject_id, self.fetch_timeout).await {
            PageOutcome::Body(body) => match self.count_markers(&body) {
                Ok(count) => AvailabilityReading::Count(count),
                Err(e) => AvailabilityReading::TransientError(e.to_string()),
            },
            PageOutcome::Missing => AvailabilityReading::NotFound,
            PageOutcome::Failed(reason) => AvailabilityReading::TransientError(reason),
        }
    }
}

#[async_trait]
impl NameResolver for PageScraper {
    async fn resolve_name(&self, subject_id: &str) -> Option<String> {
        let timeout = self.fetch_timeout.max(Duration::from_secs(1)) * 2;
        match self.get_page(subject_id, timeout).await {
            PageOutcome::Body(body) => self.extract_name(&body).unwrap_or_else(|e| {
                log::warn!("Name lookup for {} failed: {}", subject_id, e);
                None
            }),
            PageOutcome::Missing => None,
            PageOutcome::Failed(reason) => {
                log::warn!("Name lookup for {} failed: {}", subject_id, reason);
                None
            }
        }
    }
}
