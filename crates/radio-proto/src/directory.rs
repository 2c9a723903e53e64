//! radio-browser directory client.
//!
//! Every query degrades to an empty list on failure: callers treat "no
//! results" and "directory unreachable" the same way.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::DirectoryConfig;
use crate::protocol::{Facet, Station};

/// Search filters.  Empty strings mean "not set".
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub name: String,
    pub country: String,
    pub tag: String,
    pub limit: u32,
    pub offset: u32,
}

impl SearchQuery {
    pub fn page(name: &str, country: &str, tag: &str, page: u32, page_size: u32) -> Self {
        Self {
            name: name.trim().to_string(),
            country: country.trim().to_string(),
            tag: tag.trim().to_string(),
            limit: page_size,
            offset: page.saturating_mul(page_size),
        }
    }

    fn is_filtered(&self) -> bool {
        !self.name.is_empty() || !self.country.is_empty() || !self.tag.is_empty()
    }
}

#[derive(Clone)]
pub struct DirectoryClient {
    base_url: String,
    client: Client,
}

impl DirectoryClient {
    pub fn new(config: &DirectoryConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("radio-web/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Unfiltered queries list the most clicked stations; any filter
    /// switches to the search endpoint.
    pub async fn search(&self, query: &SearchQuery) -> Vec<Station> {
        let endpoint = if query.is_filtered() {
            "stations/search"
        } else {
            "stations/topclick"
        };
        let mut params: Vec<(&str, String)> = Vec::new();
        if !query.name.is_empty() {
            params.push(("name", query.name.clone()));
        }
        params.push(("limit", query.limit.to_string()));
        params.push(("offset", query.offset.to_string()));
        params.push(("hidebroken", "true".to_string()));
        params.push(("order", "clickcount".to_string()));
        params.push(("reverse", "true".to_string()));
        if !query.country.is_empty() {
            params.push(("country", query.country.clone()));
        }
        if !query.tag.is_empty() {
            params.push(("tag", query.tag.clone()));
        }

        self.get_list(endpoint, &params).await
    }

    pub async fn list_countries(&self) -> Vec<Facet> {
        self.get_list("countries", &facet_params()).await
    }

    pub async fn list_tags(&self) -> Vec<Facet> {
        self.get_list("tags", &facet_params()).await
    }

    /// Popularity ping for a played station.  Errors are ignored.
    pub async fn send_click(&self, stationuuid: &str) {
        let url = format!("{}/url/{}", self.base_url, stationuuid);
        if let Err(e) = self.client.get(&url).send().await {
            debug!("directory: click ping for {} failed: {}", stationuuid, e);
        }
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Vec<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        match self.fetch::<Vec<T>>(&url, params).await {
            Ok(items) => {
                debug!("directory: {} returned {} items", endpoint, items.len());
                items
            }
            Err(e) => {
                warn!("directory: {} failed: {}", endpoint, e);
                Vec::new()
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let response = self.client.get(url).query(params).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }
        Ok(response.json::<T>().await?)
    }
}

fn facet_params() -> Vec<(&'static str, String)> {
    vec![
        ("order", "stationcount".to_string()),
        ("reverse", "true".to_string()),
        ("limit", "100".to_string()),
    ]
}
