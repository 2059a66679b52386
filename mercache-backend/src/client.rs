//! HTTP client for a SPARQL backend.
//!
//! The backend speaks two result protocols over the same query URL:
//! tab-separated values (`Accept: text/tab-separated-values`) for
//! human-readable rows whose last column is a WKT literal, and a binary
//! protocol (`Accept: application/octet-stream`) that returns one
//! little-endian `u64` entity id per result row. Response bodies are
//! streamed; any response compression the server offers is decoded
//! transparently.

use mercache_core::{mem, IdMapping};
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BackendError, Result};
use crate::query::prep_query_row;

/// Row cap advertised to the backend via the `send` URL parameter.
pub const MAX_ROWS: u64 = u64::MAX;

/// Accept header for the TSV protocol.
pub const ACCEPT_TSV: &str = "text/tab-separated-values";

/// Accept header for the binary-id protocol.
pub const ACCEPT_IDS: &str = "application/octet-stream";

/// Backend endpoint configuration.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BackendConfig {
    /// Backend root URL (e.g. `http://localhost:7001`).
    pub url: String,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl BackendConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Client for one SPARQL backend.
#[derive(Debug, Clone)]
pub struct SparqlBackend {
    http: Client,
    base_url: String,
}

impl SparqlBackend {
    /// Create a client for the given backend root URL. Trailing slashes
    /// are stripped.
    pub fn new(base_url: &str) -> Self {
        Self::from_config(&BackendConfig::new(base_url))
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        // no overall timeout: geometry downloads stream for minutes
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Assemble the request URL for a query.
    ///
    /// `LIMIT` and `OFFSET` are appended to the query text when the text
    /// does not already mention them.
    pub fn query_url(&self, query: &str, offset: u64, limit: u64) -> Result<Url> {
        let mut q = query.to_string();
        let lower = q.to_lowercase();
        if !lower.contains("limit") {
            q.push_str(&format!(" LIMIT {limit}"));
        }
        if !lower.contains("offset") {
            q.push_str(&format!(" OFFSET {offset}"));
        }

        Url::parse_with_params(
            &format!("{}/", self.base_url),
            &[("send", MAX_ROWS.to_string()), ("query", q)],
        )
        .map_err(|e| BackendError::Protocol(format!("invalid backend URL: {e}")))
    }

    /// Issue a query and return the checked, still-streaming response.
    ///
    /// Dropping the response aborts the transfer; this is how parse
    /// failures cancel an in-flight download.
    pub async fn open_stream(
        &self,
        query: &str,
        offset: u64,
        limit: u64,
        accept: &str,
    ) -> Result<Response> {
        let url = self.query_url(query, offset, limit)?;
        debug!(%url, accept, "requesting");

        let resp = self.http.get(url).header(ACCEPT, accept).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        Ok(resp)
    }

    /// Run a count query and parse the single integer it returns.
    pub async fn fetch_count(&self, count_query: &str) -> Result<u64> {
        let mut resp = self.open_stream(count_query, 0, 1, ACCEPT_TSV).await?;

        let mut in_header = true;
        let mut dangling = String::new();
        while let Some(chunk) = resp.chunk().await? {
            for &b in chunk.iter() {
                if in_header {
                    if b == b'\n' {
                        in_header = false;
                    }
                    continue;
                }
                dangling.push(b as char);
            }
        }

        let trimmed = dangling.trim().trim_start_matches('"');
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits
            .parse()
            .map_err(|_| BackendError::Protocol(format!("unparsable count row: {trimmed:?}")))
    }

    /// Fetch the binary id stream for a query: one little-endian `u64`
    /// per result row, returned as `IdMapping { qid, id: row }`.
    ///
    /// `max_memory` bounds the resident size while the list grows.
    pub async fn fetch_ids(&self, query: &str, max_memory: usize) -> Result<Vec<IdMapping>> {
        let mut resp = self.open_stream(query, 0, MAX_ROWS, ACCEPT_IDS).await?;

        let mut ids: Vec<IdMapping> = Vec::new();
        let mut buf = [0u8; 8];
        let mut have = 0;
        let mut row = 0u64;

        while let Some(chunk) = resp.chunk().await? {
            mem::check_mem(chunk.len(), max_memory)?;
            for &b in chunk.iter() {
                buf[have] = b;
                have += 1;
                if have == 8 {
                    have = 0;
                    ids.push(IdMapping::new(u64::from_le_bytes(buf), row));
                    row += 1;
                }
            }
        }

        if have != 0 {
            warn!(trailing = have, "binary id stream ended mid-value");
        }
        info!(rows = ids.len(), "received binary id rows");
        Ok(ids)
    }

    /// Fetch one result row of a query as `(column, value)` pairs.
    pub async fn fetch_row(&self, query: &str, row: u64) -> Result<Vec<(String, String)>> {
        let q = prep_query_row(query, row);
        let resp = self.open_stream(&q, 0, 1, ACCEPT_TSV).await?;
        let text = resp.text().await?;

        let mut lines = text.lines();
        let header = lines.next().unwrap_or("");
        let Some(row_line) = lines.next() else {
            return Ok(Vec::new());
        };

        Ok(header
            .split('\t')
            .zip(row_line.split('\t'))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .collect())
    }
}
