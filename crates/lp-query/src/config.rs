//! # Query Configuration
//!
//! Settings shared by every query a service creates. Deserialized from the
//! `[store]` and `[timeline]` tables of the TOML config file; every field has
//! a default so a missing file or section is fine.

use std::path::PathBuf;

use lp_io::StoreConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub timeline: TimelineSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Size of each result page in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Directory for result pages (system temp directory if unset).
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            dir: None,
        }
    }
}

impl StoreSettings {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            page_size: self.page_size,
            dir: self.dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineSettings {
    /// Width of one timeline bucket.
    #[serde(default = "default_span_secs")]
    pub span_secs: i64,
    /// Source stages report the timeline every this many records.
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            span_secs: default_span_secs(),
            flush_every: default_flush_every(),
        }
    }
}

fn default_page_size() -> usize {
    lp_io::page::DEFAULT_PAGE_SIZE
}
fn default_span_secs() -> i64 {
    60
}
fn default_flush_every() -> usize {
    1000
}
