//! HTTP boundary to the corpus search service.
//!
//! The base URL is per-client state rather than a process-wide setting, so
//! multiple widgets on one host can target different APIs without
//! interfering with each other.

use crate::concordance::ConcordanceResponse;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("base URL is not defined or not parseable: {0:?}")]
    InvalidBaseUrl(String),
    #[error("corpus name is not defined")]
    MissingCorpus,
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Kwic,
    Sen,
}

impl ViewMode {
    pub fn query_value(&self) -> &'static str {
        match self {
            ViewMode::Kwic => "kwic",
            ViewMode::Sen => "sen",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Xml,
    Csv,
    Tsv,
    Txt,
    Xls,
}

impl OutputFormat {
    pub fn query_value(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Xml => "xml",
            OutputFormat::Csv => "csv",
            OutputFormat::Tsv => "tsv",
            OutputFormat::Txt => "txt",
            OutputFormat::Xls => "xls",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_value())
    }
}

/// Per-search request parameters. Supplied on every invocation; nothing here
/// persists across page turns except what the controller re-threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub corpname: String,
    pub viewmode: ViewMode,
    /// Comma-separated positional attribute list, e.g. `word,id`.
    pub attrs: String,
    pub format: OutputFormat,
    /// Comma-separated structural elements, e.g. `doc`.
    pub structs: String,
    /// Context window sizes in the server's `<n>#` notation.
    pub kwicrightctx: String,
    pub kwicleftctx: String,
    /// Comma-separated reference attributes, e.g. `doc.id,doc.title`.
    pub refs: String,
    pub pagesize: u64,
    /// 1-based page number.
    pub fromp: u64,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            corpname: String::new(),
            viewmode: ViewMode::Kwic,
            attrs: "word,id".to_string(),
            format: OutputFormat::Json,
            structs: "doc".to_string(),
            kwicrightctx: "100#".to_string(),
            kwicleftctx: "100#".to_string(),
            refs: "doc.id".to_string(),
            pagesize: 20,
            fromp: 1,
        }
    }
}

/// Word-list lookup parameters for autocomplete suggestions.
#[derive(Debug, Clone)]
pub struct WordlistRequest {
    pub corpname: String,
    /// Target attribute, e.g. `word` or `lemma`.
    pub wlattr: String,
    /// Match pattern; the server treats it as a regular expression.
    pub wlpat: String,
    pub wlicase: bool,
    pub wlminfreq: u64,
    pub wlmaxitems: u64,
}

impl Default for WordlistRequest {
    fn default() -> Self {
        Self {
            corpname: String::new(),
            wlattr: "word".to_string(),
            wlpat: String::new(),
            wlicase: true,
            wlminfreq: 1,
            wlmaxitems: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordlistItem {
    #[serde(rename = "str")]
    pub term: String,
    #[serde(default)]
    pub freq: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WordlistResponse {
    #[serde(rename = "Items", default)]
    items: Vec<WordlistItem>,
}

/// Thin client over the concordance and word-list endpoints.
pub struct CorpusClient {
    http: reqwest::Client,
    base: Url,
}

impl CorpusClient {
    /// Fails fast when the base URL is empty or unparseable; this is a
    /// configuration error surfaced at setup time, not at search time.
    pub fn new(base: &str) -> Result<Self, ClientError> {
        let trimmed = base.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ClientError::InvalidBaseUrl(base.to_string()));
        }
        let base = Url::parse(trimmed).map_err(|_| ClientError::InvalidBaseUrl(base.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Fetches one page of concordance results. `q` must already be a
    /// translated query-language string (see [`crate::query::translate`]).
    pub async fn concordance(
        &self,
        q: &str,
        request: &SearchRequest,
    ) -> Result<ConcordanceResponse, ClientError> {
        let url = self.concordance_url(q, request)?;
        debug!(url = %url, "fetching concordance page");
        self.get_json(url).await
    }

    /// Ranked term/frequency entries matching a pattern, used for
    /// autocomplete suggestions.
    pub async fn wordlist(
        &self,
        request: &WordlistRequest,
    ) -> Result<Vec<WordlistItem>, ClientError> {
        let url = self.wordlist_url(request)?;
        debug!(url = %url, "fetching word list");
        let response: WordlistResponse = self.get_json(url).await?;
        Ok(response.items)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status,
            });
        }
        response.json().await.map_err(|source| ClientError::Decode {
            url: url.to_string(),
            source,
        })
    }

    fn concordance_url(&self, q: &str, request: &SearchRequest) -> Result<Url, ClientError> {
        if request.corpname.trim().is_empty() {
            return Err(ClientError::MissingCorpus);
        }
        let mut url = self.join("search/concordance")?;
        url.query_pairs_mut()
            .append_pair("corpname", &request.corpname)
            .append_pair("q", q)
            .append_pair("viewmode", request.viewmode.query_value())
            .append_pair("attrs", &request.attrs)
            .append_pair("format", request.format.query_value())
            .append_pair("structs", &request.structs)
            .append_pair("kwicrightctx", &request.kwicrightctx)
            .append_pair("kwicleftctx", &request.kwicleftctx)
            .append_pair("refs", &request.refs)
            .append_pair("pagesize", &request.pagesize.to_string())
            .append_pair("fromp", &request.fromp.to_string());
        Ok(url)
    }

    fn wordlist_url(&self, request: &WordlistRequest) -> Result<Url, ClientError> {
        if request.corpname.trim().is_empty() {
            return Err(ClientError::MissingCorpus);
        }
        let mut url = self.join("search/wordlist")?;
        url.query_pairs_mut()
            .append_pair("corpname", &request.corpname)
            .append_pair("wlattr", &request.wlattr)
            .append_pair("wlpat", &request.wlpat)
            .append_pair("wlicase", if request.wlicase { "1" } else { "0" })
            .append_pair("wlminfreq", &request.wlminfreq.to_string())
            .append_pair("wlmaxitems", &request.wlmaxitems.to_string());
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(path.split('/'));
        Ok(url)
    }
}
