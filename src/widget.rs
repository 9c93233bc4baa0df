//! The controller: wires query translation, the HTTP boundary, response
//! mapping, and rendering together, and owns the page-URL contract.

use crate::client::{ClientError, CorpusClient, SearchRequest, WordlistItem, WordlistRequest};
use crate::concordance::{self, ConcordanceLine};
use crate::query::{self, QueryMode};
use crate::render::{self, RenderConfig, RenderedHits};
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Widget construction parameters. Base URL and corpus name are required;
/// everything else falls back to the reference widget's defaults.
pub struct WidgetConfig {
    pub base_url: String,
    pub request: SearchRequest,
    pub render: RenderConfig,
    /// Queries shorter than this are ignored without a fetch.
    pub min_query_len: usize,
    /// Gates per-response debug logging.
    pub debug: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request: SearchRequest::default(),
            render: RenderConfig::default(),
            min_query_len: 3,
            debug: false,
        }
    }
}

/// Result of one search invocation.
#[derive(Debug)]
pub enum SearchOutcome {
    Hits {
        rendered: RenderedHits,
        lines: Vec<ConcordanceLine>,
        total: u64,
        page: u64,
        /// Serialized parameter set for the page URL (history replacement).
        page_url_query: String,
    },
    /// The response carried no lines; show the configured message instead of
    /// the result shell.
    NoResults {
        message: String,
        page_url_query: String,
    },
    /// The upstream rejected the query. The message is pre-sanitized markup
    /// (server message plus the static help link) and is shown verbatim.
    UpstreamError { message_html: String },
    /// A newer search was issued while this one was in flight; the stale
    /// response is dropped instead of overwriting fresher results.
    Superseded,
    /// Query shorter than the configured minimum; no fetch was made.
    Ignored,
}

/// A search replayed from a page URL query string.
#[derive(Debug)]
pub struct Replayed {
    pub outcome: SearchOutcome,
    /// Value to put back into the search input: the query with the leading
    /// entry marker stripped.
    pub input_value: String,
    /// Mode to show in the selector. `url` is not user-facing, so replays
    /// always report [`QueryMode::Cql`].
    pub mode: QueryMode,
}

pub struct SearchWidget {
    client: CorpusClient,
    request: SearchRequest,
    render: RenderConfig,
    min_query_len: usize,
    debug: bool,
    seq: AtomicU64,
}

impl SearchWidget {
    /// Fails fast on a missing base URL or corpus name; both are fatal
    /// configuration errors, not search-time conditions.
    pub fn new(config: WidgetConfig) -> Result<Self, WidgetError> {
        let client = CorpusClient::new(&config.base_url)?;
        if config.request.corpname.trim().is_empty() {
            return Err(WidgetError::Client(ClientError::MissingCorpus));
        }
        Ok(Self {
            client,
            request: config.request,
            render: config.render,
            min_query_len: config.min_query_len,
            debug: config.debug,
            seq: AtomicU64::new(0),
        })
    }

    pub fn client(&self) -> &CorpusClient {
        &self.client
    }

    pub fn request_defaults(&self) -> &SearchRequest {
        &self.request
    }

    pub fn render_config(&self) -> &RenderConfig {
        &self.render
    }

    /// Translates and runs a raw user query against the widget's default
    /// request parameters.
    pub async fn run(
        &self,
        raw_query: &str,
        mode: QueryMode,
        page: u64,
    ) -> Result<SearchOutcome, WidgetError> {
        if raw_query.trim().len() < self.min_query_len {
            return Ok(SearchOutcome::Ignored);
        }
        let q = query::translate(raw_query, mode);
        let mut request = self.request.clone();
        request.fromp = page.max(1);
        self.run_translated(&q, request).await
    }

    /// Runs an already-translated query-language string.
    pub async fn run_translated(
        &self,
        q: &str,
        request: SearchRequest,
    ) -> Result<SearchOutcome, WidgetError> {
        let token = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let response = self.client.concordance(q, &request).await?;
        if self.seq.load(Ordering::SeqCst) != token {
            debug!(token, "dropping superseded concordance response");
            return Ok(SearchOutcome::Superseded);
        }
        if self.debug {
            debug!(
                query = %q,
                page = request.fromp,
                lines = response.lines.len(),
                fullsize = response.fullsize,
                "concordance response"
            );
        }

        if let Some(error) = &response.error {
            return Ok(SearchOutcome::UpstreamError {
                message_html: concordance::error_with_help(error),
            });
        }

        let page_url_query = page_url_query(q, &request);
        let lines = concordance::map_lines(&response);
        if lines.is_empty() {
            return Ok(SearchOutcome::NoResults {
                message: self.render.empty_message.clone(),
                page_url_query,
            });
        }

        let total = concordance::extract_total(&response);
        let form_params = pagination_form_params(q, &request);
        let rendered = render::render(
            &lines,
            total,
            request.pagesize,
            request.fromp,
            &self.render,
            &form_params,
        );
        Ok(SearchOutcome::Hits {
            rendered,
            lines,
            total,
            page: request.fromp,
            page_url_query,
        })
    }

    /// Replays a search serialized into a page URL query string. The query
    /// is treated as already translated (`url` mode); the other parameters
    /// override the widget defaults where present.
    pub async fn replay(&self, query_string: &str) -> Result<Replayed, WidgetError> {
        let (q, request) = match parse_page_url_query(query_string, &self.request) {
            Some(parsed) => parsed,
            None => {
                return Ok(Replayed {
                    outcome: SearchOutcome::Ignored,
                    input_value: String::new(),
                    mode: QueryMode::Cql,
                });
            }
        };
        let input_value = q.strip_prefix('q').unwrap_or(&q).to_string();
        let outcome = self.run_translated(&q, request).await?;
        Ok(Replayed {
            outcome,
            input_value,
            mode: QueryMode::Cql,
        })
    }

    /// Word-list suggestions for autocomplete, using the widget's corpus.
    pub async fn suggest(
        &self,
        pattern: &str,
        attr: &str,
        limit: u64,
    ) -> Result<Vec<WordlistItem>, WidgetError> {
        let request = WordlistRequest {
            corpname: self.request.corpname.clone(),
            wlattr: attr.to_string(),
            wlpat: format!("{pattern}.*"),
            wlmaxitems: limit,
            ..WordlistRequest::default()
        };
        Ok(self.client.wordlist(&request).await?)
    }
}

/// Serializes the full search state for history replacement. Reloading a
/// page with this query string reproduces the search via [`SearchWidget::replay`].
pub fn page_url_query(q: &str, request: &SearchRequest) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer
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
        .append_pair("fromp", &request.fromp.to_string())
        .append_pair("selectQueryValue", QueryMode::Url.query_value());
    serializer.finish()
}

/// The same parameter set as [`page_url_query`] minus the page number, which
/// the pagination selector itself supplies.
fn pagination_form_params(q: &str, request: &SearchRequest) -> Vec<(String, String)> {
    vec![
        ("corpname".to_string(), request.corpname.clone()),
        ("q".to_string(), q.to_string()),
        ("viewmode".to_string(), request.viewmode.query_value().to_string()),
        ("attrs".to_string(), request.attrs.clone()),
        ("format".to_string(), request.format.query_value().to_string()),
        ("structs".to_string(), request.structs.clone()),
        ("kwicrightctx".to_string(), request.kwicrightctx.clone()),
        ("kwicleftctx".to_string(), request.kwicleftctx.clone()),
        ("refs".to_string(), request.refs.clone()),
        ("pagesize".to_string(), request.pagesize.to_string()),
        (
            "selectQueryValue".to_string(),
            QueryMode::Url.query_value().to_string(),
        ),
    ]
}

/// Parses a page URL query string back into a translated query plus request
/// parameters. Returns `None` when no `q` parameter is present. Parameters
/// missing from the string keep the supplied defaults.
pub fn parse_page_url_query(
    query_string: &str,
    defaults: &SearchRequest,
) -> Option<(String, SearchRequest)> {
    let mut q: Option<String> = None;
    let mut request = defaults.clone();
    let trimmed = query_string.trim_start_matches('?');
    for (name, value) in form_urlencoded::parse(trimmed.as_bytes()) {
        match name.as_ref() {
            "q" => q = Some(value.into_owned()),
            "corpname" => request.corpname = value.into_owned(),
            "viewmode" => {
                if let Some(viewmode) = from_query_value(&value) {
                    request.viewmode = viewmode;
                }
            }
            "attrs" => request.attrs = value.into_owned(),
            "format" => {
                if let Some(format) = from_query_value(&value) {
                    request.format = format;
                }
            }
            "structs" => request.structs = value.into_owned(),
            "kwicrightctx" => request.kwicrightctx = value.into_owned(),
            "kwicleftctx" => request.kwicleftctx = value.into_owned(),
            "refs" => request.refs = value.into_owned(),
            "pagesize" => {
                if let Ok(pagesize) = value.parse() {
                    request.pagesize = pagesize;
                }
            }
            "fromp" => {
                if let Ok(fromp) = value.parse::<u64>() {
                    request.fromp = fromp.max(1);
                }
            }
            _ => {}
        }
    }
    q.map(|q| (q, request))
}

fn from_query_value<T: serde::de::DeserializeOwned>(value: &Cow<'_, str>) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{OutputFormat, ViewMode};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn request() -> SearchRequest {
        SearchRequest {
            corpname: "abacus".to_string(),
            fromp: 2,
            ..SearchRequest::default()
        }
    }

    #[test]
    fn widget_requires_base_url_and_corpus() {
        let missing_base = WidgetConfig {
            request: request(),
            ..WidgetConfig::default()
        };
        assert!(SearchWidget::new(missing_base).is_err());

        let missing_corpus = WidgetConfig {
            base_url: "https://noske.example.org".to_string(),
            ..WidgetConfig::default()
        };
        assert!(matches!(
            SearchWidget::new(missing_corpus),
            Err(WidgetError::Client(ClientError::MissingCorpus))
        ));

        let valid = WidgetConfig {
            base_url: "https://noske.example.org".to_string(),
            request: request(),
            ..WidgetConfig::default()
        };
        assert!(SearchWidget::new(valid).is_ok());
    }

    #[test]
    fn page_url_query_round_trips_through_parse() {
        let q = "q\"the\" \"cat\" ";
        let serialized = page_url_query(q, &request());
        assert!(serialized.contains("selectQueryValue=url"));

        let (parsed_q, parsed) =
            parse_page_url_query(&serialized, &SearchRequest::default()).expect("q present");
        assert_eq!(parsed_q, q);
        assert_eq!(parsed, request());
    }

    #[test]
    fn parse_without_q_is_none() {
        assert!(parse_page_url_query("corpname=abacus", &SearchRequest::default()).is_none());
        assert!(parse_page_url_query("", &SearchRequest::default()).is_none());
    }

    #[test]
    fn parse_keeps_defaults_for_missing_params() {
        let defaults = request();
        let (q, parsed) = parse_page_url_query("q=q%22x%22%20&fromp=3", &defaults).unwrap();
        assert_eq!(q, "q\"x\" ");
        assert_eq!(parsed.corpname, "abacus");
        assert_eq!(parsed.fromp, 3);
        assert_eq!(parsed.pagesize, 20);
    }

    #[test]
    fn parse_accepts_enum_query_values() {
        let (_, parsed) =
            parse_page_url_query("q=qx&viewmode=sen&format=xml", &request()).unwrap();
        assert_eq!(parsed.viewmode, ViewMode::Sen);
        assert_eq!(parsed.format, OutputFormat::Xml);
    }

    /// Serves a canned JSON body for every request. The first connection is
    /// delayed so two overlapping searches resolve out of order.
    async fn stub_server(body: &'static str, first_delay: Duration) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut first = true;
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                let delay = if first { first_delay } else { Duration::ZERO };
                first = false;
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn stale_response_is_dropped_when_a_newer_search_was_issued() {
        let body = r#"{"Lines":[{"Kwic":[{"str":"cat"}]}],"fullsize":1}"#;
        let addr = stub_server(body, Duration::from_millis(200)).await;
        let widget = Arc::new(
            SearchWidget::new(WidgetConfig {
                base_url: format!("http://{addr}"),
                request: request(),
                ..WidgetConfig::default()
            })
            .unwrap(),
        );

        let slow = {
            let widget = Arc::clone(&widget);
            tokio::spawn(async move {
                let request = widget.request_defaults().clone();
                widget.run_translated("q\"cat\" ", request).await
            })
        };
        // Let the first fetch get in flight before issuing the second.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fast = widget
            .run_translated("q\"cat\" ", widget.request_defaults().clone())
            .await
            .unwrap();
        let slow = slow.await.unwrap().unwrap();

        assert!(matches!(fast, SearchOutcome::Hits { total: 1, .. }));
        assert!(matches!(slow, SearchOutcome::Superseded));
    }

    #[test]
    fn pagination_params_omit_fromp() {
        let params = pagination_form_params("qx", &request());
        assert!(params.iter().all(|(name, _)| name != "fromp"));
        assert!(params.iter().any(|(name, value)| name == "q" && value == "qx"));
        assert!(
            params
                .iter()
                .any(|(name, value)| name == "selectQueryValue" && value == "url")
        );
    }
}
