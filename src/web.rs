use crate::client::SearchRequest;
use crate::query::QueryMode;
use crate::widget::{
    Replayed, SearchOutcome, SearchWidget, WidgetConfig, WidgetError, parse_page_url_query,
};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Query, RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::info;

type SharedState = Arc<AppState>;

pub struct AppState {
    pub widget: SearchWidget,
    pub placeholder: String,
    pub title: String,
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub base_url: String,
    pub corpname: String,
    pub placeholder: String,
    pub title: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_url: String::new(),
            corpname: String::new(),
            placeholder: "Search the corpus".to_string(),
            title: "Corpus Concordance Search".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
    Widget(WidgetError),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
            WebError::Widget(err) => write!(f, "widget error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

impl From<WidgetError> for WebError {
    fn from(value: WidgetError) -> Self {
        WebError::Widget(value)
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let widget = SearchWidget::new(WidgetConfig {
        base_url: config.base_url.clone(),
        request: SearchRequest {
            corpname: config.corpname.clone(),
            ..SearchRequest::default()
        },
        ..WidgetConfig::default()
    })?;
    let state = Arc::new(AppState {
        widget,
        placeholder: config.placeholder.clone(),
        title: config.title.clone(),
    });
    let router = build_router(state);
    info!(
        %config.addr,
        base = %config.base_url,
        corpus = %config.corpname,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl From<WidgetError> for ApiError {
    fn from(value: WidgetError) -> Self {
        ApiError::bad_gateway(value.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(search_page))
        .route("/search", get(search_page))
        .route("/api/concordance", get(api_concordance))
        .route("/api/suggest", get(api_suggest))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "noske-kwic-web" }))
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    input: Option<String>,
    mode: Option<QueryMode>,
    fromp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiSearchParams {
    query: Option<String>,
    mode: Option<QueryMode>,
    page: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SuggestParams {
    q: Option<String>,
    attr: Option<String>,
    limit: Option<u64>,
}

/// The widget page. A page URL carrying a serialized `q` parameter replays
/// that exact search; otherwise a submitted `input` runs a fresh one; with
/// neither the empty shell is rendered.
async fn search_page(
    State(state): State<SharedState>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> impl IntoResponse {
    let raw_query = raw_query.unwrap_or_default();
    let is_replay = parse_page_url_query(&raw_query, state.widget.request_defaults()).is_some()
        && params.input.is_none();

    let view = if is_replay {
        match state.widget.replay(&raw_query).await {
            Ok(Replayed {
                outcome,
                input_value,
                mode,
            }) => PageView::from_outcome(&state, outcome, input_value, mode),
            Err(err) => return Html(render_error_page(&state.title, err.to_string())),
        }
    } else if let Some(input) = params.input.as_deref().filter(|s| !s.trim().is_empty()) {
        let mode = params.mode.unwrap_or_default();
        let page = params.fromp.unwrap_or(1);
        match state.widget.run(input, mode, page).await {
            Ok(outcome) => PageView::from_outcome(&state, outcome, input.to_string(), mode),
            Err(err) => return Html(render_error_page(&state.title, err.to_string())),
        }
    } else {
        PageView::empty(&state)
    };

    let template = SearchPageTemplate {
        title: &state.title,
        view: &view,
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(&state.title, err.to_string())),
    )
}

async fn api_concordance(
    State(state): State<SharedState>,
    Query(params): Query<ApiSearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing query parameter"))?;
    let mode = params.mode.unwrap_or_default();
    let page = params.page.unwrap_or(1);
    match state.widget.run(query, mode, page).await? {
        SearchOutcome::Hits {
            lines, total, page, ..
        } => Ok(Json(json!({ "lines": lines, "total": total, "page": page }))),
        SearchOutcome::NoResults { .. } => {
            Ok(Json(json!({ "lines": [], "total": 0, "page": page })))
        }
        SearchOutcome::UpstreamError { message_html } => {
            Err(ApiError::bad_request(message_html))
        }
        SearchOutcome::Superseded => Err(ApiError::bad_request("superseded by a newer search")),
        SearchOutcome::Ignored => Err(ApiError::bad_request("query too short")),
    }
}

async fn api_suggest(
    State(state): State<SharedState>,
    Query(params): Query<SuggestParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pattern = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing q parameter"))?;
    let attr = params.attr.as_deref().unwrap_or("word");
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let items = state.widget.suggest(pattern, attr, limit).await?;
    Ok(Json(json!({ "items": items })))
}

/// Per-request view model for the widget page. The HTML fragments are
/// pre-rendered by the widget and trusted; everything else is escaped by the
/// template.
struct PageView {
    input_value: String,
    cql_selected: bool,
    placeholder: String,
    hits_html: String,
    pagination_html: String,
    stats_html: String,
    notice: Option<String>,
    error_html: Option<String>,
    page_url_query: Option<String>,
}

impl PageView {
    fn empty(state: &AppState) -> Self {
        Self {
            input_value: String::new(),
            cql_selected: false,
            placeholder: state.placeholder.clone(),
            hits_html: String::new(),
            pagination_html: String::new(),
            stats_html: String::new(),
            notice: None,
            error_html: None,
            page_url_query: None,
        }
    }

    fn from_outcome(
        state: &AppState,
        outcome: SearchOutcome,
        input_value: String,
        mode: QueryMode,
    ) -> Self {
        let mut view = Self {
            input_value,
            cql_selected: mode == QueryMode::Cql,
            ..Self::empty(state)
        };
        match outcome {
            SearchOutcome::Hits {
                rendered,
                page_url_query,
                ..
            } => {
                view.hits_html = rendered.hits_html;
                view.pagination_html = rendered.pagination_html;
                view.stats_html = rendered.stats_html;
                view.page_url_query = Some(page_url_query);
            }
            SearchOutcome::NoResults {
                message,
                page_url_query,
            } => {
                view.notice = Some(message);
                view.page_url_query = Some(page_url_query);
            }
            SearchOutcome::UpstreamError { message_html } => {
                view.error_html = Some(message_html);
            }
            SearchOutcome::Superseded => {}
            SearchOutcome::Ignored => {
                view.notice = Some("Enter a longer search query.".to_string());
            }
        }
        view
    }
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{{ title }}</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="bg-slate-50 text-slate-900">
    <main class="min-h-screen flex flex-col items-center justify-start py-10 px-4">
      <div class="max-w-5xl w-full space-y-6">
        <h1 class="text-4xl font-extrabold tracking-tight">{{ title }}</h1>
        <form method="get" action="/" class="flex flex-wrap gap-3 items-center">
          <select name="mode" class="basis-2/12 p-2 rounded border border-slate-300">
            <option value="simple"{% if !view.cql_selected %} selected{% endif %}>simple</option>
            <option value="cql"{% if view.cql_selected %} selected{% endif %}>cql</option>
          </select>
          <input
            type="search"
            name="input"
            value="{{ view.input_value }}"
            placeholder="{{ view.placeholder }}"
            class="grow p-2 rounded border border-slate-300"
          />
          <button type="submit" class="inline-flex items-center rounded-md bg-slate-900 px-4 py-2 text-white font-semibold shadow hover:bg-slate-800 transition-colors">Search</button>
        </form>
        {% if view.error_html.is_some() %}
        <div id="noske-error" class="text-red-600">{{ view.error_html.as_ref().unwrap()|safe }}</div>
        {% endif %}
        {% if view.notice.is_some() %}
        <div id="noske-notice" class="text-slate-600">{{ view.notice.as_ref().unwrap() }}</div>
        {% endif %}
        <div id="noske-stats">{{ view.stats_html|safe }}</div>
        <div id="noske-hits">{{ view.hits_html|safe }}</div>
        <div id="noske-pagination">{{ view.pagination_html|safe }}</div>
        {% if view.page_url_query.is_some() %}
        <script>
          history.replaceState(null, "", "?{{ view.page_url_query.as_ref().unwrap()|safe }}");
        </script>
        {% endif %}
      </div>
    </main>
  </body>
</html>
"#,
    ext = "html"
)]
struct SearchPageTemplate<'a> {
    title: &'a str,
    view: &'a PageView,
}

fn render_error_page(title: &str, message: impl Into<String>) -> String {
    let template = ErrorPageTemplate {
        title,
        message: message.into(),
    };
    template
        .render()
        .unwrap_or_else(|err| format!("render failure: {err}"))
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>{{ title }}</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="bg-slate-50 text-slate-900">
    <main class="min-h-screen flex flex-col items-center justify-center px-4">
      <div class="max-w-xl w-full bg-white shadow rounded p-6 space-y-3">
        <h1 class="text-2xl font-bold">Something went wrong</h1>
        <p class="text-slate-600">{{ message }}</p>
        <a href="/" class="text-blue-500">Back to search</a>
      </div>
    </main>
  </body>
</html>
"#,
    ext = "html"
)]
struct ErrorPageTemplate<'a> {
    title: &'a str,
    message: String,
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let widget = SearchWidget::new(WidgetConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request: SearchRequest {
                corpname: "testcorpus".to_string(),
                ..SearchRequest::default()
            },
            ..WidgetConfig::default()
        })
        .unwrap();
        let state = Arc::new(AppState {
            widget,
            placeholder: "Search the corpus".to_string(),
            title: "Corpus Concordance Search".to_string(),
        });
        build_router(state)
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload["status"], "ok");
    }

    #[tokio::test]
    async fn empty_page_renders_search_shell() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("name=\"input\""));
        assert!(html.contains("<option value=\"cql\""));
        assert!(html.contains("id=\"noske-hits\""));
    }

    #[tokio::test]
    async fn short_input_is_ignored_without_a_fetch() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/?input=ab&mode=simple").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("Enter a longer search query."));
    }

    #[tokio::test]
    async fn api_concordance_requires_query() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/api/concordance").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_suggest_requires_pattern() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/api/suggest").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_concordance_rejects_short_query() {
        let router = test_router();
        let response = router
            .oneshot(
                Request::get("/api/concordance?query=ab")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
