//! Concordance response schema and the mapping into normalized KWIC rows.

use serde::{Deserialize, Serialize};

/// Help-link suffix appended to upstream query errors. The message plus this
/// suffix is treated as pre-sanitized markup: it originates from the API
/// operator, not from end-user input, and is rendered verbatim.
pub const QUERY_SYNTAX_HELP: &str = " see documentation at <a target=\"_blank\" class=\"text-blue-500\" href=\"https://www.sketchengine.eu/documentation/corpus-querying/\">https://www.sketchengine.eu/documentation/corpus-querying/</a>";

/// One positional token of a concordance line region.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Token {
    /// The token's surface form.
    #[serde(rename = "str", default)]
    pub text: String,
    /// Slash-joined secondary attribute values (everything after the `word`
    /// attribute in the requested attribute list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseLine {
    #[serde(rename = "Left", default)]
    pub left: Vec<Token>,
    #[serde(rename = "Kwic", default)]
    pub kwic: Vec<Token>,
    #[serde(rename = "Right", default)]
    pub right: Vec<Token>,
    /// Structural reference attributes as `key=value` strings. Server-defined
    /// order, which is meaningful: the first `doc.*` ref conventionally
    /// identifies the document.
    #[serde(rename = "Refs", default)]
    pub refs: Vec<String>,
}

/// Wire shape of the concordance endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConcordanceResponse {
    #[serde(rename = "Lines", default)]
    pub lines: Vec<ResponseLine>,
    /// Declared full result-set size, independent of the requested page.
    #[serde(default)]
    pub fullsize: Option<u64>,
    /// Upstream query/server error. When present the line list is not
    /// meaningful and rendering short-circuits to the message.
    #[serde(default)]
    pub error: Option<String>,
}

/// A normalized keyword-in-context row. Created per response line, consumed
/// by the renderer, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcordanceLine {
    pub left: String,
    pub kwic: String,
    pub right: String,
    /// Slash-joined secondary attributes of the keyword tokens, used to pull
    /// out a stable per-line identifier by positional index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kwic_attr: Option<String>,
    pub refs: Vec<String>,
}

/// Flattens the response's line list into [`ConcordanceLine`]s, preserving
/// input order. An empty line list maps to an empty vector, which callers
/// must treat as the no-results case.
pub fn map_lines(response: &ConcordanceResponse) -> Vec<ConcordanceLine> {
    response
        .lines
        .iter()
        .map(|line| ConcordanceLine {
            left: join_tokens(&line.left),
            kwic: join_tokens(&line.kwic),
            right: join_tokens(&line.right),
            kwic_attr: join_attrs(&line.kwic),
            refs: line.refs.clone(),
        })
        .collect()
}

/// The declared full result-set size, 0 when the response omits it.
pub fn extract_total(response: &ConcordanceResponse) -> u64 {
    response.fullsize.unwrap_or(0)
}

/// Number of selectable result pages. Recomputed on every fetch; never
/// cached across searches.
pub fn page_count(total: u64, page_size: u64) -> u64 {
    total.div_ceil(page_size.max(1))
}

/// Upstream error message with the static query-syntax help link attached.
pub fn error_with_help(message: &str) -> String {
    format!("{message}{QUERY_SYNTAX_HELP}")
}

/// Value of the first reference whose key starts with `doc.id`.
pub fn doc_id(refs: &[String]) -> Option<&str> {
    refs.iter()
        .find(|r| r.starts_with("doc.id"))
        .and_then(|r| r.split_once('='))
        .map(|(_, value)| value)
}

/// `#`-joined values of all non-document references, excluding refs with an
/// empty value. Used as the fallback link fragment when no per-line
/// identifier attribute is available.
pub fn hash_fragment(refs: &[String]) -> String {
    refs.iter()
        .filter(|r| !r.is_empty() && !r.starts_with("doc"))
        .filter_map(|r| r.split_once('='))
        .filter(|(_, value)| !value.is_empty())
        .map(|(_, value)| format!("#{value}"))
        .collect()
}

/// Resolves the per-line identifier from the joined secondary-attribute
/// string by the position of `id` in the configured attribute list. The
/// `word` attribute occupies segment 0 (the attribute string carries a
/// leading slash), so positions line up with the comma-separated list.
pub fn id_attr<'a>(kwic_attr: &'a str, attrs: &str) -> Option<&'a str> {
    let index = attrs.split(',').position(|a| a.trim() == "id")?;
    kwic_attr.split('/').nth(index).filter(|s| !s.is_empty())
}

fn join_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_attrs(tokens: &[Token]) -> Option<String> {
    let joined = tokens
        .iter()
        .filter_map(|t| t.attr.as_deref())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() { None } else { Some(joined) }
}
