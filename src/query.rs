//! Translation of raw user input into the corpus API's query-language dialects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a raw search string should be interpreted before it is sent upstream.
///
/// `Url` is not a user-facing mode: it marks a query that was recovered from a
/// page URL parameter and is therefore already a fully-formed query-language
/// string. After replaying such a query the visible mode selector falls back
/// to [`QueryMode::Cql`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Simple,
    Cql,
    #[cfg_attr(feature = "cli", value(skip))]
    Url,
}

impl QueryMode {
    pub fn query_value(&self) -> &'static str {
        match self {
            QueryMode::Simple => "simple",
            QueryMode::Cql => "cql",
            QueryMode::Url => "url",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_value())
    }
}

/// Turns a raw free-text string into the API's query-language string.
///
/// - `Simple`: each space-delimited token is quoted independently and the
///   whole expression is prefixed with the query-language entry marker `q`.
///   Every quoted token is followed by a space, including the last one; the
///   upstream grammar tolerates the trailing space and the reference dialect
///   emits it.
/// - `Cql`: the raw text is passed through verbatim behind the `q` marker.
///   The caller is responsible for well-formed CQL; syntax errors come back
///   through the response's error field.
/// - `Url`: the input is already a complete query-language string and is
///   returned unchanged.
pub fn translate(raw: &str, mode: QueryMode) -> String {
    match mode {
        QueryMode::Simple => {
            let mut q = String::from("q");
            for token in raw.split(' ') {
                q.push('"');
                q.push_str(token);
                q.push('"');
                q.push(' ');
            }
            q
        }
        QueryMode::Cql => format!("q{raw}"),
        QueryMode::Url => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_quotes_each_token() {
        assert_eq!(translate("the cat", QueryMode::Simple), "q\"the\" \"cat\" ");
    }

    #[test]
    fn simple_single_token_keeps_trailing_space() {
        assert_eq!(translate("cat", QueryMode::Simple), "q\"cat\" ");
    }

    #[test]
    fn cql_is_identity_behind_entry_marker() {
        assert_eq!(
            translate("[word=\"the\"]", QueryMode::Cql),
            "q[word=\"the\"]"
        );
    }

    #[test]
    fn url_mode_passes_through_unchanged() {
        assert_eq!(translate("q\"the\" \"cat\" ", QueryMode::Url), "q\"the\" \"cat\" ");
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&QueryMode::Cql).unwrap(), "\"cql\"");
        assert_eq!(
            serde_json::from_str::<QueryMode>("\"simple\"").unwrap(),
            QueryMode::Simple
        );
    }
}
