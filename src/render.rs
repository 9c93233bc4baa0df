//! HTML rendering of mapped concordance lines, the page selector, and the
//! hit-count line.
//!
//! Everything here produces owned HTML strings. The `web` feature composes
//! them into a full page; embedders consuming the library directly place the
//! fragments into their own markup.

use crate::concordance::{self, ConcordanceLine};
use askama::Template;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use url::Url;

/// Per-line URL transform: receives the mapped line, returns the link target.
pub type TransformFn = Box<dyn Fn(&ConcordanceLine) -> Url + Send + Sync>;

/// Full renderer override: receives all mapped lines plus the total hit
/// count and returns the complete results markup.
pub type CustomRenderFn = Box<dyn Fn(&[ConcordanceLine], u64) -> String + Send + Sync>;

/// How each result line resolves its link target.
///
/// Strategies form an explicit priority order — `Custom` over `Synoptic`
/// over `Transform` over `BuiltIn` — so configuring several at once has a
/// defined outcome: the highest-priority one wins.
pub enum LinkStrategy {
    /// Replaces the built-in results rendering entirely. Pagination and
    /// stats fragments are not produced when this is active.
    Custom(CustomRenderFn),
    /// Render keywords as plain text tagged with a synthetic per-row id and
    /// hand the id → line map back to the embedder, which attaches its own
    /// click handling once the rows are in the DOM.
    Synoptic,
    /// Per-line URL callback.
    Transform(TransformFn),
    /// Link built from the configured base, the line's document id, a
    /// keyword-match marker parameter, and an identifier fragment.
    BuiltIn,
}

impl LinkStrategy {
    fn priority(&self) -> u8 {
        match self {
            LinkStrategy::Custom(_) => 0,
            LinkStrategy::Synoptic => 1,
            LinkStrategy::Transform(_) => 2,
            LinkStrategy::BuiltIn => 3,
        }
    }
}

impl fmt::Debug for LinkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStrategy::Custom(_) => f.write_str("Custom(..)"),
            LinkStrategy::Synoptic => f.write_str("Synoptic"),
            LinkStrategy::Transform(_) => f.write_str("Transform(..)"),
            LinkStrategy::BuiltIn => f.write_str("BuiltIn"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// One table row per line, one column per non-document reference, fixed
    /// trailing columns for left context, keyword, and right context.
    #[default]
    Table,
    /// One block per line with inline context and references as a caption.
    Card,
}

/// CSS class strings for every rendered region. Defaults mirror the
/// reference widget's Tailwind classes.
#[derive(Debug, Clone)]
pub struct CssClasses {
    pub container: String,
    pub table: String,
    pub thead: String,
    pub tr_head: String,
    pub th: String,
    pub tbody: String,
    pub tr_body: String,
    pub td: String,
    pub left: String,
    pub kwic: String,
    pub right: String,
    pub card: String,
    pub caption: String,
    pub pagination_div: String,
    pub pagination_select: String,
    pub stats_div: String,
    pub stats_label: String,
}

impl Default for CssClasses {
    fn default() -> Self {
        Self {
            container: "p-2".to_string(),
            table: "table".to_string(),
            thead: String::new(),
            tr_head: "text-center".to_string(),
            th: "text-sm text-gray-500 p-2".to_string(),
            tbody: String::new(),
            tr_body: "p-2".to_string(),
            td: "text-center text-sm text-gray-500 p-2".to_string(),
            left: "text-sm text-gray-500 p-2 text-right".to_string(),
            kwic: "text-lg text-red-500 p-2 text-center".to_string(),
            right: "text-sm text-gray-500 p-2 text-left".to_string(),
            card: "p-2 border".to_string(),
            caption: "text-xs text-gray-500".to_string(),
            pagination_div: "p-2".to_string(),
            pagination_select: "basis-2/12 p-2".to_string(),
            stats_div: "flex flex-row m-2".to_string(),
            stats_label: "p-2".to_string(),
        }
    }
}

/// Rendering configuration. All fields fall back to built-in defaults; only
/// presence is validated.
pub struct RenderConfig {
    pub layout: Layout,
    /// Configured link strategies; the highest-priority entry wins. Empty
    /// means [`LinkStrategy::BuiltIn`].
    pub strategies: Vec<LinkStrategy>,
    /// Result URL base. Absolute when it starts with `http`, otherwise
    /// resolved against `origin`.
    pub link_base: String,
    /// Additional query parameters attached to every built-in result link.
    pub extra_params: Vec<(String, String)>,
    /// Origin of the embedding page, used to resolve a relative `link_base`.
    pub origin: Option<Url>,
    /// The positional attribute list the search was issued with; needed to
    /// pull the per-line identifier out of the joined attribute string.
    pub attrs: String,
    /// Markup shown when a search produced no lines. Embedder-supplied and
    /// rendered verbatim.
    pub empty_message: String,
    pub stats_label: String,
    pub css: CssClasses,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            layout: Layout::Table,
            strategies: Vec::new(),
            link_base: String::new(),
            extra_params: Vec::new(),
            origin: None,
            attrs: "word,id".to_string(),
            empty_message: "No Hits found. Please try another search query.".to_string(),
            stats_label: "Hits:".to_string(),
            css: CssClasses::default(),
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("layout", &self.layout)
            .field("strategies", &self.strategies)
            .field("link_base", &self.link_base)
            .field("extra_params", &self.extra_params)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

/// Rendered HTML fragments for one page of results.
#[derive(Debug, Clone, Default)]
pub struct RenderedHits {
    pub hits_html: String,
    pub pagination_html: String,
    pub stats_html: String,
    /// Synthetic id → line map, present only when the synoptic strategy was
    /// active. The embedder attaches one click handler per entry after the
    /// rows are in the DOM.
    pub synoptic: Option<BTreeMap<String, ConcordanceLine>>,
}

enum RowLink {
    Href(String),
    Synoptic(String),
}

struct HitRow {
    ref_cells: Vec<String>,
    caption: String,
    left: String,
    kwic: String,
    right: String,
    link: RowLink,
}

#[derive(Template)]
#[template(
    source = r#"<div class="{{ css.container }}">
  <table class="{{ css.table }}">
    <thead class="{{ css.thead }}">
      <tr class="{{ css.tr_head }}">
        {%- for key in header_refs %}
        <th class="{{ css.th }}">{{ key }}</th>
        {%- endfor %}
        <th class="{{ css.th }}">Left KWIC</th>
        <th class="{{ css.th }}">Context</th>
        <th class="{{ css.th }}">Right KWIC</th>
      </tr>
    </thead>
    <tbody class="{{ css.tbody }}">
      {%- for row in rows %}
      <tr class="{{ css.tr_body }}">
        {%- for cell in row.ref_cells %}
        <td class="{{ css.td }}">{{ cell }}</td>
        {%- endfor %}
        <td class="{{ css.left }}">{{ row.left }}</td>
        <td class="{{ css.kwic }}">
          {%- match row.link %}
          {%- when RowLink::Href with (href) %}
          <a href="{{ href }}">{{ row.kwic }}</a>
          {%- when RowLink::Synoptic with (id) %}
          <span id="{{ id }}" class="synoptic-kwic">{{ row.kwic }}</span>
          {%- endmatch %}
        </td>
        <td class="{{ css.right }}">{{ row.right }}</td>
      </tr>
      {%- endfor %}
    </tbody>
  </table>
</div>"#,
    ext = "html"
)]
struct TableTemplate<'a> {
    css: &'a CssClasses,
    header_refs: &'a [String],
    rows: &'a [HitRow],
}

#[derive(Template)]
#[template(
    source = r#"<div class="{{ css.container }}">
  {%- for row in rows %}
  <article class="{{ css.card }}">
    <p>
      <span class="{{ css.left }}">{{ row.left }}</span>
      {%- match row.link %}
      {%- when RowLink::Href with (href) %}
      <a class="{{ css.kwic }}" href="{{ href }}">{{ row.kwic }}</a>
      {%- when RowLink::Synoptic with (id) %}
      <span id="{{ id }}" class="synoptic-kwic {{ css.kwic }}">{{ row.kwic }}</span>
      {%- endmatch %}
      <span class="{{ css.right }}">{{ row.right }}</span>
    </p>
    {%- if row.caption.len() > 0 %}
    <p class="{{ css.caption }}">{{ row.caption }}</p>
    {%- endif %}
  </article>
  {%- endfor %}
</div>"#,
    ext = "html"
)]
struct CardTemplate<'a> {
    css: &'a CssClasses,
    rows: &'a [HitRow],
}

struct PageOption {
    number: u64,
    selected: bool,
}

#[derive(Template)]
#[template(
    source = r#"<div class="{{ css.pagination_div }}">
  <form method="get" action="">
    {%- for param in params %}
    <input type="hidden" name="{{ param.0 }}" value="{{ param.1 }}" />
    {%- endfor %}
    <select name="fromp" class="{{ css.pagination_select }}" onchange="this.form.submit()">
      {%- for page in pages %}
      <option value="{{ page.number }}"{% if page.selected %} selected{% endif %}>{{ page.number }}</option>
      {%- endfor %}
    </select>
  </form>
</div>"#,
    ext = "html"
)]
struct PaginationTemplate<'a> {
    css: &'a CssClasses,
    params: &'a [(String, String)],
    pages: Vec<PageOption>,
}

#[derive(Template)]
#[template(
    source = r#"<div class="{{ css.stats_div }}"><label class="{{ css.stats_label }}">{{ label }} {{ total }}</label></div>"#,
    ext = "html"
)]
struct StatsTemplate<'a> {
    css: &'a CssClasses,
    label: &'a str,
    total: u64,
}

/// Renders one page of results.
///
/// `form_params` is the full search parameter set minus the page number; the
/// pagination form re-submits it as hidden fields so that every page turn
/// issues a fresh fetch with an up-to-date page count.
pub fn render(
    lines: &[ConcordanceLine],
    total: u64,
    page_size: u64,
    current_page: u64,
    config: &RenderConfig,
    form_params: &[(String, String)],
) -> RenderedHits {
    let strategy = resolve_strategy(&config.strategies);

    if let LinkStrategy::Custom(renderer) = strategy {
        return RenderedHits {
            hits_html: renderer(lines, total),
            ..RenderedHits::default()
        };
    }

    if lines.is_empty() {
        return RenderedHits {
            hits_html: config.empty_message.clone(),
            ..RenderedHits::default()
        };
    }

    let mut synoptic = matches!(strategy, LinkStrategy::Synoptic).then(BTreeMap::new);
    let rows: Vec<HitRow> = lines
        .iter()
        .enumerate()
        .map(|(index, line)| build_row(index, line, strategy, config, synoptic.as_mut()))
        .collect();

    let hits_html = match config.layout {
        Layout::Table => {
            let header_refs = header_ref_keys(lines);
            TableTemplate {
                css: &config.css,
                header_refs: &header_refs,
                rows: &rows,
            }
            .render()
            .unwrap_or_default()
        }
        Layout::Card => CardTemplate {
            css: &config.css,
            rows: &rows,
        }
        .render()
        .unwrap_or_default(),
    };

    let pages = concordance::page_count(total, page_size);
    let pagination_html = if pages > 0 {
        PaginationTemplate {
            css: &config.css,
            params: form_params,
            pages: (1..=pages)
                .map(|number| PageOption {
                    number,
                    selected: number == current_page,
                })
                .collect(),
        }
        .render()
        .unwrap_or_default()
    } else {
        String::new()
    };

    let stats_html = if total > 0 {
        StatsTemplate {
            css: &config.css,
            label: &config.stats_label,
            total,
        }
        .render()
        .unwrap_or_default()
    } else {
        String::new()
    };

    RenderedHits {
        hits_html,
        pagination_html,
        stats_html,
        synoptic,
    }
}

fn resolve_strategy(strategies: &[LinkStrategy]) -> &LinkStrategy {
    static BUILT_IN: LinkStrategy = LinkStrategy::BuiltIn;
    strategies
        .iter()
        .min_by_key(|s| s.priority())
        .unwrap_or(&BUILT_IN)
}

fn build_row(
    index: usize,
    line: &ConcordanceLine,
    strategy: &LinkStrategy,
    config: &RenderConfig,
    synoptic: Option<&mut BTreeMap<String, ConcordanceLine>>,
) -> HitRow {
    let link = match strategy {
        LinkStrategy::Synoptic => {
            let id = synthetic_row_id(index, line, &config.attrs);
            if let Some(map) = synoptic {
                map.insert(id.clone(), line.clone());
            }
            RowLink::Synoptic(id)
        }
        LinkStrategy::Transform(transform) => RowLink::Href(transform(line).to_string()),
        _ => RowLink::Href(built_in_href(line, config)),
    };
    let ref_cells: Vec<String> = line
        .refs
        .iter()
        .filter(|r| !r.is_empty())
        .map(|r| r.split_once('=').map_or(r.as_str(), |(_, v)| v).to_string())
        .collect();
    HitRow {
        caption: line
            .refs
            .iter()
            .filter(|r| !r.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
        ref_cells,
        left: line.left.clone(),
        kwic: line.kwic.clone(),
        right: line.right.clone(),
        link,
    }
}

/// Column headers: the keys of the first line's non-empty references. Every
/// line of a response carries the same reference set, so the first line is
/// representative.
fn header_ref_keys(lines: &[ConcordanceLine]) -> Vec<String> {
    lines
        .first()
        .map(|line| {
            line.refs
                .iter()
                .filter(|r| !r.is_empty())
                .map(|r| r.split_once('=').map_or(r.as_str(), |(k, _)| k).to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Synthetic per-row identifier for synoptic-view rendering: row index,
/// document id, and the resolved identifier attribute (falling back to the
/// row index when the attribute list carries no `id`).
fn synthetic_row_id(index: usize, line: &ConcordanceLine, attrs: &str) -> String {
    let doc = concordance::doc_id(&line.refs).unwrap_or("doc");
    let ident = line
        .kwic_attr
        .as_deref()
        .and_then(|attr| concordance::id_attr(attr, attrs))
        .map(str::to_string)
        .unwrap_or_else(|| index.to_string());
    format!("kwic-{index}-{doc}-{ident}")
}

fn built_in_href(line: &ConcordanceLine, config: &RenderConfig) -> String {
    let mut base = if config.link_base.starts_with("http") {
        config.link_base.clone()
    } else if let Some(origin) = &config.origin {
        origin
            .join(&config.link_base)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| config.link_base.clone())
    } else {
        config.link_base.clone()
    };
    if !base.ends_with('/') {
        base.push('/');
    }

    let doc = concordance::doc_id(&line.refs).unwrap_or_default();
    let mut href = format!("{base}{doc}?mark={}", encode_component(line.kwic.trim()));
    for (name, value) in &config.extra_params {
        href.push('&');
        href.push_str(&encode_component(name));
        href.push('=');
        href.push_str(&encode_component(value));
    }

    // Prefer the stable per-line identifier; fall back to the refs hash.
    match line
        .kwic_attr
        .as_deref()
        .and_then(|attr| concordance::id_attr(attr, &config.attrs))
    {
        Some(ident) => {
            href.push('#');
            href.push_str(ident);
        }
        None => {
            debug!(refs = ?line.refs, "no id attribute resolved, using refs fragment");
            href.push_str(&concordance::hash_fragment(&line.refs));
        }
    }
    href
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(refs: &[&str]) -> ConcordanceLine {
        ConcordanceLine {
            left: "over the".to_string(),
            kwic: "lazy dog".to_string(),
            right: "again".to_string(),
            kwic_attr: Some("/tok-5".to_string()),
            refs: refs.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn lines() -> Vec<ConcordanceLine> {
        vec![
            line(&["doc.id=42", "p.id=", "head.id=7"]),
            line(&["doc.id=43", "p.id=", "head.id=9"]),
        ]
    }

    #[test]
    fn empty_lines_render_only_the_empty_message() {
        let config = RenderConfig::default();
        let rendered = render(&[], 0, 20, 1, &config, &[]);
        assert_eq!(rendered.hits_html, config.empty_message);
        assert!(rendered.pagination_html.is_empty());
        assert!(rendered.stats_html.is_empty());
        assert!(!rendered.hits_html.contains("<table"));
    }

    #[test]
    fn table_view_renders_one_row_per_line_and_ref_columns() {
        let rendered = render(&lines(), 45, 20, 1, &RenderConfig::default(), &[]);
        assert_eq!(rendered.hits_html.matches("<tr class=\"p-2\">").count(), 2);
        // header: doc.id, p.id, head.id plus the three static columns
        assert!(rendered.hits_html.contains(">doc.id</th>"));
        assert!(rendered.hits_html.contains(">head.id</th>"));
        assert!(rendered.hits_html.contains(">Left KWIC</th>"));
        assert!(rendered.hits_html.contains(">Context</th>"));
        assert!(rendered.hits_html.contains(">Right KWIC</th>"));
        assert!(rendered.hits_html.contains("over the"));
        assert!(rendered.hits_html.contains("lazy dog"));
    }

    #[test]
    fn pagination_offers_exactly_ceil_total_over_pagesize_options() {
        let rendered = render(&lines(), 45, 20, 2, &RenderConfig::default(), &[]);
        assert_eq!(rendered.pagination_html.matches("<option").count(), 3);
        assert!(rendered.pagination_html.contains("value=\"2\" selected"));
        assert!(rendered.pagination_html.contains("name=\"fromp\""));
    }

    #[test]
    fn pagination_form_carries_hidden_search_params() {
        let params = vec![
            ("q".to_string(), "q\"the\" ".to_string()),
            ("corpname".to_string(), "abacus".to_string()),
        ];
        let rendered = render(&lines(), 45, 20, 1, &RenderConfig::default(), &params);
        assert!(rendered.pagination_html.contains("name=\"corpname\" value=\"abacus\""));
        assert!(rendered.pagination_html.contains("name=\"q\""));
    }

    #[test]
    fn stats_fragment_shows_label_and_total() {
        let rendered = render(&lines(), 45, 20, 1, &RenderConfig::default(), &[]);
        assert!(rendered.stats_html.contains("Hits: 45"));
    }

    #[test]
    fn built_in_link_uses_doc_id_mark_param_and_id_fragment() {
        let config = RenderConfig {
            link_base: "https://edition.example.org/view".to_string(),
            attrs: "word,id".to_string(),
            ..RenderConfig::default()
        };
        let rendered = render(&lines(), 2, 20, 1, &config, &[]);
        assert!(
            rendered
                .hits_html
                .contains("href=\"https://edition.example.org/view/42?mark=lazy%20dog#tok-5\""),
            "got: {}",
            rendered.hits_html
        );
    }

    #[test]
    fn built_in_link_falls_back_to_refs_hash_without_id_attr() {
        let mut l = line(&["doc.id=42", "p.id=", "head.id=7"]);
        l.kwic_attr = None;
        let config = RenderConfig {
            link_base: "https://edition.example.org".to_string(),
            ..RenderConfig::default()
        };
        let rendered = render(&[l], 1, 20, 1, &config, &[]);
        assert!(rendered.hits_html.contains("#7\""));
    }

    #[test]
    fn relative_base_resolves_against_origin() {
        let config = RenderConfig {
            link_base: "edition".to_string(),
            origin: Some(Url::parse("https://host.example.org").unwrap()),
            ..RenderConfig::default()
        };
        let rendered = render(&lines(), 2, 20, 1, &config, &[]);
        assert!(rendered.hits_html.contains("https://host.example.org/edition/42"));
    }

    #[test]
    fn extra_params_are_appended_to_built_in_links() {
        let config = RenderConfig {
            link_base: "https://edition.example.org".to_string(),
            extra_params: vec![("img".to_string(), "on".to_string())],
            ..RenderConfig::default()
        };
        let rendered = render(&lines(), 2, 20, 1, &config, &[]);
        assert!(rendered.hits_html.contains("&img=on#"));
    }

    #[test]
    fn transform_strategy_takes_the_callback_url() {
        let config = RenderConfig {
            strategies: vec![LinkStrategy::Transform(Box::new(|line| {
                let doc = concordance::doc_id(&line.refs).unwrap_or_default();
                Url::parse(&format!("https://custom.example.org/{doc}")).unwrap()
            }))],
            ..RenderConfig::default()
        };
        let rendered = render(&lines(), 2, 20, 1, &config, &[]);
        assert!(rendered.hits_html.contains("href=\"https://custom.example.org/42\""));
    }

    #[test]
    fn synoptic_strategy_tags_rows_and_returns_the_line_map() {
        let config = RenderConfig {
            strategies: vec![LinkStrategy::Synoptic],
            ..RenderConfig::default()
        };
        let rendered = render(&lines(), 2, 20, 1, &config, &[]);
        assert!(!rendered.hits_html.contains("<a href"));
        assert!(rendered.hits_html.contains("id=\"kwic-0-42-tok-5\""));
        let map = rendered.synoptic.expect("synoptic map");
        assert_eq!(map.len(), 2);
        assert_eq!(map["kwic-1-43-tok-5"].refs[0], "doc.id=43");
    }

    #[test]
    fn synoptic_outranks_transform() {
        let config = RenderConfig {
            strategies: vec![
                LinkStrategy::Transform(Box::new(|_| {
                    Url::parse("https://custom.example.org/").unwrap()
                })),
                LinkStrategy::Synoptic,
            ],
            ..RenderConfig::default()
        };
        let rendered = render(&lines(), 2, 20, 1, &config, &[]);
        assert!(rendered.synoptic.is_some());
        assert!(!rendered.hits_html.contains("custom.example.org"));
    }

    #[test]
    fn custom_renderer_overrides_everything() {
        let config = RenderConfig {
            strategies: vec![
                LinkStrategy::Synoptic,
                LinkStrategy::Custom(Box::new(|lines, total| {
                    format!("<p>{} of {total}</p>", lines.len())
                })),
            ],
            ..RenderConfig::default()
        };
        let rendered = render(&lines(), 45, 20, 1, &config, &[]);
        assert_eq!(rendered.hits_html, "<p>2 of 45</p>");
        assert!(rendered.pagination_html.is_empty());
        assert!(rendered.stats_html.is_empty());
        assert!(rendered.synoptic.is_none());
    }

    #[test]
    fn card_view_renders_blocks_with_ref_captions() {
        let config = RenderConfig {
            layout: Layout::Card,
            ..RenderConfig::default()
        };
        let rendered = render(&lines(), 2, 20, 1, &config, &[]);
        assert_eq!(rendered.hits_html.matches("<article").count(), 2);
        assert!(rendered.hits_html.contains("doc.id=42, p.id=, head.id=7"));
        assert!(!rendered.hits_html.contains("<table"));
    }

    #[test]
    fn html_in_context_text_is_escaped() {
        let mut l = line(&["doc.id=42"]);
        l.left = "<script>alert(1)</script>".to_string();
        let rendered = render(&[l], 1, 20, 1, &RenderConfig::default(), &[]);
        assert!(!rendered.hits_html.contains("<script>"));
        assert!(rendered.hits_html.contains("&lt;script&gt;"));
    }
}
