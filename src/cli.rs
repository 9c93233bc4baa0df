use std::error::Error;
use std::net::SocketAddr;

use atty::Stream;
use clap::{Parser, Subcommand};
use noske_kwic::client::SearchRequest;
use noske_kwic::concordance::{ConcordanceLine, QUERY_SYNTAX_HELP};
use noske_kwic::query::QueryMode;
use noske_kwic::widget::{SearchOutcome, SearchWidget, WidgetConfig};
use serde_json::json;
use termimad::terminal_size;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "noske-kwic", about = "Keyword-in-context search against a NoSketch Engine API", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a concordance search and print the matching lines.
    Search {
        /// The raw search input.
        query: String,
        /// Base URL of the corpus search API.
        #[arg(long)]
        base: String,
        /// Corpus to search.
        #[arg(long)]
        corpus: String,
        /// Query dialect to interpret the input as.
        #[arg(long, value_enum, default_value_t = QueryMode::Simple)]
        mode: QueryMode,
        /// 1-based result page.
        #[arg(long, default_value_t = 1)]
        page: u64,
        /// Lines per page.
        #[arg(long, default_value_t = 20)]
        pagesize: u64,
        /// Comma-separated positional attributes to request.
        #[arg(long, default_value = "word,id")]
        attrs: String,
        /// Comma-separated reference attributes to request.
        #[arg(long, default_value = "doc.id")]
        refs: String,
    },
    /// Look up word-list suggestions for a pattern.
    Suggest {
        /// Pattern to complete.
        pattern: String,
        /// Base URL of the corpus search API.
        #[arg(long)]
        base: String,
        /// Corpus to search.
        #[arg(long)]
        corpus: String,
        /// Attribute to complete against.
        #[arg(long, default_value = "word")]
        attr: String,
        /// Maximum number of suggestions.
        #[arg(short, long, default_value_t = 10)]
        limit: u64,
    },
    /// Serve the embeddable search page over HTTP.
    #[cfg(feature = "web")]
    Serve {
        /// Base URL of the corpus search API.
        #[arg(long)]
        base: String,
        /// Corpus to search.
        #[arg(long)]
        corpus: String,
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    match cli.command {
        Command::Search {
            query,
            base,
            corpus,
            mode,
            page,
            pagesize,
            attrs,
            refs,
        } => runtime.block_on(handle_search(
            query, base, corpus, mode, page, pagesize, attrs, refs, cli.json,
        )),
        Command::Suggest {
            pattern,
            base,
            corpus,
            attr,
            limit,
        } => runtime.block_on(handle_suggest(pattern, base, corpus, attr, limit, cli.json)),
        #[cfg(feature = "web")]
        Command::Serve { base, corpus, addr } => {
            runtime.block_on(handle_serve(base, corpus, addr))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_search(
    query: String,
    base: String,
    corpus: String,
    mode: QueryMode,
    page: u64,
    pagesize: u64,
    attrs: String,
    refs: String,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let widget = SearchWidget::new(WidgetConfig {
        base_url: base,
        request: SearchRequest {
            corpname: corpus,
            attrs,
            refs,
            pagesize: pagesize.max(1),
            ..SearchRequest::default()
        },
        ..WidgetConfig::default()
    })?;

    match widget.run(&query, mode, page).await? {
        SearchOutcome::Hits {
            lines, total, page, ..
        } => {
            if as_json {
                let payload = json!({
                    "query": query,
                    "mode": mode.query_value(),
                    "page": page,
                    "total": total,
                    "lines": lines,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_kwic_table(&lines, total, page);
            }
            Ok(())
        }
        SearchOutcome::NoResults { message, .. } => {
            if as_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "query": query,
                        "total": 0,
                        "lines": [],
                    }))?
                );
            } else {
                println!("{message}");
            }
            Ok(())
        }
        SearchOutcome::UpstreamError { message_html } => {
            let plain = message_html
                .strip_suffix(QUERY_SYNTAX_HELP)
                .unwrap_or(&message_html);
            Err(format!(
                "{plain} (see https://www.sketchengine.eu/documentation/corpus-querying/)"
            )
            .into())
        }
        SearchOutcome::Superseded => Ok(()),
        SearchOutcome::Ignored => Err("Search query is too short".into()),
    }
}

async fn handle_suggest(
    pattern: String,
    base: String,
    corpus: String,
    attr: String,
    limit: u64,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let widget = SearchWidget::new(WidgetConfig {
        base_url: base,
        request: SearchRequest {
            corpname: corpus,
            ..SearchRequest::default()
        },
        ..WidgetConfig::default()
    })?;
    let items = widget.suggest(&pattern, &attr, limit.max(1)).await?;

    if as_json {
        let payload = json!({
            "pattern": pattern,
            "attr": attr,
            "results": items.iter().map(|item| {
                json!({ "term": item.term, "freq": item.freq })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_suggest_table(&pattern, &items);
    }
    Ok(())
}

#[cfg(feature = "web")]
async fn handle_serve(
    base: String,
    corpus: String,
    addr: SocketAddr,
) -> Result<(), Box<dyn Error>> {
    let config = noske_kwic::web::WebConfig {
        addr,
        base_url: base,
        corpname: corpus,
        ..noske_kwic::web::WebConfig::default()
    };
    noske_kwic::web::serve(config).await?;
    Ok(())
}

fn print_kwic_table(lines: &[ConcordanceLine], total: u64, page: u64) {
    if lines.is_empty() {
        println!("No lines on this page.");
        return;
    }
    let context_width = context_column_width(lines);
    println!("Hits: {total} (page {page})");
    for line in lines {
        let left = truncate_left(&line.left, context_width);
        let right = truncate_right(&line.right, context_width);
        println!(
            "{:>lw$}  [{}]  {}",
            left,
            line.kwic,
            right,
            lw = context_width
        );
    }
}

fn print_suggest_table(pattern: &str, items: &[noske_kwic::client::WordlistItem]) {
    if items.is_empty() {
        println!("No suggestions for \"{pattern}\".");
        return;
    }
    let width = items
        .iter()
        .map(|item| item.term.len())
        .max()
        .unwrap_or(4)
        .max("TERM".len());
    println!("{:<width$}  {}", "TERM", "FREQ", width = width);
    println!("{:-<width$}  {}", "", "----", width = width);
    for item in items {
        println!("{:<width$}  {}", item.term, item.freq, width = width);
    }
}

/// Width budget for each context column: a share of the terminal when
/// printing to a tty, otherwise a fixed generous width.
fn context_column_width(lines: &[ConcordanceLine]) -> usize {
    let longest = lines
        .iter()
        .map(|line| line.left.chars().count().max(line.right.chars().count()))
        .max()
        .unwrap_or(0);
    if atty::is(Stream::Stdout) {
        let (cols, _) = terminal_size();
        let budget = (cols.max(60) as usize).saturating_sub(20) / 3;
        longest.min(budget.max(20))
    } else {
        longest.min(80)
    }
}

/// Keeps the tail of the string, which sits next to the keyword.
fn truncate_left(text: &str, width: usize) -> String {
    let count = text.chars().count();
    if count <= width {
        return text.to_string();
    }
    let tail: String = text
        .chars()
        .skip(count.saturating_sub(width.saturating_sub(1)))
        .collect();
    format!("…{tail}")
}

/// Keeps the head of the string, which sits next to the keyword.
fn truncate_right(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let head: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{head}…")
}
