//! Embeddable keyword-in-context (KWIC) concordance search against a
//! NoSketch Engine style HTTP API.
//!
//! The crate splits into a pure core and two delivery surfaces:
//!
//! - [`query`] translates raw user input into the API's query dialects.
//! - [`client`] owns the HTTP boundary, one base URL per client.
//! - [`concordance`] maps wire responses into normalized KWIC lines.
//! - [`render`] turns lines into HTML fragments with configurable CSS
//!   classes and per-line link strategies.
//! - [`widget`] is the controller tying the above together, including the
//!   page-URL contract for reproducing a search on reload.
//! - [`web`] (feature `web`) serves the widget as a self-contained page.

pub mod client;
pub mod concordance;
pub mod query;
pub mod render;
pub mod widget;

#[cfg(feature = "web")]
pub mod web;

pub use client::{ClientError, CorpusClient, SearchRequest, WordlistItem, WordlistRequest};
pub use concordance::{ConcordanceLine, ConcordanceResponse};
pub use query::QueryMode;
pub use render::{CssClasses, Layout, LinkStrategy, RenderConfig, RenderedHits};
pub use widget::{SearchOutcome, SearchWidget, WidgetConfig, WidgetError};
