//! `${name}` template expansion.
//!
//! Rendering never fails: unknown names become `N/A`, and anything that is
//! not a complete `${...}` token is copied through verbatim.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::board::{Card, ResolvedFields};

/// Text substituted for names nothing resolves.
pub const NOT_AVAILABLE: &str = "N/A";

pub const DEFAULT_CARD_TEMPLATE: &str = "${card.name} ${card.url}";
pub const DEFAULT_SUMMARY_TEMPLATE: &str = "${count} card(s) in ${list} ${url}";
pub const DEFAULT_ALL_CLEAR_TEMPLATE: &str = "ALL CLEAR: no matching cards in ${list} ${url}";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^{}$]*)\}").unwrap());

/// List-level values available to summary and all-clear templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryContext<'a> {
    pub list: &'a str,
    pub url: &'a str,
    pub count: usize,
}

pub struct MessageRenderer;

impl MessageRenderer {
    /// Expand `template` for one card.
    ///
    /// Custom fields take precedence over the `card.*` built-ins.
    pub fn render(template: &str, card: &Card, fields: &ResolvedFields) -> String {
        Self::expand(template, |name| {
            if let Some(value) = fields.get(name) {
                return Some(value.to_string());
            }
            match name {
                "card.name" => Some(card.name.clone()),
                "card.url" => Some(card.url.clone()),
                "card.id" => Some(card.id.clone()),
                "card.labels" => Some(card.label_names()),
                _ => None,
            }
        })
    }

    /// Expand a list-level template (summary or all-clear).
    pub fn render_summary(template: &str, ctx: &SummaryContext<'_>) -> String {
        Self::expand(template, |name| match name {
            "count" => Some(ctx.count.to_string()),
            "list" => Some(ctx.list.to_string()),
            "url" => Some(ctx.url.to_string()),
            _ => None,
        })
    }

    fn expand(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                lookup(caps[1].trim()).unwrap_or_else(|| NOT_AVAILABLE.to_string())
            })
            .into_owned()
    }
}
