//! Card eligibility rules for a destination.
//!
//! Two criteria, ANDed:
//! - custom-field criteria: every `(field, value)` pair must match the card's
//!   resolved value exactly (case-sensitive)
//! - label criteria: some card label must match some accepted label, using
//!   the configured [`LabelMatch`] policy (case-insensitive either way)
//!
//! An empty criterion accepts every card. Field criteria are checked first.

use tracing::debug;

use crate::board::{Card, ResolvedFields};

/// How an accepted label is compared against a card's labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelMatch {
    /// Card label contains the accepted label.
    #[default]
    Contains,
    /// Card label equals the accepted label.
    Exact,
}

impl LabelMatch {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "contains" => Some(Self::Contains),
            "exact" => Some(Self::Exact),
            _ => None,
        }
    }
}

/// A required custom-field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCriterion {
    pub name: String,
    pub expected: String,
}

impl FieldCriterion {
    /// Parse `name:value`. The split happens at the first colon.
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, expected) = raw.split_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            expected: expected.trim().to_string(),
        })
    }
}

/// Why a card was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The card has no value for the field.
    FieldMissing { field: String },
    FieldMismatch {
        field: String,
        expected: String,
        actual: String,
    },
    NoMatchingLabel,
}

/// A destination's filter criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    /// Accepted labels, upper-cased.
    labels: Vec<String>,
    fields: Vec<FieldCriterion>,
    label_match: LabelMatch,
}

impl FilterCriteria {
    pub fn new(labels: Vec<String>, fields: Vec<FieldCriterion>, label_match: LabelMatch) -> Self {
        Self {
            labels: labels
                .into_iter()
                .map(|l| l.trim().to_uppercase())
                .filter(|l| !l.is_empty())
                .collect(),
            fields,
            label_match,
        }
    }

    /// Criteria accepting every card.
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[FieldCriterion] {
        &self.fields
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label_match(&self) -> LabelMatch {
        self.label_match
    }
}

/// Applies [`FilterCriteria`] to cards.
pub struct CardFilter;

impl CardFilter {
    pub fn accepts(card: &Card, fields: &ResolvedFields, criteria: &FilterCriteria) -> bool {
        Self::evaluate(card, fields, criteria).is_ok()
    }

    /// Check a card, reporting the first failing criterion.
    pub fn evaluate(
        card: &Card,
        fields: &ResolvedFields,
        criteria: &FilterCriteria,
    ) -> Result<(), Rejection> {
        for criterion in &criteria.fields {
            match fields.get(&criterion.name) {
                None => {
                    return Err(Rejection::FieldMissing {
                        field: criterion.name.clone(),
                    });
                }
                Some(actual) if actual != criterion.expected => {
                    return Err(Rejection::FieldMismatch {
                        field: criterion.name.clone(),
                        expected: criterion.expected.clone(),
                        actual: actual.to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        if criteria.labels.is_empty() {
            return Ok(());
        }

        let matched = card.labels.iter().any(|label| {
            let name = label.name.to_uppercase();
            criteria.labels.iter().any(|accepted| match criteria.label_match {
                LabelMatch::Contains => name.contains(accepted.as_str()),
                LabelMatch::Exact => name == *accepted,
            })
        });

        if matched {
            Ok(())
        } else {
            Err(Rejection::NoMatchingLabel)
        }
    }

    /// Keep the cards accepted by `criteria`, preserving order.
    pub fn apply<'a>(
        cards: &'a [(Card, ResolvedFields)],
        criteria: &FilterCriteria,
    ) -> Vec<&'a (Card, ResolvedFields)> {
        cards
            .iter()
            .filter(|(card, fields)| match Self::evaluate(card, fields, criteria) {
                Ok(()) => true,
                Err(rejection) => {
                    debug!(card = %card.id, ?rejection, "Card filtered out");
                    false
                }
            })
            .collect()
    }
}
