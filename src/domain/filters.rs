//! Record filters applied during consumption. Only records accepted by every
//! filter count toward the requested limit.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::entities::ConsumedMessage;

/// Part of a record a filter inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTarget {
    Key,
    Value,
    HeaderKey,
    HeaderValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperation {
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    /// Regular expression search
    Matches,
}

/// Filter as supplied in a consumer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFilter {
    pub target: FilterTarget,
    pub operation: FilterOperation,
    pub term: String,
}

impl MessageFilter {
    pub fn new(target: FilterTarget, operation: FilterOperation, term: impl Into<String>) -> Self {
        Self {
            target,
            operation,
            term: term.into(),
        }
    }

    pub fn compile(&self) -> Result<CompiledFilter, regex::Error> {
        let matcher = match self.operation {
            FilterOperation::Contains => Matcher::Contains(self.term.clone()),
            FilterOperation::NotContains => Matcher::NotContains(self.term.clone()),
            FilterOperation::StartsWith => Matcher::StartsWith(self.term.clone()),
            FilterOperation::EndsWith => Matcher::EndsWith(self.term.clone()),
            FilterOperation::Matches => Matcher::Regex(Regex::new(&self.term)?),
        };
        Ok(CompiledFilter {
            target: self.target,
            matcher,
        })
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Contains(String),
    NotContains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Contains(term) => text.contains(term.as_str()),
            Matcher::NotContains(term) => text.contains(term.as_str()),
            Matcher::StartsWith(term) => text.starts_with(term.as_str()),
            Matcher::EndsWith(term) => text.ends_with(term.as_str()),
            Matcher::Regex(regex) => regex.is_match(text),
        }
    }

    fn is_negated(&self) -> bool {
        matches!(self, Matcher::NotContains(_))
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFilter {
    target: FilterTarget,
    matcher: Matcher,
}

impl CompiledFilter {
    /// Positive operations need one matching candidate, `not_contains` needs none.
    /// A missing key or value has no candidates.
    pub fn accepts(&self, message: &ConsumedMessage) -> bool {
        let mut candidates: Box<dyn Iterator<Item = &str> + '_> = match self.target {
            FilterTarget::Key => Box::new(message.key.as_deref().into_iter()),
            FilterTarget::Value => Box::new(message.value.as_deref().into_iter()),
            FilterTarget::HeaderKey => Box::new(message.headers.keys().map(String::as_str)),
            FilterTarget::HeaderValue => Box::new(message.headers.values().map(String::as_str)),
        };
        let any_match = candidates.any(|text| self.matcher.is_match(text));
        any_match != self.matcher.is_negated()
    }
}
