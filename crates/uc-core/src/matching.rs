use reqwest::Url;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::source::{Replacement, RuleType, Source};

/// Visitor facts a rule is evaluated against. The URL query is decoded once;
/// an absent or unparsable URL leaves `query` empty so parameter rules never
/// match while referrer rules are still evaluated.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    referrer: Option<String>,
    query: Option<Vec<(String, String)>>,
}

impl RequestContext {
    pub fn new(referrer: Option<&str>, url: Option<&str>) -> Self {
        let query = url.and_then(|raw| match Url::parse(raw) {
            Ok(parsed) => Some(
                parsed
                    .query_pairs()
                    .map(|(key, value)| (key.into_owned(), value.into_owned()))
                    .collect(),
            ),
            Err(err) => {
                tracing::debug!(error = %err, "url did not parse; parameter rules skipped");
                None
            }
        });
        Self {
            referrer: referrer.map(str::to_string),
            query,
        }
    }

    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    pub fn has_valid_url(&self) -> bool {
        self.query.is_some()
    }

    /// First value for `name`, like `URLSearchParams.get`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .as_ref()?
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub fn rule_matches(source: &Source, ctx: &RequestContext) -> bool {
    match source.rule_type {
        RuleType::ReferrerContains => {
            if source.rule_value.is_empty() {
                return false;
            }
            ctx.referrer()
                .map(|referrer| referrer.contains(source.rule_value.as_str()))
                .unwrap_or(false)
        }
        RuleType::UrlParamEquals => {
            if source.param_name.is_empty() {
                return false;
            }
            ctx.param(&source.param_name) == Some(source.param_value.as_str())
        }
    }
}

/// Scans `sources` in the order given and returns the first active match.
pub fn first_match<'a>(sources: &'a [Source], ctx: &RequestContext) -> Option<&'a Source> {
    sources
        .iter()
        .filter(|source| source.active)
        .find(|source| rule_matches(source, ctx))
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct MatchOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Uuid>,
    pub replacements: Vec<Replacement>,
}

/// Resolves the replacement list for a visitor. `sources` is expected in
/// store order (priority, then insertion); the stable sort keeps that order
/// for equal priorities and fixes up callers that pass unsorted lists.
pub fn resolve(sources: &[Source], ctx: &RequestContext) -> MatchOutcome {
    let mut ordered: Vec<&Source> = sources.iter().collect();
    ordered.sort_by_key(|source| source.priority);

    ordered
        .into_iter()
        .filter(|source| source.active)
        .find(|source| rule_matches(source, ctx))
        .map(|source| MatchOutcome {
            source_id: Some(source.source_id),
            replacements: source.replacements.clone(),
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TestOutcome {
    pub matches: bool,
    pub message: String,
    pub applied_replacements: Vec<Replacement>,
}

/// Evaluates a single source for the dashboard's "test source" view. The
/// `active` flag is ignored so drafts can be tried out before enabling.
pub fn explain(source: &Source, ctx: &RequestContext) -> TestOutcome {
    if rule_matches(source, ctx) {
        return TestOutcome {
            matches: true,
            message: "This source would match the test conditions.".to_string(),
            applied_replacements: source.replacements.clone(),
        };
    }

    let mut message = String::from("This source would NOT match the test conditions.");
    match source.rule_type {
        RuleType::ReferrerContains => {
            message.push_str(&format!(
                " The referrer must contain \"{}\".",
                source.rule_value
            ));
        }
        RuleType::UrlParamEquals => {
            if !ctx.has_valid_url() {
                message.push_str(" The test URL is not a valid absolute URL.");
            }
            message.push_str(&format!(
                " The URL must have parameter \"{}={}\".",
                source.param_name, source.param_value
            ));
        }
    }

    TestOutcome {
        matches: false,
        message,
        applied_replacements: Vec::new(),
    }
}
