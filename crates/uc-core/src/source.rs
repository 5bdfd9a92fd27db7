use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_PRIORITY: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    ReferrerContains,
    UrlParamEquals,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::ReferrerContains => "referrer_contains",
            RuleType::UrlParamEquals => "url_param_equals",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "referrer_contains" => Ok(RuleType::ReferrerContains),
            "url_param_equals" => Ok(RuleType::UrlParamEquals),
            other => Err(anyhow!("unknown rule_type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Replacement {
    pub selector: String,
    pub content: String,
}

/// A personalization rule owned by one user, together with the DOM
/// replacements applied when it is the first rule to match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Source {
    pub source_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    pub rule_value: String,
    pub param_name: String,
    pub param_value: String,
    pub replacements: Vec<Replacement>,
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update payload. Omitted fields take the same defaults on both
/// create and update, so an update is a full replacement.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SourceInput {
    pub name: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub rule_value: String,
    #[serde(default)]
    pub param_name: Option<String>,
    #[serde(default)]
    pub param_value: Option<String>,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSource {
    pub name: String,
    pub rule_type: RuleType,
    pub rule_value: String,
    pub param_name: String,
    pub param_value: String,
    pub replacements: Vec<Replacement>,
    pub priority: i32,
    pub active: bool,
}

impl SourceInput {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("name is required"));
        }
        match self.rule_type {
            RuleType::ReferrerContains => {
                if self.rule_value.trim().is_empty() {
                    return Err(anyhow!("rule_value is required for referrer_contains"));
                }
            }
            RuleType::UrlParamEquals => {
                let param_name = self.param_name.as_deref().unwrap_or_default();
                if param_name.trim().is_empty() {
                    return Err(anyhow!("param_name is required for url_param_equals"));
                }
            }
        }
        if self
            .replacements
            .iter()
            .any(|replacement| replacement.selector.trim().is_empty())
        {
            return Err(anyhow!("replacement selector cannot be empty"));
        }
        Ok(())
    }

    /// Validates, trims and applies defaults.
    pub fn normalize(self) -> Result<NormalizedSource> {
        self.validate()?;
        Ok(NormalizedSource {
            name: self.name.trim().to_string(),
            rule_type: self.rule_type,
            rule_value: self.rule_value.trim().to_string(),
            param_name: self.param_name.unwrap_or_default().trim().to_string(),
            param_value: self.param_value.unwrap_or_default().trim().to_string(),
            replacements: self
                .replacements
                .into_iter()
                .map(|replacement| Replacement {
                    selector: replacement.selector.trim().to_string(),
                    content: replacement.content,
                })
                .collect(),
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            active: self.active.unwrap_or(true),
        })
    }
}

impl NormalizedSource {
    pub fn into_source(self, source_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Source {
        Source {
            source_id,
            user_id,
            name: self.name,
            rule_type: self.rule_type,
            rule_value: self.rule_value,
            param_name: self.param_name,
            param_value: self.param_value,
            replacements: self.replacements,
            priority: self.priority,
            active: self.active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: serde_json::Value) -> SourceInput {
        serde_json::from_value(value).expect("source input")
    }

    #[test]
    fn rule_type_uses_snake_case_on_the_wire() {
        let encoded = serde_json::to_value(RuleType::UrlParamEquals).unwrap();
        assert_eq!(encoded, json!("url_param_equals"));
        assert_eq!(
            "referrer_contains".parse::<RuleType>().unwrap(),
            RuleType::ReferrerContains
        );
        assert!("regex".parse::<RuleType>().is_err());
    }

    #[test]
    fn normalize_applies_defaults() {
        let normalized = input(json!({
            "name": "  Facebook traffic ",
            "rule_type": "referrer_contains",
            "rule_value": " facebook.com ",
            "replacements": [{"selector": " #hero ", "content": " <p>Hi</p> "}]
        }))
        .normalize()
        .unwrap();

        assert_eq!(normalized.name, "Facebook traffic");
        assert_eq!(normalized.rule_value, "facebook.com");
        assert_eq!(normalized.param_name, "");
        assert_eq!(normalized.param_value, "");
        assert_eq!(normalized.priority, DEFAULT_PRIORITY);
        assert!(normalized.active);
        assert_eq!(normalized.replacements[0].selector, "#hero");
        assert_eq!(normalized.replacements[0].content, " <p>Hi</p> ");
    }

    #[test]
    fn validate_rejects_missing_rule_fields() {
        let missing_value = input(json!({
            "name": "ref",
            "rule_type": "referrer_contains",
            "rule_value": "   "
        }));
        assert!(missing_value.validate().is_err());

        let missing_param = input(json!({
            "name": "param",
            "rule_type": "url_param_equals",
            "param_value": "email"
        }));
        assert!(missing_param.validate().is_err());

        let param_rule = input(json!({
            "name": "param",
            "rule_type": "url_param_equals",
            "param_name": "utm_source",
            "param_value": "email"
        }));
        assert!(param_rule.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_selector() {
        let source = input(json!({
            "name": "ref",
            "rule_type": "referrer_contains",
            "rule_value": "google",
            "replacements": [{"selector": "", "content": "x"}]
        }));
        assert!(source.validate().is_err());
    }
}
