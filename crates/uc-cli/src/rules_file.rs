use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use uc_core::matching::{self, MatchOutcome, RequestContext};
use uc_core::source::{Source, SourceInput};
use uc_core::store::{MemorySourceStore, SourceStore};
use uuid::Uuid;

/// One entry of a rules file: a dashboard source payload, optionally pinned
/// to an id and an owner. Entries without `user_id` belong to the user the
/// file is evaluated for.
#[derive(Debug, Deserialize)]
pub struct RuleEntry {
    #[serde(default)]
    pub source_id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(flatten)]
    pub input: SourceInput,
}

pub fn load(path: &Path, default_user: Uuid) -> Result<Vec<Source>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file {}", path.display()))?;
    let entries: Vec<RuleEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("rules file {} is not a JSON array of sources", path.display()))?;

    let now = Utc::now();
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let normalized = entry
                .input
                .normalize()
                .with_context(|| format!("rule #{index} is invalid"))?;
            Ok(normalized.into_source(
                entry.source_id.unwrap_or_else(Uuid::new_v4),
                entry.user_id.unwrap_or(default_user),
                now,
            ))
        })
        .collect()
}

/// Runs the same lookup the content API does, against an in-memory store
/// seeded in file order.
pub async fn evaluate(
    sources: Vec<Source>,
    user_id: Uuid,
    referrer: Option<&str>,
    url: Option<&str>,
) -> Result<MatchOutcome> {
    let store = MemorySourceStore::with_sources(sources).await;
    let candidates = store.active_sources_for_user(user_id).await?;
    let ctx = RequestContext::new(referrer, url);
    Ok(matching::resolve(&candidates, &ctx))
}
