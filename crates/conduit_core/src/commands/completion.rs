//! Tab completion: the local path and the proxied merge path.
//!
//! Unlinked clients are answered entirely from the registry. A controlling
//! client's request travels upstream; since the upstream response does not
//! echo the query, the original text is reconstructed from the response
//! itself (longest common prefix of the suggestions) or, failing that, from
//! the per-client cache of the most recent request.

use super::registry::CommandRegistry;
use crate::control::ControlView;
use crate::error::CompletionError;
use conduit_event_system::ClientId;
use tracing::debug;

impl CommandRegistry {
    /// Records the raw text of an outgoing completion request so it can be
    /// recovered when the upstream response carries no suggestions.
    pub fn note_completion_request(&self, client: ClientId, raw_text: &str) {
        let text = raw_text
            .strip_prefix(self.prefix())
            .unwrap_or(raw_text)
            .to_string();
        self.completion_cache.insert(client, text);
    }

    /// Computes completion matches for `raw_text` from the active command
    /// keys alone.
    ///
    /// A request that already contains a space only needs the remaining
    /// token, so matches collapse to the final key segment; otherwise the
    /// whole key is offered with the command prefix prepended. Matches are
    /// returned sorted.
    pub async fn local_completions(
        &self,
        view: &ControlView,
        client: ClientId,
        raw_text: &str,
    ) -> Vec<String> {
        let text = raw_text.strip_prefix(self.prefix()).unwrap_or(raw_text);
        let active = self.active_commands(view, client, false).await;
        let keys: Vec<String> = active.into_keys().collect();
        let mut matches = completion_matches(&keys, text, self.prefix());
        matches.sort();
        matches
    }

    /// Merges the registry's own matches into an upstream completion
    /// response bound for `client`.
    ///
    /// The query is reconstructed as the longest common prefix of the
    /// upstream suggestions; an empty response falls back to the cached
    /// request text. A missing cache entry means the upstream interaction
    /// broke an invariant; the error aborts this completion request only.
    pub async fn merge_upstream_matches(
        &self,
        view: &ControlView,
        client: ClientId,
        upstream: Vec<String>,
    ) -> Result<Vec<String>, CompletionError> {
        let text = if upstream.is_empty() {
            self.completion_cache
                .get(&client)
                .map(|entry| entry.value().clone())
                .ok_or(CompletionError::MissingQueryEcho(client))?
        } else {
            longest_common_prefix(&upstream)
        };
        debug!(client = %client, query = %text, "reconstructed completion query");

        let active = self.active_commands(view, client, false).await;
        let keys: Vec<String> = active.into_keys().collect();
        let mut merged = upstream;
        merged.extend(completion_matches(&keys, &text, self.prefix()));
        merged.sort();
        Ok(merged)
    }

    /// Drops completion state for a departed client.
    pub fn forget_client(&self, client: ClientId) {
        self.completion_cache.remove(&client);
    }
}

/// Filters flat command keys against the request text.
fn completion_matches(keys: &[String], text: &str, prefix: &str) -> Vec<String> {
    let wants_tail = text.contains(' ');
    keys.iter()
        .filter(|key| key.starts_with(text))
        .map(|key| {
            if wants_tail {
                key.rsplit(' ').next().unwrap_or(key).to_string()
            } else {
                format!("{prefix}{key}")
            }
        })
        .collect()
}

/// Longest common prefix across all suggestions: per-character agreement
/// from index 0 until the first disagreement or the shortest suggestion
/// runs out.
fn longest_common_prefix(items: &[String]) -> String {
    let Some(first) = items.first() else {
        return String::new();
    };
    let mut len = first.len();
    for item in &items[1..] {
        let agree = first
            .bytes()
            .zip(item.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        len = len.min(agree);
    }
    while !first.is_char_boundary(len) {
        len -= 1;
    }
    first[..len].to_string()
}
