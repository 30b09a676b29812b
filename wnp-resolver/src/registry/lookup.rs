//! Registry lookup, arbitration and caching
//!
//! Registries are queried one at a time, highest priority first. A match
//! scoring at least `high_confidence` stops the walk. Each registry
//! contributes at most one candidate (its best match agreeing with the key)
//! and the winner is picked by the configured `ArbitrationPolicy`. Fields are
//! never combined across registries; the runner-up is only logged.

use super::{LookupQuery, Registry, RegistryMatch};
use crate::cache::ShardedCache;
use crate::config::ArbitrationPolicy;
use crate::error::ResolveError;
use crate::normalizer::fold;
use crate::types::NormalizedKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry answer tagged with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub registry: String,
    pub priority: u32,
    pub matched: RegistryMatch,
}

impl Candidate {
    pub fn completeness(&self) -> usize {
        self.matched.completeness()
    }
}

/// Result of arbitration
#[derive(Debug, Clone, PartialEq)]
pub struct Arbitration {
    pub winner: Candidate,
    /// Kept for diagnostics only
    pub runner_up: Option<Candidate>,
}

/// NormalizedKey → winning candidate
pub type RegistryCache = ShardedCache<NormalizedKey, Candidate>;

struct PrioritizedRegistry {
    registry: Arc<dyn Registry>,
    priority: u32,
}

/// Prioritized, cached registry lookup
pub struct RegistryLookup {
    registries: Vec<PrioritizedRegistry>,
    cache: Arc<RegistryCache>,
    policy: ArbitrationPolicy,
    high_confidence: f64,
}

impl RegistryLookup {
    pub fn new(cache: Arc<RegistryCache>, policy: ArbitrationPolicy, high_confidence: f64) -> Self {
        Self {
            registries: Vec::new(),
            cache,
            policy,
            high_confidence,
        }
    }

    /// Register a registry; higher `priority` is queried first
    pub fn with_registry(mut self, registry: Arc<dyn Registry>, priority: u32) -> Self {
        self.registries.push(PrioritizedRegistry { registry, priority });
        // Stable: equal priorities keep registration order
        self.registries.sort_by(|a, b| b.priority.cmp(&a.priority));
        self
    }

    pub fn registry_names(&self) -> Vec<String> {
        self.registries.iter().map(|r| r.registry.name().to_string()).collect()
    }

    pub fn cache(&self) -> &Arc<RegistryCache> {
        &self.cache
    }

    /// Winning candidate for `query`; a cache hit makes no network calls
    pub async fn lookup(&self, query: &LookupQuery) -> Result<Candidate, ResolveError> {
        self.cache
            .get_or_try_insert_with(query.key.clone(), || self.query_registries(query))
            .await
    }

    async fn query_registries(&self, query: &LookupQuery) -> Result<Candidate, ResolveError> {
        if self.registries.is_empty() {
            return Err(ResolveError::ResolutionFailed("no registries configured".to_string()));
        }

        let mut candidates = Vec::new();
        let mut failures = Vec::new();

        for entry in &self.registries {
            let name = entry.registry.name();
            match entry.registry.search(query).await {
                Ok(matches) => {
                    let best = matches
                        .into_iter()
                        .filter(|m| agrees_with_key(m, &query.key))
                        .max_by(|a, b| a.score.total_cmp(&b.score));

                    let Some(best) = best else {
                        debug!(registry = name, key = %query.key, "No agreeing match");
                        continue;
                    };

                    let high_confidence = best.score >= self.high_confidence;
                    debug!(registry = name, score = best.score, "Registry match");
                    candidates.push(Candidate {
                        registry: name.to_string(),
                        priority: entry.priority,
                        matched: best,
                    });

                    if high_confidence {
                        debug!(registry = name, "High-confidence match, skipping remaining registries");
                        break;
                    }
                }
                Err(e) => {
                    warn!(registry = name, key = %query.key, "Registry query failed: {}", e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        let Some(arbitration) = arbitrate(candidates, self.policy) else {
            let reason = if failures.is_empty() {
                "no registry matched".to_string()
            } else {
                failures.join("; ")
            };
            return Err(ResolveError::ResolutionFailed(reason));
        };

        if let Some(runner_up) = &arbitration.runner_up {
            debug!(
                winner = %arbitration.winner.registry,
                runner_up = %runner_up.registry,
                runner_up_artist = %runner_up.matched.artist,
                runner_up_title = %runner_up.matched.title,
                "Arbitration runner-up"
            );
        }
        info!(
            key = %query.key,
            registry = %arbitration.winner.registry,
            "Registry lookup resolved"
        );
        Ok(arbitration.winner)
    }
}

/// A match agrees when its folded title equals the key's title and, if the key
/// names an artist, the folded artists overlap.
fn agrees_with_key(matched: &RegistryMatch, key: &NormalizedKey) -> bool {
    if !key.title_key.is_empty() && fold(&matched.title) != key.title_key {
        return false;
    }
    if key.artist_key.is_empty() {
        return true;
    }
    let artist = fold(&matched.artist);
    artist.contains(&key.artist_key) || (!artist.is_empty() && key.artist_key.contains(&artist))
}

/// Order candidates by policy; `None` when there are none
pub fn arbitrate(mut candidates: Vec<Candidate>, policy: ArbitrationPolicy) -> Option<Arbitration> {
    candidates.sort_by(|a, b| compare(b, a, policy));
    let mut iter = candidates.into_iter();
    let winner = iter.next()?;
    Some(Arbitration {
        winner,
        runner_up: iter.next(),
    })
}

/// Ascending order: the greater candidate wins
fn compare(a: &Candidate, b: &Candidate, policy: ArbitrationPolicy) -> Ordering {
    let by_priority = a.priority.cmp(&b.priority);
    let by_completeness = a.completeness().cmp(&b.completeness());
    let primary = match policy {
        ArbitrationPolicy::PriorityThenCompleteness => by_priority.then(by_completeness),
        ArbitrationPolicy::CompletenessThenPriority => by_completeness.then(by_priority),
    };
    primary.then_with(|| a.matched.score.total_cmp(&b.matched.score))
}
