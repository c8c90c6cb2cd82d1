mod http;
#[cfg(test)]
mod tests;

use std::num::NonZeroU32;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cascade::{Candidate, ResolverStage, StageOutput};
use crate::taxonomy::{QueryRecord, SemanticTypes, Stage, TableKind};

pub use http::HttpTerminologyLookup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptMatch {
    pub concept_id: String,
    pub preferred_name: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(ConceptMatch),
    NoMatch,
    Transient(String),
}

pub trait TerminologyLookup: Send + Sync {
    fn lookup(&self, term: &str) -> LookupOutcome;

    fn requests_per_lookup(&self) -> u32 {
        1
    }
}

#[derive(Debug, Clone)]
pub struct LookupSettings {
    pub workers: usize,
    pub requests_per_second: u32,
    pub max_retries: u32,
    pub budget: Option<usize>,
    pub retry_base_delay: Duration,
    pub deadline: Option<Duration>,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            requests_per_second: 20,
            max_retries: 3,
            budget: None,
            retry_base_delay: Duration::from_millis(500),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryResult {
    Found(ConceptMatch),
    NoMatch,
    GaveUp,
    Skipped,
}

pub struct LookupStage<'a> {
    client: &'a dyn TerminologyLookup,
    settings: LookupSettings,
}

struct Throttle {
    limiter: DefaultDirectRateLimiter,
    pause: Duration,
    cutoff: Option<Instant>,
}

impl Throttle {
    fn new(settings: &LookupSettings) -> Self {
        let rate = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            pause: Duration::from_millis(1000 / u64::from(rate.get())).max(Duration::from_millis(1)),
            cutoff: settings.deadline.map(|deadline| Instant::now() + deadline),
        }
    }

    fn expired(&self) -> bool {
        self.cutoff.is_some_and(|cutoff| Instant::now() >= cutoff)
    }

    fn acquire(&self, cells: u32) -> bool {
        for _ in 0..cells.max(1) {
            while self.limiter.check().is_err() {
                if self.expired() {
                    return false;
                }
                thread::sleep(self.pause);
            }
        }
        !self.expired()
    }
}

impl<'a> LookupStage<'a> {
    pub fn new(client: &'a dyn TerminologyLookup, settings: LookupSettings) -> Self {
        Self { client, settings }
    }

    fn lookup_with_retry(&self, term: &str, throttle: &Throttle) -> QueryResult {
        let cells = self.client.requests_per_lookup();
        let mut attempt = 0u32;
        loop {
            if !throttle.acquire(cells) {
                return QueryResult::Skipped;
            }
            match self.client.lookup(term) {
                LookupOutcome::Found(found) => {
                    if found.preferred_name.trim().is_empty() || found.categories.is_empty() {
                        return QueryResult::NoMatch;
                    }
                    return QueryResult::Found(found);
                }
                LookupOutcome::NoMatch => return QueryResult::NoMatch,
                LookupOutcome::Transient(reason) => {
                    if attempt >= self.settings.max_retries {
                        warn!(term, attempts = attempt + 1, reason = %reason, "lookup gave up");
                        return QueryResult::GaveUp;
                    }
                    attempt += 1;
                    debug!(term, attempt, reason = %reason, "retrying lookup");
                    thread::sleep(retry_backoff(self.settings.retry_base_delay, attempt));
                }
            }
        }
    }
}

fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    let capped = attempt.saturating_sub(1).min(5);
    base.saturating_mul(1 << capped)
}

fn lookup_order<'r>(pending: &[&'r QueryRecord], budget: Option<usize>) -> Vec<&'r QueryRecord> {
    let mut ordered = pending.to_vec();
    ordered.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.normalized_text.cmp(&b.normalized_text))
    });
    if let Some(limit) = budget {
        ordered.truncate(limit);
    }
    ordered
}

impl ResolverStage for LookupStage<'_> {
    fn stage(&self) -> Stage {
        Stage::ExternalLookup
    }

    fn resolve(&mut self, pending: &[&QueryRecord]) -> Result<StageOutput> {
        let mut output = StageOutput::default();
        let batch = lookup_order(pending, self.settings.budget);
        output.note("over_budget", (pending.len() - batch.len()) as u64);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers.max(1))
            .thread_name(|index| format!("lookup-{index}"))
            .build()
            .context("failed to build lookup worker pool")?;

        let throttle = Throttle::new(&self.settings);
        let this = &*self;
        let results = pool.install(|| {
            batch
                .par_iter()
                .map(|record| {
                    if throttle.expired() {
                        return (record, QueryResult::Skipped);
                    }
                    (record, this.lookup_with_retry(&record.normalized_text, &throttle))
                })
                .collect::<Vec<(&&QueryRecord, QueryResult)>>()
        });

        for (record, result) in results {
            match result {
                QueryResult::Found(found) => {
                    let semantic_types = found
                        .categories
                        .iter()
                        .map(String::as_str)
                        .collect::<SemanticTypes>();
                    output.candidates.push(Candidate {
                        normalized_text: record.normalized_text.clone(),
                        preferred_term: found.preferred_name,
                        semantic_types,
                        concept_id: Some(found.concept_id).filter(|id| !id.is_empty()),
                        source: TableKind::ExternalLookup,
                        matched_key: None,
                    });
                    output.note("found", 1);
                }
                QueryResult::NoMatch => output.note("no_match", 1),
                QueryResult::GaveUp => output.note("gave_up", 1),
                QueryResult::Skipped => output.note("skipped_after_deadline", 1),
            }
        }

        info!(
            submitted = batch.len(),
            found = output.notes.get("found").copied().unwrap_or(0),
            "external lookup complete"
        );
        Ok(output)
    }
}
