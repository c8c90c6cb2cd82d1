use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use super::*;
use crate::cascade::classify;

#[derive(Default)]
struct FakeLookup {
    script: HashMap<String, Vec<LookupOutcome>>,
    calls: Mutex<Vec<String>>,
    requests_per_call: u32,
}

impl FakeLookup {
    fn with(mut self, term: &str, outcomes: Vec<LookupOutcome>) -> Self {
        self.script.insert(term.to_string(), outcomes);
        self
    }

    fn calls_for(&self, term: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|value| value.as_str() == term)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

impl TerminologyLookup for FakeLookup {
    fn lookup(&self, term: &str) -> LookupOutcome {
        let attempt = {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.push(term.to_string());
            calls.iter().filter(|value| value.as_str() == term).count() - 1
        };
        match self.script.get(term) {
            Some(outcomes) if !outcomes.is_empty() => {
                outcomes[attempt.min(outcomes.len() - 1)].clone()
            }
            _ => LookupOutcome::NoMatch,
        }
    }

    fn requests_per_lookup(&self) -> u32 {
        self.requests_per_call.max(1)
    }
}

fn found(id: &str, name: &str, categories: &[&str]) -> LookupOutcome {
    LookupOutcome::Found(ConceptMatch {
        concept_id: id.to_string(),
        preferred_name: name.to_string(),
        categories: categories.iter().map(|value| value.to_string()).collect(),
    })
}

fn record(text: &str, frequency: u64) -> QueryRecord {
    QueryRecord {
        raw_text: text.to_string(),
        normalized_text: text.to_string(),
        frequency,
    }
}

fn fast_settings() -> LookupSettings {
    LookupSettings {
        workers: 2,
        requests_per_second: 1000,
        max_retries: 2,
        budget: None,
        retry_base_delay: Duration::from_millis(1),
        deadline: None,
    }
}

fn run(client: &FakeLookup, settings: LookupSettings, records: &[QueryRecord]) -> StageOutput {
    let mut stage = LookupStage::new(client, settings);
    let pending = records.iter().collect::<Vec<&QueryRecord>>();
    stage.resolve(&pending).expect("lookup stage should not fail")
}

#[test]
fn found_concepts_become_candidates() {
    let client = FakeLookup::default().with(
        "diabetes",
        vec![found(
            "C0011849",
            "Diabetes Mellitus",
            &["Disease or Syndrome"],
        )],
    );
    let output = run(&client, fast_settings(), &[record("diabetes", 4)]);

    assert_eq!(output.candidates.len(), 1);
    let candidate = &output.candidates[0];
    assert_eq!(candidate.preferred_term, "Diabetes Mellitus");
    assert_eq!(candidate.concept_id.as_deref(), Some("C0011849"));
    assert_eq!(candidate.source, TableKind::ExternalLookup);
    assert_eq!(output.notes.get("found"), Some(&1));
}

#[test]
fn transient_failures_are_retried_then_succeed() {
    let client = FakeLookup::default().with(
        "flu",
        vec![
            LookupOutcome::Transient("status 503".to_string()),
            found("C0021400", "Influenza", &["Disease or Syndrome"]),
        ],
    );
    let output = run(&client, fast_settings(), &[record("flu", 9)]);

    assert_eq!(client.calls_for("flu"), 2);
    assert_eq!(output.candidates.len(), 1);
}

#[test]
fn persistent_transient_failure_leaves_query_unresolved() {
    let client = FakeLookup::default().with(
        "flu",
        vec![LookupOutcome::Transient("timeout".to_string())],
    );
    let output = run(&client, fast_settings(), &[record("flu", 9), record("cold", 1)]);

    assert_eq!(client.calls_for("flu"), 3);
    assert_eq!(client.calls_for("cold"), 1);
    assert!(output.candidates.is_empty());
    assert_eq!(output.notes.get("gave_up"), Some(&1));
    assert_eq!(output.notes.get("no_match"), Some(&1));
}

#[test]
fn empty_name_or_categories_count_as_no_match() {
    let client = FakeLookup::default()
        .with("a", vec![found("C1", " ", &["Finding"])])
        .with("b", vec![found("C2", "Bee", &[])]);
    let output = run(&client, fast_settings(), &[record("a", 1), record("b", 1)]);

    assert!(output.candidates.is_empty());
    assert_eq!(output.notes.get("no_match"), Some(&2));
}

#[test]
fn budget_keeps_the_highest_volume_queries() {
    let client = FakeLookup::default();
    let settings = LookupSettings {
        budget: Some(2),
        ..fast_settings()
    };
    let output = run(
        &client,
        settings,
        &[record("rare", 1), record("common", 50), record("middle", 5)],
    );

    assert_eq!(client.total_calls(), 2);
    assert_eq!(client.calls_for("rare"), 0);
    assert_eq!(output.notes.get("over_budget"), Some(&1));
}

#[test]
fn expired_deadline_stops_further_submissions() {
    let client = FakeLookup::default();
    let settings = LookupSettings {
        deadline: Some(Duration::ZERO),
        ..fast_settings()
    };
    let output = run(&client, settings, &[record("a", 1), record("b", 1)]);

    assert_eq!(client.total_calls(), 0);
    assert_eq!(output.notes.get("skipped_after_deadline"), Some(&2));
}

#[test]
fn deadline_is_checked_before_each_retry() {
    let client = FakeLookup::default().with(
        "flu",
        vec![LookupOutcome::Transient("status 503".to_string())],
    );
    let settings = LookupSettings {
        max_retries: 5,
        retry_base_delay: Duration::from_millis(200),
        deadline: Some(Duration::from_millis(100)),
        ..fast_settings()
    };
    let output = run(&client, settings, &[record("flu", 9)]);

    assert_eq!(client.calls_for("flu"), 1);
    assert_eq!(output.notes.get("skipped_after_deadline"), Some(&1));
    assert_eq!(output.notes.get("gave_up"), None);
}

#[test]
fn retries_wait_for_the_rate_limiter() {
    let client = FakeLookup::default().with(
        "flu",
        vec![
            LookupOutcome::Transient("status 429".to_string()),
            LookupOutcome::Transient("status 429".to_string()),
            LookupOutcome::Transient("status 429".to_string()),
            found("C0021400", "Influenza", &["Disease or Syndrome"]),
        ],
    );
    let settings = LookupSettings {
        requests_per_second: 2,
        max_retries: 3,
        ..fast_settings()
    };

    let started = Instant::now();
    let output = run(&client, settings, &[record("flu", 9)]);

    assert_eq!(client.calls_for("flu"), 4);
    assert_eq!(output.candidates.len(), 1);
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[test]
fn each_request_of_a_lookup_takes_a_limiter_cell() {
    let client = FakeLookup {
        requests_per_call: 2,
        ..FakeLookup::default()
    };
    let settings = LookupSettings {
        requests_per_second: 4,
        ..fast_settings()
    };

    let records = [record("a", 1), record("b", 1), record("c", 1), record("d", 1)];

    let started = Instant::now();
    run(&client, settings, &records);

    assert_eq!(client.total_calls(), 4);
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[test]
fn lookup_stage_runs_last_in_the_cascade() {
    let client = FakeLookup::default().with(
        "xqzzy42",
        vec![found("C9", "Something", &["Finding"])],
    );
    let mut stages: Vec<Box<dyn ResolverStage + '_>> =
        vec![Box::new(LookupStage::new(&client, fast_settings()))];
    let records = vec![record("xqzzy42", 3), record("nothing", 1)];

    let outcome = classify(&records, &mut stages).expect("classify");
    let assignment = &outcome.assignments["xqzzy42"];
    assert_eq!(assignment.source_stage, Stage::ExternalLookup);
    assert_eq!(assignment.source_stage.number(), 7);
    assert_eq!(outcome.unresolved, vec![record("nothing", 1)]);
    assert_eq!(outcome.learned().len(), 1);
}

#[test]
fn lookup_order_is_frequency_then_text() {
    let records = [record("b", 2), record("a", 2), record("c", 9)];
    let pending = records.iter().collect::<Vec<&QueryRecord>>();
    let ordered = lookup_order(&pending, None)
        .into_iter()
        .map(|record| record.normalized_text.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(ordered, vec!["c", "a", "b"]);
}

#[test]
fn retry_backoff_doubles_from_the_base_delay() {
    let base = Duration::from_millis(100);
    assert_eq!(retry_backoff(base, 1), Duration::from_millis(100));
    assert_eq!(retry_backoff(base, 3), Duration::from_millis(400));
    assert_eq!(retry_backoff(base, 40), Duration::from_millis(3200));
}
