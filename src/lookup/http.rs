use std::time::Duration;

use anyhow::{Context, Result, ensure};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use super::{ConceptMatch, LookupOutcome, TerminologyLookup};

const NO_MATCH_SENTINEL: &str = "NONE";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    ui: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ConceptResponse {
    result: ConceptResult,
}

#[derive(Debug, Deserialize)]
struct ConceptResult {
    #[serde(default, rename = "semanticTypes")]
    semantic_types: Vec<SemanticTypeRef>,
}

#[derive(Debug, Deserialize)]
struct SemanticTypeRef {
    #[serde(default)]
    name: String,
}

#[derive(Clone)]
pub struct HttpTerminologyLookup {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpTerminologyLookup {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        ensure!(!endpoint.trim().is_empty(), "missing lookup endpoint");
        ensure!(!api_key.trim().is_empty(), "missing lookup API key");

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build lookup HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
        })
    }

    fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<String, LookupOutcome> {
        let response = self
            .client
            .get(url)
            .query(query)
            .query(&[("apiKey", self.api_key.as_str())])
            .send();

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return resp
                        .text()
                        .map_err(|err| LookupOutcome::Transient(err.to_string()));
                }
                if should_retry(status) {
                    return Err(LookupOutcome::Transient(format!("status {status}")));
                }
                debug!(%status, url, "lookup request rejected");
                Err(LookupOutcome::NoMatch)
            }
            Err(err) if is_retryable_error(&err) => Err(LookupOutcome::Transient(err.to_string())),
            Err(err) => {
                debug!(error = %err, url, "lookup request failed");
                Err(LookupOutcome::NoMatch)
            }
        }
    }
}

impl TerminologyLookup for HttpTerminologyLookup {
    fn requests_per_lookup(&self) -> u32 {
        2
    }

    fn lookup(&self, term: &str) -> LookupOutcome {
        let search_url = format!("{}/search/current", self.endpoint);
        let body = match self.get_json(
            &search_url,
            &[("string", term), ("searchType", "normalizedString")],
        ) {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };
        let Some((concept_id, preferred_name)) = parse_search_response(&body) else {
            return LookupOutcome::NoMatch;
        };

        let content_url = format!("{}/content/current/CUI/{}", self.endpoint, concept_id);
        let body = match self.get_json(&content_url, &[]) {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };
        let categories = parse_semantic_types(&body);
        if categories.is_empty() {
            return LookupOutcome::NoMatch;
        }

        LookupOutcome::Found(ConceptMatch {
            concept_id,
            preferred_name,
            categories,
        })
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn parse_search_response(body: &str) -> Option<(String, String)> {
    let parsed = serde_json::from_str::<SearchResponse>(body).ok()?;
    let hit = parsed.result.results.into_iter().next()?;
    let ui = hit.ui.trim();
    let name = hit.name.trim();
    if ui.is_empty() || ui == NO_MATCH_SENTINEL || name.is_empty() {
        return None;
    }
    Some((ui.to_string(), name.to_string()))
}

fn parse_semantic_types(body: &str) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<ConceptResponse>(body) else {
        return Vec::new();
    };
    parsed
        .result
        .semantic_types
        .into_iter()
        .map(|value| value.name.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_yields_first_hit() {
        let body = r#"{"result":{"results":[
            {"ui":"C0011849","name":"Diabetes Mellitus","rootSource":"MTH"},
            {"ui":"C0011860","name":"Diabetes Mellitus, Type 2"}
        ]}}"#;
        assert_eq!(
            parse_search_response(body),
            Some(("C0011849".to_string(), "Diabetes Mellitus".to_string()))
        );
    }

    #[test]
    fn search_response_sentinel_and_garbage_are_no_match() {
        let sentinel = r#"{"result":{"results":[{"ui":"NONE","name":"NO RESULTS"}]}}"#;
        assert_eq!(parse_search_response(sentinel), None);
        assert_eq!(parse_search_response(r#"{"result":{"results":[]}}"#), None);
        assert_eq!(parse_search_response("<html>oops</html>"), None);
        assert_eq!(
            parse_search_response(r#"{"result":{"results":[{"ui":"C1","name":" "}]}}"#),
            None
        );
    }

    #[test]
    fn semantic_types_are_read_by_name() {
        let body = r#"{"result":{"ui":"C0011849","semanticTypes":[
            {"name":"Disease or Syndrome","uri":"https://example.test/T047"},
            {"name":""}
        ]}}"#;
        assert_eq!(parse_semantic_types(body), vec!["Disease or Syndrome"]);
        assert!(parse_semantic_types("{}").is_empty());
    }

    #[test]
    fn throttling_and_server_errors_are_retried() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
        assert!(!should_retry(StatusCode::NOT_FOUND));
    }

    #[test]
    fn new_rejects_missing_credentials() {
        assert!(HttpTerminologyLookup::new("", "key", Duration::from_secs(1)).is_err());
        assert!(HttpTerminologyLookup::new("https://example.test", " ", Duration::from_secs(1)).is_err());
    }
}
