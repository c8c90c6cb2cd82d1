use anyhow::{Context, Result};
use regex::Regex;

use crate::store::RuleDefinition;
use crate::taxonomy::{Provenance, QueryRecord, SemanticTypes, Stage, TableKind};

use super::{Candidate, ResolverStage, StageOutput};

const BUILTIN_RULES: &[(&str, &str)] = &[
    (r"[^\x00-\x7F]", "Foreign unresolved"),
    (r"^.{41,}$", "Bibliographic Entity"),
    (r"page number 1 page size", "Bibliographic Entity"),
    (r"[0-9]{5,}", "Numeric ID"),
    (r"[0-9]{4,} [0-9]{4,}", "Numeric ID"),
    (r"^x{4,6}$", "Unresolved"),
];

pub fn builtin_rules() -> Vec<RuleDefinition> {
    BUILTIN_RULES
        .iter()
        .map(|(pattern, label)| RuleDefinition {
            pattern: (*pattern).to_string(),
            preferred_term: (*label).to_string(),
            semantic_types: SemanticTypes::single(label),
            provenance: Provenance::Builtin,
        })
        .collect()
}

struct CompiledRule {
    pattern: Regex,
    preferred_term: String,
    semantic_types: SemanticTypes,
}

pub struct RuleStage {
    rules: Vec<CompiledRule>,
}

impl RuleStage {
    pub fn new(rules: &[RuleDefinition], include_builtin: bool) -> Result<Self> {
        let builtin = if include_builtin {
            builtin_rules()
        } else {
            Vec::new()
        };

        let mut compiled = Vec::<CompiledRule>::new();
        for rule in rules.iter().chain(builtin.iter()) {
            let pattern = Regex::new(&rule.pattern)
                .with_context(|| format!("invalid rule pattern: {}", rule.pattern))?;
            let semantic_types = if rule.semantic_types.is_empty() {
                SemanticTypes::single(&rule.preferred_term)
            } else {
                rule.semantic_types.clone()
            };
            compiled.push(CompiledRule {
                pattern,
                preferred_term: rule.preferred_term.clone(),
                semantic_types,
            });
        }

        Ok(Self { rules: compiled })
    }
}

impl ResolverStage for RuleStage {
    fn stage(&self) -> Stage {
        Stage::RuleOverride
    }

    fn resolve(&mut self, pending: &[&QueryRecord]) -> Result<StageOutput> {
        let mut output = StageOutput::default();

        for record in pending {
            let Some(rule) = self
                .rules
                .iter()
                .find(|rule| rule.pattern.is_match(&record.normalized_text))
            else {
                continue;
            };

            output.candidates.push(Candidate {
                normalized_text: record.normalized_text.clone(),
                preferred_term: rule.preferred_term.clone(),
                semantic_types: rule.semantic_types.clone(),
                concept_id: None,
                source: TableKind::Rules,
                matched_key: None,
            });
        }

        output.note("rules", self.rules.len() as u64);
        Ok(output)
    }
}
