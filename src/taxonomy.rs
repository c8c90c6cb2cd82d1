use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemanticTypes(BTreeSet<String>);

impl SemanticTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Self {
        raw.split('|').collect()
    }

    pub fn single(label: &str) -> Self {
        std::iter::once(label).collect()
    }

    pub fn insert(&mut self, label: &str) -> bool {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.0.insert(trimmed.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_pipe_string(&self) -> String {
        self.iter().collect::<Vec<&str>>().join("|")
    }
}

impl<'a> FromIterator<&'a str> for SemanticTypes {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut types = SemanticTypes::new();
        for label in iter {
            types.insert(label);
        }
        types
    }
}

impl fmt::Display for SemanticTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pipe_string())
    }
}

impl Serialize for SemanticTypes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_pipe_string())
    }
}

impl<'de> Deserialize<'de> for SemanticTypes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SemanticTypes::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableKind {
    Rules = 1,
    SiteSpecific = 2,
    Historical = 3,
    Vocabulary = 4,
    HighConfidence = 5,
    Quirky = 6,
    ExternalLookup = 7,
}

impl TableKind {
    pub const STORED: [TableKind; 6] = [
        TableKind::Rules,
        TableKind::SiteSpecific,
        TableKind::Historical,
        TableKind::Vocabulary,
        TableKind::HighConfidence,
        TableKind::Quirky,
    ];

    pub fn priority(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::SiteSpecific => "site-specific",
            Self::Historical => "historical",
            Self::Vocabulary => "vocabulary",
            Self::HighConfidence => "high-confidence",
            Self::Quirky => "quirky",
            Self::ExternalLookup => "external-lookup",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        let table = match normalized.as_str() {
            "rules" => Self::Rules,
            "site-specific" => Self::SiteSpecific,
            "historical" => Self::Historical,
            "vocabulary" => Self::Vocabulary,
            "high-confidence" => Self::HighConfidence,
            "quirky" => Self::Quirky,
            "external-lookup" => Self::ExternalLookup,
            _ => bail!("unknown reference table: {raw}"),
        };
        Ok(table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    RuleOverride,
    SiteSpecific,
    Historical,
    ControlledVocabulary,
    HighConfidence,
    Quirky,
    ExternalLookup,
}

impl Stage {
    pub const ORDER: [Stage; 7] = [
        Stage::RuleOverride,
        Stage::SiteSpecific,
        Stage::Historical,
        Stage::ControlledVocabulary,
        Stage::HighConfidence,
        Stage::Quirky,
        Stage::ExternalLookup,
    ];

    pub fn number(self) -> u8 {
        self.table().priority()
    }

    pub fn table(self) -> TableKind {
        match self {
            Self::RuleOverride => TableKind::Rules,
            Self::SiteSpecific => TableKind::SiteSpecific,
            Self::Historical => TableKind::Historical,
            Self::ControlledVocabulary => TableKind::Vocabulary,
            Self::HighConfidence => TableKind::HighConfidence,
            Self::Quirky => TableKind::Quirky,
            Self::ExternalLookup => TableKind::ExternalLookup,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RuleOverride => "rule-override",
            Self::SiteSpecific => "site-specific",
            Self::Historical => "historical",
            Self::ControlledVocabulary => "controlled-vocabulary",
            Self::HighConfidence => "high-confidence",
            Self::Quirky => "quirky",
            Self::ExternalLookup => "external-lookup",
        }
    }

    pub fn feeds_history(self) -> bool {
        matches!(
            self,
            Self::HighConfidence | Self::Quirky | Self::ExternalLookup
        )
    }

    pub fn provenance(self) -> Provenance {
        match self {
            Self::HighConfidence => Provenance::HighConfidence,
            Self::Quirky => Provenance::Quirky,
            Self::ExternalLookup => Provenance::ExternalLookup,
            Self::RuleOverride => Provenance::Rule,
            _ => Provenance::Imported,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Imported,
    Rule,
    Builtin,
    HighConfidence,
    Quirky,
    ExternalLookup,
    Manual,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::Rule => "rule",
            Self::Builtin => "builtin",
            Self::HighConfidence => "high-confidence",
            Self::Quirky => "quirky",
            Self::ExternalLookup => "external-lookup",
            Self::Manual => "manual",
        }
    }

    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim() {
            "rule" => Self::Rule,
            "builtin" => Self::Builtin,
            "high-confidence" => Self::HighConfidence,
            "quirky" => Self::Quirky,
            "external-lookup" => Self::ExternalLookup,
            "manual" => Self::Manual,
            _ => Self::Imported,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRecord {
    pub raw_text: String,
    pub normalized_text: String,
    pub frequency: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub normalized_text: String,
    pub preferred_term: String,
    pub semantic_types: SemanticTypes,
    pub concept_id: Option<String>,
    pub provenance: Provenance,
}

impl ReferenceEntry {
    pub fn is_complete(&self) -> bool {
        !self.normalized_text.is_empty()
            && !self.preferred_term.trim().is_empty()
            && !self.semantic_types.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub normalized_text: String,
    pub preferred_term: String,
    pub semantic_types: SemanticTypes,
    pub source_stage: Stage,
    pub source_table: TableKind,
    pub concept_id: Option<String>,
    pub matched_key: Option<String>,
}

impl Assignment {
    pub fn to_reference_entry(&self) -> ReferenceEntry {
        ReferenceEntry {
            normalized_text: self.normalized_text.clone(),
            preferred_term: self.preferred_term.clone(),
            semantic_types: self.semantic_types.clone(),
            concept_id: self.concept_id.clone(),
            provenance: self.source_stage.provenance(),
        }
    }
}
