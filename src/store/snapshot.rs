use std::collections::{BTreeMap, HashMap};

use crate::taxonomy::{ReferenceEntry, TableKind};

use super::RuleDefinition;

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<String, ReferenceEntry>,
}

impl ReferenceTable {
    pub fn from_entries(entries: impl IntoIterator<Item = ReferenceEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            if !entry.is_complete() {
                continue;
            }
            table
                .entries
                .entry(entry.normalized_text.clone())
                .or_insert(entry);
        }
        table
    }

    pub fn get(&self, normalized_text: &str) -> Option<&ReferenceEntry> {
        self.entries.get(normalized_text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys = self
            .entries
            .keys()
            .map(String::as_str)
            .collect::<Vec<&str>>();
        keys.sort_unstable();
        keys
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub rules: Vec<RuleDefinition>,
    tables: BTreeMap<TableKind, ReferenceTable>,
}

impl StoreSnapshot {
    pub fn insert_table(&mut self, kind: TableKind, table: ReferenceTable) {
        self.tables.insert(kind, table);
    }

    pub fn table(&self, kind: TableKind) -> Option<&ReferenceTable> {
        self.tables.get(&kind)
    }

    pub fn entry_count(&self) -> usize {
        self.tables.values().map(ReferenceTable::len).sum()
    }
}
