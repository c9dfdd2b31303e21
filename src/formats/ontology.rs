//! Ontology maps: tab-delimited `id<TAB>term` files (e.g. Sequence Ontology
//! ids to names) used to resolve variant effect terms.

use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntologyTerm {
    pub id: String,
    pub term: String,
}

#[derive(Debug, Clone, Default)]
pub struct OntologyMap {
    pub name: String,
    terms: Vec<OntologyTerm>,
    by_id: HashMap<String, usize>,
    by_term: HashMap<String, usize>,
}

impl OntologyMap {
    /// Parse map text. Blank lines and `#` comments are skipped; a line
    /// without a tab or a repeated id is `InvalidFormat`.
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let mut map = Self {
            name: name.to_string(),
            ..Self::default()
        };

        for (number, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (id, term) = line.split_once('\t').ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "ontology {} line {}: expected id<TAB>term",
                    name,
                    number + 1
                ))
            })?;
            let (id, term) = (id.trim(), term.trim());
            if id.is_empty() {
                return Err(Error::InvalidFormat(format!(
                    "ontology {} line {}: empty id",
                    name,
                    number + 1
                )));
            }
            if map.by_id.contains_key(id) {
                return Err(Error::InvalidFormat(format!(
                    "ontology {} line {}: duplicate id {}",
                    name,
                    number + 1,
                    id
                )));
            }

            let position = map.terms.len();
            map.by_id.insert(id.to_string(), position);
            map.by_term.entry(term.to_string()).or_insert(position);
            map.terms.push(OntologyTerm {
                id: id.to_string(),
                term: term.to_string(),
            });
        }

        Ok(map)
    }

    pub async fn load(name: &str, path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::InvalidFormat(format!("cannot read ontology {}: {}", path.display(), e))
        })?;
        Self::parse(name, &text)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term(&self, id: &str) -> Option<&OntologyTerm> {
        self.by_id.get(id).map(|&i| &self.terms[i])
    }

    pub fn id_for_term(&self, term: &str) -> Option<&OntologyTerm> {
        self.by_term.get(term).map(|&i| &self.terms[i])
    }
}
