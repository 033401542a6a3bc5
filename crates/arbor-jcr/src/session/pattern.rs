//! Name patterns for `nodes_matching` / `properties_matching`.
//!
//! A pattern is a `|`-separated list of clauses. Whitespace around each
//! clause is ignored, so `"jcr:* | title"` has the clauses `jcr:*` and
//! `title`. A clause without `*` matches a name exactly; a clause with `*` is
//! a glob compiled into an anchored regular expression.

use regex::Regex;

use crate::error::{RepositoryError, Result};

/// Characters never allowed inside a clause.
const ILLEGAL: &[char] = &['/', '[', ']', '\'', '"', '|', '\t', '\n', '\r'];

#[derive(Debug, Clone)]
enum Clause {
    Literal(String),
    Glob(Regex),
}

/// A compiled name pattern.
#[derive(Debug, Clone)]
pub struct NamePattern {
    clauses: Vec<Clause>,
}

impl NamePattern {
    /// Compiles `pattern`, trimming leading and trailing whitespace from
    /// every clause.
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut clauses = Vec::new();
        for raw in pattern.split('|') {
            let clause = raw.trim();
            if let Some(ch) = clause.chars().find(|c| ILLEGAL.contains(c)) {
                return Err(RepositoryError::InvalidNamePattern {
                    pattern: pattern.to_string(),
                    reason: format!("illegal character {:?}", ch),
                });
            }
            if !clause.contains('*') {
                clauses.push(Clause::Literal(clause.to_string()));
                continue;
            }
            let body = clause
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let regex = Regex::new(&format!("^{}$", body)).map_err(|e| {
                RepositoryError::InvalidNamePattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                }
            })?;
            clauses.push(Clause::Glob(regex));
        }
        Ok(NamePattern { clauses })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.clauses.iter().any(|clause| match clause {
            Clause::Literal(literal) => literal == name,
            Clause::Glob(regex) => regex.is_match(name),
        })
    }
}
