//! Search filters: a logical AND of metadata predicates

use crate::retrieval::ChunkMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unknown filter field '{0}' (expected workspace, source, selector, tag or item)")]
    UnknownField(String),

    #[error("Malformed filter '{0}': expected FIELD=VALUE or FIELD^=PREFIX[,PREFIX...]")]
    Malformed(String),

    #[error("Filter '{0}' has an empty value")]
    EmptyValue(String),

    #[error("Prefix matching is not supported on field '{0}'")]
    PrefixNotSupported(FilterField),
}

/// Metadata field a predicate looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    /// Owning workspace
    Workspace,
    /// Source URL or path
    Source,
    /// Selector inside the source
    Selector,
    /// Any of the concept tags
    Tag,
    /// Feedback-store item id
    Item,
}

impl FilterField {
    fn supports_prefix(self) -> bool {
        matches!(self, Self::Source | Self::Selector)
    }
}

impl FromStr for FilterField {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "workspace" => Ok(Self::Workspace),
            "source" | "url" | "path" => Ok(Self::Source),
            "selector" => Ok(Self::Selector),
            "tag" | "concept" => Ok(Self::Tag),
            "item" | "item_id" => Ok(Self::Item),
            other => Err(FilterError::UnknownField(other.to_string())),
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Workspace => "workspace",
            Self::Source => "source",
            Self::Selector => "selector",
            Self::Tag => "tag",
            Self::Item => "item",
        };
        f.write_str(name)
    }
}

/// A single metadata predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Predicate {
    /// Exact equality (for tags: any tag equal to the value)
    Equals { field: FilterField, value: String },
    /// The field starts with one of the prefixes
    Prefix {
        field: FilterField,
        prefixes: Vec<String>,
    },
}

impl Predicate {
    pub fn equals(field: FilterField, value: impl Into<String>) -> Self {
        Self::Equals {
            field,
            value: value.into(),
        }
    }

    /// Prefix-set predicate. A trailing `*` on a prefix is accepted and ignored.
    pub fn prefixes<I, S>(field: FilterField, prefixes: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !field.supports_prefix() {
            return Err(FilterError::PrefixNotSupported(field));
        }

        let prefixes: Vec<String> = prefixes
            .into_iter()
            .map(|p| p.as_ref().trim().trim_end_matches('*').to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if prefixes.is_empty() {
            return Err(FilterError::EmptyValue(field.to_string()));
        }

        Ok(Self::Prefix { field, prefixes })
    }

    /// Parse `FIELD=VALUE` or `FIELD^=PREFIX[,PREFIX...]`
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        if let Some((field, prefixes)) = expr.split_once("^=") {
            let field: FilterField = field.parse()?;
            return Self::prefixes(field, prefixes.split(','));
        }

        let (field, value) = expr
            .split_once('=')
            .ok_or_else(|| FilterError::Malformed(expr.to_string()))?;
        let field: FilterField = field.parse()?;
        let value = value.trim();
        if value.is_empty() {
            return Err(FilterError::EmptyValue(expr.to_string()));
        }

        Ok(Self::equals(field, value))
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match self {
            Self::Equals { field, value } => match field {
                FilterField::Workspace => metadata.chunk.workspace == *value,
                FilterField::Source => metadata.chunk.source.url == *value,
                FilterField::Selector => metadata.chunk.source.selector == *value,
                FilterField::Tag => metadata.tags.iter().any(|t| t == value),
                FilterField::Item => metadata.item_id.as_deref() == Some(value.as_str()),
            },
            Self::Prefix { field, prefixes } => {
                let subject = match field {
                    FilterField::Source => &metadata.chunk.source.url,
                    FilterField::Selector => &metadata.chunk.source.selector,
                    _ => return false,
                };
                prefixes.iter().any(|p| subject.starts_with(p.as_str()))
            }
        }
    }
}

/// Conjunction of predicates; the empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    predicates: Vec<Predicate>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Parse a list of filter expressions, failing on the first malformed one
    pub fn parse_all<S: AsRef<str>>(exprs: &[S]) -> Result<Self, FilterError> {
        let predicates = exprs
            .iter()
            .map(|e| Predicate::parse(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { predicates })
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.predicates.iter().all(|p| p.matches(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{Chunker, SourceRef};

    fn metadata(url: &str, selector: &str, tags: &[&str]) -> ChunkMetadata {
        let source = SourceRef::new(url).with_selector(selector);
        let chunk = Chunker::default()
            .chunk("w1", &source, "some text", None)
            .remove(0);
        ChunkMetadata::new(
            chunk,
            tags.iter().map(|t| t.to_string()).collect(),
            Some("item-1".to_string()),
        )
    }

    #[test]
    fn test_parse_equality_and_prefix() {
        assert_eq!(
            Predicate::parse("selector=#main").unwrap(),
            Predicate::equals(FilterField::Selector, "#main")
        );
        assert_eq!(
            Predicate::parse("url^=https://a.dev/*,https://b.dev").unwrap(),
            Predicate::Prefix {
                field: FilterField::Source,
                prefixes: vec!["https://a.dev/".to_string(), "https://b.dev".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Predicate::parse("colour=red"),
            Err(FilterError::UnknownField(_))
        ));
        assert!(matches!(
            Predicate::parse("selector"),
            Err(FilterError::Malformed(_))
        ));
        assert!(matches!(
            Predicate::parse("tag="),
            Err(FilterError::EmptyValue(_))
        ));
        assert!(matches!(
            Predicate::parse("tag^=auth"),
            Err(FilterError::PrefixNotSupported(FilterField::Tag))
        ));
        assert!(matches!(
            Predicate::parse("source^=*,"),
            Err(FilterError::EmptyValue(_))
        ));
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let meta = metadata("https://docs.rs/serde", "#main", &["Serde"]);

        let both = Filters::new()
            .with(Predicate::prefixes(FilterField::Source, ["https://docs.rs"]).unwrap())
            .with(Predicate::equals(FilterField::Tag, "Serde"));
        assert!(both.matches(&meta));

        let conflicting = both.clone().with(Predicate::equals(FilterField::Selector, "#other"));
        assert!(!conflicting.matches(&meta));

        assert!(Filters::new().matches(&meta));
        assert!(Filters::parse_all(&["workspace=w1", "item=item-1"])
            .unwrap()
            .matches(&meta));
    }
}
