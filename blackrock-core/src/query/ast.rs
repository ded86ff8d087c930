//! Query AST

use crate::{BlackrockError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_boost() -> f32 {
    1.0
}

fn is_default_boost(b: &f32) -> bool {
    *b == 1.0
}

/// Recursive boolean query
///
/// JSON form is externally tagged by snake_case node name, e.g.
/// `{"and": {"queries": [{"term": {"field": "a", "value": "x"}}]}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    Term {
        field: String,
        value: String,
        #[serde(default = "default_boost", skip_serializing_if = "is_default_boost")]
        boost: f32,
    },
    And {
        queries: Vec<Query>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not: Option<Box<Query>>,
        #[serde(default = "default_boost", skip_serializing_if = "is_default_boost")]
        boost: f32,
    },
    Or {
        queries: Vec<Query>,
        /// Never valid; present so a malformed request can be rejected explicitly
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not: Option<Box<Query>>,
        #[serde(default = "default_boost", skip_serializing_if = "is_default_boost")]
        boost: f32,
    },
    DisMax {
        queries: Vec<Query>,
        #[serde(default)]
        tiebreak: f32,
        #[serde(default = "default_boost", skip_serializing_if = "is_default_boost")]
        boost: f32,
    },
    /// Docs of `then` that follow some doc of `first` by `(0, within_sec]` seconds
    AndThen {
        first: Box<Query>,
        then: Box<Query>,
        within_sec: u32,
        #[serde(default = "default_boost", skip_serializing_if = "is_default_boost")]
        boost: f32,
    },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
            boost: 1.0,
        }
    }

    pub fn and(queries: Vec<Query>) -> Self {
        Query::And {
            queries,
            not: None,
            boost: 1.0,
        }
    }

    pub fn and_not(not: Query, queries: Vec<Query>) -> Self {
        Query::And {
            queries,
            not: Some(Box::new(not)),
            boost: 1.0,
        }
    }

    pub fn or(queries: Vec<Query>) -> Self {
        Query::Or {
            queries,
            not: None,
            boost: 1.0,
        }
    }

    pub fn dis_max(queries: Vec<Query>, tiebreak: f32) -> Self {
        Query::DisMax {
            queries,
            tiebreak,
            boost: 1.0,
        }
    }

    pub fn and_then(first: Query, then: Query, within_sec: u32) -> Self {
        Query::AndThen {
            first: Box::new(first),
            then: Box::new(then),
            within_sec,
            boost: 1.0,
        }
    }

    /// Every document in the window
    pub fn match_all() -> Self {
        Query::term(crate::segment::MATCH_ALL_FIELD, crate::segment::MATCH_ALL_VALUE)
    }

    /// Replace this node's boost
    pub fn boosted(mut self, value: f32) -> Self {
        match &mut self {
            Query::Term { boost, .. }
            | Query::And { boost, .. }
            | Query::Or { boost, .. }
            | Query::DisMax { boost, .. }
            | Query::AndThen { boost, .. } => *boost = value,
        }
        self
    }

    /// Structural checks shared by every segment
    pub fn validate(&self) -> Result<()> {
        match self {
            Query::Term { field, .. } => {
                if field.is_empty() {
                    return Err(BlackrockError::MissingTag);
                }
                Ok(())
            }
            Query::And { queries, not, .. } => {
                for q in queries {
                    q.validate()?;
                }
                if let Some(not) = not {
                    not.validate()?;
                }
                Ok(())
            }
            Query::Or { queries, not, .. } => {
                if not.is_some() {
                    return Err(BlackrockError::OrWithNot);
                }
                queries.iter().try_for_each(Query::validate)
            }
            Query::DisMax { queries, .. } => queries.iter().try_for_each(Query::validate),
            Query::AndThen { first, then, .. } => {
                first.validate()?;
                then.validate()
            }
        }
    }

    /// Decode a JSON query, reporting unknown node names as `UnknownType`
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("unknown variant") {
                BlackrockError::UnknownType(msg)
            } else {
                BlackrockError::Decode(msg)
            }
        })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, sep: &str, queries: &[Query]) -> fmt::Result {
            for (i, q) in queries.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", q)?;
            }
            Ok(())
        }

        match self {
            Query::Term { field, value, .. } => write!(f, "{}:{}", field, value),
            Query::And { queries, not, .. } => {
                write!(f, "(")?;
                list(f, "AND", queries)?;
                if let Some(not) = not {
                    write!(f, " -({})", not)?;
                }
                write!(f, ")")
            }
            Query::Or { queries, .. } => {
                write!(f, "(")?;
                list(f, "OR", queries)?;
                write!(f, ")")
            }
            Query::DisMax { queries, tiebreak, .. } => {
                write!(f, "dismax{}(", tiebreak)?;
                list(f, "|", queries)?;
                write!(f, ")")
            }
            Query::AndThen { first, then, within_sec, .. } => {
                write!(f, "({} THEN[{}s] {})", first, within_sec, then)
            }
        }
    }
}
