//! Query compilation against one segment

use super::ast::Query;
use super::boolean::{AndIterator, OrIterator, OrScore};
use super::iter::{DocIterator, EmptyIterator, TermIterator};
use super::sequence::AndThenIterator;
use crate::segment::Segment;
use crate::{BlackrockError, Result};

/// Where compiled terms get their postings from
pub trait PostingsSource {
    fn postings(&self, field: &str, value: &str) -> Result<Vec<u64>>;
}

impl PostingsSource for Segment {
    fn postings(&self, field: &str, value: &str) -> Result<Vec<u64>> {
        Segment::postings(self, field, value, 0)
    }
}

/// Build the iterator tree for `query`
///
/// A term with an empty value compiles to the empty iterator; a missing
/// postings file reads as an empty list.
pub fn compile(query: &Query, source: &dyn PostingsSource) -> Result<Box<dyn DocIterator>> {
    let iter: Box<dyn DocIterator> = match query {
        Query::Term { field, value, boost } => {
            if field.is_empty() {
                return Err(BlackrockError::MissingTag);
            }
            if value.is_empty() {
                return Ok(Box::new(EmptyIterator::new()));
            }
            let postings = source.postings(field, value)?;
            Box::new(TermIterator::new(format!("{}:{}", field, value), postings, *boost))
        }
        Query::And { queries, not, boost } => {
            let subs = compile_all(queries, source)?;
            let not = match not {
                Some(q) => Some(compile(q, source)?),
                None => None,
            };
            Box::new(AndIterator::new(subs, not, *boost))
        }
        Query::Or { queries, not, boost } => {
            if not.is_some() {
                return Err(BlackrockError::OrWithNot);
            }
            let subs = compile_all(queries, source)?;
            Box::new(OrIterator::new(subs, OrScore::Count, *boost))
        }
        Query::DisMax { queries, tiebreak, boost } => {
            let subs = compile_all(queries, source)?;
            Box::new(OrIterator::new(
                subs,
                OrScore::DisMax { tiebreak: *tiebreak },
                *boost,
            ))
        }
        Query::AndThen {
            first,
            then,
            within_sec,
            boost,
        } => Box::new(AndThenIterator::new(
            compile(first, source)?,
            compile(then, source)?,
            *within_sec,
            *boost,
        )),
    };
    Ok(iter)
}

fn compile_all(queries: &[Query], source: &dyn PostingsSource) -> Result<Vec<Box<dyn DocIterator>>> {
    queries.iter().map(|q| compile(q, source)).collect()
}
