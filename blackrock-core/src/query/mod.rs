//! Query engine
//!
//! A [`Query`] tree compiles per segment into a tree of [`DocIterator`]s
//! over postings lists. Supports:
//! - Term lookups (including the synthetic match-all term)
//! - And with an optional Not, Or, DisMax
//! - AndThen event sequences within a window of seconds

mod ast;
mod boolean;
mod compile;
mod foreach;
mod iter;
mod sequence;

pub use ast::Query;
pub use boolean::{AndIterator, OrIterator, OrScore};
pub use compile::{compile, PostingsSource};
pub use foreach::{run_segment, SegmentRun};
pub use iter::{collect_docs, DocId, DocIterator, EmptyIterator, TermIterator, NOT_STARTED, NO_MORE};
pub use sequence::AndThenIterator;
