//! Document iterators
//!
//! Every iterator walks doc ids of one segment in strictly increasing order.
//! A fresh (or reset) iterator sits at [`NOT_STARTED`]; once exhausted it
//! sits at [`NO_MORE`] for good.

use crate::inverted::unpack;

pub type DocId = i32;

/// Terminal doc id
pub const NO_MORE: DocId = i32::MAX;

/// Doc id before the first `next`/`advance`
pub const NOT_STARTED: DocId = -1;

/// Common operation set of every compiled query node
pub trait DocIterator: Send {
    /// Move to the next matching doc
    fn next(&mut self) -> DocId;

    /// Move to the first matching doc `>= target`
    ///
    /// A no-op when the iterator already sits at or past `target`.
    fn advance(&mut self, target: DocId) -> DocId;

    fn doc_id(&self) -> DocId;

    /// Posting second of the current doc
    fn time(&self) -> u32;

    fn score(&self) -> f32;

    /// Return to the pre-`next` state
    fn reset(&mut self);

    /// Debug rendering of the iterator tree
    fn describe(&self) -> String;
}

// ============================================================================
// Term
// ============================================================================

/// Iterator over one postings list
pub struct TermIterator {
    label: String,
    postings: Vec<u64>,
    cursor: usize,
    doc: DocId,
    time: u32,
    boost: f32,
}

impl TermIterator {
    pub fn new(label: impl Into<String>, postings: Vec<u64>, boost: f32) -> Self {
        Self {
            label: label.into(),
            postings,
            cursor: 0,
            doc: NOT_STARTED,
            time: 0,
            boost,
        }
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    fn settle(&mut self) -> DocId {
        match self.postings.get(self.cursor) {
            Some(&posting) => {
                let (doc, second) = unpack(posting);
                self.doc = doc as DocId;
                self.time = second;
            }
            None => {
                self.cursor = self.postings.len();
                self.doc = NO_MORE;
                self.time = 0;
            }
        }
        self.doc
    }
}

impl DocIterator for TermIterator {
    fn next(&mut self) -> DocId {
        match self.doc {
            NO_MORE => NO_MORE,
            NOT_STARTED => {
                self.cursor = 0;
                self.settle()
            }
            _ => {
                self.cursor += 1;
                self.settle()
            }
        }
    }

    fn advance(&mut self, target: DocId) -> DocId {
        if self.doc >= target {
            return self.doc;
        }
        let start = if self.doc == NOT_STARTED { 0 } else { self.cursor };
        let rest = &self.postings[start..];
        let offset = rest.partition_point(|p| (unpack(*p).0 as DocId) < target);
        self.cursor = start + offset;
        self.settle()
    }

    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn time(&self) -> u32 {
        self.time
    }

    fn score(&self) -> f32 {
        self.boost
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.doc = NOT_STARTED;
        self.time = 0;
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.label, self.postings.len())
    }
}

// ============================================================================
// Empty
// ============================================================================

/// Matches nothing
pub struct EmptyIterator {
    doc: DocId,
}

impl EmptyIterator {
    pub fn new() -> Self {
        Self { doc: NOT_STARTED }
    }
}

impl Default for EmptyIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl DocIterator for EmptyIterator {
    fn next(&mut self) -> DocId {
        self.doc = NO_MORE;
        self.doc
    }

    fn advance(&mut self, _target: DocId) -> DocId {
        self.next()
    }

    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn time(&self) -> u32 {
        0
    }

    fn score(&self) -> f32 {
        0.0
    }

    fn reset(&mut self) {
        self.doc = NOT_STARTED;
    }

    fn describe(&self) -> String {
        "empty".to_string()
    }
}

/// Drain an iterator into its doc ids
pub fn collect_docs(iter: &mut dyn DocIterator) -> Vec<DocId> {
    let mut docs = Vec::new();
    loop {
        let doc = iter.next();
        if doc == NO_MORE {
            return docs;
        }
        docs.push(doc);
    }
}
