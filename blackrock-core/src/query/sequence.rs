//! AndThen: docs of one query that follow docs of another in time

use super::iter::{DocId, DocIterator, NOT_STARTED, NO_MORE};

/// Yields docs of `then` whose second lands in `(t, t + within]` for the
/// second `t` of some doc of `first`
///
/// `first` is drained into a sorted list of seconds on first use, so its
/// timestamps need not follow doc order.
pub struct AndThenIterator {
    first: Box<dyn DocIterator>,
    then: Box<dyn DocIterator>,
    within: u32,
    first_times: Option<Vec<u32>>,
    doc: DocId,
    boost: f32,
}

impl AndThenIterator {
    pub fn new(
        first: Box<dyn DocIterator>,
        then: Box<dyn DocIterator>,
        within: u32,
        boost: f32,
    ) -> Self {
        Self {
            first,
            then,
            within,
            first_times: None,
            doc: NOT_STARTED,
            boost,
        }
    }

    fn load_first(&mut self) {
        if self.first_times.is_some() {
            return;
        }
        let mut times = Vec::new();
        while self.first.next() != NO_MORE {
            times.push(self.first.time());
        }
        times.sort_unstable();
        self.first_times = Some(times);
    }

    fn follows(&self, second: u32) -> bool {
        let Some(times) = &self.first_times else {
            return false;
        };
        if self.within == 0 || second == 0 {
            return false;
        }
        let lo = second.saturating_sub(self.within);
        let idx = times.partition_point(|&t| t < lo);
        idx < times.len() && times[idx] < second
    }

    /// Step `then` forward from `doc` until a doc follows some `first` doc
    fn seek(&mut self, mut doc: DocId) -> DocId {
        while doc != NO_MORE && !self.follows(self.then.time()) {
            doc = self.then.next();
        }
        self.doc = doc;
        self.doc
    }
}

impl DocIterator for AndThenIterator {
    fn next(&mut self) -> DocId {
        if self.doc == NO_MORE {
            return NO_MORE;
        }
        self.load_first();
        let doc = self.then.next();
        self.seek(doc)
    }

    fn advance(&mut self, target: DocId) -> DocId {
        if self.doc >= target {
            return self.doc;
        }
        self.load_first();
        let doc = self.then.advance(target);
        self.seek(doc)
    }

    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn time(&self) -> u32 {
        self.then.time()
    }

    fn score(&self) -> f32 {
        2.0 * self.boost
    }

    fn reset(&mut self) {
        self.then.reset();
        self.doc = NOT_STARTED;
    }

    fn describe(&self) -> String {
        format!(
            "and_then[{}s]({}, {})",
            self.within,
            self.first.describe(),
            self.then.describe()
        )
    }
}
