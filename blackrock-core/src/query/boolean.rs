//! Or, DisMax and And(-Not) iterators

use super::iter::{DocId, DocIterator, NOT_STARTED, NO_MORE};

/// How an [`OrIterator`] scores the subs positioned on its doc
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrScore {
    /// Number of matching subs
    Count,
    /// Best sub score plus `tiebreak` times the rest
    DisMax { tiebreak: f32 },
}

/// Union of its subs
pub struct OrIterator {
    subs: Vec<Box<dyn DocIterator>>,
    doc: DocId,
    mode: OrScore,
    boost: f32,
}

impl OrIterator {
    pub fn new(subs: Vec<Box<dyn DocIterator>>, mode: OrScore, boost: f32) -> Self {
        Self {
            subs,
            doc: NOT_STARTED,
            mode,
            boost,
        }
    }

    fn settle(&mut self) -> DocId {
        self.doc = self
            .subs
            .iter()
            .map(|s| s.doc_id())
            .min()
            .unwrap_or(NO_MORE);
        self.doc
    }

    /// Subs positioned on the current doc
    fn current(&self) -> impl Iterator<Item = &(dyn DocIterator + 'static)> {
        let doc = self.doc;
        self.subs
            .iter()
            .map(|s| s.as_ref())
            .filter(move |s| s.doc_id() == doc)
    }
}

impl DocIterator for OrIterator {
    fn next(&mut self) -> DocId {
        match self.doc {
            NO_MORE => NO_MORE,
            NOT_STARTED => {
                for sub in self.subs.iter_mut() {
                    sub.next();
                }
                self.settle()
            }
            doc => {
                for sub in self.subs.iter_mut() {
                    if sub.doc_id() == doc {
                        sub.next();
                    }
                }
                self.settle()
            }
        }
    }

    fn advance(&mut self, target: DocId) -> DocId {
        if self.doc >= target {
            return self.doc;
        }
        for sub in self.subs.iter_mut() {
            if sub.doc_id() < target {
                sub.advance(target);
            }
        }
        self.settle()
    }

    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn time(&self) -> u32 {
        self.current().next().map_or(0, |s| s.time())
    }

    fn score(&self) -> f32 {
        let score = match self.mode {
            OrScore::Count => self.current().count() as f32,
            OrScore::DisMax { tiebreak } => {
                let (max, sum) = self
                    .current()
                    .map(|s| s.score())
                    .fold((0.0f32, 0.0f32), |(max, sum), s| (max.max(s), sum + s));
                max + tiebreak * (sum - max)
            }
        };
        score * self.boost
    }

    fn reset(&mut self) {
        for sub in self.subs.iter_mut() {
            sub.reset();
        }
        self.doc = NOT_STARTED;
    }

    fn describe(&self) -> String {
        let name = match self.mode {
            OrScore::Count => "or".to_string(),
            OrScore::DisMax { tiebreak } => format!("dismax{}", tiebreak),
        };
        let subs: Vec<String> = self.subs.iter().map(|s| s.describe()).collect();
        format!("{}({})", name, subs.join(", "))
    }
}

/// Intersection of its subs, minus the docs of `not`
///
/// The first sub leads; the others catch up to it.
pub struct AndIterator {
    subs: Vec<Box<dyn DocIterator>>,
    not: Option<Box<dyn DocIterator>>,
    doc: DocId,
    boost: f32,
}

impl AndIterator {
    pub fn new(
        subs: Vec<Box<dyn DocIterator>>,
        not: Option<Box<dyn DocIterator>>,
        boost: f32,
    ) -> Self {
        Self {
            subs,
            not,
            doc: NOT_STARTED,
            boost,
        }
    }

    /// Walk every sub to `target` or a later doc all of them share
    fn align(&mut self, mut target: DocId) -> DocId {
        'outer: loop {
            if target == NO_MORE {
                break;
            }

            for i in 1..self.subs.len() {
                let mut doc = self.subs[i].doc_id();
                if doc < target {
                    doc = self.subs[i].advance(target);
                }
                if doc != target {
                    target = self.subs[0].advance(doc);
                    continue 'outer;
                }
            }

            if let Some(not) = self.not.as_mut() {
                let mut excluded = not.doc_id();
                if excluded < target {
                    excluded = not.advance(target);
                }
                if excluded == target {
                    target = self.subs[0].next();
                    continue;
                }
            }
            break;
        }

        self.doc = target;
        self.doc
    }
}

impl DocIterator for AndIterator {
    fn next(&mut self) -> DocId {
        if self.doc == NO_MORE {
            return NO_MORE;
        }
        let target = match self.subs.first_mut() {
            Some(leader) => leader.next(),
            None => NO_MORE,
        };
        self.align(target)
    }

    fn advance(&mut self, target: DocId) -> DocId {
        if self.doc >= target {
            return self.doc;
        }
        let target = match self.subs.first_mut() {
            Some(leader) => leader.advance(target),
            None => NO_MORE,
        };
        self.align(target)
    }

    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn time(&self) -> u32 {
        self.subs.first().map_or(0, |s| s.time())
    }

    fn score(&self) -> f32 {
        self.subs.len() as f32 * self.boost
    }

    fn reset(&mut self) {
        for sub in self.subs.iter_mut() {
            sub.reset();
        }
        if let Some(not) = self.not.as_mut() {
            not.reset();
        }
        self.doc = NOT_STARTED;
    }

    fn describe(&self) -> String {
        let subs: Vec<String> = self.subs.iter().map(|s| s.describe()).collect();
        match &self.not {
            Some(not) => format!("and({} -{})", subs.join(", "), not.describe()),
            None => format!("and({})", subs.join(", ")),
        }
    }
}
