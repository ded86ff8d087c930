use crate::DocRef;

/// Bounded list of the best-scoring docs, kept sorted by descending score
///
/// Linear insertion; `k` is expected to be small.
#[derive(Debug, Clone)]
pub struct TopK {
    k: usize,
    hits: Vec<(f32, DocRef)>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            hits: Vec::with_capacity(k.min(1024)),
        }
    }

    /// Offer a doc; once full it only gets in by beating the current minimum
    pub fn insert(&mut self, score: f32, doc: DocRef) {
        if self.k == 0 {
            return;
        }
        if self.hits.len() == self.k {
            match self.hits.last() {
                Some(&(min, _)) if score > min => {}
                _ => return,
            }
        }

        // after every equal score, so earlier inserts win ties
        let pos = self.hits.partition_point(|&(s, _)| s >= score);
        self.hits.insert(pos, (score, doc));
        self.hits.truncate(self.k);
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn into_vec(self) -> Vec<(f32, DocRef)> {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: u32) -> DocRef {
        DocRef { segment: 0, doc_id: id }
    }

    #[test]
    fn test_keeps_best_in_order() {
        let mut top = TopK::new(3);
        for (i, score) in [1.0, 3.0, 2.0, 3.0, 0.5, 2.5].into_iter().enumerate() {
            top.insert(score, doc(i as u32));
        }
        let ids: Vec<u32> = top.into_vec().into_iter().map(|(_, d)| d.doc_id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn test_ties_favor_earlier_insertion() {
        let mut top = TopK::new(2);
        for i in 0..5 {
            top.insert(1.0, doc(i));
        }
        let ids: Vec<u32> = top.into_vec().into_iter().map(|(_, d)| d.doc_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut top = TopK::new(0);
        top.insert(9.0, doc(1));
        assert!(top.is_empty());
    }
}
