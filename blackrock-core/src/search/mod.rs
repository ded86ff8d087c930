//! Query surfaces over the segment manager: top-K search, streamed fetch and
//! faceted aggregation

mod aggregate;
mod topk;

pub use aggregate::{AggregateRequest, Aggregation, ChartPoint};
pub use topk::TopK;

use crate::index::SearchIndex;
use crate::query::Query;
use crate::{DocRef, Metadata, Result, TimeWindow};
use serde::{Deserialize, Serialize};

/// Default number of hits returned by [`SearchIndex::search`]
pub const DEFAULT_SEARCH_SIZE: usize = 100;

/// A matched document with its decoded metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(flatten)]
    pub doc: DocRef,
    pub score: f32,
    pub metadata: Metadata,
}

/// Top-K search result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    /// Every match in the window, not just the returned ones
    pub total: usize,
    pub hits: Vec<Hit>,
}

impl SearchIndex {
    /// Best `size` matches by score; equal scores keep match order
    pub fn search(&self, query: &Query, window: &TimeWindow, size: usize) -> Result<SearchResult> {
        let mut top = TopK::new(size);
        let total = self.for_each(query, window, 0, |segment, doc_id, score| {
            top.insert(
                score,
                DocRef {
                    segment: segment.bucket(),
                    doc_id,
                },
            );
            true
        })?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, doc) in top.into_vec() {
            let Some(segment) = self.segment(doc.segment)? else {
                continue;
            };
            if let Some(metadata) = segment.read_forward_decode(doc.doc_id)?.metadata {
                hits.push(Hit { doc, score, metadata });
            }
        }

        Ok(SearchResult { total, hits })
    }

    /// Stream up to `limit` matches to `on_hit` as they are found
    ///
    /// `on_hit` returns `false` to cancel the scan. Returns the number of
    /// hits delivered.
    pub fn fetch<F>(&self, query: &Query, window: &TimeWindow, limit: usize, mut on_hit: F) -> Result<usize>
    where
        F: FnMut(Hit) -> bool,
    {
        let mut failure = None;
        let delivered = self.for_each(query, window, limit, |segment, doc_id, score| {
            let metadata = match segment.read_forward_decode(doc_id) {
                Ok(envelope) => envelope.metadata.unwrap_or_default(),
                Err(e) => {
                    failure = Some(e);
                    return false;
                }
            };
            on_hit(Hit {
                doc: DocRef {
                    segment: segment.bucket(),
                    doc_id,
                },
                score,
                metadata,
            })
        })?;

        match failure {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::{Envelope, NANOS_PER_SEC};
    use tempfile::TempDir;

    fn seeded(dir: &TempDir) -> (SearchIndex, Vec<DocRef>) {
        let index = SearchIndex::open(IndexConfig::with_data_dir(dir.path())).unwrap();
        let rows = [("x", "y"), ("x", "z"), ("w", "y"), ("x", "y")];
        let refs = rows
            .iter()
            .enumerate()
            .map(|(i, (a, b))| {
                index
                    .ingest(Envelope::new(
                        Metadata::new("click", "user_id", format!("u{}", i))
                            .with_created_at((i as i64 + 1) * NANOS_PER_SEC)
                            .with_search("a", *a)
                            .with_search("b", *b),
                    ))
                    .unwrap()
            })
            .collect();
        (index, refs)
    }

    #[test]
    fn test_search_ranks_by_score() {
        let dir = TempDir::new().unwrap();
        let (index, refs) = seeded(&dir);
        let query = Query::or(vec![Query::term("a", "x"), Query::term("b", "y")]);

        let result = index.search(&query, &TimeWindow::new(0, 100), 2).unwrap();
        assert_eq!(result.total, 4);
        let docs: Vec<DocRef> = result.hits.iter().map(|h| h.doc).collect();
        assert_eq!(docs, vec![refs[0], refs[3]]);
        assert_eq!(result.hits[0].score, 2.0);
        assert_eq!(result.hits[1].metadata.foreign_id, "u3");
    }

    #[test]
    fn test_fetch_streams_and_cancels() {
        let dir = TempDir::new().unwrap();
        let (index, _) = seeded(&dir);
        let window = TimeWindow::new(0, 100);

        let mut ids = Vec::new();
        let n = index
            .fetch(&Query::term("a", "x"), &window, 2, |hit| {
                ids.push(hit.metadata.foreign_id);
                true
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(ids, vec!["u0", "u1"]);

        let mut seen = 0;
        index
            .fetch(&Query::match_all(), &window, 0, |_| {
                seen += 1;
                false
            })
            .unwrap();
        assert_eq!(seen, 1);
    }
}
