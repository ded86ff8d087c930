//! Per-segment match driver

use super::ast::Query;
use super::compile::compile;
use super::iter::NO_MORE;
use crate::segment::Segment;
use crate::{Result, TimeWindow};
use tracing::debug;

/// Outcome of running a query over one segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentRun {
    /// Matches handed to the visitor
    pub delivered: usize,
    /// The visitor asked to stop
    pub stopped: bool,
}

/// Stream the matches of `query` in `segment` to `visitor`
///
/// Docs whose posting second falls outside `window` are skipped. At most
/// `limit` matches are delivered when `limit > 0`. The visitor returns
/// `false` to stop the scan.
pub fn run_segment<F>(
    segment: &Segment,
    query: &Query,
    window: &TimeWindow,
    limit: usize,
    visitor: &mut F,
) -> Result<SegmentRun>
where
    F: FnMut(&Segment, u32, f32) -> bool,
{
    let mut iter = compile(query, segment)?;
    debug!("Segment {} plan: {}", segment.bucket(), iter.describe());

    let mut run = SegmentRun::default();
    loop {
        if limit > 0 && run.delivered >= limit {
            break;
        }
        let doc = iter.next();
        if doc == NO_MORE {
            break;
        }
        if !window.contains(iter.time() as i64) {
            continue;
        }
        run.delivered += 1;
        if !visitor(segment, doc as u32, iter.score()) {
            run.stopped = true;
            break;
        }
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::{Envelope, Metadata, NANOS_PER_SEC};
    use tempfile::TempDir;

    /// Segment with one doc per second 1..=5, and their ids in that order
    fn segment(dir: &TempDir) -> (Segment, Vec<u32>) {
        let config = IndexConfig::with_data_dir(dir.path());
        let segment = Segment::open(dir.path(), 0, &config).unwrap();
        let ids = (1..=5)
            .map(|second| {
                segment
                    .ingest(Envelope::new(
                        Metadata::new("click", "user_id", "u")
                            .with_created_at(second * NANOS_PER_SEC)
                            .with_search("city", "vinkeveen"),
                    ))
                    .unwrap()
            })
            .collect();
        (segment, ids)
    }

    #[test]
    fn test_window_and_limit() {
        let dir = TempDir::new().unwrap();
        let (segment, ids) = segment(&dir);
        let query = Query::term("city", "vinkeveen");

        let mut seen = Vec::new();
        let run = run_segment(&segment, &query, &TimeWindow::new(2, 4), 0, &mut |_, doc, _| {
            seen.push(doc);
            true
        })
        .unwrap();
        assert_eq!(seen, ids[1..4].to_vec());
        assert_eq!(run, SegmentRun { delivered: 3, stopped: false });

        seen.clear();
        let run = run_segment(&segment, &query, &TimeWindow::new(0, 10), 2, &mut |_, doc, _| {
            seen.push(doc);
            true
        })
        .unwrap();
        assert_eq!(seen, ids[..2].to_vec());
        assert!(!run.stopped);
    }

    #[test]
    fn test_visitor_stops() {
        let dir = TempDir::new().unwrap();
        let (segment, _) = segment(&dir);
        let run = run_segment(
            &segment,
            &Query::match_all(),
            &TimeWindow::new(0, 10),
            0,
            &mut |_, _, _| false,
        )
        .unwrap();
        assert_eq!(run, SegmentRun { delivered: 1, stopped: true });
    }
}
