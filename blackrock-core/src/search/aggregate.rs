//! Faceted counters over every match in a window

use super::Hit;
use crate::index::SearchIndex;
use crate::query::Query;
use crate::segment::EVENT_TYPE_FIELD;
use crate::{DocRef, Metadata, Result, TimeWindow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Field name that turns on foreign id counting
pub const FOREIGN_ID_FIELD: &str = "foreign_id";

/// What to aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateRequest {
    /// Keys whose values are counted; `event_type` and `foreign_id` are
    /// accepted as well
    #[serde(default)]
    pub fields: Vec<String>,
    /// Number of matches to return as a sample
    #[serde(default)]
    pub sample_limit: usize,
    /// Chart bucket width in seconds; no chart when absent
    #[serde(default)]
    pub time_bucket_sec: Option<i64>,
}

/// Per `(bucket, event_type)` chart cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub count: u64,
    /// Distinct foreign ids in the cell
    pub unique: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregation {
    pub total: u64,
    /// `key -> value -> count` for the requested keys
    pub search: BTreeMap<String, BTreeMap<String, u64>>,
    /// Occurrences of every key seen, requested or not
    pub possible: BTreeMap<String, u64>,
    pub event_type: BTreeMap<String, u64>,
    /// First matches, ordered by creation time
    pub sample: Vec<Hit>,
    /// `bucket start second -> event_type -> cell`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<BTreeMap<i64, BTreeMap<String, ChartPoint>>>,
}

struct Aggregator<'a> {
    request: &'a AggregateRequest,
    fields: HashSet<&'a str>,
    seen: HashSet<(String, i64, String, String)>,
    out: Aggregation,
}

impl<'a> Aggregator<'a> {
    fn new(request: &'a AggregateRequest) -> Self {
        Self {
            request,
            fields: request.fields.iter().map(String::as_str).collect(),
            seen: HashSet::new(),
            out: Aggregation {
                chart: request.time_bucket_sec.map(|_| BTreeMap::new()),
                ..Default::default()
            },
        }
    }

    fn bump(map: &mut BTreeMap<String, BTreeMap<String, u64>>, key: &str, value: &str) {
        *map.entry(key.to_string())
            .or_default()
            .entry(value.to_string())
            .or_default() += 1;
    }

    fn add(&mut self, doc: DocRef, score: f32, metadata: Metadata) {
        self.out.total += 1;

        for kv in metadata.search.iter().chain(metadata.count.iter()) {
            if self.fields.contains(kv.key.as_str()) {
                Self::bump(&mut self.out.search, &kv.key, &kv.value);
            }
            *self.out.possible.entry(kv.key.clone()).or_default() += 1;
        }

        if self.fields.contains(EVENT_TYPE_FIELD) {
            *self
                .out
                .event_type
                .entry(metadata.event_type.clone())
                .or_default() += 1;
        }
        if self.fields.contains(FOREIGN_ID_FIELD) {
            Self::bump(&mut self.out.search, &metadata.foreign_type, &metadata.foreign_id);
        }

        if let (Some(width), Some(chart)) = (self.request.time_bucket_sec, self.out.chart.as_mut()) {
            let bucket = metadata.created_at_sec().div_euclid(width) * width;
            let cell = chart
                .entry(bucket)
                .or_default()
                .entry(metadata.event_type.clone())
                .or_default();
            cell.count += 1;

            let key = (
                metadata.foreign_id.clone(),
                bucket,
                metadata.event_type.clone(),
                metadata.foreign_type.clone(),
            );
            if self.seen.insert(key) {
                cell.unique += 1;
            }
        }

        if self.out.sample.len() < self.request.sample_limit {
            self.out.sample.push(Hit { doc, score, metadata });
        }
    }

    fn finish(mut self) -> Aggregation {
        self.out.sample.sort_by_key(|hit| hit.metadata.created_at_ns);
        self.out
    }
}

impl SearchIndex {
    /// Count values of the requested fields over every match in `window`
    pub fn aggregate(&self, query: &Query, window: &TimeWindow, request: &AggregateRequest) -> Result<Aggregation> {
        if let Some(width) = request.time_bucket_sec {
            if width <= 0 {
                return Err(crate::BlackrockError::Config(format!(
                    "time_bucket_sec must be positive, got {}",
                    width
                )));
            }
        }

        let mut agg = Aggregator::new(request);
        let mut failure = None;
        self.for_each(query, window, 0, |segment, doc_id, score| {
            match segment.read_forward_decode(doc_id) {
                Ok(envelope) => {
                    let doc = DocRef {
                        segment: segment.bucket(),
                        doc_id,
                    };
                    agg.add(doc, score, envelope.metadata.unwrap_or_default());
                    true
                }
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        })?;

        match failure {
            Some(e) => Err(e),
            None => Ok(agg.finish()),
        }
    }
}
