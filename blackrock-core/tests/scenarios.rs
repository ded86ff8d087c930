//! End-to-end scenarios over the public API

use blackrock_core::consumer::{MemoryLog, PartitionConsumer};
use blackrock_core::forward::ForwardLog;
use blackrock_core::query::{collect_docs, compile};
use blackrock_core::segment::Segment;
use blackrock_core::{
    Envelope, IndexConfig, Metadata, Query, SearchIndex, TimeWindow, NANOS_PER_SEC,
};
use chrono::{TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open(dir: &TempDir) -> SearchIndex {
    SearchIndex::open(IndexConfig::with_data_dir(dir.path())).unwrap()
}

fn event(second: i64, search: &[(&str, &str)]) -> Envelope {
    let mut metadata = Metadata::new("click", "user_id", format!("u{}", second))
        .with_created_at(second * NANOS_PER_SEC);
    for (k, v) in search {
        metadata = metadata.with_search(*k, *v);
    }
    Envelope::new(metadata)
}

fn matching(index: &SearchIndex, query: &Query, window: TimeWindow) -> Vec<u32> {
    let mut docs = Vec::new();
    index
        .for_each(query, &window, 0, |_, doc, _| {
            docs.push(doc);
            true
        })
        .unwrap();
    docs
}

#[test]
fn postings_round_trip() {
    let dir = TempDir::new().unwrap();
    let index = open(&dir);
    let ids: Vec<u32> = (1..=3)
        .map(|second| index.ingest(event(second, &[("city", "vinkeveen")])).unwrap().doc_id)
        .collect();

    let query = Query::term("city", "vinkeveen");
    let window = TimeWindow::new(0, 7200);
    let result = index.search(&query, &window, 10).unwrap();
    assert_eq!(result.total, 3);
    assert_eq!(matching(&index, &query, window), ids);
}

#[test]
fn boolean_intersection() {
    let dir = TempDir::new().unwrap();
    let index = open(&dir);
    index.ingest(event(1, &[("a", "x")])).unwrap();
    let second = index.ingest(event(2, &[("a", "x"), ("b", "y")])).unwrap();
    index.ingest(event(3, &[("b", "y")])).unwrap();
    let fourth = index.ingest(event(4, &[("a", "x"), ("b", "y")])).unwrap();

    let query = Query::and(vec![Query::term("a", "x"), Query::term("b", "y")]);
    assert_eq!(
        matching(&index, &query, TimeWindow::new(0, 100)),
        vec![second.doc_id, fourth.doc_id]
    );
}

#[test]
fn and_not_nested() {
    let dir = TempDir::new().unwrap();
    let index = open(&dir);
    let a: BTreeSet<i64> = [1, 2, 3, 9].into();
    let b: BTreeSet<i64> = [4, 5].into();

    // position in ingest order -> stored doc id
    let mut ids = Vec::new();
    for doc in 0..=10i64 {
        let mut tags = Vec::new();
        if doc >= 1 {
            tags.push(("c", "z"));
        }
        if a.contains(&doc) {
            tags.push(("a", "x"));
        }
        if b.contains(&doc) {
            tags.push(("b", "y"));
        }
        ids.push(index.ingest(event(doc + 1, &tags)).unwrap().doc_id);
    }

    let inner = Query::and_not(
        Query::term("b", "y"),
        vec![Query::term("c", "z"), Query::term("c", "z")],
    );
    let query = Query::and_not(Query::term("a", "x"), vec![inner]);
    assert_eq!(
        matching(&index, &query, TimeWindow::new(0, 100)),
        [6, 7, 8, 10].map(|position| ids[position]).to_vec()
    );
}

#[test]
fn and_then_window() {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::with_data_dir(dir.path());
    let segment = Segment::open(dir.path(), 0, &config).unwrap();

    let inverted = segment.inverted();
    for (doc, second) in [(1, 100), (2, 100), (3, 250)] {
        inverted.append("event", "click", doc, second).unwrap();
    }
    for (doc, second) in [(30, 10), (40, 101), (41, 102), (42, 120), (50, 251), (100, 300)] {
        inverted.append("event", "buy", doc, second).unwrap();
    }

    let query = Query::and_then(Query::term("event", "click"), Query::term("event", "buy"), 2);
    let mut iter = compile(&query, &segment).unwrap();
    assert_eq!(collect_docs(iter.as_mut()), vec![40, 41, 50]);
}

#[test]
fn corruption_recovery() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("main.bin");
    let log = ForwardLog::open(&path).unwrap();
    let r1 = log.append(b"first record").unwrap();
    let r2 = log.append(&[7u8; 100]).unwrap();
    let r3 = log.append(b"third record").unwrap();
    drop(log);

    // first byte of the magic in R2's header
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[r2 as usize * 64 + 8] = 0;
    std::fs::write(&path, &bytes).unwrap();

    let log = ForwardLog::open(&path).unwrap();
    let mut seen = Vec::new();
    log.scan(0, |id, data| {
        seen.push((id, data.to_vec()));
        true
    })
    .unwrap();

    assert_eq!(
        seen,
        vec![(r1, b"first record".to_vec()), (r3, b"third record".to_vec())]
    );
}

#[test]
fn offset_checkpoint_survives_restart() {
    let dir = TempDir::new().unwrap();
    let index = Arc::new(open(&dir));
    let log = MemoryLog::new();
    for i in 0..1000i64 {
        let envelope = Envelope::new(
            Metadata::new("click", "user_id", format!("u{}", i))
                .with_created_at((i % 3000 + 1) * NANOS_PER_SEC),
        );
        log.publish_envelope(&envelope).unwrap();
    }
    log.close();

    // killed after 400 messages
    {
        let mut consumer = PartitionConsumer::new(index.clone(), log.stream(0)).with_poll(Duration::ZERO);
        consumer.start().unwrap();
        for _ in 0..400 {
            assert!(consumer.poll_once().unwrap());
        }
    }

    let (_tx, rx) = crossbeam_channel::bounded(0);
    let stats = PartitionConsumer::new(index.clone(), log.stream(0))
        .with_poll(Duration::ZERO)
        .run(&rx)
        .unwrap();
    assert_eq!(stats.ingested, 600);

    let segment = index.segment(0).unwrap().unwrap();
    for i in 0..1000 {
        assert_eq!(segment.inverted().size("user_id", &format!("u{}", i)).unwrap(), 1);
    }
    assert_eq!(matching(&index, &Query::match_all(), TimeWindow::new(0, 4000)).len(), 1000);
}

#[test]
fn automatic_time_tags() {
    let dir = TempDir::new().unwrap();
    let index = open(&dir);
    let t = Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 7).unwrap().timestamp();
    let doc = index.ingest(event(t, &[])).unwrap();

    let window = TimeWindow::new(t - 10, t + 10);
    for (field, value) in [
        ("year", "2020"),
        ("year-month", "2020-03"),
        ("year-month-day", "2020-03-04"),
        ("year-month-day-hour", "2020-03-04-05"),
    ] {
        assert_eq!(
            matching(&index, &Query::term(field, value), window),
            vec![doc.doc_id],
            "{}:{}",
            field,
            value
        );
    }
}

#[test]
fn match_all_counts_every_ingest() {
    let dir = TempDir::new().unwrap();
    let index = open(&dir);
    let seconds = [5, 10, 3700, 7300, 7301, 20];
    for second in seconds {
        index.ingest(event(second, &[])).unwrap();
    }

    let docs = matching(&index, &Query::match_all(), TimeWindow::new(0, 10_800));
    assert_eq!(docs.len(), seconds.len());
    assert_eq!(index.list_segments().unwrap(), vec![0, 1, 2]);
}

#[test]
fn reopen_keeps_hits() {
    let dir = TempDir::new().unwrap();
    let query = Query::or(vec![Query::term("city", "utrecht"), Query::term("city", "delft")]);
    let window = TimeWindow::new(0, 10_000);

    let before = {
        let index = open(&dir);
        index.ingest(event(1, &[("city", "utrecht")])).unwrap();
        index.ingest(event(4000, &[("city", "delft")])).unwrap();
        index.ingest(event(4001, &[("city", "leiden")])).unwrap();
        let hits = index.search(&query, &window, 10).unwrap().hits;
        index.close().unwrap();
        hits
    };

    let index = open(&dir);
    let after = index.search(&query, &window, 10).unwrap().hits;
    assert_eq!(before, after);
    assert_eq!(after.len(), 2);
}

#[test]
fn repeated_terms_count_once() {
    let dir = TempDir::new().unwrap();
    let index = open(&dir);
    let doc = index
        .ingest(Envelope::new(
            Metadata::new("click", "user_id", "42")
                .with_created_at(NANOS_PER_SEC)
                .with_search("user_id", "42")
                .with_search("City", "A")
                .with_search("city", "a"),
        ))
        .unwrap();

    let window = TimeWindow::new(0, 100);
    for query in [Query::term("user_id", "42"), Query::term("city", "a"), Query::match_all()] {
        assert_eq!(matching(&index, &query, window), vec![doc.doc_id], "{}", query);
        let result = index.search(&query, &window, 10).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.hits.len(), 1);
    }
}
