//! Integration tests for PageDB
//!
//! These tests drive the storage engine end to end through its public API
//! and check the page, index and query invariants on disk.

use std::collections::BTreeSet;

use proptest::prelude::*;
use tempfile::TempDir;

use pagedb_common::config::{Config, StorageConfig};
use pagedb_common::{Combinator, CompareOp, Record, Term, Value, TOUCH_DATE};
use pagedb_storage::{StorageEngine, Table};

/// Test helper to create an engine with a `T(k: string, v: integer)` table
fn create_test_engine(page_capacity: usize, index_capacity: usize) -> (StorageEngine, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = StorageConfig {
        data_dir: temp_dir.path().join("data").to_string_lossy().to_string(),
        table_page_capacity: page_capacity,
        index_page_capacity: index_capacity,
        ..StorageConfig::default()
    };

    let mut engine = StorageEngine::open(&config).expect("Failed to open storage engine");
    engine
        .create_table("T", "k", &[("k", "string"), ("v", "integer")])
        .expect("Failed to create table");
    (engine, temp_dir)
}

fn row(k: &str, v: i32) -> Record {
    Record::new().with("k", k).with("v", v)
}

fn keys_of(records: impl IntoIterator<Item = Record>) -> Vec<String> {
    records
        .into_iter()
        .map(|r| r.get("k").map(ToString::to_string).unwrap_or_default())
        .collect()
}

fn page_layout(table: &Table) -> Vec<Vec<(String, i32)>> {
    (0..table.page_count())
        .map(|n| {
            table
                .load_page(n)
                .expect("Failed to load page")
                .records()
                .iter()
                .map(|r| {
                    let k = r.get("k").map(ToString::to_string).unwrap_or_default();
                    let v = match r.get("v") {
                        Some(Value::Integer(v)) => *v,
                        _ => i32::MIN,
                    };
                    (k, v)
                })
                .collect()
        })
        .collect()
}

fn pairs(records: impl IntoIterator<Item = Record>) -> BTreeSet<(String, i32)> {
    records
        .into_iter()
        .map(|r| {
            let k = r.get("k").map(ToString::to_string).unwrap_or_default();
            let v = match r.get("v") {
                Some(Value::Integer(v)) => *v,
                _ => i32::MIN,
            };
            (k, v)
        })
        .collect()
}

// ============================================================================
// Scenario
// ============================================================================

#[test]
fn test_small_table_scenario() {
    let (mut engine, _temp_dir) = create_test_engine(2, 15);

    for (k, v) in [("B", 2), ("A", 1), ("C", 3)] {
        engine.insert("T", row(k, v)).expect("Failed to insert");
    }
    let table = engine.open_table("T").unwrap();
    assert_eq!(
        page_layout(&table),
        vec![
            vec![("A".to_string(), 1), ("B".to_string(), 2)],
            vec![("C".to_string(), 3)],
        ]
    );

    engine.create_index("T", "v").expect("Failed to create index");
    let below = engine
        .select(&[Term::new("T", "v", CompareOp::Lt, 3)], &[])
        .expect("Failed to select");
    assert_eq!(keys_of(below), vec!["A", "B"]);

    assert_eq!(engine.delete("T", &Record::new().with("v", 1)).unwrap(), 1);
    let table = engine.open_table("T").unwrap();
    assert_eq!(
        page_layout(&table),
        vec![vec![("B".to_string(), 2)], vec![("C".to_string(), 3)]]
    );

    let index = table.index("v").expect("index on v");
    let pivots: Vec<Value> = index
        .load_pages(table.store())
        .unwrap()
        .iter()
        .flat_map(|page| page.pivots().cloned().collect::<Vec<_>>())
        .collect();
    assert_eq!(pivots, vec![Value::from(2), Value::from(3)]);
    engine.verify("T").unwrap();
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_sort_and_capacity_hold_under_many_inserts() {
    let (mut engine, _temp_dir) = create_test_engine(3, 2);
    engine.create_index("T", "v").unwrap();

    for i in 0..60 {
        let key = format!("K{:03}", (i * 37) % 60);
        engine.insert("T", row(&key, i % 7)).unwrap();
    }

    let table = engine.open_table("T").unwrap();
    let layout = page_layout(&table);
    assert!(layout.iter().all(|page| !page.is_empty() && page.len() <= 3));
    let flat: Vec<&String> = layout.iter().flatten().map(|(k, _)| k).collect();
    assert!(flat.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(flat.len(), 60);

    let index = table.index("v").unwrap();
    let index_pages = index.load_pages(table.store()).unwrap();
    assert!(index_pages.iter().all(|p| !p.is_empty() && p.len() <= 2));
    assert_eq!(index_pages.iter().map(|p| p.len()).sum::<usize>(), 7);
    engine.verify("T").unwrap();
}

#[test]
fn test_index_follows_key_changing_update() {
    let (mut engine, _temp_dir) = create_test_engine(2, 2);
    for (k, v) in [("A", 1), ("B", 2), ("C", 1), ("D", 3), ("E", 2)] {
        engine.insert("T", row(k, v)).unwrap();
    }
    engine.create_index("T", "v").unwrap();
    engine.create_index("T", "k").unwrap();

    let updated = engine
        .update("T", "v", &Record::new().with("v", 1).with("k", "Z"))
        .unwrap();
    assert_eq!(updated, 2);
    engine.verify("T").unwrap();

    let all = engine.select_all("T").unwrap();
    assert_eq!(keys_of(all), vec!["B", "D", "E", "Z", "Z"]);

    let zs = engine
        .select(&[Term::new("T", "k", CompareOp::Eq, "Z")], &[])
        .unwrap();
    assert_eq!(pairs(zs), BTreeSet::from([("Z".to_string(), 1)]));
}

#[test]
fn test_update_refreshes_touch_date() {
    let (engine, _temp_dir) = create_test_engine(4, 4);
    engine.insert("T", row("A", 1)).unwrap();
    let before = engine
        .select_all("T")
        .unwrap()
        .next()
        .and_then(|r| r.touched_at())
        .unwrap();

    engine.update("T", "k", &row("A", 5)).unwrap();
    let after = engine.select_all("T").unwrap().next().unwrap();
    assert_eq!(after.get("v"), Some(&Value::from(5)));
    assert!(after.touched_at().unwrap() >= before);
}

#[test]
fn test_equality_round_trip() {
    let (mut engine, _temp_dir) = create_test_engine(2, 2);
    for (k, v) in [("A", 1), ("B", 2), ("C", 2), ("D", 4)] {
        engine.insert("T", row(k, v)).unwrap();
    }
    engine.create_index("T", "v").unwrap();

    let wanted = row("C", 2);
    let terms = [
        Term::new("T", "k", CompareOp::Eq, "C"),
        Term::new("T", "v", CompareOp::Eq, 2),
    ];
    let found: Vec<Record> = engine
        .select(&terms, &[Combinator::And])
        .unwrap()
        .collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].without_touch_date(), wanted);
    assert!(found[0].contains(TOUCH_DATE));
}

#[test]
fn test_combinator_laws() {
    let (mut engine, _temp_dir) = create_test_engine(2, 2);
    for (i, k) in ["A", "B", "C", "D", "E", "F", "G", "H"].iter().enumerate() {
        let v = i32::try_from(i).unwrap() % 4;
        engine.insert("T", row(k, v)).unwrap();
    }
    engine.create_index("T", "v").unwrap();

    // P is indexed, Q is answered by scanning
    let p = Term::new("T", "v", CompareOp::Ge, 2);
    let q = Term::new("T", "k", CompareOp::Le, "D");
    let a = pairs(engine.select(&[p.clone()], &[]).unwrap());
    let b = pairs(engine.select(&[q.clone()], &[]).unwrap());

    let select = |combinator| {
        pairs(
            engine
                .select(&[p.clone(), q.clone()], &[combinator])
                .unwrap(),
        )
    };
    assert_eq!(
        select(Combinator::Or),
        a.union(&b).cloned().collect::<BTreeSet<_>>()
    );
    assert_eq!(
        select(Combinator::Xor),
        a.symmetric_difference(&b).cloned().collect::<BTreeSet<_>>()
    );
    assert_eq!(
        select(Combinator::And),
        a.intersection(&b).cloned().collect::<BTreeSet<_>>()
    );

    // strict left fold: (P OR Q) AND R
    let r = Term::new("T", "v", CompareOp::Eq, 0);
    let c = pairs(engine.select(&[r.clone()], &[]).unwrap());
    let folded = pairs(
        engine
            .select(&[p, q, r], &[Combinator::Or, Combinator::And])
            .unwrap(),
    );
    let expected: BTreeSet<_> = a.union(&b).cloned().collect();
    assert_eq!(
        folded,
        expected.intersection(&c).cloned().collect::<BTreeSet<_>>()
    );
}

#[test]
fn test_empty_cleanup_removes_files() {
    let (mut engine, temp_dir) = create_test_engine(2, 1);
    for (k, v) in [("A", 1), ("B", 1), ("C", 2)] {
        engine.insert("T", row(k, v)).unwrap();
    }
    engine.create_index("T", "v").unwrap();

    assert_eq!(engine.delete("T", &Record::new().with("v", 1)).unwrap(), 2);
    let table = engine.open_table("T").unwrap();
    assert_eq!(table.page_count(), 1);
    assert_eq!(table.index("v").unwrap().page_ids().len(), 1);

    assert_eq!(engine.delete("T", &Record::new()).unwrap(), 1);
    let table = engine.open_table("T").unwrap();
    assert_eq!(table.page_count(), 0);
    assert!(table.index("v").unwrap().page_ids().is_empty());

    let pages_dir = temp_dir.path().join("data").join("T").join("pages");
    assert_eq!(std::fs::read_dir(pages_dir).unwrap().count(), 0);
    let index_dir = temp_dir.path().join("data").join("T").join("indices").join("v");
    assert_eq!(std::fs::read_dir(index_dir).unwrap().count(), 0);
}

// ============================================================================
// Persistence and configuration
// ============================================================================

#[test]
fn test_reopen_preserves_tables_and_indexes() {
    let (mut engine, temp_dir) = create_test_engine(2, 2);
    for (k, v) in [("A", 1), ("B", 2), ("C", 3)] {
        engine.insert("T", row(k, v)).unwrap();
    }
    engine.create_index("T", "v").unwrap();
    drop(engine);

    let config = StorageConfig {
        data_dir: temp_dir.path().join("data").to_string_lossy().to_string(),
        ..StorageConfig::default()
    };
    let engine = StorageEngine::open(&config).unwrap();
    assert_eq!(engine.table_names(), vec!["T".to_string()]);
    engine.verify("T").unwrap();

    let high = engine
        .select(&[Term::new("T", "v", CompareOp::Gt, 1)], &[])
        .unwrap();
    assert_eq!(keys_of(high), vec!["B", "C"]);
}

#[tokio::test]
async fn test_engine_from_properties_config() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    let path = temp_dir.path().join("pagedb.properties");
    std::fs::write(
        &path,
        format!(
            "MaximumRowsCountinPage=1\nBitmapSize=1\nDataDirectory={}\nCompression=zstd\n",
            data_dir.display()
        ),
    )
    .unwrap();

    let config = Config::load(&path).await.expect("Failed to load config");
    let mut engine = StorageEngine::open(&config.storage).unwrap();
    engine
        .create_table("T", "k", &[("k", "string"), ("v", "integer")])
        .unwrap();
    for (k, v) in [("B", 2), ("A", 1)] {
        engine.insert("T", row(k, v)).unwrap();
    }
    engine.create_index("T", "v").unwrap();

    let table = engine.open_table("T").unwrap();
    assert_eq!(table.page_count(), 2);
    assert_eq!(table.index("v").unwrap().page_ids().len(), 2);
    engine.verify("T").unwrap();
}

// ============================================================================
// Randomized operation sequences
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Insert(String, i32),
    UpdateByKey(String, i32),
    UpdateByValue(i32, String),
    Delete(i32),
}

fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["A", "B", "C", "D", "E", "F", "G", "H"]).prop_map(String::from)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (key_strategy(), 0..5i32).prop_map(|(k, v)| Op::Insert(k, v)),
        1 => (key_strategy(), 0..5i32).prop_map(|(k, v)| Op::UpdateByKey(k, v)),
        1 => (0..5i32, key_strategy()).prop_map(|(v, k)| Op::UpdateByValue(v, k)),
        1 => (0..5i32).prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_engine_matches_model(
        ops in prop::collection::vec(op_strategy(), 1..40),
        index_first in any::<bool>(),
    ) {
        let (mut engine, _temp_dir) = create_test_engine(2, 2);
        if index_first {
            engine.create_index("T", "v").unwrap();
        }
        let mut model: Vec<(String, i32)> = Vec::new();

        for op in &ops {
            match op {
                Op::Insert(k, v) => {
                    engine.insert("T", row(k, *v)).unwrap();
                    model.push((k.clone(), *v));
                }
                Op::UpdateByKey(k, v) => {
                    let count = engine.update("T", "k", &row(k, *v)).unwrap();
                    let mut expected = 0;
                    for entry in model.iter_mut().filter(|(mk, _)| mk == k) {
                        entry.1 = *v;
                        expected += 1;
                    }
                    prop_assert_eq!(count, expected);
                }
                Op::UpdateByValue(v, k) => {
                    let mask = Record::new().with("v", *v).with("k", k.as_str());
                    let count = engine.update("T", "v", &mask).unwrap();
                    let mut expected = 0;
                    for entry in model.iter_mut().filter(|(_, mv)| mv == v) {
                        entry.0 = k.clone();
                        expected += 1;
                    }
                    prop_assert_eq!(count, expected);
                }
                Op::Delete(v) => {
                    let count = engine.delete("T", &Record::new().with("v", *v)).unwrap();
                    let before = model.len();
                    model.retain(|(_, mv)| mv != v);
                    prop_assert_eq!(count, before - model.len());
                }
            }
            engine.verify("T").unwrap();
        }

        if !index_first {
            engine.create_index("T", "v").unwrap();
            engine.verify("T").unwrap();
        }

        let stored: Vec<Record> = engine.select_all("T").unwrap().collect();
        let stored_keys = keys_of(stored.clone());
        prop_assert!(stored_keys.windows(2).all(|w| w[0] <= w[1]));

        let mut stored_pairs: Vec<(String, i32)> = pairs(stored).into_iter().collect();
        let mut model_pairs: Vec<(String, i32)> = model
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        stored_pairs.sort();
        model_pairs.sort();
        prop_assert_eq!(stored_pairs, model_pairs);
        prop_assert_eq!(stored_keys.len(), model.len());

        for target in 0..5 {
            let found = pairs(
                engine
                    .select(&[Term::new("T", "v", CompareOp::Le, target)], &[])
                    .unwrap(),
            );
            let expected: BTreeSet<(String, i32)> = model
                .iter()
                .filter(|(_, v)| *v <= target)
                .cloned()
                .collect();
            prop_assert_eq!(found, expected);
        }
    }
}
