//! CLI utilities

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use pagedb_common::error::ValidationError;
use pagedb_common::{Combinator, CompareOp, Record, Term, Value, TOUCH_DATE};
use pagedb_storage::{ColumnDescriptor, ResultSet, StorageEngine};

const OPERATOR_CHARS: &[char] = &['<', '>', '=', '!'];

/// Parse `column=value` pairs against a table schema
pub fn parse_record(schema: &[ColumnDescriptor], pairs: &[String]) -> Result<Record> {
    let mut record = Record::new();
    for pair in pairs {
        let (column, text) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected column=value, got {pair:?}"))?;
        let column = column.trim();
        let value = parse_value(schema, column, text)?;
        record.insert(column, value);
    }
    Ok(record)
}

fn parse_value(schema: &[ColumnDescriptor], column: &str, text: &str) -> Result<Value> {
    let descriptor = schema
        .iter()
        .find(|d| d.column == column)
        .ok_or_else(|| anyhow!("unknown column {column}"))?;
    let value = Value::parse(descriptor.data_type, text).map_err(|reason| {
        ValidationError::InvalidValue {
            column: column.to_string(),
            reason,
        }
    })?;
    Ok(value)
}

/// Parse `column<op>value`, e.g. `v<=3`
pub fn parse_predicate(table: &str, schema: &[ColumnDescriptor], text: &str) -> Result<Term> {
    let start = text
        .find(OPERATOR_CHARS)
        .ok_or_else(|| anyhow!("no comparison operator in {text:?}"))?;
    let rest = &text[start..];
    let len = rest
        .find(|c: char| !OPERATOR_CHARS.contains(&c))
        .unwrap_or(rest.len());

    let column = text[..start].trim();
    let op: CompareOp = rest[..len].parse()?;
    let value = parse_value(schema, column, &rest[len..])?;
    Ok(Term::new(table, column, op, value))
}

/// Parse an infix query: `predicate (AND|OR|XOR predicate)*`
pub fn parse_query(
    table: &str,
    schema: &[ColumnDescriptor],
    words: &[String],
) -> Result<(Vec<Term>, Vec<Combinator>)> {
    let mut terms = Vec::new();
    let mut combinators = Vec::new();
    for (i, word) in words.iter().enumerate() {
        if i % 2 == 0 {
            terms.push(parse_predicate(table, schema, word)?);
        } else {
            combinators.push(word.parse()?);
        }
    }
    if !terms.is_empty() && combinators.len() != terms.len() - 1 {
        bail!("query ends with a dangling combinator");
    }
    Ok((terms, combinators))
}

/// Print records one per line, as text or JSON
pub fn print_records(records: ResultSet, json: bool) -> Result<usize> {
    let count = records.len();
    for record in records {
        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            println!("{record}");
        }
    }
    Ok(count)
}

// ============================================================================
// Randomized driver
// ============================================================================

/// Counts observed by one driver run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DriveReport {
    pub inserted: usize,
    pub flagged: usize,
    pub updated: usize,
    pub deleted: usize,
    pub remaining: usize,
}

/// Fill a fresh table with random rows, index every column, then exercise
/// select, update and delete on the boolean column
pub fn drive(engine: &mut StorageEngine, table: &str, rows: usize, seed: u64) -> Result<DriveReport> {
    let mut rng = StdRng::seed_from_u64(seed);
    let columns = [
        ("name", "string"),
        ("count", "integer"),
        ("ratio", "float"),
        ("flag", "boolean"),
        ("seen", "timestamp"),
    ];
    engine
        .create_table(table, "name", &columns)
        .with_context(|| format!("creating driver table {table}"))?;

    let epoch = DateTime::<Utc>::from_timestamp(1_700_000_000, 0)
        .ok_or_else(|| anyhow!("driver epoch out of range"))?;
    let mut report = DriveReport::default();
    for _ in 0..rows {
        let name: String = (0..8)
            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
            .collect();
        let record = Record::new()
            .with("name", name)
            .with("count", rng.gen_range(0..1000i32))
            .with("ratio", rng.gen::<f64>())
            .with("flag", rng.gen_bool(0.5))
            .with("seen", epoch + chrono::Duration::seconds(rng.gen_range(0..86_400i64)));
        engine.insert(table, record)?;
        report.inserted += 1;
    }

    for (column, _) in columns.iter().chain(&[(TOUCH_DATE, "timestamp")]) {
        engine.create_index(table, column)?;
    }
    info!("Driver filled {} with {} rows", table, report.inserted);

    let flagged = [Term::new(table, "flag", CompareOp::Eq, true)];
    report.flagged = engine.select(&flagged, &[])?.len();

    let mask = Record::new().with("flag", true).with("count", -1i32);
    report.updated = engine.update(table, "flag", &mask)?;

    report.deleted = engine.delete(table, &Record::new().with("flag", false))?;
    report.remaining = engine.select_all(table)?.len();

    engine.verify(table)?;
    if report.updated != report.flagged || report.remaining != report.flagged {
        bail!("driver counts disagree: {report:?}");
    }
    Ok(report)
}
