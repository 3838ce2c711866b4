//! Client-side query evaluation.
//!
//! Queries are opaque filter/sort/skip/limit descriptors carried through the
//! public surface unchanged. Because the storage adapters only expose a full
//! table scan, filters are evaluated here, over the scan result, with
//! MongoDB-style semantics.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{KinveyError, QueryError, Result};

// ============================================================================
// Query
// ============================================================================

/// Sort direction for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One entry of a cascading sort specification.
#[derive(Debug, Clone)]
pub struct SortEntry {
    pub field: String,
    pub direction: SortDirection,
}

impl SortEntry {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Filter, sort, and pagination descriptor.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// MongoDB-style filter object.
    pub filter: Option<Value>,
    /// Cascading sort entries, highest priority first.
    pub sort: Vec<SortEntry>,
    /// Number of matching records to skip.
    pub skip: Option<usize>,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl Query {
    /// A query with only a filter.
    pub fn filtered(filter: Value) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }
}

/// Grouping descriptor: bucket records by the values of `key` fields,
/// optionally restricted by a filter first.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub key: Vec<String>,
    pub condition: Option<Value>,
}

// ============================================================================
// Value comparison
// ============================================================================

/// Order two JSON values: numbers, then strings, then booleans, then the
/// rest; nulls sort last. NaN compares equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64().unwrap_or(f64::NAN);
            let fb = nb.as_f64().unwrap_or(f64::NAN);
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
        (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        _ => 3,
    }
}

/// Resolve a dot-separated path inside a record.
pub fn get_field<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

// ============================================================================
// Operator evaluation
// ============================================================================

/// A non-empty object whose keys all start with `$` is an operator object;
/// anything else is a direct-equality operand.
fn is_operator_object(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) if !obj.is_empty() => obj.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn eval_scalar_op(value: &Value, op: &str, operand: &Value) -> Result<bool> {
    match op {
        "$eq" => Ok(value == operand),
        "$ne" => Ok(value != operand),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            if value.is_null() || operand.is_null() {
                return Ok(false);
            }
            let cmp = compare_values(value, operand);
            Ok(match op {
                "$gt" => cmp == Ordering::Greater,
                "$gte" => cmp != Ordering::Less,
                "$lt" => cmp == Ordering::Less,
                _ => cmp != Ordering::Greater,
            })
        }
        "$in" => {
            let items = match operand.as_array() {
                Some(a) => a,
                None => return Ok(false),
            };
            if let Some(arr) = value.as_array() {
                return Ok(arr.iter().any(|v| items.contains(v)));
            }
            Ok(items.contains(value))
        }
        "$nin" => {
            let items = match operand.as_array() {
                Some(a) => a,
                None => return Ok(true),
            };
            if let Some(arr) = value.as_array() {
                return Ok(!arr.iter().any(|v| items.contains(v)));
            }
            Ok(!items.contains(value))
        }
        "$all" => {
            let (arr, targets) = match (value.as_array(), operand.as_array()) {
                (Some(a), Some(t)) => (a, t),
                _ => return Ok(false),
            };
            Ok(targets.iter().all(|t| arr.contains(t)))
        }
        "$size" => {
            let arr = match value.as_array() {
                Some(a) => a,
                None => return Ok(false),
            };
            Ok(operand.as_u64().map(|n| arr.len() as u64 == n) == Some(true))
        }
        "$regex" => {
            let (text, pattern) = match (value.as_str(), operand.as_str()) {
                (Some(t), Some(p)) => (t, p),
                _ => return Ok(false),
            };
            let re = regex::Regex::new(pattern)
                .map_err(|e| KinveyError::Query(QueryError::InvalidRegex(e.to_string())))?;
            Ok(re.is_match(text))
        }
        other => Err(KinveyError::Query(QueryError::UnknownOperator(
            other.to_string(),
        ))),
    }
}

/// Comparison ops lift over arrays: ANY element matching satisfies the op.
const LIFTABLE_OPS: &[&str] = &["$eq", "$gt", "$gte", "$lt", "$lte"];

fn eval_op(value: &Value, op: &str, operand: &Value) -> Result<bool> {
    if let Some(arr) = value.as_array() {
        if !operand.is_array() && LIFTABLE_OPS.contains(&op) {
            for elem in arr {
                if eval_scalar_op(elem, op, operand)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        // $ne over an array: every element must differ
        if !operand.is_array() && op == "$ne" {
            return Ok(arr.iter().all(|elem| elem != operand));
        }
    }
    eval_scalar_op(value, op, operand)
}

fn eval_op_object(value: &Value, ops: &Map<String, Value>) -> Result<bool> {
    for (op, operand) in ops {
        if !eval_op(value, op, operand)? {
            return Ok(false);
        }
    }
    Ok(true)
}

// ============================================================================
// Filter evaluation
// ============================================================================

/// Evaluate a MongoDB-style filter against a record. Logical operators
/// (`$and`, `$or`, `$not`) combine sub-filters; field conditions are an
/// implicit AND.
pub fn matches_filter(record: &Value, filter: &Value) -> Result<bool> {
    let filter_obj = match filter.as_object() {
        Some(o) => o,
        None => return Ok(true),
    };

    if let Some(subs) = filter_obj.get("$and").and_then(Value::as_array) {
        for sub in subs {
            if !matches_filter(record, sub)? {
                return Ok(false);
            }
        }
    }

    if let Some(subs) = filter_obj.get("$or").and_then(Value::as_array) {
        let mut any = false;
        for sub in subs {
            if matches_filter(record, sub)? {
                any = true;
                break;
            }
        }
        if !any {
            return Ok(false);
        }
    }

    if let Some(sub) = filter_obj.get("$not") {
        if matches_filter(record, sub)? {
            return Ok(false);
        }
    }

    for (field, condition) in filter_obj {
        if field.starts_with('$') {
            continue;
        }

        // $exists needs presence, not value, so it is handled before the
        // missing-field-becomes-null fallback below.
        if let Some(ops) = condition.as_object() {
            if let Some(want) = ops.get("$exists") {
                let want_exists = want.as_bool().unwrap_or(false);
                let present = get_field(record, field).is_some();
                if want_exists != present {
                    return Ok(false);
                }
                let rest: Map<String, Value> = ops
                    .iter()
                    .filter(|(k, _)| *k != "$exists")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if !rest.is_empty() {
                    let value = get_field(record, field).unwrap_or(&Value::Null);
                    if !eval_op_object(value, &rest)? {
                        return Ok(false);
                    }
                }
                continue;
            }
        }

        let value = get_field(record, field).unwrap_or(&Value::Null);
        let matched = if is_operator_object(condition) {
            eval_op_object(value, condition.as_object().unwrap())?
        } else {
            eval_op(value, "$eq", condition)?
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

// ============================================================================
// Execution
// ============================================================================

/// Sort records in place by cascading sort entries.
fn sort_records(records: &mut [Value], sort: &[SortEntry]) {
    records.sort_by(|a, b| {
        for entry in sort {
            let va = get_field(a, &entry.field).unwrap_or(&Value::Null);
            let vb = get_field(b, &entry.field).unwrap_or(&Value::Null);
            let cmp = compare_values(va, vb);
            if cmp != Ordering::Equal {
                return match entry.direction {
                    SortDirection::Desc => cmp.reverse(),
                    SortDirection::Asc => cmp,
                };
            }
        }
        Ordering::Equal
    });
}

/// Filter, sort, then paginate a scanned record list.
pub fn execute(records: Vec<Value>, query: &Query) -> Result<Vec<Value>> {
    let mut matched = match &query.filter {
        Some(filter) => {
            let mut out = Vec::new();
            for record in records {
                if matches_filter(&record, filter)? {
                    out.push(record);
                }
            }
            out
        }
        None => records,
    };

    if !query.sort.is_empty() {
        sort_records(&mut matched, &query.sort);
    }

    let skipped = matched.into_iter().skip(query.skip.unwrap_or(0));
    Ok(match query.limit {
        Some(n) => skipped.take(n).collect(),
        None => skipped.collect(),
    })
}

/// Count matches; sort, skip, and limit are ignored.
pub fn count_matching(records: &[Value], query: &Query) -> Result<usize> {
    match &query.filter {
        Some(filter) => {
            let mut n = 0;
            for record in records {
                if matches_filter(record, filter)? {
                    n += 1;
                }
            }
            Ok(n)
        }
        None => Ok(records.len()),
    }
}

/// Group records by the aggregation's key fields. Each output row carries
/// the key fields and a `count`. Rows are ordered by key for determinism.
pub fn group(records: &[Value], aggregation: &Aggregation) -> Result<Vec<Value>> {
    let mut buckets: BTreeMap<String, (Map<String, Value>, u64)> = BTreeMap::new();

    for record in records {
        if let Some(condition) = &aggregation.condition {
            if !matches_filter(record, condition)? {
                continue;
            }
        }

        let mut key_obj = Map::new();
        for field in &aggregation.key {
            let value = get_field(record, field).cloned().unwrap_or(Value::Null);
            key_obj.insert(field.clone(), value);
        }
        let bucket_key = Value::Object(key_obj.clone()).to_string();
        buckets
            .entry(bucket_key)
            .and_modify(|(_, n)| *n += 1)
            .or_insert((key_obj, 1));
    }

    Ok(buckets
        .into_values()
        .map(|(mut obj, n)| {
            obj.insert("count".to_string(), Value::from(n));
            Value::Object(obj)
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
