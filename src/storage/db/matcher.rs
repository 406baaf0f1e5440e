//! Query evaluation for the in-process backend.
//!
//! Implements the subset of MongoDB query semantics the adapter relies on:
//! equality (a scalar also matches an array containing it), dotted paths, and
//! the `$eq/$ne/$gt/$gte/$lt/$lte/$in` operators.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::storage::StorageError;

/// Resolve a dotted path (`metadata.host`) inside a document.
pub(crate) fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluate `filter` against `doc`.
pub(crate) fn matches(doc: &Document, filter: &Document) -> Result<bool, StorageError> {
    for (path, condition) in filter {
        if path.starts_with('$') {
            return Err(StorageError::Backend(format!(
                "unsupported top-level operator '{path}'"
            )));
        }
        let value = lookup(doc, path);
        let ok = match condition {
            Bson::Document(ops) if is_operator_document(ops) => {
                let mut all = true;
                for (op, operand) in ops {
                    if !eval_operator(value, op, operand)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            expected => equals_or_contains(value, expected),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

fn eval_operator(value: Option<&Bson>, op: &str, operand: &Bson) -> Result<bool, StorageError> {
    let ordered = |accept: fn(Ordering) -> bool| {
        candidates(value).any(|v| compare(v, operand).is_some_and(accept))
    };

    let result = match op {
        "$eq" => equals_or_contains(value, operand),
        "$ne" => !equals_or_contains(value, operand),
        "$gt" => ordered(|o| o == Ordering::Greater),
        "$gte" => ordered(|o| o != Ordering::Less),
        "$lt" => ordered(|o| o == Ordering::Less),
        "$lte" => ordered(|o| o != Ordering::Greater),
        "$in" => match operand {
            Bson::Array(options) => options.iter().any(|o| equals_or_contains(value, o)),
            other => {
                return Err(StorageError::Backend(format!(
                    "$in needs an array, got {other}"
                )));
            }
        },
        other => {
            return Err(StorageError::Backend(format!(
                "unsupported query operator '{other}'"
            )));
        }
    };
    Ok(result)
}

/// The value itself plus, for arrays, each element.
fn candidates<'a>(value: Option<&'a Bson>) -> Box<dyn Iterator<Item = &'a Bson> + 'a> {
    match value {
        Some(Bson::Array(items)) => Box::new(items.iter()),
        Some(v) => Box::new(std::iter::once(v)),
        None => Box::new(std::iter::empty()),
    }
}

fn equals_or_contains(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(actual) => {
            values_equal(actual, expected)
                || matches!(actual, Bson::Array(items) if items.iter().any(|i| values_equal(i, expected)))
        }
    }
}

/// Equality with numeric widening across Int32/Int64/Double.
pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
    match compare_numbers(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

/// Numeric ordering. Integers compare exactly; f64 only when a side is a double.
fn compare_numbers(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_i64(a), as_i64(b)) {
        return Some(x.cmp(&y));
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Compare two values of the same kind; `None` for mismatched kinds.
pub(crate) fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if as_f64(a).is_some() && as_f64(b).is_some() {
        return compare_numbers(a, b);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Cross-kind ordering rank used when sorting heterogeneous fields.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

/// Order two documents by a sort specification (`{field: 1 | -1}`).
pub(crate) fn sort_order(a: &Document, b: &Document, spec: &Document) -> Ordering {
    for (path, direction) in spec {
        let descending = matches!(direction, Bson::Int32(d) if *d < 0)
            || matches!(direction, Bson::Int64(d) if *d < 0)
            || matches!(direction, Bson::Double(d) if *d < 0.0);

        let (left, right) = (lookup(a, path), lookup(b, path));
        let ordering = match (left, right) {
            (Some(x), Some(y)) => compare(x, y)
                .unwrap_or_else(|| type_rank(left).cmp(&type_rank(right))),
            _ => type_rank(left).cmp(&type_rank(right)),
        };
        let ordering = if descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn is_excluded(value: &Bson) -> bool {
    matches!(
        value,
        Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false)
    ) || matches!(value, Bson::Double(d) if *d == 0.0)
}

/// Apply a projection to a document.
///
/// Any truthy key (`_id` included) selects inclusion mode: only listed keys
/// survive, plus `_id` unless it is explicitly excluded. A projection of only
/// exclusions drops the listed keys.
pub(crate) fn project(doc: Document, projection: &Document) -> Document {
    let inclusion = projection.values().any(|value| !is_excluded(value));
    let id_excluded = projection.get("_id").is_some_and(is_excluded);

    doc.into_iter()
        .filter(|(key, _)| match projection.get(key) {
            Some(value) => !is_excluded(value),
            None if key == "_id" => !id_excluded,
            None => !inclusion,
        })
        .collect()
}
