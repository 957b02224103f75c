//! Combining subtask results.
//!
//! Parallel batches aggregate (`aggregationType`), decompositions and
//! sequences compose (`compositionType`). Custom functions on the task win
//! over the built-ins.

use conductor_core::{AggregationType, CompositionType, SubtaskResult, Task};
use serde_json::{json, Map, Value};

/// Combine the results of a parallel batch.
pub fn aggregate(task: &Task, results: &[SubtaskResult]) -> Value {
    if let Some(custom) = &task.aggregate {
        return custom.call(results);
    }

    let kind = task.aggregation_type.unwrap_or_default();
    let value = aggregate_with(kind, results);

    let failed = results.iter().filter(|r| !r.success).count();
    if kind != AggregationType::All && (failed > 0 || task.include_details) {
        json!({
            "result": value,
            "metadata": {
                "successful": results.len() - failed,
                "failed": failed,
            }
        })
    } else {
        value
    }
}

/// Built-in aggregation without annotation.
pub fn aggregate_with(kind: AggregationType, results: &[SubtaskResult]) -> Value {
    match kind {
        AggregationType::Array => Value::Array(successful(results).cloned().collect()),
        AggregationType::Object => Value::Object(merge_objects(results)),
        AggregationType::Sum => sum(results),
        AggregationType::Concat => Value::Array(
            successful(results)
                .flat_map(|v| match v {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                })
                .collect(),
        ),
        AggregationType::First => successful(results).next().cloned().unwrap_or(Value::Null),
        AggregationType::Last => successful(results).last().cloned().unwrap_or(Value::Null),
        AggregationType::All => Value::Array(
            results
                .iter()
                .map(|r| match (&r.result, &r.error) {
                    (Some(value), _) if r.success => value.clone(),
                    (_, Some(error)) => json!({ "error": error }),
                    _ => json!({ "error": "unknown error" }),
                })
                .collect(),
        ),
    }
}

/// Combine the results of a decomposition or sequence. `source` names the
/// producer and lands in the `aggregate` envelope.
pub fn compose(task: &Task, results: &[SubtaskResult], source: &str) -> Value {
    if let Some(custom) = &task.compose {
        return custom.call(results);
    }

    match task.composition_type.unwrap_or_default() {
        CompositionType::Aggregate => {
            let ok = results.iter().filter(|r| r.success).count();
            json!({
                "result": successful(results).cloned().collect::<Vec<_>>(),
                "metadata": {
                    "successful": ok,
                    "failed": results.len() - ok,
                    "total": results.len(),
                    "source": source,
                }
            })
        }
        CompositionType::Merge => Value::Object(merge_objects(results)),
        CompositionType::First => successful(results).next().cloned().unwrap_or(Value::Null),
        CompositionType::Last => successful(results).last().cloned().unwrap_or(Value::Null),
    }
}

fn successful(results: &[SubtaskResult]) -> impl DoubleEndedIterator<Item = &Value> {
    results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.result.as_ref())
}

fn merge_objects(results: &[SubtaskResult]) -> Map<String, Value> {
    let mut merged = Map::new();
    for value in successful(results) {
        if let Value::Object(fields) = value {
            for (key, field) in fields {
                merged.insert(key.clone(), field.clone());
            }
        }
    }
    merged
}

fn sum(results: &[SubtaskResult]) -> Value {
    let total: f64 = successful(results).map(as_number).sum();
    if total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
        json!(total as i64)
    } else {
        json!(total)
    }
}

fn as_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}
