//! Metric extraction from engine result maps.

use serde_json::Value;

/// Opaque metric map returned by the backtest engine.
pub type MetricsMap = serde_json::Map<String, Value>;

/// Extract the optimisation score from a metrics map.
///
/// Looks up `key` directly, then under a nested `metrics` object. Numbers and
/// numeric strings are coerced to `f64`. A missing key, an unparsable value or a
/// non-finite number all yield `None`.
#[must_use]
pub fn extract_metric(metrics: &MetricsMap, key: Option<&str>) -> Option<f64> {
    let key = key?;

    let value = metrics.get(key).or_else(|| {
        metrics
            .get("metrics")
            .and_then(Value::as_object)
            .and_then(|nested| nested.get(key))
    })?;

    coerce_numeric(value)
}

/// Coerce a JSON value to a finite `f64`.
#[must_use]
pub fn coerce_numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    number.is_finite().then_some(number)
}
