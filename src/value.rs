// SPDX-License-Identifier: Apache-2.0

//! DuckDB value conversion.
//!
//! Everything flowing out of the shared engine is normalized to
//! `serde_json::Value`. Integers whose magnitude exceeds 2^53 - 1 cannot be
//! represented exactly as a JSON double, so they are serialized as decimal
//! strings instead. The rule applies recursively inside lists and structs.

use duckdb::types::{TimeUnit, ValueRef};
use serde_json::{json, Value as JsonValue};

/// Largest integer exactly representable as an IEEE-754 double.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Applies the safe-integer rule to a signed 64-bit value.
pub fn json_i64(v: i64) -> JsonValue {
    // unsigned_abs: i64::MIN has no i64 absolute value
    if v.unsigned_abs() > MAX_SAFE_INTEGER as u64 {
        JsonValue::String(v.to_string())
    } else {
        json!(v)
    }
}

/// Applies the safe-integer rule to an unsigned 64-bit value.
pub fn json_u64(v: u64) -> JsonValue {
    if v > MAX_SAFE_INTEGER as u64 {
        JsonValue::String(v.to_string())
    } else {
        json!(v)
    }
}

/// Applies the safe-integer rule to a 128-bit value (HUGEINT).
pub fn json_i128(v: i128) -> JsonValue {
    if v.unsigned_abs() > MAX_SAFE_INTEGER as u128 {
        JsonValue::String(v.to_string())
    } else {
        json!(v as i64)
    }
}

fn timeunit_to_micros(unit: &TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

/// Converts one DuckDB cell into a JSON value.
pub fn duckdb_ref_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Boolean(b) => json!(b),
        ValueRef::TinyInt(v) => json!(v),
        ValueRef::SmallInt(v) => json!(v),
        ValueRef::Int(v) => json!(v),
        ValueRef::BigInt(v) => json_i64(v),
        ValueRef::HugeInt(v) => json_i128(v),
        ValueRef::UTinyInt(v) => json!(v),
        ValueRef::USmallInt(v) => json!(v),
        ValueRef::UInt(v) => json!(v),
        ValueRef::UBigInt(v) => json_u64(v),
        ValueRef::Float(v) => json!(v),
        ValueRef::Double(v) => json!(v),
        ValueRef::Decimal(d) => json!(d.to_string()),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => json!(bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()),
        ValueRef::Date32(days) => {
            // days since 1970-01-01
            match chrono::NaiveDate::from_num_days_from_ce_opt(days + 719_163) {
                Some(date) => JsonValue::String(date.format("%Y-%m-%d").to_string()),
                None => JsonValue::Null,
            }
        }
        ValueRef::Time64(unit, v) => {
            let micros = timeunit_to_micros(&unit, v);
            let secs = (micros / 1_000_000) as u32;
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                secs,
                ((micros % 1_000_000) * 1_000) as u32,
            ) {
                Some(t) => JsonValue::String(t.format("%H:%M:%S%.6f").to_string()),
                None => JsonValue::Null,
            }
        }
        ValueRef::Timestamp(unit, v) => {
            let micros = timeunit_to_micros(&unit, v);
            match chrono::DateTime::from_timestamp_micros(micros) {
                Some(dt) => JsonValue::String(dt.to_rfc3339()),
                None => JsonValue::Null,
            }
        }
        other => owned_to_json(duckdb::types::Value::from(other)),
    }
}

/// Converts an owned DuckDB value, recursing into nested containers.
pub fn owned_to_json(value: duckdb::types::Value) -> JsonValue {
    use duckdb::types::Value as V;
    match value {
        V::Null => JsonValue::Null,
        V::Boolean(b) => json!(b),
        V::TinyInt(v) => json!(v),
        V::SmallInt(v) => json!(v),
        V::Int(v) => json!(v),
        V::BigInt(v) => json_i64(v),
        V::HugeInt(v) => json_i128(v),
        V::UTinyInt(v) => json!(v),
        V::USmallInt(v) => json!(v),
        V::UInt(v) => json!(v),
        V::UBigInt(v) => json_u64(v),
        V::Float(v) => json!(v),
        V::Double(v) => json!(v),
        V::Decimal(d) => json!(d.to_string()),
        V::Text(s) => JsonValue::String(s),
        V::Blob(bytes) => json!(bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()),
        V::Date32(days) => match chrono::NaiveDate::from_num_days_from_ce_opt(days + 719_163) {
            Some(date) => JsonValue::String(date.format("%Y-%m-%d").to_string()),
            None => JsonValue::Null,
        },
        V::Time64(unit, v) => {
            let micros = timeunit_to_micros(&unit, v);
            let secs = (micros / 1_000_000) as u32;
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                secs,
                ((micros % 1_000_000) * 1_000) as u32,
            ) {
                Some(t) => JsonValue::String(t.format("%H:%M:%S%.6f").to_string()),
                None => JsonValue::Null,
            }
        }
        V::Timestamp(unit, v) => {
            let micros = timeunit_to_micros(&unit, v);
            match chrono::DateTime::from_timestamp_micros(micros) {
                Some(dt) => JsonValue::String(dt.to_rfc3339()),
                None => JsonValue::Null,
            }
        }
        V::Interval { months, days, nanos } => json!({
            "months": months,
            "days": days,
            "nanos": nanos,
        }),
        V::List(items) | V::Array(items) => {
            JsonValue::Array(items.into_iter().map(owned_to_json).collect())
        }
        V::Enum(s) => JsonValue::String(s.to_string()),
        V::Struct(fields) => {
            let mut map = serde_json::Map::new();
            for (name, val) in fields.iter() {
                map.insert(name.clone(), owned_to_json(val.clone()));
            }
            JsonValue::Object(map)
        }
        V::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries.iter() {
                let key = match k {
                    V::Text(s) => s.clone(),
                    other => owned_to_json(other.clone()).to_string(),
                };
                map.insert(key, owned_to_json(v.clone()));
            }
            JsonValue::Object(map)
        }
        V::Union(inner) => owned_to_json(*inner),
    }
}

/// Applies the safe-integer rule to an already-JSON value, recursively.
/// Used on rows arriving from source drivers before they are materialized.
pub fn normalize_json(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                json_i64(i)
            } else if let Some(u) = n.as_u64() {
                json_u64(u)
            } else {
                JsonValue::Number(n)
            }
        }
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(normalize_json).collect())
        }
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter().map(|(k, v)| (k, normalize_json(v))).collect(),
        ),
        other => other,
    }
}
