//! Raw and validated parameter values.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::scope::Literal;

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// Untyped parameters as they arrive from a caller.
///
/// Values are JSON scalars, arrays or objects; URL query strings are
/// converted with [`RawParams::from_pairs`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawParams(Map<String, JsonValue>);

impl RawParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Build from URL-style pairs.
    ///
    /// Repeated keys collect into a list; `key[sub]=v` builds a nested map;
    /// `key[]=v` always yields a list.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut raw = RawParams::new();
        for (key, value) in pairs {
            let path = split_key(key.as_ref());
            insert_path(&mut raw.0, &path, JsonValue::String(value.into()));
        }
        raw
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, JsonValue>> for RawParams {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

/// Splits `a[b][]` into `["a", "b", ""]`.
fn split_key(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return vec![key.to_string()];
    };
    let mut path = vec![key[..open].to_string()];
    for part in key[open..].split('[').skip(1) {
        path.push(part.trim_end_matches(']').to_string());
    }
    path
}

fn insert_path(map: &mut Map<String, JsonValue>, path: &[String], value: JsonValue) {
    let Some((head, tail)) = path.split_first() else {
        return;
    };
    match tail.first().map(String::as_str) {
        None => match map.get_mut(head) {
            Some(JsonValue::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = JsonValue::Array(vec![previous, value]);
            }
            None => {
                map.insert(head.clone(), value);
            }
        },
        Some("") => match map.get_mut(head) {
            Some(JsonValue::Array(items)) => items.push(value),
            _ => {
                map.insert(head.clone(), JsonValue::Array(vec![value]));
            }
        },
        Some(_) => {
            let entry = map
                .entry(head.clone())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !entry.is_object() {
                *entry = JsonValue::Object(Map::new());
            }
            if let JsonValue::Object(inner) = entry {
                insert_path(inner, tail, value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dates and times
// ---------------------------------------------------------------------------

/// A possibly partial calendar date: `YYYY`, `YYYY-MM`, `YYYY-MM-DD`,
/// `MM` or `MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpec {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl DateSpec {
    /// Earliest date covered, if a year is present.
    pub fn first_day(&self) -> Option<NaiveDate> {
        let year = self.year?;
        NaiveDate::from_ymd_opt(year, self.month.unwrap_or(1), self.day.unwrap_or(1))
    }

    /// Latest date covered, if a year is present.
    pub fn last_day(&self) -> Option<NaiveDate> {
        let year = self.year?;
        match (self.month, self.day) {
            (Some(month), Some(day)) => NaiveDate::from_ymd_opt(year, month, day),
            (Some(month), None) => last_day_of_month(year, month),
            _ => NaiveDate::from_ymd_opt(year, 12, 31),
        }
    }

    /// True for `MM` / `MM-DD` forms that recur every year.
    pub fn is_yearless(&self) -> bool {
        self.year.is_none()
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// A possibly partial timestamp `YYYY[-MM[-DD[-HH[-MM[-SS]]]]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpec {
    pub parts: [Option<u32>; 6],
}

impl TimeSpec {
    /// Earliest instant covered: missing parts take their minimum.
    pub fn earliest(&self) -> Option<NaiveDateTime> {
        let [year, month, day, hour, minute, second] = self.parts;
        let date = NaiveDate::from_ymd_opt(year? as i32, month.unwrap_or(1), day.unwrap_or(1))?;
        let time = NaiveTime::from_hms_opt(
            hour.unwrap_or(0),
            minute.unwrap_or(0),
            second.unwrap_or(0),
        )?;
        Some(date.and_time(time))
    }

    /// Latest instant covered: missing parts take their maximum.
    pub fn latest(&self) -> Option<NaiveDateTime> {
        let [year, month, day, hour, minute, second] = self.parts;
        let spec = DateSpec {
            year: Some(year? as i32),
            month,
            day,
        };
        let date = spec.last_day()?;
        let time = NaiveTime::from_hms_opt(
            hour.unwrap_or(23),
            minute.unwrap_or(59),
            second.unwrap_or(59),
        )?;
        Some(date.and_time(time))
    }
}

// ---------------------------------------------------------------------------
// Validated values
// ---------------------------------------------------------------------------

/// A typed parameter value. Produced only by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Strings, search patterns and enum members.
    Str(String),
    Date(DateSpec),
    Time(TimeSpec),
    Id(i64),
    List(Vec<ParamValue>),
    Range {
        min: Option<Box<ParamValue>>,
        max: Option<Box<ParamValue>>,
    },
    Subquery(ValidatedParams),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) | ParamValue::Id(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Ids of an id list (or a single id).
    pub fn as_ids(&self) -> Option<Vec<i64>> {
        match self {
            ParamValue::List(items) => items.iter().map(ParamValue::as_i64).collect(),
            ParamValue::Id(id) => Some(vec![*id]),
            _ => None,
        }
    }

    /// Strings of a string/enum list (or a single string).
    pub fn as_strs(&self) -> Option<Vec<&str>> {
        match self {
            ParamValue::List(items) => items.iter().map(ParamValue::as_str).collect(),
            ParamValue::Str(s) => Some(vec![s.as_str()]),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<(Option<&ParamValue>, Option<&ParamValue>)> {
        match self {
            ParamValue::Range { min, max } => Some((min.as_deref(), max.as_deref())),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateSpec> {
        match self {
            ParamValue::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&TimeSpec> {
        match self {
            ParamValue::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_subquery(&self) -> Option<&ValidatedParams> {
        match self {
            ParamValue::Subquery(params) => Some(params),
            _ => None,
        }
    }

    /// Scalar values as predicate literals.
    pub fn to_literal(&self) -> Option<Literal> {
        match self {
            ParamValue::Bool(v) => Some(Literal::Bool(*v)),
            ParamValue::Int(v) | ParamValue::Id(v) => Some(Literal::Int(*v)),
            ParamValue::Float(v) => Some(Literal::Float(*v)),
            ParamValue::Str(v) => Some(Literal::Text(v.clone())),
            ParamValue::Date(d) => d.first_day().map(Literal::Date),
            ParamValue::Time(t) => t.earliest().map(Literal::Timestamp),
            _ => None,
        }
    }
}

/// Immutable, typed parameter set for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatedParams(BTreeMap<String, ParamValue>);

impl ValidatedParams {
    pub(crate) fn insert(&mut self, name: &str, value: ParamValue) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    pub fn ids(&self, name: &str) -> Option<Vec<i64>> {
        self.get(name).and_then(ParamValue::as_ids)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical (key-sorted) JSON form, identical for equal parameter sets.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_pairs_collects_repeats_and_nested_maps() {
        let raw = RawParams::from_pairs([
            ("users", "1"),
            ("users", "2"),
            ("observation_query[notes_has]", "spores"),
            ("names[]", "7"),
            ("by", "name"),
        ]);

        assert_eq!(raw.get("users"), Some(&json!(["1", "2"])));
        assert_eq!(
            raw.get("observation_query"),
            Some(&json!({"notes_has": "spores"}))
        );
        assert_eq!(raw.get("names"), Some(&json!(["7"])));
        assert_eq!(raw.get("by"), Some(&json!("name")));
    }

    #[test]
    fn partial_dates_cover_whole_periods() {
        let month = DateSpec {
            year: Some(2024),
            month: Some(2),
            day: None,
        };
        assert_eq!(month.first_day(), NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(month.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29));

        let december = DateSpec {
            year: Some(2023),
            month: Some(12),
            day: None,
        };
        assert_eq!(december.last_day(), NaiveDate::from_ymd_opt(2023, 12, 31));

        let yearless = DateSpec {
            year: None,
            month: Some(6),
            day: None,
        };
        assert!(yearless.is_yearless());
        assert!(yearless.first_day().is_none());
    }

    #[test]
    fn partial_times_fill_missing_components() {
        let spec = TimeSpec {
            parts: [Some(2021), Some(3), None, None, None, None],
        };
        assert_eq!(
            spec.earliest().unwrap().to_string(),
            "2021-03-01 00:00:00"
        );
        assert_eq!(spec.latest().unwrap().to_string(), "2021-03-31 23:59:59");
    }

    #[test]
    fn canonical_json_is_key_sorted() {
        let mut a = ValidatedParams::default();
        a.insert("users", ParamValue::List(vec![ParamValue::Id(1)]));
        a.insert("by", ParamValue::Str("name".to_string()));
        let mut b = ValidatedParams::default();
        b.insert("by", ParamValue::Str("name".to_string()));
        b.insert("users", ParamValue::List(vec![ParamValue::Id(1)]));

        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
        assert!(a.canonical_json().unwrap().starts_with("{\"by\""));
    }

    #[test]
    fn values_round_trip_through_serde() {
        let value = ParamValue::Range {
            min: Some(Box::new(ParamValue::Float(1.0))),
            max: None,
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "range");
        let back: ParamValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }
}
