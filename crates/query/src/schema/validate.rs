//! Coercion of raw values into declared kinds.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::warn;

use super::value::{DateSpec, ParamValue, RawParams, TimeSpec, ValidatedParams};
use super::{ParamDecl, ParameterSchema, SchemaLookup, ValueKind};
use crate::config::EngineLimits;
use crate::error::ValidationError;
use crate::grammar::SearchPattern;

/// Decimal number with optional sign, as accepted from URL parameters.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static FLOAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?(\d+(\.\d+)?|\.\d+)$").expect("valid regex literal"));

/// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
#[allow(clippy::expect_used)]
static DATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d\d?)(?:-(\d\d?))?)?$").expect("valid regex literal")
});

/// `MM` or `MM-DD`.
#[allow(clippy::expect_used)]
static YEARLESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d\d?)(?:-(\d\d?))?$").expect("valid regex literal"));

/// `YYYY` followed by up to five `-NN` components.
#[allow(clippy::expect_used)]
static TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}(-\d\d?){0,5}$").expect("valid regex literal"));

const TRUTHY: &[&str] = &["true", "yes", "on", "1"];
const FALSY: &[&str] = &["false", "no", "off", "0"];

struct Ctx<'a> {
    lookup: &'a dyn SchemaLookup,
    limits: &'a EngineLimits,
}

pub(super) fn validate(
    schema: &ParameterSchema,
    raw: &RawParams,
    lookup: &dyn SchemaLookup,
    limits: &EngineLimits,
) -> Result<ValidatedParams, ValidationError> {
    if let Some(unknown) = raw.keys().find(|key| !schema.declares(key)) {
        return Err(ValidationError::UnknownParameter {
            kind: schema.kind(),
            param: unknown.to_string(),
        });
    }

    let ctx = Ctx { lookup, limits };
    let mut params = ValidatedParams::default();
    for decl in schema.declarations() {
        let value = match raw.get(decl.name) {
            Some(raw_value) => coerce(decl, raw_value, &ctx)?,
            None => None,
        };
        match value {
            Some(value) => params.insert(decl.name, value),
            None if decl.required => {
                return Err(ValidationError::MissingParameter {
                    param: decl.name.to_string(),
                });
            }
            None => {}
        }
    }
    Ok(params)
}

fn coerce(
    decl: &ParamDecl,
    raw: &JsonValue,
    ctx: &Ctx<'_>,
) -> Result<Option<ParamValue>, ValidationError> {
    match &decl.kind {
        ValueKind::List(inner) => coerce_list(decl, inner, raw, ctx),
        ValueKind::Range(inner) => coerce_range(decl.name, inner, raw),
        ValueKind::Subquery(kind) => {
            let map = match raw {
                JsonValue::Null => return Ok(None),
                JsonValue::Object(map) if map.is_empty() => return Ok(None),
                JsonValue::Object(map) => map,
                other => return Err(invalid(decl.name, &decl.kind, other)),
            };
            let schema = ctx
                .lookup
                .schema_for(*kind)
                .ok_or_else(|| invalid(decl.name, &decl.kind, raw))?;
            let nested = validate(schema, &RawParams::from(map.clone()), ctx.lookup, ctx.limits)
                .map_err(|e| e.nested_in(decl.name))?;
            Ok((!nested.is_empty()).then_some(ParamValue::Subquery(nested)))
        }
        scalar => coerce_scalar(decl.name, scalar, raw),
    }
}

fn coerce_list(
    decl: &ParamDecl,
    inner: &ValueKind,
    raw: &JsonValue,
    ctx: &Ctx<'_>,
) -> Result<Option<ParamValue>, ValidationError> {
    let items: Vec<JsonValue> = match raw {
        JsonValue::Null => return Ok(None),
        JsonValue::Array(items) => items.clone(),
        JsonValue::String(s) if splits_on_commas(inner) && s.contains(',') => s
            .split(',')
            .map(|part| JsonValue::String(part.trim().to_string()))
            .collect(),
        other => vec![other.clone()],
    };

    let mut values = Vec::with_capacity(items.len());
    for item in &items {
        if let Some(value) = coerce_scalar(decl.name, inner, item)? {
            values.push(value);
        }
    }

    if values.is_empty() {
        // An explicit empty id list still means "match nothing".
        return Ok(decl.empty_is_meaningful.then_some(ParamValue::List(values)));
    }

    if matches!(inner, ValueKind::Record(_)) {
        let mut seen = HashSet::new();
        values.retain(|v| seen.insert(v.as_i64()));
    }
    if values.len() > ctx.limits.max_array {
        warn!(
            param = decl.name,
            requested = values.len(),
            capped = ctx.limits.max_array,
            "truncating list parameter"
        );
        values.truncate(ctx.limits.max_array);
    }
    Ok(Some(ParamValue::List(values)))
}

fn splits_on_commas(inner: &ValueKind) -> bool {
    !matches!(inner, ValueKind::String | ValueKind::Search)
}

fn coerce_range(
    name: &str,
    inner: &ValueKind,
    raw: &JsonValue,
) -> Result<Option<ParamValue>, ValidationError> {
    let (min, max) = match raw {
        JsonValue::Null => return Ok(None),
        JsonValue::Array(items) if items.len() > 2 => {
            return Err(invalid(name, &ValueKind::Range(Box::new(inner.clone())), raw));
        }
        JsonValue::Array(items) => (items.first(), items.get(1)),
        JsonValue::Object(map) => {
            if map.keys().any(|k| k != "min" && k != "max") {
                return Err(invalid(name, &ValueKind::Range(Box::new(inner.clone())), raw));
            }
            (map.get("min"), map.get("max"))
        }
        scalar => (Some(scalar), None),
    };

    let min = min
        .map(|v| coerce_scalar(name, inner, v))
        .transpose()?
        .flatten();
    let max = max
        .map(|v| coerce_scalar(name, inner, v))
        .transpose()?
        .flatten();
    if min.is_none() && max.is_none() {
        return Ok(None);
    }
    Ok(Some(ParamValue::Range {
        min: min.map(Box::new),
        max: max.map(Box::new),
    }))
}

fn coerce_scalar(
    name: &str,
    kind: &ValueKind,
    raw: &JsonValue,
) -> Result<Option<ParamValue>, ValidationError> {
    let raw = match raw {
        JsonValue::Null => return Ok(None),
        JsonValue::String(s) if s.trim().is_empty() => return Ok(None),
        JsonValue::Array(items) if items.is_empty() => return Ok(None),
        JsonValue::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };
    let fail = || invalid(name, kind, raw);

    let value = match (kind, raw) {
        (ValueKind::Boolean, JsonValue::Bool(b)) => ParamValue::Bool(*b),
        (ValueKind::Boolean, JsonValue::Number(n)) => match n.as_i64() {
            Some(1) => ParamValue::Bool(true),
            Some(0) => ParamValue::Bool(false),
            _ => return Err(fail()),
        },
        (ValueKind::Boolean, JsonValue::String(s)) => {
            let lowered = s.trim().to_ascii_lowercase();
            if TRUTHY.contains(&lowered.as_str()) {
                ParamValue::Bool(true)
            } else if FALSY.contains(&lowered.as_str()) {
                ParamValue::Bool(false)
            } else {
                return Err(fail());
            }
        }

        (ValueKind::Integer, JsonValue::Number(n)) => ParamValue::Int(n.as_i64().ok_or_else(fail)?),
        (ValueKind::Integer, JsonValue::String(s)) => {
            ParamValue::Int(s.trim().parse().map_err(|_| fail())?)
        }

        (ValueKind::Float, JsonValue::Number(n)) => ParamValue::Float(n.as_f64().ok_or_else(fail)?),
        (ValueKind::Float, JsonValue::String(s)) if FLOAT.is_match(s.trim()) => {
            ParamValue::Float(s.trim().parse().map_err(|_| fail())?)
        }

        (ValueKind::String, JsonValue::String(s)) => ParamValue::Str(s.trim().to_string()),
        (ValueKind::String, JsonValue::Number(n)) => ParamValue::Str(n.to_string()),

        (ValueKind::Search, JsonValue::String(s)) => {
            SearchPattern::parse(s).map_err(|e| ValidationError::SearchSyntax {
                param: name.to_string(),
                at: e.at,
            })?;
            ParamValue::Str(s.trim().to_string())
        }

        (ValueKind::Date, JsonValue::Number(n)) => {
            parse_date(&n.to_string()).map(ParamValue::Date).ok_or_else(fail)?
        }
        (ValueKind::Date, JsonValue::String(s)) => {
            parse_date(s.trim()).map(ParamValue::Date).ok_or_else(fail)?
        }

        (ValueKind::Time, JsonValue::Number(n)) => {
            parse_time(&n.to_string()).map(ParamValue::Time).ok_or_else(fail)?
        }
        (ValueKind::Time, JsonValue::String(s)) => {
            parse_time(s.trim()).map(ParamValue::Time).ok_or_else(fail)?
        }

        (ValueKind::Enum(allowed), JsonValue::String(s)) => {
            let wanted = s.trim();
            let member = allowed
                .iter()
                .find(|v| v.eq_ignore_ascii_case(wanted))
                .ok_or_else(fail)?;
            ParamValue::Str((*member).to_string())
        }
        (ValueKind::Enum(allowed), JsonValue::Bool(b)) => {
            let wanted = if *b { "true" } else { "false" };
            let member = allowed.iter().find(|v| **v == wanted).ok_or_else(fail)?;
            ParamValue::Str((*member).to_string())
        }

        (ValueKind::Record(_), JsonValue::Number(n)) => match n.as_i64() {
            Some(id) if id > 0 => ParamValue::Id(id),
            _ => return Err(fail()),
        },
        (ValueKind::Record(_), JsonValue::String(s)) => match s.trim().parse::<i64>() {
            Ok(id) if id > 0 => ParamValue::Id(id),
            _ => return Err(fail()),
        },

        _ => return Err(fail()),
    };
    Ok(Some(value))
}

fn parse_date(s: &str) -> Option<DateSpec> {
    let number = |m: Option<regex::Match<'_>>| m.and_then(|m| m.as_str().parse::<u32>().ok());

    let spec = if let Some(caps) = DATED.captures(s) {
        DateSpec {
            year: caps.get(1).and_then(|m| m.as_str().parse().ok()),
            month: number(caps.get(2)),
            day: number(caps.get(3)),
        }
    } else if let Some(caps) = YEARLESS.captures(s) {
        DateSpec {
            year: None,
            month: number(caps.get(1)),
            day: number(caps.get(2)),
        }
    } else {
        return None;
    };

    let month_ok = spec.month.is_none_or(|m| (1..=12).contains(&m));
    let day_ok = spec.day.is_none_or(|d| (1..=31).contains(&d));
    let calendar_ok = spec.year.is_none() || spec.first_day().is_some();
    (month_ok && day_ok && calendar_ok).then_some(spec)
}

fn parse_time(s: &str) -> Option<TimeSpec> {
    if !TIME.is_match(s) {
        return None;
    }
    let mut parts = [None; 6];
    for (slot, part) in parts.iter_mut().zip(s.split('-')) {
        *slot = Some(part.parse::<u32>().ok()?);
    }
    let spec = TimeSpec { parts };
    spec.earliest()?;
    Some(spec)
}

fn invalid(name: &str, kind: &ValueKind, raw: &JsonValue) -> ValidationError {
    let got = match raw {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    ValidationError::InvalidValue {
        param: name.to_string(),
        expected: kind.to_string(),
        got,
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::kinds::EntityKind;
    use serde_json::json;

    struct NoNested;

    impl SchemaLookup for NoNested {
        fn schema_for(&self, _kind: EntityKind) -> Option<&ParameterSchema> {
            None
        }
    }

    struct Nested(ParameterSchema);

    impl SchemaLookup for Nested {
        fn schema_for(&self, kind: EntityKind) -> Option<&ParameterSchema> {
            (kind == self.0.kind()).then_some(&self.0)
        }
    }

    fn schema() -> ParameterSchema {
        ParameterSchema::new(EntityKind::Observation)
            .param(ParamDecl::new("has_images", ValueKind::Boolean))
            .param(ParamDecl::new("confidence", ValueKind::range(ValueKind::Float)))
            .param(ParamDecl::new("date", ValueKind::range(ValueKind::Date)))
            .param(ParamDecl::new("created_at", ValueKind::range(ValueKind::Time)))
            .param(ParamDecl::new("users", ValueKind::list(ValueKind::Record("observations"))))
            .param(
                ParamDecl::new("id_in_set", ValueKind::list(ValueKind::Record("observations")))
                    .empty_is_meaningful(),
            )
            .param(ParamDecl::new("pattern", ValueKind::Search))
            .param(ParamDecl::new("lichen", ValueKind::Enum(&["no", "yes"])))
            .param(ParamDecl::new("region", ValueKind::String))
    }

    fn run(raw: RawParams) -> Result<ValidatedParams, ValidationError> {
        schema().validate(&raw, &NoNested, &EngineLimits::default())
    }

    #[test]
    fn unknown_keys_are_rejected_by_name() {
        let err = run(RawParams::new().with("bogus_param", 1)).unwrap_err();
        assert_eq!(err.param(), Some("bogus_param"));
        assert!(matches!(err, ValidationError::UnknownParameter { .. }));
    }

    #[test]
    fn booleans_accept_words() {
        for (input, expected) in [("yes", true), ("ON", true), ("1", true), ("off", false), ("0", false)] {
            let params = run(RawParams::new().with("has_images", input)).unwrap();
            assert_eq!(params.bool("has_images"), Some(expected), "input {input}");
        }
        let err = run(RawParams::new().with("has_images", "maybe")).unwrap_err();
        assert_eq!(err.param(), Some("has_images"));
    }

    #[test]
    fn blank_values_are_not_provided() {
        let params = run(RawParams::new()
            .with("region", "  ")
            .with("users", json!([]))
            .with("pattern", ""))
        .unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn explicit_empty_id_set_is_kept() {
        let params = run(RawParams::new().with("id_in_set", json!([]))).unwrap();
        assert_eq!(params.get("id_in_set"), Some(&ParamValue::List(Vec::new())));

        let params = run(RawParams::new().with("id_in_set", "")).unwrap();
        assert_eq!(params.ids("id_in_set"), Some(Vec::new()));

        let params = run(RawParams::new().with("id_in_set", JsonValue::Null)).unwrap();
        assert!(!params.contains("id_in_set"));
    }

    #[test]
    fn id_lists_dedupe_split_and_truncate() {
        let limits = EngineLimits {
            max_array: 3,
            ..EngineLimits::default()
        };
        let raw = RawParams::new().with("users", "4,2,4,9,11");
        let params = schema().validate(&raw, &NoNested, &limits).unwrap();
        assert_eq!(params.ids("users"), Some(vec![4, 2, 9]));
    }

    #[test]
    fn record_ids_must_be_positive() {
        let err = run(RawParams::new().with("users", json!([1, -3]))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref got, .. } if got == "-3"));
    }

    #[test]
    fn ranges_accept_one_or_two_bounds() {
        let params = run(RawParams::new().with("confidence", "1.5")).unwrap();
        let (min, max) = params.get("confidence").unwrap().as_range().unwrap();
        assert_eq!(min, Some(&ParamValue::Float(1.5)));
        assert!(max.is_none());

        let params = run(RawParams::new().with("confidence", json!(["", 2]))).unwrap();
        let (min, max) = params.get("confidence").unwrap().as_range().unwrap();
        assert!(min.is_none());
        assert_eq!(max, Some(&ParamValue::Float(2.0)));

        let params = run(RawParams::new().with("confidence", json!({"min": null, "max": null}))).unwrap();
        assert!(!params.contains("confidence"));

        assert!(run(RawParams::new().with("confidence", json!([1, 2, 3]))).is_err());
        assert!(run(RawParams::new().with("confidence", "1.2.3")).is_err());
    }

    #[test]
    fn dates_accept_partial_and_yearless_forms() {
        let params = run(RawParams::new().with("date", json!(["2020-05", "06-15"]))).unwrap();
        let (min, max) = params.get("date").unwrap().as_range().unwrap();
        assert_eq!(
            min.and_then(ParamValue::as_date),
            Some(&DateSpec {
                year: Some(2020),
                month: Some(5),
                day: None
            })
        );
        assert!(max.and_then(ParamValue::as_date).unwrap().is_yearless());

        assert!(run(RawParams::new().with("date", "2020-13")).is_err());
        assert!(run(RawParams::new().with("date", "2021-02-30")).is_err());
        assert!(run(RawParams::new().with("date", "May 5")).is_err());
    }

    #[test]
    fn times_accept_up_to_six_components() {
        let params = run(RawParams::new().with("created_at", "2021-03-04-05-06-07")).unwrap();
        assert!(params.contains("created_at"));
        assert!(run(RawParams::new().with("created_at", "2021-03-04-25")).is_err());
    }

    #[test]
    fn enums_are_case_insensitive() {
        let params = run(RawParams::new().with("lichen", "YES")).unwrap();
        assert_eq!(params.str("lichen"), Some("yes"));
        assert!(run(RawParams::new().with("lichen", "sometimes")).is_err());
    }

    #[test]
    fn search_strings_with_stray_quotes_are_accepted() {
        let params = run(RawParams::new().with("pattern", "boletus \"edulis")).unwrap();
        assert_eq!(params.str("pattern"), Some("boletus \"edulis"));
    }

    #[test]
    fn required_parameters_must_be_present() {
        let schema = ParameterSchema::new(EntityKind::Comment)
            .param(ParamDecl::new("target", ValueKind::Record("observations")).required());
        let err = schema
            .validate(&RawParams::new(), &NoNested, &EngineLimits::default())
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingParameter { param: "target".to_string() });
    }

    #[test]
    fn subqueries_validate_against_the_nested_schema() {
        let outer = ParameterSchema::new(EntityKind::Image).param(ParamDecl::new(
            "observation_query",
            ValueKind::Subquery(EntityKind::Observation),
        ));
        let lookup = Nested(schema());

        let raw = RawParams::new().with("observation_query", json!({"has_images": "yes"}));
        let params = outer.validate(&raw, &lookup, &EngineLimits::default()).unwrap();
        let nested = params.get("observation_query").unwrap().as_subquery().unwrap();
        assert_eq!(nested.bool("has_images"), Some(true));

        let raw = RawParams::new().with("observation_query", json!({"bogus": 1}));
        let err = outer.validate(&raw, &lookup, &EngineLimits::default()).unwrap_err();
        assert_eq!(err.param(), Some("observation_query.bogus"));
    }
}
