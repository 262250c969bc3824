//! Content filters: user preferences applied as implicit parameters.
//!
//! A filter is injected through the kind's own parameter handler, so a
//! preference and the same explicit parameter always mean the same thing.
//! Explicit parameters win: a filter whose parameter the caller supplied
//! is skipped.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{DeclarationError, QueryResult};
use crate::handlers::BuildContext;
use crate::kinds::{EntityKind, KindStrategy};
use crate::schema::{ParamValue, ValidatedParams};
use crate::scope::{ColumnRef, Predicate, Scope};

/// Kinds an activity feed entry may point at, in pushdown order.
const FEED_KINDS: [EntityKind; 3] = [EntityKind::Observation, EntityKind::Name, EntityKind::Location];

/// A caller's content-filter preferences. `None`, `false` and blank
/// strings all mean "off".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFilterPrefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_specimen: Option<bool>,
    /// `no` hides lichens, `yes` shows only lichens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lichen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clade: Option<String>,
}

impl ContentFilterPrefs {
    /// Filters that are switched on, as parameter values.
    pub fn active(&self) -> Vec<(&'static str, ParamValue)> {
        let mut out = Vec::new();
        if self.has_images == Some(true) {
            out.push(("has_images", ParamValue::Bool(true)));
        }
        if self.has_specimen == Some(true) {
            out.push(("has_specimen", ParamValue::Bool(true)));
        }
        let text = [
            ("lichen", &self.lichen),
            ("region", &self.region),
            ("clade", &self.clade),
        ];
        for (name, value) in text {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                out.push((name, ParamValue::Str(value.to_string())));
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    /// Same preferences with switched-off entries cleared, so equal
    /// effective filters compare and serialize equal.
    pub fn normalized(&self) -> Self {
        let text = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            has_images: (self.has_images == Some(true)).then_some(true),
            has_specimen: (self.has_specimen == Some(true)).then_some(true),
            lichen: text(&self.lichen),
            region: text(&self.region),
            clade: text(&self.clade),
        }
    }
}

/// Apply `prefs` to a scope under construction and return the names of the
/// filters that took effect.
pub(crate) fn inject(
    catalog: &Catalog,
    strategy: &KindStrategy,
    scope: &mut Scope,
    params: &ValidatedParams,
    prefs: &ContentFilterPrefs,
) -> QueryResult<Vec<String>> {
    let applied = if strategy.kind == EntityKind::RssLog {
        push_down(catalog, scope, prefs)?
    } else {
        apply_direct(catalog, strategy, scope, params, prefs)?
    };
    if !applied.is_empty() {
        debug!(kind = %strategy.kind, filters = ?applied, "content filters applied");
    }
    Ok(applied)
}

fn apply_direct(
    catalog: &Catalog,
    strategy: &KindStrategy,
    scope: &mut Scope,
    params: &ValidatedParams,
    prefs: &ContentFilterPrefs,
) -> QueryResult<Vec<String>> {
    let mut applied = Vec::new();
    for (name, value) in prefs.active() {
        let Some(decl) = strategy.schema.get(name) else {
            continue;
        };
        if params.contains(name) {
            continue;
        }
        let handler = strategy
            .handlers
            .get(decl.name)
            .ok_or_else(|| DeclarationError::MissingHandler {
                kind: strategy.kind,
                param: name.to_string(),
            })?;
        let mut ctx = BuildContext::new(catalog, scope, params, decl.name);
        handler.apply(&value, &mut ctx)?;
        applied.push(name.to_string());
    }
    Ok(applied)
}

/// Activity feeds span several kinds, so each filter is evaluated inside a
/// per-kind sub-query. Feed entries that do not point at that kind pass;
/// entries that do must point at a row the filtered sub-query keeps.
fn push_down(catalog: &Catalog, scope: &mut Scope, prefs: &ContentFilterPrefs) -> QueryResult<Vec<String>> {
    let mut applied: Vec<String> = Vec::new();
    let none = ValidatedParams::default();
    for kind in FEED_KINDS {
        let Some(column) = kind.rss_log_column() else {
            continue;
        };
        let strategy = catalog.strategy(kind)?;
        let mut sub = Scope::new(kind);
        let names = apply_direct(catalog, strategy, &mut sub, &none, prefs)?;
        if names.is_empty() {
            continue;
        }
        let link = ColumnRef::new(scope.base().to_string(), column);
        let id = sub.id_column();
        scope.and_where(Predicate::any(vec![
            Predicate::is_null(link.clone()),
            Predicate::in_subquery(link, sub, id),
        ]));
        for name in names {
            if !applied.contains(&name) {
                applied.push(name);
            }
        }
    }
    Ok(applied)
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scope::col;

    fn prefs() -> ContentFilterPrefs {
        ContentFilterPrefs {
            has_images: Some(true),
            lichen: Some("no".to_string()),
            region: Some("  ".to_string()),
            ..ContentFilterPrefs::default()
        }
    }

    fn run(kind: EntityKind, params: &ValidatedParams, prefs: &ContentFilterPrefs) -> (Scope, Vec<String>) {
        let catalog = Catalog::standard().unwrap();
        let strategy = catalog.strategy(kind).unwrap();
        let mut scope = Scope::new(kind);
        let applied = inject(&catalog, strategy, &mut scope, params, prefs).unwrap();
        (scope, applied)
    }

    #[test]
    fn blank_and_false_preferences_are_off() {
        let active: Vec<_> = prefs().active().into_iter().map(|(n, _)| n).collect();
        assert_eq!(active, vec!["has_images", "lichen"]);
        assert!(ContentFilterPrefs {
            has_images: Some(false),
            ..ContentFilterPrefs::default()
        }
        .is_empty());
    }

    #[test]
    fn filters_apply_only_where_declared() {
        let (scope, applied) = run(EntityKind::Name, &ValidatedParams::default(), &prefs());
        assert_eq!(applied, vec!["lichen"]);
        assert_eq!(scope.predicates().len(), 1);
    }

    #[test]
    fn explicit_parameters_win() {
        let mut params = ValidatedParams::default();
        params.insert("has_images", ParamValue::Bool(false));
        let (scope, applied) = run(EntityKind::Observation, &params, &prefs());
        assert_eq!(applied, vec!["lichen"]);
        assert!(scope.has_join("names"));
        assert!(
            !scope
                .predicates()
                .contains(&Predicate::is_not_null(col("observations", "thumb_image_id")))
        );
    }

    #[test]
    fn activity_feed_pushes_filters_into_sub_queries() {
        let (scope, applied) = run(EntityKind::RssLog, &ValidatedParams::default(), &prefs());
        assert_eq!(applied, vec!["has_images", "lichen"]);
        // Observation and Name sub-queries; Location declares neither filter.
        assert_eq!(scope.predicates().len(), 2);
        for predicate in scope.predicates() {
            let Predicate::Or(parts) = predicate else {
                panic!("expected a disjunction, got {predicate:?}");
            };
            assert!(matches!(parts[0], Predicate::IsNull { negated: false, .. }));
            assert!(matches!(parts[1], Predicate::InSubquery { .. }));
        }
    }

    #[test]
    fn prefs_round_trip_without_empty_fields() {
        let json = serde_json::to_string(&ContentFilterPrefs {
            clade: Some("Agaricales".to_string()),
            ..ContentFilterPrefs::default()
        })
        .unwrap();
        assert_eq!(json, r#"{"clade":"Agaricales"}"#);
    }
}
