//! The serializable identity of a query.

use serde::{Deserialize, Serialize};

use crate::filters::ContentFilterPrefs;
use crate::kinds::EntityKind;
use crate::schema::ValidatedParams;

/// Everything needed to rebuild a query's result set: kind, validated
/// parameters, content filters and, for coerced queries, the query it was
/// coerced from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub kind: EntityKind,
    pub params: ValidatedParams,
    #[serde(default, skip_serializing_if = "ContentFilterPrefs::is_empty")]
    pub content_filters: ContentFilterPrefs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<QueryDescriptor>>,
}

impl QueryDescriptor {
    pub fn new(kind: EntityKind, params: ValidatedParams) -> Self {
        Self {
            kind,
            params,
            content_filters: ContentFilterPrefs::default(),
            source: None,
        }
    }

    /// Attach content filters, keeping only the ones switched on.
    pub fn with_filters(mut self, prefs: &ContentFilterPrefs) -> Self {
        self.content_filters = prefs.normalized();
        self
    }

    /// A query for `kind` derived from `source`. Filters live on the source.
    pub fn coerced_from(source: QueryDescriptor, kind: EntityKind) -> Self {
        Self {
            kind,
            params: ValidatedParams::default(),
            content_filters: ContentFilterPrefs::default(),
            source: Some(Box::new(source)),
        }
    }

    /// Canonical key: equal descriptors always produce the same string.
    pub fn description(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Number of coercions between this query and its original.
    pub fn depth(&self) -> usize {
        self.source.as_deref().map_or(0, |s| s.depth() + 1)
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::ParamValue;

    fn params(pairs: &[(&str, ParamValue)]) -> ValidatedParams {
        let mut params = ValidatedParams::default();
        for (name, value) in pairs {
            params.insert(name, value.clone());
        }
        params
    }

    #[test]
    fn description_is_independent_of_insertion_order() {
        let a = QueryDescriptor::new(
            EntityKind::Observation,
            params(&[
                ("has_images", ParamValue::Bool(true)),
                ("by", ParamValue::Str("name".into())),
            ]),
        );
        let b = QueryDescriptor::new(
            EntityKind::Observation,
            params(&[
                ("by", ParamValue::Str("name".into())),
                ("has_images", ParamValue::Bool(true)),
            ]),
        );
        assert_eq!(a.description().unwrap(), b.description().unwrap());
    }

    #[test]
    fn switched_off_filters_do_not_change_the_description() {
        let plain = QueryDescriptor::new(EntityKind::Name, ValidatedParams::default());
        let filtered = plain.clone().with_filters(&ContentFilterPrefs {
            has_images: Some(false),
            region: Some(" ".to_string()),
            ..ContentFilterPrefs::default()
        });
        assert_eq!(plain.description().unwrap(), filtered.description().unwrap());
    }

    #[test]
    fn descriptors_round_trip_through_json() {
        let source = QueryDescriptor::new(
            EntityKind::Observation,
            params(&[("names", ParamValue::List(vec![ParamValue::Id(7)]))]),
        )
        .with_filters(&ContentFilterPrefs {
            lichen: Some("no".to_string()),
            ..ContentFilterPrefs::default()
        });
        let coerced = QueryDescriptor::coerced_from(source, EntityKind::Image);

        let json = coerced.description().unwrap();
        let back: QueryDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, coerced);
        assert_eq!(back.depth(), 1);
    }
}
