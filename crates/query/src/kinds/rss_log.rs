use super::{EntityKind, KindStrategy, base_schema};
use crate::executor::IncludeSpec;
use crate::handlers::{RangeHandler, custom};
use crate::ordering::NamedOrdering;
use crate::schema::{ParamDecl, ValueKind};
use crate::scope::{Predicate, col};

const T: &str = "rss_logs";

/// Feed entry types; each but `all` is backed by a `<type>_id` column.
const FEED_TYPES: &[&str] = &["all", "observation", "name", "location", "project", "species_list"];

pub(crate) fn strategy() -> KindStrategy {
    let kind = EntityKind::RssLog;
    let schema = base_schema(kind)
        .param(ParamDecl::new("updated_at", ValueKind::range(ValueKind::Time)))
        .param(ParamDecl::new("type", ValueKind::list(ValueKind::Enum(FEED_TYPES))));

    KindStrategy::new(kind, schema, "updated_at")
        .with_common()
        .handler("updated_at", RangeHandler::new(col(T, "updated_at")))
        .handler(
            "type",
            custom(|value, ctx| {
                let Some(wanted) = value.as_strs() else {
                    return Ok(());
                };
                if wanted.contains(&"all") {
                    return Ok(());
                }
                let present = wanted
                    .iter()
                    .map(|t| Predicate::is_not_null(col(T, &format!("{t}_id"))))
                    .collect();
                ctx.and_where(Predicate::any(present));
                Ok(())
            }),
        )
        .ordering("updated_at", NamedOrdering::new().desc(col(T, "updated_at")))
        .include(IncludeSpec::belongs_to("observation", "observations", "observation_id"))
        .include(IncludeSpec::belongs_to("name", "names", "name_id"))
        .include(IncludeSpec::belongs_to("location", "locations", "location_id"))
}
