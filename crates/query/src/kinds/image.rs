use super::{EntityKind, KindStrategy, advanced, base_schema, stamped};
use crate::executor::IncludeSpec;
use crate::handlers::{
    BooleanHandler, DateRangeHandler, IdSetHandler, JoinStep, SearchHandler, SubqueryHandler,
    custom,
};
use crate::ordering::NamedOrdering;
use crate::schema::{ParamDecl, ValueKind};
use crate::scope::{Literal, Predicate, col};

const T: &str = "images";

/// Extension and MIME type of each recognised upload format.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("gif", "image/gif"),
    ("png", "image/png"),
];

const TO_LINKS: JoinStep = JoinStep::inner(T, "observation_images");
const TO_OBSERVATIONS: JoinStep = JoinStep::inner("observation_images", "observations");

pub(crate) fn strategy() -> KindStrategy {
    let kind = EntityKind::Image;
    let schema = stamped(base_schema(kind))
        .param(ParamDecl::new("date", ValueKind::range(ValueKind::Date)))
        .param(ParamDecl::new(
            "observations",
            ValueKind::list(ValueKind::Record("observations")),
        ))
        .param(ParamDecl::new("projects", ValueKind::list(ValueKind::Record("projects"))))
        .param(ParamDecl::new("has_observations", ValueKind::Boolean))
        .param(ParamDecl::new(
            "content_types",
            ValueKind::list(ValueKind::Enum(&["jpg", "gif", "png", "raw"])),
        ))
        .param(ParamDecl::new("copyright_holder_has", ValueKind::Search))
        .param(ParamDecl::new(
            "observation_query",
            ValueKind::Subquery(EntityKind::Observation),
        ));
    let schema = advanced(schema, &["search_name", "search_where", "search_user"]);

    KindStrategy::new(kind, schema, "created_at")
        .with_common()
        .with_stamps()
        .handler("date", DateRangeHandler::new(col(T, "when")))
        .handler(
            "observations",
            IdSetHandler::new(col("observation_images", "observation_id")).via(TO_LINKS),
        )
        .handler(
            "projects",
            IdSetHandler::new(col("project_images", "project_id"))
                .via(JoinStep::inner(T, "project_images"))
                .titled("query_title_for_project", "project"),
        )
        .handler("has_observations", BooleanHandler::requires_join(&[TO_LINKS]))
        .handler(
            "content_types",
            custom(|value, ctx| {
                let Some(wanted) = value.as_strs() else {
                    return Ok(());
                };
                let known: Vec<Literal> = CONTENT_TYPES.iter().map(|(_, mime)| Literal::from(*mime)).collect();
                let chosen: Vec<Literal> = CONTENT_TYPES
                    .iter()
                    .filter(|(ext, _)| wanted.contains(ext))
                    .map(|(_, mime)| Literal::from(*mime))
                    .collect();
                // "raw" means any type outside the recognised set.
                let mut alternatives = Vec::new();
                if !chosen.is_empty() {
                    alternatives.push(Predicate::in_list(col(T, "content_type"), chosen));
                }
                if wanted.contains(&"raw") {
                    alternatives.push(Predicate::InList {
                        field: col(T, "content_type").into(),
                        values: known,
                        negated: true,
                    });
                }
                ctx.and_where(Predicate::any(alternatives));
                Ok(())
            }),
        )
        .handler("copyright_holder_has", SearchHandler::field(col(T, "copyright_holder")))
        .handler(
            "observation_query",
            SubqueryHandler::new(
                EntityKind::Observation,
                col(T, "id"),
                col("observation_images", "image_id"),
            )
            .via(JoinStep::inner("observations", "observation_images")),
        )
        .handler(
            "search_name",
            SearchHandler::field(col("names", "search_name"))
                .via(TO_LINKS)
                .via(TO_OBSERVATIONS)
                .via(JoinStep::inner("observations", "names")),
        )
        .handler(
            "search_where",
            SearchHandler::field(col("observations", "where"))
                .via(TO_LINKS)
                .via(TO_OBSERVATIONS),
        )
        .handler(
            "search_user",
            SearchHandler::new(vec![col("users", "login").into(), col("users", "name").into()])
                .via(JoinStep::inner(T, "users")),
        )
        .ordering("date", NamedOrdering::new().desc(col(T, "when")))
        .ordering(
            "name",
            NamedOrdering::new()
                .outer_join(T, "observation_images")
                .outer_join("observation_images", "observations")
                .outer_join("observations", "names")
                .asc(col("names", "sort_name")),
        )
        .ordering("image_quality", NamedOrdering::new().desc(col(T, "vote_cache")))
        .ordering(
            "confidence",
            NamedOrdering::new()
                .outer_join(T, "observation_images")
                .outer_join("observation_images", "observations")
                .desc(col("observations", "vote_cache")),
        )
        .ordering("original_name", NamedOrdering::new().asc(col(T, "original_name")))
        .ordering("copyright_holder", NamedOrdering::new().asc(col(T, "copyright_holder")))
        .include(IncludeSpec::belongs_to("user", "users", "user_id"))
        .include(IncludeSpec::has_many("observation_links", "observation_images", "image_id"))
}
