use super::{EntityKind, KindStrategy, advanced, base_schema, stamped};
use crate::executor::IncludeSpec;
use crate::handlers::{
    BooleanHandler, BoundingBoxHandler, JoinStep, SearchHandler, SubqueryHandler, SuffixHandler,
};
use crate::ordering::NamedOrdering;
use crate::schema::{ParamDecl, ValueKind};
use crate::scope::{CompareOp, Predicate, col};

const T: &str = "locations";

pub(crate) fn strategy() -> KindStrategy {
    let kind = EntityKind::Location;
    let schema = stamped(base_schema(kind))
        .param(ParamDecl::new("pattern", ValueKind::Search))
        .param(ParamDecl::new("region", ValueKind::String))
        .param(ParamDecl::new("north", ValueKind::Float))
        .param(ParamDecl::new("south", ValueKind::Float))
        .param(ParamDecl::new("east", ValueKind::Float))
        .param(ParamDecl::new("west", ValueKind::Float))
        .param(ParamDecl::new("has_notes", ValueKind::Boolean))
        .param(ParamDecl::new("has_observations", ValueKind::Boolean))
        .param(ParamDecl::new(
            "observation_query",
            ValueKind::Subquery(EntityKind::Observation),
        ));
    let schema = advanced(schema, &["search_where", "search_user", "search_content"]);

    KindStrategy::new(kind, schema, "name")
        .with_common()
        .with_stamps()
        .with_rss_log_ordering()
        .handler("pattern", SearchHandler::field(col(T, "name")))
        .handler("region", SuffixHandler::new(col(T, "name")))
        .handler("north", BoundingBoxHandler::area(T))
        .handler("south", BoundingBoxHandler::area(T))
        .handler("east", BoundingBoxHandler::area(T))
        .handler("west", BoundingBoxHandler::area(T))
        .handler(
            "has_notes",
            BooleanHandler::new(
                Predicate::compare(col(T, "notes"), CompareOp::Ne, ""),
                Predicate::any(vec![Predicate::is_null(col(T, "notes")), Predicate::eq(col(T, "notes"), "")]),
            ),
        )
        .handler(
            "has_observations",
            BooleanHandler::requires_join(&[JoinStep::inner(T, "observations")]),
        )
        .handler(
            "observation_query",
            SubqueryHandler::new(
                EntityKind::Observation,
                col(T, "id"),
                col("observations", "location_id"),
            ),
        )
        .handler("search_where", SearchHandler::field(col(T, "name")))
        .handler(
            "search_user",
            SearchHandler::new(vec![col("users", "login").into(), col("users", "name").into()])
                .via(JoinStep::inner(T, "users")),
        )
        .handler("search_content", SearchHandler::field(col(T, "notes")))
        .ordering("name", NamedOrdering::new().asc(col(T, "name")))
        .letters(col(T, "name"))
        .include(IncludeSpec::belongs_to("user", "users", "user_id"))
}
