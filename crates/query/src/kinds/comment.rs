use super::{EntityKind, KindStrategy, base_schema, stamped};
use crate::executor::IncludeSpec;
use crate::handlers::{IdSetHandler, MemberHandler, SearchHandler};
use crate::ordering::NamedOrdering;
use crate::schema::{ParamDecl, ValueKind};
use crate::scope::col;

const T: &str = "comments";

pub(crate) fn strategy() -> KindStrategy {
    let kind = EntityKind::Comment;
    let schema = stamped(base_schema(kind))
        // Targets are polymorphic, so ids are plain integers.
        .param(ParamDecl::new("target", ValueKind::list(ValueKind::Integer)))
        .param(ParamDecl::new(
            "target_types",
            ValueKind::list(ValueKind::Enum(&["Observation", "Name", "Location"])),
        ))
        .param(ParamDecl::new("summary_has", ValueKind::Search))
        .param(ParamDecl::new("content_has", ValueKind::Search));

    KindStrategy::new(kind, schema, "created_at")
        .with_common()
        .with_stamps()
        .handler("target", IdSetHandler::new(col(T, "target_id")))
        .handler("target_types", MemberHandler::new(col(T, "target_type")))
        .handler("summary_has", SearchHandler::field(col(T, "summary")))
        .handler(
            "content_has",
            SearchHandler::new(vec![col(T, "summary").into(), col(T, "comment").into()]),
        )
        .ordering("summary", NamedOrdering::new().asc(col(T, "summary")))
        .include(IncludeSpec::belongs_to("user", "users", "user_id"))
}
