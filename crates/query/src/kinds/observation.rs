use super::{EntityKind, KindStrategy, advanced, base_schema, stamped};
use crate::executor::IncludeSpec;
use crate::handlers::{
    BooleanHandler, BoundingBoxHandler, ChoiceHandler, CladeHandler, DateRangeHandler,
    IdSetHandler, JoinStep, RangeHandler, SearchHandler, SuffixHandler, TwoPassSearchHandler,
};
use crate::kinds::name::{GENUS, GROUP};
use crate::ordering::NamedOrdering;
use crate::schema::{ParamDecl, ValueKind};
use crate::scope::{CompareOp, Predicate, col};

const T: &str = "observations";

const TO_NAMES: JoinStep = JoinStep::inner(T, "names");
const TO_COMMENTS: JoinStep = JoinStep::inner(T, "comments");

fn bounding_box() -> BoundingBoxHandler {
    BoundingBoxHandler::point_or_area(
        col(T, "lat"),
        col(T, "long"),
        "locations",
        JoinStep::left(T, "locations"),
    )
}

pub(crate) fn strategy() -> KindStrategy {
    let kind = EntityKind::Observation;
    let schema = stamped(base_schema(kind))
        .param(ParamDecl::new("date", ValueKind::range(ValueKind::Date)))
        .param(ParamDecl::new("names", ValueKind::list(ValueKind::Record("names"))))
        .param(ParamDecl::new("locations", ValueKind::list(ValueKind::Record("locations"))))
        .param(ParamDecl::new("projects", ValueKind::list(ValueKind::Record("projects"))))
        .param(ParamDecl::new(
            "species_lists",
            ValueKind::list(ValueKind::Record("species_lists")),
        ))
        .param(ParamDecl::new("pattern", ValueKind::Search))
        .param(ParamDecl::new("notes_has", ValueKind::Search))
        .param(ParamDecl::new("comments_has", ValueKind::Search))
        .param(ParamDecl::new("has_images", ValueKind::Boolean))
        .param(ParamDecl::new("has_specimen", ValueKind::Boolean))
        .param(ParamDecl::new("has_comments", ValueKind::Boolean))
        .param(ParamDecl::new("has_name", ValueKind::Boolean))
        .param(ParamDecl::new("has_notes", ValueKind::Boolean))
        .param(ParamDecl::new("has_sequences", ValueKind::Boolean))
        .param(ParamDecl::new("is_collection_location", ValueKind::Boolean))
        .param(ParamDecl::new("has_public_lat_lng", ValueKind::Boolean))
        .param(ParamDecl::new("confidence", ValueKind::range(ValueKind::Float)))
        .param(ParamDecl::new("north", ValueKind::Float))
        .param(ParamDecl::new("south", ValueKind::Float))
        .param(ParamDecl::new("east", ValueKind::Float))
        .param(ParamDecl::new("west", ValueKind::Float))
        .param(ParamDecl::new("region", ValueKind::String))
        .param(ParamDecl::new("clade", ValueKind::String))
        .param(ParamDecl::new("lichen", ValueKind::Enum(&["no", "yes"])));
    let schema = advanced(
        schema,
        &["search_name", "search_where", "search_user", "search_content"],
    );

    KindStrategy::new(kind, schema, "date")
        .with_common()
        .with_stamps()
        .with_rss_log_ordering()
        .handler("date", DateRangeHandler::new(col(T, "when")))
        .handler(
            "names",
            IdSetHandler::new(col(T, "name_id")).titled("query_title_of_name", "name"),
        )
        .handler(
            "locations",
            IdSetHandler::new(col(T, "location_id")).titled("query_title_at_location", "location"),
        )
        .handler(
            "projects",
            IdSetHandler::new(col("project_observations", "project_id"))
                .via(JoinStep::inner(T, "project_observations"))
                .titled("query_title_for_project", "project"),
        )
        .handler(
            "species_lists",
            IdSetHandler::new(col("species_list_observations", "species_list_id"))
                .via(JoinStep::inner(T, "species_list_observations"))
                .titled("query_title_in_species_list", "species_list"),
        )
        .handler(
            "pattern",
            SearchHandler::new(vec![col("names", "search_name").into(), col(T, "where").into()])
                .via(TO_NAMES),
        )
        .handler("notes_has", SearchHandler::field(col(T, "notes")))
        .handler(
            "comments_has",
            SearchHandler::new(vec![
                col("comments", "summary").into(),
                col("comments", "comment").into(),
            ])
            .via(TO_COMMENTS),
        )
        .handler("has_images", BooleanHandler::presence(col(T, "thumb_image_id")))
        .handler("has_specimen", BooleanHandler::flag(col(T, "specimen")))
        .handler("has_comments", BooleanHandler::requires_join(&[TO_COMMENTS]))
        .handler(
            "has_name",
            BooleanHandler::new(
                Predicate::any(vec![
                    Predicate::compare(col("names", "rank"), CompareOp::Le, GENUS),
                    Predicate::eq(col("names", "rank"), GROUP),
                ]),
                Predicate::all(vec![
                    Predicate::compare(col("names", "rank"), CompareOp::Gt, GENUS),
                    Predicate::compare(col("names", "rank"), CompareOp::Lt, GROUP),
                ]),
            )
            .via(TO_NAMES),
        )
        .handler(
            "has_notes",
            BooleanHandler::new(
                Predicate::compare(col(T, "notes"), CompareOp::Ne, ""),
                Predicate::any(vec![Predicate::is_null(col(T, "notes")), Predicate::eq(col(T, "notes"), "")]),
            ),
        )
        .handler(
            "has_sequences",
            BooleanHandler::requires_join(&[JoinStep::inner(T, "sequences")]),
        )
        .handler("is_collection_location", BooleanHandler::flag(col(T, "is_collection_location")))
        .handler(
            "has_public_lat_lng",
            BooleanHandler::new(
                Predicate::all(vec![Predicate::is_not_null(col(T, "lat")), Predicate::eq(col(T, "gps_hidden"), false)]),
                Predicate::any(vec![Predicate::is_null(col(T, "lat")), Predicate::eq(col(T, "gps_hidden"), true)]),
            ),
        )
        .handler("confidence", RangeHandler::new(col(T, "vote_cache")))
        .handler("north", bounding_box())
        .handler("south", bounding_box())
        .handler("east", bounding_box())
        .handler("west", bounding_box())
        .handler("region", SuffixHandler::new(col(T, "where")))
        .handler("clade", CladeHandler::new(T))
        .handler(
            "lichen",
            ChoiceHandler::new()
                .choice("yes", Predicate::like(col("names", "lifeform"), "% lichen %"))
                .choice(
                    "no",
                    Predicate::any(vec![
                        Predicate::is_null(col("names", "lifeform")),
                        Predicate::not_like(col("names", "lifeform"), "% lichen %"),
                    ]),
                )
                .via(TO_NAMES),
        )
        .handler("search_name", SearchHandler::field(col("names", "search_name")).via(TO_NAMES))
        .handler("search_where", SearchHandler::field(col(T, "where")))
        .handler(
            "search_user",
            SearchHandler::new(vec![col("users", "login").into(), col("users", "name").into()])
                .via(JoinStep::inner(T, "users")),
        )
        .handler(
            "search_content",
            TwoPassSearchHandler::new(
                vec![col(T, "notes").into()],
                vec![col("comments", "summary").into(), col("comments", "comment").into()],
                vec![TO_COMMENTS],
            ),
        )
        .ordering("date", NamedOrdering::new().desc(col(T, "when")))
        .ordering(
            "name",
            NamedOrdering::new()
                .outer_join(T, "names")
                .asc(col("names", "sort_name"))
                .desc(col(T, "when")),
        )
        .ordering(
            "location",
            NamedOrdering::new()
                .outer_join(T, "locations")
                .asc(col("locations", "name")),
        )
        .ordering("where", NamedOrdering::new().asc(col(T, "where")))
        .ordering("confidence", NamedOrdering::new().desc(col(T, "vote_cache")))
        .ordering(
            "thumbnail_quality",
            NamedOrdering::new()
                .outer_join(T, "thumb_images")
                .desc(col("thumb_images", "vote_cache"))
                .desc(col(T, "vote_cache")),
        )
        .include(IncludeSpec::belongs_to("name", "names", "name_id"))
        .include(IncludeSpec::belongs_to("location", "locations", "location_id"))
        .include(IncludeSpec::belongs_to("user", "users", "user_id"))
        .include(IncludeSpec::has_many("sequences", "sequences", "observation_id"))
}
