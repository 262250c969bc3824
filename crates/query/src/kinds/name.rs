use super::{EntityKind, KindStrategy, advanced, base_schema, stamped};
use crate::executor::IncludeSpec;
use crate::handlers::{
    BooleanHandler, ChoiceHandler, CladeHandler, JoinStep, SearchHandler, SubqueryHandler, custom,
};
use crate::ordering::NamedOrdering;
use crate::schema::{ParamDecl, ParamValue, ValueKind};
use crate::scope::{CompareOp, Predicate, col};

const T: &str = "names";

/// Taxonomic ranks, lowest first. Stored as their 1-based position.
pub const RANKS: &[&str] = &[
    "Form",
    "Variety",
    "Subspecies",
    "Species",
    "Stirps",
    "Subsection",
    "Section",
    "Subgenus",
    "Genus",
    "Family",
    "Order",
    "Class",
    "Phylum",
    "Kingdom",
    "Domain",
    "Group",
];

pub(crate) const GENUS: i64 = 9;
pub(crate) const GROUP: i64 = 16;

pub fn rank_ordinal(rank: &str) -> Option<i64> {
    RANKS
        .iter()
        .position(|r| *r == rank)
        .and_then(|i| i64::try_from(i + 1).ok())
}

pub(crate) fn strategy() -> KindStrategy {
    let kind = EntityKind::Name;
    let schema = stamped(base_schema(kind))
        .param(ParamDecl::new("pattern", ValueKind::Search))
        .param(ParamDecl::new("text_name_has", ValueKind::Search))
        .param(ParamDecl::new("has_notes", ValueKind::Boolean))
        .param(ParamDecl::new("has_observations", ValueKind::Boolean))
        .param(ParamDecl::new("deprecated", ValueKind::Boolean))
        .param(ParamDecl::new("misspellings", ValueKind::Enum(&["no", "either", "only"])))
        .param(ParamDecl::new("rank", ValueKind::range(ValueKind::Enum(RANKS))))
        .param(ParamDecl::new("lichen", ValueKind::Enum(&["no", "yes"])))
        .param(ParamDecl::new("clade", ValueKind::String))
        .param(ParamDecl::new(
            "observation_query",
            ValueKind::Subquery(EntityKind::Observation),
        ));
    let schema = advanced(schema, &["search_name", "search_user", "search_content"]);

    KindStrategy::new(kind, schema, "name")
        .with_common()
        .with_stamps()
        .with_rss_log_ordering()
        .handler("pattern", SearchHandler::field(col(T, "search_name")))
        .handler("text_name_has", SearchHandler::field(col(T, "text_name")))
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
        .handler("deprecated", BooleanHandler::flag(col(T, "deprecated")))
        .handler(
            "misspellings",
            ChoiceHandler::new()
                .choice("no", Predicate::is_null(col(T, "correct_spelling_id")))
                .choice("only", Predicate::is_not_null(col(T, "correct_spelling_id")))
                .no_op("either"),
        )
        .handler(
            "rank",
            custom(|value, ctx| {
                let Some((min, max)) = value.as_range() else {
                    return Ok(());
                };
                let ordinal = |v: Option<&ParamValue>| v.and_then(ParamValue::as_str).and_then(rank_ordinal);
                // A single bound selects exactly that rank.
                let (low, high) = match (ordinal(min), ordinal(max)) {
                    (Some(a), Some(b)) => (a.min(b), a.max(b)),
                    (Some(a), None) | (None, Some(a)) => (a, a),
                    (None, None) => return Ok(()),
                };
                ctx.and_where(Predicate::all(vec![
                    Predicate::compare(col(T, "rank"), CompareOp::Ge, low),
                    Predicate::compare(col(T, "rank"), CompareOp::Le, high),
                ]));
                Ok(())
            }),
        )
        .handler(
            "lichen",
            ChoiceHandler::new()
                .choice("yes", Predicate::like(col(T, "lifeform"), "% lichen %"))
                .choice(
                    "no",
                    Predicate::any(vec![
                        Predicate::is_null(col(T, "lifeform")),
                        Predicate::not_like(col(T, "lifeform"), "% lichen %"),
                    ]),
                ),
        )
        .handler("clade", CladeHandler::new(T))
        .handler(
            "observation_query",
            SubqueryHandler::new(
                EntityKind::Observation,
                col(T, "id"),
                col("observations", "name_id"),
            ),
        )
        .handler("search_name", SearchHandler::field(col(T, "search_name")))
        .handler(
            "search_user",
            SearchHandler::new(vec![col("users", "login").into(), col("users", "name").into()])
                .via(JoinStep::inner(T, "users")),
        )
        .handler("search_content", SearchHandler::field(col(T, "notes")))
        .ordering("name", NamedOrdering::new().asc(col(T, "sort_name")))
        .letters(col(T, "sort_name"))
        .include(IncludeSpec::belongs_to("user", "users", "user_id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_ordinals_are_one_based() {
        assert_eq!(rank_ordinal("Form"), Some(1));
        assert_eq!(rank_ordinal("Genus"), Some(GENUS));
        assert_eq!(rank_ordinal("Group"), Some(GROUP));
        assert_eq!(rank_ordinal("Clade"), None);
    }
}
