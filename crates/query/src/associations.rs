//! Declared associations between tables.
//!
//! A join is looked up forward first (`from` declares a link to `to`) and
//! then in reverse (`to` declares a link back to `from`).

use crate::error::DeclarationError;
use crate::scope::{ColumnRef, JoinKind, JoinSpec, Predicate};

/// How the two sides of an association line up.
#[derive(Debug, Clone, Copy)]
enum Link {
    /// `from.column = to.id`
    BelongsTo(&'static str),
    /// `from.id_column = to.id AND from.type_column = type_value`
    Polymorphic {
        id_column: &'static str,
        type_column: &'static str,
        type_value: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
struct Association {
    from: &'static str,
    /// Alias the joined table is known by.
    to: &'static str,
    /// Underlying table, when different from the alias.
    table: Option<&'static str>,
    link: Link,
}

const fn belongs_to(from: &'static str, to: &'static str, column: &'static str) -> Association {
    Association {
        from,
        to,
        table: None,
        link: Link::BelongsTo(column),
    }
}

const fn comment_target(to: &'static str, type_value: &'static str) -> Association {
    Association {
        from: "comments",
        to,
        table: None,
        link: Link::Polymorphic {
            id_column: "target_id",
            type_column: "target_type",
            type_value,
        },
    }
}

const ASSOCIATIONS: &[Association] = &[
    belongs_to("observations", "names", "name_id"),
    belongs_to("observations", "locations", "location_id"),
    belongs_to("observations", "users", "user_id"),
    belongs_to("observations", "rss_logs", "rss_log_id"),
    Association {
        from: "observations",
        to: "thumb_images",
        table: Some("images"),
        link: Link::BelongsTo("thumb_image_id"),
    },
    belongs_to("observation_images", "images", "image_id"),
    belongs_to("observation_images", "observations", "observation_id"),
    belongs_to("project_observations", "observations", "observation_id"),
    belongs_to("project_observations", "projects", "project_id"),
    belongs_to("project_images", "images", "image_id"),
    belongs_to("project_images", "projects", "project_id"),
    belongs_to("species_list_observations", "observations", "observation_id"),
    belongs_to("species_list_observations", "species_lists", "species_list_id"),
    belongs_to("sequences", "observations", "observation_id"),
    belongs_to("names", "users", "user_id"),
    belongs_to("names", "rss_logs", "rss_log_id"),
    belongs_to("locations", "users", "user_id"),
    belongs_to("locations", "rss_logs", "rss_log_id"),
    belongs_to("images", "users", "user_id"),
    belongs_to("comments", "users", "user_id"),
    comment_target("observations", "Observation"),
    comment_target("names", "Name"),
    comment_target("locations", "Location"),
    belongs_to("rss_logs", "observations", "observation_id"),
    belongs_to("rss_logs", "names", "name_id"),
    belongs_to("rss_logs", "locations", "location_id"),
];

impl Association {
    fn target_table(&self) -> &'static str {
        self.table.unwrap_or(self.to)
    }

    /// ON condition linking `from_alias` to `to_alias`.
    fn condition(&self, from_alias: &str, to_alias: &str) -> Predicate {
        match self.link {
            Link::BelongsTo(column) => Predicate::columns_eq(
                ColumnRef::new(from_alias, column),
                ColumnRef::new(to_alias, "id"),
            ),
            Link::Polymorphic {
                id_column,
                type_column,
                type_value,
            } => Predicate::all(vec![
                Predicate::columns_eq(
                    ColumnRef::new(from_alias, id_column),
                    ColumnRef::new(to_alias, "id"),
                ),
                Predicate::eq(ColumnRef::new(from_alias, type_column), type_value),
            ]),
        }
    }
}

/// Build the join that brings `to` into a scope already containing `from`.
pub fn join_spec(from: &str, to: &str, kind: JoinKind) -> Result<JoinSpec, DeclarationError> {
    if let Some(assoc) = ASSOCIATIONS.iter().find(|a| a.from == from && a.to == to) {
        return Ok(JoinSpec {
            table: assoc.target_table().to_string(),
            alias: assoc.to.to_string(),
            kind,
            on: assoc.condition(from, to),
        });
    }
    if let Some(assoc) = ASSOCIATIONS
        .iter()
        .find(|a| a.from == to && a.to == from && a.table.is_none())
    {
        return Ok(JoinSpec {
            table: to.to_string(),
            alias: to.to_string(),
            kind,
            on: assoc.condition(to, from),
        });
    }
    Err(DeclarationError::UndeclaredAssociation {
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// True if a join between the two tables is declared in either direction.
pub fn is_declared(from: &str, to: &str) -> bool {
    join_spec(from, to, JoinKind::Inner).is_ok()
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scope::CompareOp;

    #[test]
    fn forward_join_uses_foreign_key_on_source() {
        let join = join_spec("observations", "names", JoinKind::Inner).unwrap();
        assert_eq!(join.alias, "names");
        assert_eq!(
            join.on,
            Predicate::CompareColumns {
                left: ColumnRef::new("observations", "name_id"),
                op: CompareOp::Eq,
                right: ColumnRef::new("names", "id"),
            }
        );
    }

    #[test]
    fn reverse_join_flips_the_link() {
        let join = join_spec("images", "observation_images", JoinKind::Inner).unwrap();
        assert_eq!(join.table, "observation_images");
        assert_eq!(
            join.on,
            Predicate::columns_eq(
                ColumnRef::new("observation_images", "image_id"),
                ColumnRef::new("images", "id"),
            )
        );
    }

    #[test]
    fn aliased_association_keeps_real_table() {
        let join = join_spec("observations", "thumb_images", JoinKind::Left).unwrap();
        assert_eq!(join.table, "images");
        assert_eq!(join.alias, "thumb_images");
        assert_eq!(join.kind, JoinKind::Left);
    }

    #[test]
    fn polymorphic_join_checks_type() {
        let join = join_spec("observations", "comments", JoinKind::Inner).unwrap();
        match join.on {
            Predicate::And(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected conjunction, got {other:?}"),
        }
    }

    #[test]
    fn unknown_pairs_are_rejected() {
        assert!(!is_declared("names", "images"));
        assert!(is_declared("names", "observations"));
    }
}
