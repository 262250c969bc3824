//! Google-like search string grammar.
//!
//! ```text
//! agaricus OR amanita -amanitarita "fly agaric"
//! ```
//!
//! parses into one OR-group per clause (`goods`) and a flat list of
//! excluded terms (`bads`). Quoted phrases keep their inner whitespace.

use std::fmt;

use crate::scope::{FieldExpr, Predicate};

/// Syntax error, carrying the unparsed remainder of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError {
    pub at: String,
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid search string syntax at: '{}'", self.at)
    }
}

impl std::error::Error for GrammarError {}

/// Parsed search string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPattern {
    pub goods: Vec<Vec<String>>,
    pub bads: Vec<String>,
}

impl SearchPattern {
    /// Parse a search string. Blank input yields an empty pattern.
    ///
    /// A quote that does not close into a phrase ending at a space is part
    /// of an ordinary word, so `"amanita` searches for `"amanita`.
    pub fn parse(input: &str) -> Result<Self, GrammarError> {
        let squeezed = input.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut rest = squeezed.as_str();
        let mut pattern = SearchPattern::default();

        while !rest.is_empty() {
            if let Some((bad, after)) = negative_term(rest) {
                pattern.bads.push(bad);
                rest = skip_separator(after);
                continue;
            }

            let (first, mut after) = term(rest).ok_or_else(|| error_at(rest))?;
            let mut group = vec![first];
            while let Some((alternative, remainder)) =
                after.strip_prefix(" OR ").and_then(term)
            {
                group.push(alternative);
                after = remainder;
            }
            pattern.goods.push(group);
            rest = skip_separator(after);
        }

        Ok(pattern)
    }

    pub fn is_empty(&self) -> bool {
        self.goods.is_empty() && self.bads.is_empty()
    }

    /// Predicates matching rows where `fields` satisfy the pattern.
    ///
    /// Each OR-group requires some term to occur in some field; each bad
    /// term must occur in none of them.
    pub fn predicates(&self, fields: &[FieldExpr]) -> Vec<Predicate> {
        let mut out = Vec::with_capacity(self.goods.len() + self.bads.len());
        for group in &self.goods {
            let alternatives = group
                .iter()
                .flat_map(|term| {
                    let pattern = contains_pattern(term);
                    fields
                        .iter()
                        .map(move |field| Predicate::like(field.clone(), pattern.clone()))
                })
                .collect();
            out.push(Predicate::any(alternatives));
        }
        for bad in &self.bads {
            let pattern = contains_pattern(bad);
            out.push(Predicate::all(
                fields
                    .iter()
                    .map(|field| Predicate::not_like(field.clone(), pattern.clone()))
                    .collect(),
            ));
        }
        out
    }
}

/// `-word` or `-"phrase"` at the start of a clause.
fn negative_term(rest: &str) -> Option<(String, &str)> {
    rest.strip_prefix('-').and_then(term)
}

/// One quoted phrase or whitespace-delimited word. `None` when `rest`
/// does not start with a term.
fn term(rest: &str) -> Option<(String, &str)> {
    if rest.is_empty() || rest.starts_with(' ') {
        return None;
    }
    if let Some(quoted) = rest.strip_prefix('"')
        && let Some(close) = quoted.find('"')
        && close > 0
    {
        let after = &quoted[close + 1..];
        if after.is_empty() || after.starts_with(' ') {
            return Some((quoted[..close].to_string(), after));
        }
    }
    let end = rest.find(' ').unwrap_or(rest.len());
    Some((rest[..end].to_string(), &rest[end..]))
}

fn skip_separator(after: &str) -> &str {
    after.strip_prefix(' ').unwrap_or(after)
}

fn error_at(rest: &str) -> GrammarError {
    GrammarError {
        at: rest.to_string(),
    }
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
pub fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// `%term%` with user `*` treated as a wildcard.
pub fn contains_pattern(term: &str) -> String {
    format!("%{}%", escape_like_wildcards(term).replace('*', "%"))
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scope::col;

    fn goods(groups: &[&[&str]]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn blank_input_is_empty() {
        assert!(SearchPattern::parse("").unwrap().is_empty());
        assert!(SearchPattern::parse("   \t ").unwrap().is_empty());
    }

    #[test]
    fn simple_words_are_separate_groups() {
        let pattern = SearchPattern::parse("blah  blah2\tblah3").unwrap();
        assert_eq!(pattern.goods, goods(&[&["blah"], &["blah2"], &["blah3"]]));
        assert!(pattern.bads.is_empty());
    }

    #[test]
    fn or_groups_and_negations() {
        let pattern = SearchPattern::parse("agaricus OR amanita -amanitarita").unwrap();
        assert_eq!(pattern.goods, goods(&[&["agaricus", "amanita"]]));
        assert_eq!(pattern.bads, strings(&["amanitarita"]));
    }

    #[test]
    fn or_is_greedy_left_to_right() {
        let pattern = SearchPattern::parse("word1 word2 OR word3 word4").unwrap();
        assert_eq!(
            pattern.goods,
            goods(&[&["word1"], &["word2", "word3"], &["word4"]])
        );
    }

    #[test]
    fn quoted_phrases_and_dashes_inside_groups() {
        let pattern =
            SearchPattern::parse(r#"one foo OR bar OR "quoted phrase" OR -gar two"#).unwrap();
        assert_eq!(
            pattern.goods,
            goods(&[&["one"], &["foo", "bar", "quoted phrase", "-gar"], &["two"]])
        );
        assert!(pattern.bads.is_empty());
    }

    #[test]
    fn quoted_negations() {
        let pattern = SearchPattern::parse(r#"foo -"bad wolf" bar"#).unwrap();
        assert_eq!(pattern.goods, goods(&[&["foo"], &["bar"]]));
        assert_eq!(pattern.bads, strings(&["bad wolf"]));

        let pattern = SearchPattern::parse(r#"-"bad wolf" -foo -bar"#).unwrap();
        assert!(pattern.goods.is_empty());
        assert_eq!(pattern.bads, strings(&["bad wolf", "foo", "bar"]));
    }

    #[test]
    fn trailing_or_is_a_word() {
        let pattern = SearchPattern::parse("foo OR").unwrap();
        assert_eq!(pattern.goods, goods(&[&["foo"], &["OR"]]));
    }

    #[test]
    fn lone_dash_is_a_word() {
        let pattern = SearchPattern::parse("a - b").unwrap();
        assert_eq!(pattern.goods, goods(&[&["a"], &["-"], &["b"]]));
    }

    #[test]
    fn unclosed_quotes_are_plain_words() {
        let pattern = SearchPattern::parse(r#""amanita"#).unwrap();
        assert_eq!(pattern.goods, goods(&[&[r#""amanita"#]]));

        let pattern = SearchPattern::parse(r#"foo "bar baz"#).unwrap();
        assert_eq!(pattern.goods, goods(&[&["foo"], &[r#""bar"#], &["baz"]]));
    }

    #[test]
    fn quote_glued_to_word_is_a_plain_word() {
        let pattern = SearchPattern::parse(r#""bar"baz"#).unwrap();
        assert_eq!(pattern.goods, goods(&[&[r#""bar"baz"#]]));

        let pattern = SearchPattern::parse(r#"-"bar"baz"#).unwrap();
        assert_eq!(pattern.bads, strings(&[r#""bar"baz"#]));

        let pattern = SearchPattern::parse(r#""""#).unwrap();
        assert_eq!(pattern.goods, goods(&[&[r#""""#]]));
    }

    #[test]
    fn broken_phrase_after_or_splits_at_the_space() {
        let pattern = SearchPattern::parse(r#"foo OR "a b"x"#).unwrap();
        assert_eq!(pattern.goods, goods(&[&["foo", r#""a"#], &[r#"b"x"#]]));
    }

    #[test]
    fn syntax_errors_name_the_remainder() {
        let err = error_at("\"x");
        assert_eq!(err.to_string(), "Invalid search string syntax at: '\"x'");
    }

    #[test]
    fn predicates_or_within_groups_and_not_for_bads() {
        let pattern = SearchPattern::parse("foo OR bar -baz").unwrap();
        let fields = vec![FieldExpr::from(col("names", "search_name"))];
        let preds = pattern.predicates(&fields);

        assert_eq!(preds.len(), 2);
        assert!(matches!(&preds[0], Predicate::Or(parts) if parts.len() == 2));
        assert_eq!(
            preds[1],
            Predicate::not_like(col("names", "search_name"), "%baz%")
        );
    }

    #[test]
    fn multiple_fields_widen_each_term() {
        let pattern = SearchPattern::parse("foo").unwrap();
        let fields = vec![
            FieldExpr::from(col("observations", "where")),
            FieldExpr::from(col("names", "search_name")),
        ];
        let preds = pattern.predicates(&fields);
        assert!(matches!(&preds[0], Predicate::Or(parts) if parts.len() == 2));
    }

    #[test]
    fn like_wildcards_are_escaped_and_star_is_wildcard() {
        assert_eq!(contains_pattern("100%_done"), "%100\\%\\_done%");
        assert_eq!(contains_pattern("Amanita *ocreata"), "%Amanita %ocreata%");
        assert_eq!(escape_like_wildcards("a\\b"), "a\\\\b");
    }
}
