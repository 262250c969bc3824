//! Page requests, pages, and the memo table behind a query instance.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::executor::Record;

/// Letter bucket of a letter-paginated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LetterFilter {
    /// Titles starting with this (upper-case ASCII) letter.
    Letter(char),
    /// Titles with no leading letter, or no title at all.
    Other,
}

impl LetterFilter {
    /// Bucket of a title prefix: its first character upper-cased when it is
    /// an ASCII letter.
    pub fn of(prefix: Option<&str>) -> Self {
        match prefix.and_then(|p| p.chars().next()) {
            Some(c) if c.is_ascii_alphabetic() => LetterFilter::Letter(c.to_ascii_uppercase()),
            _ => LetterFilter::Other,
        }
    }

    /// Parse a caller-supplied filter: one letter (any case) or `#`/`other`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input == "#" || input.eq_ignore_ascii_case("other") {
            return Some(LetterFilter::Other);
        }
        let mut chars = input.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => {
                Some(LetterFilter::Letter(c.to_ascii_uppercase()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for LetterFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LetterFilter::Letter(c) => write!(f, "{c}"),
            LetterFilter::Other => f.write_str("#"),
        }
    }
}

/// Which slice of the results to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-indexed; page 0 is treated as page 1.
    pub page: u32,
    /// Page size; the engine default when unset.
    pub per_page: Option<usize>,
    pub letter: Option<LetterFilter>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: None,
            letter: None,
        }
    }
}

impl PageRequest {
    pub fn page(page: u32) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    pub fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn letter(mut self, letter: LetterFilter) -> Self {
        self.letter = Some(letter);
        self
    }
}

/// One page of result ids with paging bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub ids: Vec<i64>,
    /// Current page number (1-indexed).
    pub page: u32,
    pub per_page: usize,
    /// Total count (before paging, after the letter filter).
    pub total: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
    /// Letters present anywhere in the full result, when letters are on.
    pub used_letters: Vec<LetterFilter>,
    pub letter: Option<LetterFilter>,
}

impl Page {
    /// Slice `ids` and compute paging totals.
    pub(crate) fn slice(ids: &[i64], page: u32, per_page: usize) -> Self {
        let page = page.max(1);
        let total = ids.len() as u64;
        let total_pages = if per_page > 0 {
            ((total as f64) / (per_page as f64)).ceil() as u32
        } else {
            1
        };
        let start = (page as usize - 1).saturating_mul(per_page);
        let slice = ids
            .iter()
            .skip(start)
            .take(per_page)
            .copied()
            .collect();

        Self {
            ids: slice,
            page,
            per_page,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
            used_letters: Vec::new(),
            letter: None,
        }
    }
}

/// Memoized state of one query instance.
///
/// Ids, letters and records are cleared together; there is no partial reset.
#[derive(Debug, Default, Clone)]
pub struct ResultCache {
    pub(crate) ids: Option<Vec<i64>>,
    /// Letter bucket per id, present whenever ids were fetched with letters.
    pub(crate) letters: Option<HashMap<i64, LetterFilter>>,
    pub(crate) records: HashMap<i64, Record>,
    /// Ids asked for that do not exist; never re-requested.
    pub(crate) missing: BTreeSet<i64>,
}

impl ResultCache {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn has_ids(&self) -> bool {
        self.ids.is_some()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Letters used by the cached result, sorted, `Other` last.
    pub(crate) fn used_letters(&self) -> Vec<LetterFilter> {
        let Some(letters) = &self.letters else {
            return Vec::new();
        };
        let set: BTreeSet<LetterFilter> = letters.values().copied().collect();
        set.into_iter().collect()
    }
}
