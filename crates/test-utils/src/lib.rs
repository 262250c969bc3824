//! Sporeprint test utilities.
//!
//! Builder-style table rows for the in-memory executor, a small canned
//! biodiversity dataset, and assertion helpers for integration tests.

use chrono::NaiveDate;
use sporeprint_query::executor::{MemoryExecutor, Row};
use sporeprint_query::kinds::rank_ordinal;
use sporeprint_query::scope::Literal;

/// One row destined for `table`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub table: &'static str,
    pub row: Row,
}

impl Fixture {
    /// A row with only its `id` set.
    pub fn new(table: &'static str, id: i64) -> Self {
        let mut row = Row::new();
        row.insert("id".to_string(), Literal::Int(id));
        Self { table, row }
    }

    pub fn id(&self) -> i64 {
        match self.row.get("id") {
            Some(Literal::Int(id)) => *id,
            _ => 0,
        }
    }

    /// Set any column.
    pub fn with(mut self, column: &str, value: impl Into<Literal>) -> Self {
        self.row.insert(column.to_string(), value.into());
        self
    }

    /// Set the owner.
    pub fn by(self, user_id: i64) -> Self {
        self.with("user_id", user_id)
    }

    /// Set the consensus name of an observation.
    pub fn named(self, name_id: i64) -> Self {
        self.with("name_id", name_id)
    }

    /// Set the location of an observation.
    pub fn at(self, location_id: i64) -> Self {
        self.with("location_id", location_id)
    }

    /// Set the free-text place name of an observation.
    pub fn place(self, place: &str) -> Self {
        self.with("where", place)
    }

    /// Set the `when` date. Invalid dates leave it unset.
    pub fn on(self, year: i32, month: u32, day: u32) -> Self {
        match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => self.with("when", date),
            None => self,
        }
    }

    /// Set `updated_at` to midnight on the given day.
    pub fn updated(self, year: i32, month: u32, day: u32) -> Self {
        match NaiveDate::from_ymd_opt(year, month, day).and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(at) => self.with("updated_at", at),
            None => self,
        }
    }

    pub fn thumb(self, image_id: i64) -> Self {
        self.with("thumb_image_id", image_id)
    }

    pub fn specimen(self) -> Self {
        self.with("specimen", true)
    }

    pub fn notes(self, notes: &str) -> Self {
        self.with("notes", notes)
    }

    pub fn confidence(self, vote_cache: f64) -> Self {
        self.with("vote_cache", vote_cache)
    }

    /// Point coordinates of an observation, publicly visible.
    pub fn gps(self, lat: f64, long: f64) -> Self {
        self.with("lat", lat).with("long", long).with("gps_hidden", false)
    }

    /// Taxonomic rank by name, e.g. `"Species"`. Unknown ranks are ignored.
    pub fn rank(self, rank: &str) -> Self {
        match rank_ordinal(rank) {
            Some(ordinal) => self.with("rank", ordinal),
            None => self,
        }
    }

    /// Lifeform tags, space-delimited on both ends, e.g. `" lichen "`.
    pub fn lifeform(self, lifeform: &str) -> Self {
        self.with("lifeform", lifeform)
    }

    /// Mark a name as a deprecated misspelling of `correct_id`.
    pub fn misspelling_of(self, correct_id: i64) -> Self {
        self.with("correct_spelling_id", correct_id).with("deprecated", true)
    }

    /// Point a feed entry at a row of another table via `<column>`.
    pub fn about(self, column: &str, id: i64) -> Self {
        self.with(column, id)
    }
}

pub fn user(id: i64, login: &str, name: &str) -> Fixture {
    Fixture::new("users", id).with("login", login).with("name", name)
}

/// A name whose text, search and sort names are all `text_name`.
pub fn name(id: i64, text_name: &str) -> Fixture {
    Fixture::new("names", id)
        .with("text_name", text_name)
        .with("search_name", text_name)
        .with("sort_name", text_name)
        .with("deprecated", false)
        .by(1)
}

/// A location with its bounding box.
pub fn location(id: i64, name: &str, north: f64, south: f64, east: f64, west: f64) -> Fixture {
    Fixture::new("locations", id)
        .with("name", name)
        .with("north", north)
        .with("south", south)
        .with("east", east)
        .with("west", west)
        .by(1)
}

pub fn observation(id: i64) -> Fixture {
    Fixture::new("observations", id)
        .with("specimen", false)
        .with("is_collection_location", true)
        .by(1)
}

pub fn image(id: i64, content_type: &str) -> Fixture {
    Fixture::new("images", id).with("content_type", content_type).by(1)
}

pub fn observation_image(id: i64, observation_id: i64, image_id: i64) -> Fixture {
    Fixture::new("observation_images", id)
        .with("observation_id", observation_id)
        .with("image_id", image_id)
}

pub fn comment(id: i64, target_type: &str, target_id: i64, summary: &str, body: &str) -> Fixture {
    Fixture::new("comments", id)
        .with("target_type", target_type)
        .with("target_id", target_id)
        .with("summary", summary)
        .with("comment", body)
        .by(1)
}

pub fn sequence(id: i64, observation_id: i64) -> Fixture {
    Fixture::new("sequences", id).with("observation_id", observation_id)
}

pub fn rss_log(id: i64) -> Fixture {
    Fixture::new("rss_logs", id)
}

/// Insert fixtures into an executor.
pub fn load(executor: &MemoryExecutor, fixtures: impl IntoIterator<Item = Fixture>) {
    for fixture in fixtures {
        executor.insert(fixture.table, fixture.row);
    }
}

/// The rows behind [`standard_dataset`].
///
/// - Observations, newest first: 6, 4, 2, 1, 3, 5.
/// - With a thumbnail: 1, 3, 4. Lichens: observations 2 and 5.
/// - Location 23 starts with a non-ASCII letter.
/// - Name 15 is a misspelling of name 14.
pub fn standard_fixtures() -> Vec<Fixture> {
    vec![
        user(1, "rolf", "Rolf Singer"),
        user(2, "mary", ""),
        user(3, "katrina", "Katrina"),
        name(10, "Amanita muscaria").rank("Species").lifeform(" ").about("rss_log_id", 508),
        name(11, "Amanita").rank("Genus").lifeform(" "),
        name(12, "Xanthoria parietina").rank("Species").lifeform(" lichen ").about("rss_log_id", 502),
        name(13, "Boletus edulis").rank("Species").about("rss_log_id", 503),
        name(14, "Agaricus campestris").rank("Species").lifeform(" "),
        name(15, "Agaricus campestras").rank("Species").misspelling_of(14),
        name(16, "Cladonia").rank("Genus").lifeform(" lichen ").about("rss_log_id", 506),
        location(20, "Point Reyes, Marin Co., California, USA", 38.2, 37.9, -122.8, -123.1)
            .about("rss_log_id", 507),
        location(21, "Albion, Mendocino Co., California, USA", 39.3, 39.2, -123.7, -123.8),
        location(22, "Burlington, Vermont, USA", 44.5, 44.4, -73.1, -73.3).about("rss_log_id", 504),
        location(23, "Élancourt, Yvelines, France", 48.8, 48.7, 2.0, 1.9),
        observation(1)
            .named(10)
            .at(20)
            .place("Point Reyes, Marin Co., California, USA")
            .on(2023, 9, 12)
            .thumb(100)
            .specimen()
            .notes("under oaks")
            .confidence(2.5)
            .gps(38.0, -123.0)
            .about("rss_log_id", 500),
        observation(2)
            .named(12)
            .at(21)
            .place("Albion, Mendocino Co., California, USA")
            .on(2023, 10, 1)
            .notes("on bark")
            .confidence(1.0)
            .by(2)
            .about("rss_log_id", 501),
        observation(3)
            .named(13)
            .at(22)
            .place("Burlington, Vermont, USA")
            .on(2022, 8, 20)
            .thumb(101)
            .notes("")
            .confidence(3.0)
            .by(3),
        observation(4)
            .named(14)
            .at(20)
            .place("Point Reyes, Marin Co., California, USA")
            .on(2024, 1, 5)
            .thumb(102)
            .specimen()
            .notes("smells of almonds")
            .confidence(0.5),
        observation(5)
            .named(16)
            .at(23)
            .place("Élancourt, Yvelines, France")
            .on(2021, 6, 30)
            .by(2)
            .about("rss_log_id", 505),
        observation(6)
            .named(10)
            .at(21)
            .place("Albion, Mendocino Co., California, USA")
            .on(2024, 3, 15)
            .specimen()
            .notes("many fruiting bodies")
            .confidence(2.0)
            .by(3),
        image(100, "image/jpeg").on(2023, 9, 12).confidence(3.0),
        image(101, "image/png").on(2022, 8, 20).by(3).confidence(2.0),
        image(102, "image/jpeg").on(2024, 1, 5).confidence(1.0),
        image(103, "image/gif").on(2020, 5, 1).by(2),
        observation_image(200, 1, 100),
        observation_image(201, 3, 101),
        observation_image(202, 4, 102),
        observation_image(203, 6, 102),
        comment(300, "Observation", 1, "Nice find", "Classic fly agaric"),
        comment(301, "Observation", 3, "Check the pores", "Could be a spring king"),
        comment(302, "Name", 10, "Toxic", "Do not eat"),
        sequence(400, 1),
        sequence(401, 1),
        sequence(402, 4),
        rss_log(500).about("observation_id", 1).updated(2023, 9, 13),
        rss_log(501).about("observation_id", 2).updated(2023, 10, 2),
        rss_log(502).about("name_id", 12).updated(2023, 10, 3),
        rss_log(503).about("name_id", 13).updated(2022, 1, 1),
        rss_log(504).about("location_id", 22).updated(2023, 5, 5),
        rss_log(505).about("observation_id", 5).updated(2021, 7, 1),
        rss_log(506).about("name_id", 16).updated(2024, 2, 2),
        rss_log(507).about("location_id", 20).updated(2024, 4, 4),
        rss_log(508).about("name_id", 10).updated(2024, 5, 5),
    ]
}

/// An in-memory executor loaded with [`standard_fixtures`].
pub fn standard_dataset() -> MemoryExecutor {
    let executor = MemoryExecutor::new();
    load(&executor, standard_fixtures());
    executor
}

/// Assertion helpers.
pub mod assert {
    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string to NOT contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that two id lists hold the same ids, ignoring order.
    pub fn same_ids(actual: &[i64], expected: &[i64]) {
        let mut a = actual.to_vec();
        let mut e = expected.to_vec();
        a.sort_unstable();
        e.sort_unstable();
        assert_eq!(a, e, "id sets differ (order ignored)");
    }
}
