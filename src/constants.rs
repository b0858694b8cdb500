/// Scraper key constants to ensure consistency across the codebase

// Scraper selector keys (used in config files and the registry)
pub const HEAVYMETAL_DK_KEY: &str = "heavymetal_dk";

// Origin prefixed onto relative detail links
pub const HEAVYMETAL_DK_ORIGIN: &str = "https://heavymetal.dk";

/// User agent sent with every calendar fetch
pub const USER_AGENT: &str = "koncert_scraper/0.1 (concert calendar watcher)";

/// Request timeout for calendar fetches, in seconds
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Marker the site puts in the date field of cancelled shows.
/// Matched case-insensitively anywhere in the field.
pub const CANCELLED_MARKER: &str = "aflyst";

/// Marker the site puts on shows it recently added to the calendar.
/// Independent of our own diff against stored events.
pub const NEWLY_ADDED_MARKER: &str = "nyt i kalenderen";

/// Get all supported scraper keys
pub fn supported_scrapers() -> Vec<&'static str> {
    vec![HEAVYMETAL_DK_KEY]
}
