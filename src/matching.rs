use crate::types::{ConcertEvent, Preferences};

/// Points for a favorite band appearing on the bill, per favorite
pub const BAND_MATCH_SCORE: u32 = 100;
/// Points for the show being at a favorite venue
pub const VENUE_MATCH_SCORE: u32 = 50;
/// Points for a keyword appearing inside any band name, per keyword
pub const KEYWORD_MATCH_SCORE: u32 = 25;

/// Relevance of one event against the preferences. Zero means "no match".
pub fn score(event: &ConcertEvent, prefs: &Preferences) -> u32 {
    let mut total = 0;

    for favorite in &prefs.favorite_bands {
        let favorite = favorite.to_lowercase();
        if event.bands.iter().any(|b| b.to_lowercase() == favorite) {
            total += BAND_MATCH_SCORE;
        }
    }

    if prefs
        .favorite_venues
        .iter()
        .any(|v| v.to_lowercase() == event.venue.to_lowercase())
    {
        total += VENUE_MATCH_SCORE;
    }

    for keyword in &prefs.keywords {
        let keyword = keyword.to_lowercase();
        if !keyword.is_empty() && event.bands.iter().any(|b| b.to_lowercase().contains(&keyword)) {
            total += KEYWORD_MATCH_SCORE;
        }
    }

    total
}

/// Filter and rank events against the preferences: cancelled shows and shows
/// outside the configured date bounds are dropped, survivors keep a positive
/// score, ordered best-first with earlier dates breaking ties.
///
/// A profile without any criteria passes every non-cancelled event through
/// unranked; that convention is what lets a fresh install notify about
/// everything instead of nothing.
pub fn find_matches(events: &[ConcertEvent], prefs: &Preferences) -> Vec<ConcertEvent> {
    if prefs.is_empty() {
        return events.iter().filter(|e| !e.cancelled).cloned().collect();
    }

    let mut scored: Vec<(u32, ConcertEvent)> = events
        .iter()
        .filter(|e| !e.cancelled)
        .filter(|e| within_bounds(e, prefs))
        .filter_map(|e| {
            let s = score(e, prefs);
            (s > 0).then(|| (s, e.clone()))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.date.cmp(&b.1.date)));
    scored.into_iter().map(|(_, e)| e).collect()
}

fn within_bounds(event: &ConcertEvent, prefs: &Preferences) -> bool {
    if let Some(start) = prefs.start_date {
        if event.date < start {
            return false;
        }
    }
    if let Some(end) = prefs.end_date {
        if event.date > end {
            return false;
        }
    }
    true
}
