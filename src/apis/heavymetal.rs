//! Scraper for the heavymetal.dk concert calendar: one page, grouped into
//! month sections (`<h2>` with a Danish month name and year), each followed
//! by a table of concert rows.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{
    CANCELLED_MARKER, HEAVYMETAL_DK_KEY, HEAVYMETAL_DK_ORIGIN, NEWLY_ADDED_MARKER,
};
use crate::fetch::PageFetcher;
use crate::types::{ConcertEvent, EventScraper, ScrapeOutcome};

/// Danish month names in calendar order, as printed in section headers
const MONTH_NAMES: [&str; 12] = [
    "januar",
    "februar",
    "marts",
    "april",
    "maj",
    "juni",
    "juli",
    "august",
    "september",
    "oktober",
    "november",
    "december",
];

/// Marker class on the calendar table belonging to a month section
const CALENDAR_TABLE_CLASS: &str = "koncert-kalender";

static MONTH_HEADER: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").unwrap());
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static DATE_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td.dato").unwrap());
static VENUE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("td.spillested a").unwrap());
static INFO_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("td.info a").unwrap());
static BAND_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td.bands").unwrap());
static FESTIVAL_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("strong a").unwrap());
static BAND_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a.band").unwrap());

pub struct HeavymetalDkScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl HeavymetalDkScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl EventScraper for HeavymetalDkScraper {
    fn key(&self) -> &'static str {
        HEAVYMETAL_DK_KEY
    }

    fn url_pattern(&self) -> &'static str {
        "heavymetal.dk"
    }

    async fn scrape(&self, url: &str, cancel: &CancellationToken) -> ScrapeOutcome {
        info!("Fetching concert calendar from {}", url);
        let body = match self.fetcher.fetch_text(url, cancel).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Fetch failed for {}: {}", url, e);
                return ScrapeOutcome::failed(e.to_string());
            }
        };

        let events = parse_calendar(&body, Utc::now());
        info!("Parsed {} events from {}", events.len(), url);
        ScrapeOutcome::ok(events)
    }
}

/// Extract every valid concert row from the calendar page. Malformed rows
/// are skipped one by one; a page without any recognizable month section
/// yields an empty list, never an error.
pub fn parse_calendar(html: &str, scraped_at: DateTime<Utc>) -> Vec<ConcertEvent> {
    let document = Html::parse_document(html);
    let mut events = Vec::new();
    let mut context: Option<(u32, i32)> = None;

    for header in document.select(&MONTH_HEADER) {
        let header_text = header.text().collect::<String>();
        let Some((month, header_year)) = parse_month_header(&header_text) else {
            debug!("Skipping unrecognized section header: {}", header_text.trim());
            continue;
        };

        // Year from the header when present; otherwise carried from the
        // previous section, rolling over when the month index wraps
        // (December -> January within one document).
        let year = match (header_year, context) {
            (Some(year), _) => year,
            (None, Some((prev_month, prev_year))) => {
                if month < prev_month {
                    prev_year + 1
                } else {
                    prev_year
                }
            }
            (None, None) => {
                debug!("Month section without year context: {}", header_text.trim());
                continue;
            }
        };
        context = Some((month, year));

        let Some(table) = calendar_table_for(&header) else {
            debug!("Month section {}/{} has no calendar table", month, year);
            continue;
        };

        for row in table.select(&ROW) {
            if let Some(event) = parse_row(&row, month, year, scraped_at) {
                events.push(event);
            }
        }
    }

    if events.is_empty() {
        warn!("No events extracted - the page structure may have changed");
    }
    events
}

/// The month section's table is the first `table.koncert-kalender` sibling
/// before the next header.
fn calendar_table_for<'a>(header: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    header
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .take_while(|el| el.value().name() != "h2")
        .find(|el| {
            el.value().name() == "table"
                && el
                    .value()
                    .attr("class")
                    .map(|classes| classes.split_whitespace().any(|c| c == CALENDAR_TABLE_CLASS))
                    .unwrap_or(false)
        })
}

/// `"August 2026"` -> `(8, Some(2026))`; month alone is accepted, anything
/// else is not a month header.
fn parse_month_header(text: &str) -> Option<(u32, Option<i32>)> {
    let text = text.trim().to_lowercase();
    let mut parts = text.split_whitespace();
    let month_name = parts.next()?;
    let month = MONTH_NAMES.iter().position(|m| *m == month_name)? as u32 + 1;
    let year = parts
        .next()
        .and_then(|p| p.parse::<i32>().ok())
        .filter(|y| (1000..10000).contains(y));
    Some((month, year))
}

fn parse_row(
    row: &ElementRef<'_>,
    month: u32,
    year: i32,
    scraped_at: DateTime<Utc>,
) -> Option<ConcertEvent> {
    let date_cell = row.select(&DATE_CELL).next()?;
    let display_text = date_cell.text().collect::<String>();
    let display = display_text.trim();

    // The structured attribute is authoritative; the display text only
    // supplies the day number when the attribute is missing.
    let date = date_cell
        .value()
        .attr("data-dato")
        .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
        .or_else(|| date_from_display(display, month, year))?;

    let weekday = display.split_whitespace().next().unwrap_or("").to_string();
    let lowered = display.to_lowercase();
    let cancelled = lowered.contains(CANCELLED_MARKER);
    let newly_added = lowered.contains(NEWLY_ADDED_MARKER);

    let venue_raw = row
        .select(&VENUE_LINK)
        .next()
        .map(|el| el.text().collect::<String>())?;
    // Drop the locality suffix: "Pumpehuset, København" -> "Pumpehuset"
    let venue = venue_raw
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    let href = row
        .select(&INFO_LINK)
        .next()
        .and_then(|el| el.value().attr("href"))?;
    let event_url = if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}{}", HEAVYMETAL_DK_ORIGIN, href)
    };

    let band_cell = row.select(&BAND_CELL).next()?;
    let mut bands = Vec::new();
    let mut festival = false;
    // A strongly emphasized leading link marks a festival bill; its text
    // leads the band list.
    if let Some(festival_link) = band_cell.select(&FESTIVAL_LINK).next() {
        let name = festival_link.text().collect::<String>().trim().to_string();
        if !name.is_empty() {
            festival = true;
            bands.push(name);
        }
    }
    for link in band_cell.select(&BAND_LINK) {
        let name = link.text().collect::<String>().trim().to_string();
        if !name.is_empty() {
            bands.push(name);
        }
    }

    let event = ConcertEvent {
        // Content identity is assigned by the pipeline after extraction
        id: String::new(),
        date,
        weekday,
        bands,
        venue,
        event_url,
        cancelled,
        newly_added,
        festival,
        scraped_at,
    };

    if !event.is_valid() {
        debug!("Dropping incomplete row dated {}", event.date);
        return None;
    }

    if let Some(slug) = event.event_url.rsplit('/').find(|s| !s.is_empty()) {
        debug!("Parsed event {} on {}", slug, event.date);
    }
    Some(event)
}

/// `"lør 15/8"` plus section context -> date. Day is the number before the
/// first slash in the second token.
fn date_from_display(display: &str, month: u32, year: i32) -> Option<NaiveDate> {
    let token = display.split_whitespace().nth(1)?;
    let day: u32 = token.split('/').next()?.trim_matches('.').parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
