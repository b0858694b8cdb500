use sha2::{Digest, Sha256};

use crate::types::ConcertEvent;

/// Hex characters kept from the digest
const IDENTITY_LEN: usize = 16;

/// Content-derived identity for an event: the same venue, date and band set
/// always hash to the same id, no matter which source reported the event, in
/// which order its bands were listed, or what its detail URL happens to be.
pub fn event_identity(event: &ConcertEvent) -> String {
    let mut bands = event.bands.clone();
    bands.sort();

    let canonical = format!(
        "{}|{}|{}",
        event.venue,
        event.date.format("%Y-%m-%d"),
        bands.join("|")
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..IDENTITY_LEN].to_string()
}

/// Assign identities across a freshly scraped batch, replacing whatever the
/// scraper left in the id field.
pub fn assign_identities(events: &mut [ConcertEvent]) {
    for event in events.iter_mut() {
        event.id = event_identity(event);
    }
}
