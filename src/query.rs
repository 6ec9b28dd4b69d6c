//! Registration lookup for the admin dashboard.
//!
//! Base set is the most recent 1000 registrations; dimension and text
//! filters are applied in-process on top of that, matching what the
//! dashboard needs without extra pagination.

use crate::error::ApiError;
use crate::models::Registration;
use crate::store::EventStore;

pub const REGISTRATION_FETCH_LIMIT: usize = 1000;

/// Fetch the most recent registrations and apply exact-match campaign/game
/// filters plus a case-insensitive substring search over name, email and
/// phone. All filters AND-combine.
pub fn query_registrations(
    store: &EventStore,
    text_filter: Option<&str>,
    campaign_filter: Option<&str>,
    game_filter: Option<&str>,
) -> Result<Vec<Registration>, ApiError> {
    let rows = store.recent_registrations(REGISTRATION_FETCH_LIMIT)?;
    Ok(filter_registrations(
        rows,
        text_filter,
        campaign_filter,
        game_filter,
    ))
}

fn filter_registrations(
    mut rows: Vec<Registration>,
    text_filter: Option<&str>,
    campaign_filter: Option<&str>,
    game_filter: Option<&str>,
) -> Vec<Registration> {
    if let Some(campaign) = campaign_filter {
        rows.retain(|r| r.campaign_id.as_deref() == Some(campaign));
    }
    if let Some(game) = game_filter {
        rows.retain(|r| r.game_id.as_deref() == Some(game));
    }
    if let Some(q) = text_filter {
        let needle = q.to_lowercase();
        rows.retain(|r| {
            r.name.to_lowercase().contains(&needle)
                || r.email.to_lowercase().contains(&needle)
                || r.phone.to_lowercase().contains(&needle)
        });
    }
    rows
}
