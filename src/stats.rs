//! Aggregation engine.
//!
//! Turns the raw event log into daily-bucketed funnel metrics and conversion
//! rates for a trailing N-day window. Pure read + compute: fetch the window
//! from the store, then bucket and derive everything in-process. `now` is
//! injected so the windowing logic stays deterministic under test.

use crate::models::{
    DailyBucket, EventRow, FunnelStage, Rates, RegistrationRow, StatsResult, Totals,
};
use crate::store::EventStore;
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use std::collections::HashMap;

pub const MIN_WINDOW_DAYS: i64 = 1;
pub const MAX_WINDOW_DAYS: i64 = 365;
pub const DEFAULT_WINDOW_DAYS: i64 = 28;

#[derive(Debug, Default, Clone, Copy)]
struct DayCounts {
    starts: u64,
    wins: u64,
    views: u64,
    regs: u64,
}

/// UTC calendar date of an RFC3339 timestamp. Unparseable timestamps yield
/// `None` and the row is skipped; bucketing them anywhere else would break
/// the totals == sum(series) invariant.
fn day_key(ts: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

/// Exact-match dimension filter. A row with a null or empty value never
/// matches an active filter.
fn matches(value: Option<&str>, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => value == Some(f),
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Bucket pre-fetched window rows by UTC day and derive totals, rates and
/// the funnel. `window_days` must already be clamped to [1, 365].
///
/// The series covers exactly `window_days` consecutive days ending on the
/// UTC date of `now`, oldest first, zero-filled where no rows fell. Totals
/// are summed from the series, so rows on the partial day preceding the
/// first series date (or on a bogus future date) never leak into totals.
pub fn aggregate(
    events: &[EventRow],
    registrations: &[RegistrationRow],
    window_days: i64,
    campaign_filter: Option<&str>,
    game_filter: Option<&str>,
    now: DateTime<Utc>,
) -> StatsResult {
    let mut by_day: HashMap<NaiveDate, DayCounts> = HashMap::new();

    for e in events {
        if !matches(e.campaign_id.as_deref(), campaign_filter)
            || !matches(e.game_id.as_deref(), game_filter)
        {
            continue;
        }
        let Some(day) = day_key(&e.client_ts) else {
            continue;
        };
        let counts = by_day.entry(day).or_default();
        match e.event_name.as_str() {
            "game_start" => counts.starts += 1,
            "win" => counts.wins += 1,
            "banner_view" | "page_view" => counts.views += 1,
            _ => {}
        }
    }

    for r in registrations {
        if !matches(r.campaign_id.as_deref(), campaign_filter)
            || !matches(r.game_id.as_deref(), game_filter)
        {
            continue;
        }
        let Some(day) = day_key(&r.created_at) else {
            continue;
        };
        by_day.entry(day).or_default().regs += 1;
    }

    let today = now.date_naive();
    let mut series = Vec::with_capacity(window_days as usize);
    let mut totals = Totals::default();

    for offset in (0..window_days).rev() {
        let date = today - Duration::days(offset);
        let counts = by_day.get(&date).copied().unwrap_or_default();
        totals.starts += counts.starts;
        totals.wins += counts.wins;
        totals.views += counts.views;
        totals.regs += counts.regs;
        series.push(DailyBucket {
            date: date.format("%Y-%m-%d").to_string(),
            starts: counts.starts,
            wins: counts.wins,
            views: counts.views,
            regs: counts.regs,
        });
    }

    let rates = Rates {
        win_rate: ratio(totals.wins, totals.starts),
        reg_rate_from_starts: ratio(totals.regs, totals.starts),
        reg_rate_from_wins: ratio(totals.regs, totals.wins),
    };

    let funnel = vec![
        FunnelStage {
            label: "Views",
            value: totals.views,
        },
        FunnelStage {
            label: "Starts",
            value: totals.starts,
        },
        FunnelStage {
            label: "Wins",
            value: totals.wins,
        },
        FunnelStage {
            label: "Registrations",
            value: totals.regs,
        },
    ];

    StatsResult {
        totals,
        rates,
        series,
        funnel,
    }
}

/// Fetch the trailing window from the store and aggregate it.
///
/// `window_days` is clamped into [1, 365] here rather than trusting the
/// caller to pre-validate.
pub fn compute_stats(
    store: &EventStore,
    window_days: i64,
    campaign_filter: Option<&str>,
    game_filter: Option<&str>,
    now: DateTime<Utc>,
) -> Result<StatsResult> {
    let window_days = window_days.clamp(MIN_WINDOW_DAYS, MAX_WINDOW_DAYS);
    let since = (now - Duration::days(window_days)).to_rfc3339_opts(SecondsFormat::Millis, true);

    let events = store.events_since(&since)?;
    let registrations = store.registrations_since(&since)?;

    Ok(aggregate(
        &events,
        &registrations,
        window_days,
        campaign_filter,
        game_filter,
        now,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn event(name: &str, client_ts: &str) -> EventRow {
        EventRow {
            event_name: name.to_string(),
            client_ts: client_ts.to_string(),
            campaign_id: None,
            game_id: None,
        }
    }

    fn event_tagged(name: &str, client_ts: &str, campaign: &str, game: &str) -> EventRow {
        EventRow {
            event_name: name.to_string(),
            client_ts: client_ts.to_string(),
            campaign_id: Some(campaign.to_string()),
            game_id: Some(game.to_string()),
        }
    }

    fn reg(created_at: &str) -> RegistrationRow {
        RegistrationRow {
            created_at: created_at.to_string(),
            campaign_id: None,
            game_id: None,
        }
    }

    #[test]
    fn test_series_covers_window_exactly() {
        for days in [1i64, 2, 7, 28, 365] {
            let result = aggregate(&[], &[], days, None, None, fixed_now());
            assert_eq!(result.series.len(), days as usize);
            assert_eq!(result.series.last().unwrap().date, "2024-01-10");

            // Consecutive ascending dates, no gaps.
            let dates: Vec<NaiveDate> = result
                .series
                .iter()
                .map(|b| b.date.parse::<NaiveDate>().unwrap())
                .collect();
            for pair in dates.windows(2) {
                assert_eq!(pair[1] - pair[0], Duration::days(1));
            }
        }
    }

    #[test]
    fn test_totals_equal_series_sums() {
        let events = vec![
            event("game_start", "2024-01-08T03:00:00Z"),
            event("game_start", "2024-01-09T15:30:00Z"),
            event("win", "2024-01-09T15:31:00Z"),
            event("banner_view", "2024-01-10T01:00:00Z"),
            event("page_view", "2024-01-10T02:00:00Z"),
            // Unknown event names count toward nothing.
            event("heartbeat", "2024-01-10T03:00:00Z"),
        ];
        let registrations = vec![reg("2024-01-09T16:00:00Z"), reg("2024-01-10T09:00:00Z")];

        let result = aggregate(&events, &registrations, 7, None, None, fixed_now());

        assert_eq!(result.totals.starts, 2);
        assert_eq!(result.totals.wins, 1);
        assert_eq!(result.totals.views, 2);
        assert_eq!(result.totals.regs, 2);

        let sum = |f: fn(&DailyBucket) -> u64| result.series.iter().map(f).sum::<u64>();
        assert_eq!(result.totals.starts, sum(|b| b.starts));
        assert_eq!(result.totals.wins, sum(|b| b.wins));
        assert_eq!(result.totals.views, sum(|b| b.views));
        assert_eq!(result.totals.regs, sum(|b| b.regs));
    }

    #[test]
    fn test_rows_outside_series_window_excluded_from_totals() {
        // Within the fetch window (now - 2 days) but on the calendar day
        // before the first series date, so it must not count.
        let events = vec![
            event("game_start", "2024-01-08T13:00:00Z"),
            event("game_start", "2024-01-09T13:00:00Z"),
        ];
        let result = aggregate(&events, &[], 2, None, None, fixed_now());

        assert_eq!(result.series[0].date, "2024-01-09");
        assert_eq!(result.totals.starts, 1);
    }

    #[test]
    fn test_zero_denominator_rates_are_zero() {
        let events = vec![
            event("win", "2024-01-10T00:00:00Z"),
            event("win", "2024-01-10T01:00:00Z"),
        ];
        let result = aggregate(&events, &[], 7, None, None, fixed_now());

        assert_eq!(result.totals.starts, 0);
        assert_eq!(result.totals.wins, 2);
        assert_eq!(result.rates.win_rate, 0.0);
        assert_eq!(result.rates.reg_rate_from_starts, 0.0);
    }

    #[test]
    fn test_nonmatching_filter_yields_zeroed_result() {
        let events = vec![event_tagged(
            "game_start",
            "2024-01-10T00:00:00Z",
            "summer",
            "wheel",
        )];
        let result = aggregate(&events, &[], 7, Some("no-such-campaign"), None, fixed_now());

        assert_eq!(result.totals, Totals::default());
        assert_eq!(result.series.len(), 7);
        assert!(result
            .series
            .iter()
            .all(|b| b.starts == 0 && b.wins == 0 && b.views == 0 && b.regs == 0));
    }

    #[test]
    fn test_null_dimension_never_matches_active_filter() {
        let events = vec![
            event("game_start", "2024-01-10T00:00:00Z"),
            event_tagged("game_start", "2024-01-10T00:00:00Z", "summer", "wheel"),
        ];
        let result = aggregate(&events, &[], 7, Some("summer"), None, fixed_now());
        assert_eq!(result.totals.starts, 1);
    }

    #[test]
    fn test_filters_and_combined() {
        let events = vec![
            event_tagged("game_start", "2024-01-10T00:00:00Z", "summer", "wheel"),
            event_tagged("game_start", "2024-01-10T00:00:00Z", "summer", "quiz"),
            event_tagged("game_start", "2024-01-10T00:00:00Z", "autumn", "wheel"),
        ];
        let result = aggregate(
            &events,
            &[],
            7,
            Some("summer"),
            Some("wheel"),
            fixed_now(),
        );
        assert_eq!(result.totals.starts, 1);
    }

    #[test]
    fn test_single_day_funnel_and_rates() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let events = vec![
            event("game_start", "2024-01-01T00:00:00Z"),
            event("win", "2024-01-01T00:00:00Z"),
        ];
        let registrations = vec![reg("2024-01-01T12:00:00Z")];

        let result = aggregate(&events, &registrations, 1, None, None, now);

        assert_eq!(result.totals.starts, 1);
        assert_eq!(result.totals.wins, 1);
        assert_eq!(result.totals.views, 0);
        assert_eq!(result.totals.regs, 1);
        assert_eq!(result.rates.win_rate, 1.0);
        assert_eq!(result.rates.reg_rate_from_starts, 1.0);
        assert_eq!(result.rates.reg_rate_from_wins, 1.0);

        let labels: Vec<&str> = result.funnel.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["Views", "Starts", "Wins", "Registrations"]);
        let values: Vec<u64> = result.funnel.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![0, 1, 1, 1]);
    }

    #[test]
    fn test_compute_stats_against_store() {
        use crate::models::{NewEvent, NewRegistration};
        use tempfile::NamedTempFile;

        let temp_file = NamedTempFile::new().unwrap();
        let store = EventStore::new(temp_file.path().to_str().unwrap()).unwrap();

        let mk = |name: &str, ts: &str, campaign: Option<&str>| NewEvent {
            client_ts: Some(ts.to_string()),
            campaign_id: campaign.map(str::to_string),
            game_id: None,
            session_id: None,
            anonymous_user_id: None,
            event_name: name.to_string(),
            props: "{}".to_string(),
        };
        store
            .insert_events(
                "2024-01-10T11:00:00Z",
                &[
                    mk("game_start", "2024-01-10T01:00:00Z", Some("summer")),
                    mk("win", "2024-01-10T02:00:00Z", Some("summer")),
                    // Outside any reasonable window.
                    mk("game_start", "2020-01-01T00:00:00Z", Some("summer")),
                ],
            )
            .unwrap();
        store
            .insert_registration(
                "2024-01-10T03:00:00Z",
                &NewRegistration {
                    session_id: None,
                    campaign_id: Some("summer".to_string()),
                    game_id: None,
                    name: "Alice".to_string(),
                    email: "a@x.com".to_string(),
                    phone: "555".to_string(),
                    score: None,
                    duration_ms: None,
                },
            )
            .unwrap();

        let result = compute_stats(&store, 7, None, None, fixed_now()).unwrap();
        assert_eq!(result.totals.starts, 1);
        assert_eq!(result.totals.wins, 1);
        assert_eq!(result.totals.regs, 1);
        assert_eq!(result.rates.win_rate, 1.0);

        // A filter that matches nothing is a zeroed result, not an error.
        let empty = compute_stats(&store, 7, Some("winter"), None, fixed_now()).unwrap();
        assert_eq!(empty.totals, Totals::default());
        assert_eq!(empty.series.len(), 7);

        // Out-of-range day counts clamp instead of failing.
        let clamped = compute_stats(&store, 9999, None, None, fixed_now()).unwrap();
        assert_eq!(clamped.series.len(), MAX_WINDOW_DAYS as usize);
        let clamped_low = compute_stats(&store, 0, None, None, fixed_now()).unwrap();
        assert_eq!(clamped_low.series.len(), 1);
    }

    #[test]
    fn test_unparseable_client_ts_skipped() {
        let events = vec![
            event("game_start", "not-a-timestamp"),
            event("game_start", "2024-01-10T00:00:00Z"),
        ];
        let result = aggregate(&events, &[], 7, None, None, fixed_now());
        assert_eq!(result.totals.starts, 1);
    }
}
