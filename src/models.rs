use serde::Serialize;
use std::path::PathBuf;

/// A validated event ready to be written to the store.
///
/// Optional fields arrive as empty strings or missing keys from banner
/// clients; both are normalized to `None` before they reach here.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub client_ts: Option<String>,
    pub campaign_id: Option<String>,
    pub game_id: Option<String>,
    pub session_id: Option<String>,
    pub anonymous_user_id: Option<String>,
    pub event_name: String,
    /// JSON-serialized props blob, `{}` when the client sent none.
    pub props: String,
}

/// A validated registration ready to be written to the store.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub session_id: Option<String>,
    pub campaign_id: Option<String>,
    pub game_id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub score: Option<i64>,
    pub duration_ms: Option<i64>,
}

/// A stored registration as returned by the admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub id: i64,
    pub created_at: String,
    pub session_id: Option<String>,
    pub campaign_id: Option<String>,
    pub game_id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub score: Option<i64>,
    pub duration_ms: Option<i64>,
}

/// The slice of an event row the aggregation engine needs.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub event_name: String,
    pub client_ts: String,
    pub campaign_id: Option<String>,
    pub game_id: Option<String>,
}

/// The slice of a registration row the aggregation engine needs.
#[derive(Debug, Clone)]
pub struct RegistrationRow {
    pub created_at: String,
    pub campaign_id: Option<String>,
    pub game_id: Option<String>,
}

/// Aggregated counts for one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyBucket {
    pub date: String,
    pub starts: u64,
    pub wins: u64,
    pub views: u64,
    pub regs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub views: u64,
    pub starts: u64,
    pub wins: u64,
    pub regs: u64,
}

/// Conversion rates derived from totals. Zero denominators yield 0, never NaN.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rates {
    pub win_rate: f64,
    pub reg_rate_from_starts: f64,
    pub reg_rate_from_wins: f64,
}

/// One stage of the conversion funnel. Order is significant:
/// Views -> Starts -> Wins -> Registrations.
#[derive(Debug, Clone, Serialize)]
pub struct FunnelStage {
    pub label: &'static str,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResult {
    pub totals: Totals,
    pub rates: Rates,
    pub series: Vec<DailyBucket>,
    pub funnel: Vec<FunnelStage>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    /// CORS allowlist; a single "*" entry means allow any origin.
    pub allowed_origins: Vec<String>,
    /// Directory with the admin dashboard assets, if it exists.
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let db_path = std::env::var("DB_PATH").unwrap_or_default();

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let static_dir = std::env::var("STATIC_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .filter(|p| p.is_dir());

        Self {
            port,
            db_path,
            allowed_origins,
            static_dir,
        }
    }
}
