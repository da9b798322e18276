//! Export fixtures: gzip-compressed CSV bodies shaped like a real players export

use chrono::{DateTime, TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

/// Header of a players export (subset of the real columns, same order)
pub const EXPORT_HEADER: &str =
    "id,identifier,session_count,language,timezone,game_version,device_os,device_type,device_model,ad_id,tags,last_active,playtime,amount_spent,created_at,invalid_identifier,badge_count";

/// Fixed "now" used by every scenario
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// A `last_active` well within the default six-month threshold
pub const RECENTLY_ACTIVE: &str = "2024-05-30 08:48:42";

/// A `last_active` far beyond the default six-month threshold
pub const LONG_INACTIVE: &str = "2018-10-26 08:48:42";

/// One export row with the given id and `last_active`
pub fn export_row(id: &str, last_active: &str) -> String {
    format!(
        "{id},ce777617da7f548fe7a9ab6febb56cf39fba6d38203,1,en,-28800,1.0,7.0.4,0,iPhone,,\"{{}}\",{last_active},0,0.0,2018-10-26 08:48:42,f,0"
    )
}

/// Gzip-compressed export with one row per `(id, last_active)` pair
pub fn export_body(rows: &[(&str, &str)]) -> Vec<u8> {
    let mut text = String::from(EXPORT_HEADER);
    text.push('\n');
    for (id, last_active) in rows {
        text.push_str(&export_row(id, last_active));
        text.push('\n');
    }
    gzip(text.as_bytes())
}

/// Gzip-compress arbitrary bytes
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
