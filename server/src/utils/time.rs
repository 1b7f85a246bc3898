//! Time helpers for dated index names

use chrono::{DateTime, NaiveDate, Utc};

const INDEX_DATE_FORMAT: &str = "%Y%m%d";

/// `{base}_{YYYYMMDD}` for the UTC date of `at`
pub fn dated_index(base: &str, at: &DateTime<Utc>) -> String {
    format!("{}_{}", base, at.format(INDEX_DATE_FORMAT))
}

/// Parse the `YYYYMMDD` part of an index name
pub fn parse_index_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, INDEX_DATE_FORMAT).ok()
}
