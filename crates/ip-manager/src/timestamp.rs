//! Transaction timestamps.
//!
//! Every allocation stamps the object with the instant it happened so the
//! garbage collector can release allocations whose object never got
//! created. The time source is injected so that collector can be tested
//! without waiting.

use chrono::{DateTime, SecondsFormat, Utc};

/// Time source used for transaction timestamps.
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Formats an instant as RFC3339 with nanosecond precision.
pub fn format_transaction_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses a transaction timestamp written by [`format_transaction_timestamp`].
///
/// Any RFC3339 offset is accepted and normalized to UTC.
pub fn parse_transaction_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|instant| instant.with_timezone(&Utc))
}
