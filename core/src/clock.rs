use time::OffsetDateTime;
use tokio::time::Instant;

/// One reading of both clocks: wall time for message timestamps, monotonic
/// time for deadlines and cache freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Now {
    pub wall_ms: i64,
    pub instant: Instant,
}

impl Now {
    pub fn system() -> Self {
        Self {
            wall_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            instant: Instant::now(),
        }
    }

    pub fn at(wall_ms: i64, instant: Instant) -> Self {
        Self { wall_ms, instant }
    }
}
