//! Per-instrument minimum interval between notifications.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Remembers when each instrument last produced a dispatched alert.
///
/// In-memory only; losing it on restart at worst repeats one alert.
#[derive(Debug, Clone)]
pub struct SignalThrottle {
    min_interval: Duration,
    last_sent: HashMap<String, DateTime<Utc>>,
}

impl SignalThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: HashMap::new(),
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::seconds(secs as i64))
    }

    /// Whether an alert for `instrument_id` may go out at `now`.
    pub fn allows(&self, instrument_id: &str, now: DateTime<Utc>) -> bool {
        match self.last_sent.get(instrument_id) {
            Some(last) => now - *last >= self.min_interval,
            None => true,
        }
    }

    pub fn record(&mut self, instrument_id: &str, now: DateTime<Utc>) {
        self.last_sent.insert(instrument_id.to_string(), now);
    }

    pub fn remaining(&self, instrument_id: &str, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_sent.get(instrument_id)?;
        let left = self.min_interval - (now - *last);
        (left > Duration::zero()).then_some(left)
    }
}
