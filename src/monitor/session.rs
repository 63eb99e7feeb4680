//! Exchange trading sessions.

use crate::config::{MonitorConfig, TradingWindow};
use crate::error::ConfigError;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// Trading-hour windows in the exchange's local time.
///
/// A window whose end is earlier than its start runs past midnight
/// (e.g. 21:00-01:00). Its after-midnight part belongs to the session that
/// started the evening before, which is the day the weekend rule looks at.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    tz: Tz,
    windows: Vec<TradingWindow>,
    skip_weekends: bool,
}

impl TradingCalendar {
    pub fn new(tz: Tz, windows: Vec<TradingWindow>, skip_weekends: bool) -> Self {
        Self {
            tz,
            windows,
            skip_weekends,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self, ConfigError> {
        let tz = config
            .timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::invalid("monitor.timezone", e.to_string()))?;
        Ok(Self::new(tz, config.trading_hours.clone(), config.skip_weekends))
    }

    /// Calendar that is always open. Empty windows mean no hour restriction;
    /// the weekend rule still applies to the local date.
    pub fn always_open() -> Self {
        Self::new(Tz::UTC, Vec::new(), false)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz).naive_local();
        if self.windows.is_empty() {
            return !(self.skip_weekends && is_weekend(local.weekday()));
        }
        self.windows
            .iter()
            .filter_map(|w| session_day(w, local))
            .any(|day| !(self.skip_weekends && is_weekend(day)))
    }
}

/// The weekday the session containing `local` started on, if any.
fn session_day(window: &TradingWindow, local: NaiveDateTime) -> Option<Weekday> {
    let t: NaiveTime = local.time();
    let today = local.date();

    if window.start <= window.end {
        (window.start <= t && t <= window.end).then(|| today.weekday())
    } else if t >= window.start {
        Some(today.weekday())
    } else if t <= window.end {
        Some((today - Duration::days(1)).weekday())
    } else {
        None
    }
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calendar() -> TradingCalendar {
        TradingCalendar::from_config(&MonitorConfig::default()).unwrap()
    }

    /// Beijing wall-clock time to UTC.
    fn bj(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        chrono_tz::Asia::Shanghai
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_day_session() {
        // 2026-10-16 is a Friday
        let cal = calendar();
        assert!(cal.is_open(bj(2026, 10, 16, 9, 0)));
        assert!(cal.is_open(bj(2026, 10, 16, 14, 59)));
        assert!(cal.is_open(bj(2026, 10, 16, 15, 0)));
        assert!(!cal.is_open(bj(2026, 10, 16, 8, 59)));
        assert!(!cal.is_open(bj(2026, 10, 16, 17, 30)));
    }

    #[test]
    fn test_night_session_wraps_midnight() {
        let cal = calendar();
        assert!(cal.is_open(bj(2026, 10, 14, 21, 0)));
        assert!(cal.is_open(bj(2026, 10, 14, 23, 59)));
        assert!(cal.is_open(bj(2026, 10, 15, 0, 45)));
        assert!(!cal.is_open(bj(2026, 10, 15, 1, 1)));
        assert!(!cal.is_open(bj(2026, 10, 15, 3, 0)));
    }

    #[test]
    fn test_weekends_follow_session_start() {
        let cal = calendar();
        // Friday night session continues into Saturday morning
        assert!(cal.is_open(bj(2026, 10, 17, 0, 30)));
        // No Saturday day session
        assert!(!cal.is_open(bj(2026, 10, 17, 10, 0)));
        // Sunday night session does not exist
        assert!(!cal.is_open(bj(2026, 10, 18, 22, 0)));
        assert!(!cal.is_open(bj(2026, 10, 19, 0, 30)));
        // Monday day session
        assert!(cal.is_open(bj(2026, 10, 19, 9, 30)));
    }

    #[test]
    fn test_weekends_allowed_when_configured() {
        let config = MonitorConfig {
            skip_weekends: false,
            ..MonitorConfig::default()
        };
        let cal = TradingCalendar::from_config(&config).unwrap();
        assert!(cal.is_open(bj(2026, 10, 17, 10, 0)));
    }

    #[test]
    fn test_always_open() {
        let cal = TradingCalendar::always_open();
        assert!(cal.is_open(Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap()));
    }

    #[test]
    fn test_no_windows_still_skips_weekends() {
        let cal = TradingCalendar::new(chrono_tz::Asia::Shanghai, Vec::new(), true);
        assert!(cal.is_open(bj(2026, 10, 16, 3, 0)));
        assert!(cal.is_open(bj(2026, 10, 16, 23, 30)));
        // Saturday and Sunday in Beijing, whatever the UTC date
        assert!(!cal.is_open(bj(2026, 10, 17, 0, 30)));
        assert!(!cal.is_open(bj(2026, 10, 18, 12, 0)));
        assert!(cal.is_open(bj(2026, 10, 19, 7, 0)));
    }
}
