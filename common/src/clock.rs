use chrono::{DateTime, Datelike, FixedOffset};

use crate::types::RenderCommand;

pub const CLOCK_PLACEHOLDER: &str = "--:--";

/// Years before this mean SNTP has not set the wall clock yet.
pub const MIN_SYNCED_YEAR: i32 = 2021;

pub fn is_time_established(now: &DateTime<FixedOffset>) -> bool {
    now.year() >= MIN_SYNCED_YEAR
}

#[derive(Debug, Clone, Default)]
pub struct ClockLabel {
    shown: Option<String>,
}

impl ClockLabel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        self.shown.as_deref().unwrap_or(CLOCK_PLACEHOLDER)
    }

    /// `None` leaves whatever is on screen, so an unsynced clock never replaces a real time.
    pub fn refresh(&mut self, now: DateTime<FixedOffset>) -> Option<RenderCommand> {
        if !is_time_established(&now) {
            return None;
        }
        let text = now.format("%H:%M").to_string();
        self.shown = Some(text.clone());
        Some(RenderCommand::SetClockText(text))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(year: i32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3_600)
            .unwrap()
            .with_ymd_and_hms(year, 3, 14, hour, minute, 59)
            .unwrap()
    }

    #[test]
    fn unsynced_clock_renders_nothing() {
        let mut clock = ClockLabel::new();
        assert_eq!(clock.refresh(at(1970, 0, 1)), None);
        assert_eq!(clock.text(), CLOCK_PLACEHOLDER);
    }

    #[test]
    fn synced_clock_renders_hours_and_minutes() {
        let mut clock = ClockLabel::new();
        assert_eq!(
            clock.refresh(at(2025, 7, 5)),
            Some(RenderCommand::SetClockText("07:05".to_string()))
        );
        assert_eq!(clock.text(), "07:05");
    }

    #[test]
    fn losing_sync_keeps_last_time() {
        let mut clock = ClockLabel::new();
        let _ = clock.refresh(at(2025, 21, 30));
        assert_eq!(clock.refresh(at(2020, 0, 0)), None);
        assert_eq!(clock.text(), "21:30");
    }
}
