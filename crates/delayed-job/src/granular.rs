use std::time::Duration;

use serde::{Deserialize, Serialize};

const SECS_PER_WEEK: u64 = 604_800;
const SECS_PER_DAY: u64 = 86_400;
const SECS_PER_MINUTE: u64 = 60;

/// A delay spelled in a single named unit. Converts into [`Duration`] with
/// fixed multipliers; whole-second units saturate instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranularDuration {
    Weeks(u64),
    Days(u64),
    Minutes(u64),
    Seconds(u64),
    Milliseconds(u64),
    Microseconds(u64),
    Nanoseconds(u64),
}

impl From<GranularDuration> for Duration {
    fn from(value: GranularDuration) -> Self {
        match value {
            GranularDuration::Weeks(weeks) => {
                Duration::from_secs(weeks.saturating_mul(SECS_PER_WEEK))
            }
            GranularDuration::Days(days) => Duration::from_secs(days.saturating_mul(SECS_PER_DAY)),
            GranularDuration::Minutes(minutes) => {
                Duration::from_secs(minutes.saturating_mul(SECS_PER_MINUTE))
            }
            GranularDuration::Seconds(seconds) => Duration::from_secs(seconds),
            GranularDuration::Milliseconds(millis) => Duration::from_millis(millis),
            GranularDuration::Microseconds(micros) => Duration::from_micros(micros),
            GranularDuration::Nanoseconds(nanos) => Duration::from_nanos(nanos),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::GranularDuration;

    #[test]
    fn whole_second_units_use_fixed_multipliers() {
        assert_eq!(
            Duration::from(GranularDuration::Weeks(1)),
            Duration::from_secs(604_800)
        );
        assert_eq!(
            Duration::from(GranularDuration::Days(2)),
            Duration::from_secs(172_800)
        );
        assert_eq!(
            Duration::from(GranularDuration::Minutes(3)),
            Duration::from_secs(180)
        );
        assert_eq!(
            Duration::from(GranularDuration::Seconds(45)),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn subsecond_units_convert_exactly() {
        assert_eq!(
            Duration::from(GranularDuration::Milliseconds(1)),
            Duration::from_millis(1)
        );
        assert_eq!(
            Duration::from(GranularDuration::Microseconds(250)),
            Duration::from_micros(250)
        );
        assert_eq!(
            Duration::from(GranularDuration::Nanoseconds(999)),
            Duration::from_nanos(999)
        );
    }

    #[test]
    fn huge_magnitudes_saturate_instead_of_overflowing() {
        assert_eq!(
            Duration::from(GranularDuration::Weeks(u64::MAX)),
            Duration::from_secs(u64::MAX)
        );
        assert_eq!(
            Duration::from(GranularDuration::Days(u64::MAX)),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn parses_from_embedder_config_values() {
        #[derive(serde::Deserialize)]
        struct EmbedderConfig {
            delay: GranularDuration,
        }

        let config: EmbedderConfig =
            toml::from_str("delay = { minutes = 5 }").expect("parse");
        assert_eq!(config.delay, GranularDuration::Minutes(5));
        let config: EmbedderConfig =
            toml::from_str("delay = { milliseconds = 250 }").expect("parse");
        assert_eq!(config.delay, GranularDuration::Milliseconds(250));
    }
}
