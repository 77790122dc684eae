//! Timestamp labels used as the join key between pipeline stages.
//!
//! A label has the form `HH-MM-SS.mmm`: hours are unbounded (at least two
//! digits), minutes and seconds are zero-padded to two digits and the
//! fractional part always carries three millisecond digits. Dashes instead of
//! colons keep the label usable inside file names.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

use crate::common::{EmotionTrackError, Result};

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;

/// Offset from the start of a video, held at millisecond resolution
///
/// Storing whole milliseconds makes `label -> Timestamp -> label` lossless and
/// gives a total order usable for sorting and binary search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    millis: u64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { millis: 0 };

    /// Create a timestamp from an offset in seconds, rounded to the nearest millisecond
    ///
    /// # Panics
    /// Panics if `seconds` is negative or not finite (fail-fast approach)
    pub fn from_seconds(seconds: f64) -> Self {
        assert!(
            seconds.is_finite() && seconds >= 0.0,
            "Timestamp seconds must be finite and non-negative, got: {}",
            seconds
        );

        Self {
            millis: (seconds * 1000.0).round() as u64,
        }
    }

    /// Fallible form of [`from_seconds`](Self::from_seconds)
    ///
    /// # Errors
    /// * `InvalidTimestamp` - if `seconds` is negative, not finite or beyond
    ///   the millisecond range
    pub fn try_from_seconds(seconds: f64) -> Result<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(EmotionTrackError::timestamp_error(
                seconds.to_string(),
                "seconds must be finite and non-negative",
            ));
        }

        let millis = (seconds * 1000.0).round();
        if millis >= u64::MAX as f64 {
            return Err(EmotionTrackError::timestamp_error(
                seconds.to_string(),
                "offset exceeds the millisecond range",
            ));
        }
        Ok(Self { millis: millis as u64 })
    }

    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// Offset in seconds since the start of the video
    pub fn seconds(&self) -> f64 {
        self.millis as f64 / 1000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.millis / MILLIS_PER_HOUR;
        let minutes = (self.millis % MILLIS_PER_HOUR) / MILLIS_PER_MINUTE;
        let seconds = (self.millis % MILLIS_PER_MINUTE) / MILLIS_PER_SECOND;
        let millis = self.millis % MILLIS_PER_SECOND;

        write!(f, "{:02}-{:02}-{:02}.{:03}", hours, minutes, seconds, millis)
    }
}

impl FromStr for Timestamp {
    type Err = EmotionTrackError;

    fn from_str(label: &str) -> Result<Self> {
        let seconds = decode(label)?;
        Timestamp::try_from_seconds(seconds)
            .map_err(|_| EmotionTrackError::timestamp_error(label, "offset exceeds the millisecond range"))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(de::Error::custom)
    }
}

/// Encode an offset in seconds as a `HH-MM-SS.mmm` label
pub fn encode(seconds: f64) -> String {
    Timestamp::from_seconds(seconds).to_string()
}

/// Decode a `HH-MM-SS.mmm` label back into seconds
///
/// # Errors
/// * `InvalidTimestamp` - unless the label holds exactly three dash-separated,
///   non-negative numeric fields
pub fn decode(label: &str) -> Result<f64> {
    let fields: Vec<&str> = label.split('-').collect();
    if fields.len() != 3 {
        return Err(EmotionTrackError::timestamp_error(
            label,
            format!("expected 3 dash-separated fields, got {}", fields.len()),
        ));
    }

    let mut values = [0.0f64; 3];
    for (value, field) in values.iter_mut().zip(&fields) {
        let parsed: f64 = field.parse().map_err(|_| {
            EmotionTrackError::timestamp_error(label, format!("field '{}' is not numeric", field))
        })?;

        if !parsed.is_finite() || parsed < 0.0 {
            return Err(EmotionTrackError::timestamp_error(
                label,
                format!("field '{}' is out of range", field),
            ));
        }
        *value = parsed;
    }

    let seconds = values[0] * 3600.0 + values[1] * 60.0 + values[2];
    if !seconds.is_finite() {
        return Err(EmotionTrackError::timestamp_error(label, "offset overflows"));
    }
    trace!("Decoded timestamp {} = {}s", label, seconds);
    Ok(seconds)
}
