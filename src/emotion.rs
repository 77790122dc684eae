//! The fixed emotion label set and per-person confidence distributions.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Emotion labels reported by the classifier, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    /// Every label, in the order used for serialization and tie-breaking
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = ScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .iter()
            .copied()
            .find(|emotion| emotion.as_str() == s)
            .ok_or_else(|| ScoreError::UnknownLabel(s.to_string()))
    }
}

/// Why a confidence distribution was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("unknown emotion label '{0}'")]
    UnknownLabel(String),

    #[error("emotion '{0}' appears more than once")]
    Duplicate(Emotion),

    #[error("emotion '{0}' is missing")]
    Missing(Emotion),

    #[error("confidence for '{emotion}' must be within [0, 100], got {value}")]
    OutOfRange { emotion: Emotion, value: f64 },

    #[error("expected {expected} class scores, got {got}")]
    WrongLength { expected: usize, got: usize },
}

/// Confidence percentage for every emotion label
///
/// Every value lies in `[0, 100]` and every label of [`Emotion::ALL`] is present,
/// so all rows of a record table share an identical label set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionScores {
    values: [f64; 7],
}

impl EmotionScores {
    /// Build a distribution from values listed in [`Emotion::ALL`] order
    pub fn new(values: [f64; 7]) -> Result<Self, ScoreError> {
        for (emotion, value) in Emotion::ALL.iter().zip(values) {
            if !(0.0..=100.0).contains(&value) {
                return Err(ScoreError::OutOfRange { emotion: *emotion, value });
            }
        }
        Ok(Self { values })
    }

    /// Build a distribution from `(label, percentage)` pairs covering every label exactly once
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ScoreError>
    where
        I: IntoIterator<Item = (Emotion, f64)>,
    {
        let mut slots: [Option<f64>; 7] = [None; 7];
        for (emotion, value) in pairs {
            let slot = &mut slots[emotion.index()];
            if slot.is_some() {
                return Err(ScoreError::Duplicate(emotion));
            }
            *slot = Some(value);
        }

        let mut values = [0.0; 7];
        for (emotion, slot) in Emotion::ALL.iter().zip(slots) {
            values[emotion.index()] = slot.ok_or(ScoreError::Missing(*emotion))?;
        }
        Self::new(values)
    }

    /// Convert classifier probabilities (canonical order, summing to ~1) into percentages
    ///
    /// Values are clamped into `[0, 100]` to absorb floating point overshoot.
    pub fn from_probabilities(probabilities: &[f32]) -> Result<Self, ScoreError> {
        if probabilities.len() != Emotion::ALL.len() {
            return Err(ScoreError::WrongLength {
                expected: Emotion::ALL.len(),
                got: probabilities.len(),
            });
        }

        let mut values = [0.0; 7];
        for (value, p) in values.iter_mut().zip(probabilities) {
            *value = (*p as f64 * 100.0).clamp(0.0, 100.0);
        }
        Self::new(values)
    }

    pub fn get(&self, emotion: Emotion) -> f64 {
        self.values[emotion.index()]
    }

    /// Highest confidence in the distribution
    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::MIN, f64::max)
    }

    /// Label with the highest confidence; ties go to the earliest label in canonical order
    pub fn dominant(&self) -> Emotion {
        let mut best = Emotion::ALL[0];
        for emotion in Emotion::ALL {
            if self.get(emotion) > self.get(best) {
                best = emotion;
            }
        }
        best
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f64)> + '_ {
        Emotion::ALL.iter().map(move |emotion| (*emotion, self.get(*emotion)))
    }
}

impl Serialize for EmotionScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Emotion::ALL.len()))?;
        for (emotion, value) in self.iter() {
            map.serialize_entry(emotion.as_str(), &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EmotionScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScoresVisitor;

        impl<'de> Visitor<'de> for ScoresVisitor {
            type Value = EmotionScores;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map from every emotion label to a percentage")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(Emotion::ALL.len());
                while let Some((label, value)) = access.next_entry::<String, f64>()? {
                    let emotion: Emotion = label.parse().map_err(de::Error::custom)?;
                    pairs.push((emotion, value));
                }
                EmotionScores::from_pairs(pairs).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_map(ScoresVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scores() -> EmotionScores {
        EmotionScores::new([1.25, 0.003, 4.5, 80.125, 2.0, 0.75, 11.367]).unwrap()
    }

    #[test]
    fn test_labels_round_trip() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.as_str().parse::<Emotion>().unwrap(), emotion);
        }
        assert!(matches!("contempt".parse::<Emotion>(), Err(ScoreError::UnknownLabel(_))));
    }

    #[test]
    fn test_dominant_is_maximum() {
        let scores = sample_scores();
        assert_eq!(scores.dominant(), Emotion::Happy);
        assert_eq!(scores.get(scores.dominant()), scores.max());
    }

    #[test]
    fn test_dominant_tie_uses_canonical_order() {
        let scores = EmotionScores::new([10.0, 0.0, 40.0, 0.0, 40.0, 0.0, 10.0]).unwrap();
        assert_eq!(scores.dominant(), Emotion::Fear);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = EmotionScores::new([101.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, ScoreError::OutOfRange { emotion: Emotion::Angry, .. }));

        let err = EmotionScores::new([0.0, f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, ScoreError::OutOfRange { emotion: Emotion::Disgust, .. }));
    }

    #[test]
    fn test_from_pairs_requires_full_label_set() {
        let partial = vec![(Emotion::Happy, 50.0), (Emotion::Sad, 50.0)];
        assert!(matches!(
            EmotionScores::from_pairs(partial),
            Err(ScoreError::Missing(Emotion::Angry))
        ));

        let mut duplicated: Vec<(Emotion, f64)> = Emotion::ALL.iter().map(|e| (*e, 1.0)).collect();
        duplicated.push((Emotion::Sad, 2.0));
        assert!(matches!(
            EmotionScores::from_pairs(duplicated),
            Err(ScoreError::Duplicate(Emotion::Sad))
        ));
    }

    #[test]
    fn test_from_probabilities() {
        let scores = EmotionScores::from_probabilities(&[0.0, 0.0, 0.0, 0.5, 0.25, 0.0, 0.25]).unwrap();
        assert_eq!(scores.get(Emotion::Happy), 50.0);
        assert_eq!(scores.get(Emotion::Sad), 25.0);

        let err = EmotionScores::from_probabilities(&[0.5; 8]).unwrap_err();
        assert_eq!(err, ScoreError::WrongLength { expected: 7, got: 8 });
    }

    #[test]
    fn test_serialized_form_is_ordered_and_reparseable() {
        let scores = sample_scores();
        let json = serde_json::to_string(&scores).unwrap();
        assert!(json.starts_with("{\"angry\":1.25,\"disgust\":0.003,"));
        assert!(json.ends_with("\"neutral\":11.367}"));

        let back: EmotionScores = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scores);
    }

    #[test]
    fn test_serialized_round_trip_is_exact_for_arbitrary_values() {
        let awkward = EmotionScores::new([
            0.1 + 0.2,
            1.0 / 3.0,
            99.99999999999999,
            2.0f64.sqrt(),
            0.0,
            100.0,
            12.345678901234567,
        ])
        .unwrap();

        let back: EmotionScores = serde_json::from_str(&serde_json::to_string(&awkward).unwrap()).unwrap();
        assert_eq!(back, awkward);
    }

    #[test]
    fn test_deserialize_rejects_incomplete_mapping() {
        assert!(serde_json::from_str::<EmotionScores>("{\"happy\": 100.0}").is_err());
        assert!(serde_json::from_str::<EmotionScores>("[1, 2, 3]").is_err());
        assert!(serde_json::from_str::<EmotionScores>(
            "{\"angry\":0,\"disgust\":0,\"fear\":0,\"happy\":0,\"sad\":0,\"surprise\":0,\"neutral\":0,\"bored\":1}"
        )
        .is_err());
    }
}
