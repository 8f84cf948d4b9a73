//! Heuristic element classification

use crate::analysis::{Fingerprint, Outcome};
use crate::config::ClassificationConfig;
use serde::{Deserialize, Serialize};

/// Element role label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Break,
    Bass,
    Ambient,
    Drums,
    Unknown,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Break => "break",
            ElementType::Bass => "bass",
            ElementType::Ambient => "ambient",
            ElementType::Drums => "drums",
            ElementType::Unknown => "unknown",
        }
    }
}

/// Name keyword rules followed by feature thresholds
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: ClassificationConfig,
}

impl Classifier {
    pub fn new(rules: ClassificationConfig) -> Self {
        Self { rules }
    }

    /// Label an element. Failed extractions are always unknown.
    pub fn classify(&self, name: &str, outcome: &Outcome) -> ElementType {
        let fingerprint = match outcome {
            Ok(fingerprint) => fingerprint,
            Err(_) => return ElementType::Unknown,
        };

        if let Some(label) = self.classify_name(name) {
            return label;
        }

        let rules = &self.rules;
        match fingerprint {
            Fingerprint::Audio(audio) => {
                if audio.onset_density > rules.break_onset_density {
                    return ElementType::Break;
                }
                if audio.spectral_centroid_mean < rules.bass_centroid_hz {
                    return ElementType::Bass;
                }
            }
            Fingerprint::Midi(midi) => {
                if midi.pitch_range[1] < rules.bass_max_pitch {
                    return ElementType::Bass;
                }
                if midi.note_density < rules.ambient_note_density {
                    return ElementType::Ambient;
                }
            }
        }

        ElementType::Unknown
    }

    /// Keyword rules alone, in priority order
    pub fn classify_name(&self, name: &str) -> Option<ElementType> {
        let lower = name.to_lowercase();
        let rules = &self.rules;
        [
            (&rules.break_keywords, ElementType::Break),
            (&rules.bass_keywords, ElementType::Bass),
            (&rules.ambient_keywords, ElementType::Ambient),
            (&rules.drum_keywords, ElementType::Drums),
        ]
        .into_iter()
        .find(|(words, _)| contains_any(&lower, words))
        .map(|(_, label)| label)
    }
}

/// Case-insensitive substring match against any keyword
pub fn contains_any(name: &str, keywords: &[String]) -> bool {
    let lower = name.to_lowercase();
    keywords
        .iter()
        .any(|word| lower.contains(&word.to_lowercase()))
}

/// Classify with the default rules
pub fn classify(name: &str, outcome: &Outcome) -> ElementType {
    Classifier::default().classify(name, outcome)
}
