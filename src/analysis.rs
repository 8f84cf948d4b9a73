//! Element records, ordered catalogs and JSON output

use crate::audio::AudioFeatures;
use crate::classify::ElementType;
use crate::error::{ExtractionError, Result};
use crate::midi::MidiFeatures;
use crate::sample::{FileType, Sample};
use log::warn;
use serde::de::{MapAccess, Visitor};
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

/// Serialize an `f64`, failing on NaN and infinities
pub fn finite<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        Err(S::Error::custom(format!("non-finite number {}", value)))
    }
}

pub fn finite_opt<S: Serializer>(value: &Option<f64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => finite(v, serializer),
        None => serializer.serialize_none(),
    }
}

pub fn finite_seq<S: Serializer>(values: &[f64], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(S::Error::custom(format!("non-finite number {} in sequence", bad)));
    }
    serializer.collect_seq(values)
}

/// Extracted features of one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Fingerprint {
    Audio(AudioFeatures),
    Midi(MidiFeatures),
}

impl Fingerprint {
    pub fn file_type(&self) -> FileType {
        match self {
            Fingerprint::Audio(_) => FileType::Audio,
            Fingerprint::Midi(_) => FileType::Midi,
        }
    }

    pub fn duration(&self) -> f64 {
        match self {
            Fingerprint::Audio(features) => features.duration,
            Fingerprint::Midi(features) => features.duration,
        }
    }
}

/// Outcome of extracting one element
pub type Outcome = std::result::Result<Fingerprint, ExtractionError>;

/// Source file description attached to every record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Base name with extension
    pub file_name: String,
    pub file_path: String,
    /// Lower-cased extension with leading dot
    pub extension: String,
}

impl From<&Sample> for FileMetadata {
    fn from(sample: &Sample) -> Self {
        Self {
            file_name: sample.file_name(),
            file_path: sample.path.to_string_lossy().into_owned(),
            extension: sample.extension(),
        }
    }
}

/// Fingerprint (or failure), file metadata and classification of one
/// element. Serialized as a single flat object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RecordRepr")]
pub struct ElementRecord {
    pub fingerprint: Outcome,
    pub metadata: FileMetadata,
    pub element_type: ElementType,
}

impl ElementRecord {
    pub fn file_type(&self) -> FileType {
        match &self.fingerprint {
            Ok(fingerprint) => fingerprint.file_type(),
            Err(err) => err.file_type,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.fingerprint.is_ok()
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum OutcomeRef<'a> {
    Ok(&'a Fingerprint),
    Err(&'a ExtractionError),
}

#[derive(Serialize)]
struct RecordRef<'a> {
    #[serde(flatten)]
    outcome: OutcomeRef<'a>,
    #[serde(flatten)]
    metadata: &'a FileMetadata,
    element_type: ElementType,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutcomeRepr {
    Ok(Fingerprint),
    Err(ExtractionError),
}

#[derive(Deserialize)]
struct RecordRepr {
    #[serde(flatten)]
    outcome: OutcomeRepr,
    #[serde(flatten)]
    metadata: FileMetadata,
    element_type: ElementType,
}

impl From<RecordRepr> for ElementRecord {
    fn from(repr: RecordRepr) -> Self {
        Self {
            fingerprint: match repr.outcome {
                OutcomeRepr::Ok(fingerprint) => Ok(fingerprint),
                OutcomeRepr::Err(err) => Err(err),
            },
            metadata: repr.metadata,
            element_type: repr.element_type,
        }
    }
}

impl Serialize for ElementRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RecordRef {
            outcome: match &self.fingerprint {
                Ok(fingerprint) => OutcomeRef::Ok(fingerprint),
                Err(err) => OutcomeRef::Err(err),
            },
            metadata: &self.metadata,
            element_type: self.element_type,
        }
        .serialize(serializer)
    }
}

/// Insertion-ordered mapping from element name to a value.
///
/// Inserting an existing name replaces the value at its original position.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog<V> {
    entries: Vec<(String, V)>,
}

/// Analysis results keyed by element name
pub type ElementCatalog = Catalog<ElementRecord>;

impl<V> Default for Catalog<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> Catalog<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the replaced value
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(key, _)| *key == name) {
            warn!("Duplicate element name '{}', replacing earlier entry", name);
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((name, value));
        None
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }
}

impl<V: Serialize> Serialize for Catalog<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct CatalogVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for CatalogVisitor<V> {
    type Value = Catalog<V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of element names to records")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut catalog = Catalog::new();
        while let Some((name, value)) = access.next_entry::<String, V>()? {
            catalog.insert(name, value);
        }
        Ok(catalog)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Catalog<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(CatalogVisitor(PhantomData))
    }
}

/// Type-specific part of a visualization entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VisualizationDetail {
    Midi {
        #[serde(serialize_with = "finite_seq")]
        pitch_histogram: Vec<f64>,
        most_common_pitches: Vec<u8>,
        note_density_over_time: Vec<u32>,
    },
    Audio {
        #[serde(serialize_with = "finite_seq")]
        rhythm_pattern: Vec<f64>,
        waveform_url: Option<String>,
        spectrogram_url: Option<String>,
    },
}

/// Reduced record consumed by the front-end renderers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub file_type: FileType,
    #[serde(serialize_with = "finite")]
    pub duration: f64,
    #[serde(flatten)]
    pub detail: VisualizationDetail,
}

impl VisualizationEntry {
    /// Project a record; image URLs are relative to the output directory
    pub fn from_record(name: &str, record: &ElementRecord, image_subdir: &str) -> Self {
        let file_type = record.file_type();
        let fingerprint = record.fingerprint.as_ref().ok();
        let duration = fingerprint.map(Fingerprint::duration).unwrap_or(0.0);

        let detail = if file_type == FileType::Midi {
            match fingerprint {
                Some(Fingerprint::Midi(midi)) => VisualizationDetail::Midi {
                    pitch_histogram: midi.pitch_histogram.clone(),
                    most_common_pitches: midi.most_common_pitches.clone(),
                    note_density_over_time: midi.note_density_over_time.clone(),
                },
                _ => VisualizationDetail::Midi {
                    pitch_histogram: Vec::new(),
                    most_common_pitches: Vec::new(),
                    note_density_over_time: Vec::new(),
                },
            }
        } else {
            let audio = match fingerprint {
                Some(Fingerprint::Audio(audio)) => Some(audio),
                _ => None,
            };
            let url = |present: bool, suffix: &str| {
                present.then(|| format!("{}/{}_{}.png", image_subdir, name, suffix))
            };
            VisualizationDetail::Audio {
                rhythm_pattern: audio.map(|a| a.rhythm_pattern.clone()).unwrap_or_default(),
                waveform_url: url(audio.map_or(false, |a| a.has_waveform_image), "waveform"),
                spectrogram_url: url(audio.map_or(false, |a| a.has_spectrogram_image), "spectrogram"),
            }
        };

        Self {
            name: name.to_string(),
            element_type: record.element_type,
            file_type,
            duration,
            detail,
        }
    }
}

/// Build the visualization projection of a catalog
pub fn visualization_data(catalog: &ElementCatalog, image_subdir: &str) -> Catalog<VisualizationEntry> {
    let mut data = Catalog::new();
    for (name, record) in catalog.iter() {
        data.insert(name, VisualizationEntry::from_record(name, record, image_subdir));
    }
    data
}

/// Encode as JSON with 4-space indentation
pub fn to_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Encode fully in memory, then write in one go (overwriting)
pub fn write_json<T: Serialize + ?Sized, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let json = to_json_string(value)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, json)?;
    Ok(())
}
