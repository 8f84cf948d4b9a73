//! Sample discovery and file-type tagging

use crate::config::PathsConfig;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Audio extensions in discovery order
pub const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "ogg", "flac"];
pub const MIDI_EXTENSIONS: [&str; 2] = ["mid", "midi"];

/// Kind of source file behind an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Audio,
    Midi,
    Unknown,
}

impl FileType {
    /// Tag a path by its (case-insensitive) extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let extension = lowercase_extension(path.as_ref());
        if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
            FileType::Audio
        } else if MIDI_EXTENSIONS.contains(&extension.as_str()) {
            FileType::Midi
        } else {
            FileType::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Audio => "audio",
            FileType::Midi => "midi",
            FileType::Unknown => "unknown",
        }
    }
}

/// An element's source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub file_type: FileType,
    /// Path stem, used as the element's key in every output document
    pub name: String,
}

impl Sample {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let file_type = FileType::from_path(&path);
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            file_type,
            name,
        }
    }

    /// Base file name including extension
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Lower-cased extension with leading dot, empty if none
    pub fn extension(&self) -> String {
        let extension = lowercase_extension(&self.path);
        if extension.is_empty() {
            String::new()
        } else {
            format!(".{}", extension)
        }
    }
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Find samples: MIDI files from the MIDI subdirectory first, then audio
/// files grouped by extension. Each group is sorted by file name.
pub fn discover_samples(paths: &PathsConfig) -> Vec<Sample> {
    let mut samples = Vec::new();

    let midi_dir = paths.midi_dir();
    samples.extend(
        list_files(&midi_dir)
            .into_iter()
            .filter(|path| FileType::from_path(path) == FileType::Midi)
            .map(Sample::new),
    );

    let audio_files = list_files(&paths.input_dir);
    for extension in AUDIO_EXTENSIONS {
        samples.extend(
            audio_files
                .iter()
                .filter(|path| lowercase_extension(path) == extension)
                .cloned()
                .map(Sample::new),
        );
    }

    debug!(
        "Discovered {} samples under {}",
        samples.len(),
        paths.input_dir.display()
    );
    samples
}

/// Regular files directly inside `dir`, sorted by name. A missing
/// directory yields no files.
fn list_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if dir.exists() {
                warn!("Cannot read {}: {}", dir.display(), err);
            }
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}
