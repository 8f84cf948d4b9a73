//! Configuration system for the element analyzer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub paths: PathsConfig,
    pub audio: AudioConfig,
    pub midi: MidiConfig,
    pub classification: ClassificationConfig,
    pub visualization: VisualizationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            paths: PathsConfig::default(),
            audio: AudioConfig::default(),
            midi: MidiConfig::default(),
            classification: ClassificationConfig::default(),
            visualization: VisualizationConfig::default(),
        }
    }
}

/// Input/output layout of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding audio samples
    pub input_dir: PathBuf,
    /// Subdirectory of `input_dir` holding MIDI files
    pub midi_subdir: String,
    /// Directory receiving the JSON documents
    pub output_dir: PathBuf,
    /// Subdirectory of `output_dir` for waveform/spectrogram images
    pub image_subdir: String,
    /// Subdirectory of `output_dir` for the visualization pass
    pub visualization_subdir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("samples"),
            midi_subdir: "midi".to_string(),
            output_dir: PathBuf::from("data"),
            image_subdir: "images".to_string(),
            visualization_subdir: "visualizations".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn midi_dir(&self) -> PathBuf {
        self.input_dir.join(&self.midi_subdir)
    }

    pub fn image_dir(&self) -> PathBuf {
        self.output_dir.join(&self.image_subdir)
    }

    pub fn visualization_dir(&self) -> PathBuf {
        self.output_dir.join(&self.visualization_subdir)
    }
}

/// Audio feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub rhythm_steps: usize,
    pub onset: OnsetPickConfig,
    pub tempo_range_bpm: [f32; 2],
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            rhythm_steps: 16,
            onset: OnsetPickConfig::default(),
            tempo_range_bpm: [30.0, 240.0],
        }
    }
}

/// Peak picking parameters for onset detection (in frames)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetPickConfig {
    pub pre_max: usize,
    pub post_max: usize,
    pub pre_avg: usize,
    pub post_avg: usize,
    pub delta: f32,
    pub wait: usize,
}

impl Default for OnsetPickConfig {
    fn default() -> Self {
        Self {
            pre_max: 3,
            post_max: 3,
            pre_avg: 10,
            post_avg: 10,
            delta: 0.07,
            wait: 4,
        }
    }
}

/// Order of detected chord records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordOrder {
    /// Order in which each chord's first note appears in the note list
    FirstSeen,
    /// Ascending chord time
    Chronological,
}

/// MIDI feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub density_segments: usize,
    pub chord_tolerance_sec: f64,
    pub max_chords: usize,
    pub max_sequence_notes: usize,
    pub top_pitch_count: usize,
    pub chord_order: ChordOrder,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            density_segments: 16,
            chord_tolerance_sec: 0.05,
            max_chords: 10,
            max_sequence_notes: 100,
            top_pitch_count: 5,
            chord_order: ChordOrder::FirstSeen,
        }
    }
}

/// Element classification rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub break_keywords: Vec<String>,
    pub bass_keywords: Vec<String>,
    pub ambient_keywords: Vec<String>,
    pub drum_keywords: Vec<String>,
    /// Audio: onsets per second above which an element is a break
    pub break_onset_density: f64,
    /// Audio: centroid (Hz) below which an element is bass
    pub bass_centroid_hz: f64,
    /// MIDI: highest pitch below which an element is bass
    pub bass_max_pitch: u8,
    /// MIDI: notes per second below which an element is ambient
    pub ambient_note_density: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            break_keywords: keywords(&["break", "amen", "think"]),
            bass_keywords: keywords(&["bass", "reese", "foghorn"]),
            ambient_keywords: keywords(&["ambient", "pad", "atmos"]),
            drum_keywords: keywords(&["drum", "beat", "percussion"]),
            break_onset_density: 1.5,
            bass_centroid_hz: 2000.0,
            bass_max_pitch: 60,
            ambient_note_density: 0.5,
        }
    }
}

/// Image rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub generate_images: bool,
    /// Embed rendered PNGs as base64 in the analysis document
    pub embed_base64: bool,
    pub waveform_size: (u32, u32),
    pub spectrogram_size: (u32, u32),
    pub grid_size: (u32, u32),
    /// Two-panel images (break analysis, bass envelope, pitch contour)
    pub panel_size: (u32, u32),
    pub piano_roll_size: (u32, u32),
    pub histogram_size: (u32, u32),
    pub mel_bands: usize,
    pub bass_max_hz: f32,
    pub pitch_fmin_hz: f32,
    pub pitch_fmax_hz: f32,
    /// Name keywords labelling a MIDI element ambient in the visualization pass
    pub midi_ambient_keywords: Vec<String>,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            generate_images: true,
            embed_base64: true,
            waveform_size: (1000, 300),
            spectrogram_size: (1000, 600),
            grid_size: (1200, 300),
            panel_size: (1000, 400),
            piano_roll_size: (1200, 600),
            histogram_size: (800, 400),
            mel_bands: 128,
            bass_max_hz: 250.0,
            pitch_fmin_hz: 30.0,
            pitch_fmax_hz: 300.0,
            midi_ambient_keywords: keywords(&["ambient", "pad"]),
        }
    }
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    let audio = &config.audio;
    if audio.n_fft < 2 || audio.hop_length == 0 {
        anyhow::bail!("audio.n_fft must be >= 2 and audio.hop_length > 0");
    }
    if audio.rhythm_steps == 0 {
        anyhow::bail!("audio.rhythm_steps must be > 0");
    }
    if audio.tempo_range_bpm[0] <= 0.0 || audio.tempo_range_bpm[0] >= audio.tempo_range_bpm[1] {
        anyhow::bail!("audio.tempo_range_bpm min must be > 0 and < max");
    }

    let midi = &config.midi;
    if midi.density_segments == 0 {
        anyhow::bail!("midi.density_segments must be > 0");
    }
    if !(midi.chord_tolerance_sec > 0.0) {
        anyhow::bail!("midi.chord_tolerance_sec must be > 0");
    }

    let rules = &config.classification;
    for (label, words) in [
        ("break_keywords", &rules.break_keywords),
        ("bass_keywords", &rules.bass_keywords),
        ("ambient_keywords", &rules.ambient_keywords),
        ("drum_keywords", &rules.drum_keywords),
    ] {
        if words.iter().any(|w| w.trim().is_empty()) {
            anyhow::bail!("classification.{} must not contain empty keywords", label);
        }
    }

    let viz = &config.visualization;
    if viz.midi_ambient_keywords.iter().any(|w| w.trim().is_empty()) {
        anyhow::bail!("visualization.midi_ambient_keywords must not contain empty keywords");
    }
    if viz.mel_bands == 0 {
        anyhow::bail!("visualization.mel_bands must be > 0");
    }
    if viz.pitch_fmin_hz <= 0.0 || viz.pitch_fmin_hz >= viz.pitch_fmax_hz {
        anyhow::bail!("visualization.pitch_fmin_hz must be > 0 and < pitch_fmax_hz");
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"midi": {"chord_order": "chronological"}}"#).unwrap();
        assert_eq!(config.midi.chord_order, ChordOrder::Chronological);
        assert_eq!(config.midi.density_segments, 16);
        assert_eq!(config.paths.midi_subdir, "midi");
    }

    #[test]
    fn test_rejects_bad_tolerance() {
        let mut config = Config::default();
        config.midi.chord_tolerance_sec = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.paths.input_dir = PathBuf::from("elsewhere");
        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.paths.input_dir, PathBuf::from("elsewhere"));
    }
}
