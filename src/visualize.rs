//! Visualization pass: per-element diagnostic images and numeric summaries

use crate::analysis::{finite, finite_seq, write_json, Catalog};
use crate::audio::{ensure_finite, ensure_finite_spectrum, load_audio_file, validate_signal, SignalAnalysis};
use crate::classify::contains_any;
use crate::config::Config;
use crate::error::{ElementError, Result};
use crate::midi::{most_common_pitches, note_density_over_time, pitch_class_counts, MidiDocument};
use crate::plots::{self, GridTint};
use crate::sample::{discover_samples, FileType, Sample};
use crate::spectral;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the pass's JSON document
pub const METADATA_FILE: &str = "visualization_metadata.json";

/// Label chosen for an element in the visualization pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualLabel {
    Break,
    Bass,
    Ambient,
    Midi,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakVisualization {
    pub rhythm_grid: Option<String>,
    pub break_analysis: Option<String>,
    pub mel_spectrogram: Option<String>,
    /// Mean onset strength per equal time segment, scaled by the maximum
    #[serde(serialize_with = "finite_seq")]
    pub segment_strengths: Vec<f64>,
    #[serde(serialize_with = "finite_seq")]
    pub onset_times: Vec<f64>,
    #[serde(serialize_with = "finite")]
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BassVisualization {
    pub bass_envelope: Option<String>,
    pub bass_spectrogram: Option<String>,
    pub pitch_contour: Option<String>,
    /// Sparse pitch contour in Hz, 0 where no pitch was found
    #[serde(serialize_with = "finite_seq")]
    pub bass_movement: Vec<f64>,
    #[serde(serialize_with = "finite")]
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiVisualization {
    pub piano_roll: Option<String>,
    pub pitch_histogram: Option<String>,
    pub midi_rhythm: Option<String>,
    pub top_pitches: Vec<u8>,
    #[serde(serialize_with = "finite_seq")]
    pub normalized_density: Vec<f64>,
    #[serde(serialize_with = "finite")]
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationFailure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VisualizationResult {
    Break(BreakVisualization),
    Bass(BassVisualization),
    Midi(MidiVisualization),
    Failed(VisualizationFailure),
}

/// One entry of the visualization metadata document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationRecord {
    #[serde(flatten)]
    pub result: VisualizationResult,
    #[serde(rename = "type")]
    pub label: VisualLabel,
}

/// Choose the label (and so the renderer) for a sample
pub fn label_for(sample: &Sample, config: &Config) -> VisualLabel {
    let rules = &config.classification;
    match sample.file_type {
        FileType::Midi => {
            if contains_any(&sample.name, &rules.bass_keywords) {
                VisualLabel::Bass
            } else if contains_any(&sample.name, &config.visualization.midi_ambient_keywords) {
                VisualLabel::Ambient
            } else {
                VisualLabel::Midi
            }
        }
        _ => {
            if contains_any(&sample.name, &rules.break_keywords) {
                VisualLabel::Break
            } else if contains_any(&sample.name, &rules.bass_keywords) {
                VisualLabel::Bass
            } else {
                VisualLabel::Other
            }
        }
    }
}

/// Mean onset strength over `segments` equal time slices, scaled by the
/// largest. A slice spanning no whole frame uses the frame it starts in.
pub fn segment_strengths(
    onset_envelope: &[f32],
    duration: f64,
    sample_rate: u32,
    hop_length: usize,
    segments: usize,
) -> Vec<f64> {
    if onset_envelope.is_empty() {
        return vec![0.0; segments];
    }
    let last = onset_envelope.len() as i64 - 1;
    let segment_duration = duration / segments as f64;
    let frame_at = |t: f64| -> usize {
        spectral::time_to_frame(t as f32, sample_rate, hop_length).clamp(0, last) as usize
    };

    let strengths: Vec<f64> = (0..segments)
        .map(|i| {
            let start = frame_at(i as f64 * segment_duration);
            let end = frame_at((i + 1) as f64 * segment_duration);
            if start < end {
                crate::audio::mean(&onset_envelope[start..end])
            } else {
                onset_envelope[start] as f64
            }
        })
        .collect();

    let max = strengths.iter().copied().fold(0.0f64, f64::max);
    if max > 0.0 {
        strengths.iter().map(|s| s / max).collect()
    } else {
        strengths
    }
}

/// Every `max(1, len / points)`-th contour value, at most `points` of them
pub fn bass_movement(contour: &[Option<f32>], points: usize) -> Vec<f64> {
    let step = (contour.len() / points.max(1)).max(1);
    contour
        .iter()
        .step_by(step)
        .take(points)
        .map(|pitch| pitch.map_or(0.0, |hz| hz as f64))
        .collect()
}

/// Density counts divided by their maximum
pub fn normalized_density(density: &[u32]) -> Vec<f64> {
    let max = density.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return vec![0.0; density.len()];
    }
    density.iter().map(|&d| d as f64 / max as f64).collect()
}

/// |y| smoothed by a centered moving average of `sample_rate / 10`
/// samples, scaled to a peak of 1
pub fn smoothed_envelope(y: &[f32], sample_rate: u32) -> Vec<f32> {
    if y.is_empty() {
        return Vec::new();
    }
    let width = (sample_rate as usize / 10).max(1);
    let offset = (width - 1) / 2;

    let mut prefix = Vec::with_capacity(y.len() + 1);
    prefix.push(0.0f64);
    for &x in y {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + x.abs() as f64);
    }

    let smoothed: Vec<f32> = (0..y.len())
        .map(|i| {
            let hi = (i + offset + 1).min(y.len());
            let lo = (i + offset + 1).saturating_sub(width).min(hi);
            ((prefix[hi] - prefix[lo]) / width as f64) as f32
        })
        .collect();

    let peak = smoothed.iter().copied().fold(0.0f32, f32::max);
    if peak > 0.0 {
        smoothed.iter().map(|v| v / peak).collect()
    } else {
        smoothed
    }
}

/// Image file name inside the visualization directory, or None when
/// images are disabled
fn image_name(out_dir: Option<&Path>, name: &str, suffix: &str) -> Option<(String, std::path::PathBuf)> {
    out_dir.map(|dir| {
        let file = format!("{}_{}.png", name, suffix);
        let path = dir.join(&file);
        (file, path)
    })
}

/// Break-style summary of a decoded signal
pub fn break_visualization(
    y: &[f32],
    sample_rate: u32,
    name: &str,
    out_dir: Option<&Path>,
    config: &Config,
) -> Result<BreakVisualization> {
    let audio = &config.audio;
    let viz = &config.visualization;
    let analysis = SignalAnalysis::compute(y, sample_rate, audio);
    ensure_finite_spectrum(&analysis.magnitude)?;
    let onset_times = analysis.onset_times(sample_rate, audio.hop_length);
    let duration = y.len() as f64 / sample_rate as f64;
    let strengths = segment_strengths(
        &analysis.onset_envelope,
        duration,
        sample_rate,
        audio.hop_length,
        audio.rhythm_steps,
    );

    let mut result = BreakVisualization {
        rhythm_grid: None,
        break_analysis: None,
        mel_spectrogram: None,
        segment_strengths: strengths,
        onset_times,
        duration,
    };
    ensure_finite("segment strengths", &result.segment_strengths)?;
    ensure_finite("onset times", &result.onset_times)?;

    if let Some((file, path)) = image_name(out_dir, name, "break_analysis") {
        plots::break_analysis(
            &path,
            y,
            sample_rate,
            &result.onset_times,
            &analysis.onset_envelope,
            audio.hop_length,
            &format!("Waveform with Onsets: {}", name),
            viz.panel_size,
        )?;
        result.break_analysis = Some(file);
    }

    if let Some((file, path)) = image_name(out_dir, name, "rhythm_grid") {
        plots::strength_grid(
            &path,
            &result.segment_strengths,
            GridTint::Red,
            &format!("Rhythmic Pattern: {}", name),
            viz.grid_size,
        )?;
        result.rhythm_grid = Some(file);
    }

    if let Some((file, path)) = image_name(out_dir, name, "mel_spectrogram") {
        let mel = spectral::mel_spectrogram(&analysis.magnitude, sample_rate, audio.n_fft, viz.mel_bands);
        plots::spectrogram(
            &path,
            &spectral::power_to_db(&mel),
            duration as f32,
            (0.0, viz.mel_bands as f32),
            "Mel band",
            &format!("Mel Spectrogram: {}", name),
            viz.spectrogram_size,
        )?;
        result.mel_spectrogram = Some(file);
    }

    Ok(result)
}

/// Bass-style summary of a decoded signal
pub fn bass_visualization(
    y: &[f32],
    sample_rate: u32,
    name: &str,
    out_dir: Option<&Path>,
    config: &Config,
) -> Result<BassVisualization> {
    let audio = &config.audio;
    let viz = &config.visualization;
    let stft = spectral::stft(y, audio.n_fft, audio.hop_length, sample_rate);
    let magnitude = spectral::magnitude_spectrogram(&stft);
    ensure_finite_spectrum(&magnitude)?;
    let contour = spectral::pitch_contour(&magnitude, &stft.freqs, viz.pitch_fmin_hz, viz.pitch_fmax_hz);
    let duration = y.len() as f64 / sample_rate as f64;

    let mut result = BassVisualization {
        bass_envelope: None,
        bass_spectrogram: None,
        pitch_contour: None,
        bass_movement: bass_movement(&contour, audio.rhythm_steps),
        duration,
    };
    ensure_finite("bass movement", &result.bass_movement)?;

    if let Some((file, path)) = image_name(out_dir, name, "bass_envelope") {
        plots::bass_envelope(
            &path,
            y,
            &smoothed_envelope(y, sample_rate),
            sample_rate,
            &format!("Waveform: {}", name),
            viz.panel_size,
        )?;
        result.bass_envelope = Some(file);
    }

    if let Some((file, path)) = image_name(out_dir, name, "bass_spectrogram") {
        let db = spectral::amplitude_to_db(&magnitude);
        let nyquist = sample_rate as f32 / 2.0;
        let rows = ((viz.bass_max_hz * db.shape()[0] as f32 / nyquist) as usize).clamp(1, db.shape()[0].max(1));
        let bass_db = db.slice(ndarray::s![..rows.min(db.shape()[0]), ..]).to_owned();
        plots::spectrogram(
            &path,
            &bass_db,
            duration as f32,
            (0.0, viz.bass_max_hz),
            "Frequency (Hz)",
            &format!("Bass Frequency Spectrogram (0-{}Hz): {}", viz.bass_max_hz, name),
            viz.spectrogram_size,
        )?;
        result.bass_spectrogram = Some(file);
    }

    if let Some((file, path)) = image_name(out_dir, name, "pitch_contour") {
        plots::pitch_contour(
            &path,
            &contour,
            &stft.times,
            (viz.pitch_fmin_hz, viz.pitch_fmax_hz),
            &format!("Fundamental Frequency Contour: {}", name),
            viz.panel_size,
        )?;
        result.pitch_contour = Some(file);
    }

    Ok(result)
}

/// Piano roll, pitch-class and density summary of a MIDI document
pub fn midi_visualization(
    document: &MidiDocument,
    name: &str,
    out_dir: Option<&Path>,
    config: &Config,
) -> std::result::Result<MidiVisualization, VisualizationFailure> {
    let instruments: Vec<_> = document.non_empty_instruments().collect();
    if instruments.is_empty() {
        warn!("No notes found in {}", name);
        return Err(VisualizationFailure {
            error: "No notes found in MIDI file".to_string(),
            file_name: Some(name.to_string()),
        });
    }
    let duration = document.end_time;
    if !(duration > 0.0) {
        warn!("Invalid duration in {}", name);
        return Err(VisualizationFailure {
            error: "Invalid MIDI duration".to_string(),
            file_name: Some(name.to_string()),
        });
    }

    let render_failed = |e: ElementError| VisualizationFailure {
        error: e.to_string(),
        file_name: Some(name.to_string()),
    };
    let viz = &config.visualization;
    let notes = document.notes();
    let counts = pitch_class_counts(&notes);
    let density = note_density_over_time(&notes, duration, config.midi.density_segments);

    let mut result = MidiVisualization {
        piano_roll: None,
        pitch_histogram: None,
        midi_rhythm: None,
        top_pitches: most_common_pitches(&counts, config.midi.top_pitch_count),
        normalized_density: normalized_density(&density),
        duration,
    };

    if let Some((file, path)) = image_name(out_dir, name, "piano_roll") {
        plots::piano_roll(&path, &instruments, duration, &format!("Piano Roll: {}", name), viz.piano_roll_size)
            .map_err(render_failed)?;
        result.piano_roll = Some(file);
    }

    if let Some((file, path)) = image_name(out_dir, name, "pitch_histogram") {
        plots::pitch_histogram(
            &path,
            &counts,
            &format!("Pitch Class Distribution: {}", name),
            viz.histogram_size,
        )
        .map_err(render_failed)?;
        result.pitch_histogram = Some(file);
    }

    if let Some((file, path)) = image_name(out_dir, name, "midi_rhythm") {
        plots::strength_grid(
            &path,
            &result.normalized_density,
            GridTint::Blue,
            &format!("MIDI Note Density Pattern: {}", name),
            viz.grid_size,
        )
        .map_err(render_failed)?;
        result.midi_rhythm = Some(file);
    }

    Ok(result)
}

/// Produce the visualization record for one sample
pub fn visualize_sample(sample: &Sample, out_dir: Option<&Path>, config: &Config) -> VisualizationRecord {
    let label = label_for(sample, config);
    let name = sample.name.as_str();

    let result = match sample.file_type {
        FileType::Midi => match MidiDocument::load(&sample.path) {
            Ok(document) => match midi_visualization(&document, name, out_dir, config) {
                Ok(midi) => VisualizationResult::Midi(midi),
                Err(failure) => VisualizationResult::Failed(failure),
            },
            Err(e) => failed(name, e),
        },
        FileType::Audio => {
            let rendered = load_audio_file(&sample.path).and_then(|(y, sr)| {
                validate_signal(&y, sr)?;
                if label == VisualLabel::Bass {
                    bass_visualization(&y, sr, name, out_dir, config).map(VisualizationResult::Bass)
                } else {
                    break_visualization(&y, sr, name, out_dir, config).map(VisualizationResult::Break)
                }
            });
            rendered.unwrap_or_else(|e| failed(name, e))
        }
        FileType::Unknown => failed(name, ElementError::UnsupportedType(sample.extension())),
    };

    VisualizationRecord { result, label }
}

fn failed(name: &str, err: ElementError) -> VisualizationResult {
    warn!("Error generating visualization for {}: {}", name, err);
    VisualizationResult::Failed(VisualizationFailure {
        error: err.to_string(),
        file_name: None,
    })
}

/// Visualize every discovered sample and write the metadata document.
///
/// Returns the records in discovery order.
pub fn run_visualization_pass(config: &Config) -> Result<Catalog<VisualizationRecord>> {
    let out_dir = config.paths.visualization_dir();
    std::fs::create_dir_all(&out_dir)?;
    let image_dir = config
        .visualization
        .generate_images
        .then_some(out_dir.as_path());

    let mut records = Catalog::new();
    for sample in discover_samples(&config.paths) {
        info!("Generating visualizations for {}...", sample.name);
        let record = visualize_sample(&sample, image_dir, config);
        records.insert(sample.name.clone(), record);
    }

    write_json(out_dir.join(METADATA_FILE), &records)?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_segment_strengths_normalized() {
        // 1 s at 512 Hz with hop 32: 16 frames per second
        let mut envelope = vec![0.0f32; 17];
        envelope[4] = 2.0;
        envelope[8] = 1.0;
        let strengths = segment_strengths(&envelope, 1.0, 512, 32, 16);
        assert_eq!(strengths.len(), 16);
        assert_abs_diff_eq!(strengths[4], 1.0);
        assert_abs_diff_eq!(strengths[8], 0.5);
        assert_abs_diff_eq!(strengths[0], 0.0);
    }

    #[test]
    fn test_segment_strengths_short_envelope() {
        // Segments shorter than a frame reuse their start frame
        let strengths = segment_strengths(&[1.0, 3.0], 0.05, 22050, 512, 16);
        assert_eq!(strengths.len(), 16);
        assert!(strengths.iter().all(|&s| (0.0..=1.0).contains(&s)));
        assert_eq!(segment_strengths(&[], 1.0, 22050, 512, 16), vec![0.0; 16]);
    }

    #[test]
    fn test_bass_movement_sampling() {
        let contour: Vec<Option<f32>> = (0..40)
            .map(|i| if i % 4 == 0 { None } else { Some(i as f32) })
            .collect();
        let movement = bass_movement(&contour, 16);
        // step = 40 / 16 = 2
        assert_eq!(movement.len(), 16);
        assert_eq!(movement[0], 0.0);
        assert_eq!(movement[1], 2.0);
        assert_eq!(movement[2], 0.0);

        let short = bass_movement(&[Some(50.0), None], 16);
        assert_eq!(short, vec![50.0, 0.0]);
    }

    #[test]
    fn test_normalized_density() {
        assert_eq!(normalized_density(&[0, 2, 4]), vec![0.0, 0.5, 1.0]);
        assert_eq!(normalized_density(&[0, 0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_smoothed_envelope_peak_is_one() {
        let mut y = vec![0.0f32; 1000];
        for sample in y.iter_mut().skip(400).take(200) {
            *sample = -0.5;
        }
        let env = smoothed_envelope(&y, 1000);
        assert_eq!(env.len(), y.len());
        assert_abs_diff_eq!(env.iter().copied().fold(0.0f32, f32::max), 1.0, epsilon = 1e-6);
        assert_eq!(env[0], 0.0);
    }

    #[test]
    fn test_labels() {
        let config = Config::default();
        assert_eq!(label_for(&Sample::new("samples/amen.wav"), &config), VisualLabel::Break);
        assert_eq!(label_for(&Sample::new("samples/reese.wav"), &config), VisualLabel::Bass);
        assert_eq!(label_for(&Sample::new("samples/atmos.wav"), &config), VisualLabel::Other);
        assert_eq!(label_for(&Sample::new("samples/midi/warm_pad.mid"), &config), VisualLabel::Ambient);
        assert_eq!(label_for(&Sample::new("samples/midi/atmos.mid"), &config), VisualLabel::Midi);
        assert_eq!(label_for(&Sample::new("samples/midi/foghorn.mid"), &config), VisualLabel::Bass);
    }

    #[test]
    fn test_failure_record_shape() {
        let record = VisualizationRecord {
            result: VisualizationResult::Failed(VisualizationFailure {
                error: "Invalid MIDI duration".to_string(),
                file_name: Some("empty".to_string()),
            }),
            label: VisualLabel::Midi,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["error"], "Invalid MIDI duration");
        assert_eq!(json["file_name"], "empty");
        assert_eq!(json["type"], "midi");
    }
}
