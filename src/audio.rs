//! Audio decoding and audio feature extraction

use crate::analysis::{finite, finite_seq};
use crate::config::{AudioConfig, Config};
use crate::error::{ElementError, Result};
use crate::plots;
use crate::spectral::{self, StftData};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hound::WavReader;
use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Fingerprint of an audio element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Length in seconds
    #[serde(serialize_with = "finite")]
    pub duration: f64,
    pub sample_rate: u32,
    /// Estimated tempo in BPM (0 when no periodicity was found)
    #[serde(serialize_with = "finite")]
    pub tempo: f64,
    pub onset_count: usize,
    /// Onsets per second
    #[serde(serialize_with = "finite")]
    pub onset_density: f64,
    /// Onset strength resampled to a fixed grid and scaled to [0, 1].
    /// Empty when the signal has no frames.
    #[serde(serialize_with = "finite_seq")]
    pub rhythm_pattern: Vec<f64>,
    #[serde(serialize_with = "finite")]
    pub spectral_centroid_mean: f64,
    #[serde(serialize_with = "finite")]
    pub spectral_bandwidth_mean: f64,
    #[serde(serialize_with = "finite")]
    pub rms_mean: f64,
    #[serde(serialize_with = "finite")]
    pub rms_max: f64,
    pub has_waveform_image: bool,
    pub has_spectrogram_image: bool,
    pub waveform_base64: Option<String>,
    pub spectrogram_base64: Option<String>,
}

/// Intermediate frame analysis shared by the extractor and the plots
#[derive(Debug, Clone)]
pub struct SignalAnalysis {
    pub stft: StftData,
    pub magnitude: Array2<f32>,
    pub onset_envelope: Vec<f32>,
    pub onset_frames: Vec<usize>,
}

impl SignalAnalysis {
    pub fn compute(y: &[f32], sample_rate: u32, config: &AudioConfig) -> Self {
        let stft = spectral::stft(y, config.n_fft, config.hop_length, sample_rate);
        let magnitude = spectral::magnitude_spectrogram(&stft);
        let onset_envelope = spectral::onset_strength(&magnitude);
        let onset_frames = spectral::onset_detect(&onset_envelope, &config.onset);
        Self {
            stft,
            magnitude,
            onset_envelope,
            onset_frames,
        }
    }

    pub fn onset_times(&self, sample_rate: u32, hop_length: usize) -> Vec<f64> {
        self.onset_frames
            .iter()
            .map(|&frame| spectral::frame_to_time(frame, sample_rate, hop_length) as f64)
            .collect()
    }
}

/// Load an audio file as mono samples at its native sample rate
pub fn load_audio_file<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "wav" => load_wav_file(path),
        "mp3" | "ogg" | "flac" => load_compressed_file(path),
        _ => Err(ElementError::UnsupportedType(format!(".{}", extension))),
    }
}

/// Load WAV file
fn load_wav_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.bits_per_sample > 32 {
        return Err(ElementError::Decode(format!(
            "Unsupported bit depth: {}",
            spec.bits_per_sample
        )));
    }

    let mut samples: Vec<f32> = Vec::with_capacity(reader.len() as usize);
    match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for sample in reader.samples::<i32>() {
                samples.push(sample? as f32 / max_value);
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                samples.push(sample?);
            }
        }
    }

    Ok((mix_to_mono(&samples, spec.channels as usize), spec.sample_rate))
}

/// Decode MP3/OGG/FLAC through symphonia
fn load_compressed_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.sample_rate.is_some())
        .ok_or_else(|| ElementError::Decode("no audio track found".to_string()))?
        .clone();

    let sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(0);

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track.id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(audio) => audio,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::DecodeError(msg)) => {
                debug!("Skipping corrupt packet in {}: {}", path.display(), msg);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if channels == 0 {
            channels = decoded.spec().channels.count();
        }
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    if channels == 0 {
        return Err(ElementError::Decode("unknown channel layout".to_string()));
    }

    Ok((mix_to_mono(&interleaved, channels), sample_rate))
}

/// Average interleaved channels into one
pub fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Reject input the frame features cannot be computed on
pub(crate) fn validate_signal(y: &[f32], sample_rate: u32) -> Result<()> {
    if sample_rate == 0 {
        return Err(ElementError::InvalidAudio(
            "sample rate must be positive".to_string(),
        ));
    }
    if let Some(idx) = y.iter().position(|x| !x.is_finite()) {
        return Err(ElementError::InvalidAudio(format!(
            "non-finite sample at index {}",
            idx
        )));
    }
    Ok(())
}

/// Compute the audio fingerprint of a decoded mono signal
pub fn extract_audio_features(y: &[f32], sample_rate: u32, config: &AudioConfig) -> Result<AudioFeatures> {
    validate_signal(y, sample_rate)?;
    let analysis = SignalAnalysis::compute(y, sample_rate, config);
    features_from_analysis(y, sample_rate, config, &analysis)
}

/// Reject a spectrogram that overflowed to NaN or infinities
pub(crate) fn ensure_finite_spectrum(magnitude: &Array2<f32>) -> Result<()> {
    if magnitude.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ElementError::InvalidAudio("non-finite spectrum".to_string()))
    }
}

/// Reject a summary holding NaN or infinities. Finite but huge samples
/// overflow the frame sums, so a valid signal can still produce these.
pub(crate) fn ensure_finite(field: &str, values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ElementError::InvalidAudio(format!("non-finite {}", field)))
    }
}

fn features_from_analysis(
    y: &[f32],
    sample_rate: u32,
    config: &AudioConfig,
    analysis: &SignalAnalysis,
) -> Result<AudioFeatures> {
    let duration = y.len() as f64 / sample_rate as f64;
    let onset_count = analysis.onset_frames.len();
    let onset_density = if duration > 0.0 {
        onset_count as f64 / duration
    } else {
        0.0
    };

    let tempo = spectral::estimate_tempo(
        &analysis.onset_envelope,
        sample_rate,
        config.hop_length,
        config.tempo_range_bpm,
    );

    let centroid = spectral::spectral_centroid(&analysis.magnitude, &analysis.stft.freqs);
    let bandwidth = spectral::spectral_bandwidth(&analysis.magnitude, &analysis.stft.freqs);
    let rms = spectral::rms_frames(y, config.n_fft, config.hop_length);
    let rms_max = rms.iter().copied().fold(0.0f32, f32::max);

    let features = AudioFeatures {
        duration,
        sample_rate,
        tempo: tempo as f64,
        onset_count,
        onset_density,
        rhythm_pattern: rhythm_pattern(&analysis.onset_envelope, config.rhythm_steps),
        spectral_centroid_mean: mean(&centroid),
        spectral_bandwidth_mean: mean(&bandwidth),
        rms_mean: mean(&rms),
        rms_max: rms_max as f64,
        ..AudioFeatures::default()
    };

    ensure_finite(
        "audio features",
        &[
            features.duration,
            features.tempo,
            features.onset_density,
            features.spectral_centroid_mean,
            features.spectral_bandwidth_mean,
            features.rms_mean,
            features.rms_max,
        ],
    )?;
    ensure_finite("rhythm pattern", &features.rhythm_pattern)?;
    Ok(features)
}

/// Resample an onset envelope to `steps` points by linear interpolation
/// over its index domain, then scale by the maximum.
///
/// An empty envelope gives an empty pattern; an all-zero one gives zeros.
pub fn rhythm_pattern(envelope: &[f32], steps: usize) -> Vec<f64> {
    if envelope.is_empty() || steps == 0 {
        return Vec::new();
    }

    let last = envelope.len() - 1;
    let resampled: Vec<f64> = (0..steps)
        .map(|i| {
            let pos = if steps > 1 {
                i as f64 * last as f64 / (steps - 1) as f64
            } else {
                0.0
            };
            let lo = (pos.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            let frac = pos - lo as f64;
            envelope[lo] as f64 * (1.0 - frac) + envelope[hi] as f64 * frac
        })
        .collect();

    let max = resampled.iter().copied().fold(0.0f64, f64::max);
    if max > 0.0 {
        resampled.iter().map(|v| v / max).collect()
    } else {
        resampled
    }
}

/// Mean of a frame feature, 0 for no frames
pub fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

/// Decode, extract and optionally render waveform/spectrogram images for
/// one audio file.
///
/// Images are written to `image_dir` as `<name>_waveform.png` and
/// `<name>_spectrogram.png`. A failed render is logged and leaves the
/// corresponding flag unset.
pub fn analyze_audio_file<P: AsRef<Path>>(
    path: P,
    name: &str,
    image_dir: Option<&Path>,
    config: &Config,
) -> Result<AudioFeatures> {
    let path = path.as_ref();
    let (y, sample_rate) = load_audio_file(path)?;
    validate_signal(&y, sample_rate)?;
    debug!(
        "Decoded {}: {} samples at {} Hz",
        path.display(),
        y.len(),
        sample_rate
    );

    let analysis = SignalAnalysis::compute(&y, sample_rate, &config.audio);
    let mut features = features_from_analysis(&y, sample_rate, &config.audio, &analysis)?;

    let image_dir = match image_dir {
        Some(dir) => dir,
        None => return Ok(features),
    };
    std::fs::create_dir_all(image_dir)?;

    let viz = &config.visualization;
    let (has_waveform, waveform_base64) = render_image(
        &image_dir.join(format!("{}_waveform.png", name)),
        viz.embed_base64,
        |out| plots::waveform(out, &y, sample_rate, &format!("Waveform: {}", name), viz.waveform_size),
    );
    features.has_waveform_image = has_waveform;
    features.waveform_base64 = waveform_base64;

    let db = spectral::amplitude_to_db(&analysis.magnitude);
    let (has_spectrogram, spectrogram_base64) = render_image(
        &image_dir.join(format!("{}_spectrogram.png", name)),
        viz.embed_base64,
        |out| {
            plots::spectrogram(
                out,
                &db,
                features.duration as f32,
                (0.0, sample_rate as f32 / 2.0),
                "Frequency (Hz)",
                &format!("Spectrogram: {}", name),
                viz.spectrogram_size,
            )
        },
    );
    features.has_spectrogram_image = has_spectrogram;
    features.spectrogram_base64 = spectrogram_base64;

    Ok(features)
}

/// Run a renderer and optionally read the PNG back as base64
fn render_image<F>(out: &Path, embed: bool, render: F) -> (bool, Option<String>)
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Err(e) = render(out) {
        warn!("Could not render {}: {}", out.display(), e);
        return (false, None);
    }
    if !embed {
        return (true, None);
    }
    match std::fs::read(out) {
        Ok(bytes) => (true, Some(BASE64.encode(bytes))),
        Err(e) => {
            warn!("Could not read back {}: {}", out.display(), e);
            (true, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rhythm_pattern_fixed_length_and_range() {
        let envelope: Vec<f32> = (0..100).map(|i| (i % 7) as f32).collect();
        let pattern = rhythm_pattern(&envelope, 16);
        assert_eq!(pattern.len(), 16);
        assert!(pattern.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_abs_diff_eq!(pattern.iter().copied().fold(0.0, f64::max), 1.0);
    }

    #[test]
    fn test_rhythm_pattern_interpolates() {
        // Two-frame envelope: points at 0, 1/15, ..., 1
        let pattern = rhythm_pattern(&[0.0, 3.0], 16);
        assert_abs_diff_eq!(pattern[0], 0.0);
        assert_abs_diff_eq!(pattern[15], 1.0);
        assert_abs_diff_eq!(pattern[5], 5.0 / 15.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rhythm_pattern_empty_and_zero() {
        assert!(rhythm_pattern(&[], 16).is_empty());
        assert_eq!(rhythm_pattern(&[0.0; 10], 16), vec![0.0; 16]);
        assert_eq!(rhythm_pattern(&[2.0], 16), vec![1.0; 16]);
    }

    #[test]
    fn test_mix_to_mono_averages_channels() {
        let mono = mix_to_mono(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
        assert_eq!(mix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_empty_signal_features() {
        let features = extract_audio_features(&[], 22050, &AudioConfig::default()).unwrap();
        assert_eq!(features.duration, 0.0);
        assert_eq!(features.onset_count, 0);
        assert_eq!(features.onset_density, 0.0);
        assert!(features.rhythm_pattern.is_empty());
        assert_eq!(features.rms_max, 0.0);
        assert_eq!(features.tempo, 0.0);
    }

    #[test]
    fn test_invalid_signal_is_rejected() {
        let config = AudioConfig::default();
        assert!(matches!(
            extract_audio_features(&[0.0; 10], 0, &config),
            Err(ElementError::InvalidAudio(_))
        ));
        assert!(matches!(
            extract_audio_features(&[0.0, f32::NAN], 22050, &config),
            Err(ElementError::InvalidAudio(_))
        ));
    }

    #[test]
    fn test_overflowing_signal_is_rejected() {
        let y: Vec<f32> = (0..8192).map(|i| if i % 2 == 0 { 3.0e38 } else { -3.0e38 }).collect();
        assert!(matches!(
            extract_audio_features(&y, 22050, &AudioConfig::default()),
            Err(ElementError::InvalidAudio(msg)) if msg.starts_with("non-finite")
        ));
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite("x", &[0.0, 1.5]).is_ok());
        assert!(ensure_finite("x", &[]).is_ok());
        assert!(ensure_finite("x", &[f64::NAN]).is_err());
        assert!(ensure_finite("x", &[1.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            load_audio_file("clip.aiff"),
            Err(ElementError::UnsupportedType(ext)) if ext == ".aiff"
        ));
    }

    #[test]
    fn test_mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_abs_diff_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
    }
}
