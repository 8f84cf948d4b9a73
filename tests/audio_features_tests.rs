//! Audio fingerprint tests on synthetic signals

use approx::assert_abs_diff_eq;
use element_analysis::audio::{analyze_audio_file, extract_audio_features, load_audio_file};
use element_analysis::config::{AudioConfig, Config};
use element_analysis::ElementError;
use std::f32::consts::PI;
use std::path::Path;
use tempfile::TempDir;

const SR: u32 = 22050;

/// Four unit impulses, 16 frames apart at hop 512
fn impulse_train() -> Vec<f32> {
    let mut y = vec![0.0f32; 30720];
    for k in 0..4 {
        y[256 + k * 16 * 512] = 1.0;
    }
    y
}

fn sine(freq: f32, seconds: f32) -> Vec<f32> {
    let n = (SR as f32 * seconds) as usize;
    (0..n)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / SR as f32).sin())
        .collect()
}

fn write_wav(path: &Path, y: &[f32], channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: SR,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in y {
        for _ in 0..channels {
            writer.write_sample((sample * 32767.0) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

#[test]
fn test_impulse_train_onsets_and_rhythm() {
    let y = impulse_train();
    let features = extract_audio_features(&y, SR, &AudioConfig::default()).unwrap();

    assert_eq!(features.sample_rate, SR);
    assert_abs_diff_eq!(features.duration, 30720.0 / 22050.0, epsilon = 1e-12);
    assert_eq!(features.onset_count, 4);
    assert_abs_diff_eq!(features.onset_density, 4.0 / features.duration, epsilon = 1e-9);

    let pattern = &features.rhythm_pattern;
    assert_eq!(pattern.len(), 16);
    assert_abs_diff_eq!(pattern[0], 1.0);
    for beat in [4, 8, 12] {
        assert!(pattern[beat] > 0.5, "step {} = {}", beat, pattern[beat]);
        assert!(pattern[beat] <= 1.0);
    }
    for off_beat in [1, 2, 3, 5, 6, 7] {
        assert!(pattern[off_beat] < 0.1, "step {} = {}", off_beat, pattern[off_beat]);
    }
}

#[test]
fn test_silence_has_no_onsets() {
    let features = extract_audio_features(&vec![0.0; 22050], SR, &AudioConfig::default()).unwrap();
    assert_eq!(features.onset_count, 0);
    assert_eq!(features.tempo, 0.0);
    assert_eq!(features.rms_max, 0.0);
    assert_eq!(features.rhythm_pattern, vec![0.0; 16]);
}

#[test]
fn test_low_sine_has_low_centroid() {
    let low = extract_audio_features(&sine(80.0, 1.0), SR, &AudioConfig::default()).unwrap();
    let high = extract_audio_features(&sine(4000.0, 1.0), SR, &AudioConfig::default()).unwrap();

    assert!(low.spectral_centroid_mean < 2000.0);
    assert!(high.spectral_centroid_mean > low.spectral_centroid_mean);
    assert!(low.rms_mean > 0.0);
    assert!(low.rms_max >= low.rms_mean);
}

#[test]
fn test_zero_length_audio() {
    let features = extract_audio_features(&[], SR, &AudioConfig::default()).unwrap();
    assert_eq!(features.duration, 0.0);
    assert_eq!(features.onset_count, 0);
    assert!(features.rhythm_pattern.is_empty());
    assert_eq!(features.spectral_centroid_mean, 0.0);
}

#[test]
fn test_wav_loading_mixes_to_mono() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stereo.wav");
    let y = sine(440.0, 0.25);
    write_wav(&path, &y, 2);

    let (loaded, sr) = load_audio_file(&path).unwrap();
    assert_eq!(sr, SR);
    assert_eq!(loaded.len(), y.len());
    for (a, b) in loaded.iter().zip(&y) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
    }
}

#[test]
fn test_analyze_without_images() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("amen_break.wav");
    write_wav(&path, &impulse_train(), 1);

    let features = analyze_audio_file(&path, "amen_break", None, &Config::default()).unwrap();
    assert_eq!(features.onset_count, 4);
    assert!(!features.has_waveform_image);
    assert!(!features.has_spectrogram_image);
    assert!(features.waveform_base64.is_none());
    assert!(features.spectrogram_base64.is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_analyze_with_images_embeds_png() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reese.wav");
    write_wav(&path, &sine(60.0, 0.5), 1);
    let image_dir = dir.path().join("images");

    let features =
        analyze_audio_file(&path, "reese", Some(&image_dir), &Config::default()).unwrap();

    if features.has_waveform_image {
        assert!(image_dir.join("reese_waveform.png").is_file());
        assert!(features.waveform_base64.as_deref().is_some_and(|b| !b.is_empty()));
    } else {
        assert!(features.waveform_base64.is_none());
    }
    if features.has_spectrogram_image {
        assert!(image_dir.join("reese_spectrogram.png").is_file());
    }
}

#[test]
fn test_corrupt_wav_is_decode_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.wav");
    std::fs::write(&path, b"RIFF not really").unwrap();

    assert!(matches!(
        load_audio_file(&path),
        Err(ElementError::Decode(_))
    ));
}
