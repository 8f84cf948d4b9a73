//! Classification rules over audio and MIDI fingerprints

use element_analysis::config::{ClassificationConfig, MidiConfig};
use element_analysis::midi::{extract_midi_features, Note};
use element_analysis::{
    classify, AudioFeatures, Classifier, ElementType, ExtractionError, FileType, Fingerprint,
    Outcome,
};

fn midi(notes: &[Note], end_time: f64) -> Outcome {
    Ok(Fingerprint::Midi(
        extract_midi_features(notes, end_time, &MidiConfig::default()).unwrap(),
    ))
}

fn audio(onset_density: f64, spectral_centroid_mean: f64) -> Outcome {
    Ok(Fingerprint::Audio(AudioFeatures {
        onset_density,
        spectral_centroid_mean,
        ..AudioFeatures::default()
    }))
}

#[test]
fn test_midi_low_register_is_bass() {
    let notes = [Note::new(36, 0.0, 0.5, 100), Note::new(59, 0.5, 1.0, 100)];
    assert_eq!(classify("riff", &midi(&notes, 1.0)), ElementType::Bass);
}

#[test]
fn test_midi_sparse_high_notes_are_ambient() {
    let notes = [Note::new(72, 0.0, 4.0, 60), Note::new(79, 4.0, 8.0, 60)];
    // 2 notes over 8 s
    assert_eq!(classify("swell", &midi(&notes, 8.0)), ElementType::Ambient);
}

#[test]
fn test_midi_dense_high_notes_are_unknown() {
    let notes: Vec<Note> = (0..8)
        .map(|i| Note::new(72 + i, i as f64 * 0.25, i as f64 * 0.25 + 0.2, 100))
        .collect();
    assert_eq!(classify("lead", &midi(&notes, 2.0)), ElementType::Unknown);
}

#[test]
fn test_pitch_60_is_not_bass() {
    let notes = [Note::new(60, 0.0, 0.5, 100), Note::new(60, 0.5, 1.0, 100)];
    assert_eq!(classify("riff", &midi(&notes, 1.0)), ElementType::Unknown);
}

#[test]
fn test_name_beats_features() {
    let notes = [Note::new(36, 0.0, 0.5, 100), Note::new(40, 0.5, 1.0, 100)];
    assert_eq!(
        classify("Ambient_drone", &midi(&notes, 1.0)),
        ElementType::Ambient
    );
    assert_eq!(
        classify("PERCUSSION_kit", &audio(0.1, 5000.0)),
        ElementType::Drums
    );
}

#[test]
fn test_break_threshold_is_strict() {
    assert_eq!(classify("x", &audio(1.5, 5000.0)), ElementType::Unknown);
    assert_eq!(classify("x", &audio(1.51, 5000.0)), ElementType::Break);
}

#[test]
fn test_failure_ignores_keywords() {
    let failed: Outcome = Err(ExtractionError::new(FileType::Midi, "MIDI parse failed: eof"));
    assert_eq!(classify("reese_bass", &failed), ElementType::Unknown);
}

#[test]
fn test_custom_thresholds() {
    let classifier = Classifier::new(ClassificationConfig {
        break_onset_density: 5.0,
        bass_centroid_hz: 500.0,
        ..ClassificationConfig::default()
    });
    assert_eq!(
        classifier.classify("loop", &audio(3.0, 400.0)),
        ElementType::Bass
    );
    assert_eq!(
        classifier.classify("loop", &audio(3.0, 1000.0)),
        ElementType::Unknown
    );
}
