//! End-to-end batch runs over a temporary samples directory

use element_analysis::config::Config;
use element_analysis::sample::discover_samples;
use element_analysis::{
    ElementAnalyzer, ElementCatalog, ElementType, FileType, Fingerprint, ANALYSIS_FILE,
    VISUALIZATION_FILE,
};
use midly::num::{u15, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

const SR: u32 = 22050;

fn write_impulses(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SR,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..30720usize {
        let value = if i >= 256 && (i - 256) % 8192 == 0 { i16::MAX } else { 0 };
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();
}

/// Full-scale float samples alternating around +-3e38
fn write_overflowing(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SR,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..8192 {
        writer.write_sample(if i % 2 == 0 { 3.0e38f32 } else { -3.0e38 }).unwrap();
    }
    writer.finalize().unwrap();
}

/// Quarter notes from `low` upwards, one per beat at 120 BPM
fn write_scale(path: &Path, low: u8, count: u8) {
    let mut track = Vec::new();
    for i in 0..count {
        let key = u7::new(low + i);
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn { key, vel: u7::new(100) },
            },
        });
        track.push(TrackEvent {
            delta: u28::new(480),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff { key, vel: u7::new(0) },
            },
        });
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    let mut smf = Smf::new(Header::new(Format::SingleTrack, Timing::Metrical(u15::new(480))));
    smf.tracks.push(track);
    smf.save(path).unwrap();
}

/// samples/{amen_break.wav, loop.wav, broken.flac, notes.txt, midi/{reese_bass.mid, lead.mid}}
fn sample_tree() -> (TempDir, Config) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("samples");
    std::fs::create_dir_all(input.join("midi")).unwrap();

    write_impulses(&input.join("amen_break.wav"));
    write_impulses(&input.join("loop.wav"));
    std::fs::write(input.join("broken.flac"), b"definitely not flac").unwrap();
    std::fs::write(input.join("notes.txt"), b"ignored").unwrap();
    write_scale(&input.join("midi").join("reese_bass.mid"), 36, 8);
    write_scale(&input.join("midi").join("lead.mid"), 72, 4);

    let mut config = Config::default();
    config.paths.input_dir = input;
    config.paths.output_dir = dir.path().join("data");
    config.visualization.generate_images = false;
    (dir, config)
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn test_discovery_order() {
    let (_dir, config) = sample_tree();
    let names: Vec<String> = discover_samples(&config.paths)
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["lead", "reese_bass", "amen_break", "loop", "broken"]);
}

#[test]
fn test_batch_writes_both_documents() {
    let (_dir, config) = sample_tree();
    let output_dir = config.paths.output_dir.clone();
    let analyzer = ElementAnalyzer::new(config);

    let summary = analyzer.run().unwrap().unwrap();
    assert_eq!(summary.element_count, 5);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.image_dir, None);
    assert_eq!(summary.analysis_path, output_dir.join(ANALYSIS_FILE));
    assert!(!output_dir.join("images").exists());

    let text = read(&summary.analysis_path);
    assert!(text.starts_with("{\n    \""));

    let doc: Value = serde_json::from_str(&text).unwrap();
    let keys: Vec<&str> = doc.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 5);

    let bass = &doc["reese_bass"];
    assert_eq!(bass["type"], "midi");
    assert_eq!(bass["element_type"], "bass");
    assert_eq!(bass["note_count"], 8);
    assert_eq!(bass["file_name"], "reese_bass.mid");
    assert_eq!(bass["extension"], ".mid");

    let lead = &doc["lead"];
    assert_eq!(lead["pitch_range"], serde_json::json!([72, 75]));
    assert_eq!(lead["element_type"], "unknown");

    let amen = &doc["amen_break"];
    assert_eq!(amen["type"], "audio");
    assert_eq!(amen["element_type"], "break");
    assert_eq!(amen["onset_count"], 4);
    assert_eq!(amen["has_waveform_image"], false);
    assert_eq!(amen["waveform_base64"], Value::Null);

    // Impulse train at ~2.9 onsets/s is dense enough for a break
    assert_eq!(doc["loop"]["element_type"], "break");

    let broken = &doc["broken"];
    assert_eq!(broken["type"], "audio");
    assert_eq!(broken["element_type"], "unknown");
    assert!(broken["error"].as_str().unwrap().starts_with("Audio decode failed"));
    assert_eq!(broken["file_name"], "broken.flac");
}

#[test]
fn test_analysis_document_round_trips() {
    let (_dir, config) = sample_tree();
    let analyzer = ElementAnalyzer::new(config);
    let summary = analyzer.run().unwrap().unwrap();

    let text = read(&summary.analysis_path);
    let catalog: ElementCatalog = serde_json::from_str(&text).unwrap();

    let names: Vec<&str> = catalog.names().collect();
    assert_eq!(names, vec!["lead", "reese_bass", "amen_break", "loop", "broken"]);

    let bass = catalog.get("reese_bass").unwrap();
    assert!(matches!(bass.fingerprint, Ok(Fingerprint::Midi(_))));
    assert_eq!(bass.element_type, ElementType::Bass);

    let broken = catalog.get("broken").unwrap();
    assert!(!broken.is_ok());
    assert_eq!(broken.file_type(), FileType::Audio);

    let again = element_analysis::analysis::to_json_string(&catalog).unwrap();
    assert_eq!(again, text);
}

#[test]
fn test_visualization_document() {
    let (_dir, config) = sample_tree();
    let analyzer = ElementAnalyzer::new(config);
    let summary = analyzer.run().unwrap().unwrap();

    let doc: Value = serde_json::from_str(&read(&summary.visualization_path)).unwrap();
    let keys: Vec<&str> = doc.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 5);

    let amen = &doc["amen_break"];
    assert_eq!(amen["name"], "amen_break");
    assert_eq!(amen["type"], "break");
    assert_eq!(amen["file_type"], "audio");
    assert_eq!(amen["rhythm_pattern"].as_array().unwrap().len(), 16);
    assert_eq!(amen["waveform_url"], Value::Null);

    let bass = &doc["reese_bass"];
    assert_eq!(bass["type"], "bass");
    assert_eq!(bass["file_type"], "midi");
    assert_eq!(bass["pitch_histogram"].as_array().unwrap().len(), 12);
    assert_eq!(bass["duration"], 4.0);

    let broken = &doc["broken"];
    assert_eq!(broken["duration"], 0.0);
    assert_eq!(broken["rhythm_pattern"], serde_json::json!([]));
}

#[test]
fn test_rerun_overwrites_outputs() {
    let (_dir, config) = sample_tree();
    let analyzer = ElementAnalyzer::new(config);
    let first = analyzer.run().unwrap().unwrap();
    let first_text = read(&first.analysis_path);
    let second = analyzer.run().unwrap().unwrap();
    assert_eq!(read(&second.analysis_path), first_text);
}

#[test]
fn test_empty_input_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.paths.input_dir = dir.path().join("samples");
    config.paths.output_dir = dir.path().join("data");
    std::fs::create_dir_all(&config.paths.input_dir).unwrap();

    let analyzer = ElementAnalyzer::new(config);
    assert!(analyzer.run().unwrap().is_none());
    assert!(!dir.path().join("data").exists());
}

#[test]
fn test_single_element_of_unknown_type() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("readme.txt");
    std::fs::write(&path, b"text").unwrap();

    let mut config = Config::default();
    config.visualization.generate_images = false;
    let record = ElementAnalyzer::new(config).analyze_element(&path);

    assert_eq!(record.element_type, ElementType::Unknown);
    let err = record.fingerprint.as_ref().unwrap_err();
    assert_eq!(err.message, "Unsupported file type: .txt");
    assert_eq!(err.file_type, FileType::Unknown);
    assert_eq!(record.metadata.extension, ".txt");
}

#[test]
fn test_validate_input_rejects_missing_directory() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.paths.input_dir = dir.path().join("missing");
    assert!(element_analysis::validate_input(&config).is_err());

    config.paths.input_dir = dir.path().to_path_buf();
    assert!(element_analysis::validate_input(&config).is_ok());
}

#[test]
fn test_overflowing_audio_is_stored_as_error() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("samples");
    std::fs::create_dir_all(&input).unwrap();
    write_impulses(&input.join("good_loop.wav"));
    write_overflowing(&input.join("loud.wav"));

    let mut config = Config::default();
    config.paths.input_dir = input;
    config.paths.output_dir = dir.path().join("data");
    config.visualization.generate_images = false;

    let summary = ElementAnalyzer::new(config).run().unwrap().unwrap();
    assert_eq!(summary.element_count, 2);
    assert_eq!(summary.failures, 1);

    let doc: Value = serde_json::from_str(&read(&summary.analysis_path)).unwrap();
    assert_eq!(doc["good_loop"]["onset_count"], 4);
    let loud = &doc["loud"];
    assert_eq!(loud["type"], "audio");
    assert_eq!(loud["element_type"], "unknown");
    assert!(loud["error"].as_str().unwrap().starts_with("Invalid audio: non-finite"));
    assert!(summary.visualization_path.is_file());
}
