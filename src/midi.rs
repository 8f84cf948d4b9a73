//! MIDI reading and MIDI feature extraction

use crate::analysis::{finite, finite_opt, finite_seq};
use crate::config::{ChordOrder, Config, MidiConfig};
use crate::error::{ElementError, Result};
use log::debug;
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default tempo before any tempo event (120 BPM)
const DEFAULT_TEMPO_USPQ: u32 = 500_000;

/// A note with times in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub start: f64,
    pub end: f64,
    pub velocity: u8,
}

impl Note {
    pub fn new(pitch: u8, start: f64, end: f64, velocity: u8) -> Self {
        Self {
            pitch,
            start,
            end,
            velocity,
        }
    }

    pub fn pitch_class(&self) -> u8 {
        self.pitch % 12
    }
}

/// Notes sharing a track, channel and program
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub track: usize,
    pub channel: u8,
    pub program: u8,
    /// Track name, empty if the track has none
    pub name: String,
    pub is_drum: bool,
    pub notes: Vec<Note>,
}

/// A parsed Standard MIDI File
#[derive(Debug, Clone, PartialEq)]
pub struct MidiDocument {
    pub instruments: Vec<Instrument>,
    /// Latest note end or event time, in seconds
    pub end_time: f64,
}

impl MidiDocument {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)?;
        let clock = TickClock::new(&smf);

        let mut instruments: Vec<Instrument> = Vec::new();
        let mut index: HashMap<(usize, u8, u8), usize> = HashMap::new();
        let mut end_tick = 0u64;

        for (track_idx, track) in smf.tracks.iter().enumerate() {
            let name = track
                .iter()
                .find_map(|event| match event.kind {
                    TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                        Some(String::from_utf8_lossy(raw).trim().to_string())
                    }
                    _ => None,
                })
                .unwrap_or_default();

            let mut programs = [0u8; 16];
            // (channel, key) -> open (start tick, velocity, program)
            let mut open: HashMap<(u8, u8), Vec<(u64, u8, u8)>> = HashMap::new();
            let mut tick = 0u64;

            for event in track {
                tick += event.delta.as_int() as u64;

                match event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        end_tick = end_tick.max(tick);
                        let channel = channel.as_int();
                        match message {
                            MidiMessage::ProgramChange { program } => {
                                programs[channel as usize] = program.as_int();
                            }
                            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                                let program = programs[channel as usize];
                                open.entry((channel, key.as_int()))
                                    .or_default()
                                    .push((tick, vel.as_int(), program));
                            }
                            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                                let key = key.as_int();
                                let Some(started) = open.remove(&(channel, key)) else {
                                    continue;
                                };
                                for (start_tick, velocity, program) in started {
                                    let slot = *index.entry((track_idx, channel, program)).or_insert_with(|| {
                                        instruments.push(Instrument {
                                            track: track_idx,
                                            channel,
                                            program,
                                            name: name.clone(),
                                            is_drum: channel == 9,
                                            notes: Vec::new(),
                                        });
                                        instruments.len() - 1
                                    });
                                    instruments[slot].notes.push(Note::new(
                                        key,
                                        clock.seconds(start_tick),
                                        clock.seconds(tick),
                                        velocity,
                                    ));
                                }
                            }
                            _ => {}
                        }
                    }
                    TrackEventKind::Meta(MetaMessage::EndOfTrack) => {}
                    TrackEventKind::Meta(_) => end_tick = end_tick.max(tick),
                    _ => {}
                }
            }

            let dropped: usize = open.values().map(Vec::len).sum();
            if dropped > 0 {
                debug!("Track {}: dropped {} unterminated notes", track_idx, dropped);
            }
        }

        let note_end = instruments
            .iter()
            .flat_map(|inst| inst.notes.iter())
            .map(|note| note.end)
            .fold(0.0f64, f64::max);

        Ok(MidiDocument {
            instruments,
            end_time: note_end.max(clock.seconds(end_tick)),
        })
    }

    /// All notes, instrument by instrument
    pub fn notes(&self) -> Vec<Note> {
        self.instruments
            .iter()
            .flat_map(|inst| inst.notes.iter().copied())
            .collect()
    }

    pub fn non_empty_instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter().filter(|inst| !inst.notes.is_empty())
    }
}

/// Converts absolute ticks to seconds through the merged tempo map
struct TickClock {
    /// (tick, seconds at tick, microseconds per quarter note)
    segments: Vec<(u64, f64, u32)>,
    ticks_per_quarter: Option<f64>,
    seconds_per_tick: f64,
}

impl TickClock {
    fn new(smf: &Smf) -> Self {
        let (ticks_per_quarter, seconds_per_tick) = match smf.header.timing {
            Timing::Metrical(ppq) => (Some(ppq.as_int().max(1) as f64), 0.0),
            Timing::Timecode(fps, subframes) => {
                (None, 1.0 / (fps.as_f32() as f64 * subframes.max(1) as f64))
            }
        };

        let mut changes: Vec<(u64, u32)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(uspq)) = event.kind {
                    changes.push((tick, uspq.as_int()));
                }
            }
        }
        changes.sort_by_key(|&(tick, _)| tick);

        let mut clock = Self {
            segments: vec![(0, 0.0, DEFAULT_TEMPO_USPQ)],
            ticks_per_quarter,
            seconds_per_tick,
        };
        for (tick, uspq) in changes {
            let seconds = clock.seconds(tick);
            match clock.segments.last_mut() {
                Some(last) if last.0 == tick => last.2 = uspq,
                _ => clock.segments.push((tick, seconds, uspq)),
            }
        }
        clock
    }

    fn seconds(&self, tick: u64) -> f64 {
        let Some(ppq) = self.ticks_per_quarter else {
            return tick as f64 * self.seconds_per_tick;
        };
        let idx = self.segments.partition_point(|&(start, _, _)| start <= tick);
        let (start, offset, uspq) = self.segments[idx.saturating_sub(1)];
        offset + (tick - start) as f64 * uspq as f64 / 1e6 / ppq
    }
}

/// Notes starting together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordPattern {
    #[serde(serialize_with = "finite")]
    pub time: f64,
    /// Sorted, distinct pitch classes
    pub pitches: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceNote {
    pub pitch: u8,
    pub pitch_class: u8,
    #[serde(serialize_with = "finite")]
    pub start: f64,
    #[serde(serialize_with = "finite")]
    pub end: f64,
    #[serde(serialize_with = "finite")]
    pub velocity: f64,
}

impl From<&Note> for SequenceNote {
    fn from(note: &Note) -> Self {
        Self {
            pitch: note.pitch,
            pitch_class: note.pitch_class(),
            start: note.start,
            end: note.end,
            velocity: note.velocity as f64,
        }
    }
}

/// Fingerprint of a MIDI element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiFeatures {
    /// Notes per second
    #[serde(serialize_with = "finite")]
    pub note_density: f64,
    /// [lowest, highest] pitch
    pub pitch_range: [u8; 2],
    pub pitch_range_semitones: u8,
    #[serde(serialize_with = "finite")]
    pub average_velocity: f64,
    #[serde(serialize_with = "finite")]
    pub duration: f64,
    pub note_count: usize,
    #[serde(serialize_with = "finite_opt")]
    pub tempo_estimate: Option<f64>,
    pub most_common_pitches: Vec<u8>,
    #[serde(serialize_with = "finite_seq")]
    pub pitch_histogram: Vec<f64>,
    pub note_density_over_time: Vec<u32>,
    pub chord_patterns: Vec<ChordPattern>,
    pub note_sequence: Vec<SequenceNote>,
}

/// Compute the MIDI fingerprint of a note list ending at `end_time` seconds
pub fn extract_midi_features(notes: &[Note], end_time: f64, config: &MidiConfig) -> Result<MidiFeatures> {
    if notes.is_empty() {
        return Err(ElementError::EmptyInput(
            "No notes found in MIDI file".to_string(),
        ));
    }

    let note_count = notes.len();
    let min_pitch = notes.iter().map(|n| n.pitch).min().unwrap_or(0);
    let max_pitch = notes.iter().map(|n| n.pitch).max().unwrap_or(0);
    let average_velocity =
        notes.iter().map(|n| n.velocity as f64).sum::<f64>() / note_count as f64;
    let note_density = if end_time > 0.0 {
        note_count as f64 / end_time
    } else {
        0.0
    };

    let counts = pitch_class_counts(notes);

    let mut sorted: Vec<&Note> = notes.iter().collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));
    let note_sequence = sorted
        .iter()
        .take(config.max_sequence_notes)
        .map(|&note| SequenceNote::from(note))
        .collect();

    Ok(MidiFeatures {
        note_density,
        pitch_range: [min_pitch, max_pitch],
        pitch_range_semitones: max_pitch - min_pitch,
        average_velocity,
        duration: end_time,
        note_count,
        tempo_estimate: estimate_tempo(notes),
        most_common_pitches: most_common_pitches(&counts, config.top_pitch_count),
        pitch_histogram: pitch_histogram(notes),
        note_density_over_time: note_density_over_time(notes, end_time, config.density_segments),
        chord_patterns: detect_chords(notes, config.chord_tolerance_sec, config.max_chords, config.chord_order),
        note_sequence,
    })
}

/// Read a MIDI file and compute its fingerprint
pub fn analyze_midi_file<P: AsRef<Path>>(path: P, config: &Config) -> Result<MidiFeatures> {
    let document = MidiDocument::load(path)?;
    extract_midi_features(&document.notes(), document.end_time, &config.midi)
}

/// Occurrences of each pitch class
pub fn pitch_class_counts(notes: &[Note]) -> [u32; 12] {
    let mut counts = [0u32; 12];
    for note in notes {
        counts[note.pitch_class() as usize] += 1;
    }
    counts
}

/// Pitch-class distribution summing to 1, or 12 zeros for no notes
pub fn pitch_histogram(notes: &[Note]) -> Vec<f64> {
    let counts = pitch_class_counts(notes);
    let total: u32 = counts.iter().sum();
    if total == 0 {
        return vec![0.0; 12];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

/// The `n` most frequent pitch classes, ties going to the lower class
pub fn most_common_pitches(counts: &[u32; 12], n: usize) -> Vec<u8> {
    let mut classes: Vec<u8> = (0..12).collect();
    classes.sort_by(|&a, &b| counts[b as usize].cmp(&counts[a as usize]));
    classes.truncate(n);
    classes
}

/// Count of sounding notes in each of `segments` equal slices of `duration`.
///
/// A note counts in every slice from its start slice to its end slice.
pub fn note_density_over_time(notes: &[Note], duration: f64, segments: usize) -> Vec<u32> {
    let mut density = vec![0u32; segments];
    if !(duration > 0.0) || segments == 0 {
        return density;
    }

    let last = segments - 1;
    let segment_of = |t: f64| -> usize {
        let raw = (t / duration * segments as f64).floor();
        if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(last)
        }
    };

    for note in notes {
        let (first, final_seg) = (segment_of(note.start), segment_of(note.end));
        for slot in density.iter_mut().take(final_seg + 1).skip(first) {
            *slot += 1;
        }
    }
    density
}

/// Group notes whose onsets fall within `tolerance` seconds of the first
/// onset of their group and report each group of two or more notes.
pub fn detect_chords(notes: &[Note], tolerance: f64, max_chords: usize, order: ChordOrder) -> Vec<ChordPattern> {
    if !(tolerance > 0.0) {
        return Vec::new();
    }

    let mut by_start: Vec<usize> = (0..notes.len()).collect();
    by_start.sort_by(|&a, &b| notes[a].start.total_cmp(&notes[b].start));

    // (anchor start, first input index, member indices)
    let mut clusters: Vec<(f64, usize, Vec<usize>)> = Vec::new();
    for idx in by_start {
        let start = notes[idx].start;
        match clusters.last_mut() {
            Some((anchor, first, members)) if start - *anchor < tolerance => {
                *first = (*first).min(idx);
                members.push(idx);
            }
            _ => clusters.push((start, idx, vec![idx])),
        }
    }

    clusters.retain(|(_, _, members)| members.len() > 1);
    if order == ChordOrder::FirstSeen {
        clusters.sort_by_key(|&(_, first, _)| first);
    }

    clusters
        .into_iter()
        .take(max_chords)
        .map(|(anchor, _, members)| {
            let mut pitches: Vec<u8> = members.iter().map(|&i| notes[i].pitch_class()).collect();
            pitches.sort_unstable();
            pitches.dedup();
            ChordPattern {
                time: (anchor / tolerance).round_ties_even() * tolerance,
                pitches,
            }
        })
        .collect()
}

/// Best-effort tempo from clustered inter-onset intervals.
///
/// Intervals between consecutive onsets in (50 ms, 2 s) are grouped into
/// clusters 25 ms wide; the tempo is 60 / mean interval of the largest
/// cluster. None when no interval qualifies.
pub fn estimate_tempo(notes: &[Note]) -> Option<f64> {
    let mut onsets: Vec<f64> = notes.iter().map(|n| n.start).collect();
    onsets.sort_by(f64::total_cmp);

    // (mean interval, member count)
    let mut clusters: Vec<(f64, usize)> = Vec::new();
    for interval in onsets.windows(2).map(|w| w[1] - w[0]) {
        if !(interval > 0.05 && interval < 2.0) {
            continue;
        }
        let nearest = clusters
            .iter()
            .enumerate()
            .filter(|(_, (center, _))| (center - interval).abs() < 0.025)
            .min_by(|(_, (a, _)), (_, (b, _))| (a - interval).abs().total_cmp(&(b - interval).abs()))
            .map(|(i, _)| i);
        match nearest {
            Some(i) => {
                let (center, count) = &mut clusters[i];
                *center = (*center * *count as f64 + interval) / (*count + 1) as f64;
                *count += 1;
            }
            None => clusters.push((interval, 1)),
        }
    }

    let mut best: Option<(f64, usize)> = None;
    for &(center, count) in &clusters {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((center, count));
        }
    }
    best.map(|(center, _)| 60.0 / center)
}
