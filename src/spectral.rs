//! Spectral processing utilities (STFT, onset strength, frame features)
//!
//! Frames are centered: the signal is zero padded by `n_fft / 2` on both
//! sides, so frame `t` is centered on sample `t * hop_length` and a signal of
//! `n` samples yields `1 + n / hop_length` frames.

use crate::config::OnsetPickConfig;
use ndarray::Array2;
use rustfft::{num_complex::Complex32, FftPlanner};

/// STFT data structure
#[derive(Debug, Clone)]
pub struct StftData {
    /// Complex spectrum, (n_fft / 2 + 1) x n_frames
    pub s: Array2<Complex32>,
    pub freqs: Vec<f32>,
    pub times: Vec<f32>,
}

impl StftData {
    pub fn n_frames(&self) -> usize {
        self.s.shape()[1]
    }
}

/// Compute centered STFT of audio signal with a periodic Hann window
pub fn stft(y: &[f32], n_fft: usize, hop_length: usize, sample_rate: u32) -> StftData {
    let n_freq = n_fft / 2 + 1;
    let freqs: Vec<f32> = (0..n_freq)
        .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    if y.is_empty() || n_fft == 0 || hop_length == 0 {
        return StftData {
            s: Array2::<Complex32>::zeros((n_freq, 0)),
            freqs,
            times: Vec::new(),
        };
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);

    let pad = n_fft / 2;
    let n_frames = 1 + y.len() / hop_length;
    let mut s = Array2::<Complex32>::zeros((n_freq, n_frames));
    let window_fn = generate_window("hann", n_fft);

    let mut frame = vec![Complex32::new(0.0, 0.0); n_fft];
    for frame_idx in 0..n_frames {
        let start = (frame_idx * hop_length) as isize - pad as isize;

        for (i, slot) in frame.iter_mut().enumerate() {
            let pos = start + i as isize;
            let sample = if pos >= 0 {
                y.get(pos as usize).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            *slot = Complex32::new(sample * window_fn[i], 0.0);
        }

        fft.process(&mut frame);

        for (i, &val) in frame[..n_freq].iter().enumerate() {
            s[[i, frame_idx]] = val;
        }
    }

    let times = frames_to_time(n_frames, sample_rate, hop_length);

    StftData { s, freqs, times }
}

/// Generate window function
fn generate_window(window_type: &str, size: usize) -> Vec<f32> {
    match window_type {
        "hann" => (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
            .collect(),
        _ => vec![1.0; size],
    }
}

/// Start time in seconds of each of `n_frames` frames
pub fn frames_to_time(n_frames: usize, sample_rate: u32, hop_length: usize) -> Vec<f32> {
    (0..n_frames)
        .map(|i| frame_to_time(i, sample_rate, hop_length))
        .collect()
}

pub fn frame_to_time(frame: usize, sample_rate: u32, hop_length: usize) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    frame as f32 * hop_length as f32 / sample_rate as f32
}

/// Frame index containing time `t` (may be negative for negative times)
pub fn time_to_frame(t: f32, sample_rate: u32, hop_length: usize) -> i64 {
    if hop_length == 0 {
        return 0;
    }
    (t * sample_rate as f32 / hop_length as f32).floor() as i64
}

/// Compute magnitude spectrogram
pub fn magnitude_spectrogram(stft_data: &StftData) -> Array2<f32> {
    stft_data.s.map(|c| c.norm())
}

/// Onset strength envelope: positive spectral flux per frame.
///
/// The frame before the first one is treated as silence, so a signal that
/// starts loud has its strongest onset at frame 0.
pub fn onset_strength(mag_spec: &Array2<f32>) -> Vec<f32> {
    let (n_bins, n_frames) = (mag_spec.shape()[0], mag_spec.shape()[1]);
    let mut flux = vec![0.0; n_frames];

    for (t, value) in flux.iter_mut().enumerate() {
        let mut frame_flux = 0.0;
        for f in 0..n_bins {
            let prev = if t > 0 { mag_spec[[f, t - 1]] } else { 0.0 };
            let diff = mag_spec[[f, t]] - prev;
            if diff > 0.0 {
                frame_flux += diff;
            }
        }
        *value = frame_flux;
    }

    flux
}

/// Pick onset frames from an onset strength envelope
pub fn onset_detect(envelope: &[f32], pick: &OnsetPickConfig) -> Vec<usize> {
    if envelope.is_empty() {
        return Vec::new();
    }

    let min = envelope.iter().copied().fold(f32::INFINITY, f32::min);
    let max = envelope.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if !(range > 0.0) {
        return Vec::new();
    }
    let norm: Vec<f32> = envelope.iter().map(|&x| (x - min) / range).collect();
    let last_idx = norm.len() - 1;

    let mut onsets: Vec<usize> = Vec::new();
    for n in 0..norm.len() {
        let value = norm[n];

        let lo = n.saturating_sub(pick.pre_max);
        let hi = (n + pick.post_max).min(last_idx);
        let local_max = norm[lo..=hi].iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if value < local_max {
            continue;
        }

        let lo = n.saturating_sub(pick.pre_avg);
        let hi = (n + pick.post_avg).min(last_idx);
        let window = &norm[lo..=hi];
        let local_mean = window.iter().sum::<f32>() / window.len() as f32;
        if value < local_mean + pick.delta {
            continue;
        }

        if let Some(&prev) = onsets.last() {
            if n <= prev + pick.wait {
                continue;
            }
        }
        onsets.push(n);
    }

    onsets
}

/// Estimate tempo (BPM) by autocorrelation of the onset envelope.
///
/// Returns 0.0 when the envelope is too short for any lag in the tempo range
/// or has no periodic energy.
pub fn estimate_tempo(
    onset_env: &[f32],
    sample_rate: u32,
    hop_length: usize,
    tempo_range_bpm: [f32; 2],
) -> f32 {
    if onset_env.len() < 3 || sample_rate == 0 || hop_length == 0 {
        return 0.0;
    }

    let frames_per_minute = 60.0 * sample_rate as f32 / hop_length as f32;
    let min_lag = (frames_per_minute / tempo_range_bpm[1]).ceil().max(1.0) as usize;
    let max_lag = ((frames_per_minute / tempo_range_bpm[0]).floor() as usize).min(onset_env.len() / 2);

    let mut best_lag = 0usize;
    let mut best_score = 0.0f32;

    for lag in min_lag..=max_lag {
        let score: f32 = onset_env
            .iter()
            .zip(&onset_env[lag..])
            .map(|(&a, &b)| a * b)
            .sum();

        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_lag == 0 {
        return 0.0;
    }

    frames_per_minute / best_lag as f32
}

/// Spectral centroid per frame (0 for silent frames)
pub fn spectral_centroid(mag_spec: &Array2<f32>, freqs: &[f32]) -> Vec<f32> {
    let (n_bins, n_frames) = (mag_spec.shape()[0], mag_spec.shape()[1]);
    (0..n_frames)
        .map(|t| {
            let mut weighted_sum = 0.0f32;
            let mut total = 0.0f32;
            for f in 0..n_bins.min(freqs.len()) {
                let mag = mag_spec[[f, t]];
                weighted_sum += freqs[f] * mag;
                total += mag;
            }
            if total > 1e-10 {
                weighted_sum / total
            } else {
                0.0
            }
        })
        .collect()
}

/// Spectral bandwidth per frame: magnitude-weighted standard deviation
/// around the centroid
pub fn spectral_bandwidth(mag_spec: &Array2<f32>, freqs: &[f32]) -> Vec<f32> {
    let (n_bins, n_frames) = (mag_spec.shape()[0], mag_spec.shape()[1]);
    let centroids = spectral_centroid(mag_spec, freqs);

    (0..n_frames)
        .map(|t| {
            let centroid = centroids[t];
            let mut weighted_variance = 0.0f32;
            let mut total = 0.0f32;
            for f in 0..n_bins.min(freqs.len()) {
                let mag = mag_spec[[f, t]];
                let diff = freqs[f] - centroid;
                weighted_variance += diff * diff * mag;
                total += mag;
            }
            if total > 1e-10 {
                (weighted_variance / total).sqrt()
            } else {
                0.0
            }
        })
        .collect()
}

/// RMS energy of centered frames
pub fn rms_frames(y: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    if y.is_empty() || frame_length == 0 || hop_length == 0 {
        return Vec::new();
    }

    let pad = (frame_length / 2) as isize;
    let n_frames = 1 + y.len() / hop_length;

    (0..n_frames)
        .map(|t| {
            let start = (t * hop_length) as isize - pad;
            let lo = start.max(0) as usize;
            let hi = ((start + frame_length as isize).max(0) as usize).min(y.len());
            let energy: f32 = if lo < hi {
                y[lo..hi].iter().map(|&x| x * x).sum()
            } else {
                0.0
            };
            (energy / frame_length as f32).sqrt()
        })
        .collect()
}

/// Convert Hz to the Slaney mel scale
pub fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f32.ln() / 27.0;
    if hz < min_log_hz {
        hz / f_sp
    } else {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    }
}

pub fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f32.ln() / 27.0;
    if mel < min_log_mel {
        mel * f_sp
    } else {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    }
}

/// Triangular mel filterbank with Slaney area normalization,
/// n_mels x (n_fft / 2 + 1)
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f32> {
    let n_freq = n_fft / 2 + 1;
    let fft_freqs: Vec<f32> = (0..n_freq)
        .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let mel_max = hz_to_mel(sample_rate as f32 / 2.0);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut weights = Array2::<f32>::zeros((n_mels, n_freq));
    for m in 0..n_mels {
        let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        let enorm = 2.0 / (right - left).max(f32::EPSILON);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let lower = (f - left) / (center - left).max(f32::EPSILON);
            let upper = (right - f) / (right - center).max(f32::EPSILON);
            weights[[m, k]] = lower.min(upper).max(0.0) * enorm;
        }
    }

    weights
}

/// Mel power spectrogram from a magnitude spectrogram
pub fn mel_spectrogram(mag_spec: &Array2<f32>, sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f32> {
    let power = mag_spec.mapv(|m| m * m);
    mel_filterbank(sample_rate, n_fft, n_mels).dot(&power)
}

/// Convert power to dB relative to the maximum, floored at -80 dB
pub fn power_to_db(power: &Array2<f32>) -> Array2<f32> {
    const AMIN: f32 = 1e-10;
    const TOP_DB: f32 = 80.0;

    let reference = power.iter().copied().fold(0.0f32, f32::max).max(AMIN);
    let ref_db = 10.0 * reference.log10();
    power.mapv(|p| (10.0 * p.max(AMIN).log10() - ref_db).max(-TOP_DB))
}

pub fn amplitude_to_db(mag_spec: &Array2<f32>) -> Array2<f32> {
    power_to_db(&mag_spec.mapv(|m| m * m))
}

/// Dominant pitch per frame within [fmin, fmax].
///
/// Picks the strongest local spectral peak in range that exceeds 10% of the
/// frame's maximum magnitude, refined by parabolic interpolation.
pub fn pitch_contour(mag_spec: &Array2<f32>, freqs: &[f32], fmin: f32, fmax: f32) -> Vec<Option<f32>> {
    let (n_bins, n_frames) = (mag_spec.shape()[0], mag_spec.shape()[1]);
    if n_bins < 3 || freqs.len() < 2 {
        return vec![None; n_frames];
    }
    let freq_res = freqs[1] - freqs[0];
    let bin_min = ((fmin / freq_res).ceil() as usize).clamp(1, n_bins - 2);
    let bin_max = ((fmax / freq_res).floor() as usize).clamp(bin_min, n_bins - 2);

    (0..n_frames)
        .map(|t| {
            let column = mag_spec.column(t);
            let frame_max = column.iter().copied().fold(0.0f32, f32::max);
            if frame_max <= 0.0 {
                return None;
            }
            let threshold = 0.1 * frame_max;

            let mut best: Option<(usize, f32)> = None;
            for bin in bin_min..=bin_max {
                let (prev, curr, next) = (column[bin - 1], column[bin], column[bin + 1]);
                if curr > prev && curr > next && curr > threshold {
                    match best {
                        Some((_, mag)) if mag >= curr => {}
                        _ => best = Some((bin, curr)),
                    }
                }
            }

            best.map(|(bin, _)| {
                let (alpha, beta, gamma) = (column[bin - 1], column[bin], column[bin + 1]);
                let denom = alpha - 2.0 * beta + gamma;
                let p = if denom.abs() > f32::EPSILON {
                    0.5 * (alpha - gamma) / denom
                } else {
                    0.0
                };
                (bin as f32 + p) * freq_res
            })
        })
        .collect()
}
