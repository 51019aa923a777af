use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{audio::clamp_unit, AudioAnalysisFrame, BandEnergy, CinesonicError, Result};

const ONSET_GAIN: f32 = 12.0;
const ONSET_THRESHOLD: f32 = 0.6;
const MIN_ONSET_INTERVAL: f32 = 0.2;
const MAX_ONSET_HISTORY: usize = 32;
const BASS_CUTOFF_HZ: f32 = 250.0;
const MID_CUTOFF_HZ: f32 = 4_000.0;
const PITCH_FLOOR: f32 = 0.05;

/// Running metadata about the analysed stream.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub tempo_bpm: Option<f32>,
    pub duration_seconds: Option<f32>,
    pub onsets: usize,
}

/// Turns blocks of PCM samples into [`AudioAnalysisFrame`]s.
///
/// The runtime never pulls audio by itself; a host owns one of these (or an
/// equivalent) and hands the produced frames to the scene each tick.
pub struct FrameAnalyzer {
    sample_rate: u32,
    summary: AnalysisSummary,
    processed_samples: usize,
    last_rms: f32,
    last_onset: bool,
    onset_timestamps: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl FrameAnalyzer {
    /// Creates a new analyzer using the default 48 kHz sample rate.
    pub fn new() -> Self {
        Self::with_sample_rate(48_000)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            summary: AnalysisSummary {
                sample_rate,
                ..Default::default()
            },
            processed_samples: 0,
            last_rms: 0.0,
            last_onset: false,
            onset_timestamps: Vec::new(),
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn summary(&self) -> &AnalysisSummary {
        &self.summary
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clears the accumulated state while preserving configuration.
    pub fn reset(&mut self) {
        self.summary = AnalysisSummary {
            sample_rate: self.sample_rate,
            ..Default::default()
        };
        self.processed_samples = 0;
        self.last_rms = 0.0;
        self.last_onset = false;
        self.onset_timestamps.clear();
    }

    /// Consumes one block of mono samples and returns its feature frame.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<AudioAnalysisFrame> {
        if samples.len() < 2 {
            return Err(CinesonicError::InvalidInput(
                "analysis requires blocks with at least two samples",
            ));
        }

        let block_size = samples.len();
        let sample_rate = self.sample_rate as f32;
        let start_time = self.processed_samples as f32 / sample_rate;
        let end_time = (self.processed_samples + block_size) as f32 / sample_rate;
        let timestamp = start_time + (end_time - start_time) * 0.5;

        let rms = compute_rms(samples);
        let onset = self.detect_onset(timestamp, rms);
        let frequency_bins = self.compute_spectrum(samples)?;
        let bin_hz = sample_rate / block_size as f32;
        let energy = band_energy(&frequency_bins, bin_hz);
        let pitch_hz = estimate_pitch(&frequency_bins, bin_hz);

        self.processed_samples += block_size;
        self.summary.duration_seconds = Some(end_time);

        Ok(AudioAnalysisFrame {
            frequency_bins,
            time_domain: samples.to_vec(),
            tempo_bpm: self.summary.tempo_bpm,
            energy,
            onset,
            pitch_hz,
            rms,
        })
    }

    /// Rising-edge detector: an onset is reported for exactly one frame and a
    /// new one needs both a fresh attack and the minimum spacing.
    fn detect_onset(&mut self, timestamp: f32, rms: f32) -> bool {
        let delta = (rms - self.last_rms).max(0.0);
        self.last_rms = rms;
        let confidence = (delta * ONSET_GAIN).clamp(0.0, 1.0);

        let spaced = self
            .onset_timestamps
            .last()
            .map(|last| timestamp - last >= MIN_ONSET_INTERVAL)
            .unwrap_or(true);
        let onset = confidence >= ONSET_THRESHOLD && spaced && !self.last_onset;
        self.last_onset = onset;

        if onset {
            self.summary.onsets += 1;
            self.onset_timestamps.push(timestamp);
            if self.onset_timestamps.len() > MAX_ONSET_HISTORY {
                let overflow = self.onset_timestamps.len() - MAX_ONSET_HISTORY;
                self.onset_timestamps.drain(0..overflow);
            }
            self.update_tempo_estimate();
        }

        onset
    }

    fn update_tempo_estimate(&mut self) {
        if self.onset_timestamps.len() < 2 {
            return;
        }

        let mut sum = 0.0;
        let mut count = 0;
        for window in self.onset_timestamps.windows(2) {
            let interval = window[1] - window[0];
            if interval > f32::EPSILON {
                sum += interval;
                count += 1;
            }
        }

        if count > 0 {
            let average_interval = sum / count as f32;
            if average_interval > 0.0 {
                self.summary.tempo_bpm = Some(60.0 / average_interval);
            }
        }
    }

    fn compute_spectrum(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let len = samples.len();
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        // A full-scale sinusoid under a Hann window peaks at roughly len / 4.
        let reference = (len as f32 * 0.25).max(1.0);
        Ok(fft
            .spectrum
            .iter()
            .map(|bin| clamp_unit(bin.norm() / reference))
            .collect())
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let resources = match self.fft.take() {
            Some(fft) if fft.size == size => fft,
            _ => {
                let plan = self.fft_planner.plan_fft_forward(size);
                let scratch = plan.make_scratch_vec();
                let spectrum = plan.make_output_vec();
                let input = plan.make_input_vec();
                FftResources {
                    size,
                    plan,
                    scratch,
                    spectrum,
                    input,
                }
            }
        };

        self.fft.insert(resources)
    }
}

impl Default for FrameAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for FrameAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("summary", &self.summary)
            .field("processed_samples", &self.processed_samples)
            .field("last_rms", &self.last_rms)
            .finish()
    }
}

fn band_energy(bins: &[f32], bin_hz: f32) -> BandEnergy {
    let mut bass = 0.0;
    let mut mid = 0.0;
    let mut high = 0.0;
    for (i, magnitude) in bins.iter().enumerate() {
        let power = magnitude * magnitude;
        let hz = i as f32 * bin_hz;
        if hz < BASS_CUTOFF_HZ {
            bass += power;
        } else if hz < MID_CUTOFF_HZ {
            mid += power;
        } else {
            high += power;
        }
    }
    let total = bass + mid + high;
    BandEnergy::new(bass.sqrt(), mid.sqrt(), high.sqrt(), total.sqrt())
}

fn estimate_pitch(bins: &[f32], bin_hz: f32) -> Option<f32> {
    bins.iter()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .filter(|(_, magnitude)| **magnitude >= PITCH_FLOOR)
        .map(|(index, _)| index as f32 * bin_hz)
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
