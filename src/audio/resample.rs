//! Channel downmix and sample-rate conversion
//!
//! Rate conversion goes through rubato's polynomial `FastFixedIn`. The
//! capture path keeps one [`StreamResampler`] alive for the whole session so
//! filter state carries across device callback blocks; playback converts
//! each complete chunk with [`resample`].

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};

use crate::error::AudioError;

/// Input frames handed to rubato per call on the streaming path (10 ms)
fn stream_chunk_size(from_rate: u32) -> usize {
    (from_rate as usize / 100).max(64)
}

fn create_resampler(
    from_rate: u32,
    to_rate: u32,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(AudioError::UnsupportedFormat(format!(
            "cannot resample {} Hz to {} Hz",
            from_rate, to_rate
        )));
    }
    FastFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        chunk_size,
        1,
    )
    .map_err(|e| AudioError::UnsupportedFormat(format!("failed to create resampler: {}", e)))
}

/// Average interleaved channels into mono
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Mono resampler fed with arbitrarily sized blocks
///
/// Input is buffered until rubato's next fixed chunk is complete, so output
/// lags the input by at most one chunk. Equal rates pass straight through.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, AudioError> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(create_resampler(from_rate, to_rate, stream_chunk_size(from_rate))?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Input samples held back until the next chunk completes
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Resample one block, appending to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), AudioError> {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let planar = resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::StreamError(format!("resampling failed: {}", e)))?;
            if let Some(channel) = planar.into_iter().next() {
                out.extend(channel);
            }
        }
    }

    /// Drop buffered input and filter history
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
    }
}

/// One-shot conversion of a complete mono buffer
///
/// The result always holds `len * to_rate / from_rate` samples so a chunk's
/// rendered length matches its nominal duration.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let mut resampler = create_resampler(from_rate, to_rate, input.len())?;
    let planar = resampler
        .process(&[input], None)
        .map_err(|e| AudioError::StreamError(format!("resampling failed: {}", e)))?;
    let mut out = planar.into_iter().next().unwrap_or_default();

    let expected = (input.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let tail = out.last().copied().unwrap_or(0.0);
    out.resize(expected, tail);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, rate: u32, hz: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * hz * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix_to_mono(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_passthrough_at_equal_rates() {
        let mut r = StreamResampler::new(16_000, 16_000).unwrap();
        assert!(r.is_passthrough());
        let mut out = Vec::new();
        r.process(&[0.1, 0.2], &mut out).unwrap();
        assert_eq!(out, vec![0.1, 0.2]);
    }

    #[test]
    fn test_stream_holds_input_until_chunk_completes() {
        let mut r = StreamResampler::new(48_000, 16_000).unwrap();
        let mut out = Vec::new();

        r.process(&vec![0.0; 100], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(r.pending_len(), 100);

        r.process(&vec![0.0; 380], &mut out).unwrap();
        assert_eq!(r.pending_len(), 0);
        assert!((out.len() as i64 - 160).abs() <= 2, "got {}", out.len());
    }

    #[test]
    fn test_stream_output_tracks_rate_ratio_across_odd_blocks() {
        let input = sine(48_000, 48_000, 440.0);
        let mut r = StreamResampler::new(48_000, 16_000).unwrap();
        let mut out = Vec::new();
        for block in input.chunks(441) {
            r.process(block, &mut out).unwrap();
        }

        let produced = out.len() + r.pending_len() / 3;
        assert!((produced as i64 - 16_000).abs() <= 10, "got {}", produced);
        assert!(out.iter().all(|s| s.abs() <= 0.6));
    }

    #[test]
    fn test_reset_discards_pending_input() {
        let mut r = StreamResampler::new(44_100, 16_000).unwrap();
        let mut out = Vec::new();
        r.process(&[0.3; 50], &mut out).unwrap();
        r.reset();
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(matches!(
            StreamResampler::new(0, 16_000),
            Err(AudioError::UnsupportedFormat(_))
        ));
        assert!(resample(&[0.1; 10], 24_000, 0).is_err());
    }

    #[test]
    fn test_one_shot_length_matches_rate_ratio() {
        let out = resample(&vec![0.25; 2400], 24_000, 48_000).unwrap();
        assert_eq!(out.len(), 4800);
        // Settled region of a constant signal stays constant
        assert!(out[100..4700].iter().all(|s| (*s - 0.25).abs() < 0.01));
    }

    #[test]
    fn test_one_shot_downsample_length() {
        let out = resample(&sine(4410, 44_100, 220.0), 44_100, 16_000).unwrap();
        assert_eq!(out.len(), 1600);
    }

    #[test]
    fn test_one_shot_passthrough_and_empty() {
        assert_eq!(resample(&[0.1, 0.2], 24_000, 24_000).unwrap(), vec![0.1, 0.2]);
        assert!(resample(&[], 24_000, 48_000).unwrap().is_empty());
    }
}
