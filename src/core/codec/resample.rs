//! Per-frame integer-ratio resampling.
//!
//! Resampling never carries state between frames: each frame is converted on
//! its own, so the codec can be shared freely across sessions.

use super::FormatError;

/// Resample `samples` from `from_hz` to `to_hz`.
///
/// Only integer ratios are supported (8k <-> 16k, 24k -> 8k, ...).
pub fn resample(samples: &[i16], from_hz: u32, to_hz: u32) -> Result<Vec<i16>, FormatError> {
    if from_hz == 0 || to_hz == 0 {
        return Err(FormatError::UnsupportedRate {
            from: from_hz,
            to: to_hz,
        });
    }

    if from_hz == to_hz {
        return Ok(samples.to_vec());
    }

    if to_hz % from_hz == 0 {
        Ok(upsample_linear(samples, (to_hz / from_hz) as usize))
    } else if from_hz % to_hz == 0 {
        Ok(decimate(samples, (from_hz / to_hz) as usize))
    } else {
        Err(FormatError::UnsupportedRate {
            from: from_hz,
            to: to_hz,
        })
    }
}

/// Linear interpolation between neighbouring samples. The final sample is held.
fn upsample_linear(samples: &[i16], factor: usize) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * factor);
    for (i, &current) in samples.iter().enumerate() {
        let next = samples.get(i + 1).copied().unwrap_or(current);
        for step in 0..factor {
            let delta = (next as i32 - current as i32) * step as i32 / factor as i32;
            out.push((current as i32 + delta) as i16);
        }
    }
    out
}

/// Box-filter decimation: each output sample is the mean of `factor` inputs.
fn decimate(samples: &[i16], factor: usize) -> Vec<i16> {
    samples
        .chunks(factor)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
            (sum / chunk.len() as i32) as i16
        })
        .collect()
}
