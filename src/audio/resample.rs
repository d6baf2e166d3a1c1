//! # Sample-Rate Conversion
//!
//! Downsampling from the synthesis engine's native rate to the 8 kHz
//! telephony line rate.
//!
//! Plain decimation (keeping every Nth sample) folds everything above the
//! new Nyquist frequency back into the audible band as aliasing noise, so
//! each output sample is instead the average of its full decimation window
//! (a boxcar low-pass applied in the same pass as the rate change).
//! Supported input rates are integer multiples of 8 kHz (8/16/24/32/48 kHz
//! cover the synthesis engines in practice); anything else is an error the
//! caller treats as a failed synthesis turn.

/// Telephony line rate in Hz.
pub const TELEPHONY_RATE: u32 = 8000;

/// Downsample 16-bit PCM from `sample_rate` to 8 kHz.
///
/// ## Behavior:
/// - 8 kHz input is returned unchanged
/// - integer multiples of 8 kHz are averaged over each window of
///   `sample_rate / 8000` input samples (a trailing partial window is
///   averaged over the samples it has)
/// - non-integer ratios are rejected
pub fn downsample_to_8k(samples: &[i16], sample_rate: u32) -> anyhow::Result<Vec<i16>> {
    if sample_rate == TELEPHONY_RATE {
        return Ok(samples.to_vec());
    }

    if sample_rate == 0 || sample_rate % TELEPHONY_RATE != 0 {
        return Err(anyhow::anyhow!(
            "unsupported sample rate {} Hz: must be a multiple of {} Hz",
            sample_rate,
            TELEPHONY_RATE
        ));
    }

    let factor = (sample_rate / TELEPHONY_RATE) as usize;
    let mut output = Vec::with_capacity(samples.len() / factor + 1);

    for window in samples.chunks(factor) {
        let sum: i32 = window.iter().map(|&s| s as i32).sum();
        output.push((sum / window.len() as i32) as i16);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_at_line_rate() {
        let samples = vec![1i16, 2, 3, 4];
        assert_eq!(downsample_to_8k(&samples, 8000).unwrap(), samples);
    }

    #[test]
    fn test_halving_from_16k() {
        let samples = vec![100i16, 200, 300, 400, 500, 600];
        let out = downsample_to_8k(&samples, 16000).unwrap();
        assert_eq!(out, vec![150, 350, 550]);
    }

    #[test]
    fn test_third_from_24k() {
        let samples = vec![300i16, 600, 900, 1200, 1500, 1800];
        let out = downsample_to_8k(&samples, 24000).unwrap();
        assert_eq!(out, vec![600, 1500]);
    }

    /// A full-scale signal alternating at the input Nyquist rate would
    /// survive naive decimation at full amplitude; the averaging window
    /// must cancel it to (near) silence.
    #[test]
    fn test_nyquist_alternation_is_attenuated() {
        let samples: Vec<i16> = (0..320)
            .map(|i| if i % 2 == 0 { 12000 } else { -12000 })
            .collect();
        let out = downsample_to_8k(&samples, 16000).unwrap();
        assert_eq!(out.len(), 160);
        assert!(
            out.iter().all(|&s| s.abs() < 16),
            "aliased energy leaked through the averaging filter"
        );
    }

    #[test]
    fn test_partial_trailing_window() {
        let samples = vec![100i16, 200, 300, 400, 500];
        let out = downsample_to_8k(&samples, 16000).unwrap();
        assert_eq!(out, vec![150, 350, 500]);
    }

    #[test]
    fn test_non_integer_ratio_rejected() {
        assert!(downsample_to_8k(&[0i16; 100], 44100).is_err());
        assert!(downsample_to_8k(&[0i16; 100], 11025).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(downsample_to_8k(&[], 16000).unwrap().is_empty());
    }
}
