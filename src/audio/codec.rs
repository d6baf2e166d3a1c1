//! # Telephony Codec Bridge
//!
//! G.711 μ-law companding between the 8-bit logarithmic line format and
//! linear 16-bit PCM, plus the encode path that takes synthesis output at
//! an arbitrary (integer-multiple) sample rate down to the 8 kHz line.
//!
//! ## Companding scheme:
//! Each μ-law byte packs a sign bit, a 3-bit segment (exponent), and a
//! 4-bit mantissa, with every bit inverted on the wire. Decoding is a
//! straight 256-entry table lookup; encoding clips the magnitude, adds the
//! standard bias, finds the segment, extracts the mantissa, and inverts.
//!
//! Both directions are pure functions over their inputs: no shared state,
//! safe to run concurrently on frames from different calls.

use crate::audio::{resample, AudioFrame, FrameFormat, PcmAudio};

/// Standard μ-law bias added to the magnitude before segment search.
const BIAS: i32 = 0x84;

/// Maximum magnitude representable after bias (clip point).
const CLIP: i32 = 32635;

/// Segment (exponent) for a biased magnitude, indexed by `magnitude >> 7`.
const SEGMENT_TABLE: [u8; 256] = [
    0, 0, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 3, 3, //
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, //
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, //
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, //
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, //
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, //
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, //
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
];

/// Linear value for each μ-law byte as it appears on the wire
/// (already accounting for the wire-level bit inversion).
const EXPAND_TABLE: [i16; 256] = [
    -32124, -31100, -30076, -29052, -28028, -27004, -25980, -24956, //
    -23932, -22908, -21884, -20860, -19836, -18812, -17788, -16764, //
    -15996, -15484, -14972, -14460, -13948, -13436, -12924, -12412, //
    -11900, -11388, -10876, -10364, -9852, -9340, -8828, -8316, //
    -7932, -7676, -7420, -7164, -6908, -6652, -6396, -6140, //
    -5884, -5628, -5372, -5116, -4860, -4604, -4348, -4092, //
    -3900, -3772, -3644, -3516, -3388, -3260, -3132, -3004, //
    -2876, -2748, -2620, -2492, -2364, -2236, -2108, -1980, //
    -1884, -1820, -1756, -1692, -1628, -1564, -1500, -1436, //
    -1372, -1308, -1244, -1180, -1116, -1052, -988, -924, //
    -876, -844, -812, -780, -748, -716, -684, -652, //
    -620, -588, -556, -524, -492, -460, -428, -396, //
    -372, -356, -340, -324, -308, -292, -276, -260, //
    -244, -228, -212, -196, -180, -164, -148, -132, //
    -120, -112, -104, -96, -88, -80, -72, -64, //
    -56, -48, -40, -32, -24, -16, -8, 0, //
    32124, 31100, 30076, 29052, 28028, 27004, 25980, 24956, //
    23932, 22908, 21884, 20860, 19836, 18812, 17788, 16764, //
    15996, 15484, 14972, 14460, 13948, 13436, 12924, 12412, //
    11900, 11388, 10876, 10364, 9852, 9340, 8828, 8316, //
    7932, 7676, 7420, 7164, 6908, 6652, 6396, 6140, //
    5884, 5628, 5372, 5116, 4860, 4604, 4348, 4092, //
    3900, 3772, 3644, 3516, 3388, 3260, 3132, 3004, //
    2876, 2748, 2620, 2492, 2364, 2236, 2108, 1980, //
    1884, 1820, 1756, 1692, 1628, 1564, 1500, 1436, //
    1372, 1308, 1244, 1180, 1116, 1052, 988, 924, //
    876, 844, 812, 780, 748, 716, 684, 652, //
    620, 588, 556, 524, 492, 460, 428, 396, //
    372, 356, 340, 324, 308, 292, 276, 260, //
    244, 228, 212, 196, 180, 164, 148, 132, //
    120, 112, 104, 96, 88, 80, 72, 64, //
    56, 48, 40, 32, 24, 16, 8, 0,
];

/// Expand one μ-law byte to a linear 16-bit sample.
#[inline]
pub fn mulaw_decode_sample(byte: u8) -> i16 {
    EXPAND_TABLE[byte as usize]
}

/// Compand one linear 16-bit sample to a μ-law byte.
///
/// ## Steps:
/// 1. Split off the sign, clip the magnitude at the format maximum
/// 2. Add the standard bias so the segment boundaries line up
/// 3. Look up the segment, extract the 4 mantissa bits below it
/// 4. Invert the assembled byte (wire convention)
#[inline]
pub fn mulaw_encode_sample(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    // Widen before negating; -32768 has no i16 counterpart
    let mut magnitude = (sample as i32).abs();
    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    let segment = SEGMENT_TABLE[(magnitude >> 7) as usize];
    let mantissa = ((magnitude >> (segment + 3)) & 0x0F) as u8;

    !(sign | (segment << 4) | mantissa)
}

/// Decode a μ-law byte sequence to linear PCM at 8 kHz.
///
/// Total over all inputs: every byte value is a valid μ-law sample, and
/// zero-length input yields zero-length output.
pub fn mulaw_decode(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| mulaw_decode_sample(b)).collect()
}

/// Compand 8 kHz linear PCM samples to μ-law bytes, one byte per sample.
pub fn mulaw_encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| mulaw_encode_sample(s)).collect()
}

/// Decode any pipeline frame to linear PCM.
///
/// μ-law frames expand to 8 kHz PCM; PCM frames are parsed from their
/// little-endian byte form.
pub fn decode_frame(frame: &AudioFrame) -> anyhow::Result<PcmAudio> {
    match frame.format {
        FrameFormat::Mulaw8k => Ok(PcmAudio::new(mulaw_decode(&frame.data), 8000)),
        FrameFormat::Pcm16 { sample_rate } => Ok(PcmAudio::new(
            crate::audio::le_bytes_to_pcm(&frame.data)?,
            sample_rate,
        )),
    }
}

/// Encode linear PCM at any supported rate into telephony μ-law bytes.
///
/// ## Process:
/// 1. Downsample to 8 kHz with an averaging low-pass (see `resample`);
///    plain decimation aliases everything above 4 kHz into the band
/// 2. Compand each 8 kHz sample to one μ-law byte
///
/// Output length is `samples / (sample_rate / 8000)` bytes.
pub fn encode_to_telephony(audio: &PcmAudio) -> anyhow::Result<Vec<u8>> {
    let line_rate = resample::downsample_to_8k(&audio.samples, audio.sample_rate)?;
    Ok(mulaw_encode(&line_rate))
}
