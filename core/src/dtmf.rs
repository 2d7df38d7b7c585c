//! In-band DTMF detection over 8 kHz telephony audio.
//!
//! An eight-bin Goertzel filter bank runs over fixed 102-sample frames in
//! Q15 fixed point. A digit is reported when exactly one row tone and one
//! column tone dominate the frame, and only after the decision has held for
//! three consecutive frames, which suppresses spurious hits during speech.
//! Very short tones (40 ms) are still caught; the known weakness is tone
//! pairs with strongly different levels, as produced by acoustically coupled
//! dialers.

use log::{debug, warn};

use crate::audio::Law;

/// Samples per analysis frame.
pub const DTMF_NPOINTS: usize = 102;

/// Squared-magnitude floor below which a bin is not a tone.
pub const DTMF_THRESH: i64 = 200_000;

/// Pending digits kept between drains of the output buffer.
const MAX_DIGITS: usize = 64;

/// `2 * cos(2 * pi * f / 8000)` in Q15 for the row tones 697/770/852/941 Hz
/// and the column tones 1209/1336/1477/1633 Hz.
const COS2PIK: [i64; 8] = [55960, 53912, 51402, 48438, 38146, 32650, 26170, 18630];

/// Keypad layout indexed by (row tone, column tone).
const DIGIT_MATRIX: [[u8; 4]; 4] = [
    [b'1', b'2', b'3', b'A'],
    [b'4', b'5', b'6', b'B'],
    [b'7', b'8', b'9', b'C'],
    [b'*', b'0', b'#', b'D'],
];

/// What the byte stream handed to [`DtmfDecoder::decode`] contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfFormat {
    /// G.711 A-law audio.
    ALaw,
    /// G.711 μ-law audio.
    ULaw,
    /// 32-byte chunks of eight little-endian `i32` squared magnitudes from a
    /// hardware tone decoder; the Goertzel bank is bypassed.
    HfcCoefficients,
}

impl From<Law> for DtmfFormat {
    fn from(law: Law) -> Self {
        match law {
            Law::ALaw => DtmfFormat::ALaw,
            Law::ULaw => DtmfFormat::ULaw,
        }
    }
}

/// Per-channel DTMF decoder state.
pub struct DtmfDecoder {
    buffer: [i16; DTMF_NPOINTS],
    size: usize,
    last_what: u8,
    last_digit: u8,
    count: u8,
    digits: Vec<u8>,
}

impl DtmfDecoder {
    pub fn new() -> Self {
        DtmfDecoder {
            buffer: [0; DTMF_NPOINTS],
            size: 0,
            last_what: 0,
            last_digit: 0,
            count: 0,
            digits: Vec::with_capacity(MAX_DIGITS),
        }
    }

    /// Drop all accumulated samples, hysteresis state and pending digits.
    pub fn reset(&mut self) {
        self.size = 0;
        self.last_what = 0;
        self.last_digit = 0;
        self.count = 0;
        self.digits.clear();
    }

    /// Feed a received byte stream and return the digits emitted by it.
    ///
    /// Partial frames carry over: whatever does not fill a complete analysis
    /// frame is kept for the next call. The returned slice only holds digits
    /// newly emitted by this call.
    pub fn decode(&mut self, mut data: &[u8], fmt: DtmfFormat) -> &[u8] {
        self.digits.clear();

        loop {
            let mut result = match fmt {
                DtmfFormat::ALaw | DtmfFormat::ULaw => {
                    let law = match fmt {
                        DtmfFormat::ALaw => Law::ALaw,
                        _ => Law::ULaw,
                    };
                    while self.size < DTMF_NPOINTS && !data.is_empty() {
                        self.buffer[self.size] = law.decode(data[0]) as i16;
                        self.size += 1;
                        data = &data[1..];
                    }
                    if self.size < DTMF_NPOINTS {
                        return &self.digits;
                    }
                    self.size = 0;
                    self.goertzel()
                }
                DtmfFormat::HfcCoefficients => {
                    if data.is_empty() {
                        return &self.digits;
                    }
                    if data.len() < 32 {
                        warn!(
                            "dtmf: coefficient chunk of {} bytes is too short, discarding",
                            data.len()
                        );
                        return &self.digits;
                    }
                    let mut result = [0i64; 8];
                    for (k, chunk) in data[..32].chunks_exact(4).enumerate() {
                        result[k] = i32::from_le_bytes(chunk.try_into().unwrap()) as i64;
                    }
                    data = &data[32..];
                    result
                }
            };

            let what = select_tone(&mut result);
            self.store(what);
        }
    }

    /// Run the eight recurrences over the full frame buffer.
    fn goertzel(&self) -> [i64; 8] {
        let mut result = [0i64; 8];
        for k in 0..COS2PIK.len() {
            let mut sk: i64 = 0;
            let mut sk1: i64 = 0;
            let mut sk2: i64 = 0;
            for &x in self.buffer.iter() {
                sk = ((COS2PIK[k] * sk1) >> 15) - sk2 + x as i64;
                sk2 = sk1;
                sk1 = sk;
            }
            sk >>= 8;
            sk2 >>= 8;
            if sk > 32767 || sk < -32767 || sk2 > 32767 || sk2 < -32767 {
                warn!("dtmf: goertzel magnitude overflow");
            }
            result[k] = sk * sk - (((COS2PIK[k] * sk) >> 15) * sk2) + sk2 * sk2;
        }
        result
    }

    /// Three-frame hysteresis over the per-frame decision.
    fn store(&mut self, what: u8) {
        if self.last_what != what {
            self.count = 0;
        }

        // the decision must hold three frames before it is believed
        if self.count == 2 {
            if self.last_digit != what {
                self.last_digit = what;
                if what != 0 {
                    debug!("dtmf: digit {}", what as char);
                    if self.digits.len() < MAX_DIGITS {
                        self.digits.push(what);
                    } else {
                        warn!("dtmf: digit buffer full, dropping {}", what as char);
                    }
                }
            }
        } else {
            self.count += 1;
        }

        self.last_what = what;
    }
}

impl Default for DtmfDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the frame's digit from the eight squared magnitudes, or 0 for none.
fn select_tone(result: &mut [i64; 8]) -> u8 {
    let mut peak: i64 = 0;
    for r in result.iter_mut() {
        if *r < 0 {
            *r = 0;
        }
        if *r > DTMF_THRESH && *r > peak {
            peak = *r;
        }
    }
    if peak == 0 {
        return 0;
    }

    let floor = peak >> 3; // inactive tones must sit at least 9 dB down
    let gate = peak >> 2; // active tones must match within 6 dB
    let mut lowgroup: i32 = -1;
    let mut highgroup: i32 = -1;
    for (i, &r) in result.iter().enumerate() {
        if r < floor {
            continue;
        }
        if r < gate {
            // noise between the groups
            lowgroup = -1;
            highgroup = -1;
            break;
        }
        // a good level is allowed once per group
        if i < COS2PIK.len() / 2 {
            if lowgroup >= 0 {
                lowgroup = -1;
                break;
            }
            lowgroup = i as i32;
        } else {
            if highgroup >= 0 {
                highgroup = -1;
                break;
            }
            highgroup = (i - COS2PIK.len() / 2) as i32;
        }
    }

    if lowgroup >= 0 && highgroup >= 0 {
        DIGIT_MATRIX[lowgroup as usize][highgroup as usize]
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::saturate;
    use std::f64::consts::PI;

    fn dual_tone(low: f64, high: f64, samples: usize, law: Law) -> Vec<u8> {
        (0..samples)
            .map(|n| {
                let t = n as f64 / 8000.0;
                let s = 8000.0 * (2.0 * PI * low * t).sin() + 8000.0 * (2.0 * PI * high * t).sin();
                law.encode(saturate(s as i32))
            })
            .collect()
    }

    #[test]
    fn test_steady_tone_emits_digit_once() {
        let mut dec = DtmfDecoder::new();
        let tone = dual_tone(770.0, 1336.0, 5 * DTMF_NPOINTS, Law::ALaw);
        let digits = dec.decode(&tone, DtmfFormat::ALaw);
        assert_eq!(digits, b"5");
    }

    #[test]
    fn test_silence_emits_nothing() {
        let mut dec = DtmfDecoder::new();
        for law in [Law::ALaw, Law::ULaw] {
            let silence = vec![law.silence(); 10 * DTMF_NPOINTS];
            let fmt = match law {
                Law::ALaw => DtmfFormat::ALaw,
                Law::ULaw => DtmfFormat::ULaw,
            };
            let digits = dec.decode(&silence, fmt);
            assert!(digits.is_empty());
        }
    }

    #[test]
    fn test_two_frame_burst_is_debounced() {
        let mut dec = DtmfDecoder::new();
        let mut stream = dual_tone(770.0, 1336.0, 2 * DTMF_NPOINTS, Law::ULaw);
        stream.extend(vec![Law::ULaw.silence(); 4 * DTMF_NPOINTS]);
        let digits = dec.decode(&stream, DtmfFormat::ULaw);
        assert!(digits.is_empty(), "got {digits:?}");
    }

    #[test]
    fn test_partial_frames_carry_over() {
        let mut dec = DtmfDecoder::new();
        let tone = dual_tone(852.0, 1477.0, 5 * DTMF_NPOINTS, Law::ULaw);
        let mut collected = Vec::new();
        // trickle in odd-sized packets
        for packet in tone.chunks(37) {
            collected.extend_from_slice(dec.decode(packet, DtmfFormat::ULaw));
        }
        assert_eq!(collected, b"9");
    }

    #[test]
    fn test_single_tone_is_rejected() {
        let mut dec = DtmfDecoder::new();
        let tone: Vec<u8> = (0..5 * DTMF_NPOINTS)
            .map(|n| {
                let t = n as f64 / 8000.0;
                Law::ALaw.encode(saturate((12000.0 * (2.0 * PI * 941.0 * t).sin()) as i32))
            })
            .collect();
        let digits = dec.decode(&tone, DtmfFormat::ALaw);
        assert!(digits.is_empty());
    }

    #[test]
    fn test_hfc_coefficients_bypass_filter() {
        let mut dec = DtmfDecoder::new();
        // row 770 Hz and column 1336 Hz dominant
        let mut chunk = [0u8; 32];
        for (k, value) in [0i32, 1_000_000, 0, 0, 0, 1_000_000, 0, 0].iter().enumerate() {
            chunk[k * 4..k * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        let mut stream = Vec::new();
        for _ in 0..4 {
            stream.extend_from_slice(&chunk);
        }
        let digits = dec.decode(&stream, DtmfFormat::HfcCoefficients);
        assert_eq!(digits, b"5");
    }

    #[test]
    fn test_hfc_short_chunk_is_discarded() {
        let mut dec = DtmfDecoder::new();
        let digits = dec.decode(&[0u8; 10], DtmfFormat::HfcCoefficients);
        assert!(digits.is_empty());
    }

    #[test]
    fn test_reset_clears_hysteresis() {
        let mut dec = DtmfDecoder::new();
        let tone = dual_tone(770.0, 1336.0, 5 * DTMF_NPOINTS, Law::ALaw);
        assert_eq!(dec.decode(&tone, DtmfFormat::ALaw), b"5");
        dec.reset();
        // the same tone is a fresh detection after a reset
        assert_eq!(dec.decode(&tone, DtmfFormat::ALaw), b"5");
    }
}
