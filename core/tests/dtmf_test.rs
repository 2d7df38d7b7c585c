use std::f64::consts::PI;

use cmx_core::{saturate, DtmfDecoder, DtmfFormat, Law, MixerContext, DTMF_NPOINTS};

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
fn test_digit_nine_on_receive_path() {
    let mut ctx = MixerContext::new();
    let a = ctx.add_channel(Law::ULaw);
    ctx.channel_mut(a).unwrap().enable_dtmf();

    // 852 + 1477 Hz held long enough for the three-frame hysteresis
    let tone = dual_tone(852.0, 1477.0, 400, Law::ULaw);
    let digits = ctx.decode_dtmf(a, &tone, DtmfFormat::ULaw).unwrap().to_vec();
    ctx.receive(a, &tone[..160]).unwrap();

    assert_eq!(digits, b"9");
}

#[test]
fn test_channel_without_decoder_reports_nothing() {
    let mut ctx = MixerContext::new();
    let a = ctx.add_channel(Law::ULaw);
    let tone = dual_tone(852.0, 1477.0, 400, Law::ULaw);
    assert!(ctx.decode_dtmf(a, &tone, DtmfFormat::ULaw).unwrap().is_empty());
}

#[test]
fn test_hardware_coefficients_route_through_mixer() {
    let mut ctx = MixerContext::new();
    let a = ctx.add_channel(Law::ALaw);
    ctx.channel_mut(a).unwrap().enable_dtmf();

    // a chip-side tone decoder reports 770 Hz and 1336 Hz dominant
    let mut chunk = [0u8; 32];
    for (k, value) in [0i32, 1_000_000, 0, 0, 0, 1_000_000, 0, 0].iter().enumerate() {
        chunk[k * 4..k * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    let mut stream = Vec::new();
    for _ in 0..4 {
        stream.extend_from_slice(&chunk);
    }

    let digits = ctx
        .decode_dtmf(a, &stream, DtmfFormat::HfcCoefficients)
        .unwrap();
    assert_eq!(digits, b"5");
}

#[test]
fn test_digit_sequence_with_pause() {
    let mut dec = DtmfDecoder::new();
    let mut stream = dual_tone(770.0, 1336.0, 5 * DTMF_NPOINTS, Law::ALaw);
    stream.extend(vec![Law::ALaw.silence(); 5 * DTMF_NPOINTS]);
    stream.extend(dual_tone(852.0, 1336.0, 5 * DTMF_NPOINTS, Law::ALaw));

    let digits = dec.decode(&stream, DtmfFormat::ALaw);
    assert_eq!(digits, b"58");
}

#[test]
fn test_repeated_digit_needs_a_gap() {
    let mut dec = DtmfDecoder::new();

    // one long hold is a single key press
    let hold = dual_tone(697.0, 1209.0, 10 * DTMF_NPOINTS, Law::ULaw);
    assert_eq!(dec.decode(&hold, DtmfFormat::ULaw), b"1");

    // pressing again after a pause reports again
    let mut again = vec![Law::ULaw.silence(); 5 * DTMF_NPOINTS];
    again.extend(dual_tone(697.0, 1209.0, 5 * DTMF_NPOINTS, Law::ULaw));
    assert_eq!(dec.decode(&again, DtmfFormat::ULaw), b"1");
}

#[test]
fn test_speech_level_noise_stays_quiet() {
    let mut dec = DtmfDecoder::new();
    // a broadband sweep has no stable row/column pair
    let sweep: Vec<u8> = (0..10 * DTMF_NPOINTS)
        .map(|n| {
            let t = n as f64 / 8000.0;
            let f = 300.0 + 150.0 * (n as f64 / 200.0);
            Law::ULaw.encode(saturate((9000.0 * (2.0 * PI * f * t).sin()) as i32))
        })
        .collect();
    let digits = dec.decode(&sweep, DtmfFormat::ULaw);
    assert!(digits.is_empty(), "got {digits:?}");
}

#[test]
fn test_all_sixteen_digits_decode() {
    let rows = [697.0, 770.0, 852.0, 941.0];
    let cols = [1209.0, 1336.0, 1477.0, 1633.0];
    let keypad = [
        [b'1', b'2', b'3', b'A'],
        [b'4', b'5', b'6', b'B'],
        [b'7', b'8', b'9', b'C'],
        [b'*', b'0', b'#', b'D'],
    ];

    for (ri, &row) in rows.iter().enumerate() {
        for (ci, &col) in cols.iter().enumerate() {
            let mut dec = DtmfDecoder::new();
            let tone = dual_tone(row, col, 5 * DTMF_NPOINTS, Law::ALaw);
            let digits = dec.decode(&tone, DtmfFormat::ALaw);
            assert_eq!(
                digits,
                &[keypad[ri][ci]],
                "row {row} Hz / col {col} Hz decoded wrong"
            );
        }
    }
}
