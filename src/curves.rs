//! Bidirectional codecs between the 8-bit parameter codes stored in E4B
//! voices and physical units. The constants are fixed properties of the
//! hardware's quantization, not tunables; forward maps are monotonic so the
//! inverses round back onto the code grid.

const FILTER_HZ_MIN: f64 = 57.0;
const FILTER_HZ_MAX: f64 = 20000.0;

#[inline]
pub fn filter_hz_from_code(code: u8) -> f64 {
    let t = code as f64 / 255.0;
    (t * (FILTER_HZ_MAX.ln() - FILTER_HZ_MIN.ln()) + FILTER_HZ_MIN.ln()).exp()
}

#[inline]
pub fn filter_code_from_hz(hz: f64) -> u8 {
    let hz = hz.clamp(FILTER_HZ_MIN, FILTER_HZ_MAX);
    let t = (hz.ln() - FILTER_HZ_MIN.ln()) / (FILTER_HZ_MAX.ln() - FILTER_HZ_MIN.ln());
    (t * 255.0).round() as u8
}

const CENTS_PER_FINE_STEP: f64 = 1.5625;

#[inline]
pub fn fine_cents_from_code(code: u8) -> f64 {
    (code as f64 - 64.0) * CENTS_PER_FINE_STEP
}

#[inline]
pub fn fine_code_from_cents(cents: f64) -> u8 {
    (cents / CENTS_PER_FINE_STEP + 64.0).round().clamp(0.0, 128.0) as u8
}

// Both LFO curves are the same exponential family a*b^code + c over codes
// 0..=127; only the fitted constants differ.
const LFO_RATE_A: f64 = 1.64;
const LFO_RATE_B: f64 = 1.02;
const LFO_RATE_C: f64 = -1.58;
const LFO_DELAY_A: f64 = 0.15;
const LFO_DELAY_B: f64 = 1.04;
const LFO_DELAY_C: f64 = -0.15;

#[inline]
fn lfo_curve(code: u8, a: f64, b: f64, c: f64) -> f64 {
    a * b.powi(code as i32) + c
}

#[inline]
fn lfo_curve_inv(v: f64, a: f64, b: f64, c: f64) -> u8 {
    let v = v.max(a + c);
    (((v - c) / a).ln() / b.ln()).round().clamp(0.0, 127.0) as u8
}

#[inline]
pub fn lfo_rate_hz_from_code(code: u8) -> f64 {
    lfo_curve(code.min(127), LFO_RATE_A, LFO_RATE_B, LFO_RATE_C)
}

#[inline]
pub fn lfo_rate_code_from_hz(hz: f64) -> u8 {
    lfo_curve_inv(hz, LFO_RATE_A, LFO_RATE_B, LFO_RATE_C)
}

#[inline]
pub fn lfo_delay_secs_from_code(code: u8) -> f64 {
    lfo_curve(code.min(127), LFO_DELAY_A, LFO_DELAY_B, LFO_DELAY_C)
}

#[inline]
pub fn lfo_delay_code_from_secs(secs: f64) -> u8 {
    lfo_curve_inv(secs, LFO_DELAY_A, LFO_DELAY_B, LFO_DELAY_C)
}

/// Per-role exponents for the envelope time curve.
#[derive(Clone, Copy, Debug)]
pub enum EnvStage {
    Delay,
    Attack,
    Hold,
    Decay,
    Release,
}

impl EnvStage {
    #[inline]
    fn k(self) -> f64 {
        match self {
            Self::Attack => 0.084,
            Self::Delay | Self::Hold | Self::Decay => 0.015,
            Self::Release => 0.1,
        }
    }
}

/// Code 0 is a hard zero, not a point on the curve.
#[inline]
pub fn env_secs_from_code(code: u8, stage: EnvStage) -> f64 {
    if code == 0 {
        return 0.0;
    }
    1.3 * (stage.k() * (code.min(127) as f64 - 59.0)).exp2()
}

#[inline]
pub fn env_code_from_secs(secs: f64, stage: EnvStage) -> u8 {
    if secs <= 0.0 {
        return 0;
    }
    ((secs / 1.3).log2() / stage.k() + 59.0).round().clamp(1.0, 127.0) as u8
}

// Amp-envelope sustain is stored as a 0..=127 level; full level is 0 dB and
// the bottom of the range is -96 dB of attenuation.
const AMP_SUSTAIN_RANGE_DB: f64 = 96.0;

#[inline]
pub fn amp_sustain_db_from_code(code: u8) -> f64 {
    (code.min(127) as f64 - 127.0) * AMP_SUSTAIN_RANGE_DB / 127.0
}

#[inline]
pub fn amp_sustain_code_from_db(db: f64) -> u8 {
    (db * 127.0 / AMP_SUSTAIN_RANGE_DB + 127.0).round().clamp(0.0, 127.0) as u8
}

#[inline]
pub fn percent_from_code(code: i8) -> f64 {
    code as f64 * 100.0 / 127.0
}

#[inline]
pub fn code_from_percent(percent: f64) -> i8 {
    (percent * 127.0 / 100.0).round().clamp(-127.0, 127.0) as i8
}

const CHORUS_WIDTH_STEP: f64 = 0.781;

#[inline]
pub fn chorus_width_from_code(code: u8) -> f64 {
    ((code as f64 - 128.0).abs() * CHORUS_WIDTH_STEP).clamp(0.0, 100.0)
}

#[inline]
pub fn chorus_width_code(percent: f64) -> u8 {
    (128.0 + percent.clamp(0.0, 100.0) / CHORUS_WIDTH_STEP).round().min(255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_code_roundtrips_exactly() {
        for code in 0..=255u8 {
            assert_eq!(filter_code_from_hz(filter_hz_from_code(code)), code);
        }
        assert!((filter_hz_from_code(0) - 57.0).abs() < 1e-9);
        assert!((filter_hz_from_code(255) - 20000.0).abs() < 1e-6);
    }

    #[test]
    fn fine_tune_spans_a_semitone() {
        assert_eq!(fine_cents_from_code(64), 0.0);
        assert_eq!(fine_cents_from_code(0), -100.0);
        assert_eq!(fine_cents_from_code(128), 100.0);
        for code in 0..=128u8 {
            assert_eq!(fine_code_from_cents(fine_cents_from_code(code)), code);
        }
    }

    #[test]
    fn lfo_codes_roundtrip() {
        for code in 0..=127u8 {
            assert_eq!(lfo_rate_code_from_hz(lfo_rate_hz_from_code(code)), code);
            assert_eq!(
                lfo_delay_code_from_secs(lfo_delay_secs_from_code(code)),
                code
            );
        }
        assert!(lfo_rate_hz_from_code(127) < 19.0);
        assert_eq!(lfo_delay_secs_from_code(0), 0.0);
    }

    #[test]
    fn env_code_zero_is_exactly_zero() {
        for stage in [
            EnvStage::Delay,
            EnvStage::Attack,
            EnvStage::Hold,
            EnvStage::Decay,
            EnvStage::Release,
        ] {
            assert_eq!(env_secs_from_code(0, stage), 0.0);
            assert_eq!(env_code_from_secs(0.0, stage), 0);
            for code in 1..=127u8 {
                assert_eq!(env_code_from_secs(env_secs_from_code(code, stage), stage), code);
            }
        }
    }

    #[test]
    fn percent_is_symmetric() {
        assert_eq!(code_from_percent(100.0), 127);
        assert_eq!(code_from_percent(-100.0), -127);
        assert_eq!(code_from_percent(0.0), 0);
        for code in -127..=127i8 {
            assert_eq!(code_from_percent(percent_from_code(code)), code);
        }
    }

    #[test]
    fn chorus_width_folds_around_center() {
        assert_eq!(chorus_width_from_code(128), 0.0);
        assert!((chorus_width_from_code(255) - 99.187).abs() < 1e-3);
        // code 0 is 128 steps out: 128 * 0.781 = 99.968, just shy of full
        assert!((chorus_width_from_code(0) - 100.0).abs() < CHORUS_WIDTH_STEP);
        assert!(chorus_width_from_code(0) < 100.0);
        for width in [0.0, 12.5, 50.0, 99.0] {
            let round = chorus_width_from_code(chorus_width_code(width));
            assert!((round - width).abs() <= CHORUS_WIDTH_STEP);
        }
    }
}
