//! ADC code / resistance conversions for the measurement channels.
//!
//! The board reports resistances as raw 12-bit ADC codes on a linear
//! 0..=4095 -> 0..=10 kOhm scale. One read-out channel (matrix elements
//! 4..=7) carries a known gain/offset error and gets a corrected
//! conversion.

use memra_core::regmap::ADC_FULL_SCALE;
use memra_core::MAX_ADC_CODE;

/// Full-scale resistance of the measurement range, in kOhm.
pub const KOHM_FULL_SCALE: f64 = 10.0;

// Calibration of the noisy read-out channel.
const CORRECTED_GAIN: f64 = 0.97;
const CORRECTED_OFFSET_KOHM: f64 = 0.12;

/// Converts a raw ADC code into kOhm on the nominal channel.
#[must_use]
pub fn adc_to_kohm(code: u32) -> f64 {
    f64::from(code) * KOHM_FULL_SCALE / f64::from(ADC_FULL_SCALE)
}

/// Converts a raw ADC code into kOhm on the corrected channel.
#[must_use]
pub fn adc_to_kohm_corrected(code: u32) -> f64 {
    adc_to_kohm(code).mul_add(CORRECTED_GAIN, CORRECTED_OFFSET_KOHM)
}

/// Converts a resistance in kOhm into the nearest ADC code, clamped to
/// the 12-bit range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn kohm_to_adc(kohm: f64) -> u16 {
    let code = (kohm / KOHM_FULL_SCALE * f64::from(ADC_FULL_SCALE)).round();
    code.clamp(0.0, f64::from(MAX_ADC_CODE)) as u16
}

/// Returns `true` when the element is read through the corrected
/// channel.
#[must_use]
pub const fn uses_corrected_channel(element: u8) -> bool {
    matches!(element, 4..=7)
}

#[cfg(test)]
mod tests {
    use super::{adc_to_kohm, adc_to_kohm_corrected, kohm_to_adc, uses_corrected_channel};

    #[test]
    fn scale_endpoints_map_exactly() {
        assert!((adc_to_kohm(0) - 0.0).abs() < f64::EPSILON);
        assert!((adc_to_kohm(4095) - 10.0).abs() < f64::EPSILON);
        assert_eq!(kohm_to_adc(0.0), 0);
        assert_eq!(kohm_to_adc(10.0), 4095);
    }

    #[test]
    fn out_of_range_resistances_clamp() {
        assert_eq!(kohm_to_adc(-1.0), 0);
        assert_eq!(kohm_to_adc(25.0), 4095);
    }

    #[test]
    fn conversion_roundtrips_within_one_code() {
        for code in [0_u32, 1, 100, 2047, 4094, 4095] {
            let back = u32::from(kohm_to_adc(adc_to_kohm(code)));
            assert!(back.abs_diff(code) <= 1);
        }
    }

    #[test]
    fn corrected_channel_covers_elements_four_to_seven() {
        for element in 0..16_u8 {
            assert_eq!(uses_corrected_channel(element), (4..=7).contains(&element));
        }
    }

    #[test]
    fn corrected_conversion_applies_gain_and_offset() {
        let nominal = adc_to_kohm(2048);
        let corrected = adc_to_kohm_corrected(2048);
        assert!((corrected - (nominal * 0.97 + 0.12)).abs() < 1e-9);
    }
}
