/// Folds a signed value into its U16 two's-complement encoding; values that
/// are already non-negative pass through unchanged.
pub fn to_u16(value: i64) -> u16 {
    let folded = if value < 0 { value + 0x1_0000 } else { value };
    (folded & 0xFFFF) as u16
}

/// Sign-extends a raw U16 register read back as a signed measurement, the
/// inverse of [`to_u16`] (used wherever a previously-encoded value is read
/// back for arithmetic, e.g. the ΔT/ΔP/cooling-capacity aggregates).
pub fn from_u16_signed(raw: u16) -> i32 {
    if raw >= 0x8000 {
        raw as i32 - 0x1_0000
    } else {
        raw as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_values_fold_to_twos_complement() {
        assert_eq!(to_u16(-1), 0xFFFF);
        assert_eq!(to_u16(-1000), 0xFC18);
    }

    #[test]
    fn non_negative_values_pass_through() {
        assert_eq!(to_u16(0), 0);
        assert_eq!(to_u16(12345), 12345);
    }

    #[test]
    fn sign_extension_round_trips_to_u16() {
        assert_eq!(from_u16_signed(to_u16(-500)), -500);
        assert_eq!(from_u16_signed(to_u16(500)), 500);
    }
}
