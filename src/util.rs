/// 2^53 - 1, the largest magnitude at which every integer is exactly representable as an f64.
const MAX_EXACT_INT: f64 = 9007199254740991_f64;

/// Returns `f` as an i64 if it is a whole number small enough to have been an integer to begin
/// with. NaN, infinities, fractions and out-of-range values give None.
pub(crate) fn integral_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_INT {
        Some(f as i64)
    } else {
        None
    }
}
