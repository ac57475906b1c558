use super::*;

pub type Floating = f64;

/// True when every entry of the iterator is finite.
pub fn all_finite<T: num_traits::Float>(values: impl IntoIterator<Item = T>) -> bool {
    values.into_iter().all(|v| v.is_finite())
}

/// Formats `v` in plain decimal notation with `digits` significant digits.
/// Used by the energy trace so rows stay parseable with a bare `str::parse`.
pub fn fmt_significant(v: Floating, digits: usize) -> String {
    if v == 0.0 || !v.is_finite() {
        return format!("{v}");
    }
    let magnitude = v.abs().log10().floor() as i32;
    let decimals = (digits as i32 - 1 - magnitude).max(0) as usize;
    format!("{v:.decimals$}")
}
