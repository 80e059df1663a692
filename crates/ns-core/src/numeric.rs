use crate::NsError;

/// Floating point type used for time axes, samples and parameter values.
pub type Real = f64;

/// Absolute/relative tolerance pair used when matching parameter values.
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    if a == b {
        return true;
    }
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, NsError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(NsError::NonFinite { what, value: v })
    }
}

/// Inclusive containment, with infinite bounds allowed.
pub fn within(v: Real, low: Real, high: Real) -> bool {
    v >= low && v <= high
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampled_values_compare_equal() {
        let tol = Tolerances::default();
        // 0.1 * 3 is not exactly 0.3
        assert!(nearly_equal(0.1 * 3.0, 0.3, tol));
        assert!(nearly_equal(0.0, 1e-13, tol));
        assert!(!nearly_equal(10.0, 10.001, tol));
        assert!(nearly_equal(Real::INFINITY, Real::INFINITY, tol));
        assert!(!nearly_equal(Real::NAN, Real::NAN, tol));
    }

    #[test]
    fn ensure_finite_names_the_value() {
        let err = ensure_finite(Real::INFINITY, "threshold").unwrap_err();
        assert!(err.to_string().contains("threshold"));
        assert_eq!(ensure_finite(-65.0, "threshold").unwrap(), -65.0);
    }

    #[test]
    fn within_accepts_infinite_bounds() {
        assert!(within(3.0, Real::NEG_INFINITY, Real::INFINITY));
        assert!(within(3.0, 3.0, 3.0));
        assert!(!within(3.0, 3.5, Real::INFINITY));
        assert!(!within(Real::NAN, Real::NEG_INFINITY, Real::INFINITY));
    }
}
