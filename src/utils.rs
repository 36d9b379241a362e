use crate::op::BinOp;
use crate::types::{NodeId, VarId};

/// Relative tolerance for terminal canonicalization.
///
/// Two computed reals within this relative distance collapse to a single
/// terminal id. Applied consistently at every terminal construction and at
/// every affine normalization step via [`quantize`].
pub const EPSILON: f64 = 1e-10;

/// Number of significant decimal digits kept by [`quantize`].
const SIG_DIGITS: i32 = 10;

/// Round `value` to [`SIG_DIGITS`] significant decimal digits.
///
/// This realizes the relative-ε equality of the store: quantized values are
/// compared and hashed bitwise, so any two reals within `EPSILON` (relative)
/// of each other land on the same canonical representative. `-0.0` is
/// normalized to `0.0` so both hash alike.
pub fn quantize(value: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value + 0.0;
    }
    let exp = value.abs().log10().floor() as i32;
    let scale = 10f64.powi(SIG_DIGITS - 1 - exp);
    if scale.is_finite() && scale != 0.0 {
        (value * scale).round() / scale
    } else {
        value
    }
}

/// Relative-ε comparison used wherever two already-computed reals are tested
/// for semantic equality.
pub fn approx_eq(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= EPSILON * scale
}

/// [Szudzik pairing function][szudzik-pairing].
///
/// ```text
/// (a, b) -> if (a<b) then (b^2 + a) else (a^2 + a + b)
/// ```
///
/// [szudzik-pairing]: http://szudzik.com/ElegantPairing.pdf
pub fn pairing_szudzik(a: u64, b: u64) -> u64 {
    if a < b {
        // b * b + a
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        // a * a + a + b
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// [Pairing function][pairing] for two `u64` values.
///
/// [pairing]: https://en.wikipedia.org/wiki/Pairing_function
pub fn pairing2(a: u64, b: u64) -> u64 {
    pairing_szudzik(a, b)
}

/// Pairing function for three `u64` values.
pub fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

/// Pairing function for four `u64` values.
pub fn pairing4(a: u64, b: u64, c: u64, d: u64) -> u64 {
    pairing2(pairing2(a, b), pairing2(c, d))
}

pub trait MyHash {
    fn hash(&self) -> u64;
}

impl MyHash for u64 {
    fn hash(&self) -> u64 {
        *self
    }
}

impl MyHash for (u64, u64) {
    fn hash(&self) -> u64 {
        pairing2(self.0, self.1)
    }
}

impl MyHash for (u64, u64, u64) {
    fn hash(&self) -> u64 {
        pairing3(self.0, self.1, self.2)
    }
}

impl MyHash for NodeId {
    fn hash(&self) -> u64 {
        self.id() as u64
    }
}

impl MyHash for (NodeId, NodeId) {
    fn hash(&self) -> u64 {
        pairing2(self.0.id() as u64, self.1.id() as u64)
    }
}

impl MyHash for (BinOp, NodeId, NodeId) {
    fn hash(&self) -> u64 {
        pairing3(self.0 as u64, self.1.id() as u64, self.2.id() as u64)
    }
}

impl MyHash for (BinOp, NodeId) {
    fn hash(&self) -> u64 {
        pairing2(self.0 as u64, self.1.id() as u64)
    }
}

impl MyHash for (NodeId, VarId, bool) {
    fn hash(&self) -> u64 {
        pairing3(self.0.id() as u64, self.1.id() as u64, self.2 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_szudzik() {
        // a\b  0  1  2  3  4
        // ------------------
        // 0    0  1  4  9 16
        // 1    2  3  5 10 17
        // 2    6  7  8 11 18
        // 3   12 13 14 15 19
        // 4   20 21 22 23 24
        assert_eq!(pairing_szudzik(0, 0), 0);
        assert_eq!(pairing_szudzik(0, 1), 1);
        assert_eq!(pairing_szudzik(1, 0), 2);
        assert_eq!(pairing_szudzik(1, 1), 3);
        assert_eq!(pairing_szudzik(0, 2), 4);
        assert_eq!(pairing_szudzik(1, 2), 5);
        assert_eq!(pairing_szudzik(2, 0), 6);
        assert_eq!(pairing_szudzik(2, 1), 7);
        assert_eq!(pairing_szudzik(2, 2), 8);
        assert_eq!(pairing_szudzik(0, 4), 16);
        assert_eq!(pairing_szudzik(4, 0), 20);
        assert_eq!(pairing_szudzik(4, 4), 24);
    }

    #[test]
    fn test_quantize_collapses_epsilon_neighbors() {
        assert_eq!(quantize(0.3 + 1e-13), quantize(0.3));
        assert_eq!(quantize(1.0 + 1e-12), 1.0);
        assert_eq!(quantize(123456.0 + 1e-6), quantize(123456.0));
        assert_eq!(quantize(-0.0).to_bits(), 0.0f64.to_bits());
    }

    #[test]
    fn test_quantize_separates_distinct_values() {
        assert_ne!(quantize(0.3), quantize(0.30001));
        assert_ne!(quantize(1.0), quantize(2.0));
        assert_ne!(quantize(-1.0), quantize(1.0));
    }

    #[test]
    fn test_approx_eq() {
        assert!(approx_eq(1.0, 1.0 + 1e-12));
        assert!(approx_eq(0.0, 0.0));
        assert!(!approx_eq(1.0, 1.0001));
        assert!(approx_eq(1e6, 1e6 * (1.0 + 1e-11)));
    }
}
