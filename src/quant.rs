//! Affine 8-bit quantization model for packed matrix rows.
//!
//! A packed row stores one byte per element. The float value is recovered with a
//! single pair of parameters shared by every byte of every row:
//!
//! ```text
//! value = coeff * byte + bias
//! ```
//!
//! Because the map is uniform, a dot product against a dequantized row factors as
//! `coeff * Σ q[i]·row[i] + bias * Σ q[i]`. The second term depends only on the
//! query, which is what lets the packed kernels compute it once per call.

/// The `(bias, coeff)` pair of the affine map `value = coeff * byte + bias`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub bias: f32,
    pub coeff: f32,
}

impl QuantParams {
    /// Bytes map to their own value.
    pub const IDENTITY: Self = Self {
        bias: 0.0,
        coeff: 1.0,
    };

    pub const fn new(bias: f32, coeff: f32) -> Self {
        Self { bias, coeff }
    }

    /// Parameters spreading the 256 byte codes evenly over `[min, max]`.
    pub fn from_range(min: f32, max: f32) -> Self {
        Self {
            bias: min,
            coeff: (max - min) / 255.0,
        }
    }

    #[inline]
    pub fn dequantize(self, byte: u8) -> f32 {
        self.coeff * f32::from(byte) + self.bias
    }

    /// Nearest byte code for `value`, saturating at 0 and 255.
    pub fn quantize(self, value: f32) -> u8 {
        if self.coeff == 0.0 {
            return 0;
        }
        let code = ((value - self.bias) / self.coeff).round();
        // NaN codes saturate to 0.
        code.clamp(0.0, 255.0) as u8
    }

    pub fn dequantize_into(self, row: &[u8], out: &mut [f32]) {
        debug_assert_eq!(row.len(), out.len());
        for (dst, &byte) in out.iter_mut().zip(row) {
            *dst = self.dequantize(byte);
        }
    }

    pub fn quantize_into(self, values: &[f32], out: &mut [u8]) {
        debug_assert_eq!(values.len(), out.len());
        for (dst, &value) in out.iter_mut().zip(values) {
            *dst = self.quantize(value);
        }
    }

    /// Finishes a factored score from the raw byte dot product and the query sum.
    #[inline]
    pub fn combine(self, raw_dot: f32, query_sum: f32) -> f32 {
        raw_dot * self.coeff + self.bias * query_sum
    }
}

impl Default for QuantParams {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn quantize_inverts_dequantize(byte in any::<u8>(), bias in -10.0f32..10.0, coeff in 0.01f32..4.0) {
            let params = QuantParams::new(bias, coeff);
            prop_assert_eq!(params.quantize(params.dequantize(byte)), byte);
        }

        #[test]
        fn combine_matches_dequantized_sum(
            query in proptest::collection::vec(-1.0f32..1.0, 0..64),
            seed in any::<u8>(),
            bias in -2.0f32..2.0,
            coeff in -1.0f32..1.0,
        ) {
            let params = QuantParams::new(bias, coeff);
            let row: Vec<u8> = (0..query.len()).map(|i| seed.wrapping_mul(31).wrapping_add(i as u8)).collect();

            let expected: f32 = query
                .iter()
                .zip(&row)
                .map(|(&q, &b)| q * params.dequantize(b))
                .sum();
            let raw: f32 = query.iter().zip(&row).map(|(&q, &b)| q * f32::from(b)).sum();
            let got = params.combine(raw, query.iter().sum());

            let scale: f32 = query.iter().map(|q| q.abs()).sum::<f32>() * (255.0 * coeff.abs() + bias.abs());
            prop_assert!((got - expected).abs() <= 1e-4 * scale + 1e-4, "got={got} expected={expected}");
        }
    }

    #[test]
    fn from_range_covers_endpoints() {
        let params = QuantParams::from_range(-1.0, 1.0);
        assert_eq!(params.dequantize(0), -1.0);
        assert!((params.dequantize(255) - 1.0).abs() < 1e-6);
        assert_eq!(params.quantize(-5.0), 0);
        assert_eq!(params.quantize(5.0), 255);
    }

    #[test]
    fn degenerate_coeff_quantizes_to_zero() {
        let params = QuantParams::new(3.0, 0.0);
        assert_eq!(params.quantize(3.0), 0);
        assert_eq!(params.dequantize(200), 3.0);
    }

    #[test]
    fn row_helpers_apply_params_elementwise() {
        let params = QuantParams::new(0.5, 2.0);
        let row = [0u8, 1, 255];
        let mut values = [0.0f32; 3];
        params.dequantize_into(&row, &mut values);
        assert_eq!(values, [0.5, 2.5, 510.5]);

        let mut codes = [0u8; 3];
        params.quantize_into(&values, &mut codes);
        assert_eq!(codes, row);
    }
}
