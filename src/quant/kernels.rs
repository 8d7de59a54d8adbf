//! Quantization utilities and scalar kernels.
use crate::config::Rounding;
use rayon::prelude::*;

/// Largest magnitude on the symmetric int8 grid; -128 is never produced.
pub const QMAX: f32 = 127.0;

/// Widest reduction whose i32 accumulator cannot overflow: `127 * 127 * k <= i32::MAX`.
pub const MAX_EXACT_K: usize = (i32::MAX / (127 * 127)) as usize;

#[inline]
pub fn dot_i8_i8(w_row: &[i8], x: &[i8]) -> i32 {
    debug_assert!(w_row.len() <= MAX_EXACT_K, "reduction width {} overflows i32", w_row.len());
    let mut acc: i32 = 0;
    for i in 0..w_row.len() { acc += (w_row[i] as i32) * (x[i] as i32); }
    acc
}

/// max(|x|); NaNs are ignored.
#[inline]
pub fn abs_max(data: &[f32]) -> f32 {
    data.iter().fold(0.0f32, |m, v| m.max(v.abs()))
}

/// Per-call activation scale, `max(|x|) / 127`. Zero for all-zero input.
#[inline]
pub fn activation_scale(data: &[f32]) -> f32 { abs_max(data) / QMAX }

#[inline]
pub fn quantize_value(v: f32, inv_scale: f32, rounding: Rounding) -> i8 {
    rounding.apply(v * inv_scale).clamp(-QMAX, QMAX) as i8
}

/// Quantize activations onto [-127, 127] with the given scale.
///
/// A zero (or non-finite) scale means the input carried no magnitude; every
/// value maps to 0 without dividing.
pub fn quantize_activations(x: &[f32], scale: f32, rounding: Rounding) -> Vec<i8> {
    if scale <= 0.0 || !scale.is_finite() {
        return vec![0; x.len()];
    }
    let inv = 1.0 / scale;
    x.iter().map(|&v| quantize_value(v, inv, rounding)).collect()
}

/// `x [rows, k] · wᵗ` with `w [n, k]`, producing `[rows, n]` i32 accumulators.
pub fn int_mm(x: &[i8], rows: usize, k: usize, w: &[i8], n: usize) -> Vec<i32> {
    debug_assert_eq!(x.len(), rows * k);
    debug_assert_eq!(w.len(), n * k);
    let mut out = vec![0i32; rows * n];
    if k == 0 { return out; }
    for (x_row, o_row) in x.chunks_exact(k).zip(out.chunks_exact_mut(n.max(1))) {
        mm_row(x_row, w, k, o_row);
    }
    out
}

/// Same result as [`int_mm`], rows distributed over the rayon pool.
pub fn int_mm_par(x: &[i8], rows: usize, k: usize, w: &[i8], n: usize) -> Vec<i32> {
    debug_assert_eq!(x.len(), rows * k);
    debug_assert_eq!(w.len(), n * k);
    let mut out = vec![0i32; rows * n];
    if k == 0 || n == 0 { return out; }
    out.par_chunks_mut(n)
        .zip(x.par_chunks(k))
        .for_each(|(o_row, x_row)| mm_row(x_row, w, k, o_row));
    out
}

#[inline]
fn mm_row(x_row: &[i8], w: &[i8], k: usize, o_row: &mut [i32]) {
    for (j, o) in o_row.iter_mut().enumerate() {
        *o = dot_i8_i8(&w[j * k..(j + 1) * k], x_row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_scale_quantizes_to_zero() {
        let q = quantize_activations(&[0.0, 0.0, 0.0], 0.0, Rounding::Nearest);
        assert_eq!(q, vec![0, 0, 0]);
    }

    #[test]
    fn quantize_is_symmetric_and_clamped() {
        let x = [1.0f32, -1.0, 2.0, -2.0];
        let q = quantize_activations(&x, 1.0 / 127.0, Rounding::Nearest);
        assert_eq!(q, vec![127, -127, 127, -127]);
        assert!(q.iter().all(|&v| v != i8::MIN));
    }

    #[test]
    fn int_mm_matches_hand_computation() {
        // x = [[1,2],[3,4]], w = [[1,0],[0,1],[1,1]]
        let x = [1i8, 2, 3, 4];
        let w = [1i8, 0, 0, 1, 1, 1];
        let out = int_mm(&x, 2, 2, &w, 3);
        assert_eq!(out, vec![1, 2, 3, 3, 4, 7]);
        assert_eq!(int_mm_par(&x, 2, 2, &w, 3), out);
    }

    #[test]
    fn accumulation_does_not_saturate() {
        let k = 40_000;
        let x = vec![127i8; k];
        let w = vec![-127i8; k];
        let out = int_mm(&x, 1, k, &w, 1);
        assert_eq!(out[0], -127 * 127 * k as i32);
    }

    #[test]
    fn widest_exact_reduction_fits_i32() {
        let k = MAX_EXACT_K;
        let out = int_mm(&vec![127i8; k], 1, k, &vec![127i8; k], 1);
        assert_eq!(out[0] as i64, 127 * 127 * k as i64);
    }

    #[test]
    fn abs_max_of_empty_is_zero() {
        assert_eq!(abs_max(&[]), 0.0);
        assert_eq!(abs_max(&[-3.0, 2.0]), 3.0);
    }
}
