use ndarray::{concatenate, Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix2};
use ndarray_stats::QuantileExt;

/// Prepends a column of ones to the given inputs so that local linear models
/// carry an intercept.
pub fn add_bias<D: Data<Elem = f64>>(x: &ArrayBase<D, Ix2>) -> Array2<f64> {
    let ones = Array2::ones((x.nrows(), 1));
    concatenate![Axis(1), ones, x.view()]
}

/// Computes the `[min, max]` value range of each input dimension,
/// returned as a `(nx, 2)` matrix usable as `xlimits`.
pub fn data_ranges<D: Data<Elem = f64>>(x: &ArrayBase<D, Ix2>) -> Array2<f64> {
    let mut ranges = Array2::zeros((x.ncols(), 2));
    for (j, col) in x.columns().into_iter().enumerate() {
        ranges[[j, 0]] = *col.min_skipnan();
        ranges[[j, 1]] = *col.max_skipnan();
    }
    ranges
}

/// Numerically stable `ln(sum(exp(v)))`, `-inf` entries being ignored.
pub(crate) fn log_sum_exp(v: &ArrayView1<f64>) -> f64 {
    let max = v.fold(f64::NEG_INFINITY, |m, &a| m.max(a));
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + v.fold(0., |acc, &a| acc + (a - max).exp()).ln()
}

/// Natural logarithm of `k!`
pub(crate) fn ln_factorial(k: usize) -> f64 {
    (2..=k).map(|i| (i as f64).ln()).sum()
}

/// Row-wise normalization in log space: each row of `log_w` is shifted so that
/// its exponentials sum to one. Rows with only `-inf` entries are left as is.
pub(crate) fn normalize_log_rows(log_w: &mut Array2<f64>) -> Array1<f64> {
    let mut norms = Array1::zeros(log_w.nrows());
    for (mut row, norm) in log_w.rows_mut().into_iter().zip(norms.iter_mut()) {
        let lse = log_sum_exp(&row.view());
        *norm = lse;
        if lse.is_finite() {
            row.mapv_inplace(|v| v - lse);
        }
    }
    norms
}
