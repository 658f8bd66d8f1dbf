//! Gaussian smoothing with mirrored edges.
//!
//! The kernel is truncated at four standard deviations and the signal is
//! extended by half-sample reflection (`d c b a | a b c d | d c b a`), so a
//! constant signal stays constant and total energy is preserved.

const TRUNCATE: f64 = 4.0;

/// Largest sigma honoured; wider kernels are built at this width.
pub const MAX_SIGMA: f64 = 1024.0;

/// Normalized Gaussian weights of radius `round(4σ)`; `[1.0]` for σ = 0.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma.is_nan() || sigma <= 0.0 {
        return vec![1.0];
    }
    let sigma = sigma.min(MAX_SIGMA);
    let radius = (TRUNCATE * sigma + 0.5) as i64;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as f64 / (sigma * sigma)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Index into a signal of length `n` after half-sample reflection.
fn reflect(index: i64, n: usize) -> usize {
    let n = n as i64;
    let period = 2 * n;
    let m = index.rem_euclid(period);
    (if m >= n { period - 1 - m } else { m }) as usize
}

fn convolve_strided(
    input: &[f64],
    output: &mut [f64],
    offset: usize,
    stride: usize,
    len: usize,
    kernel: &[f64],
) {
    let half = (kernel.len() / 2) as i64;
    for i in 0..len {
        let mut acc = 0.0;
        for (j, w) in kernel.iter().enumerate() {
            let src = reflect(i as i64 + j as i64 - half, len);
            acc += input[offset + src * stride] * w;
        }
        output[offset + i * stride] = acc;
    }
}

/// Smooth a 1D signal.
pub fn gaussian_filter_1d(signal: &[f64], sigma: f64) -> Vec<f64> {
    let kernel = gaussian_kernel(sigma);
    if kernel.len() == 1 || signal.is_empty() {
        return signal.to_vec();
    }
    let mut output = vec![0.0; signal.len()];
    convolve_strided(signal, &mut output, 0, 1, signal.len(), &kernel);
    output
}

/// Smooth a row-major `rows × cols` grid with the same sigma on both axes.
pub fn gaussian_filter_2d(grid: &[f64], rows: usize, cols: usize, sigma: f64) -> Vec<f64> {
    let kernel = gaussian_kernel(sigma);
    if kernel.len() == 1 || grid.is_empty() {
        return grid.to_vec();
    }

    // Down the columns first, then along the rows.
    let mut vertical = vec![0.0; grid.len()];
    for col in 0..cols {
        convolve_strided(grid, &mut vertical, col, cols, rows, &kernel);
    }
    let mut output = vec![0.0; grid.len()];
    for row in 0..rows {
        convolve_strided(&vertical, &mut output, row * cols, 1, cols, &kernel);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(1.5);
        assert_eq!(kernel.len(), 13); // radius round(6.0) = 6
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(kernel[0], kernel[12]);
        assert!(kernel[6] > kernel[5]);
    }

    #[test]
    fn kernel_radius_is_bounded() {
        let widest = gaussian_kernel(MAX_SIGMA).len();
        assert_eq!(widest, 8193);
        assert_eq!(gaussian_kernel(1e15).len(), widest);
        assert_eq!(gaussian_kernel(f64::INFINITY).len(), widest);
        assert_eq!(gaussian_kernel(f64::NAN), vec![1.0]);
    }

    #[test]
    fn zero_sigma_is_identity() {
        let signal = vec![0.0, 3.0, 1.0];
        assert_eq!(gaussian_filter_1d(&signal, 0.0), signal);
    }

    #[test]
    fn reflection_indices() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(-9, 4), 0);
        assert_eq!(reflect(3, 1), 0);
    }

    #[test]
    fn constant_signal_is_preserved() {
        let smoothed = gaussian_filter_1d(&[2.0; 7], 5.0);
        for value in smoothed {
            assert!((value - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn impulse_spreads_and_keeps_mass() {
        let mut signal = vec![0.0; 41];
        signal[20] = 1.0;
        let smoothed = gaussian_filter_1d(&signal, 2.0);
        assert!((smoothed.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(smoothed[20] < 1.0);
        assert!(smoothed[19] > 0.0 && (smoothed[19] - smoothed[21]).abs() < 1e-12);
    }

    #[test]
    fn grid_smoothing_keeps_mass() {
        let (rows, cols) = (9, 11);
        let mut grid = vec![0.0; rows * cols];
        grid[4 * cols + 5] = 2.0;
        grid[0] = 1.0;
        let smoothed = gaussian_filter_2d(&grid, rows, cols, 1.5);
        assert!((smoothed.iter().sum::<f64>() - 3.0).abs() < 1e-9);
        assert!(smoothed[4 * cols + 5] < 2.0);
        assert!(smoothed[3 * cols + 5] > 0.0);
    }
}
