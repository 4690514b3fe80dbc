//! Ordinary least squares with an intercept.

use ndarray::{s, Array1, Array2};

use super::{check_rows, check_training_data, ModelError};

/// Added to the non-intercept diagonal so collinear or constant features
/// still yield a solvable system.
const RIDGE: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct LinearRegression {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl LinearRegression {
    /// Solve the normal equations `(XᵀX) β = Xᵀy` for `[intercept, coefficients...]`.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> Result<Self, ModelError> {
        let width = check_training_data(x, y)?;
        let dim = width + 1;

        let mut design = Array2::<f64>::ones((x.nrows(), dim));
        design.slice_mut(s![.., 1..]).assign(x);
        let mut xtx = design.t().dot(&design);
        let xty = design.t().dot(y);
        for i in 1..dim {
            xtx[[i, i]] += RIDGE;
        }

        let beta = solve(xtx, xty)?;
        Ok(Self {
            intercept: beta[0],
            coefficients: beta.slice(s![1..]).to_owned(),
        })
    }

    pub fn predict(&self, rows: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        check_rows(rows, self.coefficients.len())?;
        Ok(rows.dot(&self.coefficients) + self.intercept)
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, ModelError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-12 {
            return Err(ModelError::Singular);
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }

        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::Singular);
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_exact_line() {
        let x = Array2::from_shape_fn((10, 2), |(i, j)| if j == 0 { i as f64 } else { (i * i) as f64 });
        let y = x.map_axis(ndarray::Axis(1), |r| 3.0 + 2.0 * r[0] - 0.5 * r[1]);
        let model = LinearRegression::fit(&x, &y).unwrap();
        assert!((model.intercept - 3.0).abs() < 1e-4);
        assert!((model.coefficients[0] - 2.0).abs() < 1e-4);
        assert!((model.coefficients[1] + 0.5).abs() < 1e-4);
        let p = model.predict(&array![[20.0, 400.0]]).unwrap();
        assert!((p[0] - (3.0 + 40.0 - 200.0)).abs() < 1e-2);
    }

    #[test]
    fn test_fit_constant_feature_is_not_singular() {
        let x = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let y = array![2.0, 4.0, 6.0];
        let model = LinearRegression::fit(&x, &y).unwrap();
        let p = model.predict(&x).unwrap();
        for (pred, actual) in p.iter().zip(&y) {
            assert!((pred - actual).abs() < 1e-3);
        }
    }

    #[test]
    fn test_predict_dimension_mismatch() {
        let model = LinearRegression {
            intercept: 0.0,
            coefficients: array![1.0, 1.0],
        };
        assert!(matches!(
            model.predict(&array![[1.0]]),
            Err(ModelError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_fit_rejects_nan() {
        assert_eq!(
            LinearRegression::fit(&array![[f64::NAN]], &array![1.0]).unwrap_err(),
            ModelError::NonFiniteInput
        );
    }
}
