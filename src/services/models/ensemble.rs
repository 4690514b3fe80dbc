//! Tree ensembles: bootstrap-aggregated forest and gradient boosting.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::tree::{normalize, RegressionTree, TreeParams};
use super::{check_rows, check_training_data, ModelError};

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    width: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    /// Fit `n_estimators` trees, each on a bootstrap sample drawn from `seed`.
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<f64>,
        n_estimators: usize,
        params: TreeParams,
        seed: u64,
    ) -> Result<Self, ModelError> {
        let width = check_training_data(x, y)?;
        let n = x.nrows();
        let mut rng = StdRng::seed_from_u64(seed);

        let trees: Vec<RegressionTree> = (0..n_estimators.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, &sample, params)
            })
            .collect();

        // Mean of the per-tree normalized importances, renormalized.
        let mut summed = vec![0.0; width];
        for tree in &trees {
            for (acc, v) in summed.iter_mut().zip(tree.feature_importances()) {
                *acc += v;
            }
        }
        let importances = normalize(&summed);

        Ok(Self {
            trees,
            width,
            importances,
        })
    }

    pub fn predict(&self, rows: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        check_rows(rows, self.width)?;
        let count = self.trees.len() as f64;
        Ok(rows
            .outer_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / count)
            .collect())
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

/// Squared-loss gradient boosting starting from the target mean.
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    width: usize,
    importances: Vec<f64>,
}

impl GradientBoosting {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<f64>,
        n_estimators: usize,
        learning_rate: f64,
        params: TreeParams,
    ) -> Result<Self, ModelError> {
        let width = check_training_data(x, y)?;
        let n = x.nrows();
        let all_rows: Vec<usize> = (0..n).collect();

        let init = y.sum() / n as f64;
        let mut current = Array1::from_elem(n, init);
        let mut trees = Vec::with_capacity(n_estimators);
        let mut summed = vec![0.0; width];

        for _ in 0..n_estimators {
            let residuals = y - &current;
            let tree = RegressionTree::fit(x, &residuals, &all_rows, params);
            for (c, row) in current.iter_mut().zip(x.outer_iter()) {
                *c += learning_rate * tree.predict_row(row);
            }
            for (acc, v) in summed.iter_mut().zip(tree.feature_importances()) {
                *acc += v;
            }
            trees.push(tree);
        }

        Ok(Self {
            init,
            learning_rate,
            trees,
            width,
            importances: normalize(&summed),
        })
    }

    pub fn predict(&self, rows: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        check_rows(rows, self.width)?;
        Ok(rows
            .outer_iter()
            .map(|row| {
                self.init
                    + self
                        .trees
                        .iter()
                        .map(|t| self.learning_rate * t.predict_row(row))
                        .sum::<f64>()
            })
            .collect())
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}
