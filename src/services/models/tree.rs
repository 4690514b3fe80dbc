//! CART regression tree (squared-error splits) shared by both ensembles.

use ndarray::{Array1, Array2, ArrayView1};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    root: Node,
    /// Unnormalized squared-error reduction per feature
    impurity_decrease: Vec<f64>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Rows sorted by `feature`, left part first
    sorted: Vec<usize>,
    left_len: usize,
    gain: f64,
}

impl RegressionTree {
    /// Fit on the rows listed in `sample` (repeats allowed, for bootstraps).
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, sample: &[usize], params: TreeParams) -> Self {
        let mut impurity_decrease = vec![0.0; x.ncols()];
        let root = grow(x, y, sample.to_vec(), params, 0, &mut impurity_decrease);
        Self {
            root,
            impurity_decrease,
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    /// Importances normalized to sum to 1 (all zero for a single leaf).
    pub fn feature_importances(&self) -> Vec<f64> {
        normalize(&self.impurity_decrease)
    }
}

pub(crate) fn normalize(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; values.len()]
    }
}

fn grow(
    x: &Array2<f64>,
    y: &Array1<f64>,
    rows: Vec<usize>,
    params: TreeParams,
    depth: usize,
    importance: &mut [f64],
) -> Node {
    let n = rows.len() as f64;
    let sum: f64 = rows.iter().map(|&i| y[i]).sum();
    let mean = if rows.is_empty() { 0.0 } else { sum / n };

    let leaf_min = params.min_samples_leaf.max(1);
    if depth >= params.max_depth || rows.len() < 2 * leaf_min {
        return Node::Leaf(mean);
    }
    let sse: f64 = rows.iter().map(|&i| (y[i] - mean).powi(2)).sum();
    if sse <= 1e-12 {
        return Node::Leaf(mean);
    }

    let Some(best) = best_split(x, y, &rows, leaf_min) else {
        return Node::Leaf(mean);
    };
    importance[best.feature] += best.gain;

    let SplitCandidate {
        feature,
        threshold,
        mut sorted,
        left_len,
        ..
    } = best;
    let right_rows = sorted.split_off(left_len);
    Node::Split {
        feature,
        threshold,
        left: Box::new(grow(x, y, sorted, params, depth + 1, importance)),
        right: Box::new(grow(x, y, right_rows, params, depth + 1, importance)),
    }
}

/// Best squared-error split over every feature, scanning sorted values with
/// running sums.
fn best_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    rows: &[usize],
    leaf_min: usize,
) -> Option<SplitCandidate> {
    let n = rows.len();
    let total_sum: f64 = rows.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = rows.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;

    let mut best: Option<SplitCandidate> = None;
    for feature in 0..x.ncols() {
        let mut sorted = rows.to_vec();
        sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        let mut best_here: Option<(usize, f64)> = None;
        for k in 0..n - 1 {
            let yi = y[sorted[k]];
            left_sum += yi;
            left_sq += yi * yi;
            let left_len = k + 1;
            if left_len < leaf_min || n - left_len < leaf_min {
                continue;
            }
            let here = x[[sorted[k], feature]];
            let next = x[[sorted[k + 1], feature]];
            if next <= here {
                continue;
            }
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_len as f64)
                + (right_sq - right_sum * right_sum / (n - left_len) as f64);
            let gain = parent_sse - sse;
            if best_here.map_or(true, |(_, g)| gain > g) {
                best_here = Some((left_len, gain));
            }
        }

        if let Some((left_len, gain)) = best_here {
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                let threshold =
                    (x[[sorted[left_len - 1], feature]] + x[[sorted[left_len], feature]]) / 2.0;
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    sorted,
                    left_len,
                    gain,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(depth: usize) -> TreeParams {
        TreeParams {
            max_depth: depth,
            min_samples_leaf: 1,
        }
    }

    #[test]
    fn test_tree_learns_step() {
        let x = Array2::from_shape_fn((10, 2), |(i, j)| if j == 0 { i as f64 } else { 0.0 });
        let y = Array1::from_shape_fn(10, |i| if i < 5 { 1.0 } else { 9.0 });
        let rows: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(&x, &y, &rows, params(3));
        assert_eq!(tree.predict_row(array![2.0, 0.0].view()), 1.0);
        assert_eq!(tree.predict_row(array![7.0, 0.0].view()), 9.0);
        assert_eq!(tree.feature_importances(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_tree_depth_zero_is_mean() {
        let x = array![[0.0], [1.0]];
        let y = array![2.0, 4.0];
        let tree = RegressionTree::fit(&x, &y, &[0, 1], params(0));
        assert_eq!(tree.predict_row(array![5.0].view()), 3.0);
        assert_eq!(tree.feature_importances(), vec![0.0]);
    }

    #[test]
    fn test_tree_respects_min_samples_leaf() {
        let x = Array2::from_shape_fn((6, 1), |(i, _)| i as f64);
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 100.0];
        let tree = RegressionTree::fit(
            &x,
            &y,
            &[0, 1, 2, 3, 4, 5],
            TreeParams {
                max_depth: 5,
                min_samples_leaf: 3,
            },
        );
        // the outlier cannot be isolated in a leaf of its own
        assert!(tree.predict_row(array![5.0].view()) < 100.0);
    }

    #[test]
    fn test_tree_constant_feature_never_splits() {
        let x = Array2::from_elem((4, 1), 1.0);
        let y = array![1.0, 2.0, 3.0, 4.0];
        let tree = RegressionTree::fit(&x, &y, &[0, 1, 2, 3], params(4));
        assert_eq!(tree.predict_row(array![1.0].view()), 2.5);
    }
}
