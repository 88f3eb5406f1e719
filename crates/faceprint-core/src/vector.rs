//! Shared vector arithmetic for fusion and aggregation.

/// Weight sums below this are treated as zero and fall back to a plain mean.
pub(crate) const WEIGHT_EPSILON: f64 = 1e-12;

/// Norms below this cannot be normalized.
const NORM_EPSILON: f64 = 1e-12;

/// Average `rows` component-wise, weighted by `weights` normalized to sum to 1.
///
/// Without weights, or when the weights sum to (near) zero, every row counts
/// equally. All rows must share the length of the first one.
pub(crate) fn weighted_mean(rows: &[&[f32]], weights: Option<&[f64]>) -> Vec<f64> {
    let dim = rows.first().map_or(0, |r| r.len());
    let mut acc = vec![0.0f64; dim];
    if rows.is_empty() {
        return acc;
    }

    let uniform = 1.0 / rows.len() as f64;
    let normalized: Vec<f64> = match weights {
        Some(w) => {
            let total: f64 = w.iter().sum();
            if total.abs() < WEIGHT_EPSILON || !total.is_finite() {
                tracing::debug!(total, "weight sum degenerate; using unweighted mean");
                vec![uniform; rows.len()]
            } else {
                w.iter().map(|x| x / total).collect()
            }
        }
        None => vec![uniform; rows.len()],
    };

    for (row, w) in rows.iter().zip(normalized.iter()) {
        for (slot, v) in acc.iter_mut().zip(row.iter()) {
            *slot += w * f64::from(*v);
        }
    }
    acc
}

/// L2-normalize, or `None` if the vector has no direction.
pub(crate) fn l2_normalize(values: &[f64]) -> Option<Vec<f32>> {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm < NORM_EPSILON || !norm.is_finite() {
        return None;
    }
    Some(values.iter().map(|v| (v / norm) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_unweighted() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let m = weighted_mean(&[&a, &b], None);
        assert_eq!(m, vec![0.5, 0.5]);
    }

    #[test]
    fn test_weights_are_renormalized() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let m = weighted_mean(&[&a, &b], Some(&[3.0, 1.0]));
        assert!((m[0] - 0.75).abs() < 1e-12);
        assert!((m[1] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weights_fall_back_to_mean() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let m = weighted_mean(&[&a, &b], Some(&[0.0, 0.0]));
        assert_eq!(m, vec![0.5, 0.5]);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert!(l2_normalize(&[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
