// Asymmetric-cost gain metric. Contacting a customer that actually leaves
// earns `reward`; contacting one that stays burns `cost`. Ranking customers
// by descending score and cumulatively summing signed gains yields the curve
// every selection decision is read from.

#[derive(Debug, Clone, Copy)]
pub struct GainParams {
    pub reward: f64,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct GainCurve {
    /// Cumulative gain at contact rank r, at index r-1.
    pub cumulative: Vec<f64>,
}

impl GainCurve {
    /// Maximum cumulative gain and the smallest 1-based rank achieving it.
    /// An empty curve reports zero gain at rank 0.
    pub fn max_gain(&self) -> (f64, usize) {
        let mut best = f64::NEG_INFINITY;
        let mut best_rank = 0;
        for (i, &g) in self.cumulative.iter().enumerate() {
            if g > best {
                best = g;
                best_rank = i + 1;
            }
        }
        if best_rank == 0 {
            (0.0, 0)
        } else {
            (best, best_rank)
        }
    }

    /// Maximum restricted to the inclusive rank window [floor, ceiling],
    /// clamped to the curve length; first rank wins ties.
    pub fn max_gain_in_window(&self, floor: usize, ceiling: usize) -> (f64, usize) {
        let n = self.cumulative.len();
        if n == 0 {
            return (0.0, 0);
        }
        let lo = floor.max(1).min(n);
        let hi = ceiling.min(n);
        let mut best = f64::NEG_INFINITY;
        let mut best_rank = lo;
        for rank in lo..=hi {
            let g = self.cumulative[rank - 1];
            if g > best {
                best = g;
                best_rank = rank;
            }
        }
        (best, best_rank)
    }

    pub fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }
}

/// Descending stable sort order of the scores: ties keep original row order.
pub fn ranking_order(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// Build the cumulative-gain curve for one scored population.
pub fn gain_curve(scores: &[f64], eligible: &[bool], params: &GainParams) -> GainCurve {
    debug_assert_eq!(scores.len(), eligible.len());
    let order = ranking_order(scores);
    let mut cumulative = Vec::with_capacity(order.len());
    let mut running = 0.0;
    for &i in &order {
        running += if eligible[i] {
            params.reward
        } else {
            -params.cost
        };
        cumulative.push(running);
    }
    GainCurve { cumulative }
}

/// Scalar summary used as the cross-validation objective: the curve maximum.
pub fn max_gain(scores: &[f64], eligible: &[bool], params: &GainParams) -> f64 {
    gain_curve(scores, eligible, params).max_gain().0
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: GainParams = GainParams {
        reward: 1000.0,
        cost: 100.0,
    };

    #[test]
    fn test_reference_curve() {
        // scores [0.9, 0.1, 0.5], churners at rows 0 and 2: sorted order
        // [0, 2, 1], signed gains [1000, 1000, -100].
        let scores = [0.9, 0.1, 0.5];
        let eligible = [true, false, true];
        let curve = gain_curve(&scores, &eligible, &PARAMS);
        assert_eq!(curve.cumulative, vec![1000.0, 2000.0, 1900.0]);
        assert_eq!(curve.max_gain(), (2000.0, 2));
    }

    #[test]
    fn test_invariant_under_monotone_rescaling() {
        let scores = [0.9, 0.1, 0.5, 0.3];
        let eligible = [true, false, true, false];
        let rescaled: Vec<f64> = scores.iter().map(|s| s * 100.0 + 7.0).collect();
        let a = gain_curve(&scores, &eligible, &PARAMS);
        let b = gain_curve(&rescaled, &eligible, &PARAMS);
        assert_eq!(a.cumulative, b.cumulative);
    }

    #[test]
    fn test_total_matches_unordered_sum() {
        let scores = [0.2, 0.8, 0.5, 0.1, 0.9];
        let eligible = [false, true, false, true, false];
        let curve = gain_curve(&scores, &eligible, &PARAMS);
        let expected: f64 = eligible
            .iter()
            .map(|&e| if e { PARAMS.reward } else { -PARAMS.cost })
            .sum();
        assert!((curve.total() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ties_keep_original_row_order() {
        let scores = [0.5, 0.5, 0.5];
        let eligible = [true, false, true];
        assert_eq!(ranking_order(&scores), vec![0, 1, 2]);
        let curve = gain_curve(&scores, &eligible, &PARAMS);
        assert_eq!(curve.cumulative, vec![1000.0, 900.0, 1900.0]);
    }

    #[test]
    fn test_smallest_rank_wins_at_equal_max() {
        // reward == cost: curve [r, 0, r, 0] style plateaus.
        let params = GainParams {
            reward: 100.0,
            cost: 100.0,
        };
        let scores = [0.9, 0.8, 0.7, 0.6];
        let eligible = [true, false, true, false];
        let curve = gain_curve(&scores, &eligible, &params);
        assert_eq!(curve.cumulative, vec![100.0, 0.0, 100.0, 0.0]);
        assert_eq!(curve.max_gain(), (100.0, 1));
    }

    #[test]
    fn test_window_bounds_inclusive() {
        let params = GainParams {
            reward: 10.0,
            cost: 1.0,
        };
        let scores = [0.9, 0.8, 0.7, 0.6, 0.5];
        let eligible = [true, false, true, true, false];
        let curve = gain_curve(&scores, &eligible, &params);
        // cumulative: [10, 9, 19, 29, 28]
        assert_eq!(curve.max_gain_in_window(2, 3), (19.0, 3));
        assert_eq!(curve.max_gain_in_window(4, 4), (29.0, 4));
        // Window clamps to curve length.
        assert_eq!(curve.max_gain_in_window(2, 50), (29.0, 4));
    }

    #[test]
    fn test_empty_curve() {
        let curve = gain_curve(&[], &[], &PARAMS);
        assert_eq!(curve.max_gain(), (0.0, 0));
        assert_eq!(curve.total(), 0.0);
    }
}
