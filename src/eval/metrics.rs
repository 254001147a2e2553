//! Information-retrieval metrics over a ranked id list.
//!
//! Ranks are 1-based. `returned` is the system's ranking, `expected` the set
//! of relevant ids. Graded relevance uses `(2^g − 1) / log2(i + 2)` gains.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Metrics for one query, or their mean over a suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(rename = "precision@1")]
    pub precision_1: f64,
    #[serde(rename = "precision@5")]
    pub precision_5: f64,
    #[serde(rename = "precision@10")]
    pub precision_10: f64,

    #[serde(rename = "recall@5")]
    pub recall_5: f64,
    #[serde(rename = "recall@10")]
    pub recall_10: f64,
    #[serde(rename = "recall@50")]
    pub recall_50: f64,

    pub mrr: f64,

    #[serde(rename = "ndcg@5")]
    pub ndcg_5: f64,
    #[serde(rename = "ndcg@10")]
    pub ndcg_10: f64,

    pub map: f64,

    /// 1.0 when any relevant id was returned.
    pub hit_rate: f64,
}

impl Metrics {
    /// Scores `returned` against the relevant ids.
    ///
    /// Without `grades` every expected id has grade 1.
    pub fn compute(
        returned: &[String],
        expected: &[String],
        grades: Option<&HashMap<String, u32>>,
    ) -> Self {
        let relevant: HashSet<&str> = expected.iter().map(String::as_str).collect();
        let binary: HashMap<String, u32>;
        let grades = match grades {
            Some(grades) => grades,
            None => {
                binary = expected.iter().map(|id| (id.clone(), 1)).collect();
                &binary
            }
        };

        Self {
            precision_1: precision(returned, &relevant, 1),
            precision_5: precision(returned, &relevant, 5),
            precision_10: precision(returned, &relevant, 10),
            recall_5: recall(returned, &relevant, 5),
            recall_10: recall(returned, &relevant, 10),
            recall_50: recall(returned, &relevant, 50),
            mrr: reciprocal_rank(returned, &relevant),
            ndcg_5: ndcg(returned, grades, 5),
            ndcg_10: ndcg(returned, grades, 10),
            map: average_precision(returned, &relevant),
            hit_rate: hit_rate(returned, &relevant),
        }
    }

    /// Arithmetic mean. An empty input gives all zeros.
    pub fn mean<'a>(items: impl IntoIterator<Item = &'a Metrics>) -> Self {
        let mut sum = Self::default();
        let mut n = 0usize;
        for m in items {
            n += 1;
            sum.precision_1 += m.precision_1;
            sum.precision_5 += m.precision_5;
            sum.precision_10 += m.precision_10;
            sum.recall_5 += m.recall_5;
            sum.recall_10 += m.recall_10;
            sum.recall_50 += m.recall_50;
            sum.mrr += m.mrr;
            sum.ndcg_5 += m.ndcg_5;
            sum.ndcg_10 += m.ndcg_10;
            sum.map += m.map;
            sum.hit_rate += m.hit_rate;
        }
        if n == 0 {
            return sum;
        }

        let n = n as f64;
        Self {
            precision_1: sum.precision_1 / n,
            precision_5: sum.precision_5 / n,
            precision_10: sum.precision_10 / n,
            recall_5: sum.recall_5 / n,
            recall_10: sum.recall_10 / n,
            recall_50: sum.recall_50 / n,
            mrr: sum.mrr / n,
            ndcg_5: sum.ndcg_5 / n,
            ndcg_10: sum.ndcg_10 / n,
            map: sum.map / n,
            hit_rate: sum.hit_rate / n,
        }
    }
}

fn hits_in_top(returned: &[String], relevant: &HashSet<&str>, k: usize) -> usize {
    returned
        .iter()
        .take(k)
        .filter(|id| relevant.contains(id.as_str()))
        .count()
}

/// Relevant ids in the top `k`, divided by `k` (not by the number returned).
pub fn precision(returned: &[String], relevant: &HashSet<&str>, k: usize) -> f64 {
    if k == 0 || returned.is_empty() {
        return 0.0;
    }
    hits_in_top(returned, relevant, k) as f64 / k as f64
}

/// Share of the relevant ids found in the top `k`.
pub fn recall(returned: &[String], relevant: &HashSet<&str>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_in_top(returned, relevant, k) as f64 / relevant.len() as f64
}

/// `1 / rank` of the first relevant id, 0 when none is returned.
pub fn reciprocal_rank(returned: &[String], relevant: &HashSet<&str>) -> f64 {
    returned
        .iter()
        .position(|id| relevant.contains(id.as_str()))
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

fn gain(grade: u32, position: usize) -> f64 {
    (2f64.powi(grade as i32) - 1.0) / ((position + 2) as f64).log2()
}

/// Discounted cumulative gain of the top `k`.
pub fn dcg(returned: &[String], grades: &HashMap<String, u32>, k: usize) -> f64 {
    returned
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, id)| gain(grades.get(id).copied().unwrap_or(0), i))
        .sum()
}

/// DCG of the best possible ordering of `grades`.
pub fn ideal_dcg(grades: &HashMap<String, u32>, k: usize) -> f64 {
    let mut sorted: Vec<u32> = grades.values().copied().collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(i, g)| gain(g, i))
        .sum()
}

/// `dcg / ideal_dcg`, 0 when nothing is relevant.
pub fn ndcg(returned: &[String], grades: &HashMap<String, u32>, k: usize) -> f64 {
    let ideal = ideal_dcg(grades, k);
    if ideal == 0.0 {
        return 0.0;
    }
    dcg(returned, grades, k) / ideal
}

/// Mean of the precision at each relevant hit, over all relevant ids.
pub fn average_precision(returned: &[String], relevant: &HashSet<&str>) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let mut seen = 0usize;
    let mut sum = 0.0;
    for (i, id) in returned.iter().enumerate() {
        if relevant.contains(id.as_str()) {
            seen += 1;
            sum += seen as f64 / (i + 1) as f64;
        }
    }
    sum / relevant.len() as f64
}

pub fn hit_rate(returned: &[String], relevant: &HashSet<&str>) -> f64 {
    if returned.iter().any(|id| relevant.contains(id.as_str())) {
        1.0
    } else {
        0.0
    }
}
