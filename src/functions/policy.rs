//! Cut-off policies for similarity hits.

use super::FunctionEntry;

/// Decides which ranked similarity hits survive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionPolicy {
    /// The first `n` hits by score.
    TopK(usize),
    /// Hits scoring at least `t`.
    Threshold(f64),
    /// Hits scoring at least `best - delta`.
    RelativeToBest(f64),
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::TopK(5)
    }
}

impl SelectionPolicy {
    /// Parses `top_k:<n>`, `threshold:<t>` or `relative:<delta>`.
    pub fn parse(s: &str) -> Option<Self> {
        let (name, value) = s.trim().split_once(':')?;
        let value = value.trim();
        match name.trim().to_lowercase().as_str() {
            "top_k" | "topk" => value.parse::<usize>().ok().filter(|n| *n > 0).map(Self::TopK),
            "threshold" => value
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .map(Self::Threshold),
            "relative" | "relative_to_best" => value
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(Self::RelativeToBest),
            _ => None,
        }
    }

    /// Applies the policy to hits ranked by descending score.
    ///
    /// Hits without a score never pass a score-based policy.
    pub fn select(&self, ranked: Vec<FunctionEntry>) -> Vec<FunctionEntry> {
        match *self {
            Self::TopK(n) => ranked.into_iter().take(n).collect(),
            Self::Threshold(t) => ranked
                .into_iter()
                .filter(|e| e.similarity_score.is_some_and(|s| s >= t))
                .collect(),
            Self::RelativeToBest(delta) => {
                let Some(best) = ranked.first().and_then(|e| e.similarity_score) else {
                    return Vec::new();
                };
                ranked
                    .into_iter()
                    .filter(|e| e.similarity_score.is_some_and(|s| s >= best - delta))
                    .collect()
            }
        }
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TopK(n) => write!(f, "top_k:{}", n),
            Self::Threshold(t) => write!(f, "threshold:{}", t),
            Self::RelativeToBest(d) => write!(f, "relative:{}", d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(scores: &[f64]) -> Vec<FunctionEntry> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| FunctionEntry {
                code: 1000 + i as i64,
                name: format!("f{}", i),
                description: String::new(),
                similarity_score: Some(*s),
            })
            .collect()
    }

    fn codes(entries: &[FunctionEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.code).collect()
    }

    #[test]
    fn parse_accepts_all_policies() {
        assert_eq!(SelectionPolicy::parse("top_k:3"), Some(SelectionPolicy::TopK(3)));
        assert_eq!(SelectionPolicy::parse(" threshold: 0.8 "), Some(SelectionPolicy::Threshold(0.8)));
        assert_eq!(
            SelectionPolicy::parse("relative:0.05"),
            Some(SelectionPolicy::RelativeToBest(0.05))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(SelectionPolicy::parse("top_k"), None);
        assert_eq!(SelectionPolicy::parse("top_k:0"), None);
        assert_eq!(SelectionPolicy::parse("relative:-1"), None);
        assert_eq!(SelectionPolicy::parse("best:1"), None);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let policy = SelectionPolicy::Threshold(0.75);
        assert_eq!(SelectionPolicy::parse(&policy.to_string()), Some(policy));
    }

    #[test]
    fn top_k_takes_prefix() {
        let selected = SelectionPolicy::TopK(2).select(ranked(&[0.9, 0.8, 0.7]));
        assert_eq!(codes(&selected), vec![1000, 1001]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let selected = SelectionPolicy::Threshold(0.8).select(ranked(&[0.9, 0.8, 0.7]));
        assert_eq!(codes(&selected), vec![1000, 1001]);
    }

    #[test]
    fn relative_keeps_hits_close_to_best() {
        let selected = SelectionPolicy::RelativeToBest(0.05).select(ranked(&[0.91, 0.88, 0.80]));
        assert_eq!(codes(&selected), vec![1000, 1001]);
    }

    #[test]
    fn relative_on_empty_input_is_empty() {
        assert!(SelectionPolicy::RelativeToBest(0.1).select(Vec::new()).is_empty());
    }
}
