//! Scoring candidates from the catalog against the media in the player.

use std::collections::HashMap;

use chatsync_proto::protocol::{AutoSelectConfig, CandidateMetadata, MatchConfig, TargetMetadata};

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub candidate: CandidateMetadata,
    /// 0..=100
    pub score: u32,
}

/// Keep candidates whose duration is within `tolerance_percent` of the
/// target.  Unknown durations on either side never exclude.
pub fn duration_filter<'a>(
    candidates: &'a [CandidateMetadata],
    target_duration: Option<f64>,
    tolerance_percent: f64,
) -> Vec<&'a CandidateMetadata> {
    let target = target_duration.filter(|d| d.is_finite() && *d > 0.0);
    candidates
        .iter()
        .filter(|c| match target {
            Some(target) if c.has_duration() => {
                (target - c.duration_secs).abs() <= c.duration_secs * tolerance_percent / 100.0
            }
            _ => true,
        })
        .collect()
}

/// Lowercase, drop everything but alphanumerics and whitespace, split.
pub fn tokenize(title: &str) -> Vec<String> {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

fn weighted_tokens(title: &str, numeric_weight: u32) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for token in tokenize(title) {
        let weight = if token.chars().all(|c| c.is_ascii_digit()) {
            numeric_weight
        } else {
            1
        };
        *counts.entry(token).or_insert(0) += weight;
    }
    counts
}

/// Weighted multiset overlap of the two titles, 0..=100.
pub fn title_similarity(a: &str, b: &str, numeric_weight: u32) -> u32 {
    let a = weighted_tokens(a, numeric_weight);
    let b = weighted_tokens(b, numeric_weight);
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut shared = 0u64;
    let mut total = 0u64;
    for (token, &count_a) in &a {
        let count_b = b.get(token).copied().unwrap_or(0);
        shared += u64::from(count_a.min(count_b));
        total += u64::from(count_a.max(count_b));
    }
    total += b
        .iter()
        .filter(|(token, _)| !a.contains_key(*token))
        .map(|(_, &count)| u64::from(count))
        .sum::<u64>();

    if total == 0 {
        return 0;
    }
    (100.0 * shared as f64 / total as f64).round() as u32
}

fn duration_score(candidate: &CandidateMetadata, target: &TargetMetadata) -> f64 {
    match target.known_duration() {
        Some(target) if candidate.has_duration() => {
            let longest = target.max(candidate.duration_secs);
            let diff = (target - candidate.duration_secs).abs();
            (100.0 - diff / longest * 100.0).max(0.0)
        }
        _ => 0.0,
    }
}

pub fn score(candidate: &CandidateMetadata, target: &TargetMetadata, config: &MatchConfig) -> u32 {
    let title = f64::from(title_similarity(
        &candidate.title,
        &target.title,
        config.numeric_weight,
    ));
    let duration = duration_score(candidate, target);
    let combined = duration * f64::from(config.duration_weight) / 100.0
        + title * f64::from(config.title_weight) / 100.0;
    combined.round().clamp(0.0, 100.0) as u32
}

/// Filter by duration, score the survivors, best first.  Equal scores keep
/// catalog order.
pub fn rank_and_filter(
    target: &TargetMetadata,
    candidates: &[CandidateMetadata],
    config: &MatchConfig,
) -> Vec<MatchResult> {
    let mut ranked: Vec<MatchResult> = duration_filter(
        candidates,
        target.known_duration(),
        config.duration_tolerance_percent,
    )
    .into_iter()
    .map(|c| MatchResult {
        score: score(c, target, config),
        candidate: c.clone(),
    })
    .collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

/// The top match if it is good enough and clearly ahead of the runner-up.
pub fn evaluate_auto_select<'a>(
    ranked: &'a [MatchResult],
    config: &AutoSelectConfig,
) -> Option<&'a MatchResult> {
    let top = ranked.first()?;
    if top.score < config.min_match_threshold {
        return None;
    }
    match ranked.get(1) {
        None => Some(top),
        Some(second) if top.score.saturating_sub(second.score) >= config.match_margin_threshold => {
            Some(top)
        }
        Some(_) => None,
    }
}

/// Manual browsing: every word typed must occur in the title.
pub fn search_filter<'a>(
    candidates: &'a [CandidateMetadata],
    text: &str,
) -> Vec<&'a CandidateMetadata> {
    let needles: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    candidates
        .iter()
        .filter(|c| {
            let title = c.title.to_lowercase();
            needles.iter().all(|n| title.contains(n.as_str()))
        })
        .collect()
}
