//! Risk scoring
//!
//! The pipeline treats scoring as an opaque async function of path and name.
//! [`HeuristicScorer`] is the built-in implementation: a random baseline plus
//! fixed increments for paths and names that commonly show up in droppers.

use crate::config::ShieldConfig;
use crate::error::ScoringError;
use async_trait::async_trait;
use rand::Rng;
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

pub const BASELINE_MIN: f64 = 0.05;
pub const BASELINE_MAX: f64 = 0.25;
pub const TEMP_PATH_WEIGHT: f64 = 0.40;
pub const ODD_NAME_WEIGHT: f64 = 0.25;
pub const INTERPRETER_WEIGHT: f64 = 0.30;
/// Names longer than this count as odd.
pub const NAME_LENGTH_LIMIT: usize = 18;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RiskScorer: Send + Sync {
    /// Risk in [0, 1]; higher is riskier.
    async fn score(&self, executable_path: &Path, display_name: &str) -> Result<f64, ScoringError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Baseline {
    Random,
    Fixed(f64),
}

#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    temp_markers: Vec<String>,
    interpreter_markers: Vec<String>,
    baseline: Baseline,
}

impl HeuristicScorer {
    pub fn new(temp_markers: Vec<String>, interpreter_markers: Vec<String>) -> Self {
        Self {
            temp_markers: lowercase_all(temp_markers),
            interpreter_markers: lowercase_all(interpreter_markers),
            baseline: Baseline::Random,
        }
    }

    pub fn from_config(config: &ShieldConfig) -> Self {
        Self::new(config.temp_markers.clone(), config.interpreter_markers.clone())
    }

    /// Replace the random baseline with a constant.
    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Baseline::Fixed(baseline);
        self
    }

    fn baseline(&self) -> f64 {
        match self.baseline {
            Baseline::Random => rand::thread_rng().gen_range(BASELINE_MIN..BASELINE_MAX),
            Baseline::Fixed(value) => value,
        }
    }

    /// Unclamped sum of the baseline and every matching increment.
    pub fn raw_score(&self, executable_path: &Path, display_name: &str) -> f64 {
        let path = executable_path.to_string_lossy().to_lowercase();
        let name = display_name.to_lowercase();
        let mut score = self.baseline();

        if self.temp_markers.iter().any(|marker| path.contains(marker.as_str())) {
            score += TEMP_PATH_WEIGHT;
        }
        if is_odd_name(display_name) {
            score += ODD_NAME_WEIGHT;
        }
        if self
            .interpreter_markers
            .iter()
            .any(|marker| name.contains(marker.as_str()))
        {
            score += INTERPRETER_WEIGHT;
        }
        score
    }
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self::from_config(&ShieldConfig::default())
    }
}

#[async_trait]
impl RiskScorer for HeuristicScorer {
    async fn score(&self, executable_path: &Path, display_name: &str) -> Result<f64, ScoringError> {
        clamp_score(self.raw_score(executable_path, display_name))
    }
}

fn lowercase_all(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|value| value.to_lowercase()).collect()
}

fn is_odd_name(name: &str) -> bool {
    name.chars().count() > NAME_LENGTH_LIMIT || name.matches('.').count() > 1
}

pub fn clamp_score(raw: f64) -> Result<f64, ScoringError> {
    if !raw.is_finite() {
        return Err(ScoringError::NonFinite(raw));
    }
    Ok(raw.clamp(0.0, 1.0))
}

/// Score under a deadline. The result is always clamped to [0, 1] or an error.
pub async fn score_within(
    scorer: &dyn RiskScorer,
    executable_path: &Path,
    display_name: &str,
    limit: Duration,
) -> Result<f64, ScoringError> {
    match tokio::time::timeout(limit, scorer.score(executable_path, display_name)).await {
        Ok(result) => clamp_score(result?),
        Err(_) => Err(ScoringError::Timeout(limit)),
    }
}
