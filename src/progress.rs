//! Progress across sessions
//!
//! Compares a child's newest cognitive profile with the rolling mean of the
//! profiles before it. Deviations are in index units, since every index
//! already lives in [0, 1].

use crate::error::StoreError;
use crate::store::AssessmentStore;
use crate::types::{CognitiveProfile, Domain};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of earlier profiles in the rolling baseline
pub const DEFAULT_PROGRESS_WINDOW: usize = 3;

/// Smallest change in an index treated as a real trend
pub const TREND_THRESHOLD: f64 = 0.05;

/// Direction of change for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl Trend {
    fn from_deviation(deviation: f64) -> Self {
        if deviation > TREND_THRESHOLD {
            Trend::Improving
        } else if deviation < -TREND_THRESHOLD {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

/// Newest value for one domain against its rolling baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainProgress {
    pub domain: Domain,
    pub current: f64,
    /// Mean of the earlier profiles; None for a first assessment
    pub baseline: Option<f64>,
    pub deviation: Option<f64>,
    pub trend: Option<Trend>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub child_id: String,
    pub session_id: String,
    pub priority_domain: Domain,
    pub domains: Vec<DomainProgress>,
    /// Earlier profiles that formed the baseline
    pub baseline_sessions: u32,
    pub retest_due_at: DateTime<Utc>,
}

/// Rolling-baseline comparison of profiles
#[derive(Debug, Clone, Copy)]
pub struct ProgressTracker {
    window_size: usize,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_WINDOW)
    }
}

impl ProgressTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Evaluate profiles given newest first; None when there are none
    pub fn evaluate(
        &self,
        profiles: &[CognitiveProfile],
        retest_days: u32,
    ) -> Option<ProgressReport> {
        let (latest, earlier) = profiles.split_first()?;
        let window: VecDeque<&CognitiveProfile> =
            earlier.iter().take(self.window_size).collect();

        let domains = Domain::ALL
            .into_iter()
            .map(|domain| {
                let current = latest.indices.get(domain);
                let baseline =
                    rolling_average(window.iter().map(|p| p.indices.get(domain)));
                let deviation = baseline.map(|b| current - b);
                DomainProgress {
                    domain,
                    current,
                    baseline,
                    deviation,
                    trend: deviation.map(Trend::from_deviation),
                }
            })
            .collect();

        Some(ProgressReport {
            child_id: latest.child_id.clone(),
            session_id: latest.session_id.clone(),
            priority_domain: latest.priority_domain,
            domains,
            baseline_sessions: window.len() as u32,
            retest_due_at: latest.created_at + Duration::days(retest_days as i64),
        })
    }

    /// Load the child's recent profiles from `store` and evaluate them
    pub fn evaluate_child<S: AssessmentStore + ?Sized>(
        &self,
        store: &S,
        child_id: &str,
        retest_days: u32,
    ) -> Result<Option<ProgressReport>, StoreError> {
        let profiles = store.get_child_profiles(child_id, self.window_size + 1)?;
        Ok(self.evaluate(&profiles, retest_days))
    }
}

fn rolling_average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
