//! Per-game scoring
//!
//! Turns a finished game's outcome into a [`TaskResult`]: spectral features
//! (where the game has an RT stream worth analysing), the domain index and
//! quality flags.

use crate::error::AssessmentError;
use crate::games::GameOutcome;
use crate::indices;
use crate::metrics;
use crate::signal::{self, DEFAULT_MIN_RT_MS};
use crate::types::{GameId, QualityFlag, RawMetrics, SpectralFeatures, StimulusType, TaskResult, Trial};

/// Share of response-expected trials that must carry an RT
pub const MIN_VALID_RESPONSE_RATIO: f64 = 0.5;

/// Share of RTs below the anticipation floor that raises a flag
pub const MAX_ANTICIPATION_RATIO: f64 = 0.1;

/// Gap presses tolerated before a SteadySpeed run is flagged
pub const MAX_FALSE_STARTS: u32 = 5;

/// Score one finished game
pub fn score_game(outcome: &GameOutcome) -> Result<TaskResult, AssessmentError> {
    let game = outcome.game_id;
    if outcome.metrics.game_id() != game {
        return Err(AssessmentError::InvalidState(format!(
            "metrics for {} attached to {game}",
            outcome.metrics.game_id()
        )));
    }

    let features = if game.requires_spectral() {
        let series = metrics::spectral_series(game, &outcome.trials);
        let features = signal::analyze_rt(&series, outcome.sampling_cycle_ms);
        if features == SpectralFeatures::zero() {
            tracing::warn!(game = %game, samples = series.len(), "degenerate RT series; spectral features are zero");
        }
        Some(features)
    } else {
        None
    };
    let spectral = features.unwrap_or_default();

    let mut result = match &outcome.metrics {
        RawMetrics::FocusFlow {
            miss_rate,
            commission_rate,
            mean_rt_ms,
            ..
        } => {
            let mut r = TaskResult::new(game, indices::asi(*miss_rate, spectral.r_l, spectral.r_m));
            r.miss_rate = Some(*miss_rate);
            r.commission_rate = Some(*commission_rate);
            r.mean_rt_ms = Some(*mean_rt_ms);
            r
        }
        RawMetrics::StopAndGo {
            commission_rate, ..
        } => {
            let mut r = TaskResult::new(game, indices::ici(*commission_rate, spectral.r_h));
            r.commission_rate = Some(*commission_rate);
            r
        }
        RawMetrics::MemorySteps { accuracy, .. } => {
            let mut r = TaskResult::new(game, indices::wme(*accuracy));
            r.accuracy = Some(*accuracy);
            r
        }
        RawMetrics::SteadySpeed { mean_rt_ms, cv, .. } => {
            let mut r = TaskResult::new(game, indices::pci(*cv, spectral.r_h));
            r.mean_rt_ms = Some(*mean_rt_ms);
            r.cv = Some(*cv);
            r
        }
        RawMetrics::SwitchSmart {
            accuracy,
            switch_cost_ms,
            ..
        } => {
            let mut r = TaskResult::new(game, indices::cfi(*switch_cost_ms));
            r.accuracy = Some(*accuracy);
            r.switch_cost_ms = Some(*switch_cost_ms);
            r
        }
    };

    if let Some(features) = features {
        result = result.with_spectral(&features);
    }
    result.quality_flags = quality_flags(game, &outcome.trials, &outcome.metrics);
    Ok(result)
}

/// Score a stored trial batch without a live machine
pub fn score_trials(
    game: GameId,
    trials: &[Trial],
    sampling_cycle_ms: f64,
) -> Result<TaskResult, AssessmentError> {
    let outcome = GameOutcome {
        game_id: game,
        trials: trials.to_vec(),
        metrics: metrics::compute(game, trials),
        sampling_cycle_ms,
    };
    score_game(&outcome)
}

/// Data-quality markers for a trial batch
pub fn quality_flags(game: GameId, trials: &[Trial], raw: &RawMetrics) -> Vec<QualityFlag> {
    let mut flags = Vec::new();

    let expected: Vec<&Trial> = match game {
        GameId::FocusFlow | GameId::StopAndGo => trials
            .iter()
            .filter(|t| t.stimulus_type == StimulusType::Go)
            .collect(),
        GameId::SteadySpeed | GameId::SwitchSmart => trials.iter().collect(),
        GameId::MemorySteps => Vec::new(),
    };

    if !expected.is_empty() {
        let rts: Vec<f64> = expected.iter().filter_map(|t| t.rt_ms).collect();
        if (rts.len() as f64) < expected.len() as f64 * MIN_VALID_RESPONSE_RATIO {
            flags.push(QualityFlag::FewValidResponses);
        }
        let anticipations = rts.iter().filter(|rt| **rt < DEFAULT_MIN_RT_MS).count();
        if !rts.is_empty() && anticipations as f64 > rts.len() as f64 * MAX_ANTICIPATION_RATIO {
            flags.push(QualityFlag::ManyAnticipations);
        }
    }

    if let RawMetrics::SteadySpeed { false_starts, .. } = raw {
        if *false_starts > MAX_FALSE_STARTS {
            flags.push(QualityFlag::FalseStarts);
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Domain, TrialFlags};
    use pretty_assertions::assert_eq;

    fn trial(game: GameId, index: u32, kind: StimulusType, rt: Option<f64>) -> Trial {
        Trial {
            game_id: game,
            trial_index: index,
            trial_start_ms: index as f64 * 1500.0,
            stimulus_type: kind,
            rt_ms: rt,
            response_code: None,
            correct: None,
            flags: TrialFlags::default(),
        }
    }

    #[test]
    fn test_memory_steps_skips_spectral() {
        let mut trials: Vec<Trial> = (0..4)
            .map(|i| trial(GameId::MemorySteps, i, StimulusType::Sequence, Some(1500.0)))
            .collect();
        trials[0].correct = Some(true);
        trials[1].correct = Some(true);
        trials[2].correct = Some(true);

        let result = score_trials(GameId::MemorySteps, &trials, 900.0).unwrap();
        assert_eq!(result.index, 0.75);
        assert_eq!(result.domain, Domain::WorkingMemory);
        assert_eq!(result.r_l, None);
        assert_eq!(result.accuracy, Some(0.75));
        assert!(result.quality_flags.is_empty());
    }

    #[test]
    fn test_constant_rts_give_zero_features() {
        let trials: Vec<Trial> = (0..16)
            .map(|i| trial(GameId::StopAndGo, i, StimulusType::Go, Some(500.0)))
            .collect();
        let result = score_trials(GameId::StopAndGo, &trials, 1500.0).unwrap();
        assert_eq!(result.r_h, Some(0.0));
        assert_eq!(result.commission_rate, Some(0.0));
        assert_eq!(result.index, 1.0);
    }

    #[test]
    fn test_switch_cost_drives_cfi() {
        let mut trials = vec![
            trial(GameId::SwitchSmart, 0, StimulusType::Card, Some(500.0)),
            trial(GameId::SwitchSmart, 1, StimulusType::Card, Some(700.0)),
        ];
        trials[1].flags.is_switch = Some(true);
        let result = score_trials(GameId::SwitchSmart, &trials, 2000.0).unwrap();
        assert_eq!(result.switch_cost_ms, Some(200.0));
        assert_eq!(result.index, 0.5);
        assert!(result.r_l.is_some());
    }

    #[test]
    fn test_quality_flags() {
        let mut trials: Vec<Trial> = (0..10)
            .map(|i| trial(GameId::SteadySpeed, i, StimulusType::Cue, None))
            .collect();
        trials[0].rt_ms = Some(90.0);
        trials[1].rt_ms = Some(400.0);
        trials[2].flags.false_starts = Some(6);

        let raw = metrics::compute(GameId::SteadySpeed, &trials);
        assert_eq!(
            quality_flags(GameId::SteadySpeed, &trials, &raw),
            vec![
                QualityFlag::FewValidResponses,
                QualityFlag::ManyAnticipations,
                QualityFlag::FalseStarts
            ]
        );
    }

    #[test]
    fn test_mismatched_metrics_rejected() {
        let outcome = GameOutcome {
            game_id: GameId::FocusFlow,
            trials: Vec::new(),
            metrics: RawMetrics::StopAndGo {
                commission_rate: 0.0,
                nogo_count: 0,
            },
            sampling_cycle_ms: 1500.0,
        };
        assert!(score_game(&outcome).is_err());
    }
}
