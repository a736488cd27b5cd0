//! Raw per-game metrics
//!
//! Metrics are derived from the trial list alone, so a stored trial batch can
//! be re-scored later with the same results the live machine produced.

use crate::games::{BatteryConfig, SteadySpeedConfig};
use crate::types::{GameId, RawMetrics, StimulusType, Trial};

/// Raw metrics for `game` from its trials
pub fn compute(game: GameId, trials: &[Trial]) -> RawMetrics {
    match game {
        GameId::FocusFlow => focus_flow(trials),
        GameId::StopAndGo => stop_and_go(trials),
        GameId::MemorySteps => memory_steps(trials),
        GameId::SteadySpeed => steady_speed(trials),
        GameId::SwitchSmart => switch_smart(trials),
    }
}

/// Miss rate over GO trials, commission rate over NOGO trials, mean hit RT
pub fn focus_flow(trials: &[Trial]) -> RawMetrics {
    let counts = GoNoGoCounts::tally(trials);
    RawMetrics::FocusFlow {
        miss_rate: ratio(counts.misses, counts.go),
        commission_rate: ratio(counts.commissions, counts.no_go),
        mean_rt_ms: mean(&counts.hit_rts),
        go_count: counts.go,
        nogo_count: counts.no_go,
    }
}

/// Commission rate only
pub fn stop_and_go(trials: &[Trial]) -> RawMetrics {
    let counts = GoNoGoCounts::tally(trials);
    RawMetrics::StopAndGo {
        commission_rate: ratio(counts.commissions, counts.no_go),
        nogo_count: counts.no_go,
    }
}

/// Share of sequences reproduced exactly
pub fn memory_steps(trials: &[Trial]) -> RawMetrics {
    let sequences = trials.len() as u32;
    let correct: Vec<&Trial> = trials.iter().filter(|t| t.correct == Some(true)).collect();
    let longest_correct_span = correct
        .iter()
        .filter_map(|t| t.flags.sequence_length)
        .max()
        .unwrap_or(0);

    RawMetrics::MemorySteps {
        accuracy: ratio(correct.len() as u32, sequences),
        correct_sequences: correct.len() as u32,
        sequences,
        longest_correct_span,
    }
}

/// Mean RT and coefficient of variation of valid RTs
pub fn steady_speed(trials: &[Trial]) -> RawMetrics {
    let rts = valid_rts(trials);
    let mean_rt_ms = mean(&rts);
    let cv = coefficient_of_variation(&rts);
    let false_starts = trials.iter().filter_map(|t| t.flags.false_starts).sum();

    RawMetrics::SteadySpeed {
        mean_rt_ms,
        cv,
        valid_count: rts.len() as u32,
        false_starts,
    }
}

/// Accuracy over all trials and switch cost over valid RTs (may be negative)
pub fn switch_smart(trials: &[Trial]) -> RawMetrics {
    let correct_trials = trials.iter().filter(|t| t.correct == Some(true)).count() as u32;

    let mut switch_rts = Vec::new();
    let mut repeat_rts = Vec::new();
    for trial in trials {
        if let Some(rt) = trial.rt_ms {
            if trial.flags.is_switch == Some(true) {
                switch_rts.push(rt);
            } else {
                repeat_rts.push(rt);
            }
        }
    }

    let switch_cost_ms = if switch_rts.is_empty() || repeat_rts.is_empty() {
        0.0
    } else {
        mean(&switch_rts) - mean(&repeat_rts)
    };

    RawMetrics::SwitchSmart {
        accuracy: ratio(correct_trials, trials.len() as u32),
        switch_cost_ms,
        correct_trials,
    }
}

/// RT series fed to the spectral pipeline, one sample per trial in trial order
///
/// Trials without a press (NOGO withholds included) stay as gaps so samples
/// remain one cycle apart.
pub fn spectral_series(game: GameId, trials: &[Trial]) -> Vec<Option<f64>> {
    match game {
        GameId::FocusFlow
        | GameId::StopAndGo
        | GameId::SteadySpeed
        | GameId::SwitchSmart => trials.iter().map(|t| t.rt_ms).collect(),
        GameId::MemorySteps => Vec::new(),
    }
}

/// Interval between consecutive RT samples
///
/// Fixed-cycle games sample once per stimulus+gap. SteadySpeed is
/// response-driven, so its period is the mean observed trial length.
pub fn sampling_cycle_ms(game: GameId, trials: &[Trial], config: &BatteryConfig) -> f64 {
    match game {
        GameId::FocusFlow => config.focus_flow.cycle_ms(),
        GameId::StopAndGo => config.stop_and_go.cycle_ms(),
        GameId::SwitchSmart => config.switch_smart.cycle_ms(),
        GameId::SteadySpeed => steady_speed_cycle_ms(trials, &config.steady_speed),
        GameId::MemorySteps => {
            let cfg = &config.memory_steps;
            cfg.show_ms + cfg.gap_ms
        }
    }
}

/// Mean observed trial period: gap plus RT, or gap plus the full wait on a miss
pub fn steady_speed_cycle_ms(trials: &[Trial], config: &SteadySpeedConfig) -> f64 {
    let periods: Vec<f64> = trials
        .iter()
        .map(|t| config.gap_ms + t.rt_ms.unwrap_or(config.max_wait_ms))
        .collect();
    if periods.is_empty() {
        config.gap_ms + config.max_wait_ms
    } else {
        mean(&periods)
    }
}

/// Non-null RTs in trial order
pub fn valid_rts(trials: &[Trial]) -> Vec<f64> {
    trials.iter().filter_map(|t| t.rt_ms).collect()
}

/// Arithmetic mean (0 for an empty slice)
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation over mean; 0 with fewer than two samples or a zero mean
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt() / m
}

fn ratio(num: u32, den: u32) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Default)]
struct GoNoGoCounts {
    go: u32,
    no_go: u32,
    misses: u32,
    commissions: u32,
    hit_rts: Vec<f64>,
}

impl GoNoGoCounts {
    fn tally(trials: &[Trial]) -> Self {
        let mut counts = Self::default();
        for trial in trials {
            match trial.stimulus_type {
                StimulusType::Go => {
                    counts.go += 1;
                    match trial.rt_ms {
                        Some(rt) => counts.hit_rts.push(rt),
                        None => counts.misses += 1,
                    }
                }
                StimulusType::NoGo => {
                    counts.no_go += 1;
                    if trial.rt_ms.is_some() {
                        counts.commissions += 1;
                    }
                }
                _ => {}
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrialFlags;
    use pretty_assertions::assert_eq;

    fn trial(game: GameId, index: u32, kind: StimulusType, rt: Option<f64>) -> Trial {
        Trial {
            game_id: game,
            trial_index: index,
            trial_start_ms: index as f64 * 1000.0,
            stimulus_type: kind,
            rt_ms: rt,
            response_code: rt.map(|_| "press".to_string()),
            correct: None,
            flags: TrialFlags::default(),
        }
    }

    #[test]
    fn test_focus_flow_rates() {
        let trials = vec![
            trial(GameId::FocusFlow, 0, StimulusType::Go, Some(400.0)),
            trial(GameId::FocusFlow, 1, StimulusType::Go, None),
            trial(GameId::FocusFlow, 2, StimulusType::NoGo, Some(300.0)),
            trial(GameId::FocusFlow, 3, StimulusType::Go, Some(600.0)),
            trial(GameId::FocusFlow, 4, StimulusType::NoGo, None),
            trial(GameId::FocusFlow, 5, StimulusType::Go, Some(500.0)),
        ];

        assert_eq!(
            focus_flow(&trials),
            RawMetrics::FocusFlow {
                miss_rate: 0.25,
                commission_rate: 0.5,
                mean_rt_ms: 500.0,
                go_count: 4,
                nogo_count: 2,
            }
        );
        assert_eq!(
            stop_and_go(&trials),
            RawMetrics::StopAndGo {
                commission_rate: 0.5,
                nogo_count: 2
            }
        );
    }

    #[test]
    fn test_memory_steps_accuracy_and_span() {
        let mut trials: Vec<Trial> = (0..4)
            .map(|i| trial(GameId::MemorySteps, i, StimulusType::Sequence, Some(2000.0)))
            .collect();
        for (i, t) in trials.iter_mut().enumerate() {
            t.correct = Some(i != 2);
            t.flags.sequence_length = Some(2 + i as u32);
        }

        assert_eq!(
            memory_steps(&trials),
            RawMetrics::MemorySteps {
                accuracy: 0.75,
                correct_sequences: 3,
                sequences: 4,
                longest_correct_span: 5,
            }
        );
    }

    #[test]
    fn test_steady_speed_cv() {
        let trials = vec![
            trial(GameId::SteadySpeed, 0, StimulusType::Cue, Some(300.0)),
            trial(GameId::SteadySpeed, 1, StimulusType::Cue, None),
            trial(GameId::SteadySpeed, 2, StimulusType::Cue, Some(500.0)),
        ];
        match steady_speed(&trials) {
            RawMetrics::SteadySpeed {
                mean_rt_ms,
                cv,
                valid_count,
                false_starts,
            } => {
                assert_eq!(mean_rt_ms, 400.0);
                // sample sd of [300, 500] = 141.42
                assert!((cv - 141.421356 / 400.0).abs() < 1e-6);
                assert_eq!(valid_count, 2);
                assert_eq!(false_starts, 0);
            }
            other => panic!("unexpected metrics {other:?}"),
        }
    }

    #[test]
    fn test_cv_degenerate_cases() {
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        assert_eq!(coefficient_of_variation(&[420.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_switch_cost_can_be_negative() {
        let mut trials = vec![
            trial(GameId::SwitchSmart, 0, StimulusType::Card, Some(700.0)),
            trial(GameId::SwitchSmart, 1, StimulusType::Card, Some(500.0)),
            trial(GameId::SwitchSmart, 2, StimulusType::Card, Some(400.0)),
            trial(GameId::SwitchSmart, 3, StimulusType::Card, None),
        ];
        trials[2].flags.is_switch = Some(true);
        trials[3].flags.is_switch = Some(true);
        trials[0].correct = Some(true);
        trials[2].correct = Some(true);

        match switch_smart(&trials) {
            RawMetrics::SwitchSmart {
                accuracy,
                switch_cost_ms,
                correct_trials,
            } => {
                assert_eq!(accuracy, 0.5);
                assert_eq!(correct_trials, 2);
                assert_eq!(switch_cost_ms, 400.0 - 600.0);
            }
            other => panic!("unexpected metrics {other:?}"),
        }
    }

    #[test]
    fn test_spectral_series_selection() {
        let trials = vec![
            trial(GameId::FocusFlow, 0, StimulusType::Go, Some(400.0)),
            trial(GameId::FocusFlow, 1, StimulusType::NoGo, Some(300.0)),
            trial(GameId::FocusFlow, 2, StimulusType::Go, None),
        ];
        assert_eq!(
            spectral_series(GameId::FocusFlow, &trials),
            vec![Some(400.0), Some(300.0), None]
        );
        assert!(spectral_series(GameId::MemorySteps, &trials).is_empty());
    }

    #[test]
    fn test_go_nogo_oscillation_keeps_wall_clock_frequency() {
        // Presses on every stimulus with RT swinging at 0.045 Hz of wall time;
        // dropping the NOGO quarter would shift the peak into the mid band.
        let config = BatteryConfig::for_grade(4);
        let cycle_ms = config.focus_flow.cycle_ms();
        let trials: Vec<Trial> = (0..120)
            .map(|i| {
                let t_s = i as f64 * cycle_ms / 1000.0;
                let rt = 400.0 + 80.0 * (2.0 * std::f64::consts::PI * 0.045 * t_s).sin();
                let kind = if i % 4 == 3 {
                    StimulusType::NoGo
                } else {
                    StimulusType::Go
                };
                trial(GameId::FocusFlow, i, kind, Some(rt))
            })
            .collect();

        let series = spectral_series(GameId::FocusFlow, &trials);
        assert_eq!(series.len(), 120);

        let cycle = sampling_cycle_ms(GameId::FocusFlow, &trials, &config);
        let features = crate::signal::analyze_rt(&series, cycle);
        assert!(features.r_l > features.r_m, "{features:?}");
        assert!(features.r_l > features.r_h, "{features:?}");
        assert!(features.fpeak > 0.01 && features.fpeak <= 0.05, "{features:?}");
    }

    #[test]
    fn test_steady_speed_sampling_cycle() {
        let config = BatteryConfig::for_grade(4);
        let trials = vec![
            trial(GameId::SteadySpeed, 0, StimulusType::Cue, Some(300.0)),
            trial(GameId::SteadySpeed, 1, StimulusType::Cue, None),
        ];
        // (800 + 300 + 800 + 1500) / 2
        assert_eq!(
            sampling_cycle_ms(GameId::SteadySpeed, &trials, &config),
            1700.0
        );
        assert_eq!(sampling_cycle_ms(GameId::FocusFlow, &[], &config), 1500.0);
    }
}
