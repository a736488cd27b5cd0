//! Simulated participants
//!
//! A seeded behavioural model that answers prompts the way a child might:
//! noisy reaction times with a slow attentional drift, occasional misses and
//! commissions, a limited memory span and a reaction-time penalty after rule
//! switches. Used for demos, the CLI and end-to-end tests.

use crate::clock::{TimeSource, VirtualClock};
use crate::driver::{Participant, PlannedResponse, VirtualDriver};
use crate::error::AssessmentError;
use crate::games::{Presentation, Prompt};
use crate::session::SessionOrchestrator;
use crate::store::AssessmentStore;
use crate::types::{AssessmentReport, Response, Rule, Side};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

/// Pause between games on the virtual timeline
pub const INTER_GAME_PAUSE_MS: f64 = 5_000.0;

/// Behavioural parameters of a simulated child
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChildModel {
    pub mean_rt_ms: f64,
    /// Half-width of the per-trial RT noise
    pub rt_jitter_ms: f64,
    /// Amplitude of the slow attentional RT drift
    pub drift_ms: f64,
    /// Drift period in trials
    pub drift_period: f64,
    pub miss_probability: f64,
    pub commission_probability: f64,
    /// Longest sequence reproduced reliably
    pub memory_span: u32,
    pub switch_penalty_ms: f64,
    pub rule_error_probability: f64,
    /// Chance of an extra press right after a SteadySpeed response
    pub false_start_probability: f64,
    pub tap_interval_ms: f64,
}

/// Named model presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildPreset {
    Typical,
    Inattentive,
    Impulsive,
}

impl ChildPreset {
    pub const ALL: [ChildPreset; 3] = [
        ChildPreset::Typical,
        ChildPreset::Inattentive,
        ChildPreset::Impulsive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChildPreset::Typical => "typical",
            ChildPreset::Inattentive => "inattentive",
            ChildPreset::Impulsive => "impulsive",
        }
    }

    pub fn model(&self) -> ChildModel {
        match self {
            ChildPreset::Typical => ChildModel {
                mean_rt_ms: 420.0,
                rt_jitter_ms: 60.0,
                drift_ms: 20.0,
                drift_period: 30.0,
                miss_probability: 0.03,
                commission_probability: 0.10,
                memory_span: 5,
                switch_penalty_ms: 120.0,
                rule_error_probability: 0.05,
                false_start_probability: 0.01,
                tap_interval_ms: 450.0,
            },
            ChildPreset::Inattentive => ChildModel {
                mean_rt_ms: 440.0,
                rt_jitter_ms: 100.0,
                drift_ms: 90.0,
                drift_period: 40.0,
                miss_probability: 0.18,
                commission_probability: 0.15,
                memory_span: 3,
                switch_penalty_ms: 200.0,
                rule_error_probability: 0.12,
                false_start_probability: 0.02,
                tap_interval_ms: 600.0,
            },
            ChildPreset::Impulsive => ChildModel {
                mean_rt_ms: 330.0,
                rt_jitter_ms: 80.0,
                drift_ms: 40.0,
                drift_period: 8.0,
                miss_probability: 0.04,
                commission_probability: 0.45,
                memory_span: 4,
                switch_penalty_ms: 160.0,
                rule_error_probability: 0.15,
                false_start_probability: 0.10,
                tap_interval_ms: 350.0,
            },
        }
    }
}

impl FromStr for ChildPreset {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChildPreset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                AssessmentError::InvalidState(format!(
                    "unknown child preset '{s}' (expected typical, inattentive or impulsive)"
                ))
            })
    }
}

/// Seeded participant following a [`ChildModel`]
#[derive(Debug, Clone)]
pub struct SimulatedChild {
    model: ChildModel,
    rng: StdRng,
    last_rule: Option<Rule>,
}

impl SimulatedChild {
    pub fn new(model: ChildModel, seed: u64) -> Self {
        Self {
            model,
            rng: StdRng::seed_from_u64(seed),
            last_rule: None,
        }
    }

    pub fn preset(preset: ChildPreset, seed: u64) -> Self {
        Self::new(preset.model(), seed)
    }

    pub fn model(&self) -> &ChildModel {
        &self.model
    }

    fn sample_rt(&mut self, trial_index: u32) -> f64 {
        let m = &self.model;
        let noise = self.rng.gen_range(-1.0..=1.0) + self.rng.gen_range(-1.0..=1.0);
        let drift = m.drift_ms * (2.0 * PI * trial_index as f64 / m.drift_period.max(1.0)).sin();
        (m.mean_rt_ms + drift + noise * m.rt_jitter_ms / 2.0).max(100.0)
    }

    fn chance(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    fn recall(&mut self, prompt: &Prompt, target: &[u8]) -> Vec<PlannedResponse> {
        let mut at = self.sample_rt(prompt.trial_index) + self.model.tap_interval_ms;
        let over_span = target.len() as u32 > self.model.memory_span;
        let mut taps = Vec::with_capacity(target.len());

        for (k, tile) in target.iter().enumerate() {
            let slip = over_span && k as u32 >= self.model.memory_span && self.chance(0.7);
            let tapped = if slip {
                if *tile == 0 {
                    1
                } else {
                    tile - 1
                }
            } else {
                *tile
            };
            taps.push(PlannedResponse::new(at, Response::Tile(tapped)));
            if slip {
                break;
            }
            at += self.model.tap_interval_ms + self.rng.gen_range(0.0..100.0);
        }
        taps
    }
}

impl Participant for SimulatedChild {
    fn respond(&mut self, prompt: &Prompt) -> Vec<PlannedResponse> {
        let index = prompt.trial_index;
        match &prompt.presentation {
            Presentation::Go => {
                if self.chance(self.model.miss_probability) {
                    return Vec::new();
                }
                vec![PlannedResponse::new(self.sample_rt(index), Response::Press)]
            }
            Presentation::NoGo => {
                if !self.chance(self.model.commission_probability) {
                    return Vec::new();
                }
                // impulsive presses come early, inside the stimulus window
                let window = prompt.window_ms.unwrap_or(f64::INFINITY);
                let rt = (self.sample_rt(index) * 0.8).min(window * 0.9);
                vec![PlannedResponse::new(rt, Response::Press)]
            }
            Presentation::Cue => {
                if self.chance(self.model.miss_probability) {
                    return Vec::new();
                }
                let rt = self.sample_rt(index);
                let mut planned = vec![PlannedResponse::new(rt, Response::Press)];
                if self.chance(self.model.false_start_probability) {
                    planned.push(PlannedResponse::new(rt + 150.0, Response::Press));
                }
                planned
            }
            Presentation::Card { color, shape, rule } => {
                let switched = self.last_rule.is_some_and(|r| r != *rule);
                self.last_rule = Some(*rule);
                if self.chance(self.model.miss_probability) {
                    return Vec::new();
                }

                let error_p = if switched {
                    self.model.rule_error_probability * 2.0
                } else {
                    self.model.rule_error_probability
                };
                let expected = rule.expected_side(*color, *shape);
                let side = if self.chance(error_p) {
                    match expected {
                        Side::Left => Side::Right,
                        Side::Right => Side::Left,
                    }
                } else {
                    expected
                };
                let penalty = if switched { self.model.switch_penalty_ms } else { 0.0 };
                let rt = self.sample_rt(index) + penalty;
                vec![PlannedResponse::new(rt, Response::Side(side))]
            }
            Presentation::Recall { target } => self.recall(prompt, target),
        }
    }
}

/// Drive every remaining game of `orchestrator` on a virtual clock and finalize
pub fn run_simulated_session<'a, S, P>(
    orchestrator: &'a mut SessionOrchestrator<S>,
    mut participant: P,
) -> Result<&'a AssessmentReport, AssessmentError>
where
    S: AssessmentStore,
    P: Participant,
{
    if orchestrator.session().is_none() {
        orchestrator.start()?;
    }

    let clock = VirtualClock::new();
    while let Some(game) = orchestrator.next_game() {
        let machine = orchestrator.machine_for_next_game()?;
        let outcome = VirtualDriver::new(machine, clock.clone(), &mut participant).run()?;
        tracing::debug!(game = %game, at_ms = clock.now(), trials = outcome.trials.len(), "simulated game finished");
        orchestrator.on_game_complete(outcome)?;
        clock.advance_by(INTER_GAME_PAUSE_MS);
    }

    let state = orchestrator.state();
    orchestrator.report().ok_or_else(|| {
        AssessmentError::InvalidState(format!("simulation ended without a report ({state:?})"))
    })
}
