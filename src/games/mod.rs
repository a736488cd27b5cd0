//! Timed-trial game machines
//!
//! Every mini-game is an explicit state machine driven by a [`TimerQueue`]:
//! the machine schedules its own stimulus onsets, gap ends and wait timeouts,
//! and a driver hands each due event back together with the current time.
//! Responses are only attributed to the trial whose window is open; anything
//! else is ignored. Trials are buffered by `trial_index` and flushed once, as a
//! batch, by [`GameMachine::finish`] after the machine reaches [`Phase::Done`].

pub mod config;
pub mod go_nogo;
pub mod memory_steps;
pub mod steady_speed;
pub mod switch_smart;

pub use config::{
    BatteryConfig, GoNoGoConfig, MemoryStepsConfig, SteadySpeedConfig, SwitchSmartConfig,
};
pub use go_nogo::GoNoGoMachine;
pub use memory_steps::MemoryStepsMachine;
pub use steady_speed::SteadySpeedMachine;
pub use switch_smart::{Card, SwitchSmartMachine};

use crate::error::AssessmentError;
use crate::scheduler::TimerQueue;
use crate::types::{Color, GameId, RawMetrics, Response, Rule, Shape, Trial};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scheduled callbacks a machine can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Stimulus onset after a gap (response-driven games)
    StimulusOn,
    /// Stimulus leaves the screen; the gap begins
    StimulusOff,
    /// Fixed-duration cycle is over; the trial is classified
    CycleEnd,
    /// Response window expired
    ResponseTimeout,
    /// Playback tile `k` lights up
    TileOn(usize),
    /// Playback tile `k` goes dark
    TileOff(usize),
    /// Next memory sequence begins playback
    SequenceStart,
}

/// Machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    StimulusVisible { trial: u32 },
    Gap { trial: u32 },
    Waiting { trial: u32 },
    Playback { trial: u32 },
    Done,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled)
    }
}

/// What the participant is being asked to respond to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Presentation {
    Go,
    NoGo,
    /// Reaction cue in a response-driven game
    Cue,
    Card { color: Color, shape: Shape, rule: Rule },
    /// Reproduce the sequence that was just played back
    Recall { target: Vec<u8> },
}

/// A response window that just opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub game_id: GameId,
    pub trial_index: u32,
    pub opened_at_ms: f64,
    /// Nominal window length; None when the window has no fixed end
    pub window_ms: Option<f64>,
    pub presentation: Presentation,
}

/// Everything a machine emits on reaching DONE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameOutcome {
    pub game_id: GameId,
    pub trials: Vec<Trial>,
    pub metrics: RawMetrics,
    /// Interval between RT samples used for spectral analysis
    pub sampling_cycle_ms: f64,
}

/// Shared contract of the five game variants
pub trait GameMachine: Send {
    fn game_id(&self) -> GameId;

    fn phase(&self) -> Phase;

    /// Begin trial 0 at `now`
    fn start(&mut self, now: f64, timers: &mut TimerQueue<TimerEvent>)
        -> Result<(), AssessmentError>;

    /// Handle a due timer
    fn on_timer(&mut self, event: TimerEvent, now: f64, timers: &mut TimerQueue<TimerEvent>);

    /// Offer a response captured at `now`; false when no window accepts it
    fn on_response(
        &mut self,
        response: Response,
        now: f64,
        timers: &mut TimerQueue<TimerEvent>,
    ) -> bool;

    /// Window opened since the last call, if any
    fn take_prompt(&mut self) -> Option<Prompt>;

    /// Tear down: clear every pending timer and discard buffered trials
    fn cancel(&mut self, timers: &mut TimerQueue<TimerEvent>);

    /// Flush the trial batch and raw metrics; only valid once DONE
    fn finish(self: Box<Self>) -> Result<GameOutcome, AssessmentError>;

    /// Number of trials closed so far
    fn completed_trials(&self) -> usize;

    fn is_done(&self) -> bool {
        self.phase() == Phase::Done
    }
}

/// Append-only trial buffer keyed by `trial_index`
#[derive(Debug, Default)]
pub(crate) struct TrialBuffer {
    trials: BTreeMap<u32, Trial>,
}

impl TrialBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a closed trial; an index is only ever written once
    pub(crate) fn record(&mut self, trial: Trial) -> bool {
        if self.trials.contains_key(&trial.trial_index) {
            tracing::warn!(
                game = %trial.game_id,
                trial_index = trial.trial_index,
                "trial already recorded; ignoring duplicate"
            );
            return false;
        }
        self.trials.insert(trial.trial_index, trial);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.trials.len()
    }

    pub(crate) fn clear(&mut self) {
        self.trials.clear();
    }

    pub(crate) fn into_trials(self) -> Vec<Trial> {
        self.trials.into_values().collect()
    }
}

/// Drift-free fixed-duration cycle: trial `i` starts at `origin + i * cycle`
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedCycle {
    pub(crate) origin_ms: f64,
    pub(crate) stimulus_ms: f64,
    pub(crate) gap_ms: f64,
}

impl FixedCycle {
    pub(crate) fn new(stimulus_ms: f64, gap_ms: f64) -> Self {
        Self {
            origin_ms: 0.0,
            stimulus_ms,
            gap_ms,
        }
    }

    pub(crate) fn cycle_ms(&self) -> f64 {
        self.stimulus_ms + self.gap_ms
    }

    pub(crate) fn onset(&self, index: u32) -> f64 {
        self.origin_ms + index as f64 * self.cycle_ms()
    }

    /// Schedule the stimulus-off and cycle-end timers of trial `index`; returns its onset
    pub(crate) fn schedule_trial(&self, index: u32, timers: &mut TimerQueue<TimerEvent>) -> f64 {
        let onset = self.onset(index);
        timers.schedule_at(onset + self.stimulus_ms, TimerEvent::StimulusOff);
        timers.schedule_at(onset + self.cycle_ms(), TimerEvent::CycleEnd);
        onset
    }
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

pub(crate) fn ensure_not_started(phase: Phase, game: GameId) -> Result<(), AssessmentError> {
    if phase == Phase::NotStarted {
        Ok(())
    } else {
        Err(AssessmentError::InvalidState(format!(
            "{game} already started ({phase:?})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StimulusType;

    fn trial(index: u32) -> Trial {
        Trial {
            game_id: GameId::FocusFlow,
            trial_index: index,
            trial_start_ms: index as f64 * 1500.0,
            stimulus_type: StimulusType::Go,
            rt_ms: Some(400.0),
            response_code: None,
            correct: Some(true),
            flags: Default::default(),
        }
    }

    #[test]
    fn test_trial_buffer_orders_and_rejects_duplicates() {
        let mut buffer = TrialBuffer::new();
        assert!(buffer.record(trial(2)));
        assert!(buffer.record(trial(0)));
        assert!(!buffer.record(trial(2)));
        assert_eq!(buffer.len(), 2);

        let indices: Vec<u32> = buffer.into_trials().iter().map(|t| t.trial_index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_fixed_cycle_schedule() {
        let mut cycle = FixedCycle::new(500.0, 1000.0);
        cycle.origin_ms = 100.0;
        let mut timers = TimerQueue::new();

        let onset = cycle.schedule_trial(2, &mut timers);
        assert_eq!(onset, 3100.0);
        assert_eq!(timers.pop_next(), Some((3600.0, TimerEvent::StimulusOff)));
        assert_eq!(timers.pop_next(), Some((4600.0, TimerEvent::CycleEnd)));
    }
}
