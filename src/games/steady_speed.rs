//! SteadySpeed: response-driven simple reaction time
//!
//! Each trial waits `gap_ms`, shows the cue, then waits up to `max_wait_ms`.
//! A press records the RT and advances at once; a timeout records a miss.
//! Presses during the gap are counted as false starts and otherwise ignored.

use super::{
    ensure_not_started, GameMachine, GameOutcome, Phase, Presentation, Prompt, SteadySpeedConfig,
    TimerEvent, TrialBuffer,
};
use crate::error::AssessmentError;
use crate::metrics;
use crate::scheduler::{TimerId, TimerQueue};
use crate::types::{GameId, Response, StimulusType, Trial, TrialFlags};

const GAME: GameId = GameId::SteadySpeed;

#[derive(Debug)]
pub struct SteadySpeedMachine {
    config: SteadySpeedConfig,
    phase: Phase,
    onset: f64,
    false_starts: u32,
    timeout: Option<TimerId>,
    trials: TrialBuffer,
    prompt: Option<Prompt>,
}

impl SteadySpeedMachine {
    pub fn new(config: SteadySpeedConfig) -> Result<Self, AssessmentError> {
        config.validate()?;
        Ok(Self {
            config,
            phase: Phase::NotStarted,
            onset: 0.0,
            false_starts: 0,
            timeout: None,
            trials: TrialBuffer::new(),
            prompt: None,
        })
    }

    fn begin_gap(&mut self, index: u32, now: f64, timers: &mut TimerQueue<TimerEvent>) {
        self.phase = Phase::Gap { trial: index };
        self.false_starts = 0;
        timers.schedule_at(now + self.config.gap_ms, TimerEvent::StimulusOn);
    }

    fn show_cue(&mut self, index: u32, now: f64, timers: &mut TimerQueue<TimerEvent>) {
        self.phase = Phase::Waiting { trial: index };
        self.onset = now;
        self.timeout = Some(timers.schedule_at(
            now + self.config.max_wait_ms,
            TimerEvent::ResponseTimeout,
        ));
        self.prompt = Some(Prompt {
            game_id: GAME,
            trial_index: index,
            opened_at_ms: now,
            window_ms: Some(self.config.max_wait_ms),
            presentation: Presentation::Cue,
        });
    }

    fn close_trial(
        &mut self,
        index: u32,
        rt_ms: Option<f64>,
        now: f64,
        timers: &mut TimerQueue<TimerEvent>,
    ) {
        if let Some(id) = self.timeout.take() {
            timers.cancel(id);
        }
        self.trials.record(Trial {
            game_id: GAME,
            trial_index: index,
            trial_start_ms: self.onset,
            stimulus_type: StimulusType::Cue,
            rt_ms,
            response_code: rt_ms.map(|_| Response::Press.code()),
            correct: Some(rt_ms.is_some()),
            flags: TrialFlags {
                false_starts: (self.false_starts > 0).then_some(self.false_starts),
                ..TrialFlags::default()
            },
        });

        if index + 1 < self.config.trials {
            self.begin_gap(index + 1, now, timers);
        } else {
            self.phase = Phase::Done;
            tracing::debug!(game = %GAME, trials = self.trials.len(), "game done");
        }
    }
}

impl GameMachine for SteadySpeedMachine {
    fn game_id(&self) -> GameId {
        GAME
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn start(&mut self, now: f64, timers: &mut TimerQueue<TimerEvent>) -> Result<(), AssessmentError> {
        ensure_not_started(self.phase, GAME)?;
        tracing::debug!(game = %GAME, trials = self.config.trials, "machine started");
        self.begin_gap(0, now, timers);
        Ok(())
    }

    fn on_timer(&mut self, event: TimerEvent, now: f64, timers: &mut TimerQueue<TimerEvent>) {
        match (event, self.phase) {
            (TimerEvent::StimulusOn, Phase::Gap { trial }) => self.show_cue(trial, now, timers),
            (TimerEvent::ResponseTimeout, Phase::Waiting { trial }) => {
                self.timeout = None;
                self.close_trial(trial, None, now, timers);
            }
            _ => {}
        }
    }

    fn on_response(
        &mut self,
        response: Response,
        now: f64,
        timers: &mut TimerQueue<TimerEvent>,
    ) -> bool {
        if response != Response::Press {
            return false;
        }
        match self.phase {
            Phase::Waiting { trial } => {
                let rt = now - self.onset;
                self.close_trial(trial, Some(rt), now, timers);
                true
            }
            Phase::Gap { .. } => {
                self.false_starts += 1;
                false
            }
            _ => false,
        }
    }

    fn take_prompt(&mut self) -> Option<Prompt> {
        self.prompt.take()
    }

    fn cancel(&mut self, timers: &mut TimerQueue<TimerEvent>) {
        timers.clear();
        self.trials.clear();
        self.timeout = None;
        self.prompt = None;
        self.phase = Phase::Cancelled;
    }

    fn finish(self: Box<Self>) -> Result<GameOutcome, AssessmentError> {
        if self.phase != Phase::Done {
            return Err(AssessmentError::GameIncomplete(GAME));
        }
        let trials = self.trials.into_trials();
        let metrics = metrics::compute(GAME, &trials);
        let sampling_cycle_ms = metrics::steady_speed_cycle_ms(&trials, &self.config);
        Ok(GameOutcome {
            game_id: GAME,
            trials,
            metrics,
            sampling_cycle_ms,
        })
    }

    fn completed_trials(&self) -> usize {
        self.trials.len()
    }
}
