//! GO/NOGO machine shared by FocusFlow and StopAndGo
//!
//! Fixed-duration cycle: the stimulus is visible for `stimulus_ms`, then a gap
//! of `gap_ms`. Only the first press while the stimulus is visible counts.
//! The trial is classified at cycle end: a GO without a press is a miss, a
//! NOGO with a press is a commission.

use super::{
    ensure_not_started, seeded_rng, FixedCycle, GameMachine, GameOutcome, GoNoGoConfig, Phase,
    Presentation, Prompt, TimerEvent, TrialBuffer,
};
use crate::error::AssessmentError;
use crate::metrics;
use crate::scheduler::TimerQueue;
use crate::types::{GameId, Response, StimulusType, Trial, TrialFlags};
use rand::seq::SliceRandom;

#[derive(Debug, Clone, Copy)]
struct OpenTrial {
    index: u32,
    onset: f64,
    rt_ms: Option<f64>,
}

/// Timed GO/NOGO trial machine
#[derive(Debug)]
pub struct GoNoGoMachine {
    game: GameId,
    config: GoNoGoConfig,
    schedule: Vec<StimulusType>,
    cycle: FixedCycle,
    phase: Phase,
    open: Option<OpenTrial>,
    trials: TrialBuffer,
    prompt: Option<Prompt>,
}

impl GoNoGoMachine {
    pub fn focus_flow(config: GoNoGoConfig) -> Result<Self, AssessmentError> {
        Self::shuffled(GameId::FocusFlow, config)
    }

    pub fn stop_and_go(config: GoNoGoConfig) -> Result<Self, AssessmentError> {
        Self::shuffled(GameId::StopAndGo, config)
    }

    /// Machine with an explicit stimulus order
    pub fn with_schedule(
        game: GameId,
        config: GoNoGoConfig,
        schedule: Vec<StimulusType>,
    ) -> Result<Self, AssessmentError> {
        if !matches!(game, GameId::FocusFlow | GameId::StopAndGo) {
            return Err(AssessmentError::config(
                game.as_str(),
                "not a GO/NOGO game",
            ));
        }
        config.validate(game)?;

        let go = schedule.iter().filter(|s| **s == StimulusType::Go).count() as u32;
        let no_go = schedule.iter().filter(|s| **s == StimulusType::NoGo).count() as u32;
        if go != config.go_count || no_go != config.no_go_count {
            return Err(AssessmentError::config(
                game.as_str(),
                format!(
                    "schedule has {go} GO / {no_go} NOGO, expected {} / {}",
                    config.go_count, config.no_go_count
                ),
            ));
        }

        Ok(Self {
            game,
            cycle: FixedCycle::new(config.stimulus_ms, config.gap_ms),
            config,
            schedule,
            phase: Phase::NotStarted,
            open: None,
            trials: TrialBuffer::new(),
            prompt: None,
        })
    }

    fn shuffled(game: GameId, config: GoNoGoConfig) -> Result<Self, AssessmentError> {
        config.validate(game)?;
        let mut schedule = Vec::with_capacity(config.trials as usize);
        schedule.extend(std::iter::repeat(StimulusType::Go).take(config.go_count as usize));
        schedule.extend(std::iter::repeat(StimulusType::NoGo).take(config.no_go_count as usize));
        schedule.shuffle(&mut seeded_rng(config.seed));
        Self::with_schedule(game, config, schedule)
    }

    /// Stimulus order for the whole run
    pub fn schedule(&self) -> &[StimulusType] {
        &self.schedule
    }

    fn open_trial(&mut self, index: u32, timers: &mut TimerQueue<TimerEvent>) {
        let onset = self.cycle.schedule_trial(index, timers);
        let kind = self.schedule[index as usize];
        self.open = Some(OpenTrial {
            index,
            onset,
            rt_ms: None,
        });
        self.phase = Phase::StimulusVisible { trial: index };
        self.prompt = Some(Prompt {
            game_id: self.game,
            trial_index: index,
            opened_at_ms: onset,
            window_ms: Some(self.config.stimulus_ms),
            presentation: match kind {
                StimulusType::NoGo => Presentation::NoGo,
                _ => Presentation::Go,
            },
        });
    }

    fn close_trial(&mut self, timers: &mut TimerQueue<TimerEvent>) {
        let Some(open) = self.open.take() else {
            return;
        };
        let kind = self.schedule[open.index as usize];
        let responded = open.rt_ms.is_some();
        let correct = match kind {
            StimulusType::NoGo => !responded,
            _ => responded,
        };

        self.trials.record(Trial {
            game_id: self.game,
            trial_index: open.index,
            trial_start_ms: open.onset,
            stimulus_type: kind,
            rt_ms: open.rt_ms,
            response_code: open.rt_ms.map(|_| Response::Press.code()),
            correct: Some(correct),
            flags: TrialFlags::default(),
        });

        let next = open.index + 1;
        if next < self.config.trials {
            self.open_trial(next, timers);
        } else {
            self.phase = Phase::Done;
            tracing::debug!(game = %self.game, trials = self.trials.len(), "game done");
        }
    }
}

impl GameMachine for GoNoGoMachine {
    fn game_id(&self) -> GameId {
        self.game
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn start(&mut self, now: f64, timers: &mut TimerQueue<TimerEvent>) -> Result<(), AssessmentError> {
        ensure_not_started(self.phase, self.game)?;
        self.cycle.origin_ms = now;
        tracing::debug!(game = %self.game, trials = self.config.trials, "machine started");
        self.open_trial(0, timers);
        Ok(())
    }

    fn on_timer(&mut self, event: TimerEvent, _now: f64, timers: &mut TimerQueue<TimerEvent>) {
        match (event, self.phase) {
            (TimerEvent::StimulusOff, Phase::StimulusVisible { trial }) => {
                self.phase = Phase::Gap { trial };
            }
            (TimerEvent::CycleEnd, Phase::StimulusVisible { .. } | Phase::Gap { .. }) => {
                self.close_trial(timers);
            }
            _ => {}
        }
    }

    fn on_response(
        &mut self,
        response: Response,
        now: f64,
        _timers: &mut TimerQueue<TimerEvent>,
    ) -> bool {
        if response != Response::Press || !matches!(self.phase, Phase::StimulusVisible { .. }) {
            return false;
        }
        match self.open.as_mut() {
            Some(open) if open.rt_ms.is_none() => {
                open.rt_ms = Some(now - open.onset);
                true
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
        self.open = None;
        self.prompt = None;
        self.phase = Phase::Cancelled;
    }

    fn finish(self: Box<Self>) -> Result<GameOutcome, AssessmentError> {
        if self.phase != Phase::Done {
            return Err(AssessmentError::GameIncomplete(self.game));
        }
        let trials = self.trials.into_trials();
        let metrics = metrics::compute(self.game, &trials);
        Ok(GameOutcome {
            game_id: self.game,
            trials,
            metrics,
            sampling_cycle_ms: self.config.cycle_ms(),
        })
    }

    fn completed_trials(&self) -> usize {
        self.trials.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawMetrics;
    use pretty_assertions::assert_eq;

    fn small_config(go: u32, no_go: u32) -> GoNoGoConfig {
        GoNoGoConfig {
            trials: go + no_go,
            go_count: go,
            no_go_count: no_go,
            stimulus_ms: 500.0,
            gap_ms: 1000.0,
            seed: Some(1),
        }
    }

    /// Fire every timer due at or before `until`, in order
    fn run_timers(
        machine: &mut GoNoGoMachine,
        timers: &mut TimerQueue<TimerEvent>,
        until: f64,
    ) {
        while let Some((due, event)) = timers.pop_due(until) {
            machine.on_timer(event, due, timers);
        }
    }

    #[test]
    fn test_shuffle_keeps_counts_and_is_seeded() {
        let a = GoNoGoMachine::focus_flow(GoNoGoConfig {
            seed: Some(42),
            ..GoNoGoConfig::focus_flow_default()
        })
        .unwrap();
        let b = GoNoGoMachine::focus_flow(GoNoGoConfig {
            seed: Some(42),
            ..GoNoGoConfig::focus_flow_default()
        })
        .unwrap();

        assert_eq!(a.schedule(), b.schedule());
        let no_go = a
            .schedule()
            .iter()
            .filter(|s| **s == StimulusType::NoGo)
            .count();
        assert_eq!(no_go, 30);
        assert_eq!(a.schedule().len(), 120);
    }

    #[test]
    fn test_classification_and_rates() {
        let schedule = vec![
            StimulusType::Go,
            StimulusType::NoGo,
            StimulusType::Go,
            StimulusType::NoGo,
        ];
        let mut machine =
            GoNoGoMachine::with_schedule(GameId::FocusFlow, small_config(2, 2), schedule).unwrap();
        let mut timers = TimerQueue::new();
        machine.start(0.0, &mut timers).unwrap();

        // trial 0 GO: hit at 420 ms
        assert!(machine.on_response(Response::Press, 420.0, &mut timers));
        assert!(!machine.on_response(Response::Press, 450.0, &mut timers));
        run_timers(&mut machine, &mut timers, 1500.0);

        // trial 1 NOGO: commission
        assert!(machine.on_response(Response::Press, 1800.0, &mut timers));
        run_timers(&mut machine, &mut timers, 3000.0);

        // trial 2 GO: press during the gap is ignored, so a miss
        run_timers(&mut machine, &mut timers, 3500.0);
        assert_eq!(machine.phase(), Phase::Gap { trial: 2 });
        assert!(!machine.on_response(Response::Press, 3600.0, &mut timers));
        run_timers(&mut machine, &mut timers, 6000.0);

        assert_eq!(machine.phase(), Phase::Done);
        assert!(timers.is_empty());

        let outcome = Box::new(machine).finish().unwrap();
        let correct: Vec<Option<bool>> = outcome.trials.iter().map(|t| t.correct).collect();
        assert_eq!(correct, vec![Some(true), Some(false), Some(false), Some(true)]);
        assert_eq!(outcome.trials[0].rt_ms, Some(420.0));
        assert_eq!(outcome.trials[3].trial_start_ms, 4500.0);
        assert_eq!(
            outcome.metrics,
            RawMetrics::FocusFlow {
                miss_rate: 0.5,
                commission_rate: 0.5,
                mean_rt_ms: 420.0,
                go_count: 2,
                nogo_count: 2,
            }
        );
        assert_eq!(outcome.sampling_cycle_ms, 1500.0);
    }

    #[test]
    fn test_prompt_per_trial() {
        let schedule = vec![StimulusType::NoGo, StimulusType::Go];
        let mut machine =
            GoNoGoMachine::with_schedule(GameId::StopAndGo, small_config(1, 1), schedule).unwrap();
        let mut timers = TimerQueue::new();
        machine.start(100.0, &mut timers).unwrap();

        let prompt = machine.take_prompt().unwrap();
        assert_eq!(prompt.presentation, Presentation::NoGo);
        assert_eq!(prompt.opened_at_ms, 100.0);
        assert!(machine.take_prompt().is_none());

        run_timers(&mut machine, &mut timers, 1600.0);
        let prompt = machine.take_prompt().unwrap();
        assert_eq!(prompt.trial_index, 1);
        assert_eq!(prompt.presentation, Presentation::Go);
    }

    #[test]
    fn test_finish_before_done_fails() {
        let mut machine = GoNoGoMachine::stop_and_go(small_config(3, 1)).unwrap();
        let mut timers = TimerQueue::new();
        machine.start(0.0, &mut timers).unwrap();
        assert!(machine.start(0.0, &mut timers).is_err());

        let err = Box::new(machine).finish().unwrap_err();
        assert!(matches!(err, AssessmentError::GameIncomplete(GameId::StopAndGo)));
    }

    #[test]
    fn test_cancel_clears_timers() {
        let mut machine = GoNoGoMachine::focus_flow(small_config(3, 1)).unwrap();
        let mut timers = TimerQueue::new();
        machine.start(0.0, &mut timers).unwrap();
        run_timers(&mut machine, &mut timers, 1500.0);
        assert_eq!(machine.completed_trials(), 1);

        machine.cancel(&mut timers);
        assert!(timers.is_empty());
        assert_eq!(machine.phase(), Phase::Cancelled);
        assert_eq!(machine.completed_trials(), 0);
        assert!(!machine.on_response(Response::Press, 1600.0, &mut timers));
    }

    #[test]
    fn test_schedule_mismatch_rejected() {
        let result = GoNoGoMachine::with_schedule(
            GameId::FocusFlow,
            small_config(2, 1),
            vec![StimulusType::Go; 3],
        );
        assert!(result.is_err());
    }
}
