//! MemorySteps: spatial sequence recall
//!
//! Each sequence plays back tile by tile (`show_ms` lit, `gap_ms` dark), then
//! the input window opens. Every tap is checked as a prefix of the target: the
//! first mismatch ends the sequence as incorrect, a full match ends it as
//! correct. An input window left idle for `input_timeout_ms` is incorrect.

use super::{
    ensure_not_started, seeded_rng, GameMachine, GameOutcome, MemoryStepsConfig, Phase,
    Presentation, Prompt, TimerEvent, TrialBuffer,
};
use crate::error::AssessmentError;
use crate::metrics;
use crate::scheduler::{TimerId, TimerQueue};
use crate::types::{GameId, Response, StimulusType, Trial, TrialFlags};
use rand::Rng;

const GAME: GameId = GameId::MemorySteps;

#[derive(Debug)]
pub struct MemoryStepsMachine {
    config: MemoryStepsConfig,
    targets: Vec<Vec<u8>>,
    phase: Phase,
    sequence_start: f64,
    input_opened_at: f64,
    taps: Vec<u8>,
    lit: Option<u8>,
    timeout: Option<TimerId>,
    trials: TrialBuffer,
    prompt: Option<Prompt>,
}

impl MemoryStepsMachine {
    pub fn new(config: MemoryStepsConfig) -> Result<Self, AssessmentError> {
        config.validate()?;
        let mut rng = seeded_rng(config.seed);
        let targets = (0..config.sequences)
            .map(|i| {
                let len = config.sequence_length(i) as usize;
                let mut seq: Vec<u8> = Vec::with_capacity(len);
                while seq.len() < len {
                    let tile = rng.gen_range(0..config.grid_size);
                    // no tile flashes twice in a row
                    if seq.last() != Some(&tile) {
                        seq.push(tile);
                    }
                }
                seq
            })
            .collect();
        Self::with_targets(config, targets)
    }

    /// Machine with explicit target sequences
    pub fn with_targets(
        config: MemoryStepsConfig,
        targets: Vec<Vec<u8>>,
    ) -> Result<Self, AssessmentError> {
        config.validate()?;
        if targets.len() != config.sequences as usize {
            return Err(AssessmentError::config(
                GAME.as_str(),
                format!(
                    "{} target sequences supplied, expected {}",
                    targets.len(),
                    config.sequences
                ),
            ));
        }
        for (i, target) in targets.iter().enumerate() {
            let expected = config.sequence_length(i as u32) as usize;
            if target.len() != expected {
                return Err(AssessmentError::config(
                    GAME.as_str(),
                    format!("sequence {i} has length {}, expected {expected}", target.len()),
                ));
            }
            if target.iter().any(|t| *t >= config.grid_size) {
                return Err(AssessmentError::config(
                    GAME.as_str(),
                    format!("sequence {i} references a tile outside the grid"),
                ));
            }
        }

        Ok(Self {
            config,
            targets,
            phase: Phase::NotStarted,
            sequence_start: 0.0,
            input_opened_at: 0.0,
            taps: Vec::new(),
            lit: None,
            timeout: None,
            trials: TrialBuffer::new(),
            prompt: None,
        })
    }

    pub fn targets(&self) -> &[Vec<u8>] {
        &self.targets
    }

    /// Tile currently lit during playback
    pub fn lit_tile(&self) -> Option<u8> {
        self.lit
    }

    fn begin_sequence(&mut self, index: u32, now: f64, timers: &mut TimerQueue<TimerEvent>) {
        self.phase = Phase::Playback { trial: index };
        self.sequence_start = now;
        self.taps.clear();
        self.lit = None;

        let step = self.config.show_ms + self.config.gap_ms;
        for k in 0..self.targets[index as usize].len() {
            let on = now + k as f64 * step;
            timers.schedule_at(on, TimerEvent::TileOn(k));
            timers.schedule_at(on + self.config.show_ms, TimerEvent::TileOff(k));
        }
    }

    fn open_input(&mut self, index: u32, now: f64, timers: &mut TimerQueue<TimerEvent>) {
        self.phase = Phase::Waiting { trial: index };
        self.input_opened_at = now;
        self.timeout = Some(timers.schedule_at(
            now + self.config.input_timeout_ms,
            TimerEvent::ResponseTimeout,
        ));
        self.prompt = Some(Prompt {
            game_id: GAME,
            trial_index: index,
            opened_at_ms: now,
            window_ms: Some(self.config.input_timeout_ms),
            presentation: Presentation::Recall {
                target: self.targets[index as usize].clone(),
            },
        });
    }

    fn close_sequence(
        &mut self,
        index: u32,
        correct: bool,
        timed_out: bool,
        now: f64,
        timers: &mut TimerQueue<TimerEvent>,
    ) {
        if let Some(id) = self.timeout.take() {
            timers.cancel(id);
        }
        let target = self.targets[index as usize].clone();

        self.trials.record(Trial {
            game_id: GAME,
            trial_index: index,
            trial_start_ms: self.sequence_start,
            stimulus_type: StimulusType::Sequence,
            rt_ms: (!timed_out).then(|| now - self.input_opened_at),
            response_code: self.taps.last().map(|t| Response::Tile(*t).code()),
            correct: Some(correct),
            flags: TrialFlags {
                sequence_length: Some(target.len() as u32),
                target: Some(target),
                taps: Some(std::mem::take(&mut self.taps)),
                timed_out: timed_out.then_some(true),
                ..TrialFlags::default()
            },
        });

        if index + 1 < self.config.sequences {
            self.phase = Phase::Gap { trial: index };
            timers.schedule_at(now + self.config.inter_sequence_ms, TimerEvent::SequenceStart);
        } else {
            self.phase = Phase::Done;
            tracing::debug!(game = %GAME, sequences = self.trials.len(), "game done");
        }
    }
}

impl GameMachine for MemoryStepsMachine {
    fn game_id(&self) -> GameId {
        GAME
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn start(&mut self, now: f64, timers: &mut TimerQueue<TimerEvent>) -> Result<(), AssessmentError> {
        ensure_not_started(self.phase, GAME)?;
        tracing::debug!(
            game = %GAME,
            sequences = self.config.sequences,
            grade_cap = self.config.grade_cap,
            "machine started"
        );
        self.begin_sequence(0, now, timers);
        Ok(())
    }

    fn on_timer(&mut self, event: TimerEvent, now: f64, timers: &mut TimerQueue<TimerEvent>) {
        match (event, self.phase) {
            (TimerEvent::TileOn(k), Phase::Playback { trial }) => {
                self.lit = self.targets[trial as usize].get(k).copied();
            }
            (TimerEvent::TileOff(k), Phase::Playback { trial }) => {
                self.lit = None;
                if k + 1 == self.targets[trial as usize].len() {
                    self.open_input(trial, now, timers);
                }
            }
            (TimerEvent::ResponseTimeout, Phase::Waiting { trial }) => {
                self.timeout = None;
                self.close_sequence(trial, false, true, now, timers);
            }
            (TimerEvent::SequenceStart, Phase::Gap { trial }) => {
                self.begin_sequence(trial + 1, now, timers);
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
        let (Response::Tile(tile), Phase::Waiting { trial }) = (response, self.phase) else {
            return false;
        };
        if tile >= self.config.grid_size {
            return false;
        }

        self.taps.push(tile);
        let position = self.taps.len() - 1;
        let target = &self.targets[trial as usize];
        let mismatch = target[position] != tile;
        let complete = self.taps.len() == target.len();
        if mismatch {
            self.close_sequence(trial, false, false, now, timers);
        } else if complete {
            self.close_sequence(trial, true, false, now, timers);
        }
        true
    }

    fn take_prompt(&mut self) -> Option<Prompt> {
        self.prompt.take()
    }

    fn cancel(&mut self, timers: &mut TimerQueue<TimerEvent>) {
        timers.clear();
        self.trials.clear();
        self.taps.clear();
        self.lit = None;
        self.timeout = None;
        self.prompt = None;
        self.phase = Phase::Cancelled;
    }

    fn finish(self: Box<Self>) -> Result<GameOutcome, AssessmentError> {
        if self.phase != Phase::Done {
            return Err(AssessmentError::GameIncomplete(GAME));
        }
        let sampling_cycle_ms = self.config.show_ms + self.config.gap_ms;
        let trials = self.trials.into_trials();
        let metrics = metrics::compute(GAME, &trials);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawMetrics;
    use pretty_assertions::assert_eq;

    fn config(sequences: u32) -> MemoryStepsConfig {
        MemoryStepsConfig {
            sequences,
            start_length: 3,
            grow_every: 3,
            grade_cap: 4,
            ..MemoryStepsConfig::for_grade(3)
        }
    }

    fn run_timers(
        machine: &mut MemoryStepsMachine,
        timers: &mut TimerQueue<TimerEvent>,
        until: f64,
    ) {
        while let Some((due, event)) = timers.pop_due(until) {
            machine.on_timer(event, due, timers);
        }
    }

    /// Run playback until the input window opens; returns the opening time
    fn play_back(
        machine: &mut MemoryStepsMachine,
        timers: &mut TimerQueue<TimerEvent>,
    ) -> f64 {
        let mut opened = None;
        while opened.is_none() {
            let Some((due, event)) = timers.pop_next() else {
                panic!("ran out of timers before input opened");
            };
            machine.on_timer(event, due, timers);
            if matches!(machine.phase(), Phase::Waiting { .. }) {
                opened = Some(due);
            }
        }
        opened.unwrap()
    }

    #[test]
    fn test_full_match_is_correct() {
        let mut machine =
            MemoryStepsMachine::with_targets(config(2), vec![vec![2, 5, 1], vec![0, 3, 8]])
                .unwrap();
        let mut timers = TimerQueue::new();
        machine.start(0.0, &mut timers).unwrap();

        // playback: 3 tiles x (600 + 300), input opens after the last tile goes dark
        let opened = play_back(&mut machine, &mut timers);
        assert_eq!(opened, 2400.0);
        let prompt = machine.take_prompt().unwrap();
        assert_eq!(prompt.presentation, Presentation::Recall { target: vec![2, 5, 1] });

        assert!(machine.on_response(Response::Tile(2), 3000.0, &mut timers));
        assert!(machine.on_response(Response::Tile(5), 3400.0, &mut timers));
        assert_eq!(machine.phase(), Phase::Waiting { trial: 0 });
        assert!(machine.on_response(Response::Tile(1), 3900.0, &mut timers));
        assert_eq!(machine.phase(), Phase::Gap { trial: 0 });
        assert_eq!(machine.completed_trials(), 1);
    }

    #[test]
    fn test_mismatch_ends_sequence_immediately() {
        let mut machine =
            MemoryStepsMachine::with_targets(config(2), vec![vec![2, 5, 1], vec![0, 3, 8]])
                .unwrap();
        let mut timers = TimerQueue::new();
        machine.start(0.0, &mut timers).unwrap();
        play_back(&mut machine, &mut timers);

        assert!(machine.on_response(Response::Tile(2), 3000.0, &mut timers));
        assert!(machine.on_response(Response::Tile(6), 3300.0, &mut timers));
        assert_eq!(machine.phase(), Phase::Gap { trial: 0 });
        // further taps go nowhere
        assert!(!machine.on_response(Response::Tile(1), 3400.0, &mut timers));

        // second sequence starts after the inter-sequence pause
        run_timers(&mut machine, &mut timers, 4300.0);
        assert_eq!(machine.phase(), Phase::Playback { trial: 1 });
        assert_eq!(machine.lit_tile(), Some(0));

        play_back(&mut machine, &mut timers);
        for (i, tile) in [0u8, 3, 8].into_iter().enumerate() {
            assert!(machine.on_response(Response::Tile(tile), 7000.0 + i as f64 * 300.0, &mut timers));
        }
        assert_eq!(machine.phase(), Phase::Done);
        assert!(timers.is_empty());

        let outcome = Box::new(machine).finish().unwrap();
        let first = &outcome.trials[0];
        assert_eq!(first.correct, Some(false));
        assert_eq!(first.flags.taps, Some(vec![2, 6]));
        assert_eq!(first.rt_ms, Some(900.0));
        assert_eq!(outcome.trials[1].correct, Some(true));
        assert_eq!(
            outcome.metrics,
            RawMetrics::MemorySteps {
                accuracy: 0.5,
                correct_sequences: 1,
                sequences: 2,
                longest_correct_span: 3,
            }
        );
    }

    #[test]
    fn test_taps_during_playback_are_ignored() {
        let mut machine = MemoryStepsMachine::new(config(1)).unwrap();
        let mut timers = TimerQueue::new();
        machine.start(0.0, &mut timers).unwrap();
        run_timers(&mut machine, &mut timers, 100.0);
        assert!(!machine.on_response(Response::Tile(1), 100.0, &mut timers));
        assert!(!machine.on_response(Response::Press, 100.0, &mut timers));
    }

    #[test]
    fn test_input_timeout_records_incorrect() {
        let mut machine = MemoryStepsMachine::with_targets(config(1), vec![vec![4, 4, 7]]).unwrap();
        let mut timers = TimerQueue::new();
        machine.start(0.0, &mut timers).unwrap();
        let opened = play_back(&mut machine, &mut timers);

        assert!(machine.on_response(Response::Tile(4), opened + 200.0, &mut timers));
        run_timers(&mut machine, &mut timers, opened + 15_000.0);
        assert_eq!(machine.phase(), Phase::Done);

        let outcome = Box::new(machine).finish().unwrap();
        let trial = &outcome.trials[0];
        assert_eq!(trial.correct, Some(false));
        assert_eq!(trial.rt_ms, None);
        assert_eq!(trial.flags.timed_out, Some(true));
    }

    #[test]
    fn test_generated_targets_follow_length_schedule() {
        let config = MemoryStepsConfig {
            seed: Some(5),
            ..MemoryStepsConfig::for_grade(9)
        };
        let machine = MemoryStepsMachine::new(config.clone()).unwrap();
        for (i, target) in machine.targets().iter().enumerate() {
            assert_eq!(target.len() as u32, config.sequence_length(i as u32));
            assert!(target.windows(2).all(|w| w[0] != w[1]));
            assert!(target.iter().all(|t| *t < 9));
        }
    }

    #[test]
    fn test_bad_targets_rejected() {
        assert!(MemoryStepsMachine::with_targets(config(1), vec![vec![1, 2]]).is_err());
        assert!(MemoryStepsMachine::with_targets(config(1), vec![vec![1, 2, 9]]).is_err());
        assert!(MemoryStepsMachine::with_targets(config(2), vec![vec![1, 2, 3]]).is_err());
    }
}
