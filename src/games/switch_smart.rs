//! SwitchSmart: rule-switching card sort
//!
//! Fixed-duration cycle like the GO/NOGO games. The sorting rule toggles
//! between COLOR and SHAPE at every block boundary; the first trial of each new
//! block is a switch trial. The first LEFT/RIGHT answer while the card is
//! visible is the response. No answer by cycle end is an omission.

use super::{
    ensure_not_started, seeded_rng, FixedCycle, GameMachine, GameOutcome, Phase, Presentation,
    Prompt, SwitchSmartConfig, TimerEvent, TrialBuffer,
};
use crate::error::AssessmentError;
use crate::metrics;
use crate::scheduler::TimerQueue;
use crate::types::{Color, GameId, Response, Shape, Side, StimulusType, Trial, TrialFlags};
use rand::Rng;

const GAME: GameId = GameId::SwitchSmart;

/// One color x shape stimulus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Card {
    pub color: Color,
    pub shape: Shape,
}

#[derive(Debug, Clone, Copy)]
struct OpenTrial {
    index: u32,
    onset: f64,
    answer: Option<(Side, f64)>,
}

#[derive(Debug)]
pub struct SwitchSmartMachine {
    config: SwitchSmartConfig,
    cards: Vec<Card>,
    cycle: FixedCycle,
    phase: Phase,
    open: Option<OpenTrial>,
    trials: TrialBuffer,
    prompt: Option<Prompt>,
}

impl SwitchSmartMachine {
    pub fn new(config: SwitchSmartConfig) -> Result<Self, AssessmentError> {
        config.validate()?;
        let mut rng = seeded_rng(config.seed);
        let cards = (0..config.trials)
            .map(|_| Card {
                color: if rng.gen_bool(0.5) { Color::Blue } else { Color::Red },
                shape: if rng.gen_bool(0.5) { Shape::Circle } else { Shape::Square },
            })
            .collect();
        Self::with_cards(config, cards)
    }

    /// Machine with an explicit card order
    pub fn with_cards(config: SwitchSmartConfig, cards: Vec<Card>) -> Result<Self, AssessmentError> {
        config.validate()?;
        if cards.len() != config.trials as usize {
            return Err(AssessmentError::config(
                GAME.as_str(),
                format!("{} cards supplied, expected {}", cards.len(), config.trials),
            ));
        }
        Ok(Self {
            cycle: FixedCycle::new(config.stimulus_ms, config.gap_ms),
            config,
            cards,
            phase: Phase::NotStarted,
            open: None,
            trials: TrialBuffer::new(),
            prompt: None,
        })
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    fn open_trial(&mut self, index: u32, timers: &mut TimerQueue<TimerEvent>) {
        let onset = self.cycle.schedule_trial(index, timers);
        let card = self.cards[index as usize];
        self.open = Some(OpenTrial {
            index,
            onset,
            answer: None,
        });
        self.phase = Phase::StimulusVisible { trial: index };
        self.prompt = Some(Prompt {
            game_id: GAME,
            trial_index: index,
            opened_at_ms: onset,
            window_ms: Some(self.config.stimulus_ms),
            presentation: Presentation::Card {
                color: card.color,
                shape: card.shape,
                rule: self.config.rule_for(index),
            },
        });
    }

    fn close_trial(&mut self, timers: &mut TimerQueue<TimerEvent>) {
        let Some(open) = self.open.take() else {
            return;
        };
        let card = self.cards[open.index as usize];
        let rule = self.config.rule_for(open.index);
        let expected = rule.expected_side(card.color, card.shape);

        self.trials.record(Trial {
            game_id: GAME,
            trial_index: open.index,
            trial_start_ms: open.onset,
            stimulus_type: StimulusType::Card,
            rt_ms: open.answer.map(|(_, rt)| rt),
            response_code: open.answer.map(|(side, _)| Response::Side(side).code()),
            correct: Some(open.answer.map(|(side, _)| side) == Some(expected)),
            flags: TrialFlags {
                rule: Some(rule),
                is_switch: Some(self.config.is_switch(open.index)),
                color: Some(card.color),
                shape: Some(card.shape),
                ..TrialFlags::default()
            },
        });

        let next = open.index + 1;
        if next < self.config.trials {
            self.open_trial(next, timers);
        } else {
            self.phase = Phase::Done;
            tracing::debug!(game = %GAME, trials = self.trials.len(), "game done");
        }
    }
}

impl GameMachine for SwitchSmartMachine {
    fn game_id(&self) -> GameId {
        GAME
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn start(&mut self, now: f64, timers: &mut TimerQueue<TimerEvent>) -> Result<(), AssessmentError> {
        ensure_not_started(self.phase, GAME)?;
        self.cycle.origin_ms = now;
        tracing::debug!(
            game = %GAME,
            trials = self.config.trials,
            starting_rule = ?self.config.starting_rule,
            "machine started"
        );
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
        let Response::Side(side) = response else {
            return false;
        };
        if !matches!(self.phase, Phase::StimulusVisible { .. }) {
            return false;
        }
        match self.open.as_mut() {
            Some(open) if open.answer.is_none() => {
                open.answer = Some((side, now - open.onset));
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
            return Err(AssessmentError::GameIncomplete(GAME));
        }
        let trials = self.trials.into_trials();
        let metrics = metrics::compute(GAME, &trials);
        Ok(GameOutcome {
            game_id: GAME,
            trials,
            metrics,
            sampling_cycle_ms: self.config.cycle_ms(),
        })
    }

    fn completed_trials(&self) -> usize {
        self.trials.len()
    }
}
