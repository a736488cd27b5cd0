//! Game drivers
//!
//! A driver owns the timer queue of one running machine and feeds it due
//! timers and captured responses in timestamp order. When a timer and a
//! response fall on the same instant the timer fires first, so response
//! windows close inclusively.
//!
//! [`VirtualDriver`] runs a machine on a [`VirtualClock`] against a scripted
//! [`Participant`] with no sleeping. [`RealtimeDriver`] runs it on tokio time
//! with responses arriving through the [`InputRouter`].

use crate::clock::{TimeSource, TokioClock, VirtualClock};
use crate::error::AssessmentError;
use crate::games::{GameMachine, GameOutcome, Prompt, TimerEvent};
use crate::input::{CapturedResponse, InputRouter};
use crate::scheduler::TimerQueue;
use crate::types::{GameId, Response};
use tokio::sync::mpsc::UnboundedSender;

/// A response the participant will give, relative to the prompt opening
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedResponse {
    pub after_ms: f64,
    pub response: Response,
}

impl PlannedResponse {
    pub fn new(after_ms: f64, response: Response) -> Self {
        Self { after_ms, response }
    }
}

/// Something that answers prompts
pub trait Participant {
    fn respond(&mut self, prompt: &Prompt) -> Vec<PlannedResponse>;
}

impl<P: Participant + ?Sized> Participant for &mut P {
    fn respond(&mut self, prompt: &Prompt) -> Vec<PlannedResponse> {
        (**self).respond(prompt)
    }
}

/// Participant backed by a closure
pub struct FnParticipant<F>(pub F);

impl<F> Participant for FnParticipant<F>
where
    F: FnMut(&Prompt) -> Vec<PlannedResponse>,
{
    fn respond(&mut self, prompt: &Prompt) -> Vec<PlannedResponse> {
        (self.0)(prompt)
    }
}

/// Participant that never responds
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl Participant for Idle {
    fn respond(&mut self, _prompt: &Prompt) -> Vec<PlannedResponse> {
        Vec::new()
    }
}

/// Deterministic driver on a manually advanced clock
pub struct VirtualDriver<P> {
    machine: Box<dyn GameMachine>,
    clock: VirtualClock,
    timers: TimerQueue<TimerEvent>,
    responses: TimerQueue<Response>,
    participant: P,
    started: bool,
    accepted: usize,
    dropped: usize,
}

impl<P: Participant> VirtualDriver<P> {
    pub fn new(machine: Box<dyn GameMachine>, clock: VirtualClock, participant: P) -> Self {
        Self {
            machine,
            clock,
            timers: TimerQueue::new(),
            responses: TimerQueue::new(),
            participant,
            started: false,
            accepted: 0,
            dropped: 0,
        }
    }

    pub fn game_id(&self) -> GameId {
        self.machine.game_id()
    }

    pub fn machine(&self) -> &dyn GameMachine {
        self.machine.as_ref()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Responses the machine accepted
    pub fn accepted_responses(&self) -> usize {
        self.accepted
    }

    /// Responses that arrived outside any open window
    pub fn dropped_responses(&self) -> usize {
        self.dropped
    }

    /// Start the machine at the current clock time
    pub fn start(&mut self) -> Result<(), AssessmentError> {
        self.machine.start(self.clock.now(), &mut self.timers)?;
        self.started = true;
        self.collect_prompt();
        Ok(())
    }

    /// Inject a response at an absolute time, as if captured by the input handler
    ///
    /// A response stamped before the current clock is dropped, never re-timed.
    pub fn inject(&mut self, at_ms: f64, response: Response) {
        let now = self.clock.now();
        if at_ms < now {
            self.dropped += 1;
            tracing::debug!(game = %self.machine.game_id(), at_ms, now, ?response, "response stamped in the past");
            return;
        }
        self.responses.schedule_at(at_ms, response);
    }

    /// Process the earliest pending event; false when nothing is pending
    pub fn step(&mut self) -> bool {
        let next_timer = self.timers.next_due();
        let next_response = self.responses.next_due();

        let timer_first = match (next_timer, next_response) {
            (None, None) => return false,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(t), Some(r)) => t <= r,
        };

        if timer_first {
            if let Some((due, event)) = self.timers.pop_next() {
                self.clock.advance_to(due);
                self.machine.on_timer(event, due, &mut self.timers);
            }
        } else if let Some((at, response)) = self.responses.pop_next() {
            self.clock.advance_to(at);
            if self.machine.on_response(response, at, &mut self.timers) {
                self.accepted += 1;
            } else {
                self.dropped += 1;
                tracing::debug!(game = %self.machine.game_id(), at, ?response, "response outside any window");
            }
        }

        self.collect_prompt();
        if self.machine.phase().is_terminal() {
            self.responses.clear();
        }
        true
    }

    /// Process every event due at or before `until`, then move the clock there
    pub fn advance_until(&mut self, until: f64) {
        loop {
            let next = match (self.timers.next_due(), self.responses.next_due()) {
                (Some(t), Some(r)) => t.min(r),
                (Some(t), None) => t,
                (None, Some(r)) => r,
                (None, None) => break,
            };
            if next > until || !self.step() {
                break;
            }
        }
        self.clock.advance_to(until);
    }

    /// Cancel the machine: every pending timer and response is discarded
    pub fn abort(&mut self) {
        self.machine.cancel(&mut self.timers);
        self.timers.clear();
        self.responses.clear();
        tracing::debug!(game = %self.machine.game_id(), "game aborted");
    }

    /// Run to DONE and flush the outcome
    pub fn run(mut self) -> Result<GameOutcome, AssessmentError> {
        if !self.started {
            self.start()?;
        }
        while !self.machine.is_done() {
            if self.machine.phase().is_terminal() || !self.step() {
                return Err(AssessmentError::Stalled(self.machine.game_id()));
            }
        }
        tracing::debug!(
            game = %self.machine.game_id(),
            accepted = self.accepted,
            dropped = self.dropped,
            "virtual run complete"
        );
        self.machine.finish()
    }

    fn collect_prompt(&mut self) {
        if let Some(prompt) = self.machine.take_prompt() {
            for planned in self.participant.respond(&prompt) {
                self.responses
                    .schedule_at(prompt.opened_at_ms + planned.after_ms.max(0.0), planned.response);
            }
        }
    }
}

/// Tokio driver: sleeps until the next timer while listening for input
///
/// Dropping the `run` future drops the timer queue and the capture guard, so
/// nothing from a cancelled game can fire later.
pub struct RealtimeDriver {
    clock: TokioClock,
    router: InputRouter,
}

impl RealtimeDriver {
    /// `router` must stamp responses on the same timeline as `clock`
    pub fn new(clock: TokioClock, router: InputRouter) -> Self {
        Self { clock, router }
    }

    pub fn router(&self) -> &InputRouter {
        &self.router
    }

    /// Run `machine` to DONE; prompts are forwarded to `prompts` when given
    pub async fn run(
        &self,
        mut machine: Box<dyn GameMachine>,
        prompts: Option<UnboundedSender<Prompt>>,
    ) -> Result<GameOutcome, AssessmentError> {
        let game = machine.game_id();
        let (mut rx, _guard) = self.router.claim(game);
        let mut timers = TimerQueue::new();

        machine.start(self.clock.now(), &mut timers)?;
        forward_prompt(machine.as_mut(), prompts.as_ref());

        while !machine.is_done() {
            let Some(due) = timers.next_due() else {
                return Err(AssessmentError::Stalled(game));
            };

            let mut batch = Vec::new();
            let mut woke_at = f64::NEG_INFINITY;
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(self.clock.instant_at(due)) => woke_at = due,
                captured = rx.recv() => match captured {
                    Some(c) => batch.push(c),
                    None => {
                        return Err(AssessmentError::InvalidState(format!(
                            "input capture for {game} was taken over"
                        )))
                    }
                },
            }
            while let Ok(c) = rx.try_recv() {
                batch.push(c);
            }

            // float rounding must not leave the timer we slept for unfired
            let now = self.clock.now().max(woke_at);
            apply_in_order(machine.as_mut(), &mut timers, batch, now, prompts.as_ref());
        }

        tracing::debug!(game = %game, "realtime run complete");
        machine.finish()
    }
}

/// Interleave captured responses with due timers by timestamp; timers win ties
fn apply_in_order(
    machine: &mut dyn GameMachine,
    timers: &mut TimerQueue<TimerEvent>,
    mut batch: Vec<CapturedResponse>,
    now: f64,
    prompts: Option<&UnboundedSender<Prompt>>,
) {
    batch.sort_by(|a, b| a.at_ms.total_cmp(&b.at_ms));
    for captured in batch {
        while let Some((due, event)) = timers.pop_due(captured.at_ms) {
            machine.on_timer(event, due, timers);
            forward_prompt(machine, prompts);
        }
        if !machine.on_response(captured.response, captured.at_ms, timers) {
            tracing::debug!(
                game = %captured.game_id,
                at = captured.at_ms,
                "response outside any window"
            );
        }
        forward_prompt(machine, prompts);
    }
    while let Some((due, event)) = timers.pop_due(now) {
        machine.on_timer(event, due, timers);
        forward_prompt(machine, prompts);
    }
}

fn forward_prompt(machine: &mut dyn GameMachine, prompts: Option<&UnboundedSender<Prompt>>) {
    if let Some(prompt) = machine.take_prompt() {
        if let Some(tx) = prompts {
            // a closed listener only loses presentation updates
            let _ = tx.send(prompt);
        }
    }
}
