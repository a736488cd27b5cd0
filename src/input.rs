//! Single active input handler
//!
//! Exactly one running game owns input capture at a time. A driver claims the
//! router for its game and receives stamped responses over a channel; the
//! returned guard releases ownership when dropped. Input arriving while nobody
//! owns capture is dropped and counted.

use crate::clock::TimeSource;
use crate::types::{GameId, Response};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A response stamped with its capture time on the router's timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturedResponse {
    pub game_id: GameId,
    pub response: Response,
    pub at_ms: f64,
}

#[derive(Debug)]
struct Owner {
    generation: u64,
    game_id: GameId,
    tx: UnboundedSender<CapturedResponse>,
}

#[derive(Debug, Default)]
struct RouterState {
    owner: Option<Owner>,
    next_generation: u64,
    dropped: u64,
}

/// Routes raw input to whichever game currently owns capture
#[derive(Clone)]
pub struct InputRouter {
    state: Arc<Mutex<RouterState>>,
    clock: Arc<dyn TimeSource>,
}

impl InputRouter {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RouterState::default())),
            clock,
        }
    }

    /// Take over input capture for `game_id`
    ///
    /// A previous owner is disconnected: its receiver sees the channel close.
    pub fn claim(&self, game_id: GameId) -> (UnboundedReceiver<CapturedResponse>, CaptureGuard) {
        let (tx, rx) = unbounded_channel();
        let mut state = self.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;

        if let Some(previous) = state.owner.replace(Owner {
            generation,
            game_id,
            tx,
        }) {
            tracing::warn!(
                previous = %previous.game_id,
                next = %game_id,
                "input capture taken over while still owned"
            );
        }

        let guard = CaptureGuard {
            state: Arc::clone(&self.state),
            generation,
        };
        (rx, guard)
    }

    /// Stamp and forward a response; false when nobody is listening
    pub fn submit(&self, response: Response) -> bool {
        let at_ms = self.clock.now();
        let mut state = self.state.lock();
        let delivered = match &state.owner {
            Some(owner) => owner
                .tx
                .send(CapturedResponse {
                    game_id: owner.game_id,
                    response,
                    at_ms,
                })
                .is_ok(),
            None => false,
        };
        if !delivered {
            state.dropped += 1;
            tracing::debug!(?response, at_ms, "input dropped; no active capture");
        }
        delivered
    }

    /// Game currently owning capture
    pub fn owner(&self) -> Option<GameId> {
        self.state.lock().owner.as_ref().map(|o| o.game_id)
    }

    pub fn dropped_count(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }
}

/// Releases capture on drop, unless another claim has already replaced it
#[derive(Debug)]
pub struct CaptureGuard {
    state: Arc<Mutex<RouterState>>,
    generation: u64,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state
            .owner
            .as_ref()
            .is_some_and(|o| o.generation == self.generation)
        {
            state.owner = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    fn router() -> (InputRouter, VirtualClock) {
        let clock = VirtualClock::new();
        (InputRouter::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_submit_without_owner_is_dropped() {
        let (router, _) = router();
        assert!(!router.submit(Response::Press));
        assert_eq!(router.dropped_count(), 1);
        assert_eq!(router.owner(), None);
    }

    #[test]
    fn test_claim_stamps_with_router_clock() {
        let (router, clock) = router();
        let (mut rx, _guard) = router.claim(GameId::SteadySpeed);
        clock.advance_to(1234.0);
        assert!(router.submit(Response::Press));

        let captured = rx.try_recv().unwrap();
        assert_eq!(captured.game_id, GameId::SteadySpeed);
        assert_eq!(captured.at_ms, 1234.0);
    }

    #[test]
    fn test_guard_releases_capture() {
        let (router, _) = router();
        let (_rx, guard) = router.claim(GameId::FocusFlow);
        assert_eq!(router.owner(), Some(GameId::FocusFlow));
        drop(guard);
        assert_eq!(router.owner(), None);
        assert!(!router.submit(Response::Press));
    }

    #[test]
    fn test_takeover_disconnects_previous_owner() {
        let (router, _) = router();
        let (mut old_rx, old_guard) = router.claim(GameId::FocusFlow);
        let (mut new_rx, _new_guard) = router.claim(GameId::StopAndGo);

        // stale guard must not release the new owner
        drop(old_guard);
        assert_eq!(router.owner(), Some(GameId::StopAndGo));

        assert!(router.submit(Response::Press));
        assert!(old_rx.try_recv().is_err());
        assert_eq!(new_rx.try_recv().unwrap().game_id, GameId::StopAndGo);
    }
}
