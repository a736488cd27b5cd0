//! Session orchestration
//!
//! Sequences the five games strictly in battery order, scores each finished
//! game, and performs the single atomic finalize once the fifth index is in.
//! Persistence failures are surfaced unchanged and leave the session
//! IN_PROGRESS, so the caller can retry the failed step or mark it PARTIAL.

use crate::error::AssessmentError;
use crate::games::{BatteryConfig, GameMachine, GameOutcome};
use crate::indices::{priority_domain, IndexSet};
use crate::prescription::generate_plan;
use crate::scoring::score_game;
use crate::store::{AssessmentStore, FinalizeRequest};
use crate::types::{
    AssessmentReport, AssessmentSession, Child, CognitiveProfile, GameId, SessionStatus,
    TaskResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    InProgress,
    Finalizing,
    Completed,
    Partial,
}

/// Drives one child's battery session against a store
pub struct SessionOrchestrator<S> {
    store: S,
    config: BatteryConfig,
    child: Child,
    app_version: Option<String>,
    state: SessionState,
    session: Option<AssessmentSession>,
    next_game: usize,
    persisted_trials: HashSet<GameId>,
    results: Vec<TaskResult>,
    indices: IndexSet,
    report: Option<AssessmentReport>,
    profile: Option<CognitiveProfile>,
}

impl<S: AssessmentStore> SessionOrchestrator<S> {
    pub fn new(store: S, child: Child, config: BatteryConfig) -> Self {
        Self {
            store,
            config,
            child,
            app_version: None,
            state: SessionState::Created,
            session: None,
            next_game: 0,
            persisted_trials: HashSet::new(),
            results: Vec::new(),
            indices: IndexSet::new(),
            report: None,
            profile: None,
        }
    }

    /// Orchestrator using the default battery for the child's grade
    pub fn for_child(store: S, child: Child) -> Self {
        let config = BatteryConfig::for_grade(child.grade);
        Self::new(store, child, config)
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    /// Create the IN_PROGRESS session
    pub fn start(&mut self) -> Result<&AssessmentSession, AssessmentError> {
        if self.state != SessionState::Created {
            return Err(AssessmentError::InvalidState(format!(
                "session already started ({:?})",
                self.state
            )));
        }
        self.config.validate()?;
        let session = self.store.create_session(
            &self.child.id,
            self.app_version.as_deref(),
            Some(self.config.config_version.as_str()),
        )?;
        tracing::info!(session_id = %session.id, child_id = %self.child.id, "session started");
        self.state = SessionState::InProgress;
        Ok(self.session.insert(session))
    }

    /// Game expected next, while the session is running
    pub fn next_game(&self) -> Option<GameId> {
        if self.state != SessionState::InProgress {
            return None;
        }
        GameId::ALL.get(self.next_game).copied()
    }

    /// Fresh machine for the next game, built from the battery configuration
    pub fn machine_for_next_game(&self) -> Result<Box<dyn GameMachine>, AssessmentError> {
        let game = self.next_game().ok_or_else(|| {
            AssessmentError::InvalidState(format!("no game pending ({:?})", self.state))
        })?;
        self.config.build_machine(game)
    }

    /// Persist and score a finished game; finalizes after the fifth
    ///
    /// Retry-safe: a game whose trial batch is already stored is not
    /// re-appended. If finalize fails after the fifth game, call
    /// [`finalize`](Self::finalize) to retry it.
    pub fn on_game_complete(&mut self, outcome: GameOutcome) -> Result<TaskResult, AssessmentError> {
        let session_id = self.session_id()?.to_string();
        let expected = self.next_game();
        if expected != Some(outcome.game_id) {
            return Err(AssessmentError::OutOfOrder {
                expected,
                got: outcome.game_id,
            });
        }
        let game = outcome.game_id;
        if let Some(stray) = outcome.trials.iter().find(|t| t.game_id != game) {
            return Err(AssessmentError::InvalidState(format!(
                "trial {} of {} submitted with {game}",
                stray.trial_index, stray.game_id
            )));
        }

        if !self.persisted_trials.contains(&game) {
            self.store.append_trials(&session_id, &outcome.trials)?;
            self.persisted_trials.insert(game);
            tracing::debug!(game = %game, trials = outcome.trials.len(), "trial batch persisted");
        }

        let result = score_game(&outcome)?;
        self.store.upsert_task_result(&session_id, &result)?;

        self.indices.record(game, result.index);
        self.results.push(result.clone());
        self.next_game += 1;
        tracing::debug!(game = %game, index = result.index, "game complete");

        if self.next_game == GameId::ALL.len() {
            self.finalize()?;
        }
        Ok(result)
    }

    /// Atomic COMPLETED write: status, report and profile
    pub fn finalize(&mut self) -> Result<&AssessmentReport, AssessmentError> {
        let session_id = self.session_id()?.to_string();
        let indices = self.indices.complete().ok_or_else(|| {
            AssessmentError::InvalidState(format!(
                "cannot finalize with {} of 5 indices",
                self.indices.len()
            ))
        })?;

        let priority = priority_domain(&indices);
        let report = AssessmentReport {
            session_id: session_id.clone(),
            plan: generate_plan(priority),
        };
        let profile = CognitiveProfile {
            child_id: self.child.id.clone(),
            session_id: session_id.clone(),
            indices,
            priority_domain: priority,
            created_at: Utc::now(),
        };

        self.state = SessionState::Finalizing;
        let request = FinalizeRequest::completed(report.clone(), profile.clone());
        match self.store.finalize(&session_id, request) {
            Ok(session) => {
                tracing::info!(
                    session_id = %session_id,
                    priority_domain = %priority,
                    "session finalized"
                );
                self.session = Some(session);
                self.state = SessionState::Completed;
                self.profile = Some(profile);
                Ok(self.report.insert(report))
            }
            Err(err) => {
                self.state = SessionState::InProgress;
                tracing::warn!(session_id = %session_id, error = %err, "finalize failed; session left in progress");
                Err(err.into())
            }
        }
    }

    /// Close an unfinished session as PARTIAL, without report or profile
    pub fn mark_partial(&mut self) -> Result<&AssessmentSession, AssessmentError> {
        let session_id = self.session_id()?.to_string();
        let session = self.store.finalize(&session_id, FinalizeRequest::partial())?;
        tracing::info!(
            session_id = %session_id,
            games = self.results.len(),
            "session marked partial"
        );
        self.state = SessionState::Partial;
        Ok(self.session.insert(session))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    pub fn session(&self) -> Option<&AssessmentSession> {
        self.session.as_ref()
    }

    pub fn child(&self) -> &Child {
        &self.child
    }

    pub fn config(&self) -> &BatteryConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Task results scored so far, in battery order
    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    pub fn indices(&self) -> &IndexSet {
        &self.indices
    }

    /// Finalized report
    pub fn report(&self) -> Option<&AssessmentReport> {
        self.report.as_ref()
    }

    pub fn profile(&self) -> Option<&CognitiveProfile> {
        self.profile.as_ref()
    }

    fn session_id(&self) -> Result<&str, AssessmentError> {
        match (&self.session, self.state) {
            (Some(session), SessionState::InProgress) => Ok(&session.id),
            _ => Err(AssessmentError::InvalidState(format!(
                "session is not in progress ({:?})",
                self.state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::InMemoryStore;
    use crate::types::{Domain, RawMetrics, StimulusType, Trial, TrialFlags};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Store whose writes fail a configurable number of times
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        append_failures: Arc<AtomicUsize>,
        upsert_failures: Arc<AtomicUsize>,
        finalize_failures: Arc<AtomicUsize>,
    }

    fn take_failure(counter: &AtomicUsize) -> Result<(), StoreError> {
        let hit = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hit {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    impl AssessmentStore for FlakyStore {
        fn create_session(
            &self,
            child_id: &str,
            app_version: Option<&str>,
            config_version: Option<&str>,
        ) -> Result<AssessmentSession, StoreError> {
            self.inner.create_session(child_id, app_version, config_version)
        }

        fn append_trials(&self, session_id: &str, trials: &[Trial]) -> Result<(), StoreError> {
            take_failure(&self.append_failures)?;
            self.inner.append_trials(session_id, trials)
        }

        fn upsert_task_result(
            &self,
            session_id: &str,
            result: &TaskResult,
        ) -> Result<(), StoreError> {
            take_failure(&self.upsert_failures)?;
            self.inner.upsert_task_result(session_id, result)
        }

        fn finalize(
            &self,
            session_id: &str,
            request: FinalizeRequest,
        ) -> Result<AssessmentSession, StoreError> {
            take_failure(&self.finalize_failures)?;
            self.inner.finalize(session_id, request)
        }

        fn get_child_history(
            &self,
            child_id: &str,
            limit: usize,
        ) -> Result<Vec<AssessmentSession>, StoreError> {
            self.inner.get_child_history(child_id, limit)
        }

        fn get_child_profiles(
            &self,
            child_id: &str,
            limit: usize,
        ) -> Result<Vec<CognitiveProfile>, StoreError> {
            self.inner.get_child_profiles(child_id, limit)
        }
    }

    fn trials(game: GameId, kind: StimulusType, n: u32) -> Vec<Trial> {
        (0..n)
            .map(|i| Trial {
                game_id: game,
                trial_index: i,
                trial_start_ms: i as f64 * 1500.0,
                stimulus_type: kind,
                rt_ms: Some(450.0),
                response_code: Some("press".to_string()),
                correct: Some(true),
                flags: TrialFlags::default(),
            })
            .collect()
    }

    /// Synthetic outcome with fixed metrics
    fn outcome(game: GameId) -> GameOutcome {
        let (kind, metrics) = match game {
            GameId::FocusFlow => (
                StimulusType::Go,
                RawMetrics::FocusFlow {
                    miss_rate: 0.1,
                    commission_rate: 0.2,
                    mean_rt_ms: 450.0,
                    go_count: 8,
                    nogo_count: 0,
                },
            ),
            GameId::StopAndGo => (
                StimulusType::Go,
                RawMetrics::StopAndGo {
                    commission_rate: 0.25,
                    nogo_count: 0,
                },
            ),
            GameId::MemorySteps => (
                StimulusType::Sequence,
                RawMetrics::MemorySteps {
                    accuracy: 0.4,
                    correct_sequences: 6,
                    sequences: 15,
                    longest_correct_span: 4,
                },
            ),
            GameId::SteadySpeed => (
                StimulusType::Cue,
                RawMetrics::SteadySpeed {
                    mean_rt_ms: 450.0,
                    cv: 0.2,
                    valid_count: 8,
                    false_starts: 0,
                },
            ),
            GameId::SwitchSmart => (
                StimulusType::Card,
                RawMetrics::SwitchSmart {
                    accuracy: 0.9,
                    switch_cost_ms: 100.0,
                    correct_trials: 8,
                },
            ),
        };
        GameOutcome {
            game_id: game,
            trials: trials(game, kind, 8),
            metrics,
            sampling_cycle_ms: 1500.0,
        }
    }

    fn started<S: AssessmentStore>(store: S) -> SessionOrchestrator<S> {
        let mut orchestrator = SessionOrchestrator::for_child(store, Child::new("child-1", 3))
            .with_app_version("test");
        orchestrator.start().unwrap();
        orchestrator
    }

    #[test]
    fn test_end_to_end_single_report_and_profile() {
        let store = InMemoryStore::new();
        let mut orchestrator = started(store.clone());

        for game in GameId::ALL {
            assert_eq!(orchestrator.next_game(), Some(game));
            orchestrator.on_game_complete(outcome(game)).unwrap();
        }

        assert_eq!(orchestrator.state(), SessionState::Completed);
        assert_eq!(orchestrator.status(), Some(SessionStatus::Completed));
        assert_eq!(store.report_count(), 1);
        assert_eq!(store.profile_count(), 1);

        let report = orchestrator.report().unwrap();
        assert_eq!(report.plan.retest_days, 28);
        // constant RTs give zero spectra, so WME = 0.4 is the lowest index
        assert_eq!(report.plan.primary_focus, "Working Memory");

        let profile = orchestrator.profile().unwrap();
        assert_eq!(profile.priority_domain, Domain::WorkingMemory);
        assert_eq!(profile.indices.ici, 1.0 - 0.25 * 0.6);

        let session_id = &orchestrator.session().unwrap().id;
        assert_eq!(store.trials(session_id).len(), 40);
        assert_eq!(store.task_results(session_id).len(), 5);
        assert_eq!(orchestrator.next_game(), None);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut orchestrator = started(InMemoryStore::new());
        let err = orchestrator
            .on_game_complete(outcome(GameId::MemorySteps))
            .unwrap_err();
        assert!(matches!(
            err,
            AssessmentError::OutOfOrder {
                expected: Some(GameId::FocusFlow),
                got: GameId::MemorySteps
            }
        ));
    }

    #[test]
    fn test_foreign_trials_rejected_before_persisting() {
        let store = InMemoryStore::new();
        let mut orchestrator = started(store.clone());
        let mut bad = outcome(GameId::FocusFlow);
        bad.trials = outcome(GameId::StopAndGo).trials;

        let err = orchestrator.on_game_complete(bad).unwrap_err();
        assert!(matches!(err, AssessmentError::InvalidState(_)));

        let session_id = orchestrator.session().unwrap().id.clone();
        assert!(store.trials(&session_id).is_empty());
        assert_eq!(orchestrator.next_game(), Some(GameId::FocusFlow));

        orchestrator.on_game_complete(outcome(GameId::FocusFlow)).unwrap();
        assert_eq!(store.trials(&session_id).len(), 8);
    }

    #[test]
    fn test_not_started() {
        let mut orchestrator =
            SessionOrchestrator::for_child(InMemoryStore::new(), Child::new("c", 5));
        assert_eq!(orchestrator.next_game(), None);
        assert!(orchestrator.machine_for_next_game().is_err());
        assert!(orchestrator.on_game_complete(outcome(GameId::FocusFlow)).is_err());
        assert!(orchestrator.start().is_ok());
        assert!(orchestrator.start().is_err());
    }

    #[test]
    fn test_retry_after_upsert_failure_does_not_duplicate_trials() {
        let store = FlakyStore::default();
        let mut orchestrator = started(store.clone());
        store.upsert_failures.store(1, Ordering::SeqCst);

        let err = orchestrator
            .on_game_complete(outcome(GameId::FocusFlow))
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Persistence(StoreError::Unavailable(_))));
        assert_eq!(orchestrator.next_game(), Some(GameId::FocusFlow));

        orchestrator
            .on_game_complete(outcome(GameId::FocusFlow))
            .unwrap();
        let session_id = orchestrator.session().unwrap().id.clone();
        assert_eq!(store.inner.trials(&session_id).len(), 8);
        assert_eq!(orchestrator.next_game(), Some(GameId::StopAndGo));
    }

    #[test]
    fn test_append_failure_keeps_prior_games() {
        let store = FlakyStore::default();
        let mut orchestrator = started(store.clone());
        orchestrator
            .on_game_complete(outcome(GameId::FocusFlow))
            .unwrap();

        store.append_failures.store(1, Ordering::SeqCst);
        assert!(orchestrator
            .on_game_complete(outcome(GameId::StopAndGo))
            .is_err());

        let session_id = orchestrator.session().unwrap().id.clone();
        assert_eq!(store.inner.task_results(&session_id).len(), 1);
        assert_eq!(store.inner.trials(&session_id).len(), 8);
        assert_eq!(orchestrator.state(), SessionState::InProgress);
    }

    #[test]
    fn test_failed_finalize_stays_in_progress_and_retries() {
        let store = FlakyStore::default();
        let mut orchestrator = started(store.clone());
        store.finalize_failures.store(1, Ordering::SeqCst);

        for game in &GameId::ALL[..4] {
            orchestrator.on_game_complete(outcome(*game)).unwrap();
        }
        assert!(orchestrator
            .on_game_complete(outcome(GameId::SwitchSmart))
            .is_err());

        assert_eq!(orchestrator.state(), SessionState::InProgress);
        assert_eq!(store.inner.report_count(), 0);
        assert_eq!(store.inner.profile_count(), 0);
        let session_id = orchestrator.session().unwrap().id.clone();
        assert_eq!(
            store.inner.session(&session_id).unwrap().status,
            SessionStatus::InProgress
        );

        orchestrator.finalize().unwrap();
        assert_eq!(orchestrator.state(), SessionState::Completed);
        assert_eq!(store.inner.report_count(), 1);
        assert_eq!(store.inner.profile_count(), 1);
    }

    #[test]
    fn test_mark_partial() {
        let store = InMemoryStore::new();
        let mut orchestrator = started(store.clone());
        orchestrator
            .on_game_complete(outcome(GameId::FocusFlow))
            .unwrap();
        assert!(orchestrator.finalize().is_err());

        let session = orchestrator.mark_partial().unwrap();
        assert_eq!(session.status, SessionStatus::Partial);
        assert!(session.ended_at.is_some());
        assert_eq!(orchestrator.state(), SessionState::Partial);
        assert_eq!(store.report_count(), 0);
        assert_eq!(store.profile_count(), 0);
        assert!(orchestrator.report().is_none());
    }

    #[test]
    fn test_machine_for_next_game_follows_order() {
        let mut orchestrator = started(InMemoryStore::new());
        let machine = orchestrator.machine_for_next_game().unwrap();
        assert_eq!(machine.game_id(), GameId::FocusFlow);
        orchestrator
            .on_game_complete(outcome(GameId::FocusFlow))
            .unwrap();
        let machine = orchestrator.machine_for_next_game().unwrap();
        assert_eq!(machine.game_id(), GameId::StopAndGo);
    }
}
