//! Persistence collaborator
//!
//! The orchestrator only talks to storage through [`AssessmentStore`]. The
//! bundled [`InMemoryStore`] is a cloneable handle over one locked state; it
//! validates a finalize request completely before touching anything, then
//! applies all three writes under the same lock.

use crate::error::StoreError;
use crate::types::{
    AssessmentReport, AssessmentSession, CognitiveProfile, GameId, SessionStatus, TaskResult,
    Trial,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Terminal write for a session
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeRequest {
    pub status: SessionStatus,
    /// Report and profile are written together or not at all
    pub report: Option<AssessmentReport>,
    pub profile: Option<CognitiveProfile>,
}

impl FinalizeRequest {
    pub fn completed(report: AssessmentReport, profile: CognitiveProfile) -> Self {
        Self {
            status: SessionStatus::Completed,
            report: Some(report),
            profile: Some(profile),
        }
    }

    pub fn partial() -> Self {
        Self {
            status: SessionStatus::Partial,
            report: None,
            profile: None,
        }
    }
}

/// Storage operations the assessment core depends on
pub trait AssessmentStore {
    fn create_session(
        &self,
        child_id: &str,
        app_version: Option<&str>,
        config_version: Option<&str>,
    ) -> Result<AssessmentSession, StoreError>;

    /// Batch insert, called once per completed game
    fn append_trials(&self, session_id: &str, trials: &[Trial]) -> Result<(), StoreError>;

    fn upsert_task_result(&self, session_id: &str, result: &TaskResult) -> Result<(), StoreError>;

    /// Atomic status + report + profile write
    fn finalize(
        &self,
        session_id: &str,
        request: FinalizeRequest,
    ) -> Result<AssessmentSession, StoreError>;

    /// Sessions for a child, newest first
    fn get_child_history(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<AssessmentSession>, StoreError>;

    /// Profiles for a child, newest first
    fn get_child_profiles(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<CognitiveProfile>, StoreError>;
}

impl<S: AssessmentStore + ?Sized> AssessmentStore for Arc<S> {
    fn create_session(
        &self,
        child_id: &str,
        app_version: Option<&str>,
        config_version: Option<&str>,
    ) -> Result<AssessmentSession, StoreError> {
        (**self).create_session(child_id, app_version, config_version)
    }

    fn append_trials(&self, session_id: &str, trials: &[Trial]) -> Result<(), StoreError> {
        (**self).append_trials(session_id, trials)
    }

    fn upsert_task_result(&self, session_id: &str, result: &TaskResult) -> Result<(), StoreError> {
        (**self).upsert_task_result(session_id, result)
    }

    fn finalize(
        &self,
        session_id: &str,
        request: FinalizeRequest,
    ) -> Result<AssessmentSession, StoreError> {
        (**self).finalize(session_id, request)
    }

    fn get_child_history(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<AssessmentSession>, StoreError> {
        (**self).get_child_history(child_id, limit)
    }

    fn get_child_profiles(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<CognitiveProfile>, StoreError> {
        (**self).get_child_profiles(child_id, limit)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    /// Insertion order doubles as recency
    sessions: Vec<AssessmentSession>,
    trials: HashMap<String, Vec<Trial>>,
    results: HashMap<String, BTreeMap<GameId, TaskResult>>,
    reports: HashMap<String, AssessmentReport>,
    /// Append-only
    profiles: Vec<CognitiveProfile>,
}

impl StoreState {
    fn session(&self, id: &str) -> Result<&AssessmentSession, StoreError> {
        self.sessions
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    fn open_session(&self, id: &str) -> Result<&AssessmentSession, StoreError> {
        let session = self.session(id)?;
        if session.status.is_terminal() {
            return Err(StoreError::AlreadyFinalized(id.to_string()));
        }
        Ok(session)
    }
}

/// Process-local store
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, session_id: &str) -> Option<AssessmentSession> {
        self.state.lock().session(session_id).ok().cloned()
    }

    /// Stored trials for a session, in insertion order
    pub fn trials(&self, session_id: &str) -> Vec<Trial> {
        self.state
            .lock()
            .trials
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Task results for a session, in battery order
    pub fn task_results(&self, session_id: &str) -> Vec<TaskResult> {
        self.state
            .lock()
            .results
            .get(session_id)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn report(&self, session_id: &str) -> Option<AssessmentReport> {
        self.state.lock().reports.get(session_id).cloned()
    }

    pub fn report_count(&self) -> usize {
        self.state.lock().reports.len()
    }

    pub fn profile_count(&self) -> usize {
        self.state.lock().profiles.len()
    }
}

impl AssessmentStore for InMemoryStore {
    fn create_session(
        &self,
        child_id: &str,
        app_version: Option<&str>,
        config_version: Option<&str>,
    ) -> Result<AssessmentSession, StoreError> {
        let session = AssessmentSession {
            id: Uuid::new_v4().to_string(),
            child_id: child_id.to_string(),
            status: SessionStatus::InProgress,
            started_at: Utc::now(),
            ended_at: None,
            app_version: app_version.map(str::to_string),
            config_version: config_version.map(str::to_string),
        };
        self.state.lock().sessions.push(session.clone());
        Ok(session)
    }

    fn append_trials(&self, session_id: &str, trials: &[Trial]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.open_session(session_id)?;

        let mut seen: HashSet<(GameId, u32)> = state
            .trials
            .get(session_id)
            .map(|rows| rows.iter().map(|t| (t.game_id, t.trial_index)).collect())
            .unwrap_or_default();
        for trial in trials {
            if !seen.insert((trial.game_id, trial.trial_index)) {
                return Err(StoreError::DuplicateTrial {
                    game: trial.game_id,
                    trial_index: trial.trial_index,
                });
            }
        }

        state
            .trials
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(trials);
        Ok(())
    }

    fn upsert_task_result(&self, session_id: &str, result: &TaskResult) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.open_session(session_id)?;
        state
            .results
            .entry(session_id.to_string())
            .or_default()
            .insert(result.game_id, result.clone());
        Ok(())
    }

    fn finalize(
        &self,
        session_id: &str,
        request: FinalizeRequest,
    ) -> Result<AssessmentSession, StoreError> {
        let mut state = self.state.lock();
        state.open_session(session_id)?;

        if !request.status.is_terminal() {
            return Err(StoreError::InvalidFinalize(format!(
                "{:?} is not a terminal status",
                request.status
            )));
        }
        if request.report.is_some() != request.profile.is_some() {
            return Err(StoreError::InvalidFinalize(
                "report and profile must be written together".to_string(),
            ));
        }
        if let Some(report) = &request.report {
            if report.session_id != session_id {
                return Err(StoreError::InvalidFinalize(format!(
                    "report belongs to session {}",
                    report.session_id
                )));
            }
        }
        if let Some(profile) = &request.profile {
            if profile.session_id != session_id {
                return Err(StoreError::InvalidFinalize(format!(
                    "profile belongs to session {}",
                    profile.session_id
                )));
            }
        }

        // validated; everything below is infallible under the lock
        let session = match state.sessions.iter_mut().find(|s| s.id == session_id) {
            Some(session) => {
                session.status = request.status;
                session.ended_at = Some(Utc::now());
                session.clone()
            }
            None => return Err(StoreError::SessionNotFound(session_id.to_string())),
        };
        if let Some(report) = request.report {
            state.reports.insert(session_id.to_string(), report);
        }
        if let Some(profile) = request.profile {
            state.profiles.push(profile);
        }
        Ok(session)
    }

    fn get_child_history(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<AssessmentSession>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .sessions
            .iter()
            .rev()
            .filter(|s| s.child_id == child_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn get_child_profiles(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<CognitiveProfile>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .profiles
            .iter()
            .rev()
            .filter(|p| p.child_id == child_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
