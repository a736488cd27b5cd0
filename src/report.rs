//! Report encoding
//!
//! Encodes a finalized session into a self-describing JSON document: producer
//! metadata, session summary, per-game results, the five indices, the plan and
//! a fixed non-diagnostic disclaimer.

use crate::error::AssessmentError;
use crate::session::SessionOrchestrator;
use crate::store::AssessmentStore;
use crate::types::{
    AssessmentReport, AssessmentSession, CognitiveProfile, Domain, InterventionPlan, SessionStatus,
    TaskResult,
};
use crate::{ENGINE_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current report document version
pub const REPORT_VERSION: &str = "1.0.0";

/// Attached to every report document
pub const DISCLAIMER: &str = "These results describe performance on five short games and are \
    not a clinical diagnosis. Indices are not normed against any population. Share concerns \
    with a qualified professional.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub child_id: String,
    pub status: SessionStatus,
    pub started_at_utc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at_utc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
}

/// One named index value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub domain: Domain,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub report_version: String,
    pub producer: ReportProducer,
    pub session: SessionSummary,
    pub task_results: Vec<TaskResult>,
    /// In the fixed order ASI, ICI, WME, PCI, CFI
    pub indices: Vec<IndexEntry>,
    pub priority_domain: Domain,
    pub plan: InterventionPlan,
    pub computed_at_utc: String,
    pub disclaimer: String,
}

/// Encoder for report documents
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Encode a finalized session
    pub fn encode(
        &self,
        session: &AssessmentSession,
        results: &[TaskResult],
        profile: &CognitiveProfile,
        report: &AssessmentReport,
    ) -> Result<ReportDocument, AssessmentError> {
        if report.session_id != session.id || profile.session_id != session.id {
            return Err(AssessmentError::InvalidState(format!(
                "report or profile does not belong to session {}",
                session.id
            )));
        }

        let producer = ReportProducer {
            name: PRODUCER_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        };

        let summary = SessionSummary {
            session_id: session.id.clone(),
            child_id: session.child_id.clone(),
            status: session.status,
            started_at_utc: session.started_at.to_rfc3339(),
            ended_at_utc: session.ended_at.map(|t| t.to_rfc3339()),
            app_version: session.app_version.clone(),
            config_version: session.config_version.clone(),
        };

        let indices = profile
            .indices
            .pairs()
            .into_iter()
            .map(|(domain, value)| IndexEntry {
                name: domain.index_name().to_string(),
                domain,
                value,
            })
            .collect();

        Ok(ReportDocument {
            report_version: REPORT_VERSION.to_string(),
            producer,
            session: summary,
            task_results: results.to_vec(),
            indices,
            priority_domain: profile.priority_domain,
            plan: report.plan.clone(),
            computed_at_utc: Utc::now().to_rfc3339(),
            disclaimer: DISCLAIMER.to_string(),
        })
    }

    /// Encode the session an orchestrator has finalized
    pub fn encode_session<S: AssessmentStore>(
        &self,
        orchestrator: &SessionOrchestrator<S>,
    ) -> Result<ReportDocument, AssessmentError> {
        match (
            orchestrator.session(),
            orchestrator.profile(),
            orchestrator.report(),
        ) {
            (Some(session), Some(profile), Some(report)) => {
                self.encode(session, orchestrator.results(), profile, report)
            }
            _ => Err(AssessmentError::InvalidState(format!(
                "session not finalized ({:?})",
                orchestrator.state()
            ))),
        }
    }

    /// Encode to a pretty JSON string
    pub fn encode_to_json(&self, document: &ReportDocument) -> Result<String, AssessmentError> {
        serde_json::to_string_pretty(document).map_err(AssessmentError::JsonError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prescription::generate_plan;
    use crate::types::{CognitiveIndices, GameId};

    fn fixture() -> (AssessmentSession, CognitiveProfile, AssessmentReport) {
        let now = Utc::now();
        let session = AssessmentSession {
            id: "s-1".to_string(),
            child_id: "c-1".to_string(),
            status: SessionStatus::Completed,
            started_at: now,
            ended_at: Some(now),
            app_version: Some("2.1.0".to_string()),
            config_version: None,
        };
        let profile = CognitiveProfile {
            child_id: "c-1".to_string(),
            session_id: "s-1".to_string(),
            indices: CognitiveIndices {
                asi: 0.9,
                ici: 0.7,
                wme: 0.6,
                pci: 0.8,
                cfi: 0.75,
            },
            priority_domain: Domain::WorkingMemory,
            created_at: now,
        };
        let report = AssessmentReport {
            session_id: "s-1".to_string(),
            plan: generate_plan(Domain::WorkingMemory),
        };
        (session, profile, report)
    }

    #[test]
    fn test_encode_document() {
        let (session, profile, report) = fixture();
        let encoder = ReportEncoder::with_instance_id("test-instance".to_string());
        let results = vec![TaskResult::new(GameId::MemorySteps, 0.6)];
        let doc = encoder.encode(&session, &results, &profile, &report).unwrap();

        assert_eq!(doc.producer.name, PRODUCER_NAME);
        assert_eq!(doc.producer.version, ENGINE_VERSION);
        assert_eq!(doc.producer.instance_id, "test-instance");
        assert_eq!(doc.session.app_version.as_deref(), Some("2.1.0"));

        let names: Vec<&str> = doc.indices.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ASI", "ICI", "WME", "PCI", "CFI"]);
        assert_eq!(doc.indices[2].value, 0.6);
        assert_eq!(doc.plan.retest_days, 28);
        assert_eq!(doc.disclaimer, DISCLAIMER);
    }

    #[test]
    fn test_encode_to_json() {
        let (session, profile, report) = fixture();
        let encoder = ReportEncoder::new();
        let doc = encoder.encode(&session, &[], &profile, &report).unwrap();
        let json = encoder.encode_to_json(&doc).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["priority_domain"], "Working Memory");
        assert_eq!(parsed["session"]["status"], "COMPLETED");
        assert!(parsed["session"].get("config_version").is_none());
        assert!(parsed.get("disclaimer").is_some());
    }

    #[test]
    fn test_mismatched_session_rejected() {
        let (session, profile, mut report) = fixture();
        report.session_id = "other".to_string();
        assert!(ReportEncoder::new()
            .encode(&session, &[], &profile, &report)
            .is_err());
    }
}
