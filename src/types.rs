//! Core types for the assessment engine
//!
//! This module defines the records that flow between the game machines, the
//! signal pipeline, the index calculator and the persistence collaborator:
//! sessions, trials, per-game task results, cognitive profiles and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five mini-games, in battery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameId {
    FocusFlow,
    StopAndGo,
    MemorySteps,
    SteadySpeed,
    SwitchSmart,
}

impl GameId {
    /// Battery order
    pub const ALL: [GameId; 5] = [
        GameId::FocusFlow,
        GameId::StopAndGo,
        GameId::MemorySteps,
        GameId::SteadySpeed,
        GameId::SwitchSmart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameId::FocusFlow => "focus_flow",
            GameId::StopAndGo => "stop_and_go",
            GameId::MemorySteps => "memory_steps",
            GameId::SteadySpeed => "steady_speed",
            GameId::SwitchSmart => "switch_smart",
        }
    }

    /// 1-based position in the battery (G1..G5)
    pub fn number(&self) -> u8 {
        match self {
            GameId::FocusFlow => 1,
            GameId::StopAndGo => 2,
            GameId::MemorySteps => 3,
            GameId::SteadySpeed => 4,
            GameId::SwitchSmart => 5,
        }
    }

    pub fn from_str_id(s: &str) -> Option<Self> {
        GameId::ALL.into_iter().find(|g| g.as_str() == s)
    }

    /// Cognitive domain this game's index feeds
    pub fn domain(&self) -> Domain {
        match self {
            GameId::FocusFlow => Domain::SustainedAttention,
            GameId::StopAndGo => Domain::ImpulseControl,
            GameId::MemorySteps => Domain::WorkingMemory,
            GameId::SteadySpeed => Domain::ProcessingSpeed,
            GameId::SwitchSmart => Domain::CognitiveFlexibility,
        }
    }

    /// Whether the RT stream is reduced through the spectral pipeline
    pub fn requires_spectral(&self) -> bool {
        !matches!(self, GameId::MemorySteps)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cognitive domains, in the fixed enumeration order used for tie-breaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "Sustained Attention")]
    SustainedAttention,
    #[serde(rename = "Impulse Control")]
    ImpulseControl,
    #[serde(rename = "Working Memory")]
    WorkingMemory,
    #[serde(rename = "Processing Speed")]
    ProcessingSpeed,
    #[serde(rename = "Cognitive Flexibility")]
    CognitiveFlexibility,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::SustainedAttention,
        Domain::ImpulseControl,
        Domain::WorkingMemory,
        Domain::ProcessingSpeed,
        Domain::CognitiveFlexibility,
    ];

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Domain::SustainedAttention => "Sustained Attention",
            Domain::ImpulseControl => "Impulse Control",
            Domain::WorkingMemory => "Working Memory",
            Domain::ProcessingSpeed => "Processing Speed",
            Domain::CognitiveFlexibility => "Cognitive Flexibility",
        }
    }

    /// Short index name (ASI, ICI, WME, PCI, CFI)
    pub fn index_name(&self) -> &'static str {
        match self {
            Domain::SustainedAttention => "ASI",
            Domain::ImpulseControl => "ICI",
            Domain::WorkingMemory => "WME",
            Domain::ProcessingSpeed => "PCI",
            Domain::CognitiveFlexibility => "CFI",
        }
    }

    /// Parse a label or index name, case-insensitively
    pub fn from_label(label: &str) -> Option<Self> {
        let needle = label.trim();
        Domain::ALL.into_iter().find(|d| {
            d.label().eq_ignore_ascii_case(needle) || d.index_name().eq_ignore_ascii_case(needle)
        })
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A child taking the battery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub id: String,
    pub grade: u8,
}

impl Child {
    pub fn new(id: impl Into<String>, grade: u8) -> Self {
        Self {
            id: id.into(),
            grade,
        }
    }

    /// MemorySteps sequence-length ceiling for this child's grade band
    pub fn grade_cap(&self) -> u32 {
        grade_cap(self.grade)
    }
}

/// Sequence-length ceiling by grade band: ≤4 → 4, 5–6 → 5, 7–8 → 6, ≥9 → 7
pub fn grade_cap(grade: u8) -> u32 {
    match grade {
        0..=4 => 4,
        5..=6 => 5,
        7..=8 => 6,
        _ => 7,
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Partial,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }
}

/// One sitting of the battery for a child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub id: String,
    pub child_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
}

/// Task-switching rule for SwitchSmart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rule {
    Color,
    Shape,
}

impl Rule {
    pub fn toggled(&self) -> Self {
        match self {
            Rule::Color => Rule::Shape,
            Rule::Shape => Rule::Color,
        }
    }

    /// Correct side for a card under this rule
    ///
    /// COLOR: BLUE→LEFT, RED→RIGHT. SHAPE: CIRCLE→LEFT, SQUARE→RIGHT.
    pub fn expected_side(&self, color: Color, shape: Shape) -> Side {
        match self {
            Rule::Color => match color {
                Color::Blue => Side::Left,
                Color::Red => Side::Right,
            },
            Rule::Shape => match shape {
                Shape::Circle => Side::Left,
                Shape::Square => Side::Right,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Color {
    Blue,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Shape {
    Circle,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Left,
    Right,
}

/// A captured response from the active input handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// Single-button press (GO/NOGO and reaction games)
    Press,
    /// Left/right choice (SwitchSmart)
    Side(Side),
    /// Tile tap (MemorySteps)
    Tile(u8),
}

impl Response {
    /// Compact code stored on the trial row
    pub fn code(&self) -> String {
        match self {
            Response::Press => "press".to_string(),
            Response::Side(Side::Left) => "left".to_string(),
            Response::Side(Side::Right) => "right".to_string(),
            Response::Tile(t) => format!("tile:{t}"),
        }
    }
}

/// Stimulus class of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimulusType {
    Go,
    #[serde(rename = "nogo")]
    NoGo,
    Sequence,
    Cue,
    Card,
}

/// Free-form per-trial tags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_switch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Shape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taps: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
    /// Presses that landed in the gap before this trial's stimulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_starts: Option<u32>,
}

/// One trial as captured by a game machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub game_id: GameId,
    pub trial_index: u32,
    /// Monotonic stimulus onset (ms)
    pub trial_start_ms: f64,
    pub stimulus_type: StimulusType,
    /// None = no response / timeout
    pub rt_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    #[serde(default)]
    pub flags: TrialFlags,
}

/// Spectral features of a cleaned RT series
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    /// Power fraction in (0.01, 0.05] Hz
    #[serde(rename = "rL")]
    pub r_l: f64,
    /// Power fraction in (0.05, 0.10] Hz
    #[serde(rename = "rM")]
    pub r_m: f64,
    /// Power fraction in (0.10, 0.25] Hz
    #[serde(rename = "rH")]
    pub r_h: f64,
    /// Frequency of the strongest bin (Hz)
    pub fpeak: f64,
    /// First element of the detrended power spectrum
    pub slope: f64,
}

impl SpectralFeatures {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Raw per-game metrics emitted at DONE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum RawMetrics {
    FocusFlow {
        miss_rate: f64,
        commission_rate: f64,
        mean_rt_ms: f64,
        go_count: u32,
        nogo_count: u32,
    },
    StopAndGo {
        commission_rate: f64,
        nogo_count: u32,
    },
    MemorySteps {
        accuracy: f64,
        correct_sequences: u32,
        sequences: u32,
        longest_correct_span: u32,
    },
    SteadySpeed {
        mean_rt_ms: f64,
        cv: f64,
        valid_count: u32,
        false_starts: u32,
    },
    SwitchSmart {
        accuracy: f64,
        switch_cost_ms: f64,
        correct_trials: u32,
    },
}

impl RawMetrics {
    pub fn game_id(&self) -> GameId {
        match self {
            RawMetrics::FocusFlow { .. } => GameId::FocusFlow,
            RawMetrics::StopAndGo { .. } => GameId::StopAndGo,
            RawMetrics::MemorySteps { .. } => GameId::MemorySteps,
            RawMetrics::SteadySpeed { .. } => GameId::SteadySpeed,
            RawMetrics::SwitchSmart { .. } => GameId::SwitchSmart,
        }
    }
}

/// Quality markers attached to a task result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Fewer than half of response-expected trials carry an RT
    FewValidResponses,
    /// More than 10% of RTs are anticipatory (< 150 ms)
    ManyAnticipations,
    /// Repeated presses before the stimulus appeared
    FalseStarts,
}

/// Per-game result upserted at game completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub game_id: GameId,
    #[serde(rename = "rL", default, skip_serializing_if = "Option::is_none")]
    pub r_l: Option<f64>,
    #[serde(rename = "rM", default, skip_serializing_if = "Option::is_none")]
    pub r_m: Option<f64>,
    #[serde(rename = "rH", default, skip_serializing_if = "Option::is_none")]
    pub r_h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fpeak: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miss_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_cost_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_rt_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv: Option<f64>,
    /// Domain this game's index feeds
    pub domain: Domain,
    /// Bounded index value in [0, 1]
    pub index: f64,
    #[serde(default)]
    pub quality_flags: Vec<QualityFlag>,
}

impl TaskResult {
    pub fn new(game_id: GameId, index: f64) -> Self {
        Self {
            game_id,
            r_l: None,
            r_m: None,
            r_h: None,
            fpeak: None,
            slope: None,
            miss_rate: None,
            commission_rate: None,
            accuracy: None,
            switch_cost_ms: None,
            mean_rt_ms: None,
            cv: None,
            domain: game_id.domain(),
            index,
            quality_flags: Vec::new(),
        }
    }

    pub fn with_spectral(mut self, features: &SpectralFeatures) -> Self {
        self.r_l = Some(features.r_l);
        self.r_m = Some(features.r_m);
        self.r_h = Some(features.r_h);
        self.fpeak = Some(features.fpeak);
        self.slope = Some(features.slope);
        self
    }
}

/// The five bounded cognitive indices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CognitiveIndices {
    pub asi: f64,
    pub ici: f64,
    pub wme: f64,
    pub pci: f64,
    pub cfi: f64,
}

impl CognitiveIndices {
    pub fn get(&self, domain: Domain) -> f64 {
        match domain {
            Domain::SustainedAttention => self.asi,
            Domain::ImpulseControl => self.ici,
            Domain::WorkingMemory => self.wme,
            Domain::ProcessingSpeed => self.pci,
            Domain::CognitiveFlexibility => self.cfi,
        }
    }

    /// `(domain, value)` pairs in the fixed order ASI, ICI, WME, PCI, CFI
    pub fn pairs(&self) -> [(Domain, f64); 5] {
        Domain::ALL.map(|d| (d, self.get(d)))
    }
}

/// Append-only snapshot written once per finalized session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveProfile {
    pub child_id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub indices: CognitiveIndices,
    pub priority_domain: Domain,
    pub created_at: DateTime<Utc>,
}

/// Rule-based, non-diagnostic intervention plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionPlan {
    pub primary_focus: String,
    pub strategies: Vec<String>,
    pub retest_days: u32,
}

/// Report upserted at finalize (one per session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentReport {
    pub session_id: String,
    pub plan: InterventionPlan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_order_and_ids() {
        let numbers: Vec<u8> = GameId::ALL.iter().map(|g| g.number()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(GameId::from_str_id("memory_steps"), Some(GameId::MemorySteps));
        assert_eq!(GameId::from_str_id("unknown"), None);
        assert!(!GameId::MemorySteps.requires_spectral());
        assert!(GameId::SwitchSmart.requires_spectral());
    }

    #[test]
    fn test_grade_cap_bands() {
        assert_eq!(grade_cap(1), 4);
        assert_eq!(grade_cap(4), 4);
        assert_eq!(grade_cap(5), 5);
        assert_eq!(grade_cap(6), 5);
        assert_eq!(grade_cap(8), 6);
        assert_eq!(grade_cap(9), 7);
        assert_eq!(Child::new("c1", 12).grade_cap(), 7);
    }

    #[test]
    fn test_rule_mapping() {
        assert_eq!(Rule::Color.expected_side(Color::Blue, Shape::Square), Side::Left);
        assert_eq!(Rule::Shape.expected_side(Color::Blue, Shape::Square), Side::Right);
        assert_eq!(Rule::Shape.expected_side(Color::Red, Shape::Circle), Side::Left);
        assert_eq!(Rule::Color.toggled(), Rule::Shape);
    }

    #[test]
    fn test_domain_labels() {
        assert_eq!(Domain::from_label("working memory"), Some(Domain::WorkingMemory));
        assert_eq!(Domain::from_label("CFI"), Some(Domain::CognitiveFlexibility));
        assert_eq!(Domain::from_label("Reading"), None);

        let json = serde_json::to_string(&Domain::ImpulseControl).unwrap();
        assert_eq!(json, "\"Impulse Control\"");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert!(SessionStatus::Partial.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_trial_deserialization_with_flags() {
        let json = r#"{
            "game_id": "switch_smart",
            "trial_index": 20,
            "trial_start_ms": 40000.0,
            "stimulus_type": "card",
            "rt_ms": 612.5,
            "response_code": "left",
            "correct": true,
            "flags": {"rule": "SHAPE", "is_switch": true, "color": "RED", "shape": "CIRCLE"}
        }"#;

        let trial: Trial = serde_json::from_str(json).unwrap();
        assert_eq!(trial.game_id, GameId::SwitchSmart);
        assert_eq!(trial.flags.rule, Some(Rule::Shape));
        assert_eq!(trial.flags.is_switch, Some(true));
        assert!(trial.flags.target.is_none());
    }

    #[test]
    fn test_spectral_feature_field_names() {
        let features = SpectralFeatures {
            r_l: 0.1,
            ..SpectralFeatures::zero()
        };
        let value = serde_json::to_value(features).unwrap();
        assert_eq!(value["rL"], 0.1);
        assert_eq!(value["rH"], 0.0);
    }

    #[test]
    fn test_response_codes() {
        assert_eq!(Response::Press.code(), "press");
        assert_eq!(Response::Side(Side::Right).code(), "right");
        assert_eq!(Response::Tile(3).code(), "tile:3");
    }
}
