//! Per-game configuration
//!
//! Required fields carry no serde defaults, so a missing field fails at parse
//! time. Every machine constructor re-validates its record before any trial
//! runs.

use super::{
    GameMachine, GoNoGoMachine, MemoryStepsMachine, SteadySpeedMachine, SwitchSmartMachine,
};
use crate::error::AssessmentError;
use crate::types::{grade_cap, GameId, Rule};
use serde::{Deserialize, Serialize};

/// Current configuration schema version
pub const CONFIG_VERSION: &str = "battery.config.v1";

/// Longest sequence MemorySteps will ever ask for
pub const MAX_SEQUENCE_LENGTH: u32 = 9;

/// Upper bound on trial and sequence counts for any one game
pub const MAX_TRIALS: u32 = 1000;

/// GO/NOGO cycle settings (FocusFlow, StopAndGo)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoNoGoConfig {
    pub trials: u32,
    pub go_count: u32,
    pub no_go_count: u32,
    pub stimulus_ms: f64,
    pub gap_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl GoNoGoConfig {
    pub fn focus_flow_default() -> Self {
        Self {
            trials: 120,
            go_count: 90,
            no_go_count: 30,
            stimulus_ms: 500.0,
            gap_ms: 1000.0,
            seed: None,
        }
    }

    pub fn stop_and_go_default() -> Self {
        Self {
            trials: 100,
            go_count: 70,
            no_go_count: 30,
            stimulus_ms: 500.0,
            gap_ms: 1000.0,
            seed: None,
        }
    }

    pub fn cycle_ms(&self) -> f64 {
        self.stimulus_ms + self.gap_ms
    }

    pub fn validate(&self, game: GameId) -> Result<(), AssessmentError> {
        require_trials(game, "trials", self.trials)?;
        if self.go_count.checked_add(self.no_go_count) != Some(self.trials) {
            return Err(AssessmentError::config(
                game.as_str(),
                format!(
                    "goCount ({}) + noGoCount ({}) must equal trials ({})",
                    self.go_count, self.no_go_count, self.trials
                ),
            ));
        }
        require_ms(game, "stimulusMs", self.stimulus_ms)?;
        require_ms(game, "gapMs", self.gap_ms)
    }
}

/// Sequence-recall settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStepsConfig {
    pub sequences: u32,
    pub start_length: u32,
    /// Sequence length grows by one every this many sequences
    pub grow_every: u32,
    /// Grade-derived ceiling on sequence length
    pub grade_cap: u32,
    pub grid_size: u8,
    pub show_ms: f64,
    pub gap_ms: f64,
    pub inter_sequence_ms: f64,
    pub input_timeout_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl MemoryStepsConfig {
    pub fn for_grade(grade: u8) -> Self {
        Self {
            sequences: 15,
            start_length: 2,
            grow_every: 3,
            grade_cap: grade_cap(grade),
            grid_size: 9,
            show_ms: 600.0,
            gap_ms: 300.0,
            inter_sequence_ms: 1000.0,
            input_timeout_ms: 15_000.0,
            seed: None,
        }
    }

    /// Length of sequence `index` (0-based), capped at `grade_cap`
    pub fn sequence_length(&self, index: u32) -> u32 {
        let grow_every = self.grow_every.max(1);
        (self.start_length + index / grow_every).min(self.grade_cap)
    }

    pub fn validate(&self) -> Result<(), AssessmentError> {
        let game = GameId::MemorySteps;
        require_trials(game, "sequences", self.sequences)?;
        require_count(game, "startLength", self.start_length)?;
        require_count(game, "growEvery", self.grow_every)?;
        if self.grade_cap < self.start_length || self.grade_cap > MAX_SEQUENCE_LENGTH {
            return Err(AssessmentError::config(
                game.as_str(),
                format!(
                    "gradeCap ({}) must be between startLength ({}) and {}",
                    self.grade_cap, self.start_length, MAX_SEQUENCE_LENGTH
                ),
            ));
        }
        if !(2..=16).contains(&self.grid_size) {
            return Err(AssessmentError::config(
                game.as_str(),
                format!("gridSize ({}) must be within 2..=16", self.grid_size),
            ));
        }
        require_ms(game, "showMs", self.show_ms)?;
        require_ms(game, "gapMs", self.gap_ms)?;
        require_ms(game, "interSequenceMs", self.inter_sequence_ms)?;
        require_ms(game, "inputTimeoutMs", self.input_timeout_ms)
    }
}

/// Response-driven reaction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SteadySpeedConfig {
    pub trials: u32,
    pub gap_ms: f64,
    pub max_wait_ms: f64,
}

impl Default for SteadySpeedConfig {
    fn default() -> Self {
        Self {
            trials: 100,
            gap_ms: 800.0,
            max_wait_ms: 1500.0,
        }
    }
}

impl SteadySpeedConfig {
    pub fn validate(&self) -> Result<(), AssessmentError> {
        let game = GameId::SteadySpeed;
        require_trials(game, "trials", self.trials)?;
        require_ms(game, "gapMs", self.gap_ms)?;
        require_ms(game, "maxWaitMs", self.max_wait_ms)
    }
}

/// Rule-switching settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchSmartConfig {
    pub trials: u32,
    pub blocks: u32,
    pub trials_per_block: u32,
    pub stimulus_ms: f64,
    pub gap_ms: f64,
    pub starting_rule: Rule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SwitchSmartConfig {
    fn default() -> Self {
        Self {
            trials: 120,
            blocks: 6,
            trials_per_block: 20,
            stimulus_ms: 1500.0,
            gap_ms: 500.0,
            starting_rule: Rule::Color,
            seed: None,
        }
    }
}

impl SwitchSmartConfig {
    pub fn cycle_ms(&self) -> f64 {
        self.stimulus_ms + self.gap_ms
    }

    /// Rule in force for trial `index`; toggles at each block boundary
    pub fn rule_for(&self, index: u32) -> Rule {
        let block = index / self.trials_per_block.max(1);
        if block % 2 == 0 {
            self.starting_rule
        } else {
            self.starting_rule.toggled()
        }
    }

    /// First trial of every block after the first
    pub fn is_switch(&self, index: u32) -> bool {
        index > 0 && index % self.trials_per_block.max(1) == 0
    }

    pub fn validate(&self) -> Result<(), AssessmentError> {
        let game = GameId::SwitchSmart;
        require_trials(game, "trials", self.trials)?;
        require_count(game, "blocks", self.blocks)?;
        require_count(game, "trialsPerBlock", self.trials_per_block)?;
        if self.blocks.checked_mul(self.trials_per_block) != Some(self.trials) {
            return Err(AssessmentError::config(
                game.as_str(),
                format!(
                    "blocks ({}) x trialsPerBlock ({}) must equal trials ({})",
                    self.blocks, self.trials_per_block, self.trials
                ),
            ));
        }
        require_ms(game, "stimulusMs", self.stimulus_ms)?;
        require_ms(game, "gapMs", self.gap_ms)
    }
}

/// Configuration for the whole five-game battery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryConfig {
    pub config_version: String,
    pub focus_flow: GoNoGoConfig,
    pub stop_and_go: GoNoGoConfig,
    pub memory_steps: MemoryStepsConfig,
    pub steady_speed: SteadySpeedConfig,
    pub switch_smart: SwitchSmartConfig,
}

impl BatteryConfig {
    /// Default battery with the MemorySteps cap for `grade`
    pub fn for_grade(grade: u8) -> Self {
        Self {
            config_version: CONFIG_VERSION.to_string(),
            focus_flow: GoNoGoConfig::focus_flow_default(),
            stop_and_go: GoNoGoConfig::stop_and_go_default(),
            memory_steps: MemoryStepsConfig::for_grade(grade),
            steady_speed: SteadySpeedConfig::default(),
            switch_smart: SwitchSmartConfig::default(),
        }
    }

    /// Derive reproducible per-game seeds from one base seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.focus_flow.seed = Some(seed);
        self.stop_and_go.seed = Some(seed.wrapping_add(1));
        self.memory_steps.seed = Some(seed.wrapping_add(2));
        self.switch_smart.seed = Some(seed.wrapping_add(4));
        self
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, AssessmentError> {
        let config: BatteryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), AssessmentError> {
        self.focus_flow.validate(GameId::FocusFlow)?;
        self.stop_and_go.validate(GameId::StopAndGo)?;
        self.memory_steps.validate()?;
        self.steady_speed.validate()?;
        self.switch_smart.validate()
    }

    /// Construct the machine for `game`; fails fast on invalid configuration
    pub fn build_machine(&self, game: GameId) -> Result<Box<dyn GameMachine>, AssessmentError> {
        let machine: Box<dyn GameMachine> = match game {
            GameId::FocusFlow => Box::new(GoNoGoMachine::focus_flow(self.focus_flow.clone())?),
            GameId::StopAndGo => Box::new(GoNoGoMachine::stop_and_go(self.stop_and_go.clone())?),
            GameId::MemorySteps => Box::new(MemoryStepsMachine::new(self.memory_steps.clone())?),
            GameId::SteadySpeed => Box::new(SteadySpeedMachine::new(self.steady_speed.clone())?),
            GameId::SwitchSmart => Box::new(SwitchSmartMachine::new(self.switch_smart.clone())?),
        };
        Ok(machine)
    }
}

fn require_count(game: GameId, field: &str, value: u32) -> Result<(), AssessmentError> {
    if value == 0 {
        return Err(AssessmentError::config(
            game.as_str(),
            format!("{field} must be positive"),
        ));
    }
    Ok(())
}

fn require_trials(game: GameId, field: &str, value: u32) -> Result<(), AssessmentError> {
    require_count(game, field, value)?;
    if value > MAX_TRIALS {
        return Err(AssessmentError::config(
            game.as_str(),
            format!("{field} ({value}) exceeds {MAX_TRIALS}"),
        ));
    }
    Ok(())
}

fn require_ms(game: GameId, field: &str, value: f64) -> Result<(), AssessmentError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AssessmentError::config(
            game.as_str(),
            format!("{field} must be a positive duration, got {value}"),
        ));
    }
    Ok(())
}
