//! Index calculation
//!
//! Pure functions mapping per-game raw metrics and spectral features to five
//! bounded cognitive indices, plus priority-domain selection.

use crate::types::{CognitiveIndices, Domain, GameId};
use serde::{Deserialize, Serialize};

/// Clamp to [0, 1]; NaN maps to 0
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        tracing::warn!("clamp01: NaN detected, clamping to 0.0");
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Sustained attention: `1 - (miss_rate*0.5 + rL*0.3 + rM*0.2)`
pub fn asi(miss_rate: f64, r_l: f64, r_m: f64) -> f64 {
    clamp01(1.0 - (miss_rate * 0.5 + r_l * 0.3 + r_m * 0.2))
}

/// Impulse control: `1 - (commission_rate*0.6 + rH*0.4)`
pub fn ici(commission_rate: f64, r_h: f64) -> f64 {
    clamp01(1.0 - (commission_rate * 0.6 + r_h * 0.4))
}

/// Working memory efficiency: sequence accuracy
pub fn wme(accuracy: f64) -> f64 {
    clamp01(accuracy)
}

/// Processing consistency: `1 - (cv*0.5 + rH*0.5)`
pub fn pci(cv: f64, r_h: f64) -> f64 {
    clamp01(1.0 - (cv * 0.5 + r_h * 0.5))
}

/// Cognitive flexibility: `1 - switch_cost_ms/400`
pub fn cfi(switch_cost_ms: f64) -> f64 {
    clamp01(1.0 - switch_cost_ms / 400.0)
}

/// Lowest-scoring domain; ties resolve by the order ASI, ICI, WME, PCI, CFI
pub fn priority_domain(indices: &CognitiveIndices) -> Domain {
    let mut pairs = indices.pairs();
    // sort_by is stable, so equal values keep enumeration order
    pairs.sort_by(|a, b| a.1.total_cmp(&b.1));
    pairs[0].0
}

/// Running set of indices accumulated game by game
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSet {
    pub asi: Option<f64>,
    pub ici: Option<f64>,
    pub wme: Option<f64>,
    pub pci: Option<f64>,
    pub cfi: Option<f64>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the index produced by `game`
    pub fn record(&mut self, game: GameId, value: f64) {
        let slot = match game.domain() {
            Domain::SustainedAttention => &mut self.asi,
            Domain::ImpulseControl => &mut self.ici,
            Domain::WorkingMemory => &mut self.wme,
            Domain::ProcessingSpeed => &mut self.pci,
            Domain::CognitiveFlexibility => &mut self.cfi,
        };
        *slot = Some(value);
    }

    pub fn len(&self) -> usize {
        [self.asi, self.ici, self.wme, self.pci, self.cfi]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All five indices, once every game has reported
    pub fn complete(&self) -> Option<CognitiveIndices> {
        Some(CognitiveIndices {
            asi: self.asi?,
            ici: self.ici?,
            wme: self.wme?,
            pci: self.pci?,
            cfi: self.cfi?,
        })
    }
}
