//! Rule-based intervention plans
//!
//! A fixed lookup from priority domain to three classroom/home strategies and a
//! retest interval. Plans are supportive suggestions, not clinical advice.

use crate::types::{Domain, InterventionPlan};

/// Days until the battery should be repeated
pub const RETEST_DAYS: u32 = 28;

const SUSTAINED_ATTENTION: [&str; 3] = [
    "Break work into short timed blocks (10-15 minutes) with a visible timer",
    "Use a single-task checklist and tick off each step as it is completed",
    "Schedule brief movement breaks between focused activities",
];

const IMPULSE_CONTROL: [&str; 3] = [
    "Practice stop-and-think games such as Simon Says or Red Light, Green Light",
    "Agree on a 'pause signal' before answering questions in class",
    "Praise waiting and turn-taking immediately when it happens",
];

const WORKING_MEMORY: [&str; 3] = [
    "Give instructions in small chunks and ask the child to repeat them back",
    "Use visual aids such as picture schedules and written step lists",
    "Play memory games (card matching, sequence recall) a few minutes daily",
];

const PROCESSING_SPEED: [&str; 3] = [
    "Allow extra time for written tasks and timed tests",
    "Practice quick-recall drills for facts that are already familiar",
    "Reduce copying from the board by providing printed notes",
];

const COGNITIVE_FLEXIBILITY: [&str; 3] = [
    "Give advance warning before transitions between activities",
    "Play sorting games that change the rule (by color, then by shape)",
    "Model and practice 'plan B' thinking when something goes wrong",
];

/// Plan for a priority domain
pub fn generate_plan(domain: Domain) -> InterventionPlan {
    let strategies = match domain {
        Domain::SustainedAttention => SUSTAINED_ATTENTION,
        Domain::ImpulseControl => IMPULSE_CONTROL,
        Domain::WorkingMemory => WORKING_MEMORY,
        Domain::ProcessingSpeed => PROCESSING_SPEED,
        Domain::CognitiveFlexibility => COGNITIVE_FLEXIBILITY,
    };

    InterventionPlan {
        primary_focus: domain.label().to_string(),
        strategies: strategies.iter().map(|s| s.to_string()).collect(),
        retest_days: RETEST_DAYS,
    }
}

/// Plan for a domain label; unrecognized labels fall back to cognitive flexibility
pub fn generate_plan_for_label(label: &str) -> InterventionPlan {
    let domain = Domain::from_label(label).unwrap_or_else(|| {
        tracing::warn!(label, "unrecognized domain label; using flexibility plan");
        Domain::CognitiveFlexibility
    });
    generate_plan(domain)
}
