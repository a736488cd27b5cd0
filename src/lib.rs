//! Cogbattery - on-device engine for a five-game cognitive battery
//!
//! Runs five timed mini-games as deterministic state machines, turns their
//! trials into raw metrics, analyses reaction-time series in the frequency
//! domain and folds everything into five cognitive indices and a rule-based
//! intervention plan:
//! game machines → trials → metrics + RT spectrum → indices → priority domain → plan.
//!
//! ## Modules
//!
//! - **Games**: FocusFlow, StopAndGo, MemorySteps, SteadySpeed and SwitchSmart
//!   machines driven by a timer queue on an injectable clock
//! - **Scoring**: raw metrics, spectral features, indices and quality flags
//! - **Session**: ordered orchestration with persistence through an
//!   [`AssessmentStore`]

pub mod clock;
pub mod driver;
pub mod error;
pub mod games;
pub mod indices;
pub mod input;
pub mod metrics;
pub mod prescription;
pub mod progress;
pub mod report;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod signal;
pub mod simulation;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{MonotonicClock, TimeSource, TokioClock, VirtualClock};
pub use driver::{Participant, PlannedResponse, RealtimeDriver, VirtualDriver};
pub use error::{AssessmentError, StoreError};
pub use games::{BatteryConfig, GameMachine, GameOutcome, Prompt};
pub use input::InputRouter;
pub use prescription::generate_plan;
pub use progress::ProgressTracker;
pub use report::ReportEncoder;
pub use scoring::score_game;
pub use session::SessionOrchestrator;
pub use signal::analyze_rt;
pub use simulation::{run_simulated_session, ChildPreset, SimulatedChild};
pub use store::{AssessmentStore, InMemoryStore};

/// Engine version embedded in reports
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for report documents
pub const PRODUCER_NAME: &str = "cogbattery";
