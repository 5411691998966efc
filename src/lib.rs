pub mod assertions;
pub mod engine;
pub mod errors;
pub mod frames;
pub mod locator;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod testing;
pub mod types;

#[cfg(feature = "chrome")]
pub use engine::chrome::{ChromeEngine, ChromeLauncher};
pub use engine::{DocumentId, DocumentInfo, Engine, EngineLauncher, NodeHandle};
pub use errors::{HarnessError, Result};
pub use frames::Readiness;
pub use locator::ElementReference;
pub use runner::ScenarioRunner;
pub use scenario::{
    Scenario, ScenarioResult, ScenarioStatus, Step, StepKind, StepOutcome, StepResult,
};
pub use session::{Session, SessionManager};
pub use types::{HarnessConfig, TimingConfig, Viewport};
