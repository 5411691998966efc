use crate::errors::{HarnessError, Result};
use crate::locator::{parse_structural_path, ElementReference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Navigate,
    Fill,
    Click,
    Wait,
    Assert,
}

fn default_required() -> bool {
    true
}

/// One atomic unit of work. Immutable once defined; consumed strictly in
/// sequence. For `Wait` steps the timeout is the pause itself; for `Assert`
/// steps `value` is the expected text (element visibility is asserted when
/// only `target` is given).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ElementReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub timeout_ms: u64,
    #[serde(default = "default_required")]
    pub required: bool,
}

/// An ordered sequence of steps ending in the scenario's core claim: one or
/// more required assertions. Scenarios are configuration, not code; they
/// deserialize from JSON files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn named(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Rejects malformed definitions before any session is acquired. This is
    /// the only fault that escapes the runner as an error: everything later
    /// becomes a `ScenarioResult`.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::InvalidScenario(
                "scenario has no name".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(HarnessError::InvalidScenario(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }

        for (index, step) in self.steps.iter().enumerate() {
            let fail = |message: String| {
                Err(HarnessError::InvalidScenario(format!(
                    "step {}: {}",
                    index, message
                )))
            };

            match step.kind {
                StepKind::Navigate => match step.value.as_deref() {
                    None => return fail("navigate step has no URL".to_string()),
                    Some(raw) => {
                        if Url::parse(raw).is_err() {
                            return fail(format!("navigate target '{}' is not an absolute URL", raw));
                        }
                    }
                },
                StepKind::Fill => {
                    if step.target.is_none() {
                        return fail("fill step has no target".to_string());
                    }
                    if step.value.is_none() {
                        return fail("fill step has no input value".to_string());
                    }
                }
                StepKind::Click => {
                    if step.target.is_none() {
                        return fail("click step has no target".to_string());
                    }
                }
                StepKind::Wait => {}
                StepKind::Assert => {
                    if step.value.is_none() && step.target.is_none() {
                        return fail("assert step has nothing to expect".to_string());
                    }
                }
            }

            if let Some(target) = &step.target {
                if let Err(e) = parse_structural_path(&target.path) {
                    return fail(e.to_string());
                }
            }

            if step.kind != StepKind::Wait && step.timeout_ms == 0 {
                return fail("zero timeout".to_string());
            }
        }

        // The terminal step carries the scenario's core claim.
        match self.steps.last() {
            Some(last) if last.kind == StepKind::Assert && last.required => Ok(()),
            _ => Err(HarnessError::InvalidScenario(format!(
                "scenario '{}' must end with a required assert step",
                self.name
            ))),
        }
    }

    /// Resolves relative navigation targets against a base URL, producing a
    /// new scenario. Runs before validation/execution; scenarios are never
    /// mutated mid-run.
    pub fn with_base_url(&self, base: &Url) -> Result<Scenario> {
        let mut resolved = self.clone();
        for step in &mut resolved.steps {
            if step.kind == StepKind::Navigate {
                if let Some(raw) = &step.value {
                    let joined = base.join(raw).map_err(|e| {
                        HarnessError::InvalidScenario(format!(
                            "cannot resolve navigate target '{}' against {}: {}",
                            raw, base, e
                        ))
                    })?;
                    step.value = Some(joined.to_string());
                }
            }
        }
        Ok(resolved)
    }
}

pub struct ScenarioBuilder {
    name: String,
    steps: Vec<Step>,
}

impl ScenarioBuilder {
    fn push(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn navigate(self, url: impl Into<String>, timeout_ms: u64) -> Self {
        self.push(Step {
            kind: StepKind::Navigate,
            target: None,
            value: Some(url.into()),
            timeout_ms,
            required: true,
        })
    }

    pub fn fill(
        self,
        target: ElementReference,
        value: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        self.push(Step {
            kind: StepKind::Fill,
            target: Some(target),
            value: Some(value.into()),
            timeout_ms,
            required: true,
        })
    }

    pub fn click(self, target: ElementReference, timeout_ms: u64) -> Self {
        self.push(Step {
            kind: StepKind::Click,
            target: Some(target),
            value: None,
            timeout_ms,
            required: true,
        })
    }

    pub fn wait(self, pause_ms: u64) -> Self {
        self.push(Step {
            kind: StepKind::Wait,
            target: None,
            value: None,
            timeout_ms: pause_ms,
            required: false,
        })
    }

    pub fn assert_text(self, text: impl Into<String>, timeout_ms: u64) -> Self {
        self.push(Step {
            kind: StepKind::Assert,
            target: None,
            value: Some(text.into()),
            timeout_ms,
            required: true,
        })
    }

    pub fn assert_text_in_frame(
        self,
        frame: usize,
        text: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        self.push(Step {
            kind: StepKind::Assert,
            target: Some(ElementReference::path("html").in_frame(frame)),
            value: Some(text.into()),
            timeout_ms,
            required: true,
        })
    }

    pub fn assert_visible(self, target: ElementReference, timeout_ms: u64) -> Self {
        self.push(Step {
            kind: StepKind::Assert,
            target: Some(target),
            value: None,
            timeout_ms,
            required: true,
        })
    }

    /// Downgrades the most recently added step to best-effort: its failure
    /// is logged and absorbed instead of failing the scenario.
    pub fn optional(mut self) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.required = false;
        }
        self
    }

    pub fn step(self, step: Step) -> Self {
        self.push(step)
    }

    pub fn build(self) -> Scenario {
        Scenario {
            name: self.name,
            steps: self.steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "diagnostic", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    /// Absorbed where detected; never escapes as a scenario-level failure.
    SoftFailure(String),
    /// Terminal for the scenario when the step is required.
    HardFailure(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }

    pub fn is_hard_failure(&self) -> bool {
        matches!(self, StepOutcome::HardFailure(_))
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            StepOutcome::Success => None,
            StepOutcome::SoftFailure(d) | StepOutcome::HardFailure(d) => Some(d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub outcome: StepOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub status: ScenarioStatus,
    pub first_failed_step: Option<usize>,
    pub steps: Vec<StepResult>,
    pub diagnostics: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_screenshot_base64: Option<String>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}
