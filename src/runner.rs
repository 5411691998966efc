use crate::assertions::{self, Expectation};
use crate::engine::{Engine, EngineLauncher};
use crate::errors::{HarnessError, Result};
use crate::frames;
use crate::locator::Interactor;
use crate::scenario::{
    Scenario, ScenarioResult, ScenarioStatus, Step, StepKind, StepOutcome, StepResult,
};
use crate::session::SessionManager;
use crate::types::{HarnessConfig, TimingConfig};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Drives one scenario at a time through a disposable session: acquire,
/// execute steps strictly in sequence, aggregate outcomes, release. The
/// session is released on every exit path; a required step failure skips
/// the remaining steps but never skips teardown.
pub struct ScenarioRunner<L: EngineLauncher> {
    sessions: SessionManager<L>,
    timing: TimingConfig,
}

impl<L: EngineLauncher> ScenarioRunner<L> {
    pub fn new(launcher: L, config: HarnessConfig) -> Self {
        let timing = config.timing.clone();
        Self {
            sessions: SessionManager::new(launcher, config),
            timing,
        }
    }

    /// Runs the scenario to a verdict. The only error this returns is a
    /// malformed scenario definition, raised before any session exists;
    /// every runtime failure is folded into the `ScenarioResult`.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioResult> {
        scenario.validate()?;

        let started_at = Utc::now();
        info!(scenario = %scenario.name, steps = scenario.steps.len(), "scenario starting");

        let session = match self.sessions.acquire().await {
            Ok(session) => session,
            Err(e) => {
                error!(scenario = %scenario.name, error = %e, "session acquisition failed");
                return Ok(ScenarioResult {
                    name: scenario.name.clone(),
                    status: ScenarioStatus::Failed,
                    first_failed_step: None,
                    steps: Vec::new(),
                    diagnostics: vec![format!("session acquisition failed: {}", e)],
                    started_at,
                    finished_at: Utc::now(),
                    failure_screenshot_base64: None,
                });
            }
        };

        let mut steps = Vec::new();
        let mut diagnostics = Vec::new();
        let mut first_failed_step = None;
        let mut failure_screenshot_base64 = None;

        for (index, step) in scenario.steps.iter().enumerate() {
            let step_started = tokio::time::Instant::now();
            let outcome = self.execute_step(session.engine(), step).await;
            let duration_ms = step_started.elapsed().as_millis() as u64;

            if let Some(diagnostic) = outcome.diagnostic() {
                diagnostics.push(format!("step {} ({:?}): {}", index, step.kind, diagnostic));
            }

            let abort = outcome.is_hard_failure() && step.required;
            steps.push(StepResult {
                index,
                outcome,
                duration_ms,
            });

            if abort {
                first_failed_step = Some(index);
                error!(scenario = %scenario.name, step = index, "required step failed, skipping the rest");
                failure_screenshot_base64 = self.capture_failure_screenshot(session.engine()).await;
                break;
            }
        }

        self.sessions.release(session).await;

        let status = if first_failed_step.is_none() {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        };
        info!(scenario = %scenario.name, status = ?status, "scenario finished");

        Ok(ScenarioResult {
            name: scenario.name.clone(),
            status,
            first_failed_step,
            steps,
            diagnostics,
            started_at,
            finished_at: Utc::now(),
            failure_screenshot_base64,
        })
    }

    async fn execute_step(&self, engine: &L::Engine, step: &Step) -> StepOutcome {
        let timeout = Duration::from_millis(step.timeout_ms);
        match step.kind {
            StepKind::Navigate => self.run_navigate(engine, step, timeout).await,
            StepKind::Fill | StepKind::Click => self.run_interaction(engine, step, timeout).await,
            StepKind::Wait => {
                tokio::time::sleep(timeout).await;
                StepOutcome::Success
            }
            StepKind::Assert => self.run_assert(engine, step, timeout).await,
        }
    }

    async fn run_navigate(
        &self,
        engine: &L::Engine,
        step: &Step,
        timeout: Duration,
    ) -> StepOutcome {
        let Some(url) = step.value.as_deref() else {
            return StepOutcome::HardFailure("navigate step has no URL".to_string());
        };

        if let Err(e) = engine.goto(url, timeout).await {
            return outcome_for_error(e, step.required);
        }

        self.settle_documents(engine).await;
        StepOutcome::Success
    }

    /// Post-navigation settling: enumerate the fresh document set and give
    /// each document a bounded chance to reach its load milestone.
    /// Documents that never get there are logged and tolerated.
    async fn settle_documents(&self, engine: &L::Engine) {
        let ready_timeout = Duration::from_millis(self.timing.ready_timeout_ms);
        match frames::documents(engine).await {
            Ok(docs) => {
                for doc in docs {
                    frames::await_ready(engine, &doc.id, ready_timeout).await;
                }
            }
            Err(e) => warn!(error = %e, "document enumeration failed after navigation"),
        }
    }

    async fn run_interaction(
        &self,
        engine: &L::Engine,
        step: &Step,
        timeout: Duration,
    ) -> StepOutcome {
        let Some(reference) = step.target.as_ref() else {
            return StepOutcome::HardFailure("interaction step has no target".to_string());
        };

        let document = match frames::select(engine, reference.frame).await {
            Ok(document) => document,
            Err(e) => return outcome_for_error(e, step.required),
        };

        let interactor = Interactor::new(engine, &self.timing);
        let handle = match interactor.resolve(&document, reference).await {
            Ok(handle) => handle,
            Err(e) => return outcome_for_error(e, step.required),
        };

        let acted = match step.kind {
            StepKind::Fill => match step.value.as_deref() {
                Some(value) => interactor.fill(&handle, value, timeout).await,
                None => {
                    return StepOutcome::HardFailure("fill step has no input value".to_string())
                }
            },
            _ => interactor.click(&handle, timeout).await,
        };

        match acted {
            Ok(()) => StepOutcome::Success,
            Err(e) => outcome_for_error(e, step.required),
        }
    }

    async fn run_assert(&self, engine: &L::Engine, step: &Step, timeout: Duration) -> StepOutcome {
        let expectation = match (&step.value, &step.target) {
            (Some(text), target) => Expectation::TextVisible {
                frame: target.as_ref().and_then(|t| t.frame),
                text: text.clone(),
            },
            (None, Some(reference)) => Expectation::ElementVisible(reference.clone()),
            (None, None) => {
                return StepOutcome::HardFailure("assert step has nothing to expect".to_string())
            }
        };

        assertions::verify(engine, &self.timing, &expectation, timeout, step.required).await
    }

    async fn capture_failure_screenshot(&self, engine: &L::Engine) -> Option<String> {
        match engine.screenshot().await {
            Ok(bytes) => Some(base64::encode(bytes)),
            Err(e) => {
                debug!(error = %e, "failure screenshot unavailable");
                None
            }
        }
    }
}

/// Maps the error taxonomy onto step outcomes: locator misses and exceeded
/// bounds degrade to soft failures on optional steps, while engine-level
/// action faults are hard failures regardless (scenario-terminal only when
/// the step is required).
fn outcome_for_error(error: HarnessError, required: bool) -> StepOutcome {
    match (&error, required) {
        (HarnessError::Timeout(_) | HarnessError::NotFound(_), false) => {
            StepOutcome::SoftFailure(error.to_string())
        }
        _ => StepOutcome::HardFailure(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::ElementReference;
    use crate::testing::{Effect, Fault, FixtureApp, FixturePage};

    fn fast_config() -> HarnessConfig {
        HarnessConfig {
            timing: TimingConfig::fast(),
            ..Default::default()
        }
    }

    fn login_page(reveal_dashboard: bool) -> FixturePage {
        let page = FixturePage::new(
            r#"<html><body><div><section><form>
                <div><input name="email"></div>
                <div><input name="password"></div>
                <button>Sign in</button>
            </form></section></div></body></html>"#,
        );
        if reveal_dashboard {
            page.on_click(
                "html/body/div/section/form/button",
                Effect::RevealText {
                    text: "Dashboard".to_string(),
                    after_ms: 500,
                },
            )
        } else {
            page
        }
    }

    fn login_scenario() -> Scenario {
        Scenario::named("admin login")
            .navigate("http://app.local/login", 10_000)
            .fill(
                ElementReference::path("html/body/div/section/form/div/input"),
                "a@b.com",
                5_000,
            )
            .fill(
                ElementReference::path("html/body/div/section/form/div[2]/input"),
                "secret",
                5_000,
            )
            .click(
                ElementReference::path("html/body/div/section/form/button"),
                5_000,
            )
            .assert_text("Dashboard", 30_000)
            .build()
    }

    fn login_app(reveal_dashboard: bool) -> FixtureApp {
        FixtureApp::new().page("http://app.local/login", login_page(reveal_dashboard))
    }

    #[tokio::test(start_paused = true)]
    async fn login_flow_passes_when_dashboard_renders_after_submit() {
        let launcher = login_app(true).launcher();
        let probe = launcher.probe();
        let runner = ScenarioRunner::new(launcher, fast_config());

        let result = runner.run(&login_scenario()).await.unwrap();

        assert!(result.passed());
        assert!(result.first_failed_step.is_none());
        assert_eq!(result.steps.len(), 5);
        assert!(result.steps.iter().all(|s| s.outcome.is_success()));

        let fills = probe.fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].matched.as_deref(), Some("email"));
        assert_eq!(fills[0].value, "a@b.com");
        assert_eq!(fills[1].matched.as_deref(), Some("password"));

        assert_eq!(probe.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn login_flow_fails_at_the_assert_when_dashboard_never_renders() {
        let launcher = login_app(false).launcher();
        let probe = launcher.probe();
        let runner = ScenarioRunner::new(launcher, fast_config());

        let result = runner.run(&login_scenario()).await.unwrap();

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.first_failed_step, Some(4));

        let failed = &result.steps[4];
        let diagnostic = failed.outcome.diagnostic().unwrap();
        assert!(diagnostic.contains("Dashboard"));
        assert!(diagnostic.contains("30000"));

        assert_eq!(probe.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_released_exactly_once_under_faults_at_every_step_kind() {
        let faults = [
            (Fault::Navigate, Some(0)),
            (Fault::Fill, Some(1)),
            (Fault::Click, Some(3)),
            (Fault::ClickNeverActionable, Some(3)),
        ];

        for (fault, failing_step) in faults {
            let launcher = login_app(true).launcher().fail_on(fault);
            let probe = launcher.probe();
            let runner = ScenarioRunner::new(launcher, fast_config());

            let result = runner.run(&login_scenario()).await.unwrap();

            assert_eq!(result.status, ScenarioStatus::Failed, "fault {:?}", fault);
            assert_eq!(result.first_failed_step, failing_step, "fault {:?}", fault);
            assert_eq!(probe.releases(), 1, "fault {:?}", fault);
        }

        // Wait steps cannot fault, and a failing terminal assert is the
        // previous test; a clean run still releases exactly once.
        let launcher = login_app(true).launcher();
        let probe = launcher.probe();
        let runner = ScenarioRunner::new(launcher, fast_config());
        runner.run(&login_scenario()).await.unwrap();
        assert_eq!(probe.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_fault_is_swallowed_and_does_not_change_the_verdict() {
        let launcher = login_app(true).launcher().fail_on(Fault::Teardown);
        let probe = launcher.probe();
        let runner = ScenarioRunner::new(launcher, fast_config());

        let result = runner.run(&login_scenario()).await.unwrap();

        assert_eq!(result.status, ScenarioStatus::Passed);
        assert_eq!(probe.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_yields_a_failed_result_without_a_session() {
        let launcher = login_app(true).launcher().fail_on(Fault::Launch);
        let probe = launcher.probe();
        let runner = ScenarioRunner::new(launcher, fast_config());

        let result = runner.run(&login_scenario()).await.unwrap();

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert!(result.steps.is_empty());
        assert!(result.diagnostics[0].contains("launch"));
        assert_eq!(probe.launches(), 0);
        assert_eq!(probe.releases(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_scenario_is_rejected_before_any_launch() {
        let launcher = login_app(true).launcher();
        let probe = launcher.probe();
        let runner = ScenarioRunner::new(launcher, fast_config());

        let scenario = Scenario::named("no terminal assert")
            .navigate("http://app.local/login", 10_000)
            .build();
        let result = runner.run(&scenario).await;

        assert!(matches!(result, Err(HarnessError::InvalidScenario(_))));
        assert_eq!(probe.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unactionable_click_times_out_within_its_bound() {
        let launcher = login_app(true).launcher().fail_on(Fault::ClickNeverActionable);
        let runner = ScenarioRunner::new(launcher, fast_config());

        let scenario = Scenario::named("stuck click")
            .navigate("http://app.local/login", 10_000)
            .click(
                ElementReference::path("html/body/div/section/form/button"),
                2_000,
            )
            .assert_text("Dashboard", 1_000)
            .build();

        let started = tokio::time::Instant::now();
        let result = runner.run(&scenario).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.first_failed_step, Some(1));
        assert!(matches!(
            result.steps[1].outcome,
            StepOutcome::HardFailure(_)
        ));
        // Bounded wait: the whole run is the click bound plus polling slack,
        // never an unbounded hang.
        assert!(elapsed >= Duration::from_millis(2_000));
        assert!(elapsed < Duration::from_millis(2_200));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_embedded_document_never_fails_the_scenario() {
        let page = login_page(true).unreachable_frame().slow_frame(
            "<html><body>widget</body></html>",
            60_000,
        );
        let launcher = FixtureApp::new()
            .page("http://app.local/login", page)
            .launcher();
        let probe = launcher.probe();
        let runner = ScenarioRunner::new(launcher, fast_config());

        let result = runner.run(&login_scenario()).await.unwrap();

        assert_eq!(result.status, ScenarioStatus::Passed);
        assert_eq!(probe.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn optional_assert_timeout_is_absorbed_as_soft_failure() {
        let launcher = login_app(true).launcher();
        let runner = ScenarioRunner::new(launcher, fast_config());

        let scenario = Scenario::named("optional banner check")
            .navigate("http://app.local/login", 10_000)
            .assert_text("Promotional banner", 300)
            .optional()
            .click(
                ElementReference::path("html/body/div/section/form/button"),
                5_000,
            )
            .wait(50)
            .assert_text("Dashboard", 30_000)
            .build();

        let result = runner.run(&scenario).await.unwrap();

        assert_eq!(result.status, ScenarioStatus::Passed);
        assert!(matches!(
            result.steps[1].outcome,
            StepOutcome::SoftFailure(_)
        ));
        assert_eq!(result.steps.len(), 5);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.contains("Promotional banner")));
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_mid_scenario_uses_the_fresh_document_set() {
        let first = FixturePage::new("<html><body><a>next</a></body></html>")
            .frame("<html><body>alpha</body></html>")
            .on_click(
                "html/body/a",
                Effect::NavigateTo("http://app.local/second".to_string()),
            );
        let second = FixturePage::new("<html><body>landed</body></html>")
            .frame("<html><body>beta</body></html>");

        let launcher = FixtureApp::new()
            .page("http://app.local/first", first)
            .page("http://app.local/second", second)
            .launcher();
        let probe = launcher.probe();
        let runner = ScenarioRunner::new(launcher, fast_config());

        let scenario = Scenario::named("cross-navigation frame check")
            .navigate("http://app.local/first", 10_000)
            .click(ElementReference::path("html/body/a"), 5_000)
            .assert_text_in_frame(0, "beta", 2_000)
            .build();

        let result = runner.run(&scenario).await.unwrap();

        assert_eq!(result.status, ScenarioStatus::Passed);
        // The embedded document is re-enumerated for the assert; the old
        // enumeration (whose frame held "alpha") is never reused.
        assert!(probe.document_queries() >= 2);
    }
}
