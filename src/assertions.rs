use crate::engine::Engine;
use crate::frames;
use crate::locator::ElementReference;
use crate::scenario::StepOutcome;
use crate::types::TimingConfig;
use std::fmt;
use std::time::Duration;
use tracing::{error, warn};

/// A declarative predicate over live document content.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// The first node whose text contains `text` is visible.
    TextVisible {
        frame: Option<usize>,
        text: String,
    },
    ElementVisible(ElementReference),
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::TextVisible { frame, text } => {
                write!(f, "text \"{}\" visible", text)?;
                if let Some(frame) = frame {
                    write!(f, " in embedded document {}", frame)?;
                }
                Ok(())
            }
            Expectation::ElementVisible(reference) => write!(f, "element {} visible", reference),
        }
    }
}

/// Polls the expectation at the configured cadence until it holds or
/// `timeout` elapses. A required expectation that never holds is a hard
/// failure; an optional one degrades to a logged soft failure and the run
/// continues.
pub async fn verify<E: Engine>(
    engine: &E,
    timing: &TimingConfig,
    expectation: &Expectation,
    timeout: Duration,
    required: bool,
) -> StepOutcome {
    let started = tokio::time::Instant::now();
    loop {
        let holds = probe(engine, expectation).await.unwrap_or(false);
        if holds {
            return StepOutcome::Success;
        }

        if started.elapsed() >= timeout {
            let diagnostic = format!(
                "expected {} within {}ms, condition still unmet",
                expectation,
                timeout.as_millis()
            );
            return if required {
                error!(expectation = %expectation, "required expectation unmet");
                StepOutcome::HardFailure(diagnostic)
            } else {
                warn!(expectation = %expectation, "optional expectation unmet");
                StepOutcome::SoftFailure(diagnostic)
            };
        }

        tokio::time::sleep(Duration::from_millis(timing.poll_interval_ms)).await;
    }
}

/// One probe against live state. The target document and node are resolved
/// fresh on every poll so a navigation between polls cannot leave a stale
/// handle behind; a transient engine error counts as "not yet", not as an
/// abort.
async fn probe<E: Engine>(engine: &E, expectation: &Expectation) -> crate::errors::Result<bool> {
    match expectation {
        Expectation::TextVisible { frame, text } => {
            let document = frames::select(engine, *frame).await?;
            engine.text_visible(&document, text).await
        }
        Expectation::ElementVisible(reference) => {
            let document = frames::select(engine, reference.frame).await?;
            match engine
                .resolve(&document, &reference.path, reference.ordinal)
                .await?
            {
                Some(handle) => engine.node_visible(&handle).await,
                None => Ok(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineLauncher;
    use crate::testing::{Effect, FixtureApp, FixturePage};
    use crate::types::HarnessConfig;

    fn config() -> HarnessConfig {
        HarnessConfig {
            timing: TimingConfig::fast(),
            ..Default::default()
        }
    }

    async fn engine_on(app: FixtureApp, url: &str) -> crate::testing::FixtureEngine {
        let engine = app.launcher().launch(&config()).await.unwrap();
        engine.goto(url, Duration::from_millis(100)).await.unwrap();
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn text_revealed_after_a_delay_is_found_by_polling() {
        let app = FixtureApp::new().page(
            "http://app.local/",
            FixturePage::new("<html><body><button>Go</button></body></html>").on_click(
                "html/body/button",
                Effect::RevealText {
                    text: "Done".to_string(),
                    after_ms: 500,
                },
            ),
        );
        let engine = engine_on(app, "http://app.local/").await;
        let handle = engine
            .resolve(&crate::engine::DocumentId::root(), "html/body/button", 0)
            .await
            .unwrap()
            .unwrap();
        engine
            .click(&handle, Duration::from_millis(100))
            .await
            .unwrap();

        let outcome = verify(
            &engine,
            &TimingConfig::fast(),
            &Expectation::TextVisible {
                frame: None,
                text: "Done".to_string(),
            },
            Duration::from_millis(2000),
            true,
        )
        .await;
        assert_eq!(outcome, StepOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn optional_expectation_times_out_softly() {
        let app = FixtureApp::new().page(
            "http://app.local/",
            FixturePage::new("<html><body>nothing here</body></html>"),
        );
        let engine = engine_on(app, "http://app.local/").await;

        let outcome = verify(
            &engine,
            &TimingConfig::fast(),
            &Expectation::TextVisible {
                frame: None,
                text: "Ghost".to_string(),
            },
            Duration::from_millis(300),
            false,
        )
        .await;

        match outcome {
            StepOutcome::SoftFailure(diagnostic) => {
                assert!(diagnostic.contains("Ghost"));
                assert!(diagnostic.contains("300"));
            }
            other => panic!("expected soft failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn required_expectation_times_out_hard_with_diagnostic() {
        let app = FixtureApp::new().page(
            "http://app.local/",
            FixturePage::new("<html><body>nothing here</body></html>"),
        );
        let engine = engine_on(app, "http://app.local/").await;

        let outcome = verify(
            &engine,
            &TimingConfig::fast(),
            &Expectation::ElementVisible(ElementReference::path("html/body/table")),
            Duration::from_millis(250),
            true,
        )
        .await;

        match outcome {
            StepOutcome::HardFailure(diagnostic) => {
                assert!(diagnostic.contains("html/body/table"));
                assert!(diagnostic.contains("250"));
            }
            other => panic!("expected hard failure, got {:?}", other),
        }
    }
}
