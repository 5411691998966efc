use crate::engine::{DocumentId, Engine, NodeHandle};
use crate::errors::{HarnessError, Result};
use crate::types::TimingConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Declarative address of one element: a structural path, an optional
/// ordinal picking the Nth match (first by default), and the document the
/// path is scoped to. References are resolved fresh at each step and never
/// survive a navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementReference {
    pub path: String,
    #[serde(default)]
    pub ordinal: usize,
    /// Index into the embedded-document list; `None` targets the root page.
    #[serde(default)]
    pub frame: Option<usize>,
}

impl ElementReference {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ordinal: 0,
            frame: None,
        }
    }

    pub fn nth(mut self, ordinal: usize) -> Self {
        self.ordinal = ordinal;
        self
    }

    pub fn in_frame(mut self, frame: usize) -> Self {
        self.frame = Some(frame);
        self
    }
}

impl fmt::Display for ElementReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.path)?;
        if self.ordinal > 0 {
            write!(f, " (match {})", self.ordinal)?;
        }
        if let Some(frame) = self.frame {
            write!(f, " in embedded document {}", frame)?;
        }
        Ok(())
    }
}

/// One `tag` or `tag[n]` component of a structural path; indices are
/// 1-based, matching the addressing convention of recorded flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub tag: String,
    pub index: Option<usize>,
}

static SEGMENT: OnceLock<Regex> = OnceLock::new();

fn segment_pattern() -> &'static Regex {
    SEGMENT.get_or_init(|| {
        Regex::new(r"^([a-zA-Z][a-zA-Z0-9-]*)(?:\[([1-9][0-9]*)\])?$").expect("segment pattern")
    })
}

/// Parses `html/body/div[2]/input` into segments. A leading or trailing
/// slash is tolerated; anything else malformed is rejected up front so a
/// bad path is a configuration error, not a silent zero-match.
pub fn parse_structural_path(path: &str) -> Result<Vec<PathSegment>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(HarnessError::InvalidScenario(
            "empty structural path".to_string(),
        ));
    }

    trimmed
        .split('/')
        .map(|segment| {
            let caps = segment_pattern().captures(segment).ok_or_else(|| {
                HarnessError::InvalidScenario(format!(
                    "bad structural path segment '{}' in '{}'",
                    segment, path
                ))
            })?;
            let tag = caps[1].to_ascii_lowercase();
            let index = caps
                .get(2)
                .map(|m| m.as_str().parse::<usize>())
                .transpose()
                .map_err(|_| {
                    HarnessError::InvalidScenario(format!(
                        "path index out of range in '{}'",
                        path
                    ))
                })?;
            Ok(PathSegment { tag, index })
        })
        .collect()
}

/// Resolves references and performs bounded, timed interactions against the
/// resolved node. No internal retry beyond the engine's own actionability
/// wait; flakiness surfaces to the orchestrator as a typed outcome.
pub struct Interactor<'a, E: Engine> {
    engine: &'a E,
    timing: &'a TimingConfig,
}

impl<'a, E: Engine> Interactor<'a, E> {
    pub fn new(engine: &'a E, timing: &'a TimingConfig) -> Self {
        Self { engine, timing }
    }

    /// Settle, then resolve. The settle delay runs before every resolution;
    /// the application under test updates its DOM asynchronously after
    /// route changes.
    pub async fn resolve(
        &self,
        document: &DocumentId,
        reference: &ElementReference,
    ) -> Result<NodeHandle> {
        if self.timing.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.timing.settle_delay_ms)).await;
        }

        debug!(reference = %reference, document = %document, "resolving");
        let resolved = self
            .engine
            .resolve(document, &reference.path, reference.ordinal)
            .await?;

        resolved.ok_or_else(|| HarnessError::NotFound(format!("{} in {}", reference, document)))
    }

    pub async fn fill(&self, handle: &NodeHandle, text: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.engine.fill(handle, text)).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::Timeout(format!(
                "fill '{}' exceeded {}ms",
                handle.path,
                timeout.as_millis()
            ))),
        }
    }

    pub async fn click(&self, handle: &NodeHandle, timeout: Duration) -> Result<()> {
        self.engine.click(handle, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineLauncher;
    use crate::testing::{FixtureApp, FixturePage};
    use crate::types::HarnessConfig;

    #[test]
    fn parses_plain_and_indexed_segments() {
        let segments = parse_structural_path("html/body/div[2]/input").unwrap();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[2].tag, "div");
        assert_eq!(segments[2].index, Some(2));
        assert_eq!(segments[3].index, None);
    }

    #[test]
    fn tolerates_leading_slash() {
        let segments = parse_structural_path("/html/body").unwrap();
        assert_eq!(segments[0].tag, "html");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(parse_structural_path("").is_err());
        assert!(parse_structural_path("div[0]").is_err());
        assert!(parse_structural_path("div[").is_err());
        assert!(parse_structural_path("div//input").is_err());
        assert!(parse_structural_path("div[two]").is_err());
    }

    fn duplicate_inputs_app() -> FixtureApp {
        FixtureApp::new().page(
            "http://app.local/",
            FixturePage::new(
                r#"<html><body><form>
                    <div><input name="first"></div>
                    <div><input name="second"></div>
                    <div><input name="third"></div>
                </form></body></html>"#,
            ),
        )
    }

    #[tokio::test]
    async fn unordinaled_reference_resolves_first_match_in_document_order() {
        let launcher = duplicate_inputs_app().launcher();
        let probe = launcher.probe();
        let config = HarnessConfig {
            timing: TimingConfig::fast(),
            ..Default::default()
        };
        let engine = launcher.launch(&config).await.unwrap();
        engine
            .goto("http://app.local/", Duration::from_millis(100))
            .await
            .unwrap();

        let interactor = Interactor::new(&engine, &config.timing);
        let reference = ElementReference::path("html/body/form/div/input");
        let handle = interactor
            .resolve(&DocumentId::root(), &reference)
            .await
            .unwrap();
        interactor
            .fill(&handle, "x", Duration::from_millis(100))
            .await
            .unwrap();

        let fills = probe.fills();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].matched.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn ordinal_selects_the_nth_match() {
        let launcher = duplicate_inputs_app().launcher();
        let probe = launcher.probe();
        let config = HarnessConfig {
            timing: TimingConfig::fast(),
            ..Default::default()
        };
        let engine = launcher.launch(&config).await.unwrap();
        engine
            .goto("http://app.local/", Duration::from_millis(100))
            .await
            .unwrap();

        let interactor = Interactor::new(&engine, &config.timing);
        let reference = ElementReference::path("html/body/form/div/input").nth(1);
        let handle = interactor
            .resolve(&DocumentId::root(), &reference)
            .await
            .unwrap();
        interactor
            .fill(&handle, "x", Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(probe.fills()[0].matched.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn zero_matches_is_not_found() {
        let launcher = duplicate_inputs_app().launcher();
        let config = HarnessConfig {
            timing: TimingConfig::fast(),
            ..Default::default()
        };
        let engine = launcher.launch(&config).await.unwrap();
        engine
            .goto("http://app.local/", Duration::from_millis(100))
            .await
            .unwrap();

        let interactor = Interactor::new(&engine, &config.timing);
        let reference = ElementReference::path("html/body/form/select");
        let result = interactor.resolve(&DocumentId::root(), &reference).await;
        assert!(matches!(result, Err(HarnessError::NotFound(_))));
    }
}
