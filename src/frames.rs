use crate::engine::{DocumentId, DocumentInfo, Engine};
use crate::errors::{HarnessError, Result};
use std::time::Duration;
use tracing::warn;

/// Outcome of a readiness wait. Never fault-based control flow: a document
/// that cannot reach its load milestone is a tolerated, logged state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Unreachable,
}

/// Fresh enumeration of the session's documents: root page first, embedded
/// documents in depth-first source order. Must be re-queried after every
/// navigation; a cached enumeration from before a navigation is stale.
pub async fn documents<E: Engine>(engine: &E) -> Result<Vec<DocumentInfo>> {
    engine.documents().await
}

/// Picks the document a reference is scoped to: the root page, or the Nth
/// embedded document of a fresh enumeration.
pub async fn select<E: Engine>(engine: &E, frame: Option<usize>) -> Result<DocumentId> {
    match frame {
        None => Ok(DocumentId::root()),
        Some(n) => {
            let docs = engine.documents().await?;
            let embedded: Vec<&DocumentInfo> = docs.iter().filter(|d| !d.id.is_root()).collect();
            embedded
                .get(n)
                .map(|d| d.id.clone())
                .ok_or_else(|| {
                    HarnessError::NotFound(format!(
                        "embedded document {} (page has {})",
                        n,
                        embedded.len()
                    ))
                })
        }
    }
}

/// Waits for a document's load milestone, bounded by `timeout`. Timing out
/// or a cross-origin fault yields `Unreachable`, which never aborts a
/// scenario.
pub async fn await_ready<E: Engine>(
    engine: &E,
    document: &DocumentId,
    timeout: Duration,
) -> Readiness {
    match engine.await_ready(document, timeout).await {
        Ok(true) => Readiness::Ready,
        Ok(false) => {
            warn!(document = %document, timeout_ms = timeout.as_millis() as u64, "document readiness timed out");
            Readiness::Unreachable
        }
        Err(e) => {
            warn!(document = %document, error = %e, "document readiness probe failed");
            Readiness::Unreachable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineLauncher;
    use crate::testing::{FixtureApp, FixturePage};
    use crate::types::HarnessConfig;

    fn config() -> HarnessConfig {
        HarnessConfig {
            timing: crate::types::TimingConfig::fast(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn enumerates_root_first_then_frames_in_source_order() {
        let launcher = FixtureApp::new()
            .page(
                "http://app.local/",
                FixturePage::new("<html><body>main</body></html>")
                    .frame("<html><body>first</body></html>")
                    .frame("<html><body>second</body></html>"),
            )
            .launcher();
        let engine = launcher.launch(&config()).await.unwrap();
        engine
            .goto("http://app.local/", Duration::from_millis(100))
            .await
            .unwrap();

        let docs = documents(&engine).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert!(docs[0].id.is_root());
        assert_eq!(docs[1].id, DocumentId(vec![0]));
        assert_eq!(docs[2].id, DocumentId(vec![1]));
    }

    #[tokio::test]
    async fn select_rejects_missing_embedded_document() {
        let launcher = FixtureApp::new()
            .page("http://app.local/", FixturePage::new("<html><body></body></html>"))
            .launcher();
        let engine = launcher.launch(&config()).await.unwrap();
        engine
            .goto("http://app.local/", Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(select(&engine, None).await.unwrap(), DocumentId::root());
        assert!(matches!(
            select(&engine, Some(0)).await,
            Err(HarnessError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_frame_times_out_to_unreachable() {
        let launcher = FixtureApp::new()
            .page(
                "http://app.local/",
                FixturePage::new("<html><body></body></html>").unreachable_frame(),
            )
            .launcher();
        let engine = launcher.launch(&config()).await.unwrap();
        engine
            .goto("http://app.local/", Duration::from_millis(100))
            .await
            .unwrap();

        let outcome = await_ready(&engine, &DocumentId(vec![0]), Duration::from_millis(200)).await;
        assert_eq!(outcome, Readiness::Unreachable);

        let root = await_ready(&engine, &DocumentId::root(), Duration::from_millis(200)).await;
        assert_eq!(root, Readiness::Ready);
    }
}
