//! Deterministic in-process engine for exercising scenarios without a
//! browser. Fixture pages are plain HTML parsed with `scraper`; scripted
//! effects model the application reacting to clicks (delayed text reveals,
//! navigations), and injectable faults force every failure path the
//! orchestrator has to survive.

use crate::engine::{DocumentId, DocumentInfo, Engine, EngineLauncher, NodeHandle};
use crate::errors::{HarnessError, Result};
use crate::locator::{parse_structural_path, PathSegment};
use crate::types::HarnessConfig;
use async_trait::async_trait;
use scraper::{ElementRef, Html};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// The application a click reacts with.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Text becomes visible `after_ms` after the click, the way a SPA
    /// renders a new route asynchronously.
    RevealText { text: String, after_ms: u64 },
    NavigateTo(String),
}

/// Where to inject a fault, for resource-leak and degradation tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Launch,
    Navigate,
    Fill,
    Click,
    /// The click target never becomes actionable; the engine burns the whole
    /// bound and reports a timeout.
    ClickNeverActionable,
    Teardown,
}

pub struct FixtureFrame {
    html: String,
    reachable: bool,
    ready_after: Duration,
}

pub struct FixturePage {
    html: String,
    frames: Vec<FixtureFrame>,
    click_effects: Vec<(String, Effect)>,
}

impl FixturePage {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            frames: Vec::new(),
            click_effects: Vec::new(),
        }
    }

    pub fn frame(mut self, html: &str) -> Self {
        self.frames.push(FixtureFrame {
            html: html.to_string(),
            reachable: true,
            ready_after: Duration::ZERO,
        });
        self
    }

    pub fn slow_frame(mut self, html: &str, ready_after_ms: u64) -> Self {
        self.frames.push(FixtureFrame {
            html: html.to_string(),
            reachable: true,
            ready_after: Duration::from_millis(ready_after_ms),
        });
        self
    }

    /// A cross-origin or never-loading embedded document: enumerable, but
    /// every content access fails.
    pub fn unreachable_frame(mut self) -> Self {
        self.frames.push(FixtureFrame {
            html: String::new(),
            reachable: false,
            ready_after: Duration::ZERO,
        });
        self
    }

    pub fn on_click(mut self, path: &str, effect: Effect) -> Self {
        self.click_effects.push((path.to_string(), effect));
        self
    }
}

#[derive(Default)]
pub struct FixtureApp {
    pages: Vec<(String, FixturePage)>,
}

impl FixtureApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, page: FixturePage) -> Self {
        self.pages.push((url.to_string(), page));
        self
    }

    pub fn launcher(self) -> FixtureLauncher {
        FixtureLauncher {
            app: Arc::new(self),
            probe: FixtureProbe::default(),
            fault: None,
        }
    }
}

/// What one fill actually hit: the path, the chosen match, and the text.
#[derive(Debug, Clone, PartialEq)]
pub struct FillRecord {
    pub document: DocumentId,
    pub path: String,
    pub ordinal: usize,
    pub value: String,
    /// `name` (or `id`) attribute of the matched node, to tell duplicate
    /// matches apart in determinism checks.
    pub matched: Option<String>,
}

#[derive(Default)]
struct ProbeInner {
    launches: AtomicUsize,
    releases: AtomicUsize,
    document_queries: AtomicUsize,
    fills: Mutex<Vec<FillRecord>>,
}

/// Shared observation channel out of the fixture: counters survive the
/// engine being consumed by the session manager.
#[derive(Clone, Default)]
pub struct FixtureProbe {
    inner: Arc<ProbeInner>,
}

impl FixtureProbe {
    pub fn launches(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }

    pub fn document_queries(&self) -> usize {
        self.inner.document_queries.load(Ordering::SeqCst)
    }

    pub fn fills(&self) -> Vec<FillRecord> {
        self.inner.fills.lock().expect("probe lock").clone()
    }
}

pub struct FixtureLauncher {
    app: Arc<FixtureApp>,
    probe: FixtureProbe,
    fault: Option<Fault>,
}

impl FixtureLauncher {
    pub fn fail_on(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn probe(&self) -> FixtureProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl EngineLauncher for FixtureLauncher {
    type Engine = FixtureEngine;

    async fn launch(&self, _config: &HarnessConfig) -> Result<FixtureEngine> {
        if self.fault == Some(Fault::Launch) {
            return Err(HarnessError::LaunchFailed(
                "injected launch fault".to_string(),
            ));
        }
        self.probe.inner.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FixtureEngine {
            app: Arc::clone(&self.app),
            fault: self.fault,
            probe: self.probe.clone(),
            state: Mutex::new(EngineState::default()),
        })
    }
}

#[derive(Default)]
struct EngineState {
    current_url: Option<String>,
    navigated_at: Option<Instant>,
    reveals: Vec<(String, Instant)>,
}

pub struct FixtureEngine {
    app: Arc<FixtureApp>,
    fault: Option<Fault>,
    probe: FixtureProbe,
    state: Mutex<EngineState>,
}

impl FixtureEngine {
    fn page(&self, url: &str) -> Result<&FixturePage> {
        self.app
            .pages
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, p)| p)
            .ok_or_else(|| HarnessError::NavigationFailed(format!("no route to {}", url)))
    }

    fn current_page(&self) -> Result<&FixturePage> {
        let url = self
            .state
            .lock()
            .expect("state lock")
            .current_url
            .clone()
            .ok_or_else(|| HarnessError::EngineFailed("no page loaded".to_string()))?;
        self.page(&url)
    }

    fn document_html(&self, document: &DocumentId) -> Result<String> {
        let page = self.current_page()?;
        match document.0.as_slice() {
            [] => Ok(page.html.clone()),
            [index] => {
                let frame = page.frames.get(*index).ok_or_else(|| {
                    HarnessError::EngineFailed(format!("no embedded document {}", index))
                })?;
                if !frame.reachable {
                    return Err(HarnessError::EngineFailed(format!(
                        "embedded document {} denied access",
                        index
                    )));
                }
                Ok(frame.html.clone())
            }
            _ => Err(HarnessError::EngineFailed(
                "nested embedded documents are not modeled".to_string(),
            )),
        }
    }

    fn navigate_state(&self, url: &str) {
        let mut state = self.state.lock().expect("state lock");
        state.current_url = Some(url.to_string());
        state.navigated_at = Some(Instant::now());
        state.reveals.clear();
    }
}

/// Walks the parsed document along the structural path, accumulating every
/// match in document order; unindexed segments fan out across all matching
/// children, indexed ones pick the nth child per parent.
fn resolve_matches(html: &str, segments: &[PathSegment]) -> Vec<Option<String>> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let mut current: Vec<ElementRef> = vec![root];
    for (depth, segment) in segments.iter().enumerate() {
        if depth == 0 {
            current.retain(|el| el.value().name() == segment.tag);
            if matches!(segment.index, Some(index) if index != 1) {
                current.clear();
            }
            continue;
        }

        let mut next = Vec::new();
        for el in &current {
            let children: Vec<ElementRef> = el
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| c.value().name() == segment.tag)
                .collect();
            match segment.index {
                Some(index) => {
                    if let Some(child) = children.get(index - 1) {
                        next.push(*child);
                    }
                }
                None => next.extend(children),
            }
        }
        current = next;
    }

    current
        .iter()
        .map(|el| {
            el.value()
                .attr("name")
                .or_else(|| el.value().attr("id"))
                .map(|a| a.to_string())
        })
        .collect()
}

#[async_trait]
impl Engine for FixtureEngine {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        if self.fault == Some(Fault::Navigate) {
            return Err(HarnessError::NavigationFailed(
                "injected navigation fault".to_string(),
            ));
        }
        self.page(url)?;
        self.navigate_state(url);
        Ok(())
    }

    async fn documents(&self) -> Result<Vec<DocumentInfo>> {
        self.probe
            .inner
            .document_queries
            .fetch_add(1, Ordering::SeqCst);

        let url = self
            .state
            .lock()
            .expect("state lock")
            .current_url
            .clone()
            .ok_or_else(|| HarnessError::EngineFailed("no page loaded".to_string()))?;
        let page = self.page(&url)?;

        let mut docs = vec![DocumentInfo {
            id: DocumentId::root(),
            url: Some(url.clone()),
            reachable: true,
        }];
        for (index, frame) in page.frames.iter().enumerate() {
            docs.push(DocumentInfo {
                id: DocumentId(vec![index]),
                url: frame
                    .reachable
                    .then(|| format!("{}frame/{}", url, index)),
                reachable: frame.reachable,
            });
        }
        Ok(docs)
    }

    async fn await_ready(&self, document: &DocumentId, timeout: Duration) -> Result<bool> {
        if document.is_root() {
            let navigated = self.state.lock().expect("state lock").navigated_at.is_some();
            if navigated {
                return Ok(true);
            }
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }

        let (reachable, ready_after, navigated_at) = {
            let state = self.state.lock().expect("state lock");
            let navigated_at = state
                .navigated_at
                .ok_or_else(|| HarnessError::EngineFailed("no page loaded".to_string()))?;
            drop(state);
            let page = self.current_page()?;
            let index = document.0[0];
            let frame = page.frames.get(index).ok_or_else(|| {
                HarnessError::EngineFailed(format!("no embedded document {}", index))
            })?;
            (frame.reachable, frame.ready_after, navigated_at)
        };

        if !reachable {
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }

        let elapsed = navigated_at.elapsed();
        if elapsed >= ready_after {
            return Ok(true);
        }
        let remaining = ready_after - elapsed;
        if remaining <= timeout {
            tokio::time::sleep(remaining).await;
            Ok(true)
        } else {
            tokio::time::sleep(timeout).await;
            Ok(false)
        }
    }

    async fn resolve(
        &self,
        document: &DocumentId,
        path: &str,
        ordinal: usize,
    ) -> Result<Option<NodeHandle>> {
        let segments =
            parse_structural_path(path).map_err(|e| HarnessError::EngineFailed(e.to_string()))?;
        let html = self.document_html(document)?;
        let matches = resolve_matches(&html, &segments);

        if matches.len() > ordinal {
            Ok(Some(NodeHandle {
                document: document.clone(),
                path: path.to_string(),
                ordinal,
            }))
        } else {
            Ok(None)
        }
    }

    async fn fill(&self, handle: &NodeHandle, text: &str) -> Result<()> {
        if self.fault == Some(Fault::Fill) {
            return Err(HarnessError::ActionFailed(
                "injected fill fault".to_string(),
            ));
        }

        let segments = parse_structural_path(&handle.path)
            .map_err(|e| HarnessError::EngineFailed(e.to_string()))?;
        let html = self.document_html(&handle.document)?;
        let matches = resolve_matches(&html, &segments);
        let matched = matches
            .get(handle.ordinal)
            .cloned()
            .ok_or_else(|| {
                HarnessError::ActionFailed(format!("element '{}' detached mid-action", handle.path))
            })?;

        self.probe
            .inner
            .fills
            .lock()
            .expect("probe lock")
            .push(FillRecord {
                document: handle.document.clone(),
                path: handle.path.clone(),
                ordinal: handle.ordinal,
                value: text.to_string(),
                matched,
            });
        Ok(())
    }

    async fn click(&self, handle: &NodeHandle, timeout: Duration) -> Result<()> {
        match self.fault {
            Some(Fault::Click) => {
                return Err(HarnessError::ActionFailed(
                    "injected click fault".to_string(),
                ));
            }
            Some(Fault::ClickNeverActionable) => {
                tokio::time::sleep(timeout).await;
                return Err(HarnessError::Timeout(format!(
                    "element '{}' in {} not actionable within {}ms",
                    handle.path,
                    handle.document,
                    timeout.as_millis()
                )));
            }
            _ => {}
        }

        let segments = parse_structural_path(&handle.path)
            .map_err(|e| HarnessError::EngineFailed(e.to_string()))?;
        let html = self.document_html(&handle.document)?;
        if resolve_matches(&html, &segments).len() <= handle.ordinal {
            return Err(HarnessError::ActionFailed(format!(
                "element '{}' detached mid-action",
                handle.path
            )));
        }

        let effects: Vec<Effect> = self
            .current_page()?
            .click_effects
            .iter()
            .filter(|(path, _)| path.trim_matches('/') == handle.path.trim_matches('/'))
            .map(|(_, effect)| effect.clone())
            .collect();

        for effect in effects {
            match effect {
                Effect::RevealText { text, after_ms } => {
                    let at = Instant::now() + Duration::from_millis(after_ms);
                    self.state
                        .lock()
                        .expect("state lock")
                        .reveals
                        .push((text, at));
                }
                Effect::NavigateTo(url) => {
                    self.page(&url)?;
                    self.navigate_state(&url);
                }
            }
        }
        Ok(())
    }

    async fn text_visible(&self, document: &DocumentId, text: &str) -> Result<bool> {
        let html = self.document_html(document)?;
        let doc = Html::parse_document(&html);
        let static_text = doc.root_element().text().collect::<Vec<_>>().join(" ");
        if static_text.contains(text) {
            return Ok(true);
        }

        if document.is_root() {
            let now = Instant::now();
            let state = self.state.lock().expect("state lock");
            return Ok(state
                .reveals
                .iter()
                .any(|(revealed, at)| revealed.contains(text) && *at <= now));
        }
        Ok(false)
    }

    async fn node_visible(&self, handle: &NodeHandle) -> Result<bool> {
        let segments = parse_structural_path(&handle.path)
            .map_err(|e| HarnessError::EngineFailed(e.to_string()))?;
        let html = self.document_html(&handle.document)?;
        Ok(resolve_matches(&html, &segments).len() > handle.ordinal)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Err(HarnessError::EngineFailed(
            "fixture engine has no renderer".to_string(),
        ))
    }

    async fn close(&self) -> Result<()> {
        self.probe.inner.releases.fetch_add(1, Ordering::SeqCst);
        if self.fault == Some(Fault::Teardown) {
            return Err(HarnessError::TeardownFailed(
                "injected teardown fault".to_string(),
            ));
        }
        Ok(())
    }
}
