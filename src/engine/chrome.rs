use crate::engine::{DocumentId, DocumentInfo, Engine, EngineLauncher, NodeHandle};
use crate::errors::{HarnessError, Result};
use crate::types::HarnessConfig;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Launches one Chrome process per session.
pub struct ChromeLauncher;

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    type Engine = ChromeEngine;

    async fn launch(&self, config: &HarnessConfig) -> Result<ChromeEngine> {
        ChromeEngine::launch(config)
    }
}

/// Production engine adapter over `headless_chrome`. All document and node
/// operations go through JavaScript evaluation in the target page, which is
/// what lets a single adapter address the root document and same-origin
/// embedded frames uniformly; cross-origin frames surface as unreachable.
pub struct ChromeEngine {
    browser: Browser,
    tab: Arc<Tab>,
    poll_interval: Duration,
}

#[derive(Deserialize)]
struct FrameEntry {
    path: Vec<usize>,
    url: Option<String>,
    reachable: bool,
}

fn js_quote(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Expression selecting the window that owns `document`, starting at the
/// root window. Must run inside a try block: cross-origin access throws.
fn frame_expr(document: &DocumentId) -> String {
    let mut expr = String::from("let w = window;");
    for idx in &document.0 {
        expr.push_str(&format!(" w = w.frames[{}];", idx));
    }
    expr
}

impl ChromeEngine {
    pub fn launch(config: &HarnessConfig) -> Result<Self> {
        let window_size_arg = format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        );
        let user_agent_arg = config
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];

        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }

        for arg in &config.extra_args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args)
            .build()
            .map_err(|e| HarnessError::LaunchFailed(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| HarnessError::LaunchFailed(e.to_string()))?;

        let tab = browser
            .new_tab()
            .map_err(|e| HarnessError::LaunchFailed(e.to_string()))?;

        tab.set_default_timeout(Duration::from_millis(config.timing.action_timeout_ms));

        Ok(Self {
            browser,
            tab,
            poll_interval: Duration::from_millis(config.timing.poll_interval_ms),
        })
    }

    /// Evaluate a script whose result is a JSON.stringify'd payload.
    fn eval_json(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| HarnessError::EngineFailed(e.to_string()))?;

        let raw = result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| HarnessError::EngineFailed("script returned no value".to_string()))?;

        Ok(serde_json::from_str(&raw)?)
    }

    fn snapshot_prelude(handle_doc: &DocumentId, path: &str, ordinal: usize) -> String {
        format!(
            r#"{frame}
                const doc = w.document;
                const snap = doc.evaluate('{path}', doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                const el = snap.snapshotLength > {ordinal} ? snap.snapshotItem({ordinal}) : null;"#,
            frame = frame_expr(handle_doc),
            path = js_quote(path),
            ordinal = ordinal,
        )
    }
}

#[async_trait]
impl Engine for ChromeEngine {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);

        self.tab
            .navigate_to(url)
            .map_err(|e| HarnessError::NavigationFailed(e.to_string()))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| HarnessError::NavigationFailed(e.to_string()))?;

        debug!(url, "navigation committed");
        Ok(())
    }

    async fn documents(&self) -> Result<Vec<DocumentInfo>> {
        let script = r#"
            (function() {
                const out = [{ path: [], url: window.location.href, reachable: true }];
                const walk = (win, path) => {
                    for (let i = 0; i < win.frames.length; i++) {
                        const childPath = path.concat([i]);
                        let url = null;
                        let reachable = true;
                        try {
                            url = win.frames[i].location.href;
                            void win.frames[i].document.readyState;
                        } catch (e) {
                            reachable = false;
                        }
                        out.push({ path: childPath, url: url, reachable: reachable });
                        if (reachable) walk(win.frames[i], childPath);
                    }
                };
                walk(window, []);
                return JSON.stringify(out);
            })()
        "#;

        let value = self.eval_json(script)?;
        let entries: Vec<FrameEntry> = serde_json::from_value(value)?;

        Ok(entries
            .into_iter()
            .map(|e| DocumentInfo {
                id: DocumentId(e.path),
                url: e.url,
                reachable: e.reachable,
            })
            .collect())
    }

    async fn await_ready(&self, document: &DocumentId, timeout: Duration) -> Result<bool> {
        let script = format!(
            r#"
            (function() {{
                try {{
                    {frame}
                    return JSON.stringify({{ state: w.document.readyState }});
                }} catch (e) {{
                    return JSON.stringify({{ state: 'unreachable' }});
                }}
            }})()
        "#,
            frame = frame_expr(document)
        );

        let started = tokio::time::Instant::now();
        loop {
            let value = self.eval_json(&script)?;
            let state = value
                .get("state")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            // DOMContentLoaded is the milestone the harness waits for.
            if state == "interactive" || state == "complete" {
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn resolve(
        &self,
        document: &DocumentId,
        path: &str,
        ordinal: usize,
    ) -> Result<Option<NodeHandle>> {
        let script = format!(
            r#"
            (function() {{
                try {{
                    {frame}
                    const doc = w.document;
                    const snap = doc.evaluate('{path}', doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                    return JSON.stringify({{ matches: snap.snapshotLength }});
                }} catch (e) {{
                    return JSON.stringify({{ error: String(e) }});
                }}
            }})()
        "#,
            frame = frame_expr(document),
            path = js_quote(path),
        );

        let value = self.eval_json(&script)?;
        if let Some(error) = value.get("error").and_then(|v| v.as_str()) {
            return Err(HarnessError::EngineFailed(error.to_string()));
        }

        let matches = value
            .get("matches")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;

        if matches > ordinal {
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
        let script = format!(
            r#"
            (function() {{
                try {{
                    {prelude}
                    if (!el) return JSON.stringify({{ ok: false, reason: 'detached' }});
                    el.focus();
                    el.value = '{text}';
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return JSON.stringify({{ ok: true }});
                }} catch (e) {{
                    return JSON.stringify({{ ok: false, reason: String(e) }});
                }}
            }})()
        "#,
            prelude = Self::snapshot_prelude(&handle.document, &handle.path, handle.ordinal),
            text = js_quote(text),
        );

        let value = self.eval_json(&script)?;
        if value.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(())
        } else {
            let reason = value
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            Err(HarnessError::ActionFailed(format!(
                "fill '{}' in {}: {}",
                handle.path, handle.document, reason
            )))
        }
    }

    async fn click(&self, handle: &NodeHandle, timeout: Duration) -> Result<()> {
        let script = format!(
            r#"
            (function() {{
                try {{
                    {prelude}
                    if (!el) return JSON.stringify({{ state: 'detached' }});
                    const rect = el.getBoundingClientRect();
                    const style = w.getComputedStyle(el);
                    const visible = rect.width > 0 && rect.height > 0 &&
                        style.visibility !== 'hidden' &&
                        style.display !== 'none' &&
                        parseFloat(style.opacity) > 0;
                    if (!visible || el.disabled) return JSON.stringify({{ state: 'blocked' }});
                    el.scrollIntoView({{ block: 'center' }});
                    el.click();
                    return JSON.stringify({{ state: 'clicked' }});
                }} catch (e) {{
                    return JSON.stringify({{ state: 'error', message: String(e) }});
                }}
            }})()
        "#,
            prelude = Self::snapshot_prelude(&handle.document, &handle.path, handle.ordinal),
        );

        let started = tokio::time::Instant::now();
        loop {
            let value = self.eval_json(&script)?;
            let state = value
                .get("state")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            match state {
                "clicked" => return Ok(()),
                "detached" => {
                    // Resolved moments ago and gone now: engine-level fault,
                    // not a slow page.
                    return Err(HarnessError::ActionFailed(format!(
                        "element '{}' detached mid-action",
                        handle.path
                    )));
                }
                "error" => {
                    let message = value
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    return Err(HarnessError::ActionFailed(format!(
                        "click '{}': {}",
                        handle.path, message
                    )));
                }
                _ => {}
            }

            if started.elapsed() >= timeout {
                return Err(HarnessError::Timeout(format!(
                    "element '{}' in {} not actionable within {}ms",
                    handle.path,
                    handle.document,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn text_visible(&self, document: &DocumentId, text: &str) -> Result<bool> {
        let script = format!(
            r#"
            (function() {{
                try {{
                    {frame}
                    const doc = w.document;
                    const needle = '{needle}';
                    for (const el of doc.querySelectorAll('*')) {{
                        if (!el.textContent || !el.textContent.includes(needle)) continue;
                        let innermost = true;
                        for (const child of el.children) {{
                            if (child.textContent && child.textContent.includes(needle)) {{
                                innermost = false;
                                break;
                            }}
                        }}
                        if (!innermost) continue;
                        const rect = el.getBoundingClientRect();
                        const style = w.getComputedStyle(el);
                        const visible = rect.width > 0 && rect.height > 0 &&
                            style.visibility !== 'hidden' &&
                            style.display !== 'none' &&
                            parseFloat(style.opacity) > 0;
                        return JSON.stringify({{ visible: visible }});
                    }}
                    return JSON.stringify({{ visible: false }});
                }} catch (e) {{
                    return JSON.stringify({{ visible: false }});
                }}
            }})()
        "#,
            frame = frame_expr(document),
            needle = js_quote(text),
        );

        let value = self.eval_json(&script)?;
        Ok(value.get("visible").and_then(|v| v.as_bool()) == Some(true))
    }

    async fn node_visible(&self, handle: &NodeHandle) -> Result<bool> {
        let script = format!(
            r#"
            (function() {{
                try {{
                    {prelude}
                    if (!el) return JSON.stringify({{ visible: false }});
                    const rect = el.getBoundingClientRect();
                    const style = w.getComputedStyle(el);
                    const visible = rect.width > 0 && rect.height > 0 &&
                        style.visibility !== 'hidden' &&
                        style.display !== 'none' &&
                        parseFloat(style.opacity) > 0;
                    return JSON.stringify({{ visible: visible }});
                }} catch (e) {{
                    return JSON.stringify({{ visible: false }});
                }}
            }})()
        "#,
            prelude = Self::snapshot_prelude(&handle.document, &handle.path, handle.ordinal),
        );

        let value = self.eval_json(&script)?;
        Ok(value.get("visible").and_then(|v| v.as_bool()) == Some(true))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(
                headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
                None,
                None,
                true,
            )
            .map_err(|e| HarnessError::EngineFailed(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        // Page first; the process goes away when the Browser handle drops.
        self.tab
            .close(false)
            .map_err(|e| HarnessError::TeardownFailed(e.to_string()))?;
        Ok(())
    }
}

impl ChromeEngine {
    /// The launching Browser handle. Holding it keeps the Chrome process
    /// alive; dropping the engine reaps it.
    pub fn browser(&self) -> &Browser {
        &self.browser
    }
}
