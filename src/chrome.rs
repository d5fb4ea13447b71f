//! Chrome DevTools implementation of [`Page`] on top of `headless_chrome`.
//!
//! `headless_chrome` is synchronous, so every call into a tab is moved onto
//! the blocking pool with `spawn_blocking`.

use std::ffi::OsStr;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::{Browser, LaunchOptions, Tab};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::ChromeConfig;
use crate::dom;
use crate::error::BrowserError;
use crate::page::{BrowserLauncher, ElementBox, Page, ShotMode, ViewportSize};
use crate::planner::{ActPlanner, BrowserStep, MAX_ACT_STEPS, Observation};

const WINDOW_SIZE: (u32, u32) = (1280, 720);
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(600);

/// Launches a local Chrome or attaches to a running DevTools endpoint.
pub struct ChromeLauncher {
    config: ChromeConfig,
    planner: Option<Arc<ActPlanner>>,
    client: Client,
}

impl ChromeLauncher {
    pub fn new(config: ChromeConfig, planner: Option<ActPlanner>) -> Self {
        Self {
            config,
            planner: planner.map(Arc::new),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Page>, BrowserError> {
        let (browser, live_view_url) = match &self.config.debug_url {
            Some(debug_url) => {
                let ws_url = resolve_ws_url(&self.client, debug_url).await?;
                info!(endpoint = %debug_url, "attaching to remote browser");
                let browser = blocking(move || {
                    Browser::connect(ws_url.clone()).map_err(|e| BrowserError::ConnectionFailed {
                        url: ws_url,
                        reason: e.to_string(),
                    })
                })
                .await?;
                (browser, Some(debug_url.clone()))
            }
            None => {
                let config = self.config.clone();
                info!(headless = config.headless, "launching local chrome");
                (blocking(move || launch_local(&config)).await?, None)
            }
        };

        let tab = {
            let browser = browser.clone();
            blocking(move || {
                browser
                    .new_tab()
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))
            })
            .await?
        };
        let live_view_url = live_view_url
            .and_then(|endpoint| inspector_url(&endpoint, tab.get_target_id()));
        debug!(target_id = %tab.get_target_id(), "tab ready");

        Ok(Arc::new(ChromePage {
            _browser: browser,
            tab,
            planner: self.planner.clone(),
            live_view_url,
            closed: AtomicBool::new(false),
        }))
    }
}

fn launch_local(config: &ChromeConfig) -> Result<Browser, BrowserError> {
    let options = LaunchOptions {
        headless: config.headless,
        path: config.chrome_path.clone().or_else(find_chrome),
        window_size: Some(WINDOW_SIZE),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--password-store=basic"),
        ],
        idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
        ..Default::default()
    };
    Browser::new(options).map_err(|e| BrowserError::LaunchFailed(e.to_string()))
}

/// Well-known install locations. `None` lets `headless_chrome` search `PATH`.
fn find_chrome() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium"),
        PathBuf::from("/usr/bin/chromium-browser"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join(r"Google\Chrome\Application\chrome.exe"));
    }
    candidates.into_iter().find(|p| p.exists())
}

/// Turns a DevTools HTTP endpoint into its browser websocket URL.
async fn resolve_ws_url(client: &Client, debug_url: &str) -> Result<String, BrowserError> {
    if debug_url.starts_with("ws://") || debug_url.starts_with("wss://") {
        return Ok(debug_url.to_string());
    }
    let failed = |reason: String| BrowserError::ConnectionFailed {
        url: debug_url.to_string(),
        reason,
    };
    let version: Value = client
        .get(format!("{}/json/version", debug_url.trim_end_matches('/')))
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?
        .error_for_status()
        .map_err(|e| failed(e.to_string()))?
        .json()
        .await
        .map_err(|e| failed(e.to_string()))?;
    version["webSocketDebuggerUrl"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| failed("no webSocketDebuggerUrl in /json/version".into()))
}

/// DevTools inspector link for watching a tab on a remote endpoint.
fn inspector_url(endpoint: &str, target_id: &str) -> Option<String> {
    let parsed = url::Url::parse(endpoint).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let ws_param = if parsed.scheme() == "https" { "wss" } else { "ws" };
    Some(format!(
        "{}://{authority}/devtools/inspector.html?{ws_param}={authority}/devtools/page/{target_id}",
        parsed.scheme()
    ))
}

async fn blocking<T, F>(f: F) -> Result<T, BrowserError>
where
    F: FnOnce() -> Result<T, BrowserError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BrowserError::Worker(e.to_string()))?
}

fn script_err(e: impl Display) -> BrowserError {
    BrowserError::Script(e.to_string())
}

fn not_found(selector: &str) -> BrowserError {
    BrowserError::ElementNotFound {
        selector: selector.to_string(),
    }
}

pub struct ChromePage {
    // Keeps a locally launched process alive for as long as the page.
    _browser: Browser,
    tab: Arc<Tab>,
    planner: Option<Arc<ActPlanner>>,
    live_view_url: Option<String>,
    closed: AtomicBool,
}

impl ChromePage {
    async fn with_tab<T, F>(&self, f: F) -> Result<T, BrowserError>
    where
        F: FnOnce(&Arc<Tab>) -> Result<T, BrowserError> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let tab = Arc::clone(&self.tab);
        blocking(move || f(&tab)).await
    }
}

/// Executes one planned step. Blocks.
fn apply_step(tab: &Arc<Tab>, step: &BrowserStep) -> Result<(), BrowserError> {
    match step {
        BrowserStep::Click { selector } => {
            tab.find_element(selector)
                .map_err(|_| not_found(selector))?
                .click()
                .map_err(script_err)?;
            std::thread::sleep(Duration::from_millis(1000));
        }
        BrowserStep::TypeInto { selector, text } => {
            tab.find_element(selector)
                .map_err(|_| not_found(selector))?
                .click()
                .map_err(script_err)?;
            dom::clear_value(tab, selector)?;
            tab.type_str(text).map_err(script_err)?;
        }
        BrowserStep::PressKey { key } => {
            tab.press_key(key).map_err(script_err)?;
            std::thread::sleep(Duration::from_millis(1000));
        }
        BrowserStep::Scroll { pixels } => {
            dom::scroll_by(tab, *pixels)?;
            std::thread::sleep(Duration::from_millis(500));
        }
        BrowserStep::Navigate { url } => {
            tab.navigate_to(url)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| BrowserError::NavigationFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
            std::thread::sleep(Duration::from_millis(1500));
        }
        BrowserStep::Done { .. } => {}
    }
    Ok(())
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let url = url.to_string();
        self.with_tab(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| BrowserError::NavigationFailed {
                    url,
                    reason: e.to_string(),
                })
        })
        .await
    }

    async fn act(&self, instruction: &str) -> Result<Value, BrowserError> {
        let planner = self.planner.as_ref().ok_or(BrowserError::ActUnavailable)?;
        let mut history: Vec<BrowserStep> = Vec::new();

        for _ in 0..MAX_ACT_STEPS {
            let observation = self
                .with_tab(|tab| {
                    Ok(Observation {
                        url: dom::current_url(tab)?,
                        title: dom::page_title(tab)?,
                        dom_snapshot: dom::capture_dom_snapshot(tab)?,
                    })
                })
                .await?;
            let step = planner
                .plan(instruction, &observation, &history)
                .await
                .map_err(|e| BrowserError::ActFailed(format!("{e:#}")))?;
            debug!(instruction, step = ?step, "planned step");

            if let BrowserStep::Done { summary } = &step {
                return Ok(json!({
                    "instruction": instruction,
                    "steps": history,
                    "summary": summary,
                }));
            }
            let planned = step.clone();
            self.with_tab(move |tab| apply_step(tab, &planned))
                .await
                .map_err(|e| BrowserError::ActFailed(e.to_string()))?;
            history.push(step);
        }

        Ok(json!({ "instruction": instruction, "steps": history }))
    }

    async fn screenshot(&self, mode: ShotMode) -> Result<Vec<u8>, BrowserError> {
        self.with_tab(move |tab| {
            let clip = match mode {
                ShotMode::Viewport => None,
                ShotMode::FullPage => {
                    let size = dom::document_size(tab)?;
                    Some(Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: f64::from(size.width),
                        height: f64::from(size.height),
                        scale: 1.0,
                    })
                }
                ShotMode::Clip(rect) => {
                    let (scroll_x, scroll_y) = dom::scroll_offset(tab)?;
                    Some(Viewport {
                        x: f64::from(rect.x) + scroll_x,
                        y: f64::from(rect.y) + scroll_y,
                        width: f64::from(rect.width),
                        height: f64::from(rect.height),
                        scale: 1.0,
                    })
                }
            };
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
                .map_err(|e| BrowserError::Screenshot(e.to_string()))
        })
        .await
    }

    async fn evaluate(&self, code: &str) -> Result<Value, BrowserError> {
        let code = code.to_string();
        self.with_tab(move |tab| dom::evaluate(tab, &code)).await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let selector = selector.to_string();
        self.with_tab(move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map(|_| ())
                .map_err(|_| BrowserError::Timeout {
                    what: format!("selector {selector}"),
                    duration: timeout,
                })
        })
        .await
    }

    async fn focus(&self, selector: &str) -> Result<(), BrowserError> {
        let selector = selector.to_string();
        self.with_tab(move |tab| {
            tab.find_element(&selector)
                .map_err(|_| not_found(&selector))?
                .focus()
                .map(|_| ())
                .map_err(script_err)
        })
        .await
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let selector = selector.to_string();
        let text = text.to_string();
        self.with_tab(move |tab| {
            tab.find_element(&selector)
                .map_err(|_| not_found(&selector))?
                .focus()
                .map_err(script_err)?;
            tab.type_str(&text).map(|_| ()).map_err(script_err)
        })
        .await
    }

    async fn element_box(&self, selector: &str) -> Result<Option<ElementBox>, BrowserError> {
        let selector = selector.to_string();
        self.with_tab(move |tab| dom::element_box(tab, &selector)).await
    }

    async fn viewport(&self) -> Result<ViewportSize, BrowserError> {
        self.with_tab(|tab| dom::viewport(tab)).await
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        let selector = selector.to_string();
        self.with_tab(move |tab| dom::exists(tab, &selector)).await
    }

    async fn url(&self) -> String {
        self.tab.get_url()
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.with_tab(|tab| dom::page_title(tab)).await
    }

    async fn body_text(&self) -> Result<String, BrowserError> {
        self.with_tab(|tab| dom::body_text(tab)).await
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let tab = Arc::clone(&self.tab);
        blocking(move || tab.close(true).map(|_| ()).map_err(script_err)).await?;
        info!("browser page closed");
        Ok(())
    }

    fn live_view_url(&self) -> Option<String> {
        self.live_view_url.clone()
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tab = Arc::clone(&self.tab);
        let close = move || {
            if let Err(e) = tab.close(false) {
                warn!(error = %e, "failed to close tab on drop");
            }
        };
        // Off the runtime's worker threads when there is one.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(close);
            }
            Err(_) => close(),
        }
    }
}
