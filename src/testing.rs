//! Scripted in-memory page and launcher for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::error::BrowserError;
use crate::page::{BrowserLauncher, ElementBox, Page, ShotMode, ViewportSize};

#[derive(Debug, Clone, Default)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub body: String,
}

impl PageState {
    pub fn new(url: &str, title: &str, body: &str) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            body: body.into(),
        }
    }
}

/// What the next `act` call does.
#[derive(Debug, Clone)]
pub enum ActScript {
    /// Succeeds and moves the page to a new state.
    Goto(PageState),
    Fail(String),
}

struct State {
    current: PageState,
    pages: HashMap<String, PageState>,
    boxes: HashMap<String, ElementBox>,
    present: HashSet<String>,
    evals: HashMap<String, Value>,
    eval_moves: HashMap<String, PageState>,
    acts: VecDeque<ActScript>,
    scheduled: Vec<(Instant, PageState)>,
    fail_goto: Option<String>,
    viewport: ViewportSize,
    calls: Vec<String>,
    shots: Vec<ShotMode>,
    closed: bool,
}

pub struct ScriptedPage {
    state: Mutex<State>,
}

impl ScriptedPage {
    pub fn new(url: &str) -> Self {
        Self {
            state: Mutex::new(State {
                current: PageState::new(url, "", ""),
                pages: HashMap::new(),
                boxes: HashMap::new(),
                present: HashSet::new(),
                evals: HashMap::new(),
                eval_moves: HashMap::new(),
                acts: VecDeque::new(),
                scheduled: Vec::new(),
                fail_goto: None,
                viewport: ViewportSize {
                    width: 1280,
                    height: 720,
                },
                calls: Vec::new(),
                shots: Vec::new(),
                closed: false,
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut st = self.state.lock().unwrap();
        let now = Instant::now();
        let (due, pending): (Vec<_>, Vec<_>) =
            st.scheduled.drain(..).partition(|(at, _)| *at <= now);
        st.scheduled = pending;
        if let Some((_, latest)) = due.into_iter().last() {
            st.current = latest;
        }
        f(&mut st)
    }

    fn record(&self, call: String) {
        self.with(|st| st.calls.push(call));
    }

    pub fn set_state(&self, state: PageState) {
        self.with(|st| st.current = state);
    }

    /// Content served when `goto` lands on `state.url`.
    pub fn add_page(&self, state: PageState) {
        self.with(|st| {
            st.pages.insert(state.url.clone(), state);
        });
    }

    /// Switches to `state` once `after` has elapsed on the tokio clock.
    pub fn schedule(&self, after: Duration, state: PageState) {
        let at = Instant::now() + after;
        self.with(|st| st.scheduled.push((at, state)));
    }

    pub fn set_box(&self, selector: &str, element: ElementBox) {
        self.with(|st| {
            st.boxes.insert(selector.into(), element);
        });
    }

    pub fn add_selector(&self, selector: &str) {
        self.with(|st| {
            st.present.insert(selector.into());
        });
    }

    pub fn set_eval(&self, code: &str, value: Value) {
        self.with(|st| {
            st.evals.insert(code.into(), value);
        });
    }

    /// Evaluating `code` moves the page to `state`, as a click script would.
    pub fn move_on_eval(&self, code: &str, state: PageState) {
        self.with(|st| {
            st.eval_moves.insert(code.into(), state);
        });
    }

    pub fn push_act(&self, script: ActScript) {
        self.with(|st| st.acts.push_back(script));
    }

    pub fn fail_navigation(&self, reason: &str) {
        self.with(|st| st.fail_goto = Some(reason.into()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|st| st.calls.clone())
    }

    pub fn shots(&self) -> Vec<ShotMode> {
        self.with(|st| st.shots.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.with(|st| st.closed)
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.record(format!("goto {url}"));
        self.with(|st| {
            if let Some(reason) = &st.fail_goto {
                return Err(BrowserError::NavigationFailed {
                    url: url.into(),
                    reason: reason.clone(),
                });
            }
            st.current = st
                .pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| PageState::new(url, "", ""));
            Ok(())
        })
    }

    async fn act(&self, instruction: &str) -> Result<Value, BrowserError> {
        self.record(format!("act {instruction}"));
        self.with(|st| match st.acts.pop_front() {
            Some(ActScript::Goto(next)) => {
                st.current = next;
                Ok(json!({ "instruction": instruction }))
            }
            Some(ActScript::Fail(reason)) => Err(BrowserError::ActFailed(reason)),
            None => Ok(json!({ "instruction": instruction })),
        })
    }

    async fn screenshot(&self, mode: ShotMode) -> Result<Vec<u8>, BrowserError> {
        self.record("screenshot".into());
        self.with(|st| st.shots.push(mode));
        Ok(b"\x89PNG\r\n\x1a\nscripted".to_vec())
    }

    async fn evaluate(&self, code: &str) -> Result<Value, BrowserError> {
        self.record(format!("evaluate {code}"));
        Ok(self.with(|st| {
            if let Some(next) = st.eval_moves.get(code).cloned() {
                st.current = next;
            }
            st.evals.get(code).cloned().unwrap_or(Value::Null)
        }))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.record(format!("wait_for_selector {selector}"));
        if self.with(|st| st.present.contains(selector)) {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(BrowserError::Timeout {
            what: format!("selector {selector}"),
            duration: timeout,
        })
    }

    async fn focus(&self, selector: &str) -> Result<(), BrowserError> {
        self.record(format!("focus {selector}"));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.record(format!("type {selector} {text}"));
        Ok(())
    }

    async fn element_box(&self, selector: &str) -> Result<Option<ElementBox>, BrowserError> {
        Ok(self.with(|st| st.boxes.get(selector).copied()))
    }

    async fn viewport(&self) -> Result<ViewportSize, BrowserError> {
        Ok(self.with(|st| st.viewport))
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        Ok(self.with(|st| st.present.contains(selector)))
    }

    async fn url(&self) -> String {
        self.with(|st| st.current.url.clone())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.with(|st| st.current.title.clone()))
    }

    async fn body_text(&self) -> Result<String, BrowserError> {
        Ok(self.with(|st| st.current.body.clone()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.record("close".into());
        self.with(|st| st.closed = true);
        Ok(())
    }

    fn live_view_url(&self) -> Option<String> {
        Some("http://live.test/session".into())
    }
}

/// Hands out one prepared page, or fails every launch.
pub struct ScriptedLauncher {
    page: Option<Arc<ScriptedPage>>,
}

impl ScriptedLauncher {
    pub fn new(page: Arc<ScriptedPage>) -> Self {
        Self { page: Some(page) }
    }

    pub fn failing() -> Self {
        Self { page: None }
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Arc<dyn Page>, BrowserError> {
        match &self.page {
            Some(page) => Ok(Arc::clone(page) as Arc<dyn Page>),
            None => Err(BrowserError::LaunchFailed("no browser quota left".into())),
        }
    }
}
