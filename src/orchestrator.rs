//! Drives one exploration session through its phases.
//!
//! Homepage Analysis, Authentication Flow Discovery and Feature Discovery run
//! strictly in order against a single page. A failed phase is recorded and
//! the next one still runs. The page is closed on every exit path through
//! [`PageLease`].

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::auth::{AuthWaiter, KeywordClassifier, PageClassifier, PageSignals};
use crate::config::ExplorerConfig;
use crate::executor::TaskExecutor;
use crate::page::{BrowserLauncher, Page, PageLease};
use crate::phases::{self, CAPTURED, FINISHED, FIRST_STEP, PhaseKind, PlannedTask, STARTED};
use crate::progress::ProgressRegistry;
use crate::storage::{DocumentationWriter, OutputStore};
use crate::types::{
    ActOutcome, AuthState, ExplorationResult, ExploreTarget, PhaseReport, PhaseStatus, ScreenshotResult,
    SessionProgress, SessionStatus, Task, TaskProgress, TaskResult,
};

const CANCELLED: &str = "Session cancelled";

pub fn new_session_id() -> String {
    format!("session_{}", Uuid::new_v4().simple())
}

pub struct Orchestrator {
    launcher: Arc<dyn BrowserLauncher>,
    registry: ProgressRegistry,
    store: OutputStore,
    writer: Arc<dyn DocumentationWriter>,
    classifier: Arc<dyn PageClassifier>,
    config: ExplorerConfig,
    cancels: DashMap<String, CancellationToken>,
}

impl Orchestrator {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        registry: ProgressRegistry,
        store: OutputStore,
        config: ExplorerConfig,
    ) -> Self {
        Self {
            launcher,
            registry,
            writer: Arc::new(store.clone()),
            store,
            classifier: Arc::new(KeywordClassifier),
            config,
            cancels: DashMap::new(),
        }
    }

    pub fn with_writer(mut self, writer: Arc<dyn DocumentationWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn PageClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn registry(&self) -> &ProgressRegistry {
        &self.registry
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    /// Registers the session and runs it in the background. Returns at once.
    pub fn start(self: &Arc<Self>, target: ExploreTarget) -> String {
        let session_id = new_session_id();
        let cancel = self.register(&session_id, &target);
        let this = Arc::clone(self);
        let id = session_id.clone();
        tokio::spawn(async move {
            this.run_session(&id, target, cancel).await;
        });
        session_id
    }

    /// Runs a session to completion on the current task.
    pub async fn run(&self, target: ExploreTarget) -> ExplorationResult {
        let session_id = new_session_id();
        let cancel = self.register(&session_id, &target);
        self.run_session(&session_id, target, cancel).await
    }

    /// Returns `false` if the session is unknown or already finished.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.cancels.get(session_id) {
            Some(token) => {
                info!(session_id, "cancelling session");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn register(&self, session_id: &str, target: &ExploreTarget) -> CancellationToken {
        let now = Utc::now();
        let tasks = PhaseKind::ALL
            .iter()
            .map(|phase| TaskProgress::pending(phase.id(), phase.name(), now))
            .collect();
        self.registry
            .set(SessionProgress::new(session_id, target, tasks));
        let cancel = CancellationToken::new();
        self.cancels.insert(session_id.to_string(), cancel.clone());
        cancel
    }

    async fn run_session(
        &self,
        session_id: &str,
        target: ExploreTarget,
        cancel: CancellationToken,
    ) -> ExplorationResult {
        let span = info_span!("session", session_id, url = %target.url);
        let result = self
            .explore(session_id, &target, cancel)
            .instrument(span)
            .await;
        self.cancels.remove(session_id);

        if let Err(e) = self.writer.write(&result).await {
            error!(session_id, error = %e, "failed to persist exploration result");
        }
        result
    }

    async fn explore(
        &self,
        session_id: &str,
        target: &ExploreTarget,
        cancel: CancellationToken,
    ) -> ExplorationResult {
        let mut result = ExplorationResult::new(session_id, target);

        let (lease, session_dir) = match self.acquire(session_id).await {
            Ok(acquired) => acquired,
            Err(message) => {
                error!(error = %message, "could not start session");
                self.mark_running(session_id, None);
                self.finish(session_id, SessionStatus::Failed, Some(message.clone()));
                result.error = Some(message);
                return result;
            }
        };

        result.live_view_url = lease.page().live_view_url();
        self.mark_running(session_id, result.live_view_url.clone());
        info!(platform = %result.platform_name, "exploration started");

        let mut run = SessionRun {
            session_id: session_id.to_string(),
            target_url: target.url.clone(),
            registry: self.registry.clone(),
            executor: TaskExecutor::new(Arc::clone(lease.page()), session_dir, &self.config),
            classifier: Arc::clone(&self.classifier),
            waiter: AuthWaiter::new(self.config.auth_timeout, self.config.auth_poll_interval),
            cancel,
            result,
        };

        for phase in PhaseKind::ALL {
            run.run_phase(phase).await;
        }

        if let Err(e) = lease.release().await {
            warn!(error = %e, "failed to close browser page");
        }

        let mut result = run.result;
        result.timestamp = Utc::now();
        if run.cancel.is_cancelled() {
            result.error = Some(CANCELLED.to_string());
            self.finish(session_id, SessionStatus::Failed, Some(CANCELLED.to_string()));
        } else {
            result.success = true;
            self.finish(session_id, SessionStatus::Completed, None);
        }
        info!(
            screenshots = result.screenshots.len(),
            post_auth = result.post_auth_screenshots.len(),
            "exploration finished"
        );
        result
    }

    async fn acquire(&self, session_id: &str) -> Result<(PageLease, PathBuf), String> {
        let session_dir = self
            .store
            .session_dir(session_id)
            .await
            .map_err(|e| format!("Failed to prepare output directory: {e}"))?;
        let page = self
            .launcher
            .launch()
            .await
            .map_err(|e| format!("Failed to start browser session: {e}"))?;
        Ok((PageLease::new(page), session_dir))
    }

    fn mark_running(&self, session_id: &str, live_view_url: Option<String>) {
        self.registry.update(session_id, |p| {
            p.live_view_url = live_view_url;
            if let Err(e) = p.set_status(SessionStatus::Running) {
                warn!(error = %e, "unexpected session status");
            }
        });
    }

    fn finish(&self, session_id: &str, status: SessionStatus, error: Option<String>) {
        self.registry.update(session_id, |p| {
            if let Err(e) = p.set_status(status) {
                warn!(error = %e, "unexpected session status");
            }
            if status == SessionStatus::Completed {
                p.set_overall(100);
            }
            p.current_task = None;
            p.error = error;
        });
    }
}

/// Per-session state while the phases run.
struct SessionRun {
    session_id: String,
    target_url: String,
    registry: ProgressRegistry,
    executor: TaskExecutor,
    classifier: Arc<dyn PageClassifier>,
    waiter: AuthWaiter,
    cancel: CancellationToken,
    result: ExplorationResult,
}

/// Why a phase stopped early.
type PhaseError = String;

impl SessionRun {
    fn page(&self) -> Arc<dyn Page> {
        Arc::clone(self.executor.page())
    }

    async fn run_phase(&mut self, phase: PhaseKind) {
        let mut report = PhaseReport {
            task_id: phase.id().to_string(),
            task_name: phase.name().to_string(),
            status: PhaseStatus::InProgress,
            error: None,
            results: Vec::new(),
        };

        let outcome = if self.cancel.is_cancelled() {
            Err(CANCELLED.to_string())
        } else {
            self.registry.update(&self.session_id, |p| {
                p.current_task = Some(phase.id().to_string());
                if let Some(t) = p.task_mut(phase.id()) {
                    t.status = PhaseStatus::InProgress;
                    t.start_time = Utc::now();
                }
            });
            self.milestone(phase, STARTED, "Starting");
            info!(phase = phase.id(), "phase started");
            match phase {
                PhaseKind::Homepage => self.homepage(&mut report).await,
                PhaseKind::Authentication => self.authentication(&mut report).await,
                PhaseKind::Features => self.features(&mut report).await,
            }
        };

        match &outcome {
            Ok(()) => {
                report.status = PhaseStatus::Completed;
                self.milestone(phase, FINISHED, "Completed");
                info!(phase = phase.id(), "phase completed");
            }
            Err(message) => {
                report.status = PhaseStatus::Error;
                report.error = Some(message.clone());
                warn!(phase = phase.id(), error = %message, "phase failed");
            }
        }
        self.registry.update(&self.session_id, |p| {
            if let Some(t) = p.task_mut(phase.id()) {
                t.status = report.status;
                t.error = report.error.clone();
                t.end_time = Some(Utc::now());
            }
        });
        self.result.phases.push(report);
    }

    fn milestone(&self, phase: PhaseKind, percent: u8, action: &str) {
        self.registry.update(&self.session_id, |p| {
            if let Some(t) = p.task_mut(phase.id()) {
                t.progress = t.progress.max(percent);
                t.current_action = Some(action.to_string());
            }
            p.set_overall(phase.overall(percent));
        });
    }

    fn set_auth(&self, state: AuthState) {
        self.registry.update(&self.session_id, |p| p.auth = state);
    }

    /// Runs `planned` in order and stops at the first failure. Every result
    /// is filed and published before the next task starts.
    async fn run_batch(
        &mut self,
        phase: PhaseKind,
        report: &mut PhaseReport,
        planned: Vec<PlannedTask>,
        post_auth: bool,
    ) -> Result<Vec<TaskResult>, PhaseError> {
        let total = planned.len();
        let mut results = Vec::with_capacity(total);
        for (i, plan) in planned.into_iter().enumerate() {
            let description = plan.task.description.clone();
            info!(phase = phase.id(), step = i + 1, total, task = %description, "executing task");
            self.registry.update(&self.session_id, |p| {
                if let Some(t) = p.task_mut(phase.id()) {
                    t.current_action = Some(description.clone());
                }
            });

            let res = self.executor.execute(&plan.task).await;

            if let Some(path) = &res.screenshot_path {
                let shown = path.display().to_string();
                self.registry.update(&self.session_id, |p| {
                    if let Some(t) = p.task_mut(phase.id()) {
                        t.screenshots.push(shown);
                    }
                });
                let shot = ScreenshotResult {
                    url: res.current_url.clone().unwrap_or_default(),
                    screenshot_path: path.clone(),
                    timestamp: Utc::now(),
                    success: res.success,
                    error: res.error.clone(),
                    scroll_position: plan.scroll_position,
                    description,
                };
                if post_auth {
                    self.result.post_auth_screenshots.push(shot);
                } else {
                    self.result.screenshots.push(shot);
                }
            }
            report.results.push(res.clone());

            if !res.success {
                let message = res.error.unwrap_or_else(|| "task failed".to_string());
                warn!(phase = phase.id(), error = %message, "task failed, stopping phase");
                return Err(message);
            }
            results.push(res);
        }
        Ok(results)
    }

    async fn homepage(&mut self, report: &mut PhaseReport) -> Result<(), PhaseError> {
        let phase = PhaseKind::Homepage;
        let url = self.target_url.clone();
        self.run_batch(phase, report, phases::homepage_load(&url), false)
            .await?;
        self.milestone(phase, FIRST_STEP, "Homepage loaded");

        self.run_batch(phase, report, phases::homepage_captures(), false)
            .await?;
        self.milestone(phase, CAPTURED, "Homepage captured");

        self.measure(phase, report).await?;
        Ok(())
    }

    async fn measure(
        &mut self,
        phase: PhaseKind,
        report: &mut PhaseReport,
    ) -> Result<(), PhaseError> {
        let results = self
            .run_batch(phase, report, phases::measure_page(), false)
            .await?;
        let height = results
            .last()
            .and_then(|r| r.data.as_ref())
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)));
        if height.is_some() {
            self.result.total_scroll_height = height;
        }
        Ok(())
    }

    async fn authentication(
        &mut self,
        report: &mut PhaseReport,
    ) -> Result<(), PhaseError> {
        let phase = PhaseKind::Authentication;
        let entry = self
            .run_batch(phase, report, phases::sign_in_entry(), false)
            .await?;
        if entry.first().and_then(|r| r.act_outcome) == Some(ActOutcome::BestEffortNoOp) {
            self.sign_in_fallback(phase, report).await?;
        }
        self.milestone(phase, FIRST_STEP, "Sign-in flow opened");

        let page = self.page();
        let on_login = match PageSignals::read(page.as_ref()).await {
            Ok(signals) => self.classifier.is_login_surface(&signals),
            Err(e) => {
                warn!(error = %e, "could not inspect page after sign-in click");
                false
            }
        };
        self.result.sign_in_detected = on_login;

        self.run_batch(phase, report, phases::auth_page_captures(), false)
            .await?;
        if !on_login {
            info!("no sign-in surface detected, continuing with public content");
            return Ok(());
        }

        self.set_auth(AuthState::Waiting);
        self.milestone(phase, CAPTURED, "Waiting for manual sign-in");
        let outcome = self
            .waiter
            .wait(page.as_ref(), self.classifier.as_ref(), &self.cancel)
            .await;

        if outcome.success {
            self.set_auth(AuthState::Completed);
            self.result.authentication_completed = true;
            self.milestone(phase, CAPTURED, "Capturing authenticated content");
            self.run_batch(phase, report, phases::authenticated_captures(), true)
                .await?;
        } else if outcome.was_cancelled() {
            self.set_auth(AuthState::Cancelled);
            return Err(CANCELLED.to_string());
        } else {
            self.set_auth(AuthState::TimedOut);
            info!("authentication not completed, continuing with public content");
            self.run_batch(phase, report, phases::auth_timeout_capture(), false)
                .await?;
        }
        Ok(())
    }

    /// Clicks a conventional sign-in link after an AI click that did nothing.
    async fn sign_in_fallback(
        &mut self,
        phase: PhaseKind,
        report: &mut PhaseReport,
    ) -> Result<(), PhaseError> {
        info!("AI sign-in click had no effect, looking for sign-in links");
        let clicked = match self
            .run_batch(phase, report, phases::sign_in_fallback(), false)
            .await
        {
            Ok(results) => results
                .last()
                .and_then(|r| r.data.as_ref())
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "sign-in link lookup failed");
                false
            }
        };
        if clicked {
            self.run_batch(phase, report, phases::sign_in_settle(), false)
                .await?;
        } else {
            info!("no visible sign-in link");
        }
        Ok(())
    }

    async fn features(&mut self, report: &mut PhaseReport) -> Result<(), PhaseError> {
        let phase = PhaseKind::Features;
        let current = self.page().url().await;
        if !self.result.authentication_completed && current != self.target_url {
            let url = self.target_url.clone();
            self.run_batch(
                phase,
                report,
                vec![Task::navigate("Return to homepage", url).into()],
                false,
            )
            .await?;
        }

        self.run_batch(phase, report, phases::feature_scroll(), false)
            .await?;
        self.milestone(phase, FIRST_STEP, "Scrolled through page");

        if self.result.authentication_completed || self.result.total_scroll_height.is_none() {
            self.measure(phase, report).await?;
        }
        if let Some(height) = self.result.total_scroll_height.filter(|h| *h > 0) {
            self.run_batch(phase, report, phases::section_captures(height), false)
                .await?;
        }
        self.milestone(phase, CAPTURED, "Sections captured");

        self.run_batch(phase, report, phases::feature_full_page(), false)
            .await?;
        Ok(())
    }
}
