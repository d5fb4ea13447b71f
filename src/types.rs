use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{ExplorerError, Result};

/// Default pause for `wait` tasks that don't specify one.
pub const DEFAULT_WAIT_MS: u64 = 3000;

/// Scroll position recorded for full page captures.
pub const FULL_PAGE_POSITION: i64 = -1;
/// Scroll position recorded for captures of a detected sign-in page.
pub const AUTH_PAGE_POSITION: i64 = -2;
/// Scroll position recorded for the capture taken when a sign-in wait times out.
pub const AUTH_TIMEOUT_POSITION: i64 = -4;

/// Browser operation a [`Task`] asks for.
///
/// Unrecognised names survive deserialization as `Other` so the executor
/// can report them as a failed result instead of rejecting the whole plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskAction {
    Navigate,
    Act,
    Screenshot,
    Wait,
    Evaluate,
    Type,
    Other(String),
}

impl TaskAction {
    pub fn as_str(&self) -> &str {
        match self {
            TaskAction::Navigate => "navigate",
            TaskAction::Act => "act",
            TaskAction::Screenshot => "screenshot",
            TaskAction::Wait => "wait",
            TaskAction::Evaluate => "evaluate",
            TaskAction::Type => "type",
            TaskAction::Other(name) => name,
        }
    }
}

impl From<String> for TaskAction {
    fn from(name: String) -> Self {
        match name.as_str() {
            "navigate" => TaskAction::Navigate,
            "act" => TaskAction::Act,
            "screenshot" => TaskAction::Screenshot,
            "wait" => TaskAction::Wait,
            "evaluate" => TaskAction::Evaluate,
            "type" => TaskAction::Type,
            _ => TaskAction::Other(name),
        }
    }
}

impl From<TaskAction> for String {
    fn from(action: TaskAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_page: Option<bool>,
    /// Comma separated selectors, tried in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_element: Option<String>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A single scripted browser operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub action: TaskAction,
    pub description: String,
    #[serde(default)]
    pub params: TaskParams,
}

impl Task {
    fn new(action: TaskAction, description: impl Into<String>, params: TaskParams) -> Self {
        Self {
            action,
            description: description.into(),
            params,
        }
    }

    pub fn navigate(description: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            TaskAction::Navigate,
            description,
            TaskParams {
                url: Some(url.into()),
                ..Default::default()
            },
        )
    }

    pub fn act(description: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self::new(
            TaskAction::Act,
            description,
            TaskParams {
                instruction: Some(instruction.into()),
                ..Default::default()
            },
        )
    }

    /// Viewport screenshot; `filename` of `None` means auto-numbered.
    pub fn screenshot(description: impl Into<String>, filename: Option<&str>) -> Self {
        Self::new(
            TaskAction::Screenshot,
            description,
            TaskParams {
                filename: filename.map(String::from),
                full_page: Some(false),
                ..Default::default()
            },
        )
    }

    pub fn wait(description: impl Into<String>, millis: u64) -> Self {
        Self::new(
            TaskAction::Wait,
            description,
            TaskParams {
                wait_time: Some(millis),
                ..Default::default()
            },
        )
    }

    pub fn evaluate(description: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(
            TaskAction::Evaluate,
            description,
            TaskParams {
                code: Some(code.into()),
                ..Default::default()
            },
        )
    }

    pub fn type_text(
        description: impl Into<String>,
        selector: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            TaskAction::Type,
            description,
            TaskParams {
                selector: Some(selector.into()),
                text: Some(text.into()),
                ..Default::default()
            },
        )
    }

    pub fn full_page(mut self) -> Self {
        self.params.full_page = Some(true);
        self
    }

    pub fn focus(mut self, selectors: impl Into<String>) -> Self {
        self.params.focus_element = Some(selectors.into());
        self
    }
}

/// How an `act` instruction turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActOutcome {
    /// The AI layer carried out the instruction.
    Applied,
    /// The instruction could not be satisfied; exploration continues anyway.
    BestEffortNoOp,
    /// The task itself was malformed.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act_outcome: Option<ActOutcome>,
}

impl TaskResult {
    pub fn ok(current_url: String, data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            current_url: Some(current_url),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Initializing, SessionStatus::Running)
                | (SessionStatus::Running, SessionStatus::Completed)
                | (SessionStatus::Running, SessionStatus::Failed)
        )
    }
}

/// Where the session stands with respect to a sign-in wall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    NotDetected,
    Waiting,
    Completed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

/// Progress of one phase of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: String,
    pub task_name: String,
    pub status: PhaseStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    #[serde(default)]
    pub screenshots: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskProgress {
    pub fn pending(task_id: &str, task_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            status: PhaseStatus::Pending,
            progress: 0,
            current_action: None,
            screenshots: Vec::new(),
            error: None,
            start_time: now,
            end_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: String,
    pub platform_name: String,
    pub platform_url: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub tasks: Vec<TaskProgress>,
    pub overall_progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
    #[serde(default)]
    pub auth: AuthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl SessionProgress {
    pub fn new(session_id: &str, target: &ExploreTarget, tasks: Vec<TaskProgress>) -> Self {
        Self {
            session_id: session_id.to_string(),
            platform_name: target.display_name(),
            platform_url: target.url.clone(),
            status: SessionStatus::Initializing,
            current_task: None,
            tasks,
            overall_progress: 0,
            live_view_url: None,
            auth: AuthState::NotDetected,
            error: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Raises overall progress; never lowers it.
    pub fn set_overall(&mut self, percent: u8) {
        self.overall_progress = self.overall_progress.max(percent.min(100));
    }

    pub fn set_status(&mut self, next: SessionStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(ExplorerError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskProgress> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotResult {
    pub url: String,
    pub screenshot_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scroll_position: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub task_id: String,
    pub task_name: String,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<TaskResult>,
}

/// Everything a run produced, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationResult {
    pub session_id: String,
    pub platform_name: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub screenshots: Vec<ScreenshotResult>,
    pub sign_in_detected: bool,
    pub authentication_completed: bool,
    pub post_auth_screenshots: Vec<ScreenshotResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_scroll_height: Option<u64>,
    pub phases: Vec<PhaseReport>,
}

impl ExplorationResult {
    pub fn new(session_id: &str, target: &ExploreTarget) -> Self {
        Self {
            session_id: session_id.to_string(),
            platform_name: target.display_name(),
            url: target.url.clone(),
            timestamp: Utc::now(),
            success: false,
            error: None,
            screenshots: Vec::new(),
            sign_in_detected: false,
            authentication_completed: false,
            post_auth_screenshots: Vec::new(),
            live_view_url: None,
            total_scroll_height: None,
            phases: Vec::new(),
        }
    }
}

/// What a caller asks the explorer to visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploreTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_name: Option<String>,
    pub url: String,
}

impl ExploreTarget {
    pub fn parse(url: &str, platform_name: Option<&str>) -> Result<Self> {
        let parsed = Url::parse(url.trim()).map_err(|e| ExplorerError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ExplorerError::InvalidUrl {
                url: url.to_string(),
                reason: "expected an absolute http(s) url".to_string(),
            });
        }
        Ok(Self {
            platform_name: platform_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from),
            url: parsed.to_string(),
        })
    }

    pub fn display_name(&self) -> String {
        if let Some(name) = &self.platform_name {
            return name.clone();
        }
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
            .unwrap_or_else(|| self.url.clone())
    }
}
