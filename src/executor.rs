//! Runs scripted tasks one at a time against a page.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::capture::{ScreenshotCapturer, ShotSpec};
use crate::config::ExplorerConfig;
use crate::error::{ExplorerError, Result};
use crate::page::Page;
use crate::types::{ActOutcome, Task, TaskAction, TaskResult};

pub struct TaskExecutor {
    page: Arc<dyn Page>,
    capturer: ScreenshotCapturer,
    navigation_timeout: Duration,
    selector_timeout: Duration,
    default_wait: Duration,
}

impl TaskExecutor {
    pub fn new(page: Arc<dyn Page>, session_dir: impl Into<PathBuf>, config: &ExplorerConfig) -> Self {
        Self {
            page,
            capturer: ScreenshotCapturer::new(session_dir),
            navigation_timeout: config.navigation_timeout,
            selector_timeout: config.selector_timeout,
            default_wait: config.default_wait,
        }
    }

    pub fn page(&self) -> &Arc<dyn Page> {
        &self.page
    }

    /// Runs `tasks` in order and stops after the first failed result.
    pub async fn execute_all(&mut self, tasks: &[Task]) -> Vec<TaskResult> {
        let mut results = Vec::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            info!(step = i + 1, total = tasks.len(), task = %task.description, "executing task");
            let result = self.execute(task).await;
            let failed = !result.success;
            if failed {
                warn!(error = ?result.error, "task failed, stopping execution");
            }
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    /// Executes one task. Errors never escape; they become failed results.
    pub async fn execute(&mut self, task: &Task) -> TaskResult {
        match self.dispatch(task).await {
            Ok(result) => result,
            Err(e) => {
                let mut result = TaskResult::failed(e.to_string());
                result.current_url = Some(self.page.url().await);
                result
            }
        }
    }

    async fn dispatch(&mut self, task: &Task) -> Result<TaskResult> {
        let params = &task.params;
        match &task.action {
            TaskAction::Navigate => {
                let url = params.url.as_deref().ok_or(ExplorerError::MissingParam {
                    action: "navigate",
                    what: "URL",
                })?;
                self.page.goto(url, self.navigation_timeout).await?;
                Ok(TaskResult::ok(
                    self.page.url().await,
                    format!("Navigated to {url}"),
                ))
            }
            TaskAction::Act => {
                let Some(instruction) = params.instruction.as_deref() else {
                    let mut result = TaskResult::failed(
                        ExplorerError::MissingParam {
                            action: "act",
                            what: "Instruction",
                        }
                        .to_string(),
                    );
                    result.act_outcome = Some(ActOutcome::Failed);
                    return Ok(result);
                };
                let (data, outcome) = match self.page.act(instruction).await {
                    Ok(data) => (data, ActOutcome::Applied),
                    Err(e) => {
                        info!(instruction, error = %e, "act failed but continuing");
                        (
                            format!("Action attempted: {instruction}").into(),
                            ActOutcome::BestEffortNoOp,
                        )
                    }
                };
                let mut result = TaskResult::ok(self.page.url().await, data);
                result.act_outcome = Some(outcome);
                Ok(result)
            }
            TaskAction::Screenshot => {
                let request = ShotSpec {
                    filename: params.filename.as_deref(),
                    full_page: params.full_page == Some(true),
                    focus_element: params.focus_element.as_deref(),
                };
                let capture = self.capturer.capture(self.page.as_ref(), request).await?;
                let mut result = TaskResult::ok(self.page.url().await, capture.summary());
                result.screenshot_path = Some(capture.path);
                Ok(result)
            }
            TaskAction::Wait => {
                let wait = params
                    .wait_time
                    .map(Duration::from_millis)
                    .unwrap_or(self.default_wait);
                tokio::time::sleep(wait).await;
                Ok(TaskResult::ok(
                    self.page.url().await,
                    format!("Waited {}ms", wait.as_millis()),
                ))
            }
            TaskAction::Evaluate => {
                let code = params.code.as_deref().ok_or(ExplorerError::MissingParam {
                    action: "evaluate",
                    what: "Code",
                })?;
                let value = self.page.evaluate(code).await?;
                Ok(TaskResult::ok(self.page.url().await, value))
            }
            TaskAction::Type => {
                let (Some(selector), Some(text)) = (params.selector.as_deref(), params.text.as_deref())
                else {
                    return Err(ExplorerError::MissingParam {
                        action: "type",
                        what: "Selector and text",
                    });
                };
                let typed = async {
                    self.page
                        .wait_for_selector(selector, self.selector_timeout)
                        .await?;
                    self.page.focus(selector).await?;
                    self.page.type_text(selector, text).await
                }
                .await;
                match typed {
                    Ok(()) => Ok(TaskResult::ok(
                        self.page.url().await,
                        format!("Typed \"{text}\" into {selector}"),
                    )),
                    Err(e) => {
                        warn!(selector, error = %e, "type action failed");
                        let mut result =
                            TaskResult::failed(format!("Failed to type into {selector}: {e}"));
                        result.current_url = Some(self.page.url().await);
                        Ok(result)
                    }
                }
            }
            TaskAction::Other(name) => {
                let mut result = TaskResult::failed(format!("Unknown action: {name}"));
                result.current_url = Some(self.page.url().await);
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ActScript, PageState, ScriptedPage};
    use serde_json::json;

    fn executor(page: &Arc<ScriptedPage>, dir: &std::path::Path) -> TaskExecutor {
        TaskExecutor::new(
            Arc::clone(page) as Arc<dyn Page>,
            dir,
            &ExplorerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_stops_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let page = Arc::new(ScriptedPage::new("about:blank"));
        let mut exec = executor(&page, dir.path());

        let tasks = [
            Task::navigate("Open homepage", "https://x.com/"),
            Task::act("Open sign in", "click the sign in button"),
            Task::type_text("Enter email", "#email", "demo@example.com"),
            Task::screenshot("Capture form", None),
        ];
        let results = exec.execute_all(&tasks).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success && results[1].success);
        assert!(!results[2].success);
        assert!(
            results[2]
                .error
                .as_deref()
                .unwrap()
                .starts_with("Failed to type into #email")
        );
        assert!(!page.calls().iter().any(|c| c == "screenshot"));
    }

    #[tokio::test]
    async fn act_errors_are_downgraded() {
        let dir = tempfile::tempdir().unwrap();
        let page = Arc::new(ScriptedPage::new("https://x.com/"));
        page.push_act(ActScript::Fail("no matching element".into()));
        page.push_act(ActScript::Goto(PageState::new("https://x.com/login", "Log in", "")));
        let mut exec = executor(&page, dir.path());

        let tasks = [
            Task::act("Find pricing", "open the pricing page"),
            Task::act("Find login", "click log in"),
        ];
        let results = exec.execute_all(&tasks).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].act_outcome, Some(ActOutcome::BestEffortNoOp));
        assert_eq!(
            results[0].data,
            Some(json!("Action attempted: open the pricing page"))
        );
        assert_eq!(results[1].act_outcome, Some(ActOutcome::Applied));
        assert_eq!(results[1].current_url.as_deref(), Some("https://x.com/login"));
    }

    #[tokio::test]
    async fn malformed_tasks_fail() {
        let dir = tempfile::tempdir().unwrap();
        let page = Arc::new(ScriptedPage::new("https://x.com/"));
        let mut exec = executor(&page, dir.path());

        let mut hover: Task = Task::wait("hover", 0);
        hover.action = TaskAction::Other("hover".into());
        let unknown = exec.execute(&hover).await;
        assert!(!unknown.success);
        assert_eq!(unknown.error.as_deref(), Some("Unknown action: hover"));

        let mut nav = Task::navigate("nowhere", "");
        nav.params.url = None;
        let missing = exec.execute(&nav).await;
        assert_eq!(
            missing.error.as_deref(),
            Some("URL required for navigate action")
        );

        let mut act = Task::act("nothing", "");
        act.params.instruction = None;
        let act = exec.execute(&act).await;
        assert!(!act.success);
        assert_eq!(act.act_outcome, Some(ActOutcome::Failed));
    }

    #[tokio::test]
    async fn navigation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let page = Arc::new(ScriptedPage::new("about:blank"));
        page.fail_navigation("net::ERR_NAME_NOT_RESOLVED");
        let mut exec = executor(&page, dir.path());

        let results = exec
            .execute_all(&[
                Task::navigate("Open", "https://nope.invalid/"),
                Task::screenshot("Never", None),
            ])
            .await;

        assert_eq!(results.len(), 1);
        assert!(
            results[0]
                .error
                .as_deref()
                .unwrap()
                .contains("ERR_NAME_NOT_RESOLVED")
        );
        assert_eq!(results[0].current_url.as_deref(), Some("about:blank"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_defaults_to_three_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let page = Arc::new(ScriptedPage::new("https://x.com/"));
        let mut exec = executor(&page, dir.path());

        let mut task = Task::wait("settle", 0);
        task.params.wait_time = None;
        let started = tokio::time::Instant::now();
        let result = exec.execute(&task).await;

        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(3000) && waited < Duration::from_millis(3100));
        assert_eq!(result.data, Some(json!("Waited 3000ms")));
    }

    #[tokio::test]
    async fn evaluate_and_type_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let page = Arc::new(ScriptedPage::new("https://x.com/"));
        page.set_eval("document.title", json!("X - Home"));
        page.add_selector("#search");
        let mut exec = executor(&page, dir.path());

        let results = exec
            .execute_all(&[
                Task::evaluate("Read title", "document.title"),
                Task::type_text("Search", "#search", "pricing"),
                Task::screenshot("Capture", Some("search.png")),
            ])
            .await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[0].data, Some(json!("X - Home")));
        assert_eq!(
            results[2].screenshot_path.as_deref(),
            Some(dir.path().join("search.png").as_path())
        );
        let calls = page.calls();
        assert!(calls.contains(&"focus #search".to_string()));
        assert!(calls.contains(&"type #search pricing".to_string()));
    }
}
