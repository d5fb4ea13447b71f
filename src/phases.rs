//! The fixed task plans that make up one exploration run.

use crate::dom::{SCROLL_HEIGHT_JS, click_first_visible_script, scroll_to_script};
use crate::types::{AUTH_PAGE_POSITION, AUTH_TIMEOUT_POSITION, FULL_PAGE_POSITION, Task};

pub const SIGN_IN_INSTRUCTION: &str = "find and click the sign in, login, or get started button";
pub const ALTERNATIVE_AUTH_INSTRUCTION: &str =
    "look for Google sign-in, continue with Google, or social login options";
pub const FEATURE_SCROLL_INSTRUCTION: &str = "scroll down slowly to see more content";
pub const AUTHED_SCROLL_INSTRUCTION: &str = "scroll down to see more content";

/// Candidates for the focused crop of the sign-in form, tried in order.
pub const LOGIN_FORM_SELECTORS: &str = "form, .login-form, .auth-form, .signin-form";

/// Conventional sign-in links, clicked when the AI click has no effect.
pub const SIGN_IN_LINK_SELECTORS: [&str; 2] = [
    r#"a[href*="login"], a[href*="signin"], a[href*="sign-in"]"#,
    ".signin, .login, .sign-in",
];

/// Fractions of the page height captured during feature discovery.
pub const SECTION_OFFSETS: [f64; 3] = [0.3, 0.6, 0.9];

/// Within-phase progress checkpoints.
pub const STARTED: u8 = 10;
pub const FIRST_STEP: u8 = 30;
pub const CAPTURED: u8 = 60;
pub const FINISHED: u8 = 100;

/// Scroll position recorded for the capture after an AI-driven scroll.
const AI_SCROLL_POSITION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Homepage,
    Authentication,
    Features,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 3] = [
        PhaseKind::Homepage,
        PhaseKind::Authentication,
        PhaseKind::Features,
    ];

    pub fn id(self) -> &'static str {
        match self {
            PhaseKind::Homepage => "homepage",
            PhaseKind::Authentication => "auth",
            PhaseKind::Features => "features",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Homepage => "Homepage Analysis",
            PhaseKind::Authentication => "Authentication Flow Discovery",
            PhaseKind::Features => "Feature Discovery",
        }
    }

    fn index(self) -> u32 {
        match self {
            PhaseKind::Homepage => 0,
            PhaseKind::Authentication => 1,
            PhaseKind::Features => 2,
        }
    }

    /// Session-wide percentage for `percent` of this phase, with every
    /// phase weighted equally.
    pub fn overall(self, percent: u8) -> u8 {
        let total = PhaseKind::ALL.len() as u32;
        let done = self.index() * 100 + u32::from(percent.min(100));
        (done / total) as u8
    }
}

/// A task plus where on the page its screenshot (if any) was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub task: Task,
    pub scroll_position: i64,
}

impl PlannedTask {
    fn at(task: Task, scroll_position: i64) -> Self {
        Self {
            task,
            scroll_position,
        }
    }
}

impl From<Task> for PlannedTask {
    fn from(task: Task) -> Self {
        Self::at(task, 0)
    }
}

pub fn homepage_load(url: &str) -> Vec<PlannedTask> {
    vec![
        Task::navigate("Open homepage", url).into(),
        Task::wait("Let the homepage settle", 3000).into(),
    ]
}

pub fn homepage_captures() -> Vec<PlannedTask> {
    vec![
        Task::screenshot("Homepage - initial view", Some("homepage-viewport.png")).into(),
        PlannedTask::at(
            Task::screenshot("Homepage - full page", Some("homepage-full.png")).full_page(),
            FULL_PAGE_POSITION,
        ),
    ]
}

pub fn measure_page() -> Vec<PlannedTask> {
    vec![Task::evaluate("Measure page height", SCROLL_HEIGHT_JS).into()]
}

pub fn sign_in_entry() -> Vec<PlannedTask> {
    vec![
        Task::act("Open the sign-in flow", SIGN_IN_INSTRUCTION).into(),
        Task::wait("Let the sign-in page load", 3000).into(),
    ]
}

pub fn sign_in_fallback() -> Vec<PlannedTask> {
    vec![
        Task::evaluate(
            "Click a sign-in link",
            click_first_visible_script(&SIGN_IN_LINK_SELECTORS),
        )
        .into(),
    ]
}

pub fn sign_in_settle() -> Vec<PlannedTask> {
    vec![Task::wait("Let the sign-in page load", 3000).into()]
}

pub fn auth_page_captures() -> Vec<PlannedTask> {
    vec![
        PlannedTask::at(
            Task::screenshot("Authentication page", Some("auth-page.png")),
            AUTH_PAGE_POSITION,
        ),
        PlannedTask::at(
            Task::screenshot("Authentication form", Some("auth-form.png")).focus(LOGIN_FORM_SELECTORS),
            AUTH_PAGE_POSITION,
        ),
        Task::act("Look for alternative sign-in methods", ALTERNATIVE_AUTH_INSTRUCTION).into(),
        PlannedTask::at(
            Task::screenshot("Alternative sign-in methods", Some("auth-options.png")),
            AUTH_PAGE_POSITION,
        ),
    ]
}

pub fn auth_timeout_capture() -> Vec<PlannedTask> {
    vec![PlannedTask::at(
        Task::screenshot("Authentication timeout - current page state", Some("auth-timeout.png")),
        AUTH_TIMEOUT_POSITION,
    )]
}

pub fn authenticated_captures() -> Vec<PlannedTask> {
    vec![
        Task::screenshot("Authenticated content - initial view", Some("authenticated.png")).into(),
        Task::act("Scroll through authenticated content", AUTHED_SCROLL_INSTRUCTION).into(),
        Task::wait("Let content settle", 3000).into(),
        PlannedTask::at(
            Task::screenshot("Authenticated content - AI-guided scroll view", Some("authenticated-scroll.png")),
            AI_SCROLL_POSITION,
        ),
        PlannedTask::at(
            Task::screenshot("Authenticated content - full page", Some("authenticated-full.png")).full_page(),
            FULL_PAGE_POSITION,
        ),
    ]
}

pub fn feature_scroll() -> Vec<PlannedTask> {
    vec![
        Task::act("Scroll through the page", FEATURE_SCROLL_INSTRUCTION).into(),
        Task::wait("Let content settle", 2000).into(),
        PlannedTask::at(
            Task::screenshot("AI-guided scroll - content after scrolling", Some("features-scroll.png")),
            AI_SCROLL_POSITION,
        ),
    ]
}

/// Scroll-and-capture steps at each of [`SECTION_OFFSETS`] of `total_height`.
pub fn section_captures(total_height: u64) -> Vec<PlannedTask> {
    let mut tasks = Vec::new();
    for (i, fraction) in SECTION_OFFSETS.iter().enumerate() {
        let y = (total_height as f64 * fraction).floor() as u64;
        let section = i + 2;
        let percent = (fraction * 100.0).round() as u32;
        tasks.push(Task::evaluate(format!("Scroll to section {section}"), scroll_to_script(y)).into());
        tasks.push(Task::wait("Let section settle", 2000).into());
        tasks.push(PlannedTask::at(
            Task::screenshot(
                format!("Section {section} - {percent}% down page"),
                Some(&format!("section-{section}.png")),
            ),
            y as i64,
        ));
    }
    tasks
}

pub fn feature_full_page() -> Vec<PlannedTask> {
    vec![PlannedTask::at(
        Task::screenshot("Full page overview", Some("features-full.png")).full_page(),
        FULL_PAGE_POSITION,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskAction;

    #[test]
    fn phases_are_weighted_equally() {
        assert_eq!(PhaseKind::Homepage.overall(0), 0);
        assert_eq!(PhaseKind::Homepage.overall(100), 33);
        assert_eq!(PhaseKind::Authentication.overall(STARTED), 36);
        assert_eq!(PhaseKind::Authentication.overall(FINISHED), 66);
        assert_eq!(PhaseKind::Features.overall(FINISHED), 100);
    }

    #[test]
    fn sections_follow_page_height() {
        let tasks = section_captures(5000);
        let shots: Vec<_> = tasks
            .iter()
            .filter(|t| t.task.action == TaskAction::Screenshot)
            .collect();
        assert_eq!(shots.len(), 3);
        assert_eq!(
            shots.iter().map(|t| t.scroll_position).collect::<Vec<_>>(),
            vec![1500, 3000, 4500]
        );
        assert_eq!(shots[1].task.description, "Section 3 - 60% down page");
        assert_eq!(
            tasks[0].task.params.code.as_deref(),
            Some("window.scrollTo(0, 1500)")
        );
    }

    #[test]
    fn auth_captures_are_tagged_as_auth_page() {
        let form = &auth_page_captures()[1];
        assert_eq!(form.scroll_position, AUTH_PAGE_POSITION);
        assert_eq!(form.task.params.focus_element.as_deref(), Some(LOGIN_FORM_SELECTORS));
    }
}
