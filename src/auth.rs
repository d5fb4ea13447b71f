//! Sign-in detection and the wait for a human to finish logging in.
//!
//! Classification is a keyword heuristic over the page URL, title and body
//! text. It is approximate: a marketing page that happens to say "sign in"
//! looks like a login surface, and a login that lands somewhere without the
//! expected words goes unnoticed until the wait times out. Both are accepted.
//! [`PageClassifier`] is the seam for replacing it with a sturdier signal.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BrowserError;
use crate::page::Page;

/// Elements whose presence suggests a signed-in session.
pub const LOGOUT_SELECTOR: &str = r#"a[href*="logout"], .logout, [data-testid*="logout"]"#;

const LOGIN_URL_MARKERS: &[&str] = &["login", "signin", "auth"];
const LOGIN_TITLE_MARKERS: &[&str] = &["login", "sign in"];
const LOGIN_BODY_MARKERS: &[&str] = &["enter your password", "sign in"];
const AUTHED_URL_MARKERS: &[&str] = &["dashboard", "/app", "/home"];
const AUTHED_BODY_MARKERS: &[&str] = &["welcome", "dashboard"];

/// What the classifier gets to look at. Text fields are lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSignals {
    pub url: String,
    pub title: String,
    pub body_text: String,
    pub has_logout_element: bool,
}

impl PageSignals {
    pub fn new(url: &str, title: &str, body_text: &str, has_logout_element: bool) -> Self {
        Self {
            url: url.to_lowercase(),
            title: title.to_lowercase(),
            body_text: body_text.to_lowercase(),
            has_logout_element,
        }
    }

    pub async fn read(page: &dyn Page) -> Result<Self, BrowserError> {
        let url = page.url().await;
        let title = page.title().await?;
        let body = page.body_text().await?;
        let has_logout = page.exists(LOGOUT_SELECTOR).await?;
        Ok(Self::new(&url, &title, &body, has_logout))
    }
}

pub trait PageClassifier: Send + Sync {
    /// Still looking at a login or verification screen.
    fn is_login_surface(&self, signals: &PageSignals) -> bool;

    /// Showing something only a signed-in user would see.
    fn is_authenticated(&self, signals: &PageSignals) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

impl PageClassifier for KeywordClassifier {
    fn is_login_surface(&self, s: &PageSignals) -> bool {
        contains_any(&s.url, LOGIN_URL_MARKERS)
            || contains_any(&s.title, LOGIN_TITLE_MARKERS)
            || contains_any(&s.body_text, LOGIN_BODY_MARKERS)
    }

    fn is_authenticated(&self, s: &PageSignals) -> bool {
        contains_any(&s.url, AUTHED_URL_MARKERS)
            || contains_any(&s.body_text, AUTHED_BODY_MARKERS)
            || s.has_logout_element
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthWaitOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthWaitOutcome {
    fn completed(final_url: String) -> Self {
        Self {
            success: true,
            final_url: Some(final_url),
            error: None,
        }
    }

    fn stopped(error: &str) -> Self {
        Self {
            success: false,
            final_url: None,
            error: Some(error.to_string()),
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.error.as_deref() == Some("cancelled")
    }
}

/// Polls a page until it looks signed in, the deadline passes, or the
/// token is cancelled.
#[derive(Debug, Clone, Copy)]
pub struct AuthWaiter {
    pub timeout: Duration,
    pub interval: Duration,
}

impl AuthWaiter {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub async fn wait(
        &self,
        page: &dyn Page,
        classifier: &dyn PageClassifier,
        cancel: &CancellationToken,
    ) -> AuthWaitOutcome {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let initial_url = page.url().await;
        info!(url = %initial_url, timeout = ?self.timeout, "waiting for sign-in to complete");

        loop {
            match PageSignals::read(page).await {
                Ok(signals) => {
                    let on_login = classifier.is_login_surface(&signals);
                    let authed = classifier.is_authenticated(&signals);
                    let moved = signals.url != initial_url.to_lowercase();
                    debug!(on_login, authed, moved, "auth poll");
                    if !on_login && (moved || authed) {
                        let final_url = page.url().await;
                        info!(url = %final_url, elapsed = ?started.elapsed(), "sign-in detected");
                        return AuthWaitOutcome::completed(final_url);
                    }
                }
                Err(e) => warn!(error = %e, "could not read page during auth wait"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let nap = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("auth wait cancelled");
                    return AuthWaitOutcome::stopped("cancelled");
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }

        info!(elapsed = ?started.elapsed(), "auth wait timed out");
        AuthWaitOutcome::stopped("timeout")
    }
}
