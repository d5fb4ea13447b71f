//! Boundary to the remote browser.
//!
//! The explorer treats the browser as an RPC-style page handle. Everything
//! above this module talks to `dyn Page`; the Chrome DevTools implementation
//! lives in [`crate::chrome`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrowserError;

/// Bounding box of an element in CSS pixels, relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementBox {
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// Crop rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotMode {
    Viewport,
    FullPage,
    Clip(ClipRect),
}

/// A live page in a remote browser. One session owns one page.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates and waits for the DOM to be ready, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Hands a natural-language instruction to the AI action layer.
    async fn act(&self, instruction: &str) -> Result<Value, BrowserError>;

    /// PNG bytes.
    async fn screenshot(&self, mode: ShotMode) -> Result<Vec<u8>, BrowserError>;

    async fn evaluate(&self, code: &str) -> Result<Value, BrowserError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
    -> Result<(), BrowserError>;

    async fn focus(&self, selector: &str) -> Result<(), BrowserError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    /// `None` when nothing matches the selector.
    async fn element_box(&self, selector: &str) -> Result<Option<ElementBox>, BrowserError>;

    async fn viewport(&self) -> Result<ViewportSize, BrowserError>;

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn url(&self) -> String;

    async fn title(&self) -> Result<String, BrowserError>;

    async fn body_text(&self) -> Result<String, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;

    /// Where a human can watch (and interact with) the page, if anywhere.
    fn live_view_url(&self) -> Option<String> {
        None
    }
}

/// Acquires a fresh page for a session.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Page>, BrowserError>;
}

/// Scoped ownership of a launched page.
///
/// Call [`PageLease::release`] on the normal path. A lease dropped without
/// being released (early return, panic unwinding through a task) schedules
/// the close on the current runtime so the remote session is not leaked.
pub struct PageLease {
    page: Arc<dyn Page>,
    released: bool,
}

impl PageLease {
    pub fn new(page: Arc<dyn Page>) -> Self {
        Self {
            page,
            released: false,
        }
    }

    pub fn page(&self) -> &Arc<dyn Page> {
        &self.page
    }

    pub async fn release(mut self) -> Result<(), BrowserError> {
        self.released = true;
        self.page.close().await
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!("page lease dropped without release, closing in background");
        let page = Arc::clone(&self.page);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::error!(error = %e, "failed to close leaked page");
                    }
                });
            }
            Err(_) => tracing::error!("no runtime available to close leaked page"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPage;

    #[tokio::test]
    async fn released_lease_closes_the_page_once() {
        let page = Arc::new(ScriptedPage::new("about:blank"));
        let lease = PageLease::new(Arc::clone(&page) as Arc<dyn Page>);

        lease.release().await.unwrap();
        tokio::task::yield_now().await;

        assert!(page.is_closed());
        let closes = page.calls().iter().filter(|c| *c == "close").count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn dropped_lease_closes_the_page_in_the_background() {
        let page = Arc::new(ScriptedPage::new("about:blank"));
        let lease = PageLease::new(Arc::clone(&page) as Arc<dyn Page>);

        drop(lease);
        assert!(!page.is_closed());
        for _ in 0..10 {
            if page.is_closed() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(page.is_closed());
    }
}
