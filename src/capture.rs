//! Screenshot capture with optional element-focused cropping.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::page::{ClipRect, ElementBox, Page, ShotMode, ViewportSize};

/// Context kept around a focused element, in CSS pixels.
pub const FOCUS_PADDING: f64 = 50.0;
/// Crops smaller than this on either side fall back to the viewport.
pub const MIN_CLIP_SIZE: u32 = 100;

/// Expands `element` by `padding`, clamps it to the viewport and rejects
/// results narrower or shorter than `min_size`.
pub fn compute_clip(
    element: &ElementBox,
    viewport: ViewportSize,
    padding: f64,
    min_size: u32,
) -> Option<ClipRect> {
    let x = (element.x - padding).floor().max(0.0);
    let y = (element.y - padding).floor().max(0.0);
    let width = (element.width + padding * 2.0)
        .floor()
        .min(f64::from(viewport.width) - x);
    let height = (element.height + padding * 2.0)
        .floor()
        .min(f64::from(viewport.height) - y);

    let min = f64::from(min_size);
    if width < min || height < min {
        return None;
    }

    Some(ClipRect {
        x: x as u32,
        y: y as u32,
        width: width as u32,
        height: height as u32,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureMode {
    FullPage,
    Focused { selector: String },
    Viewport,
}

#[derive(Debug, Clone, Default)]
pub struct ShotSpec<'a> {
    pub filename: Option<&'a str>,
    pub full_page: bool,
    pub focus_element: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Capture {
    pub path: PathBuf,
    pub filename: String,
    pub mode: CaptureMode,
}

impl Capture {
    pub fn summary(&self) -> String {
        let how = match &self.mode {
            CaptureMode::FullPage => "full-page".to_string(),
            CaptureMode::Focused { selector } => format!("focused on {selector}"),
            CaptureMode::Viewport => "viewport".to_string(),
        };
        format!("Screenshot saved: {} ({how})", self.filename)
    }
}

/// Writes numbered PNG captures into one session directory.
pub struct ScreenshotCapturer {
    dir: PathBuf,
    counter: usize,
}

impl ScreenshotCapturer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn capture(&mut self, page: &dyn Page, request: ShotSpec<'_>) -> Result<Capture> {
        self.counter += 1;
        let filename = request
            .filename
            .and_then(bare_file_name)
            .unwrap_or_else(|| format!("step-{}-screenshot.png", self.counter));

        let (shot, mode) = if request.full_page {
            (ShotMode::FullPage, CaptureMode::FullPage)
        } else if let Some(focus) = request.focus_element {
            match locate_focus(page, focus).await {
                Some((selector, clip)) => (ShotMode::Clip(clip), CaptureMode::Focused { selector }),
                None => {
                    info!(selectors = focus, "no usable focus element, taking viewport screenshot");
                    (ShotMode::Viewport, CaptureMode::Viewport)
                }
            }
        } else {
            (ShotMode::Viewport, CaptureMode::Viewport)
        };

        let bytes = page.screenshot(shot).await?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&filename);
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "screenshot written");

        Ok(Capture {
            path,
            filename,
            mode,
        })
    }
}

/// First selector in the comma separated list whose element yields a usable crop.
async fn locate_focus(page: &dyn Page, selectors: &str) -> Option<(String, ClipRect)> {
    for selector in selectors.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let element = match page.element_box(selector).await {
            Ok(Some(b)) if b.has_area() => b,
            Ok(_) => continue,
            Err(e) => {
                debug!(selector, error = %e, "focus selector lookup failed");
                continue;
            }
        };
        let Ok(viewport) = page.viewport().await else {
            continue;
        };
        if let Some(clip) = compute_clip(&element, viewport, FOCUS_PADDING, MIN_CLIP_SIZE) {
            debug!(selector, ?clip, "found focus element");
            return Some((selector.to_string(), clip));
        }
    }
    None
}

fn bare_file_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPage;

    const VIEWPORT: ViewportSize = ViewportSize {
        width: 1280,
        height: 720,
    };

    fn bx(x: f64, y: f64, width: f64, height: f64) -> ElementBox {
        ElementBox {
            x,
            y,
            width,
            height,
        }
    }

    fn assert_inside(clip: ClipRect, viewport: ViewportSize) {
        assert!(clip.x + clip.width <= viewport.width, "{clip:?}");
        assert!(clip.y + clip.height <= viewport.height, "{clip:?}");
    }

    #[test]
    fn clip_pads_element_inside_viewport() {
        let clip = compute_clip(&bx(200.0, 100.0, 300.0, 80.0), VIEWPORT, 50.0, 100).unwrap();
        assert_eq!(
            clip,
            ClipRect {
                x: 150,
                y: 50,
                width: 400,
                height: 180
            }
        );
    }

    #[test]
    fn clip_is_clamped_at_every_edge() {
        let cases = [
            bx(10.0, 5.0, 200.0, 200.0),
            bx(1200.0, 600.0, 300.0, 300.0),
            bx(-400.0, -20.0, 900.0, 150.0),
            bx(0.0, 0.0, 1280.0, 720.0),
            bx(1100.5, 10.25, 179.5, 700.75),
        ];
        for element in cases {
            if let Some(clip) = compute_clip(&element, VIEWPORT, 50.0, 100) {
                assert_inside(clip, VIEWPORT);
                assert!(clip.width >= 100 && clip.height >= 100);
            }
        }
    }

    #[test]
    fn degenerate_clips_are_rejected() {
        // Mostly off-screen to the right: only 30px remain visible.
        assert_eq!(
            compute_clip(&bx(1300.0, 100.0, 200.0, 200.0), VIEWPORT, 50.0, 100),
            None
        );
        // Hugging the bottom edge.
        assert_eq!(
            compute_clip(&bx(100.0, 690.0, 200.0, 200.0), VIEWPORT, 50.0, 100),
            None
        );
        // Fully outside.
        assert_eq!(
            compute_clip(&bx(5000.0, 5000.0, 200.0, 200.0), VIEWPORT, 50.0, 100),
            None
        );
    }

    #[tokio::test]
    async fn screenshots_are_auto_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let page = ScriptedPage::new("https://example.com");
        let mut capturer = ScreenshotCapturer::new(dir.path());

        let first = capturer.capture(&page, ShotSpec::default()).await.unwrap();
        let named = capturer
            .capture(
                &page,
                ShotSpec {
                    filename: Some("../../escape/hero.png"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let third = capturer.capture(&page, ShotSpec::default()).await.unwrap();

        assert_eq!(first.filename, "step-1-screenshot.png");
        assert_eq!(named.path, dir.path().join("hero.png"));
        assert_eq!(third.filename, "step-3-screenshot.png");
        assert!(first.path.exists() && named.path.exists() && third.path.exists());
    }

    #[tokio::test]
    async fn full_page_wins_over_focus() {
        let dir = tempfile::tempdir().unwrap();
        let page = ScriptedPage::new("https://example.com");
        page.set_box("nav", bx(0.0, 0.0, 1280.0, 80.0));
        let mut capturer = ScreenshotCapturer::new(dir.path());

        let capture = capturer
            .capture(
                &page,
                ShotSpec {
                    full_page: true,
                    focus_element: Some("nav"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(capture.mode, CaptureMode::FullPage);
        assert_eq!(page.shots(), vec![ShotMode::FullPage]);
    }

    #[tokio::test]
    async fn focus_uses_first_selector_with_a_usable_box() {
        let dir = tempfile::tempdir().unwrap();
        let page = ScriptedPage::new("https://example.com");
        page.set_box("header", bx(0.0, 0.0, 0.0, 0.0));
        page.set_box("form", bx(400.0, 200.0, 300.0, 250.0));
        let mut capturer = ScreenshotCapturer::new(dir.path());

        let capture = capturer
            .capture(
                &page,
                ShotSpec {
                    focus_element: Some("nav, header, form"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            capture.mode,
            CaptureMode::Focused {
                selector: "form".into()
            }
        );
        assert_eq!(
            page.shots(),
            vec![ShotMode::Clip(ClipRect {
                x: 350,
                y: 150,
                width: 400,
                height: 350
            })]
        );
        assert!(capture.summary().contains("focused on form"));
    }

    #[tokio::test]
    async fn unusable_focus_falls_back_to_viewport() {
        let dir = tempfile::tempdir().unwrap();
        let page = ScriptedPage::new("https://example.com");
        page.set_box(".login-form", bx(10.0, 10.0, 0.0, 40.0));
        let mut capturer = ScreenshotCapturer::new(dir.path());

        let capture = capturer
            .capture(
                &page,
                ShotSpec {
                    focus_element: Some("form, .login-form"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(capture.mode, CaptureMode::Viewport);
        assert_eq!(page.shots(), vec![ShotMode::Viewport]);
    }
}
