//! In-page JavaScript helpers evaluated through a Chrome tab.
//!
//! All functions block; callers run them inside `spawn_blocking`.

use std::sync::Arc;

use headless_chrome::Tab;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::BrowserError;
use crate::page::{ElementBox, ViewportSize};

pub const DOM_SNAPSHOT_MAX_CHARS: usize = 4000;

/// Produces a compact text view of the visible page for the planner.
///
/// Read-only apart from tagging interactive elements with sequential
/// `data-eid` attributes (`[e0]`, `[e1]`, ...) so planned steps can target
/// them with `[data-eid="[eN]"]`. Skips script/style/svg and invisible
/// nodes, stops at depth 15, and emits one line per element.
const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK']);
  let id = 0;
  const lines = [];
  const seen = new Set();

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function walk(node, depth) {
    if (depth > 15) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName)) continue;
      if (!isVisible(child)) continue;
      const tag = child.tagName.toLowerCase();
      const interactive = ['a','button','input','textarea','select'].includes(tag);

      if (interactive) {
        const eid = '[e' + (id++) + ']';
        child.setAttribute('data-eid', eid);
        let desc = '';
        if (tag === 'a') {
          desc = eid + ' link "' + (child.textContent||'').trim().slice(0,60) + '"';
          const href = child.getAttribute('href');
          if (href) desc += ' href=' + href.slice(0,80);
        } else if (tag === 'input' || tag === 'textarea') {
          desc = eid + ' ' + tag + ' type=' + (child.type||'text') + ' placeholder="' + (child.placeholder||'') + '"';
          if (child.name) desc += ' name=' + child.name;
        } else if (tag === 'button') {
          desc = eid + ' button "' + (child.textContent||'').trim().slice(0,60) + '"';
        } else if (tag === 'select') {
          const opts = [...child.options].map(o => o.text.trim().slice(0,20)).join('|');
          desc = eid + ' select [' + opts + ']';
        }
        if (desc && !seen.has(desc)) {
          seen.add(desc);
          lines.push(desc);
        }
      } else {
        const text = child.textContent ? child.textContent.trim() : '';
        if (text && text.length > 2 && text.length < 200 && child.children.length === 0) {
          const t = text.slice(0, 100);
          if (!seen.has(t)) {
            seen.add(t);
            lines.push('  "' + t + '"');
          }
        }
      }
      walk(child, depth + 1);
    }
  }

  walk(document.body, 0);
  return lines.join('\n');
})()
"#;

const URL_JS: &str = "window.location.href";
const TITLE_JS: &str = "document.title";
const BODY_TEXT_JS: &str = "document.body ? document.body.innerText : ''";
const VIEWPORT_JS: &str =
    "JSON.stringify({ width: window.innerWidth, height: window.innerHeight })";
const DOCUMENT_SIZE_JS: &str = "JSON.stringify({ \
    width: Math.max(document.documentElement.scrollWidth, window.innerWidth), \
    height: Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement.scrollHeight) })";
pub const SCROLL_HEIGHT_JS: &str = "document.body.scrollHeight";

/// JS string literal for `s`, safe to splice into a script.
fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn eval_raw(tab: &Arc<Tab>, js: &str, await_promise: bool) -> Result<Option<Value>, BrowserError> {
    tab.evaluate(js, await_promise)
        .map(|obj| obj.value)
        .map_err(|e| BrowserError::Script(e.to_string()))
}

fn eval_string(tab: &Arc<Tab>, js: &str) -> Result<String, BrowserError> {
    Ok(eval_raw(tab, js, false)?
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

/// Evaluates a script that returns `JSON.stringify(..)` and decodes it.
fn eval_json<T: DeserializeOwned>(tab: &Arc<Tab>, js: &str) -> Result<T, BrowserError> {
    let raw = eval_string(tab, js)?;
    serde_json::from_str(&raw).map_err(|e| BrowserError::Script(format!("{e}: {raw}")))
}

pub fn capture_dom_snapshot(tab: &Arc<Tab>) -> Result<String, BrowserError> {
    let raw = eval_string(tab, SNAPSHOT_JS)?;
    let total = raw.chars().count();
    if total > DOM_SNAPSHOT_MAX_CHARS {
        let head: String = raw.chars().take(DOM_SNAPSHOT_MAX_CHARS).collect();
        Ok(format!("{head}\n... [truncated, {total} total chars]"))
    } else {
        Ok(raw)
    }
}

pub fn current_url(tab: &Arc<Tab>) -> Result<String, BrowserError> {
    eval_string(tab, URL_JS)
}

pub fn page_title(tab: &Arc<Tab>) -> Result<String, BrowserError> {
    eval_string(tab, TITLE_JS)
}

pub fn body_text(tab: &Arc<Tab>) -> Result<String, BrowserError> {
    eval_string(tab, BODY_TEXT_JS)
}

/// Runs arbitrary page code and returns its JSON value. Promises are awaited;
/// `undefined` and non-serialisable results come back as `null`.
pub fn evaluate(tab: &Arc<Tab>, code: &str) -> Result<Value, BrowserError> {
    let js = format!(
        "(async () => {{ const v = await ({code}); \
         try {{ return JSON.stringify(v === undefined ? null : v); }} catch (e) {{ return 'null'; }} }})()"
    );
    let raw = eval_raw(tab, &js, true)?
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "null".into());
    serde_json::from_str(&raw).map_err(|e| BrowserError::Script(e.to_string()))
}

pub fn element_box(tab: &Arc<Tab>, selector: &str) -> Result<Option<ElementBox>, BrowserError> {
    let js = format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return 'null'; \
         const r = el.getBoundingClientRect(); \
         return JSON.stringify({{ x: r.x, y: r.y, width: r.width, height: r.height }}); }})()",
        sel = js_str(selector)
    );
    eval_json(tab, &js)
}

pub fn exists(tab: &Arc<Tab>, selector: &str) -> Result<bool, BrowserError> {
    let js = format!("document.querySelector({}) !== null", js_str(selector));
    Ok(eval_raw(tab, &js, false)?
        .and_then(|v| v.as_bool())
        .unwrap_or(false))
}

pub fn viewport(tab: &Arc<Tab>) -> Result<ViewportSize, BrowserError> {
    eval_json(tab, VIEWPORT_JS)
}

/// Full scrollable document size in CSS pixels.
pub fn document_size(tab: &Arc<Tab>) -> Result<ViewportSize, BrowserError> {
    eval_json(tab, DOCUMENT_SIZE_JS)
}

/// Current window scroll offset, used to turn viewport-relative boxes into
/// document coordinates.
pub fn scroll_offset(tab: &Arc<Tab>) -> Result<(f64, f64), BrowserError> {
    eval_json(tab, "JSON.stringify([window.scrollX, window.scrollY])")
}

pub fn scroll_by(tab: &Arc<Tab>, pixels: i64) -> Result<(), BrowserError> {
    eval_raw(tab, &format!("window.scrollBy(0, {pixels})"), false).map(|_| ())
}

/// Clears an input's value before new text is typed into it.
pub fn clear_value(tab: &Arc<Tab>, selector: &str) -> Result<(), BrowserError> {
    let js = format!(
        "(() => {{ const el = document.querySelector({}); if (el && 'value' in el) el.value = ''; }})()",
        js_str(selector)
    );
    eval_raw(tab, &js, false).map(|_| ())
}

/// Page script that scrolls the window to an absolute offset.
pub fn scroll_to_script(y: u64) -> String {
    format!("window.scrollTo(0, {y})")
}

/// Page script that clicks the first visible match of any selector in
/// `selectors`, in order. Evaluates to `true` when something was clicked.
pub fn click_first_visible_script(selectors: &[&str]) -> String {
    let list = selectors
        .iter()
        .map(|s| js_str(s))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "(() => {{ for (const sel of [{list}]) {{ \
         let el = null; try {{ el = document.querySelector(sel); }} catch (e) {{ continue; }} \
         if (el && el.offsetParent !== null) {{ el.click(); return true; }} }} \
         return false; }})()"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_quoted_for_js() {
        assert_eq!(js_str(r#"a[href*="logout"]"#), r#""a[href*=\"logout\"]""#);
        assert_eq!(js_str("it's"), r#""it's""#);
    }

    #[test]
    fn scroll_script_uses_absolute_offset() {
        assert_eq!(scroll_to_script(1620), "window.scrollTo(0, 1620)");
    }

    #[test]
    fn click_script_tries_selectors_in_order() {
        let js = click_first_visible_script(&[r#"a[href*="login"]"#, ".signin"]);
        assert!(js.starts_with("(() =>"));
        assert!(js.contains(r#"for (const sel of ["a[href*=\"login\"]", ".signin"])"#));
        assert!(js.contains("offsetParent !== null"));
    }
}
