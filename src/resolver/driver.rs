//! Browser driver seam.
//!
//! Everything the resolver and flow need from a browser goes through the
//! [`Driver`] trait, keyed by opaque element handles. Production uses
//! [`CdpDriver`] over a chromiumoxide [`Page`]; integration tests substitute
//! a scripted fake so the whole listing flow runs without a browser.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::{Element, Page};
use rand::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::resolver::{text_xpath_variants, Selector};
use crate::stealth;

/// Opaque handle to a located element, valid for the current document.
pub type ElementId = u64;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Locate the first element matching `selector`, if any.
    async fn find(&self, selector: &Selector) -> Option<ElementId>;

    /// Whether the element currently occupies visible layout space.
    async fn is_visible(&self, el: ElementId) -> bool;

    /// Bring the element into the viewport.
    async fn prepare(&self, el: ElementId) -> Result<(), ResolveError>;

    async fn click_js(&self, el: ElementId) -> Result<(), ResolveError>;
    async fn click_native(&self, el: ElementId) -> Result<(), ResolveError>;
    async fn click_pointer(&self, el: ElementId) -> Result<(), ResolveError>;

    /// Focus the element and empty its current value.
    async fn clear(&self, el: ElementId) -> Result<(), ResolveError>;
    async fn type_char(&self, el: ElementId, c: char) -> Result<(), ResolveError>;
    async fn press_backspace(&self, el: ElementId) -> Result<(), ResolveError>;
    /// Current value of an input/textarea (text content for anything else).
    async fn field_value(&self, el: ElementId) -> Option<String>;
    /// Set the value in one shot through the DOM, firing input/change events.
    async fn set_value_direct(&self, el: ElementId, text: &str) -> Result<(), ResolveError>;

    /// Attach a local file to a file input.
    async fn attach_file(&self, el: ElementId, path: &Path) -> Result<(), ResolveError>;

    async fn current_url(&self) -> String;
    async fn navigate(&self, url: &str) -> Result<(), ResolveError>;
    /// Send an Escape key to the page (not to a specific element).
    async fn press_escape(&self);
    /// Full visible text of the page body.
    async fn page_text(&self) -> String;
    /// Trimmed visible texts of candidate pick targets (li/div/button).
    async fn candidate_texts(&self) -> Vec<String>;
}

/// [`Driver`] over a live CDP page.
pub struct CdpDriver {
    page: Page,
    elements: Mutex<HashMap<ElementId, Arc<Element>>>,
    next_id: AtomicU64,
}

impl CdpDriver {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            elements: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    async fn register(&self, element: Element) -> ElementId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.elements.lock().await.insert(id, Arc::new(element));
        id
    }

    async fn element(&self, id: ElementId) -> Result<Arc<Element>, ResolveError> {
        self.elements
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(ResolveError::NotFound)
    }

    /// Center of the element's bounding rect in viewport coordinates.
    async fn center(&self, el: &Element) -> Result<(f64, f64), ResolveError> {
        let returns = el
            .call_js_fn(
                "function() { \
                     const r = this.getBoundingClientRect(); \
                     return JSON.stringify({ x: r.x + r.width / 2, y: r.y + r.height / 2 }); \
                 }",
                false,
            )
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        let raw = returns
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| ResolveError::NotInteractable("no bounding rect".into()))?;
        let point: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        match (point["x"].as_f64(), point["y"].as_f64()) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(ResolveError::NotInteractable("degenerate rect".into())),
        }
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn find(&self, selector: &Selector) -> Option<ElementId> {
        let element = match selector {
            Selector::Id(id) => self.page.find_element(format!("#{}", id)).await.ok(),
            Selector::Css(css) => self.page.find_element(css.clone()).await.ok(),
            Selector::XPath(xpath) => self.page.find_xpath(xpath.clone()).await.ok(),
            Selector::Text(text) => {
                let mut found = None;
                for variant in text_xpath_variants(text) {
                    if let Ok(el) = self.page.find_xpath(variant).await {
                        found = Some(el);
                        break;
                    }
                }
                found
            }
        }?;
        Some(self.register(element).await)
    }

    async fn is_visible(&self, el: ElementId) -> bool {
        let Ok(el) = self.element(el).await else {
            return false;
        };
        let returns = el
            .call_js_fn(
                "function() { \
                     const r = this.getBoundingClientRect(); \
                     const s = window.getComputedStyle(this); \
                     return r.width > 0 && r.height > 0 \
                         && s.visibility !== 'hidden' && s.display !== 'none'; \
                 }",
                false,
            )
            .await;
        matches!(
            returns.map(|r| r.result.value),
            Ok(Some(serde_json::Value::Bool(true)))
        )
    }

    async fn prepare(&self, el: ElementId) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        el.scroll_into_view()
            .await
            .map_err(|e| ResolveError::NotInteractable(e.to_string()))?;
        Ok(())
    }

    async fn click_js(&self, el: ElementId) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        el.call_js_fn("function() { this.click(); }", false)
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn click_native(&self, el: ElementId) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        el.click()
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn click_pointer(&self, el: ElementId) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        let (x, y) = self.center(&el).await?;
        let move_ev = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build()
            .map_err(ResolveError::Interaction)?;
        let press = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(ResolveError::Interaction)?;
        let release = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(ResolveError::Interaction)?;
        self.page
            .execute(move_ev)
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        self.page
            .execute(press)
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        // Real clicks hold the button for a beat.
        let hold = rand::rng().random_range(40..=120);
        tokio::time::sleep(Duration::from_millis(hold)).await;
        self.page
            .execute(release)
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self, el: ElementId) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        el.call_js_fn(
            "function() { \
                 this.focus(); \
                 if ('value' in this) { \
                     this.value = ''; \
                     this.dispatchEvent(new Event('input', { bubbles: true })); \
                 } \
             }",
            false,
        )
        .await
        .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn type_char(&self, el: ElementId, c: char) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        el.type_str(c.to_string())
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn press_backspace(&self, el: ElementId) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        el.press_key("Backspace")
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn field_value(&self, el: ElementId) -> Option<String> {
        let el = self.element(el).await.ok()?;
        let returns = el
            .call_js_fn(
                "function() { \
                     return ('value' in this) ? String(this.value) : (this.textContent || ''); \
                 }",
                false,
            )
            .await
            .ok()?;
        returns
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    async fn set_value_direct(&self, el: ElementId, text: &str) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        // Embed the text as a JSON string literal; frameworks that shadow the
        // value setter are bypassed via the prototype descriptor.
        let literal = serde_json::to_string(text)
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        let decl = format!(
            "function() {{ \
                 const v = {literal}; \
                 if ('value' in this) {{ \
                     const proto = Object.getPrototypeOf(this); \
                     const desc = Object.getOwnPropertyDescriptor(proto, 'value'); \
                     if (desc && desc.set) {{ desc.set.call(this, v); }} else {{ this.value = v; }} \
                     this.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                     this.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 }} else {{ \
                     this.textContent = v; \
                 }} \
             }}"
        );
        el.call_js_fn(decl, false)
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn attach_file(&self, el: ElementId, path: &Path) -> Result<(), ResolveError> {
        let el = self.element(el).await?;
        let params = SetFileInputFilesParams::builder()
            .file(path.to_string_lossy().to_string())
            .backend_node_id(el.backend_node_id.clone())
            .build()
            .map_err(ResolveError::Interaction)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> String {
        match self.page.url().await {
            Ok(Some(url)) => url,
            _ => String::new(),
        }
    }

    async fn navigate(&self, url: &str) -> Result<(), ResolveError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| ResolveError::Interaction(e.to_string()))?;
        // Launched browsers get this via the new-document hook already;
        // attached ones may not, so re-apply after every navigation.
        stealth::apply(&self.page).await;
        // Handles from the previous document are dead now.
        self.elements.lock().await.clear();
        debug!("driver: navigated to {}", url);
        Ok(())
    }

    async fn press_escape(&self) {
        for ev_type in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(ev_type)
                .key("Escape")
                .code("Escape")
                .windows_virtual_key_code(27)
                .build();
            match params {
                Ok(p) => {
                    if let Err(e) = self.page.execute(p).await {
                        warn!("driver: escape dispatch failed: {}", e);
                        return;
                    }
                }
                Err(e) => {
                    warn!("driver: escape params invalid: {}", e);
                    return;
                }
            }
        }
    }

    async fn page_text(&self) -> String {
        self.page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .unwrap_or_default()
    }

    async fn candidate_texts(&self) -> Vec<String> {
        self.page
            .evaluate(
                "Array.from(document.querySelectorAll('li, div, button')) \
                     .filter(el => { \
                         const r = el.getBoundingClientRect(); \
                         const s = window.getComputedStyle(el); \
                         return r.width > 0 && r.height > 0 && s.visibility !== 'hidden'; \
                     }) \
                     .map(el => (el.innerText || '').trim()) \
                     .filter(t => t.length > 0 && t.length < 60)",
            )
            .await
            .ok()
            .and_then(|v| v.into_value::<Vec<String>>().ok())
            .unwrap_or_default()
    }
}
