//! Element resolution over a [`Driver`].
//!
//! Pages under automation change layout without notice, so nothing here
//! trusts a single selector. Each interaction takes a [`SelectorPlan`] of
//! ordered fallbacks, and clicking escalates through progressively more
//! literal strategies (JS `click()`, CDP native click, raw pointer events)
//! until one lands. Driver errors stop at this boundary: callers get a
//! plain `bool` and decide for themselves whether the miss is fatal.

pub mod driver;
pub mod typing;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use self::driver::{Driver, ElementId};
use self::typing::TypingPolicy;

/// Bound on the per-element wait for visibility before the next selector
/// in the plan is tried.
const INTERACTABLE_WAIT: Duration = Duration::from_millis(1500);

/// How to find one element. Tagged, so call sites never guess what kind of
/// string they were handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Element id attribute, without the `#`.
    Id(String),
    Css(String),
    XPath(String),
    /// Visible text, lowered to a ladder of XPath shapes by the driver.
    Text(String),
}

impl Selector {
    pub fn id(s: impl Into<String>) -> Self {
        Self::Id(s.into())
    }
    pub fn css(s: impl Into<String>) -> Self {
        Self::Css(s.into())
    }
    pub fn xpath(s: impl Into<String>) -> Self {
        Self::XPath(s.into())
    }
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

/// Ordered fallback groups; earlier groups are preferred, and selectors
/// within a group are tried in order. The first selector that matches an
/// element wins.
#[derive(Debug, Clone, Default)]
pub struct SelectorPlan {
    pub groups: Vec<Vec<Selector>>,
}

impl SelectorPlan {
    pub fn single(selector: Selector) -> Self {
        Self {
            groups: vec![vec![selector]],
        }
    }

    pub fn group(selectors: Vec<Selector>) -> Self {
        Self {
            groups: vec![selectors],
        }
    }

    pub fn then(mut self, selectors: Vec<Selector>) -> Self {
        self.groups.push(selectors);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.groups.iter().flatten()
    }
}

/// XPath string literal for `text`, using `concat()` when the text itself
/// contains a single quote.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{}'", text);
    }
    let parts: Vec<String> = text
        .split('\'')
        .map(|part| format!("'{}'", part))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// The ladder of XPath shapes tried for a visible-text selector, most
/// specific first. Sites render clickable text in wildly different tags;
/// the final rungs trade precision for recall (exact normalized match,
/// then case-insensitive contains).
pub fn text_xpath_variants(text: &str) -> Vec<String> {
    let lit = xpath_literal(text);
    let lower = text.to_lowercase();
    let lower_lit = xpath_literal(&lower);
    vec![
        format!("//button[contains(text(), {lit})]"),
        format!("//div[contains(text(), {lit})]"),
        format!("//li[contains(text(), {lit})]"),
        format!("//span[contains(text(), {lit})]"),
        format!("//a[contains(text(), {lit})]"),
        format!(
            "//*[self::button or self::a or self::div or self::li or self::span]\
             [contains(text(), {lit})]"
        ),
        format!("//*[normalize-space(text())={lit}]"),
        format!(
            "//*[contains(translate(text(), 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', \
             'abcdefghijklmnopqrstuvwxyz'), {lower_lit})]"
        ),
    ]
}

/// Resolves plans against a driver and performs the layered interactions.
pub struct Resolver {
    driver: Arc<dyn Driver>,
    wait_timeout: Duration,
    typing: Box<dyn TypingPolicy>,
}

impl Resolver {
    pub fn new(
        driver: Arc<dyn Driver>,
        wait_timeout: Duration,
        typing: Box<dyn TypingPolicy>,
    ) -> Self {
        Self {
            driver,
            wait_timeout,
            typing,
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    async fn locate(&self, plan: &SelectorPlan) -> Option<ElementId> {
        for selector in plan.iter() {
            if let Some(el) = self.driver.find(selector).await {
                debug!("resolver: matched {:?}", selector);
                return Some(el);
            }
        }
        None
    }

    pub async fn exists(&self, plan: &SelectorPlan) -> bool {
        self.locate(plan).await.is_some()
    }

    /// Poll for presence until the configured timeout elapses.
    pub async fn wait_present(&self, plan: &SelectorPlan) -> bool {
        let deadline = tokio::time::Instant::now() + self.wait_timeout;
        loop {
            if self.locate(plan).await.is_some() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Scroll the element into view and wait until it reads as visible.
    /// False means this element never became interactable; callers move on
    /// to the next selector rather than failing the plan.
    async fn make_interactable(&self, el: ElementId) -> bool {
        if let Err(e) = self.driver.prepare(el).await {
            debug!("resolver: scroll-into-view failed: {}", e);
        }
        let deadline = tokio::time::Instant::now() + INTERACTABLE_WAIT;
        loop {
            if self.driver.is_visible(el).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    }

    /// Click through the plan.
    ///
    /// Selectors are tried in plan order; for each located element the click
    /// strategies escalate (JS `click()`, then a native CDP click, then raw
    /// pointer events). An element that never becomes interactable, or that
    /// rejects every strategy, fails only that selector; the next one is
    /// tried. False means the whole plan was exhausted.
    ///
    /// When `url_hints` is non-empty a strategy only counts as confirmed
    /// once the URL contains one of the hints; an unconfirmed but cleanly
    /// dispatched click is still reported as success, since many legitimate
    /// clicks (modals, in-page pickers) never change the URL.
    pub async fn click(&self, plan: &SelectorPlan, url_hints: &[&str]) -> bool {
        for selector in plan.iter() {
            let Some(el) = self.driver.find(selector).await else {
                continue;
            };
            if !self.make_interactable(el).await {
                debug!("resolver: {:?} never became interactable, trying next", selector);
                continue;
            }

            let mut dispatched = false;
            for name in ["js", "native", "pointer"] {
                let result = match name {
                    "js" => self.driver.click_js(el).await,
                    "native" => self.driver.click_native(el).await,
                    _ => self.driver.click_pointer(el).await,
                };
                match result {
                    Ok(()) => {
                        dispatched = true;
                        if url_hints.is_empty() {
                            return true;
                        }
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        let url = self.driver.current_url().await;
                        if url_hints.iter().any(|hint| url.contains(hint)) {
                            debug!("resolver: {} click confirmed by url {}", name, url);
                            return true;
                        }
                        debug!("resolver: {} click dispatched, url unchanged", name);
                    }
                    Err(e) => {
                        debug!("resolver: {} click failed on {:?}: {}", name, selector, e);
                    }
                }
            }
            if dispatched {
                return true;
            }
            debug!("resolver: all strategies failed on {:?}, trying next", selector);
        }
        warn!(
            "resolver: click exhausted all {} selectors",
            plan.iter().count()
        );
        false
    }

    /// Type `text` through the plan, one element at a time.
    ///
    /// Characters go in one keystroke at a time under the typing policy.
    /// Afterwards the field is read back; on mismatch (a dropped keystroke,
    /// a framework rewriting the value) the text is set directly through the
    /// DOM. An element that cannot be cleared or verified falls through to
    /// the next selector; false means the plan was exhausted.
    pub async fn set_value(&self, plan: &SelectorPlan, text: &str) -> bool {
        for selector in plan.iter() {
            let Some(el) = self.driver.find(selector).await else {
                continue;
            };
            if !self.make_interactable(el).await {
                debug!("resolver: {:?} never became interactable, trying next", selector);
                continue;
            }
            if let Err(e) = self.driver.clear(el).await {
                debug!("resolver: could not clear {:?}: {}", selector, e);
                continue;
            }

            let mut typed_ok = true;
            for (i, c) in text.chars().enumerate() {
                if let Some(wrong) = self.typing.typo(c, i) {
                    if self.driver.type_char(el, wrong).await.is_err() {
                        typed_ok = false;
                        break;
                    }
                    tokio::time::sleep(self.typing.notice_pause()).await;
                    if self.driver.press_backspace(el).await.is_err() {
                        typed_ok = false;
                        break;
                    }
                    tokio::time::sleep(self.typing.recovery_pause()).await;
                }
                if self.driver.type_char(el, c).await.is_err() {
                    typed_ok = false;
                    break;
                }
                tokio::time::sleep(self.typing.keystroke_delay()).await;
            }

            if typed_ok {
                match self.driver.field_value(el).await {
                    Some(value) if value == text => return true,
                    Some(value) => {
                        debug!(
                            "resolver: typed value mismatch ({} chars vs {} expected), setting directly",
                            value.chars().count(),
                            text.chars().count()
                        );
                    }
                    // Unverifiable field; trust the keystrokes.
                    None => return true,
                }
            }

            match self.driver.set_value_direct(el, text).await {
                Ok(()) => match self.driver.field_value(el).await {
                    Some(value) if value == text => return true,
                    Some(_) => {
                        debug!("resolver: direct set did not stick on {:?}, trying next", selector);
                    }
                    None => return true,
                },
                Err(e) => {
                    debug!("resolver: direct value set failed on {:?}: {}", selector, e);
                }
            }
        }
        warn!(
            "resolver: set_value exhausted all {} selectors",
            plan.iter().count()
        );
        false
    }

    /// Attach a file, trying each file input the plan resolves to.
    pub async fn upload_file(&self, plan: &SelectorPlan, path: &std::path::Path) -> bool {
        for selector in plan.iter() {
            let Some(el) = self.driver.find(selector).await else {
                continue;
            };
            match self.driver.attach_file(el, path).await {
                Ok(()) => return true,
                Err(e) => {
                    debug!(
                        "resolver: file attach failed on {:?} for {}: {}",
                        selector,
                        path.display(),
                        e
                    );
                }
            }
        }
        warn!("resolver: upload exhausted all selectors for {}", path.display());
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_are_ordered_specific_to_loose() {
        let v = text_xpath_variants("Post my Ad");
        assert_eq!(v.len(), 8);
        assert_eq!(v[0], "//button[contains(text(), 'Post my Ad')]");
        assert_eq!(v[4], "//a[contains(text(), 'Post my Ad')]");
        assert!(v[5].starts_with("//*[self::button or self::a"));
        assert_eq!(v[6], "//*[normalize-space(text())='Post my Ad']");
        assert!(v[7].contains("translate"));
        assert!(v[7].contains("'post my ad'"));
    }

    #[test]
    fn xpath_literal_handles_apostrophes() {
        assert_eq!(xpath_literal("Continue"), "'Continue'");
        assert_eq!(
            xpath_literal("King's Lynn"),
            r#"concat('King', "'", 's Lynn')"#
        );
    }

    #[test]
    fn plan_iteration_is_group_then_selector_order() {
        let plan = SelectorPlan::group(vec![Selector::id("a"), Selector::css(".b")])
            .then(vec![Selector::text("C")]);
        let order: Vec<&Selector> = plan.iter().collect();
        assert_eq!(order.len(), 3);
        assert_eq!(*order[0], Selector::id("a"));
        assert_eq!(*order[2], Selector::text("C"));
    }
}
