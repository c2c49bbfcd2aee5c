//! Fingerprint hardening injected before any site script runs.
//!
//! The script is registered through `Page.addScriptToEvaluateOnNewDocument`
//! so it re-applies automatically on every navigation in a launched browser.
//! For attached browsers (where the page may already be loaded) [`apply`]
//! evaluates the same script directly. Both entry points are best-effort:
//! a failed injection is logged and the run continues, since an unpatched
//! fingerprint degrades stealth but does not break the flow.

use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use tracing::{debug, warn};

/// Every override sits in its own try/catch so one locked-down property
/// cannot take the rest of the patch down with it. The leading guard makes
/// repeated evaluation a no-op.
const FINGERPRINT_SCRIPT: &str = r#"
(() => {
    if (window.__adpostFp) { return; }
    try {
        Object.defineProperty(window, '__adpostFp', { value: true, configurable: false });
    } catch (e) {}

    const proto = Navigator.prototype;

    // webdriver: absent reads more natural than false
    try {
        Object.defineProperty(proto, 'webdriver', { get: () => undefined, configurable: true });
    } catch (e) {}
    try { delete navigator.webdriver; } catch (e) {}

    try {
        Object.defineProperty(proto, 'languages', {
            get: () => ['en-GB', 'en-US', 'en'],
            configurable: true,
        });
    } catch (e) {}

    try {
        Object.defineProperty(proto, 'plugins', { get: () => [1, 2, 3, 4, 5], configurable: true });
    } catch (e) {}

    try {
        Object.defineProperty(proto, 'hardwareConcurrency', { get: () => 8, configurable: true });
    } catch (e) {}
    try {
        Object.defineProperty(proto, 'deviceMemory', { get: () => 8, configurable: true });
    } catch (e) {}
    try {
        Object.defineProperty(proto, 'maxTouchPoints', { get: () => 0, configurable: true });
    } catch (e) {}
    try {
        Object.defineProperty(proto, 'vendor', { get: () => 'Google Inc.', configurable: true });
    } catch (e) {}
    try {
        Object.defineProperty(proto, 'platform', { get: () => 'Win32', configurable: true });
    } catch (e) {}

    // Headless Chrome reports the window size as the screen size.
    try {
        Object.defineProperty(screen, 'width', { get: () => 1920 });
        Object.defineProperty(screen, 'height', { get: () => 1080 });
        Object.defineProperty(screen, 'availHeight', { get: () => 1040 });
        Object.defineProperty(screen, 'colorDepth', { get: () => 24 });
    } catch (e) {}

    try {
        const origResolved = Intl.DateTimeFormat.prototype.resolvedOptions;
        Intl.DateTimeFormat.prototype.resolvedOptions = function () {
            const opts = origResolved.apply(this, arguments);
            opts.timeZone = 'Europe/London';
            return opts;
        };
    } catch (e) {}

    // Presence of chrome.runtime is the common CDP-detection probe.
    try {
        if (!window.chrome) { window.chrome = {}; }
        if (!window.chrome.runtime) {
            window.chrome.runtime = {
                connect: function () { return { onDisconnect: { addListener: function () {} } }; },
                sendMessage: function () {},
            };
        }
    } catch (e) {}

    try {
        const origQuery = window.navigator.permissions && window.navigator.permissions.query;
        if (origQuery) {
            window.navigator.permissions.query = (parameters) => (
                parameters.name === 'notifications'
                    ? Promise.resolve({ state: Notification.permission })
                    : origQuery(parameters)
            );
        }
    } catch (e) {}

    try {
        for (const key of Object.keys(window)) {
            if (key.startsWith('cdc_')) { try { delete window[key]; } catch (e) {} }
        }
        delete window.callPhantom;
        delete window._phantom;
        delete window.__selenium;
        delete window.__webdriver_evaluate;
        delete window.domAutomation;
        delete window.domAutomationController;
    } catch (e) {}
})();
"#;

/// Register the script to run before every future document in this target.
pub async fn install(page: &Page) {
    match page
        .execute(AddScriptToEvaluateOnNewDocumentParams::new(
            FINGERPRINT_SCRIPT,
        ))
        .await
    {
        Ok(_) => debug!("stealth: fingerprint script registered for new documents"),
        Err(e) => warn!("stealth: failed to register fingerprint script: {}", e),
    }
}

/// Evaluate the script in the current document. Safe to call repeatedly.
pub async fn apply(page: &Page) {
    if let Err(e) = page.evaluate(FINGERPRINT_SCRIPT).await {
        warn!("stealth: failed to apply fingerprint script: {}", e);
    }
}
