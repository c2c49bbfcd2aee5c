//! Browser session lifecycle and authentication.
//!
//! A session prefers attaching to a browser the user already has open on the
//! debugging port (their real profile, their real fingerprint) and only
//! launches a fresh one when nothing is listening. Authentication is cookie
//! replay first; when the jar is missing or stale the user is asked to log
//! in by hand in the visible browser window, polled for a bounded time.

pub mod cookies;

use std::path::Path;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, SetCookiesParams,
};
use chromiumoxide::{Browser, Handler, Page};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::{BotConfig, USER_AGENT};
use crate::error::SessionError;
use crate::resolver::Resolver;
use crate::site;
use crate::stealth;

/// Locate a Chromium-family executable: explicit override, then PATH, then
/// the usual install locations.
fn find_browser_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

fn spawn_handler_task(mut handler: Handler) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("session: handler event error: {}", e);
            }
        }
        debug!("session: handler stream ended");
    })
}

async fn discover_ws_url(port: u16) -> Result<String, SessionError> {
    let json_url = format!("http://127.0.0.1:{}/json/version", port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| SessionError::ConnectFailed {
            port,
            reason: e.to_string(),
        })?;
    let response = client
        .get(&json_url)
        .send()
        .await
        .map_err(|e| SessionError::ConnectFailed {
            port,
            reason: e.to_string(),
        })?;
    let json: serde_json::Value =
        response.json().await.map_err(|e| SessionError::ConnectFailed {
            port,
            reason: e.to_string(),
        })?;
    json["webSocketDebuggerUrl"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or(SessionError::ConnectFailed {
            port,
            reason: "no webSocketDebuggerUrl in response".to_string(),
        })
}

/// A connected browser tab plus everything needed to authenticate it.
pub struct Session {
    browser: Browser,
    page: Page,
    handler_task: tokio::task::JoinHandle<()>,
    /// True when we attached to a browser the user already had running.
    attached: bool,
    config: BotConfig,
}

/// What came of replaying the cookie jar.
enum CookieReplay {
    /// No jar on disk; nothing to replay.
    NoJar,
    /// Cookies went into the browser; whether they still log us in is for
    /// the caller to check.
    Injected,
    /// A jar exists but could not be replayed.
    Failed,
}

impl Session {
    /// Attach to a running browser on the configured port, or launch one.
    pub async fn establish(config: BotConfig) -> Result<Self, SessionError> {
        let (browser, handler, attached) = match Self::try_attach(config.debug_port).await {
            Some((browser, handler)) => {
                info!("session: attached to running browser on port {}", config.debug_port);
                (browser, handler, true)
            }
            None => {
                let (browser, handler) = Self::launch(&config).await?;
                (browser, handler, false)
            }
        };

        let handler_task = spawn_handler_task(handler);

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;

        // Registered before any navigation so every document gets patched.
        stealth::install(&page).await;

        Ok(Self {
            browser,
            page,
            handler_task,
            attached,
            config,
        })
    }

    async fn try_attach(port: u16) -> Option<(Browser, Handler)> {
        let ws_url = discover_ws_url(port).await.ok()?;
        debug!("session: discovered CDP endpoint {}", ws_url);
        Browser::connect(ws_url).await.ok()
    }

    async fn launch(config: &BotConfig) -> Result<(Browser, Handler), SessionError> {
        let exe = find_browser_executable().ok_or(SessionError::BrowserNotFound)?;
        std::fs::create_dir_all(&config.profile_dir)
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;

        let (width, height) = config.window_size;
        let mut args = vec![
            format!("--remote-debugging-port={}", config.debug_port),
            format!("--user-data-dir={}", config.profile_dir.display()),
            format!("--window-size={},{}", width, height),
            format!("--user-agent={}", USER_AGENT),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-infobars".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
        ];
        if config.headless {
            args.push("--headless=new".to_string());
        }

        info!("session: launching {} on port {}", exe, config.debug_port);
        std::process::Command::new(&exe)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;

        // The debugging port takes a few seconds to come up.
        tokio::time::sleep(Duration::from_millis(3000)).await;

        let mut last_error = None;
        for attempt in 1..=5 {
            match discover_ws_url(config.debug_port).await {
                Ok(ws_url) => match Browser::connect(ws_url).await {
                    Ok(pair) => return Ok(pair),
                    Err(e) => last_error = Some(e.to_string()),
                },
                Err(e) => last_error = Some(e.to_string()),
            }
            if attempt < 5 {
                debug!("session: connect attempt {} failed, retrying", attempt);
                tokio::time::sleep(Duration::from_millis(2000)).await;
            }
        }
        Err(SessionError::ConnectFailed {
            port: config.debug_port,
            reason: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    async fn goto_home(&self, resolver: &Resolver) -> bool {
        match resolver.driver().navigate(&self.config.base_url).await {
            Ok(()) => true,
            Err(e) => {
                warn!("session: navigation to {} failed: {}", self.config.base_url, e);
                false
            }
        }
    }

    /// Decide login state from the current page.
    ///
    /// Positive markers win over negative ones; when neither battery matches
    /// the visible page text is scanned as a last resort, and a page that
    /// still gives no signal is treated as logged out.
    pub async fn is_logged_in(&self, resolver: &Resolver) -> bool {
        if resolver.exists(&site::logged_in_markers()).await {
            return true;
        }
        if resolver.exists(&site::logged_out_markers()).await {
            return false;
        }
        let text = resolver.driver().page_text().await.to_lowercase();
        if text.contains("my account") || text.contains("sign out") {
            return true;
        }
        if text.contains("log in") || text.contains("sign in") {
            return false;
        }
        false
    }

    /// Replay the stored jar into the browser.
    async fn inject_cookies(&self) -> CookieReplay {
        let Some(raw) = cookies::load(&self.config.cookie_file) else {
            return CookieReplay::NoJar;
        };
        let domain = cookies::site_domain(&self.config.base_url);
        let records = cookies::prune_expired(
            cookies::normalize_all(&raw, &domain),
            chrono::Utc::now().timestamp() as f64,
        );
        let params: Vec<CookieParam> = cookies::to_cdp_values(&records)
            .iter()
            .filter_map(|v| serde_json::from_value::<CookieParam>(v.clone()).ok())
            .collect();
        if params.is_empty() {
            warn!("session: cookie jar held no usable records");
            return CookieReplay::Failed;
        }

        // Start from a clean slate so stale browser cookies cannot shadow
        // the replayed ones.
        if let Err(e) = self.page.execute(ClearBrowserCookiesParams::default()).await {
            warn!("session: could not clear browser cookies: {}", e);
        }

        let count = params.len();
        match self.page.execute(SetCookiesParams::new(params)).await {
            Ok(_) => {
                info!("session: injected {} cookies", count);
                CookieReplay::Injected
            }
            Err(e) => {
                warn!("session: cookie injection failed: {}", e);
                CookieReplay::Failed
            }
        }
    }

    /// Capture the browser's cookies into the jar on disk.
    pub async fn save_cookies(&self) {
        let raw = match self.page.get_cookies().await {
            Ok(cookies) => cookies
                .iter()
                .filter_map(|c| serde_json::to_value(c).ok())
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!("session: could not read browser cookies: {}", e);
                return;
            }
        };
        let domain = cookies::site_domain(&self.config.base_url);
        let records = cookies::normalize_all(&raw, &domain);
        if records.is_empty() {
            debug!("session: no cookies to save");
            return;
        }
        if let Err(e) = cookies::save(&self.config.cookie_file, &records) {
            warn!("session: cookie save failed: {}", e);
        }
    }

    /// Poll for a completed manual login, re-loading the homepage between
    /// checks so the state reflects what the user just did.
    async fn wait_for_manual_login(&self, resolver: &Resolver) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.manual_login_wait;
        loop {
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.goto_home(resolver).await;
            if self.is_logged_in(resolver).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
        }
    }

    /// Get the session into a logged-in state.
    ///
    /// Order of preference: already logged in (persistent profile), cookie
    /// replay, then bounded rounds of manual login in the visible window.
    /// Whatever cookies exist at the end are saved either way, and the
    /// returned bool is the result of a final fresh check.
    pub async fn ensure_authenticated(&self, resolver: &Resolver) -> bool {
        if !self.goto_home(resolver).await {
            return false;
        }

        if self.is_logged_in(resolver).await {
            info!("session: already logged in");
            self.save_cookies().await;
            return true;
        }

        // A jar that exists but does not get us logged in is dead weight;
        // drop it so the next run goes straight to manual login.
        match self.inject_cookies().await {
            CookieReplay::NoJar => {}
            CookieReplay::Injected => {
                // Reload so the injected cookies take effect server-side.
                self.goto_home(resolver).await;
                if self.is_logged_in(resolver).await {
                    info!("session: cookie replay succeeded");
                    self.save_cookies().await;
                    return true;
                }
                warn!("session: stored cookies are stale");
                cookies::invalidate(&self.config.cookie_file);
            }
            CookieReplay::Failed => {
                cookies::invalidate(&self.config.cookie_file);
            }
        }

        for attempt in 1..=self.config.manual_login_attempts {
            info!(
                "session: please log in manually in the browser window \
                 (attempt {}/{}, waiting up to {:?})",
                attempt, self.config.manual_login_attempts, self.config.manual_login_wait
            );
            if self.wait_for_manual_login(resolver).await {
                info!("session: manual login detected");
                self.save_cookies().await;
                return true;
            }
        }

        // Out of attempts. Save whatever state exists and report the truth.
        self.save_cookies().await;
        self.goto_home(resolver).await;
        let logged_in = self.is_logged_in(resolver).await;
        if !logged_in {
            warn!(
                "session: not logged in after {} manual attempts",
                self.config.manual_login_attempts
            );
        }
        logged_in
    }

    /// Release the session. An attached browser belongs to the user, so only
    /// our tab goes; a launched browser is shut down fully.
    pub async fn close(mut self) {
        if self.attached {
            if let Err(e) = self.page.close().await {
                debug!("session: tab close failed: {}", e);
            }
        } else {
            let _ = self.browser.close().await;
            let _ = self.browser.wait().await;
        }
        self.handler_task.abort();
    }
}
