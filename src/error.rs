//! Error taxonomy for the listing bot.
//!
//! Browser/CDP failures are converted into these domain errors at module
//! boundaries; transient automation misses (an element that never appeared,
//! a click that bounced off an overlay) are deliberately *not* errors — the
//! resolver reports them as `false`/`Err(ResolveError)` and the flow decides
//! whether the step was critical.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser executable not found (tried Chrome, Chromium, Brave)")]
    BrowserNotFound,

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("could not connect to debugging endpoint on port {port}: {reason}")]
    ConnectFailed { port: u16, reason: String },

    #[error("navigation to {0} failed: {1}")]
    NavigationFailed(String, String),

    #[error("not logged in after {0} manual attempts")]
    AuthenticationFailed(u32),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no selector in plan matched an element")]
    NotFound,

    #[error("element found but not interactable: {0}")]
    NotInteractable(String),

    #[error("interaction failed: {0}")]
    Interaction(String),
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("listing is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("image path does not exist: {0}")]
    MissingImage(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}
