//! Browser-driven auto-lister for Gumtree classified ads.
//!
//! Drives a real Chromium-family browser over CDP: establishes an
//! authenticated session (cookie replay, falling back to manual login in
//! the visible window), then walks the post-an-ad flow step by step with
//! human-paced input. See [`submit_listing`] for the one-call entry point.

pub mod config;
pub mod error;
pub mod flow;
pub mod listing;
pub mod resolver;
pub mod session;
pub mod site;
pub mod stealth;

use std::sync::Arc;

use tracing::info;

pub use config::BotConfig;
pub use error::{ListingError, ResolveError, SessionError};
pub use flow::ListingFlow;
pub use listing::ListingRequest;
pub use resolver::Resolver;
pub use session::Session;

use resolver::driver::CdpDriver;
use resolver::typing::HumanTyping;

/// Validate, authenticate, and submit one listing end to end.
///
/// Returns `Ok(true)` when every mandatory flow step succeeded, `Ok(false)`
/// when the flow aborted partway, and `Err` for precondition failures
/// (invalid listing, no browser, not logged in).
pub async fn submit_listing(
    config: BotConfig,
    listing: &ListingRequest,
) -> Result<bool, ListingError> {
    listing.validate()?;

    let session = Session::establish(config).await?;
    let driver = Arc::new(CdpDriver::new(session.page().clone()));
    let resolver = Resolver::new(
        driver,
        session.config().wait_timeout,
        Box::new(HumanTyping),
    );

    if !session.ensure_authenticated(&resolver).await {
        let attempts = session.config().manual_login_attempts;
        session.close().await;
        return Err(SessionError::AuthenticationFailed(attempts).into());
    }

    let flow = ListingFlow::new(resolver, session.config().base_url.clone());
    let submitted = flow.submit(listing).await;
    info!(
        "listing '{}' {}",
        listing.title,
        if submitted { "submitted" } else { "not submitted" }
    );

    // The run may have rotated session cookies; keep the jar fresh.
    session.save_cookies().await;
    session.close().await;
    Ok(submitted)
}
