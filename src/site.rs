//! Gumtree selector catalog.
//!
//! Every plan leads with the most stable hook observed on the live site
//! (test ids, then element ids) and falls back to visible text, which
//! survives markup reshuffles better than class names do.

use crate::resolver::{Selector, SelectorPlan};

/// URL fragments that confirm the post-ad entry click landed.
pub const POST_AD_URL_HINTS: &[&str] = &["postad", "category"];

/// Control labels never valid as a location pick.
pub const PICKER_CONTROL_WORDS: &[&str] =
    &["continue", "next", "back", "cancel", "select", "close", "search"];

pub fn post_ad_entry() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::text("Post my Ad"),
        Selector::css("a[href*='postad']"),
    ])
    .then(vec![Selector::text("Post an ad")])
}

/// Close buttons of the promo/consent overlays that cover the homepage.
pub fn overlay_close() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("[data-testid='close-button']"),
        Selector::css("[data-testid='modal-close']"),
        Selector::css(".dialog-close"),
        Selector::css(".modal-close"),
        Selector::css("button[aria-label='Close']"),
    ])
}

pub fn category_search_input() -> SelectorPlan {
    SelectorPlan::single(Selector::id("post-ad_title-suggestion"))
}

/// First suggested category under the search box.
pub fn category_suggestion() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("[data-testid='category-display-name']"),
        Selector::css("#post-ad_title-suggestion-listbox li"),
    ])
}

pub fn location_open() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::id("locationIdBtn"),
        Selector::text("Select your location"),
    ])
}

pub fn location_option(name: &str) -> SelectorPlan {
    SelectorPlan::single(Selector::text(name))
}

pub fn location_continue() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("a[data-q='location-browser-continue-btn']"),
        Selector::text("Continue"),
    ])
}

pub fn image_input() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("input[type='file'][accept*='image']"),
        Selector::css("input[type='file']"),
    ])
}

/// Preview rendered after an upload finishes processing.
pub fn image_thumbnail() -> SelectorPlan {
    SelectorPlan::single(Selector::css("[data-testid='thumbnail'] img"))
}

pub fn title_input() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("[data-testid='ad-title-input']"),
        Selector::id("title"),
    ])
}

pub fn description_input() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("[data-testid='description-textarea']"),
        Selector::id("description"),
    ])
}

pub fn price_input() -> SelectorPlan {
    SelectorPlan::single(Selector::id("price"))
}

pub fn condition_open() -> SelectorPlan {
    SelectorPlan::single(Selector::text("Select your Condition"))
}

pub fn condition_option(condition: &str) -> SelectorPlan {
    SelectorPlan::single(Selector::text(condition))
}

pub fn condition_save() -> SelectorPlan {
    SelectorPlan::single(Selector::text("Save"))
}

pub fn contact_phone_toggle() -> SelectorPlan {
    SelectorPlan::single(Selector::text("Phone:"))
}

pub fn submit_button() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("#submit-button-2"),
        Selector::css("button[type='submit']"),
    ])
}

/// Markers only present for a signed-in user.
pub fn logged_in_markers() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("[data-testid='user-menu']"),
        Selector::css("a[href*='logout']"),
        Selector::css(".user-avatar"),
    ])
    .then(vec![
        Selector::text("My account"),
        Selector::text("Sign out"),
    ])
}

/// Markers only present for an anonymous visitor.
pub fn logged_out_markers() -> SelectorPlan {
    SelectorPlan::group(vec![
        Selector::css("[data-testid='login-button']"),
        Selector::css("a[href*='login']"),
    ])
    .then(vec![
        Selector::text("Log in"),
        Selector::text("Sign in"),
    ])
}
