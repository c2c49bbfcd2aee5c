//! The listing flow: a declarative step table and the executor that walks it.
//!
//! Each step names what it waits for, what it does, and whether a miss
//! aborts the run. Mandatory steps ending in failure stop the flow cold;
//! best-effort steps (overlay dismissal, optional location levels, the
//! condition picker that not every category shows) log and move on. The
//! readiness waits are deliberately non-fatal: a missing marker usually
//! means the site skipped a screen, not that the flow is lost.

use rand::prelude::*;
use tracing::{error, info, warn};

use crate::listing::{ListingRequest, DEFAULT_CONDITION};
use crate::resolver::{Resolver, Selector, SelectorPlan};
use crate::site;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepId {
    DismissOverlays,
    PostAdEntry,
    CategorySearch,
    CategoryConfirm,
    LocationOpen,
    LocationCountry,
    LocationCounty,
    LocationSubLocation,
    LocationThirdLevel,
    LocationContinue,
    ImageUpload,
    Title,
    Description,
    Price,
    ConditionOpen,
    ConditionPick,
    ConditionSave,
    ContactPreference,
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure aborts the whole flow.
    Mandatory,
    /// Failure is logged and the flow continues.
    BestEffort,
}

/// What a step does once its readiness wait (if any) has run.
pub enum StepAction {
    /// Close promo/consent overlays, then send Escape for good measure.
    DismissOverlays,
    Click {
        plan: SelectorPlan,
        url_hints: &'static [&'static str],
    },
    Type {
        plan: SelectorPlan,
        text: String,
    },
    /// Attach each listing image and wait for its preview thumbnail.
    UploadImages,
    /// Pick a random qualifying entry from the deepest location level.
    ThirdLevelPick {
        exclude: Vec<String>,
    },
    /// Click the requested condition, retrying once with the default.
    ConditionPick {
        condition: String,
    },
}

pub struct StepSpec {
    pub id: StepId,
    pub criticality: Criticality,
    /// Marker to wait for before acting; absence is logged, never fatal.
    pub await_first: Option<SelectorPlan>,
    pub action: StepAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct StepResult {
    pub id: StepId,
    pub outcome: StepOutcome,
}

/// Entries worth offering as a third-level location pick: long enough to be
/// a place name, containing letters, and not one of the picker's own
/// controls or a level we already chose.
pub fn qualifying_picks(texts: &[String], exclude: &[String]) -> Vec<String> {
    let excluded: Vec<String> = exclude.iter().map(|s| s.to_lowercase()).collect();
    texts
        .iter()
        .filter(|t| t.len() > 2)
        .filter(|t| t.chars().any(|c| c.is_alphabetic()))
        .filter(|t| {
            let lower = t.to_lowercase();
            !excluded.contains(&lower)
                && !site::PICKER_CONTROL_WORDS.contains(&lower.as_str())
        })
        .cloned()
        .collect()
}

/// Uniform random draw from the qualifying third-level entries.
pub fn pick_third_level(texts: &[String], exclude: &[String]) -> Option<String> {
    qualifying_picks(texts, exclude)
        .choose(&mut rand::rng())
        .cloned()
}

/// Build the step table for one listing.
pub fn build_steps(listing: &ListingRequest) -> Vec<StepSpec> {
    let location = listing.parse_location();
    let mut steps = vec![
        StepSpec {
            id: StepId::DismissOverlays,
            criticality: Criticality::BestEffort,
            await_first: None,
            action: StepAction::DismissOverlays,
        },
        StepSpec {
            id: StepId::PostAdEntry,
            criticality: Criticality::Mandatory,
            await_first: None,
            action: StepAction::Click {
                plan: site::post_ad_entry(),
                url_hints: site::POST_AD_URL_HINTS,
            },
        },
        StepSpec {
            id: StepId::CategorySearch,
            criticality: Criticality::Mandatory,
            await_first: Some(site::category_search_input()),
            action: StepAction::Type {
                plan: site::category_search_input(),
                // The operator's category text goes in verbatim; the site's
                // own fuzzy search does the mapping.
                text: listing.category.clone(),
            },
        },
        StepSpec {
            id: StepId::CategoryConfirm,
            criticality: Criticality::Mandatory,
            await_first: Some(site::category_suggestion()),
            action: StepAction::Click {
                plan: site::category_suggestion(),
                url_hints: &[],
            },
        },
        StepSpec {
            id: StepId::LocationOpen,
            criticality: Criticality::Mandatory,
            await_first: Some(site::location_open()),
            action: StepAction::Click {
                plan: site::location_open(),
                url_hints: &[],
            },
        },
        StepSpec {
            id: StepId::LocationCountry,
            criticality: Criticality::Mandatory,
            await_first: Some(site::location_option(&location.country)),
            action: StepAction::Click {
                plan: site::location_option(&location.country),
                url_hints: &[],
            },
        },
        StepSpec {
            id: StepId::LocationCounty,
            criticality: Criticality::Mandatory,
            await_first: None,
            action: StepAction::Click {
                plan: site::location_option(&location.county),
                url_hints: &[],
            },
        },
    ];

    if let Some(sub) = &listing.sub_location {
        steps.push(StepSpec {
            id: StepId::LocationSubLocation,
            criticality: Criticality::BestEffort,
            await_first: None,
            action: StepAction::Click {
                plan: site::location_option(sub),
                url_hints: &[],
            },
        });
        steps.push(StepSpec {
            id: StepId::LocationThirdLevel,
            criticality: Criticality::BestEffort,
            await_first: None,
            action: StepAction::ThirdLevelPick {
                exclude: vec![
                    location.country.clone(),
                    location.county.clone(),
                    sub.clone(),
                ],
            },
        });
    }

    steps.push(StepSpec {
        id: StepId::LocationContinue,
        criticality: Criticality::Mandatory,
        await_first: Some(site::location_continue()),
        action: StepAction::Click {
            plan: site::location_continue(),
            url_hints: &[],
        },
    });

    if !listing.images.is_empty() {
        steps.push(StepSpec {
            id: StepId::ImageUpload,
            criticality: Criticality::BestEffort,
            await_first: Some(site::image_input()),
            action: StepAction::UploadImages,
        });
    }

    steps.push(StepSpec {
        id: StepId::Title,
        criticality: Criticality::Mandatory,
        await_first: Some(site::title_input()),
        action: StepAction::Type {
            plan: site::title_input(),
            text: listing.title.clone(),
        },
    });
    steps.push(StepSpec {
        id: StepId::Description,
        criticality: Criticality::Mandatory,
        await_first: None,
        action: StepAction::Type {
            plan: site::description_input(),
            text: listing.description.clone(),
        },
    });
    steps.push(StepSpec {
        id: StepId::Price,
        criticality: Criticality::Mandatory,
        await_first: None,
        action: StepAction::Type {
            plan: site::price_input(),
            text: listing.normalized_price(),
        },
    });

    // Not every category shows a condition section.
    steps.push(StepSpec {
        id: StepId::ConditionOpen,
        criticality: Criticality::BestEffort,
        await_first: None,
        action: StepAction::Click {
            plan: site::condition_open(),
            url_hints: &[],
        },
    });
    steps.push(StepSpec {
        id: StepId::ConditionPick,
        criticality: Criticality::BestEffort,
        await_first: None,
        action: StepAction::ConditionPick {
            condition: listing.condition.clone(),
        },
    });
    steps.push(StepSpec {
        id: StepId::ConditionSave,
        criticality: Criticality::BestEffort,
        await_first: None,
        action: StepAction::Click {
            plan: site::condition_save(),
            url_hints: &[],
        },
    });

    steps.push(StepSpec {
        id: StepId::ContactPreference,
        criticality: Criticality::BestEffort,
        await_first: None,
        action: StepAction::Click {
            plan: site::contact_phone_toggle(),
            url_hints: &[],
        },
    });

    steps.push(StepSpec {
        id: StepId::Submit,
        criticality: Criticality::Mandatory,
        await_first: Some(site::submit_button()),
        action: StepAction::Click {
            plan: site::submit_button(),
            url_hints: &[],
        },
    });

    steps
}

/// Walks the step table against a resolver.
pub struct ListingFlow {
    resolver: Resolver,
    /// Where a recovery navigation goes when the session probe fails.
    home_url: String,
}

impl ListingFlow {
    pub fn new(resolver: Resolver, home_url: impl Into<String>) -> Self {
        Self {
            resolver,
            home_url: home_url.into(),
        }
    }

    /// Cheap liveness probe: a healthy page can always report its URL.
    /// On failure, one recovery navigation to the home page is attempted;
    /// a session that still cannot answer is unusable.
    async fn ensure_alive(&self) -> bool {
        let driver = self.resolver.driver();
        if !driver.current_url().await.is_empty() {
            return true;
        }
        warn!("flow: session probe failed, attempting recovery navigation");
        if let Err(e) = driver.navigate(&self.home_url).await {
            error!("flow: recovery navigation failed: {}", e);
            return false;
        }
        !driver.current_url().await.is_empty()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Run the whole flow. True only when every mandatory step succeeded.
    pub async fn submit(&self, listing: &ListingRequest) -> bool {
        let (ok, _) = self.run(listing).await;
        ok
    }

    /// Like [`submit`](Self::submit) but returns the per-step trail.
    pub async fn run(&self, listing: &ListingRequest) -> (bool, Vec<StepResult>) {
        let steps = build_steps(listing);
        let mut results = Vec::with_capacity(steps.len());
        let mut sub_location_ok = false;

        if !self.ensure_alive().await {
            error!("flow: browser session is unresponsive, aborting");
            return (false, results);
        }

        for step in &steps {
            // Uploads are the long-haul part of the flow; re-check the
            // session is still answering before committing to them.
            if step.id == StepId::ImageUpload && !self.ensure_alive().await {
                error!("flow: session lost before image upload, aborting");
                return (false, results);
            }

            // The third level only exists under the sub-location we clicked.
            if step.id == StepId::LocationThirdLevel && !sub_location_ok {
                info!("flow: {:?} skipped, sub-location was not selected", step.id);
                results.push(StepResult {
                    id: step.id,
                    outcome: StepOutcome::Skipped,
                });
                continue;
            }

            if let Some(marker) = &step.await_first {
                if !self.resolver.wait_present(marker).await {
                    warn!("flow: {:?} readiness marker not found, continuing", step.id);
                }
            }

            let ok = self.execute(step, listing).await;
            if step.id == StepId::LocationSubLocation {
                sub_location_ok = ok;
            }
            results.push(StepResult {
                id: step.id,
                outcome: if ok {
                    StepOutcome::Succeeded
                } else {
                    StepOutcome::Failed
                },
            });

            if ok {
                info!("flow: {:?} done", step.id);
            } else {
                match step.criticality {
                    Criticality::Mandatory => {
                        error!("flow: {:?} failed, aborting", step.id);
                        return (false, results);
                    }
                    Criticality::BestEffort => {
                        warn!("flow: {:?} failed, continuing", step.id);
                    }
                }
            }
        }

        (true, results)
    }

    async fn execute(&self, step: &StepSpec, listing: &ListingRequest) -> bool {
        match &step.action {
            StepAction::DismissOverlays => {
                self.dismiss_overlays().await;
                true
            }
            StepAction::Click { plan, url_hints } => {
                self.resolver.click(plan, url_hints).await
            }
            StepAction::Type { plan, text } => self.resolver.set_value(plan, text).await,
            StepAction::UploadImages => self.upload_images(listing).await,
            StepAction::ThirdLevelPick { exclude } => self.third_level_pick(exclude).await,
            StepAction::ConditionPick { condition } => self.condition_pick(condition).await,
        }
    }

    /// Click the requested condition option, falling back once to the
    /// default when the site does not offer it.
    async fn condition_pick(&self, condition: &str) -> bool {
        if self.resolver.click(&site::condition_option(condition), &[]).await {
            return true;
        }
        if condition == DEFAULT_CONDITION {
            return false;
        }
        warn!(
            "flow: condition '{}' not offered, falling back to '{}'",
            condition, DEFAULT_CONDITION
        );
        self.resolver
            .click(&site::condition_option(DEFAULT_CONDITION), &[])
            .await
    }

    async fn dismiss_overlays(&self) {
        let driver = self.resolver.driver();
        for selector in site::overlay_close().iter() {
            if let Some(el) = driver.find(selector).await {
                if driver.is_visible(el).await {
                    match driver.click_js(el).await {
                        Ok(()) => info!("flow: dismissed overlay via {:?}", selector),
                        Err(e) => warn!("flow: overlay close click failed: {}", e),
                    }
                    break;
                }
            }
        }
        // Clears focus traps and any overlay without a close button.
        driver.press_escape().await;
    }

    async fn upload_images(&self, listing: &ListingRequest) -> bool {
        let mut all_ok = true;
        for image in &listing.images {
            if self.resolver.upload_file(&site::image_input(), image).await {
                if !self.resolver.wait_present(&site::image_thumbnail()).await {
                    warn!(
                        "flow: no thumbnail appeared for {}, continuing",
                        image.display()
                    );
                }
            } else {
                warn!("flow: upload failed for {}", image.display());
                all_ok = false;
            }
        }
        all_ok
    }

    async fn third_level_pick(&self, exclude: &[String]) -> bool {
        let texts = self.resolver.driver().candidate_texts().await;
        let Some(pick) = pick_third_level(&texts, exclude) else {
            info!("flow: no third-level location offered");
            return false;
        };
        info!("flow: picking third-level location '{}'", pick);
        self.resolver
            .click(&SelectorPlan::single(Selector::text(pick)), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(location: &str, sub: Option<&str>, images: usize) -> ListingRequest {
        ListingRequest {
            title: "Bike".into(),
            description: "Good bike".into(),
            price: "£20".into(),
            category: "Bicycles".into(),
            location: location.into(),
            sub_location: sub.map(|s| s.to_string()),
            condition: "New".into(),
            contact_phone: None,
            images: (0..images).map(|i| format!("img{i}.jpg").into()).collect(),
        }
    }

    fn ids(steps: &[StepSpec]) -> Vec<StepId> {
        steps.iter().map(|s| s.id).collect()
    }

    #[test]
    fn no_sub_location_skips_deeper_levels() {
        let steps = build_steps(&listing("Kent", None, 0));
        let ids = ids(&steps);
        assert!(!ids.contains(&StepId::LocationSubLocation));
        assert!(!ids.contains(&StepId::LocationThirdLevel));
        assert!(!ids.contains(&StepId::ImageUpload));
        // Contact preference is always attempted, phone number or not.
        assert!(ids.contains(&StepId::ContactPreference));
        assert!(ids.contains(&StepId::LocationContinue));
    }

    #[test]
    fn category_text_is_what_gets_typed_into_the_search() {
        let steps = build_steps(&listing("Kent", None, 0));
        let search = steps
            .iter()
            .find(|s| s.id == StepId::CategorySearch)
            .unwrap();
        match &search.action {
            StepAction::Type { text, .. } => assert_eq!(text, "Bicycles"),
            _ => panic!("category search should be a typed step"),
        }
    }

    #[test]
    fn sub_location_adds_sub_and_third_level_in_order() {
        let steps = build_steps(&listing("Dorset, England", Some("Shaftesbury"), 2));
        let ids = ids(&steps);
        let sub = ids.iter().position(|i| *i == StepId::LocationSubLocation).unwrap();
        let third = ids.iter().position(|i| *i == StepId::LocationThirdLevel).unwrap();
        let cont = ids.iter().position(|i| *i == StepId::LocationContinue).unwrap();
        assert!(sub < third && third < cont);
        assert!(ids.contains(&StepId::ImageUpload));
        assert!(ids.contains(&StepId::ContactPreference));
        assert_eq!(*ids.last().unwrap(), StepId::Submit);
    }

    #[test]
    fn mandatory_steps_are_marked() {
        let steps = build_steps(&listing("Dorset, England", Some("Shaftesbury"), 0));
        for step in &steps {
            let expected = match step.id {
                StepId::DismissOverlays
                | StepId::LocationSubLocation
                | StepId::LocationThirdLevel
                | StepId::ImageUpload
                | StepId::ConditionOpen
                | StepId::ConditionPick
                | StepId::ConditionSave
                | StepId::ContactPreference => Criticality::BestEffort,
                _ => Criticality::Mandatory,
            };
            assert_eq!(step.criticality, expected, "{:?}", step.id);
        }
    }

    #[test]
    fn qualifying_picks_filters_controls_and_chosen_levels() {
        let texts: Vec<String> = [
            "Continue",
            "Back",
            "Shaftesbury",
            "Gillingham",
            "Blandford Forum",
            "...",
            "12",
            "ok",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let exclude = vec!["England".to_string(), "Dorset".to_string(), "Shaftesbury".to_string()];
        let picks = qualifying_picks(&texts, &exclude);
        assert_eq!(picks, vec!["Gillingham".to_string(), "Blandford Forum".to_string()]);
    }

    #[test]
    fn qualifying_picks_exclusion_is_case_insensitive() {
        let texts: Vec<String> = ["GILLINGHAM", "continue", "Dorset"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let exclude = vec!["gillingham".to_string(), "dorset".to_string()];
        assert!(qualifying_picks(&texts, &exclude).is_empty());
    }

    #[test]
    fn third_level_draw_is_roughly_uniform() {
        let texts: Vec<String> = ["Gillingham", "Blandford Forum", "Sherborne", "Wimborne"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut counts = std::collections::HashMap::new();
        for _ in 0..4000 {
            let pick = pick_third_level(&texts, &[]).unwrap();
            *counts.entry(pick).or_insert(0u32) += 1;
        }
        assert_eq!(counts.len(), 4);
        // Expected 1000 each; the band is wide enough to be flake-free but
        // tight enough to catch a draw biased toward one entry.
        for (name, count) in &counts {
            assert!((800..=1200).contains(count), "{name} drawn {count} times");
        }
    }
}
