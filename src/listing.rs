//! Listing payload and the small bits of normalization it carries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ListingError;

/// Country used when the location string does not spell one out.
pub const DEFAULT_COUNTRY: &str = "England";

/// Condition assumed when none is given, and retried when the requested
/// one is not offered.
pub const DEFAULT_CONDITION: &str = "New";

fn default_condition() -> String {
    DEFAULT_CONDITION.to_string()
}

/// Everything needed to post one ad.
///
/// Deserializable from a JSON file so listings can be queued on disk:
///
/// ```json
/// {
///   "title": "Bosch cordless drill",
///   "description": "Barely used, comes with two batteries.",
///   "price": "£45",
///   "category": "Power Tools",
///   "location": "Dorset, England",
///   "sub_location": "Shaftesbury",
///   "images": ["photos/drill1.jpg"]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRequest {
    pub title: String,
    pub description: String,
    /// Raw price text; may carry a currency symbol, normalized before typing.
    pub price: String,
    /// Free text fed to the site's category-suggestion search verbatim.
    pub category: String,
    /// `"County"` or `"County, Country"`.
    pub location: String,
    /// Finer-grained area under the county, clicked as visible text.
    #[serde(default)]
    pub sub_location: Option<String>,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub images: Vec<PathBuf>,
}

/// Location split out of the free-form `location` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLocation {
    pub county: String,
    pub country: String,
}

impl ListingRequest {
    /// Split `location` on the first comma into county and country, both
    /// trimmed. Without a comma the whole value is the county and the
    /// country falls back to the fixed default.
    pub fn parse_location(&self) -> ParsedLocation {
        match self.location.split_once(',') {
            Some((county, country)) => ParsedLocation {
                county: county.trim().to_string(),
                country: Some(country.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            },
            None => ParsedLocation {
                county: self.location.trim().to_string(),
                country: DEFAULT_COUNTRY.to_string(),
            },
        }
    }

    /// Price with currency symbols and thousands separators stripped, ready
    /// for a numeric input field. `"£1,250.50"` becomes `"1250.50"`.
    pub fn normalized_price(&self) -> String {
        self.price
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect()
    }

    /// Structural validation before any browser work starts.
    pub fn validate(&self) -> Result<(), ListingError> {
        if self.title.trim().is_empty() {
            return Err(ListingError::MissingField("title"));
        }
        if self.description.trim().is_empty() {
            return Err(ListingError::MissingField("description"));
        }
        if self.normalized_price().is_empty() {
            return Err(ListingError::MissingField("price"));
        }
        if self.category.trim().is_empty() {
            return Err(ListingError::MissingField("category"));
        }
        if self.location.trim().is_empty() {
            return Err(ListingError::MissingField("location"));
        }
        for img in &self.images {
            if !img.exists() {
                return Err(ListingError::MissingImage(img.display().to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(location: &str, price: &str) -> ListingRequest {
        ListingRequest {
            title: "Bosch cordless drill".into(),
            description: "Barely used.".into(),
            price: price.into(),
            category: "Power Tools".into(),
            location: location.into(),
            sub_location: None,
            condition: default_condition(),
            contact_phone: None,
            images: vec![],
        }
    }

    #[test]
    fn location_with_comma_splits_county_and_country() {
        let parsed = listing("Dorset, England", "45").parse_location();
        assert_eq!(parsed.county, "Dorset");
        assert_eq!(parsed.country, "England");

        // No space after the comma works the same way.
        let parsed = listing("Cardiff,Wales", "45").parse_location();
        assert_eq!(parsed.county, "Cardiff");
        assert_eq!(parsed.country, "Wales");
    }

    #[test]
    fn location_without_comma_defaults_country() {
        let parsed = listing("Bristol", "45").parse_location();
        assert_eq!(parsed.county, "Bristol");
        assert_eq!(parsed.country, "England");
    }

    #[test]
    fn location_trims_whitespace_and_defaults_empty_country() {
        let parsed = listing("  Dorset ,  ", "45").parse_location();
        assert_eq!(parsed.county, "Dorset");
        assert_eq!(parsed.country, "England");
    }

    #[test]
    fn price_strips_currency_and_separators() {
        assert_eq!(listing("Dorset", "£1,250.50").normalized_price(), "1250.50");
        assert_eq!(listing("Dorset", "$45").normalized_price(), "45");
        assert_eq!(listing("Dorset", " 45 ").normalized_price(), "45");
    }

    #[test]
    fn validate_rejects_blank_title_and_symbol_only_price() {
        let mut l = listing("Dorset", "£");
        assert!(matches!(
            l.validate(),
            Err(ListingError::MissingField("price"))
        ));
        l.price = "45".into();
        l.title = "  ".into();
        assert!(matches!(
            l.validate(),
            Err(ListingError::MissingField("title"))
        ));
    }

    #[test]
    fn validate_rejects_blank_category() {
        let mut l = listing("Dorset", "45");
        l.category = "  ".into();
        assert!(matches!(
            l.validate(),
            Err(ListingError::MissingField("category"))
        ));
    }

    #[test]
    fn default_condition_applies_on_deserialize() {
        let l: ListingRequest = serde_json::from_str(
            r#"{"title":"t","description":"d","price":"5","category":"c","location":"Kent"}"#,
        )
        .unwrap();
        assert_eq!(l.condition, "New");
        assert_eq!(l.sub_location, None);
        assert!(l.images.is_empty());
    }
}
