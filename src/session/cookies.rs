//! Cookie persistence and domain normalization.
//!
//! Cookies are stored on disk as a JSON array and bridged into CDP
//! `Network.setCookies` params via serde, so a partially-malformed jar never
//! blocks a run: records that fail to deserialize are dropped, counted, and
//! logged.
//!
//! Browsers are strict about cookie scope. A cookie captured with domain
//! `www.gumtree.com` will not be sent back for other subdomains, and some
//! session cookies come back with no domain at all. Before replay every
//! record is rewritten to the dot-prefixed registrable domain
//! (`.gumtree.com`), which is what the site sets for its own auth cookies.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One stored cookie. Field names follow the CDP `CookieParam` wire shape so
/// records can be fed straight back through `Network.setCookies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(rename = "httpOnly", skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(rename = "sameSite", skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    /// Unix seconds; `expiry` accepted for jars written by other tooling.
    #[serde(alias = "expiry", skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
}

impl CookieRecord {
    /// Parse a raw JSON value, dropping records without a usable name/value.
    pub fn from_value(v: &serde_json::Value) -> Option<Self> {
        let record: Self = serde_json::from_value(v.clone()).ok()?;
        if record.name.is_empty() || record.value.is_empty() {
            return None;
        }
        Some(record)
    }

    /// Rewrite the domain to the canonical dot-prefixed form. Idempotent.
    pub fn normalize_domain(&mut self, site_domain: &str) {
        self.domain = Some(match self.domain.take() {
            None => site_domain.to_string(),
            Some(d) if d.is_empty() => site_domain.to_string(),
            Some(d) if d.starts_with('.') => d,
            Some(d) => {
                let host = d.strip_prefix("www.").unwrap_or(&d);
                format!(".{}", host)
            }
        });
    }
}

/// Dot-prefixed registrable domain for `base_url`,
/// e.g. `https://www.gumtree.com/` becomes `.gumtree.com`.
pub fn site_domain(base_url: &str) -> String {
    let host = url::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "gumtree.com".to_string());
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    format!(".{}", host)
}

/// Parse and normalize a raw cookie array, dropping invalid entries.
pub fn normalize_all(raw: &[serde_json::Value], site_domain: &str) -> Vec<CookieRecord> {
    let mut records = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for v in raw {
        match CookieRecord::from_value(v) {
            Some(mut record) => {
                record.normalize_domain(site_domain);
                records.push(record);
            }
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!("cookies: dropped {} invalid records (missing name/value)", dropped);
    }
    records
}

/// Drop records whose expiry is already in the past. Session-scoped cookies
/// (no expiry, or a negative sentinel) are kept.
pub fn prune_expired(records: Vec<CookieRecord>, now_unix: f64) -> Vec<CookieRecord> {
    let before = records.len();
    let kept: Vec<CookieRecord> = records
        .into_iter()
        .filter(|r| match r.expires {
            Some(exp) if exp > 0.0 => exp > now_unix,
            _ => true,
        })
        .collect();
    let expired = before - kept.len();
    if expired > 0 {
        info!("cookies: pruned {} expired records", expired);
    }
    kept
}

/// Load the jar from disk. `None` when the file is absent, unreadable or empty.
pub fn load(path: &Path) -> Option<Vec<serde_json::Value>> {
    if !path.exists() {
        return None;
    }
    let content = std::fs::read_to_string(path).ok()?;
    let raw: Vec<serde_json::Value> = serde_json::from_str(&content).ok()?;
    if raw.is_empty() {
        return None;
    }
    info!("cookies: loaded {} records from {}", raw.len(), path.display());
    Some(raw)
}

/// Persist normalized records, creating parent directories as needed.
pub fn save(path: &Path, records: &[CookieRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    std::fs::write(path, json)?;
    info!("cookies: saved {} records to {}", records.len(), path.display());
    Ok(())
}

/// Remove a stale jar so the next run starts from a clean login.
pub fn invalidate(path: &Path) {
    if path.exists() {
        match std::fs::remove_file(path) {
            Ok(()) => info!("cookies: removed stale jar {}", path.display()),
            Err(e) => warn!("cookies: failed to remove {}: {}", path.display(), e),
        }
    }
}

/// Records as raw JSON values in `CookieParam` shape, ready for injection.
pub fn to_cdp_values(records: &[CookieRecord]) -> Vec<serde_json::Value> {
    records
        .iter()
        .filter_map(|r| serde_json::to_value(r).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn www_domain_is_rewritten_to_dot_scope() {
        let mut r = CookieRecord::from_value(
            &json!({"name": "sid", "value": "abc", "domain": "www.gumtree.com"}),
        )
        .unwrap();
        r.normalize_domain(".gumtree.com");
        assert_eq!(r.domain.as_deref(), Some(".gumtree.com"));
    }

    #[test]
    fn absent_domain_gets_site_default() {
        let mut r =
            CookieRecord::from_value(&json!({"name": "sid", "value": "abc"})).unwrap();
        r.normalize_domain(".gumtree.com");
        assert_eq!(r.domain.as_deref(), Some(".gumtree.com"));
    }

    #[test]
    fn dot_scoped_domain_passes_through() {
        let mut r = CookieRecord::from_value(
            &json!({"name": "sid", "value": "abc", "domain": ".gumtree.com"}),
        )
        .unwrap();
        r.normalize_domain(".gumtree.com");
        assert_eq!(r.domain.as_deref(), Some(".gumtree.com"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = vec![json!({"name": "sid", "value": "abc", "domain": "www.gumtree.com"})];
        let once = normalize_all(&raw, ".gumtree.com");
        let twice = normalize_all(&to_cdp_values(&once), ".gumtree.com");
        assert_eq!(once, twice);
    }

    #[test]
    fn records_missing_name_or_value_are_dropped() {
        let raw = vec![
            json!({"name": "ok", "value": "v"}),
            json!({"value": "orphan"}),
            json!({"name": "", "value": "blank"}),
            json!({"name": "novalue"}),
        ];
        let records = normalize_all(&raw, ".gumtree.com");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ok");
    }

    #[test]
    fn selenium_expiry_alias_is_accepted() {
        let r = CookieRecord::from_value(
            &json!({"name": "sid", "value": "abc", "expiry": 1_800_000_000.0}),
        )
        .unwrap();
        assert_eq!(r.expires, Some(1_800_000_000.0));
        // Serializes back under the CDP name.
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("expires").is_some());
        assert!(v.get("expiry").is_none());
    }

    #[test]
    fn prune_keeps_session_cookies_and_drops_stale_ones() {
        let raw = vec![
            json!({"name": "session", "value": "s", "expires": -1.0}),
            json!({"name": "fresh", "value": "f", "expires": 2_000.0}),
            json!({"name": "stale", "value": "x", "expires": 500.0}),
            json!({"name": "no_expiry", "value": "n"}),
        ];
        let records = normalize_all(&raw, ".gumtree.com");
        let kept = prune_expired(records, 1_000.0);
        let names: Vec<&str> = kept.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["session", "fresh", "no_expiry"]);
    }

    #[test]
    fn site_domain_from_base_url() {
        assert_eq!(site_domain("https://www.gumtree.com/"), ".gumtree.com");
        assert_eq!(site_domain("https://gumtree.com/"), ".gumtree.com");
    }

    #[test]
    fn invalidate_removes_the_jar_file() {
        let dir = std::env::temp_dir().join(format!(
            "adpost-cookies-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let jar = dir.join("cookies.json");
        let records = normalize_all(
            &[json!({"name": "sid", "value": "abc"})],
            ".gumtree.com",
        );
        save(&jar, &records).unwrap();
        assert!(jar.exists());

        invalidate(&jar);
        assert!(!jar.exists());
        assert!(load(&jar).is_none());

        // Absent jar is a no-op, not an error.
        invalidate(&jar);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn jar_round_trips_through_cdp_shape() {
        let raw = vec![json!({
            "name": "gt_auth", "value": "tok", "domain": "www.gumtree.com",
            "path": "/", "secure": true, "httpOnly": true, "sameSite": "Lax",
            "expires": 1_800_000_000.0
        })];
        let records = normalize_all(&raw, ".gumtree.com");
        let values = to_cdp_values(&records);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["domain"], ".gumtree.com");
        assert_eq!(values[0]["httpOnly"], true);
        assert_eq!(values[0]["sameSite"], "Lax");
    }
}
