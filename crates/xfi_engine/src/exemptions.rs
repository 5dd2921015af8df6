//! Exemption matching.

use chrono::{DateTime, NaiveDate, Utc};
use globset::Glob;
use tracing::{debug, warn};

use xfi_types::Exemption;

/// Returns true iff some exemption covers `(repo_url, rule_name)`.
///
/// An exemption matches when its rule name equals the rule, its repo URL
/// equals the current repo (or its glob `pattern` matches it), and its
/// expiry, if any, lies in the future. The decision is taken once per rule
/// at engine setup and materialized by rewriting the rule's event type.
pub fn is_exempt(exemptions: &[Exemption], repo_url: &str, rule_name: &str) -> bool {
    exemptions.iter().any(|exemption| {
        if exemption.rule_name != rule_name {
            return false;
        }
        if !repo_matches(exemption, repo_url) {
            return false;
        }
        if !still_valid(exemption) {
            debug!(
                "Exemption for rule '{}' on '{}' has expired",
                rule_name, repo_url
            );
            return false;
        }
        true
    })
}

fn repo_matches(exemption: &Exemption, repo_url: &str) -> bool {
    if exemption.repo_url == repo_url {
        return true;
    }
    match &exemption.pattern {
        Some(pattern) => match Glob::new(pattern) {
            Ok(glob) => glob.compile_matcher().is_match(repo_url),
            Err(e) => {
                warn!("Invalid exemption pattern '{}': {}", pattern, e);
                false
            }
        },
        None => false,
    }
}

fn still_valid(exemption: &Exemption) -> bool {
    let Some(raw) = &exemption.expiration_date else {
        return true;
    };

    let expiry = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|date| date.and_hms_opt(23, 59, 59).unwrap_or_default().and_utc())
        });

    match expiry {
        Ok(expiry) => expiry > Utc::now(),
        Err(_) => {
            warn!(
                "Unparseable exemption expiry '{}' for rule '{}', treating as expired",
                raw, exemption.rule_name
            );
            false
        }
    }
}
