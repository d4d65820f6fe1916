//! Cache fingerprints.
//!
//! Shape: `{purpose}:{hash(query)}:{hour_bucket?}:{param_hash}` — human
//! inspectable, stable across runs. Time-sensitive artifacts must carry the
//! hour bucket so TTL alone can never serve stale analysis across hour
//! boundaries; invariant-stable artifacts (query analysis, plan) omit it.

use chrono::Utc;
use sha2::{Digest, Sha256};

fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..len].to_string()
}

/// Collapse whitespace and case so trivially different spellings share keys.
pub fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Current UTC hour bucket, e.g. `2025073114`.
pub fn hour_bucket() -> String {
    Utc::now().format("%Y%m%d%H").to_string()
}

pub fn fingerprint(purpose: &str, query: &str, params: &str, time_sensitive: bool) -> String {
    let query_hash = short_hash(&normalize_query(query), 16);
    let param_hash = short_hash(params, 8);
    if time_sensitive {
        format!("{purpose}:{query_hash}:{}:{param_hash}", hour_bucket())
    } else {
        format!("{purpose}:{query_hash}:{param_hash}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_query("  삼성전자   뉴스 "),
            normalize_query("삼성전자 뉴스")
        );
        assert_eq!(normalize_query("HBM News"), normalize_query("hbm news"));
    }

    #[test]
    fn stable_for_identical_input() {
        let a = fingerprint("analysis", "삼성전자 전망", "d180", false);
        let b = fingerprint("analysis", "삼성전자 전망", "d180", false);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_by_purpose_and_params() {
        let a = fingerprint("analysis", "q", "d180", false);
        let b = fingerprint("plan", "q", "d180", false);
        let c = fingerprint("analysis", "q", "d30", false);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn time_sensitive_keys_carry_hour_bucket() {
        let key = fingerprint("news", "q", "", true);
        assert!(key.contains(&hour_bucket()));
        assert_eq!(key.split(':').count(), 4);
    }

    #[test]
    fn stable_keys_have_three_segments() {
        let key = fingerprint("analysis", "q", "", false);
        assert_eq!(key.split(':').count(), 3);
    }
}
