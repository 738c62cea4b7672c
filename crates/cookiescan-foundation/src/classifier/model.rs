//! Heuristic cookie model.
//!
//! A deterministic token-feature scorer implementing the kernel's
//! [`CookieClassifier`] seam. It scores name and domain tokens against
//! per-category keyword tables and emits a normalised probability
//! distribution; cookies with no recognised tokens produce no prediction
//! and fall through to the rule stages.

use std::collections::BTreeMap;

use cookiescan_kernel::classify::{CookieClassifier, MlPrediction};
use cookiescan_kernel::model::cookie::{CookieCategory, ObservedCookie};

const ANALYTICS_TOKENS: &[&str] = &[
    "ga", "gid", "gat", "utm", "analytics", "hj", "hotjar", "mixpanel", "amplitude", "matomo",
    "pk", "clarity", "stat", "metric", "plausible",
];
const ADVERTISING_TOKENS: &[&str] = &[
    "ad", "ads", "fbp", "fbc", "doubleclick", "gcl", "pin", "uet", "taboola", "criteo",
    "campaign", "retarget", "dsp", "bid",
];
const NECESSARY_TOKENS: &[&str] = &[
    "session", "sess", "sid", "csrf", "xsrf", "auth", "token", "login", "secure", "consent",
    "cf", "captcha",
];
const FUNCTIONAL_TOKENS: &[&str] = &[
    "lang", "locale", "language", "theme", "pref", "prefs", "timezone", "currency", "region",
    "display",
];

/// Domains whose presence strongly signals a category regardless of name.
const DOMAIN_SIGNALS: &[(&str, CookieCategory)] = &[
    ("google-analytics.com", CookieCategory::Analytics),
    ("googletagmanager.com", CookieCategory::Analytics),
    ("hotjar.com", CookieCategory::Analytics),
    ("mixpanel.com", CookieCategory::Analytics),
    ("clarity.ms", CookieCategory::Analytics),
    ("doubleclick.net", CookieCategory::Advertising),
    ("facebook.com", CookieCategory::Advertising),
    ("facebook.net", CookieCategory::Advertising),
    ("linkedin.com", CookieCategory::Advertising),
    ("cloudflare.com", CookieCategory::Necessary),
];

/// Known tracker domains mapped to vendor display names, used to attribute
/// a vendor when the model supplies the category.
pub fn vendor_from_domain(cookie_domain: &str) -> String {
    const VENDOR_MAP: &[(&str, &str)] = &[
        ("google-analytics.com", "Google Analytics"),
        ("googletagmanager.com", "Google Tag Manager"),
        ("doubleclick.net", "Google DoubleClick"),
        ("facebook.com", "Facebook"),
        ("facebook.net", "Facebook"),
        ("hotjar.com", "Hotjar"),
        ("mixpanel.com", "Mixpanel"),
        ("linkedin.com", "LinkedIn"),
        ("clarity.ms", "Microsoft Clarity"),
        ("cloudflare.com", "Cloudflare"),
    ];

    let domain = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
    for (vendor_domain, vendor_name) in VENDOR_MAP {
        if domain.contains(vendor_domain) {
            return (*vendor_name).to_string();
        }
    }
    "Unknown".to_string()
}

/// The default model.
#[derive(Debug, Default)]
pub struct HeuristicModel;

impl HeuristicModel {
    pub fn new() -> Self {
        Self
    }

    fn tokens(name: &str) -> Vec<String> {
        name.to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }
}

impl CookieClassifier for HeuristicModel {
    fn classify(&self, cookie: &ObservedCookie) -> Option<MlPrediction> {
        let tokens = Self::tokens(&cookie.name);
        let domain = cookie.domain.trim_start_matches('.').to_ascii_lowercase();

        let mut scores: BTreeMap<CookieCategory, f64> = BTreeMap::new();
        let mut evidence = Vec::new();

        let tables = [
            (CookieCategory::Analytics, ANALYTICS_TOKENS),
            (CookieCategory::Advertising, ADVERTISING_TOKENS),
            (CookieCategory::Necessary, NECESSARY_TOKENS),
            (CookieCategory::Functional, FUNCTIONAL_TOKENS),
        ];

        for token in &tokens {
            for (category, table) in tables {
                if table.contains(&token.as_str()) {
                    *scores.entry(category).or_insert(0.0) += 1.0;
                    evidence.push(format!("Token '{token}' indicates {}", category.as_str()));
                }
            }
        }

        for (signal_domain, category) in DOMAIN_SIGNALS {
            if domain.contains(signal_domain) {
                *scores.entry(*category).or_insert(0.0) += 2.0;
                evidence.push(format!(
                    "Domain '{signal_domain}' indicates {}",
                    category.as_str()
                ));
            }
        }

        if scores.is_empty() {
            return None;
        }

        let total: f64 = scores.values().sum();
        let probabilities: BTreeMap<String, f64> = scores
            .iter()
            .map(|(category, score)| (category.as_str().to_string(), score / total))
            .collect();

        let (&best_category, &best_score) = scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        // Confidence grows with both dominance and signal strength: a lone
        // weak token never clears the blend threshold.
        let dominance = best_score / total;
        let strength = (best_score / 3.0).min(1.0);
        let confidence = (dominance * (0.5 + 0.5 * strength)).min(0.99);

        Some(MlPrediction {
            category: best_category,
            confidence,
            probabilities,
            evidence,
        })
    }
}
