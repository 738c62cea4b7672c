//! Cookie observations and their compliance classification.
//!
//! Two layers of type enforce the value-privacy invariant:
//!
//! - [`ObservedCookie`] is what the executor keeps after a snapshot. It
//!   carries the SHA-256 digest and byte length of the raw value but not the
//!   value itself — the raw value is dropped at construction time.
//! - [`Cookie`] is an observation plus the classification the cascade
//!   attached to it; this is the persisted shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Value hashing & duration text
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a raw value.
pub fn hash_value(raw: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Human-readable remaining lifetime of a cookie.
///
/// `None` or `-1` expiry means a session cookie; a past expiry reads
/// `"Expired"`; under a day remaining reads in whole minutes; anything
/// longer in days with one decimal.
pub fn cookie_duration(expires: Option<f64>, now: DateTime<Utc>) -> String {
    let expiry_ts = match expires {
        None => return "Session".to_string(),
        Some(ts) if ts == -1.0 || ts == 0.0 => return "Session".to_string(),
        Some(ts) => ts,
    };

    let delta_seconds = expiry_ts - now.timestamp() as f64;
    if delta_seconds <= 0.0 {
        "Expired".to_string()
    } else if delta_seconds < 24.0 * 3600.0 {
        format!("{:.0} minutes", delta_seconds / 60.0)
    } else {
        format!("{:.1} days", delta_seconds / (24.0 * 3600.0))
    }
}

// ---------------------------------------------------------------------------
// First/third party
// ---------------------------------------------------------------------------

/// Registrar base domain of a hostname, approximated as the last two DNS
/// labels. Known limitation: multi-label public suffixes (`*.co.uk`)
/// misclassify; see DESIGN.md.
pub fn base_domain(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.split('.').collect();
    if parts.len() >= 2 {
        parts[parts.len() - 2..].join(".")
    } else {
        hostname.to_string()
    }
}

/// Whether a cookie is first- or third-party relative to the scanned site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookieType {
    #[serde(rename = "First Party")]
    FirstParty,
    #[serde(rename = "Third Party")]
    ThirdParty,
    #[serde(rename = "unknown")]
    Unknown,
}

/// Classify a cookie domain against the scan root URL.
pub fn party_type(cookie_domain: Option<&str>, site_url: &str) -> CookieType {
    let Some(cookie_domain) = cookie_domain else {
        return CookieType::Unknown;
    };
    if cookie_domain.is_empty() {
        return CookieType::Unknown;
    }

    let cookie_domain = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
    let host = url::Url::parse(site_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_else(|| site_url.to_ascii_lowercase());
    let base = base_domain(&host);

    if cookie_domain.ends_with(&base) {
        CookieType::FirstParty
    } else {
        CookieType::ThirdParty
    }
}

// ---------------------------------------------------------------------------
// Categories & sources
// ---------------------------------------------------------------------------

/// Compliance category shown in the consent UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CookieCategory {
    Necessary,
    Functional,
    Analytics,
    Advertising,
    Unknown,
}

impl CookieCategory {
    /// Priority order used when IAB purposes map to several categories.
    pub const PRIORITY: [CookieCategory; 4] = [
        CookieCategory::Necessary,
        CookieCategory::Functional,
        CookieCategory::Analytics,
        CookieCategory::Advertising,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Necessary" => Some(Self::Necessary),
            "Functional" => Some(Self::Functional),
            "Analytics" => Some(Self::Analytics),
            "Advertising" => Some(Self::Advertising),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Necessary => "Necessary",
            Self::Functional => "Functional",
            Self::Analytics => "Analytics",
            Self::Advertising => "Advertising",
            Self::Unknown => "Unknown",
        }
    }
}

/// Which cascade stage produced the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "DB")]
    Db,
    #[serde(rename = "ML_High")]
    MlHigh,
    #[serde(rename = "ML_Low")]
    MlLow,
    #[serde(rename = "IAB")]
    Iab,
    #[serde(rename = "IAB_ML_Blend")]
    IabMlBlend,
    #[serde(rename = "RulesJSON")]
    RulesJson,
    #[serde(rename = "Rules_ML_Agree")]
    RulesMlAgree,
    #[serde(rename = "Fallback")]
    Fallback,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Db => "DB",
            Self::MlHigh => "ML_High",
            Self::MlLow => "ML_Low",
            Self::Iab => "IAB",
            Self::IabMlBlend => "IAB_ML_Blend",
            Self::RulesJson => "RulesJSON",
            Self::RulesMlAgree => "Rules_ML_Agree",
            Self::Fallback => "Fallback",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "DB" => Some(Self::Db),
            "ML_High" => Some(Self::MlHigh),
            "ML_Low" => Some(Self::MlLow),
            "IAB" => Some(Self::Iab),
            "IAB_ML_Blend" => Some(Self::IabMlBlend),
            "RulesJSON" => Some(Self::RulesJson),
            "Rules_ML_Agree" => Some(Self::RulesMlAgree),
            "Fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

/// Cookie SameSite attribute as reported by the browser.
pub type SameSite = Option<String>;

// ---------------------------------------------------------------------------
// ObservedCookie
// ---------------------------------------------------------------------------

/// One deduplicated cookie observation, raw value already discarded.
///
/// Uniqueness key across a scan is `(name, domain, path)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedCookie {
    pub name: String,
    pub domain: String,
    pub path: String,
    /// SHA-256 hex of the raw value; the raw value is never persisted.
    pub hashed_value: String,
    pub cookie_duration: String,
    /// Byte length of the raw UTF-8 value.
    pub size: usize,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub cookie_type: CookieType,
    /// True iff first observed only after a successful consent click.
    pub set_after_accept: bool,
}

impl ObservedCookie {
    /// The scan-wide deduplication key.
    pub fn dedup_key(&self) -> (String, String, String) {
        (self.name.clone(), self.domain.clone(), self.path.clone())
    }
}

// ---------------------------------------------------------------------------
// Classification & final cookie
// ---------------------------------------------------------------------------

/// The annotation a cascade stage attaches to an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: CookieCategory,
    pub vendor: String,
    pub description: String,
    pub iab_purposes: Vec<u8>,
    pub source: Source,
    pub ml_confidence: Option<f64>,
    pub ml_probabilities: Option<std::collections::BTreeMap<String, f64>>,
    pub classification_evidence: Vec<String>,
    pub requires_review: bool,
}

impl Classification {
    /// The end-of-cascade default: nothing matched anywhere.
    pub fn fallback() -> Self {
        Self {
            category: CookieCategory::Unknown,
            vendor: "Unknown".to_string(),
            description: "No classification available".to_string(),
            iab_purposes: Vec::new(),
            source: Source::Fallback,
            ml_confidence: None,
            ml_probabilities: None,
            classification_evidence: vec!["No matching rules or patterns found".to_string()],
            requires_review: true,
        }
    }
}

/// A classified cookie — the persisted shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    #[serde(flatten)]
    pub observed: ObservedCookie,
    #[serde(flatten)]
    pub classification: Classification,
}
