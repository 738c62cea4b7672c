//! Static classification rules.
//!
//! Rules are loaded once at startup from a JSON document (the embedded
//! default, or an operator-supplied file) and compiled to case-insensitive
//! regexes. Bad patterns are skipped with a log rather than failing
//! startup.

use cookiescan_kernel::model::cookie::CookieCategory;
use regex::RegexBuilder;
use serde::Deserialize;

/// The rule document shipped with the service.
pub const DEFAULT_RULES_JSON: &str = include_str!("cookie_rules.json");

#[derive(Debug, Deserialize)]
struct RulesDocument {
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    pattern: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    iab_id: Option<u32>,
    #[serde(default)]
    vendor: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    iab_purposes: Vec<u8>,
    #[serde(default)]
    domains: Vec<String>,
}

/// One compiled rule.
#[derive(Debug)]
pub struct ClassificationRule {
    pub pattern: regex::Regex,
    pub category: CookieCategory,
    pub iab_id: Option<u32>,
    pub vendor: String,
    pub description: String,
    pub iab_purposes: Vec<u8>,
    /// When non-empty the rule only applies to cookies whose domain ends
    /// with one of these suffixes.
    pub allowed_domains: Vec<String>,
}

impl ClassificationRule {
    /// Whether this rule applies to a cookie with the given name and domain.
    pub fn matches(&self, name: &str, cookie_domain: &str) -> bool {
        if !self.pattern.is_match(name) {
            return false;
        }
        if self.allowed_domains.is_empty() {
            return true;
        }
        let domain = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
        self.allowed_domains
            .iter()
            .any(|allowed| domain.ends_with(allowed))
    }
}

/// All compiled rules, in document order (first match wins).
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<ClassificationRule>,
}

impl RuleSet {
    /// Parse and compile a rules document.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let doc: RulesDocument = serde_json::from_str(raw)?;
        let mut rules = Vec::with_capacity(doc.rules.len());

        for raw_rule in doc.rules {
            let pattern = match RegexBuilder::new(&raw_rule.pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(pattern = %raw_rule.pattern, error = %e, "skipping unparsable rule");
                    continue;
                }
            };
            rules.push(ClassificationRule {
                pattern,
                category: raw_rule
                    .category
                    .as_deref()
                    .and_then(CookieCategory::parse)
                    .unwrap_or(CookieCategory::Unknown),
                iab_id: raw_rule.iab_id,
                vendor: raw_rule.vendor,
                description: raw_rule.description,
                iab_purposes: raw_rule.iab_purposes,
                allowed_domains: raw_rule
                    .domains
                    .into_iter()
                    .map(|d| d.to_ascii_lowercase())
                    .collect(),
            });
        }

        Ok(Self { rules })
    }

    /// The embedded default rule set.
    pub fn embedded() -> Self {
        Self::from_json(DEFAULT_RULES_JSON).expect("embedded rules document must parse")
    }

    /// First rule matching the cookie, in document order.
    pub fn first_match(&self, name: &str, cookie_domain: &str) -> Option<&ClassificationRule> {
        self.rules.iter().find(|r| r.matches(name, cookie_domain))
    }

    /// Rules matching the cookie that carry an IAB vendor id, in order.
    pub fn iab_matches<'a>(
        &'a self,
        name: &'a str,
        cookie_domain: &'a str,
    ) -> impl Iterator<Item = &'a ClassificationRule> {
        self.rules
            .iter()
            .filter(move |r| r.iab_id.is_some() && r.matches(name, cookie_domain))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
