//! Classification cascade.
//!
//! Assigns `(category, vendor, source, …)` to each observed cookie through a
//! priority-ordered pipeline; the first stage to accept wins:
//!
//! 1. per-domain DB override (`DB`)
//! 2. high-confidence model prediction (`ML_High`, confidence ≥ 0.75)
//! 3. IAB vendor map via rules carrying an `iab_id` (`IAB`, promoted to
//!    `IAB_ML_Blend` when a ≥ 0.50 model prediction agrees)
//! 4. first matching regex rule (`RulesJSON`, promoted to `Rules_ML_Agree`
//!    when a ≥ 0.50 model prediction agrees)
//! 5. low-confidence model prediction (`ML_Low`, flagged for review)
//! 6. fallback (`Fallback`, flagged for review)
//!
//! Each stage returns a [`StageOutcome`]: accept, pass, or hand an
//! annotation (the model prediction) to the stages below it. The driver
//! carries that annotation so model evidence can decorate a rule decision
//! without letting the model override it.

pub mod gvl;
pub mod model;
pub mod rules;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use cookiescan_kernel::classify::{
    CookieClassifier, MlPrediction, ML_AGREE_CONFIDENCE, ML_HIGH_CONFIDENCE,
};
use cookiescan_kernel::model::cookie::{Classification, ObservedCookie, Source};
use cookiescan_kernel::store::DynOverrideStore;

use gvl::VendorList;
use model::{vendor_from_domain, HeuristicModel};
use rules::RuleSet;

/// What one cascade stage decided.
enum StageOutcome {
    /// Final answer; stop the cascade.
    Accept(Classification),
    /// No answer here, but carry this annotation to the stages below.
    TryNextWith(MlPrediction),
    /// Nothing to contribute.
    Pass,
}

/// Global classification state, constructed once at startup and threaded
/// through the executor. Holds the compiled rules, the vendor list, the
/// model, and a lazy per-domain override cache.
pub struct ClassifierContext {
    rules: RuleSet,
    gvl: Option<VendorList>,
    model: Arc<dyn CookieClassifier>,
    override_store: DynOverrideStore,
    override_cache: RwLock<HashMap<String, HashMap<String, Classification>>>,
}

impl ClassifierContext {
    pub fn builder() -> ClassifierContextBuilder {
        ClassifierContextBuilder::default()
    }

    /// Ensure the override cache holds an entry for this domain config.
    /// A store failure caches an empty map — overrides are best-effort.
    pub async fn prepare_domain(&self, domain_config_id: &str) {
        {
            let cache = self.override_cache.read().await;
            if cache.contains_key(domain_config_id) {
                return;
            }
        }
        let loaded = match self.override_store.overrides_for(domain_config_id).await {
            Ok(map) => map,
            Err(e) => {
                tracing::error!(domain_config_id, error = %e, "failed to load domain overrides");
                HashMap::new()
            }
        };
        self.override_cache
            .write()
            .await
            .insert(domain_config_id.to_string(), loaded);
    }

    /// Run the cascade for one cookie.
    pub async fn classify(
        &self,
        domain_config_id: &str,
        cookie: &ObservedCookie,
    ) -> Classification {
        self.prepare_domain(domain_config_id).await;

        let mut carried: Option<MlPrediction> = None;

        let outcome = self.stage_db_override(domain_config_id, cookie).await;
        match outcome {
            StageOutcome::Accept(c) => return c,
            StageOutcome::TryNextWith(p) => carried = Some(p),
            StageOutcome::Pass => {}
        }

        match self.stage_model(cookie) {
            StageOutcome::Accept(c) => return self.finish(c, carried.as_ref()),
            StageOutcome::TryNextWith(p) => carried = Some(p),
            StageOutcome::Pass => {}
        }

        match self.stage_iab(cookie, carried.as_ref()) {
            StageOutcome::Accept(c) => return self.finish(c, carried.as_ref()),
            StageOutcome::TryNextWith(p) => carried = Some(p),
            StageOutcome::Pass => {}
        }

        match self.stage_rules(cookie, carried.as_ref()) {
            StageOutcome::Accept(c) => return self.finish(c, carried.as_ref()),
            StageOutcome::TryNextWith(p) => carried = Some(p),
            StageOutcome::Pass => {}
        }

        match Self::stage_model_low(cookie, carried.as_ref()) {
            StageOutcome::Accept(c) => return c,
            _ => {}
        }

        Classification::fallback()
    }

    // -- stages -------------------------------------------------------------

    async fn stage_db_override(
        &self,
        domain_config_id: &str,
        cookie: &ObservedCookie,
    ) -> StageOutcome {
        let cache = self.override_cache.read().await;
        if let Some(overrides) = cache.get(domain_config_id) {
            if let Some(classification) = overrides.get(&cookie.name) {
                tracing::debug!(
                    cookie = %cookie.name,
                    domain_config_id,
                    "classified from database override"
                );
                return StageOutcome::Accept(classification.clone());
            }
        }
        StageOutcome::Pass
    }

    fn stage_model(&self, cookie: &ObservedCookie) -> StageOutcome {
        let Some(prediction) = self.model.classify(cookie) else {
            return StageOutcome::Pass;
        };

        if prediction.confidence >= ML_HIGH_CONFIDENCE {
            tracing::debug!(
                cookie = %cookie.name,
                category = prediction.category.as_str(),
                confidence = prediction.confidence,
                "high-confidence model classification"
            );
            return StageOutcome::Accept(Classification {
                category: prediction.category,
                vendor: vendor_from_domain(&cookie.domain),
                description: format!(
                    "ML classified with {:.1}% confidence",
                    prediction.confidence * 100.0
                ),
                iab_purposes: Vec::new(),
                source: Source::MlHigh,
                ml_confidence: Some(prediction.confidence),
                ml_probabilities: Some(prediction.probabilities.clone()),
                classification_evidence: prediction.evidence.clone(),
                requires_review: false,
            });
        }

        StageOutcome::TryNextWith(prediction)
    }

    fn stage_iab(&self, cookie: &ObservedCookie, ml: Option<&MlPrediction>) -> StageOutcome {
        let Some(gvl) = &self.gvl else {
            // GVL unreachable and no cache: step skipped, scans unaffected.
            return StageOutcome::Pass;
        };

        for rule in self.rules.iab_matches(&cookie.name, &cookie.domain) {
            let Some(iab_id) = rule.iab_id else { continue };
            let Some(vendor) = gvl.vendor(iab_id) else {
                continue;
            };

            let category = gvl::map_purposes_to_category(&vendor.purposes);
            let mut classification = Classification {
                category,
                vendor: vendor.name.clone(),
                description: format!("Cookie managed by {}", vendor.name),
                iab_purposes: vendor.purposes.clone(),
                source: Source::Iab,
                ml_confidence: None,
                ml_probabilities: None,
                classification_evidence: vec![format!("IAB Global Vendor List: {}", vendor.name)],
                requires_review: false,
            };

            if let Some(prediction) = ml {
                classification.ml_confidence = Some(prediction.confidence);
                classification.ml_probabilities = Some(prediction.probabilities.clone());
                classification
                    .classification_evidence
                    .extend(prediction.evidence.iter().cloned());
                if prediction.confidence >= ML_AGREE_CONFIDENCE && prediction.category == category {
                    classification.source = Source::IabMlBlend;
                }
            }

            return StageOutcome::Accept(classification);
        }
        StageOutcome::Pass
    }

    fn stage_rules(&self, cookie: &ObservedCookie, ml: Option<&MlPrediction>) -> StageOutcome {
        let Some(rule) = self.rules.first_match(&cookie.name, &cookie.domain) else {
            return StageOutcome::Pass;
        };

        let mut classification = Classification {
            category: rule.category,
            vendor: rule.vendor.clone(),
            description: rule.description.clone(),
            iab_purposes: rule.iab_purposes.clone(),
            source: Source::RulesJson,
            ml_confidence: None,
            ml_probabilities: None,
            classification_evidence: vec![format!(
                "Pattern match: {}",
                if rule.description.is_empty() {
                    "Local rule"
                } else {
                    &rule.description
                }
            )],
            requires_review: false,
        };

        if let Some(prediction) = ml {
            classification.ml_confidence = Some(prediction.confidence);
            classification.ml_probabilities = Some(prediction.probabilities.clone());
            classification
                .classification_evidence
                .extend(prediction.evidence.iter().cloned());

            if prediction.confidence >= ML_AGREE_CONFIDENCE && prediction.category == rule.category
            {
                classification.source = Source::RulesMlAgree;
                classification.classification_evidence.insert(
                    0,
                    format!("ML agrees ({:.1}% confidence)", prediction.confidence * 100.0),
                );
            }
        }

        StageOutcome::Accept(classification)
    }

    fn stage_model_low(cookie: &ObservedCookie, ml: Option<&MlPrediction>) -> StageOutcome {
        let Some(prediction) = ml else {
            return StageOutcome::Pass;
        };

        let mut evidence = prediction.evidence.clone();
        evidence.push("Low confidence - manual review recommended".to_string());

        StageOutcome::Accept(Classification {
            category: prediction.category,
            vendor: vendor_from_domain(&cookie.domain),
            description: format!(
                "ML classified with LOW confidence ({:.1}%)",
                prediction.confidence * 100.0
            ),
            iab_purposes: Vec::new(),
            source: Source::MlLow,
            ml_confidence: Some(prediction.confidence),
            ml_probabilities: Some(prediction.probabilities.clone()),
            classification_evidence: evidence,
            requires_review: true,
        })
    }

    /// Post-decision review flag: a weak model prediction overridden by a
    /// disagreeing higher-priority signal marks the cookie for review.
    fn finish(&self, mut classification: Classification, ml: Option<&MlPrediction>) -> Classification {
        if let Some(prediction) = ml {
            let overriding = matches!(
                classification.source,
                Source::Iab | Source::RulesJson | Source::Db
            );
            if overriding
                && prediction.category != classification.category
                && prediction.confidence < ML_AGREE_CONFIDENCE
            {
                classification.requires_review = true;
            }
        }
        classification
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`ClassifierContext`], loading the rule set and the vendor
/// list exactly once.
#[derive(Default)]
pub struct ClassifierContextBuilder {
    rules_path: Option<PathBuf>,
    gvl_url: Option<String>,
    gvl_cache_path: Option<PathBuf>,
    preset_gvl: Option<Option<VendorList>>,
    request_timeout: Option<Duration>,
    model: Option<Arc<dyn CookieClassifier>>,
    override_store: Option<DynOverrideStore>,
}

impl ClassifierContextBuilder {
    /// Load rules from this file instead of the embedded document.
    pub fn rules_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_path = Some(path.into());
        self
    }

    pub fn gvl_source(mut self, url: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        self.gvl_url = Some(url.into());
        self.gvl_cache_path = Some(cache_path.into());
        self
    }

    /// Skip GVL loading entirely (tests, offline deployments).
    pub fn with_vendor_list(mut self, gvl: Option<VendorList>) -> Self {
        self.preset_gvl = Some(gvl);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn model(mut self, model: Arc<dyn CookieClassifier>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn override_store(mut self, store: DynOverrideStore) -> Self {
        self.override_store = Some(store);
        self
    }

    pub async fn build(self) -> ClassifierContext {
        let rules = match &self.rules_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(raw) => match RuleSet::from_json(&raw) {
                    Ok(rules) => rules,
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "rules file unparsable; using embedded rules");
                        RuleSet::embedded()
                    }
                },
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "rules file unreadable; using embedded rules");
                    RuleSet::embedded()
                }
            },
            None => RuleSet::embedded(),
        };

        let gvl = match self.preset_gvl {
            Some(preset) => preset,
            None => {
                let url = self
                    .gvl_url
                    .unwrap_or_else(|| "https://vendor-list.consensu.org/v3/vendor-list.json".into());
                let cache = self
                    .gvl_cache_path
                    .unwrap_or_else(|| PathBuf::from("iab_gvl.json"));
                let timeout = self.request_timeout.unwrap_or(Duration::from_secs(10));
                gvl::load_vendor_list(&url, &cache, timeout).await
            }
        };

        ClassifierContext {
            rules,
            gvl,
            model: self
                .model
                .unwrap_or_else(|| Arc::new(HeuristicModel::new())),
            override_store: self
                .override_store
                .expect("ClassifierContextBuilder requires an override store"),
            override_cache: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemoryStore;
    use cookiescan_kernel::model::cookie::{CookieCategory, CookieType};
    use std::collections::BTreeMap;

    /// A model scripted to return one fixed prediction.
    struct ScriptedModel(Option<MlPrediction>);

    impl CookieClassifier for ScriptedModel {
        fn classify(&self, _cookie: &ObservedCookie) -> Option<MlPrediction> {
            self.0.clone()
        }
    }

    fn prediction(category: CookieCategory, confidence: f64) -> MlPrediction {
        MlPrediction {
            category,
            confidence,
            probabilities: BTreeMap::from([(category.as_str().to_string(), confidence)]),
            evidence: vec![format!("scripted: {}", category.as_str())],
        }
    }

    fn cookie(name: &str, domain: &str) -> ObservedCookie {
        ObservedCookie {
            name: name.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            hashed_value: String::new(),
            cookie_duration: "Session".to_string(),
            size: 0,
            http_only: false,
            secure: false,
            same_site: None,
            cookie_type: CookieType::FirstParty,
            set_after_accept: false,
        }
    }

    fn sample_gvl() -> VendorList {
        serde_json::from_str(
            r#"{"vendors": {"755": {"name": "Google Advertising Products", "purposes": [1, 4, 7]}}}"#,
        )
        .unwrap()
    }

    async fn context(
        gvl: Option<VendorList>,
        model: Option<MlPrediction>,
        store: Arc<InMemoryStore>,
    ) -> ClassifierContext {
        ClassifierContext::builder()
            .with_vendor_list(gvl)
            .model(Arc::new(ScriptedModel(model)))
            .override_store(store)
            .build()
            .await
    }

    #[tokio::test]
    async fn db_override_outranks_everything() {
        let store = InMemoryStore::shared();
        let mut overrides = HashMap::new();
        overrides.insert(
            "_ga".to_string(),
            Classification {
                category: CookieCategory::Necessary,
                vendor: "Operator".to_string(),
                description: "Pinned by operator".to_string(),
                iab_purposes: vec![],
                source: Source::Db,
                ml_confidence: None,
                ml_probabilities: None,
                classification_evidence: vec!["Database override (highest priority)".to_string()],
                requires_review: false,
            },
        );
        store.set_overrides("cfg-1", overrides).await;

        // Even a confident model prediction must lose to the override.
        let ctx = context(
            Some(sample_gvl()),
            Some(prediction(CookieCategory::Advertising, 0.95)),
            store,
        )
        .await;

        let result = ctx.classify("cfg-1", &cookie("_ga", ".example.test")).await;
        assert_eq!(result.source, Source::Db);
        assert_eq!(result.category, CookieCategory::Necessary);
        assert!(!result.requires_review);
    }

    #[tokio::test]
    async fn confident_model_beats_regex() {
        // `_ga` matches an Analytics rule, but the model says Advertising
        // at 0.82 — the model wins.
        let ctx = context(
            None,
            Some(prediction(CookieCategory::Advertising, 0.82)),
            InMemoryStore::shared(),
        )
        .await;

        let result = ctx.classify("cfg", &cookie("_ga", ".example.test")).await;
        assert_eq!(result.source, Source::MlHigh);
        assert_eq!(result.category, CookieCategory::Advertising);
        assert!(!result.requires_review);
        assert_eq!(result.ml_confidence, Some(0.82));
    }

    #[tokio::test]
    async fn iab_vendor_map_applies_purpose_priority() {
        // Purposes [1, 4, 7] span Necessary/Advertising/Analytics; the
        // priority order picks Necessary.
        let ctx = context(Some(sample_gvl()), None, InMemoryStore::shared()).await;

        let result = ctx.classify("cfg", &cookie("_ga", ".example.test")).await;
        assert_eq!(result.source, Source::Iab);
        assert_eq!(result.category, CookieCategory::Necessary);
        assert_eq!(result.vendor, "Google Advertising Products");
        assert_eq!(result.iab_purposes, vec![1, 4, 7]);
    }

    #[tokio::test]
    async fn iab_promotes_to_blend_when_model_agrees() {
        let ctx = context(
            Some(sample_gvl()),
            Some(prediction(CookieCategory::Necessary, 0.6)),
            InMemoryStore::shared(),
        )
        .await;

        let result = ctx.classify("cfg", &cookie("_ga", ".example.test")).await;
        assert_eq!(result.source, Source::IabMlBlend);
        assert!(result
            .classification_evidence
            .iter()
            .any(|e| e.starts_with("IAB Global Vendor List")));
    }

    #[tokio::test]
    async fn gvl_missing_falls_through_to_regex_category() {
        // No GVL: a rule with only an iab_id path falls through to the
        // rule's own category. `_ga`'s rule carries Analytics.
        let ctx = context(None, None, InMemoryStore::shared()).await;

        let result = ctx.classify("cfg", &cookie("_ga", ".example.test")).await;
        assert_eq!(result.source, Source::RulesJson);
        assert_eq!(result.category, CookieCategory::Analytics);
    }

    #[tokio::test]
    async fn rules_promote_to_agree_when_model_concurs() {
        let ctx = context(
            None,
            Some(prediction(CookieCategory::Analytics, 0.6)),
            InMemoryStore::shared(),
        )
        .await;

        let result = ctx.classify("cfg", &cookie("_ga", ".example.test")).await;
        assert_eq!(result.source, Source::RulesMlAgree);
        assert!(result.classification_evidence[0].starts_with("ML agrees"));
    }

    #[tokio::test]
    async fn weak_disagreeing_model_flags_rule_decision_for_review() {
        let ctx = context(
            None,
            Some(prediction(CookieCategory::Advertising, 0.3)),
            InMemoryStore::shared(),
        )
        .await;

        let result = ctx.classify("cfg", &cookie("_ga", ".example.test")).await;
        assert_eq!(result.source, Source::RulesJson);
        assert_eq!(result.category, CookieCategory::Analytics);
        assert!(result.requires_review);
    }

    #[tokio::test]
    async fn low_confidence_model_used_when_no_rule_matches() {
        let ctx = context(
            None,
            Some(prediction(CookieCategory::Functional, 0.4)),
            InMemoryStore::shared(),
        )
        .await;

        let result = ctx
            .classify("cfg", &cookie("unmatched_cookie_xyz", ".example.test"))
            .await;
        assert_eq!(result.source, Source::MlLow);
        assert_eq!(result.category, CookieCategory::Functional);
        assert!(result.requires_review);
    }

    #[tokio::test]
    async fn fallback_when_nothing_matches() {
        let ctx = context(None, None, InMemoryStore::shared()).await;

        let result = ctx
            .classify("cfg", &cookie("unmatched_cookie_xyz", ".example.test"))
            .await;
        assert_eq!(result.source, Source::Fallback);
        assert_eq!(result.category, CookieCategory::Unknown);
        assert_eq!(result.vendor, "Unknown");
        assert!(result.requires_review);
    }

    #[tokio::test]
    async fn override_cache_loads_once_per_domain() {
        let store = InMemoryStore::shared();
        let ctx = context(None, None, store.clone()).await;

        ctx.prepare_domain("cfg-1").await;
        // Seeding after the first load must not change cached results —
        // the cache is per-process and loaded lazily exactly once.
        let mut overrides = HashMap::new();
        overrides.insert("late".to_string(), Classification::fallback());
        store.set_overrides("cfg-1", overrides).await;

        let result = ctx.classify("cfg-1", &cookie("late", ".example.test")).await;
        assert_ne!(result.source, Source::Db);
    }
}
