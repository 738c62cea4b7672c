//! IAB Global Vendor List loading and purpose mapping.
//!
//! The GVL is fetched once at startup. A local cache file is preferred when
//! present; on network failure the cache is the fallback; when both are
//! missing the vendor-map cascade step is silently skipped.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use cookiescan_kernel::model::cookie::CookieCategory;
use serde::Deserialize;

/// The vendor list as the cascade consumes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorList {
    #[serde(default)]
    pub vendors: HashMap<String, Vendor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vendor {
    pub name: String,
    #[serde(default)]
    pub purposes: Vec<u8>,
}

impl VendorList {
    pub fn vendor(&self, iab_id: u32) -> Option<&Vendor> {
        self.vendors.get(&iab_id.to_string())
    }
}

/// Collapse an IAB purpose id into a CMP category.
///
/// The mapping table is fixed:
/// `{1,2 → Necessary; 3,8,9 → Functional; 6,7,10 → Analytics; 4,5 → Advertising}`.
pub fn purpose_category(purpose: u8) -> Option<CookieCategory> {
    match purpose {
        1 | 2 => Some(CookieCategory::Necessary),
        3 | 8 | 9 => Some(CookieCategory::Functional),
        6 | 7 | 10 => Some(CookieCategory::Analytics),
        4 | 5 => Some(CookieCategory::Advertising),
        _ => None,
    }
}

/// Map a vendor's purposes to one category by the fixed priority order
/// `Necessary > Functional > Analytics > Advertising`.
pub fn map_purposes_to_category(purposes: &[u8]) -> CookieCategory {
    let mapped: Vec<CookieCategory> = purposes.iter().filter_map(|p| purpose_category(*p)).collect();
    for candidate in CookieCategory::PRIORITY {
        if mapped.contains(&candidate) {
            return candidate;
        }
    }
    CookieCategory::Unknown
}

/// Load the GVL: cache fast path, then remote fetch (writing the cache
/// best-effort), then cache fallback. `None` means step 3 of the cascade is
/// unavailable; scans proceed regardless.
pub async fn load_vendor_list(
    url: &str,
    cache_path: &Path,
    timeout: Duration,
) -> Option<VendorList> {
    if let Some(cached) = read_cache(cache_path) {
        return Some(cached);
    }

    match fetch_remote(url, timeout).await {
        Ok(raw) => {
            if let Err(e) = std::fs::write(cache_path, &raw) {
                tracing::warn!(path = %cache_path.display(), error = %e, "unable to write GVL cache");
            }
            match serde_json::from_str(&raw) {
                Ok(list) => Some(list),
                Err(e) => {
                    tracing::warn!(error = %e, "fetched GVL does not parse");
                    None
                }
            }
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "failed to fetch IAB GVL");
            read_cache(cache_path)
        }
    }
}

fn read_cache(cache_path: &Path) -> Option<VendorList> {
    if !cache_path.exists() {
        return None;
    }
    match std::fs::read_to_string(cache_path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(list) => Some(list),
            Err(e) => {
                tracing::warn!(path = %cache_path.display(), error = %e, "GVL cache unreadable");
                None
            }
        },
        Err(e) => {
            tracing::warn!(path = %cache_path.display(), error = %e, "GVL cache unreadable");
            None
        }
    }
}

async fn fetch_remote(url: &str, timeout: Duration) -> Result<String, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send().await?.error_for_status()?;
    response.text().await
}
