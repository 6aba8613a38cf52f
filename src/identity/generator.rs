use super::profile::{Browser, IdentityCriteria, IdentityProfile, Platform};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of new identity profiles
///
/// The rotator calls this whenever it has no usable cached profile. Generators
/// must honour every criterion that is set; unset criteria are theirs to pick.
pub trait IdentityProfileGenerator: Send + Sync {
    fn generate(&self, criteria: &IdentityCriteria) -> IdentityProfile;
}

const CHROME_VERSIONS: &[u32] = &[126, 127, 128, 129, 130];
const FIREFOX_VERSIONS: &[u32] = &[127, 128, 129, 130];
const SAFARI_VERSIONS: &[&str] = &["17.4", "17.5", "17.6", "18.0"];

const DESKTOP_SYSTEMS: &[&str] = &[
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 10_15_7",
    "X11; Linux x86_64",
];

const DEFAULT_LOCALES: &[&str] = &["en-US", "en-GB", "de-DE", "fr-FR"];

/// Generator that assembles browser-like headers from built-in tables
pub struct BuiltinProfileGenerator {
    rng: Mutex<StdRng>,
    next_id: AtomicU64,
}

impl BuiltinProfileGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deterministic generator for tests and reproducible runs
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for BuiltinProfileGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProfileGenerator for BuiltinProfileGenerator {
    fn generate(&self, criteria: &IdentityCriteria) -> IdentityProfile {
        let mut rng = self.rng.lock();

        let platform = criteria.platform.unwrap_or_else(|| {
            if rng.gen_bool(0.8) {
                Platform::Desktop
            } else {
                Platform::Mobile
            }
        });
        let browser = criteria.browser.unwrap_or_else(|| {
            *[Browser::Chrome, Browser::Firefox, Browser::Safari]
                .choose(&mut *rng)
                .unwrap_or(&Browser::Chrome)
        });
        let locale = criteria.locale.clone().unwrap_or_else(|| {
            DEFAULT_LOCALES
                .choose(&mut *rng)
                .copied()
                .unwrap_or("en-US")
                .to_string()
        });

        let user_agent = build_user_agent(&mut *rng, platform, browser);
        let headers = build_headers(&user_agent, platform, browser, &locale);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        IdentityProfile::new(id, headers, platform, browser, locale)
    }
}

fn build_user_agent(rng: &mut impl Rng, platform: Platform, browser: Browser) -> String {
    match (platform, browser) {
        (Platform::Desktop, Browser::Chrome) => {
            let system = DESKTOP_SYSTEMS.choose(rng).copied().unwrap_or(DESKTOP_SYSTEMS[0]);
            let version = CHROME_VERSIONS.choose(rng).copied().unwrap_or(128);
            format!(
                "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.0.0 Safari/537.36",
                system, version
            )
        }
        (Platform::Desktop, Browser::Firefox) => {
            let system = DESKTOP_SYSTEMS.choose(rng).copied().unwrap_or(DESKTOP_SYSTEMS[0]);
            let version = FIREFOX_VERSIONS.choose(rng).copied().unwrap_or(128);
            format!(
                "Mozilla/5.0 ({}; rv:{}.0) Gecko/20100101 Firefox/{}.0",
                system, version, version
            )
        }
        (Platform::Desktop, Browser::Safari) => {
            let version = SAFARI_VERSIONS.choose(rng).copied().unwrap_or("17.5");
            format!(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/{} Safari/605.1.15",
                version
            )
        }
        (Platform::Mobile, Browser::Chrome) => {
            let version = CHROME_VERSIONS.choose(rng).copied().unwrap_or(128);
            format!(
                "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.0.0 Mobile Safari/537.36",
                version
            )
        }
        (Platform::Mobile, Browser::Firefox) => {
            let version = FIREFOX_VERSIONS.choose(rng).copied().unwrap_or(128);
            format!(
                "Mozilla/5.0 (Android 14; Mobile; rv:{}.0) Gecko/{}.0 Firefox/{}.0",
                version, version, version
            )
        }
        (Platform::Mobile, Browser::Safari) => {
            let version = SAFARI_VERSIONS.choose(rng).copied().unwrap_or("17.5");
            format!(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/{} Mobile/15E148 Safari/604.1",
                version
            )
        }
    }
}

fn build_headers(
    user_agent: &str,
    platform: Platform,
    browser: Browser,
    locale: &str,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    headers.insert("User-Agent".to_string(), user_agent.to_string());
    headers.insert(
        "Accept".to_string(),
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".to_string(),
    );
    headers.insert("Accept-Language".to_string(), accept_language(locale));
    headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
    headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());
    headers.insert("Sec-Fetch-Dest".to_string(), "document".to_string());
    headers.insert("Sec-Fetch-Mode".to_string(), "navigate".to_string());
    headers.insert("Sec-Fetch-Site".to_string(), "none".to_string());

    // Client hints are only sent by Chromium
    if browser == Browser::Chrome {
        let mobile = if platform == Platform::Mobile { "?1" } else { "?0" };
        headers.insert("Sec-CH-UA-Mobile".to_string(), mobile.to_string());
    }

    headers
}

/// "de-DE" -> "de-DE,de;q=0.9,en;q=0.8"
fn accept_language(locale: &str) -> String {
    let primary = locale.split('-').next().unwrap_or(locale);
    if primary.eq_ignore_ascii_case("en") {
        format!("{},en;q=0.9", locale)
    } else {
        format!("{},{};q=0.9,en;q=0.8", locale, primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_honoured() {
        let generator = BuiltinProfileGenerator::with_seed(7);
        let criteria = IdentityCriteria {
            platform: Some(Platform::Mobile),
            browser: Some(Browser::Safari),
            locale: Some("fr-FR".to_string()),
        };

        let profile = generator.generate(&criteria);
        assert_eq!(profile.platform, Platform::Mobile);
        assert_eq!(profile.browser, Browser::Safari);
        assert_eq!(profile.locale, "fr-FR");
        assert!(profile.user_agent().unwrap().contains("iPhone"));
        assert_eq!(
            profile.headers.get("Accept-Language").unwrap(),
            "fr-FR,fr;q=0.9,en;q=0.8"
        );
    }

    #[test]
    fn test_generated_profiles_are_consistent() {
        let generator = BuiltinProfileGenerator::with_seed(42);
        for _ in 0..50 {
            let profile = generator.generate(&IdentityCriteria::default());
            assert!(profile.consistency_issue().is_none());
            assert!(profile.headers.contains_key("Accept"));
        }
    }

    #[test]
    fn test_ids_increase() {
        let generator = BuiltinProfileGenerator::with_seed(1);
        let a = generator.generate(&IdentityCriteria::default());
        let b = generator.generate(&IdentityCriteria::default());
        assert!(b.id > a.id);
    }

    #[test]
    fn test_client_hints_only_for_chrome() {
        let generator = BuiltinProfileGenerator::with_seed(3);
        let firefox = generator.generate(&IdentityCriteria {
            browser: Some(Browser::Firefox),
            ..Default::default()
        });
        assert!(!firefox.headers.contains_key("Sec-CH-UA-Mobile"));

        let chrome = generator.generate(&IdentityCriteria {
            platform: Some(Platform::Mobile),
            browser: Some(Browser::Chrome),
            ..Default::default()
        });
        assert_eq!(chrome.headers.get("Sec-CH-UA-Mobile").unwrap(), "?1");
    }
}
