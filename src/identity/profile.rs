use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Device class an identity claims to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Desktop,
    Mobile,
}

impl Platform {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "desktop" => Some(Self::Desktop),
            "mobile" => Some(Self::Mobile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser family an identity claims to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
}

impl Browser {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "chrome" => Some(Self::Chrome),
            "firefox" => Some(Self::Firefox),
            "safari" => Some(Self::Safari),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Safari => "safari",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of identity a request wants
///
/// Unset fields leave the choice to the generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IdentityCriteria {
    pub platform: Option<Platform>,
    pub browser: Option<Browser>,
    pub locale: Option<String>,
}

impl IdentityCriteria {
    /// Key under which profiles for these criteria are cached
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.platform.map(|p| p.as_str()).unwrap_or("*"),
            self.browser.map(|b| b.as_str()).unwrap_or("*"),
            self.locale.as_deref().unwrap_or("*")
        )
    }
}

/// An issued outbound identity
///
/// Everything except the usage counter is fixed once the profile is issued;
/// profiles are shared as `Arc<IdentityProfile>` between dispatch units.
#[derive(Debug)]
pub struct IdentityProfile {
    pub id: u64,
    pub headers: BTreeMap<String, String>,
    pub platform: Platform,
    pub browser: Browser,
    pub locale: String,
    pub created_at: DateTime<Utc>,
    pub cache_key: String,
    usage_count: AtomicU64,
}

impl IdentityProfile {
    pub fn new(
        id: u64,
        headers: BTreeMap<String, String>,
        platform: Platform,
        browser: Browser,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            id,
            headers,
            platform,
            browser,
            locale: locale.into(),
            created_at: Utc::now(),
            cache_key: String::new(),
            usage_count: AtomicU64::new(0),
        }
    }

    /// Sets the cache key; only the rotator calls this, before issuing
    pub(crate) fn with_cache_key(mut self, key: String) -> Self {
        self.cache_key = key;
        self
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.as_str())
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_use(&self) -> u64 {
        self.usage_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Checks that the declared platform agrees with the user agent
    ///
    /// Returns a description of the mismatch, if any.
    pub fn consistency_issue(&self) -> Option<String> {
        let ua = self.user_agent()?;
        let mobile_markers = ["Mobile", "Android", "iPhone", "iPad"];
        let has_marker = mobile_markers.iter().any(|m| ua.contains(m));

        match (self.platform, has_marker) {
            (Platform::Mobile, false) => {
                Some("mobile platform without mobile markers in user agent".to_string())
            }
            (Platform::Desktop, true) => {
                Some("desktop platform with mobile markers in user agent".to_string())
            }
            _ => None,
        }
    }
}
