//! User-agent labelling for the session list.
//!
//! Heuristic only. Nothing here feeds a security decision.

use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Bot,
    Unknown,
}

impl DeviceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
            Self::Bot => "bot",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Self {
        match value {
            "mobile" => Self::Mobile,
            "tablet" => Self::Tablet,
            "desktop" => Self::Desktop,
            "bot" => Self::Bot,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub os: String,
    pub browser: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Unknown,
            os: "Unknown".to_string(),
            browser: "Unknown".to_string(),
        }
    }
}

impl DeviceInfo {
    #[must_use]
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
            return Self::default();
        };
        Self {
            device_type: device_type(ua),
            os: os_family(ua).to_string(),
            browser: browser_family(ua).to_string(),
        }
    }

    /// Rebuild from stored columns; missing or blank families read as `Unknown`.
    #[must_use]
    pub fn from_columns(device_type: &str, os: Option<String>, browser: Option<String>) -> Self {
        let family = |value: Option<String>| {
            value
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "Unknown".to_string())
        };
        Self {
            device_type: DeviceType::from_db(device_type),
            os: family(os),
            browser: family(browser),
        }
    }
}

fn matches(pattern: &str, ua: &str) -> bool {
    Regex::new(pattern).is_ok_and(|regex| regex.is_match(ua))
}

fn device_type(ua: &str) -> DeviceType {
    if matches(r"(?i)bot|crawler|spider|slurp|curl|wget", ua) {
        DeviceType::Bot
    } else if matches(r"(?i)ipad|tablet|kindle|silk|playbook", ua)
        || (matches(r"(?i)android", ua) && !matches(r"(?i)mobile", ua))
    {
        DeviceType::Tablet
    } else if matches(r"(?i)mobi|iphone|ipod|android|blackberry|opera mini|iemobile", ua) {
        DeviceType::Mobile
    } else if matches(r"(?i)windows|macintosh|mac os x|x11|linux|\bcros\b", ua) {
        DeviceType::Desktop
    } else {
        DeviceType::Unknown
    }
}

fn os_family(ua: &str) -> &'static str {
    // Order matters: iOS and Android agents also mention Mac OS X / Linux.
    if matches(r"(?i)iphone|ipad|ipod", ua) {
        "iOS"
    } else if matches(r"(?i)android", ua) {
        "Android"
    } else if matches(r"(?i)windows", ua) {
        "Windows"
    } else if matches(r"\bCrOS\b", ua) {
        "ChromeOS"
    } else if matches(r"(?i)mac os x|macintosh", ua) {
        "macOS"
    } else if matches(r"(?i)linux|x11", ua) {
        "Linux"
    } else {
        "Unknown"
    }
}

fn browser_family(ua: &str) -> &'static str {
    if matches(r"(?i)edg(e|a|ios)?/", ua) {
        "Edge"
    } else if matches(r"(?i)opr/|opera", ua) {
        "Opera"
    } else if matches(r"(?i)firefox/|fxios/", ua) {
        "Firefox"
    } else if matches(r"(?i)chrome/|crios/|chromium/", ua) {
        "Chrome"
    } else if matches(r"(?i)safari/", ua) {
        "Safari"
    } else {
        "Unknown"
    }
}
