//! Capability sets and stereotype matching
//!
//! A request matches a stereotype when every key the request cares about is
//! compatible with what the stereotype advertises. Keys the stereotype does
//! not mention are treated as "don't care", except `browserName` and
//! `platformName` which a stereotype must state explicitly to satisfy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const BROWSER_NAME: &str = "browserName";
pub const BROWSER_VERSION: &str = "browserVersion";
pub const PLATFORM_NAME: &str = "platformName";

/// Boolean capability marking a request to be served ahead of others
pub const IMPORTANT: &str = "se:important";

/// Keys that configure a session rather than select where it runs
const SESSION_SETTINGS: &[&str] = &[
    "acceptInsecureCerts",
    "pageLoadStrategy",
    "proxy",
    "setWindowRect",
    "strictFileInteractability",
    "timeouts",
    "unhandledPromptBehavior",
    "webSocketUrl",
    IMPORTANT,
];

/// Unordered key/value description of a browser configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Map<String, Value>);

impl Capabilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn browser_name(&self) -> Option<&str> {
        self.get(BROWSER_NAME).and_then(Value::as_str)
    }

    /// Whether the request asked to jump the queue
    #[must_use]
    pub fn is_important(&self) -> bool {
        match self.get(IMPORTANT) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Overlay `other` on top of `self`; `other` wins on conflicts
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        for (k, v) in &other.0 {
            merged.insert(k.clone(), v.clone());
        }
        Self(merged)
    }

    /// Whether a slot advertising `self` as its stereotype can serve
    /// `requested`
    #[must_use]
    pub fn supports(&self, requested: &Self) -> bool {
        requested
            .iter()
            .filter(|(key, value)| !value.is_null() && !SESSION_SETTINGS.contains(&key.as_str()))
            .all(|(key, wanted)| self.key_matches(key, wanted))
    }

    fn key_matches(&self, key: &str, wanted: &Value) -> bool {
        match key {
            BROWSER_NAME => match wanted.as_str() {
                Some("") => true,
                Some(name) => self
                    .get(BROWSER_NAME)
                    .and_then(Value::as_str)
                    .is_some_and(|have| have.eq_ignore_ascii_case(name)),
                None => self.get(key) == Some(wanted),
            },
            PLATFORM_NAME => match wanted.as_str() {
                Some(p) if p.is_empty() || p.eq_ignore_ascii_case("any") => true,
                Some(platform) => self
                    .get(PLATFORM_NAME)
                    .and_then(Value::as_str)
                    .is_some_and(|have| {
                        have.eq_ignore_ascii_case("any") || have.eq_ignore_ascii_case(platform)
                    }),
                None => self.get(key) == Some(wanted),
            },
            BROWSER_VERSION => {
                let Some(version) = wanted.as_str() else {
                    return self.get(key).is_none_or(|have| have == wanted);
                };
                if version.is_empty()
                    || version.eq_ignore_ascii_case("stable")
                    || version.eq_ignore_ascii_case("latest")
                {
                    return true;
                }
                match self.get(BROWSER_VERSION).and_then(Value::as_str) {
                    None | Some("") => true,
                    Some(have) => {
                        have == version
                            || have
                                .strip_prefix(version)
                                .is_some_and(|rest| rest.starts_with('.'))
                    }
                }
            }
            _ => self.get(key).is_none_or(|have| have == wanted),
        }
    }
}

impl From<Map<String, Value>> for Capabilities {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Capabilities> for Value {
    fn from(caps: Capabilities) -> Self {
        Self::Object(caps.0)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Capabilities {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chrome() -> Capabilities {
        Capabilities::new()
            .with(BROWSER_NAME, "chrome")
            .with(BROWSER_VERSION, "120.0.6099")
            .with(PLATFORM_NAME, "linux")
    }

    #[test]
    fn empty_request_matches_anything() {
        assert!(chrome().supports(&Capabilities::new()));
    }

    #[test]
    fn browser_name_is_case_insensitive() {
        assert!(chrome().supports(&Capabilities::new().with(BROWSER_NAME, "Chrome")));
        assert!(!chrome().supports(&Capabilities::new().with(BROWSER_NAME, "firefox")));
    }

    #[test]
    fn browser_name_must_be_advertised() {
        let bare = Capabilities::new().with(PLATFORM_NAME, "linux");
        assert!(!bare.supports(&Capabilities::new().with(BROWSER_NAME, "chrome")));
    }

    #[test]
    fn version_prefix_and_aliases() {
        let stereo = chrome();
        assert!(stereo.supports(&Capabilities::new().with(BROWSER_VERSION, "120")));
        assert!(stereo.supports(&Capabilities::new().with(BROWSER_VERSION, "stable")));
        assert!(!stereo.supports(&Capabilities::new().with(BROWSER_VERSION, "12")));
        assert!(!stereo.supports(&Capabilities::new().with(BROWSER_VERSION, "121")));
    }

    #[test]
    fn platform_any_is_a_wildcard() {
        let any = Capabilities::new().with(BROWSER_NAME, "chrome").with(PLATFORM_NAME, "ANY");
        assert!(any.supports(&Capabilities::new().with(PLATFORM_NAME, "windows")));
        assert!(chrome().supports(&Capabilities::new().with(PLATFORM_NAME, "any")));
        assert!(!chrome().supports(&Capabilities::new().with(PLATFORM_NAME, "mac")));
    }

    #[test]
    fn custom_keys_compare_when_advertised() {
        let x = Capabilities::new().with("browser", "x");
        assert!(x.supports(&Capabilities::new().with("browser", "x")));
        assert!(!x.supports(&Capabilities::new().with("browser", "z")));
        assert!(x.supports(&Capabilities::new().with("se:vendor", "anything")));
    }

    #[test]
    fn session_settings_and_nulls_are_ignored() {
        let req = Capabilities::new()
            .with(BROWSER_NAME, "chrome")
            .with("acceptInsecureCerts", true)
            .with(IMPORTANT, true)
            .with("browser", Value::Null);
        assert!(chrome().with("browser", "x").supports(&req));
    }

    #[test]
    fn important_flag() {
        assert!(Capabilities::new().with(IMPORTANT, true).is_important());
        assert!(Capabilities::new().with(IMPORTANT, "TRUE").is_important());
        assert!(!Capabilities::new().is_important());
    }

    #[test]
    fn merge_prefers_other() {
        let a = Capabilities::new().with("k", 1).with("a", 1);
        let b = Capabilities::new().with("k", 2);
        let m = a.merge(&b);
        assert_eq!(m.get("k"), Some(&Value::from(2)));
        assert_eq!(m.get("a"), Some(&Value::from(1)));
    }
}
