//! Tunables for the progression tracker.
//!
//! Every value has a default matching the stock page template; the hosting page
//! may override any subset by passing a JSON object to `start_progression()`.

use serde::Deserialize;

use crate::error::ProgressionError;

/// Coins granted for every qualifying completion that carries a raw score.
pub const DEFAULT_COIN_REWARD: u64 = 200;
/// Delay before scrolling back to the navigation bar after a completion.
pub const DEFAULT_SCROLL_DELAY_MS: u32 = 250;
/// Grouping separator used by the reward counters (not a decimal point).
pub const DEFAULT_THOUSANDS_SEPARATOR: char = '.';
/// Prefix of every localStorage key written by the completion store.
pub const DEFAULT_STORAGE_NAMESPACE: &str = "quest-trail";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub coin_reward: u64,
    pub scroll_delay_ms: u32,
    pub thousands_separator: char,
    pub storage_namespace: String,
    pub selectors: DomSelectors,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            coin_reward: DEFAULT_COIN_REWARD,
            scroll_delay_ms: DEFAULT_SCROLL_DELAY_MS,
            thousands_separator: DEFAULT_THOUSANDS_SEPARATOR,
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            selectors: DomSelectors::default(),
        }
    }
}

impl ProgressionConfig {
    /// Parse a (possibly partial) JSON override. `None` or an empty string
    /// yields the defaults.
    pub fn from_json(raw: Option<&str>) -> Result<Self, ProgressionError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(json) => {
                serde_json::from_str(json).map_err(|e| ProgressionError::InvalidConfig(e.to_string()))
            }
        }
    }
}

/// Where the page adapter finds its DOM handles.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DomSelectors {
    /// Element carrying the sequence slug.
    pub slug_host: String,
    pub slug_attribute: String,
    /// Matches every step region, in document order (step 1 first).
    pub steps: String,
    pub previous_button: String,
    pub next_button: String,
    pub finish_button: String,
    pub navigation_anchor: String,
    pub points_counter: String,
    pub points_counter_mirror: String,
    pub coins_counter: String,
    pub coins_counter_mirror: String,
    /// Name of the CustomEvent dispatched on `document` to request confetti.
    pub celebrate_event: String,
}

impl Default for DomSelectors {
    fn default() -> Self {
        Self {
            slug_host: "[data-quest-slug]".to_string(),
            slug_attribute: "data-quest-slug".to_string(),
            steps: ".quest-step".to_string(),
            previous_button: "quest-previous".to_string(),
            next_button: "quest-next".to_string(),
            finish_button: "quest-finish".to_string(),
            navigation_anchor: "quest-navigation".to_string(),
            points_counter: "quest-points".to_string(),
            points_counter_mirror: "quest-points-mirror".to_string(),
            coins_counter: "quest-coins".to_string(),
            coins_counter_mirror: "quest-coins-mirror".to_string(),
            celebrate_event: "quest-trail:celebrate".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_uses_defaults() {
        assert_eq!(ProgressionConfig::from_json(None).unwrap(), ProgressionConfig::default());
        assert_eq!(ProgressionConfig::from_json(Some("  ")).unwrap(), ProgressionConfig::default());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg = ProgressionConfig::from_json(Some(
            r#"{"coin_reward": 50, "selectors": {"steps": ".level"}}"#,
        ))
        .unwrap();
        assert_eq!(cfg.coin_reward, 50);
        assert_eq!(cfg.scroll_delay_ms, DEFAULT_SCROLL_DELAY_MS);
        assert_eq!(cfg.selectors.steps, ".level");
        assert_eq!(cfg.selectors.next_button, "quest-next");
    }

    #[test]
    fn malformed_config_is_rejected() {
        let err = ProgressionConfig::from_json(Some("{coin_reward")).unwrap_err();
        assert!(matches!(err, ProgressionError::InvalidConfig(_)));
    }
}
