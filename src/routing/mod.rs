pub mod dispatch;

use crate::config::ModelsConfig;

/// Which configured model a requested name resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Upstream-native name, forwarded unchanged.
    Passthrough,
    Small,
    Middle,
    Big,
}

/// Maps client-facing model names onto upstream model names.
///
/// Names that already belong to the upstream (by prefix) pass through; all
/// others are bucketed by family keyword into one of three configured tiers.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    big_model: String,
    middle_model: String,
    small_model: String,
    passthrough_prefixes: Vec<String>,
}

impl ModelRouter {
    /// Build a `ModelRouter` from the models section of the configuration.
    #[must_use]
    pub fn new(models: &ModelsConfig) -> Self {
        let middle_model = if models.middle_model.trim().is_empty() {
            models.big_model.clone()
        } else {
            models.middle_model.clone()
        };
        Self {
            big_model: models.big_model.clone(),
            middle_model,
            small_model: models.small_model.clone(),
            passthrough_prefixes: models.passthrough_prefixes.clone(),
        }
    }

    /// Classify a requested model name.
    #[must_use]
    pub fn tier(&self, requested: &str) -> ModelTier {
        if self
            .passthrough_prefixes
            .iter()
            .any(|prefix| requested.starts_with(prefix.as_str()))
        {
            return ModelTier::Passthrough;
        }
        let lower = requested.to_lowercase();
        if lower.contains("haiku") {
            ModelTier::Small
        } else if lower.contains("sonnet") {
            ModelTier::Middle
        } else {
            // "opus" and unknown families both land on the big model.
            ModelTier::Big
        }
    }

    /// Resolve the upstream model name for a requested model.
    #[must_use]
    pub fn route(&self, requested: &str) -> String {
        match self.tier(requested) {
            ModelTier::Passthrough => requested.to_string(),
            ModelTier::Small => self.small_model.clone(),
            ModelTier::Middle => self.middle_model.clone(),
            ModelTier::Big => self.big_model.clone(),
        }
    }

    #[must_use]
    pub fn small_model(&self) -> &str {
        &self.small_model
    }

    #[must_use]
    pub fn big_model(&self) -> &str {
        &self.big_model
    }

    #[must_use]
    pub fn middle_model(&self) -> &str {
        &self.middle_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ModelRouter {
        ModelRouter::new(&ModelsConfig {
            big_model: "big-m".to_string(),
            middle_model: "mid-m".to_string(),
            small_model: "small-m".to_string(),
            ..ModelsConfig::default()
        })
    }

    #[test]
    fn test_family_keywords_map_to_tiers() {
        let r = router();
        assert_eq!(r.route("claude-3-5-haiku-20241022"), "small-m");
        assert_eq!(r.route("claude-3-7-sonnet-latest"), "mid-m");
        assert_eq!(r.route("claude-3-opus-20240229"), "big-m");
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let r = router();
        assert_eq!(r.route("Claude-HAIKU"), "small-m");
        assert_eq!(r.route("SONNET-4"), "mid-m");
    }

    #[test]
    fn test_unknown_models_go_to_big() {
        let r = router();
        assert_eq!(r.route("mystery-model"), "big-m");
        assert_eq!(r.route(""), "big-m");
    }

    #[test]
    fn test_native_prefixes_pass_through() {
        let r = router();
        for name in [
            "gpt-4o",
            "o1-mini",
            "o3-mini",
            "o4-mini",
            "chatgpt-4o-latest",
            "ep-2024",
            "doubao-pro",
            "deepseek-chat",
        ] {
            assert_eq!(r.route(name), name);
            assert_eq!(r.tier(name), ModelTier::Passthrough);
        }
    }

    #[test]
    fn test_prefix_match_is_case_sensitive() {
        let r = router();
        assert_eq!(r.route("GPT-4o"), "big-m");
    }

    #[test]
    fn test_routing_is_deterministic() {
        let r = router();
        assert_eq!(r.route("claude-haiku"), r.route("claude-haiku"));
    }

    #[test]
    fn test_middle_defaults_to_big() {
        let r = ModelRouter::new(&ModelsConfig {
            big_model: "big-m".to_string(),
            middle_model: String::new(),
            ..ModelsConfig::default()
        });
        assert_eq!(r.route("claude-sonnet"), "big-m");
    }
}
