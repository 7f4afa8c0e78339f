use std::{env, str::FromStr, time::Duration};

const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const DEFAULT_ALLOWED_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub anthropic_api_key: Option<String>,
    pub claude_model: String,
    pub anthropic_api_base: String,
    pub max_upload_size_mb: u64,
    pub allowed_extensions: Vec<String>,
    pub vision_api_timeout: Duration,
    pub link_validation_enabled: bool,
    pub link_validation_timeout: Duration,
    pub link_validation_concurrency: usize,
    /// Serves every generated link from this origin instead of the
    /// marketplace's own host (a local mirror or a test server).
    pub marketplace_origin: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            claude_model: DEFAULT_CLAUDE_MODEL.to_string(),
            anthropic_api_base: DEFAULT_ANTHROPIC_API_BASE.to_string(),
            max_upload_size_mb: 10,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            vision_api_timeout: Duration::from_secs(30),
            link_validation_enabled: true,
            link_validation_timeout: Duration::from_secs(3),
            link_validation_concurrency: 8,
            marketplace_origin: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            anthropic_api_key: env::var("ANTHROPIC_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            claude_model: env::var("CLAUDE_MODEL")
                .ok()
                .filter(|model| !model.trim().is_empty())
                .unwrap_or(defaults.claude_model),
            anthropic_api_base: env::var("ANTHROPIC_API_BASE")
                .ok()
                .map(|base| base.trim().trim_end_matches('/').to_string())
                .filter(|base| !base.is_empty())
                .unwrap_or(defaults.anthropic_api_base),
            max_upload_size_mb: env_parse::<u64>("MAX_UPLOAD_SIZE_MB")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_upload_size_mb),
            allowed_extensions: env::var("ALLOWED_EXTENSIONS")
                .ok()
                .map(|raw| parse_extensions(&raw))
                .filter(|exts| !exts.is_empty())
                .unwrap_or(defaults.allowed_extensions),
            vision_api_timeout: env_parse::<u64>("VISION_API_TIMEOUT")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.vision_api_timeout),
            link_validation_enabled: env_flag(
                "LINK_VALIDATION_ENABLED",
                defaults.link_validation_enabled,
            ),
            link_validation_timeout: env_parse::<f64>("LINK_VALIDATION_TIMEOUT")
                .filter(|v| v.is_finite() && *v > 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.link_validation_timeout),
            link_validation_concurrency: env_parse::<usize>("LINK_VALIDATION_CONCURRENCY")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.link_validation_concurrency),
            marketplace_origin: env::var("MARKETPLACE_ORIGIN")
                .ok()
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty()),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => parse_flag(&value).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .map(|s| if s.starts_with('.') { s } else { format!(".{s}") })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert!(settings.link_validation_enabled);
        assert_eq!(settings.link_validation_timeout, Duration::from_secs(3));
        assert_eq!(settings.max_upload_bytes(), 10 * 1024 * 1024);
        assert!(settings.allowed_extensions.contains(&".webp".to_string()));
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn extensions_are_normalised() {
        assert_eq!(
            parse_extensions("JPG, .png\twebp"),
            vec![".jpg".to_string(), ".png".to_string(), ".webp".to_string()]
        );
    }
}
