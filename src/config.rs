use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server-wide settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    /// Sessions keep their temporary documents and images under here.
    pub output_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub gemini_api_base: String,
    pub outline_model: String,
    pub image_model: String,
    pub image_timeout: Duration,
    pub content_api_url: String,
    pub content_model: String,
    pub content_max_tokens: u32,
    /// Sessions untouched for this long are dropped with their files.
    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,
    /// Keys every new session starts with.
    pub default_keys: ApiKeys,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            output_dir: PathBuf::from("./output"),
            max_upload_bytes: 20 * 1024 * 1024,
            gemini_api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            outline_model: "gemini-2.5-flash".to_string(),
            image_model: "gemini-3-pro-image-preview".to_string(),
            image_timeout: Duration::from_secs(120),
            content_api_url: "https://api.deepseek.com/chat/completions".to_string(),
            content_model: "deepseek-reasoner".to_string(),
            content_max_tokens: 16000,
            session_ttl: Duration::from_secs(2 * 60 * 60),
            session_sweep_interval: Duration::from_secs(60),
            default_keys: ApiKeys::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();

        let mut default_keys = std::env::var("API_KEYS_FILE")
            .ok()
            .and_then(|path| match std::fs::read(&path) {
                Ok(bytes) => match ApiKeys::from_keys_file(&bytes) {
                    Ok(keys) => Some(keys),
                    Err(e) => {
                        tracing::warn!("Ignoring API_KEYS_FILE {}: {}", path, e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read API_KEYS_FILE {}: {}", path, e);
                    None
                }
            })
            .unwrap_or_default();
        default_keys.merge(ApiKeys {
            gemini: env_key("GEMINI_API_KEY"),
            deepseek: env_key("DEEPSEEK_API_KEY"),
            image: env_key("IMAGE_API_KEY"),
        });

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(default.listen_addr),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.output_dir),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES").unwrap_or(default.max_upload_bytes),
            gemini_api_base: std::env::var("GEMINI_API_BASE").unwrap_or(default.gemini_api_base),
            outline_model: std::env::var("OUTLINE_MODEL").unwrap_or(default.outline_model),
            image_model: std::env::var("IMAGE_MODEL").unwrap_or(default.image_model),
            image_timeout: env_parse("IMAGE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.image_timeout),
            content_api_url: std::env::var("CONTENT_API_URL").unwrap_or(default.content_api_url),
            content_model: std::env::var("CONTENT_MODEL").unwrap_or(default.content_model),
            content_max_tokens: env_parse("CONTENT_MAX_TOKENS")
                .unwrap_or(default.content_max_tokens),
            session_ttl: env_parse("SESSION_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.session_ttl),
            session_sweep_interval: env_parse("SESSION_SWEEP_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.session_sweep_interval),
            default_keys,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_key(name: &str) -> Option<String> {
    non_blank(std::env::var(name).ok())
}

fn non_blank(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

/// Per-session credentials for the three providers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub gemini: Option<String>,
    pub deepseek: Option<String>,
    pub image: Option<String>,
}

#[derive(Deserialize)]
struct KeysFile {
    apis: Vec<KeysEntry>,
}

#[derive(Deserialize)]
struct KeysEntry {
    name: String,
    #[serde(default)]
    keys: Vec<String>,
}

impl ApiKeys {
    /// Reads `{"apis":[{"name": ..., "keys": [...]}]}`; the first key of each
    /// known provider wins.
    pub fn from_keys_file(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let file: KeysFile = serde_json::from_slice(bytes)?;
        let mut keys = ApiKeys::default();
        for entry in file.apis {
            let Some(first) = entry.keys.into_iter().find_map(|k| non_blank(Some(k))) else {
                continue;
            };
            match entry.name.as_str() {
                "gemini" => keys.gemini = Some(first),
                "deepseek" => keys.deepseek = Some(first),
                "nano_banana_gemini" => keys.image = Some(first),
                other => tracing::debug!("Skipping unknown API key entry '{}'", other),
            }
        }
        Ok(keys)
    }

    /// Takes every non-blank key `other` sets, keeping ours where it has none.
    pub fn merge(&mut self, other: ApiKeys) {
        if let Some(key) = non_blank(other.gemini) {
            self.gemini = Some(key);
        }
        if let Some(key) = non_blank(other.deepseek) {
            self.deepseek = Some(key);
        }
        if let Some(key) = non_blank(other.image) {
            self.image = Some(key);
        }
    }

    /// The image model runs on Gemini, so the outline key is a fallback.
    pub fn image_key(&self) -> Option<&str> {
        self.image.as_deref().or(self.gemini.as_deref())
    }

    pub fn status(&self) -> KeyStatus {
        KeyStatus {
            gemini: self.gemini.is_some(),
            deepseek: self.deepseek.is_some(),
            image: self.image_key().is_some(),
        }
    }
}

/// Which keys are present, without revealing them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub gemini: bool,
    pub deepseek: bool,
    pub image: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_file_takes_first_key_per_provider() {
        let json = br#"{"apis":[
            {"name":"gemini","keys":["g1","g2"]},
            {"name":"deepseek","keys":["","d1"]},
            {"name":"nano_banana_gemini","keys":["n1"]},
            {"name":"other","keys":["x"]}
        ]}"#;
        let keys = ApiKeys::from_keys_file(json).unwrap();
        assert_eq!(keys.gemini.as_deref(), Some("g1"));
        assert_eq!(keys.deepseek.as_deref(), Some("d1"));
        assert_eq!(keys.image.as_deref(), Some("n1"));
    }

    #[test]
    fn keys_file_with_wrong_shape_fails() {
        assert!(ApiKeys::from_keys_file(br#"{"keys":[]}"#).is_err());
    }

    #[test]
    fn merge_keeps_existing_keys_when_other_is_empty() {
        let mut keys = ApiKeys {
            gemini: Some("g".into()),
            deepseek: None,
            image: None,
        };
        keys.merge(ApiKeys {
            deepseek: Some("d".into()),
            ..ApiKeys::default()
        });
        assert_eq!(keys.gemini.as_deref(), Some("g"));
        assert_eq!(keys.deepseek.as_deref(), Some("d"));
        assert_eq!(keys.image_key(), Some("g"));
        assert!(keys.status().image);
    }

    #[test]
    fn blank_keys_are_ignored() {
        let mut keys = ApiKeys {
            gemini: Some("g".into()),
            ..ApiKeys::default()
        };
        keys.merge(ApiKeys {
            gemini: Some("".into()),
            deepseek: Some("  ".into()),
            image: Some(" n1 ".into()),
        });
        assert_eq!(keys.gemini.as_deref(), Some("g"));
        assert_eq!(keys.deepseek, None);
        assert_eq!(keys.image.as_deref(), Some("n1"));

        let json = br#"{"apis":[{"name":"gemini","keys":["  "]}]}"#;
        let from_file = ApiKeys::from_keys_file(json).unwrap();
        assert_eq!(from_file.gemini, None);
    }
}
