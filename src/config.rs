use std::env;

pub const DEFAULT_API_BASE: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_MODEL: &str = "black-forest-labs/FLUX.1-dev";
pub const DEFAULT_PORT: u16 = 8080;

/// Settings for the outbound inference client.
#[derive(Debug, Clone)]
pub struct HfConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    /// Whether the wired endpoint understands `parameters` (width, height, steps, guidance).
    pub supports_advanced_parameters: bool,
}

impl Default for HfConfig {
    fn default() -> Self {
        HfConfig {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            supports_advanced_parameters: false,
        }
    }
}

impl HfConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let api_key = first_non_empty([env::var("HF_API_KEY").ok(), env::var("HUGGINGFACE_API_KEY").ok()]);
        let api_base = env::var("HF_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let model = env::var("HF_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let supports_advanced_parameters = env::var("HF_ADVANCED_PARAMETERS")
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        HfConfig {
            api_key,
            api_base,
            model,
            supports_advanced_parameters,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_advanced_parameters(mut self, enabled: bool) -> Self {
        self.supports_advanced_parameters = enabled;
        self
    }

    /// Full model endpoint, e.g. `https://api-inference.huggingface.co/models/black-forest-labs/FLUX.1-dev`.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}",
            self.api_base.trim_end_matches('/'),
            self.model.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub hf: HfConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        AppConfig {
            port,
            hf: HfConfig::from_env(),
        }
    }
}

/// A blank variable (e.g. `HF_API_KEY=` in `.env`) counts as unset.
fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
