use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Prefix every client failure carries in its rendered message.
pub const FAILURE_PREFIX: &str = "Image generation failed";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("API key not found. Set HF_API_KEY in your environment or .env file")]
    MissingCredential,
    #[error("API key not configured. Check your .env file")]
    NotConfigured,
    #[error("Image generation failed: Error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Image generation failed: network error: {0}")]
    Network(String),
    #[error("Image generation failed: request timeout: {0}")]
    Timeout(String),
    #[error("Image generation failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout(e.to_string())
        } else {
            GenerationError::Network(e.to_string())
        }
    }
}

/// User-facing failure categories. Transport and configuration failures map by
/// variant; HTTP and other failures by substring matching on the lowercased text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Quota,
    Authentication,
    Throttling,
    Server,
    Network,
    Timeout,
    Other(String),
}

pub const GENERIC_MESSAGE: &str = "Something went wrong while generating the image. Please try again.";

impl ErrorCategory {
    pub fn from_error(err: &GenerationError) -> Self {
        match err {
            GenerationError::MissingCredential | GenerationError::NotConfigured => {
                ErrorCategory::Authentication
            }
            // Transport text embeds the request URL, whose port or model id may contain digits.
            GenerationError::Network(_) => ErrorCategory::Network,
            GenerationError::Timeout(_) => ErrorCategory::Timeout,
            other => classify(&other.to_string()),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ErrorCategory::Quota => "🔒 The monthly API credits are exhausted. A PRO subscription is required to keep generating images.".to_string(),
            ErrorCategory::Authentication => "🔑 The API key is invalid or not configured. Check your .env file.".to_string(),
            ErrorCategory::Throttling => "⏱️ The API rate limit was reached. Wait a moment before trying again.".to_string(),
            ErrorCategory::Server => "🔧 The server is having temporary problems. Try again in a few minutes.".to_string(),
            ErrorCategory::Network => "🌐 Connection error. Check your Internet connection and try again.".to_string(),
            ErrorCategory::Timeout => "⏳ The request took too long. Try again with a simpler description.".to_string(),
            ErrorCategory::Other(message) => message.clone(),
        }
    }
}

/// Maps a raw error message to its category. Order matters: a 429 whose body
/// mentions exhausted credits is a quota problem, not throttling.
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("exceeded") && has("credits") {
        ErrorCategory::Quota
    } else if has("api key") || has("unauthorized") || has("401") {
        ErrorCategory::Authentication
    } else if has("rate limit") || has("429") {
        ErrorCategory::Throttling
    } else if has("500") || has("internal server") {
        ErrorCategory::Server
    } else if has("network") || has("fetch") {
        ErrorCategory::Network
    } else if has("timeout") {
        ErrorCategory::Timeout
    } else {
        ErrorCategory::Other(clean_message(message))
    }
}

pub fn user_message_for(err: &GenerationError) -> String {
    ErrorCategory::from_error(err).user_message()
}

struct Cleanup {
    status_code: Regex,
    json_error: Regex,
    prefix: Regex,
}

fn cleanup() -> &'static Cleanup {
    static CLEANUP: OnceLock<Cleanup> = OnceLock::new();
    CLEANUP.get_or_init(|| Cleanup {
        status_code: Regex::new(r"Error \d+:").expect("static regex"),
        json_error: Regex::new(r#"\{"error":"([^"]+)"\}"#).expect("static regex"),
        prefix: Regex::new(&format!(r"(?i)^{}:\s*", regex::escape(FAILURE_PREFIX)))
            .expect("static regex"),
    })
}

/// Strips status codes and the JSON wrapper so only the API's own words remain.
fn clean_message(message: &str) -> String {
    let re = cleanup();
    let without_codes = re.status_code.replace_all(message, "");
    let unwrapped = re.json_error.replace_all(&without_codes, "$1");
    let cleaned = re.prefix.replace(unwrapped.trim_start(), "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        GENERIC_MESSAGE.to_string()
    } else {
        cleaned.to_string()
    }
}
