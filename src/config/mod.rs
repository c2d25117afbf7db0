use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub ovh: OvhConfig,
    pub generation: GenerationConfig,
    pub database: DatabaseConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub rate_limit: RateLimitConfig,
}

/// Closed set of known provider identities.
///
/// Configuration values parse into this enum at load time; an unrecognized
/// name is a startup error, never a silent fallback to some default adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Openai,
    Ovh,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::Openai => write!(f, "openai"),
            ProviderId::Ovh => write!(f, "ovh"),
        }
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderId::Openai),
            "ovh" => Ok(ProviderId::Ovh),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// The ordered pair of adapters tried for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPair {
    pub primary: ProviderId,
    pub fallback: ProviderId,
}

/// OpenAI API configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

/// OVHcloud AI Endpoints configuration
#[derive(Debug, Clone)]
pub struct OvhConfig {
    pub api_token: String,
    pub text_url: String,
    pub image_url: String,
}

/// Provider routing and tuning for the generation pipeline
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub text: ProviderPair,
    pub image: ProviderPair,
    pub narration: ProviderPair,
    pub text_tuning: TextTuning,
    pub image_tuning: ImageTuning,
    pub narration_tuning: NarrationTuning,
}

/// Text generation tuning parameters
#[derive(Debug, Clone)]
pub struct TextTuning {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub word_count_min: u32,
    pub word_count_max: u32,
}

/// Image generation tuning parameters
#[derive(Debug, Clone)]
pub struct ImageTuning {
    pub model: String,
    pub size: String,
    pub negative_prompt: String,
    pub num_inference_steps: u32,
}

/// Narration (text-to-speech) tuning parameters
#[derive(Debug, Clone)]
pub struct NarrationTuning {
    pub model: String,
    pub voice: String,
    pub speed: f64,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Media object store configuration
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub root: PathBuf,
    pub public_base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Outbound HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

/// Story generation abuse guard
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let openai = OpenAiConfig {
            api_key: env::var("OPENAI_API_KEY").map_err(|_| AppError::Config {
                message: "OPENAI_API_KEY is required".to_string(),
            })?,
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
        };

        let ovh = OvhConfig {
            api_token: env::var("OVH_API_TOKEN").map_err(|_| AppError::Config {
                message: "OVH_API_TOKEN is required".to_string(),
            })?,
            text_url: env::var("OVH_TEXT_URL").unwrap_or_else(|_| {
                "https://qwen2-5-coder-32b-instruct.endpoints.kepler.ai.cloud.ovh.net".to_string()
            }),
            image_url: env::var("OVH_IMAGE_URL").unwrap_or_else(|_| {
                "https://stable-diffusion-xl.endpoints.kepler.ai.cloud.ovh.net".to_string()
            }),
        };

        let generation = GenerationConfig {
            text: provider_pair_from_env("TEXT_PROVIDER", ProviderId::Ovh, ProviderId::Openai)?,
            image: provider_pair_from_env("IMAGE_PROVIDER", ProviderId::Ovh, ProviderId::Openai)?,
            narration: provider_pair_from_env(
                "NARRATION_PROVIDER",
                ProviderId::Openai,
                ProviderId::Openai,
            )?,
            text_tuning: TextTuning {
                model: env::var("TEXT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                temperature: parse_env("TEXT_TEMPERATURE", 0.7),
                max_tokens: parse_env("TEXT_MAX_TOKENS", 1500),
                word_count_min: parse_env("TEXT_WORD_COUNT_MIN", 120),
                word_count_max: parse_env("TEXT_WORD_COUNT_MAX", 200),
            },
            image_tuning: ImageTuning {
                model: env::var("IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".to_string()),
                size: env::var("IMAGE_SIZE").unwrap_or_else(|_| "1024x1024".to_string()),
                negative_prompt: env::var("IMAGE_NEGATIVE_PROMPT")
                    .unwrap_or_else(|_| "Ugly, blurry, low quality".to_string()),
                num_inference_steps: parse_env("IMAGE_INFERENCE_STEPS", 20),
            },
            narration_tuning: NarrationTuning {
                model: env::var("NARRATION_MODEL").unwrap_or_else(|_| "tts-1".to_string()),
                voice: env::var("NARRATION_VOICE").unwrap_or_else(|_| "fable".to_string()),
                speed: parse_env("NARRATION_SPEED", 1.0),
            },
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/storyloom.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let media = MediaConfig {
            root: PathBuf::from(env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".to_string())),
            public_base_url: env::var("MEDIA_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/media".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
        };

        let rate_limit = RateLimitConfig {
            max_requests: parse_env("RATE_LIMIT_MAX_REQUESTS", 10),
            window_secs: parse_env("RATE_LIMIT_WINDOW_SECS", 60),
        };

        Ok(Config {
            openai,
            ovh,
            generation,
            database,
            media,
            logging,
            request,
            rate_limit,
        })
    }
}

/// Parse a `{prefix}_PRIMARY` / `{prefix}_FALLBACK` pair, rejecting unknown
/// provider names instead of defaulting.
fn provider_pair_from_env(
    prefix: &str,
    default_primary: ProviderId,
    default_fallback: ProviderId,
) -> Result<ProviderPair, AppError> {
    let primary = provider_from_env(&format!("{}_PRIMARY", prefix), default_primary)?;
    let fallback = provider_from_env(&format!("{}_FALLBACK", prefix), default_fallback)?;
    Ok(ProviderPair { primary, fallback })
}

fn provider_from_env(var: &str, default: ProviderId) -> Result<ProviderId, AppError> {
    match env::var(var) {
        Ok(value) => value.parse().map_err(|e| AppError::Config {
            message: format!("{}: {}", var, e),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env<T: FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            text: ProviderPair {
                primary: ProviderId::Ovh,
                fallback: ProviderId::Openai,
            },
            image: ProviderPair {
                primary: ProviderId::Ovh,
                fallback: ProviderId::Openai,
            },
            narration: ProviderPair {
                primary: ProviderId::Openai,
                fallback: ProviderId::Openai,
            },
            text_tuning: TextTuning::default(),
            image_tuning: ImageTuning::default(),
            narration_tuning: NarrationTuning::default(),
        }
    }
}

impl Default for TextTuning {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 1500,
            word_count_min: 120,
            word_count_max: 200,
        }
    }
}

impl Default for ImageTuning {
    fn default() -> Self {
        Self {
            model: "dall-e-3".to_string(),
            size: "1024x1024".to_string(),
            negative_prompt: "Ugly, blurry, low quality".to_string(),
            num_inference_steps: 20,
        }
    }
}

impl Default for NarrationTuning {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "fable".to_string(),
            speed: 1.0,
        }
    }
}
