use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Required variables fail startup; tunables fall back to defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Upper bound on pooled Postgres connections. Sized for the web
    /// handlers plus concurrently rendering interviews.
    pub db_max_connections: u32,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub speech_api_url: String,
    pub speech_api_key: String,
    pub video_api_url: String,
    pub video_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub generation: GenerationConfig,
    /// Validity of presigned URLs handed to the video provider, in seconds.
    pub signed_url_ttl_secs: u64,
    /// Seconds between video job status polls.
    pub poll_interval_secs: u64,
    /// Poll attempts before a video job is considered timed out.
    pub poll_max_attempts: u32,
    pub sweep_interval_secs: u64,
    pub rendering_timeout_secs: u64,
    pub evaluation_timeout_secs: u64,
}

/// Everything that affects the generated artifact. Any change to these
/// fields invalidates all previously cached videos (the fingerprint
/// incorporates every field).
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub voice_id: String,
    /// S3 key of the interviewer avatar image fed to the lip-sync provider.
    pub avatar_key: String,
    pub speaking_rate: f32,
    pub stability: f32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 10)?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            speech_api_url: require_env("SPEECH_API_URL")?,
            speech_api_key: require_env("SPEECH_API_KEY")?,
            video_api_url: require_env("VIDEO_API_URL")?,
            video_api_key: require_env("VIDEO_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            generation: GenerationConfig {
                voice_id: std::env::var("VOICE_ID").unwrap_or_else(|_| "en-us-amber".to_string()),
                avatar_key: std::env::var("AVATAR_KEY")
                    .unwrap_or_else(|_| "avatars/interviewer-default.png".to_string()),
                speaking_rate: parse_env("SPEAKING_RATE", 1.0)?,
                stability: parse_env("VOICE_STABILITY", 0.75)?,
            },
            signed_url_ttl_secs: parse_env("SIGNED_URL_TTL_SECS", 1800)?,
            poll_interval_secs: parse_env("POLL_INTERVAL_SECS", 10)?,
            poll_max_attempts: parse_env("POLL_MAX_ATTEMPTS", 18)?,
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", 300)?,
            rendering_timeout_secs: parse_env("RENDERING_TIMEOUT_SECS", 900)?,
            evaluation_timeout_secs: parse_env("EVALUATION_TIMEOUT_SECS", 1800)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}
