use std::env;

/// Operator-tunable behavior, resolved once at startup. Defaults match the
/// shipped assistant configuration; everything can be overridden with env
/// vars so deployments don't need a rebuild.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub max_output_tokens: u32,
    pub temperature: f64,
    pub fallback_message: String,
    pub max_live_sessions: usize,
}

impl BotConfig {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            max_output_tokens: env::var("GEMINI_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            temperature: env::var("GEMINI_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.7),
            fallback_message: env::var("AI_ERROR_MESSAGE").unwrap_or_else(|_| {
                "Sorry, I am having trouble connecting to my AI service right now. \
                 Please try again later."
                    .to_string()
            }),
            max_live_sessions: env::var("MAX_LIVE_SESSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
        }
    }
}

pub fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_default();
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "wa_assistant".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}
