const LOG_LEVEL: &str = "WATCHTOWER_LOG";

const DEFAULT_LOG_LEVEL: tracing::Level = tracing::Level::DEBUG;

pub fn get_log_level() -> tracing::Level {
    let level_from_env = std::env::var(LOG_LEVEL);
    level_from_env.map_or(DEFAULT_LOG_LEVEL, |res| {
        res.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    })
}

const SOURCE_TOKEN: &str = "WATCHTOWER_SOURCE_TOKEN";

pub fn get_source_token() -> Option<String> {
    let token_from_env = std::env::var(SOURCE_TOKEN);
    token_from_env.ok().filter(|token| !token.is_empty())
}
