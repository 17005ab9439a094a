/// Process-level settings. Engine tuning lives in `AdaptiveConfig`, storage
/// in `DbConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub root_topic_name: String,
    pub root_topic_description: String,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let root_topic_name = std::env::var("ROOT_TOPIC_NAME")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "Artificial Intelligence".to_string());

        let root_topic_description = std::env::var("ROOT_TOPIC_DESCRIPTION").unwrap_or_else(|_| {
            "The study of systems that perceive, reason, learn and act.".to_string()
        });

        Self {
            log_level,
            root_topic_name,
            root_topic_description,
        }
    }
}
