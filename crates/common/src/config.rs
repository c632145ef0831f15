use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// Reads `ENVIRONMENT`; anything other than `production`/`prod` is development.
    pub fn from_env() -> Self {
        env::var("ENVIRONMENT")
            .map(|value| Self::parse(&value))
            .unwrap_or(Environment::Development)
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when it is
/// unset or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
