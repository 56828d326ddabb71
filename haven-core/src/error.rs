use thiserror::Error;

#[derive(Error, Debug)]
pub enum HavenError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HavenConfig;

    #[test]
    fn test_config_error_converts() {
        let err: HavenError = HavenConfig::from_toml_str("[database]\nurl = ")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("Config error"));
    }

    #[test]
    fn test_io_error_converts() {
        let err: HavenError = std::io::Error::new(std::io::ErrorKind::NotFound, "haven.toml").into();
        assert_eq!(err.to_string(), "IO error: haven.toml");
    }
}
