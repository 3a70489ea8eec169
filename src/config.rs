use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ingestion: IngestionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Settings shared by schema building, row estimation and query compilation
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    /// Characters kept from a column name before a `_NNN` suffix is added
    pub prefix_len: usize,
    /// Longest physical identifier the destination store accepts
    pub max_identifier_len: usize,
    /// Width assumed for a column the source never measured
    pub default_column_width: u64,
    /// System row-identifier column of the source
    pub row_id_column: String,
    /// Width assumed for the row-identifier column
    pub row_id_width: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            prefix_len: 59,
            max_identifier_len: 63,
            default_column_width: 100,
            row_id_column: ":id".to_string(),
            row_id_width: 18,
        }
    }
}

impl IngestionConfig {
    /// Suffix appended to deduplicated names: an underscore and three digits
    pub const SUFFIX_LEN: usize = 4;

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.prefix_len == 0 {
            return Err(config::ConfigError::Message(
                "ingestion.prefix_len must be positive".to_string(),
            ));
        }
        if self.prefix_len + Self::SUFFIX_LEN > self.max_identifier_len {
            return Err(config::ConfigError::Message(format!(
                "ingestion.prefix_len {} leaves no room for a suffix within {} characters",
                self.prefix_len, self.max_identifier_len
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file before reading overrides
        let _ = dotenv::dotenv();

        let defaults = IngestionConfig::default();
        let mut builder = config::Config::builder()
            .set_default("database.url", "./splitgraph.db")?
            .set_default("ingestion.prefix_len", defaults.prefix_len as u64)?
            .set_default("ingestion.max_identifier_len", defaults.max_identifier_len as u64)?
            .set_default("ingestion.default_column_width", defaults.default_column_width)?
            .set_default("ingestion.row_id_column", defaults.row_id_column)?
            .set_default("ingestion.row_id_width", defaults.row_id_width)?
            .set_default("logging.level", "info")?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(prefix_len) = env::var("SG_PREFIX_LEN") {
            builder = builder.set_override("ingestion.prefix_len", parse_env("SG_PREFIX_LEN", &prefix_len)?)?;
        }

        if let Ok(max_len) = env::var("SG_MAX_IDENTIFIER_LEN") {
            builder = builder.set_override(
                "ingestion.max_identifier_len",
                parse_env("SG_MAX_IDENTIFIER_LEN", &max_len)?,
            )?;
        }

        if let Ok(width) = env::var("SG_DEFAULT_COLUMN_WIDTH") {
            builder = builder.set_override(
                "ingestion.default_column_width",
                parse_env("SG_DEFAULT_COLUMN_WIDTH", &width)?,
            )?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.ingestion.validate()?;
        Ok(config)
    }
}

fn parse_env(name: &str, value: &str) -> Result<u64, config::ConfigError> {
    value
        .parse::<u64>()
        .map_err(|e| config::ConfigError::Message(format!("{} must be an integer: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("SG_PREFIX_LEN");
        env::remove_var("SG_MAX_IDENTIFIER_LEN");
        env::remove_var("SG_DEFAULT_COLUMN_WIDTH");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.ingestion.prefix_len, 59);
        assert_eq!(config.ingestion.max_identifier_len, 63);
        assert_eq!(config.ingestion.row_id_column, ":id");
        assert_eq!(config.ingestion.row_id_width, 18);
    }

    #[test]
    fn test_prefix_must_leave_room_for_suffix() {
        let config = IngestionConfig {
            prefix_len: 60,
            ..IngestionConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(IngestionConfig::default().validate().is_ok());
    }
}
