use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_DECRYPT_API_URL: &str = "https://parent-encryption.onrender.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub decrypt_api_url: String,
    pub data_dir: PathBuf,
    pub artifact_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            database_url: non_empty("DATABASE_URL"),
            decrypt_api_url: non_empty("DECRYPT_API_URL")
                .unwrap_or_else(|| DEFAULT_DECRYPT_API_URL.to_string()),
            data_dir: non_empty("FORECAST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            artifact_dir: non_empty("FORECAST_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models")),
        }
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }

    pub fn raw_dataset_path(&self) -> PathBuf {
        self.data_dir.join("attendance").join("attendance_dataset.csv")
    }

    pub fn attendance_artifact_dir(&self) -> PathBuf {
        self.artifact_dir.join("attendance")
    }

    pub fn marks_model_path(&self) -> PathBuf {
        self.artifact_dir.join("marks").join("marks_models.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);
        assert!(config.database_url.is_none());
        assert!(config.database_url().is_err());
        assert_eq!(config.decrypt_api_url, DEFAULT_DECRYPT_API_URL);
        assert_eq!(
            config.raw_dataset_path(),
            PathBuf::from("data/attendance/attendance_dataset.csv")
        );
        assert_eq!(config.attendance_artifact_dir(), PathBuf::from("models/attendance"));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/psat"),
            ("FORECAST_ARTIFACT_DIR", "/srv/models"),
            ("DECRYPT_API_URL", "   "),
        ]);
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/psat");
        assert_eq!(
            config.marks_model_path(),
            PathBuf::from("/srv/models/marks/marks_models.json")
        );
        assert_eq!(config.decrypt_api_url, DEFAULT_DECRYPT_API_URL);
    }
}
