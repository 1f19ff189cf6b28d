use crate::app::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_bind: String,
    pub http_workers: usize,
    pub log_filter: String,
}

impl AppConfig {
    /// Reads the process environment after loading `.env`, if one exists.
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http_workers = parse_or_default(&lookup, "HTTP_WORKERS", 2_usize)?;
        if http_workers == 0 {
            return Err(AppError::config("HTTP_WORKERS must be at least 1"));
        }

        Ok(Self {
            db_path: text_or_default(&lookup, "DB_PATH", "./data/smarthome.db"),
            http_bind: text_or_default(&lookup, "HTTP_BIND", "0.0.0.0:8080"),
            http_workers,
            log_filter: text_or_default(&lookup, "LOG_FILTER", "info"),
        })
    }
}

fn text_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn applies_defaults_for_optional_fields() {
        let result = AppConfig::from_lookup(|_| None).expect("config should be valid");

        assert_eq!(result.db_path, "./data/smarthome.db");
        assert_eq!(result.http_bind, "0.0.0.0:8080");
        assert_eq!(result.http_workers, 2);
        assert_eq!(result.log_filter, "info");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let result = AppConfig::from_lookup(|key| match key {
            "DB_PATH" => Some("   ".to_string()),
            "LOG_FILTER" => Some("smarthome_energy=debug".to_string()),
            _ => None,
        })
        .expect("config should be valid");

        assert_eq!(result.db_path, "./data/smarthome.db");
        assert_eq!(result.log_filter, "smarthome_energy=debug");
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let result = AppConfig::from_lookup(|key| match key {
            "HTTP_WORKERS" => Some("abc".to_string()),
            _ => None,
        });

        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "invalid configuration: HTTP_WORKERS must be a valid number"
        );
    }

    #[test]
    fn rejects_zero_workers() {
        let result = AppConfig::from_lookup(|key| match key {
            "HTTP_WORKERS" => Some("0".to_string()),
            _ => None,
        });

        assert_eq!(
            result.unwrap_err().to_string(),
            "invalid configuration: HTTP_WORKERS must be at least 1"
        );
    }
}
