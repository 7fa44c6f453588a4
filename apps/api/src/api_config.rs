use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use runguard_core::{AppError, AppResult};
use tracing_subscriber::EnvFilter;

/// Storage used for run history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunHistoryBackend {
    Memory,
    Postgres { database_url: String },
}

impl RunHistoryBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub api_host: String,
    pub api_port: u16,
    pub rules_file: PathBuf,
    pub run_history_backend: RunHistoryBackend,
    pub run_history_timeout: Duration,
    pub orphan_run_max_age: TimeDelta,
    pub orphan_sweep_interval: Duration,
    pub finished_run_retention: TimeDelta,
    pub fail_open: bool,
}

impl ApiConfig {
    pub fn load() -> AppResult<Self> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");
        Self::from_lookup(migrate_only, |name| env::var(name).ok())
    }

    fn from_lookup(
        migrate_only: bool,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let api_host = lookup("API_HOST").unwrap_or_else(|| "127.0.0.1".to_owned());
        let api_port = parse_or(&lookup, "API_PORT", 3001_u16)?;

        let rules_file = lookup("RATE_LIMIT_RULES_FILE")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let run_history_backend = match lookup("RUN_HISTORY_BACKEND")
            .unwrap_or_else(|| "memory".to_owned())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => RunHistoryBackend::Memory,
            "postgres" => RunHistoryBackend::Postgres {
                database_url: required_non_empty(&lookup, "DATABASE_URL")?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "RUN_HISTORY_BACKEND must be either 'memory' or 'postgres', got '{other}'"
                )));
            }
        };

        if migrate_only && run_history_backend == RunHistoryBackend::Memory {
            return Err(AppError::Validation(
                "migrate requires RUN_HISTORY_BACKEND=postgres".to_owned(),
            ));
        }

        // Migrations do not need a rule set.
        let rules_file = match rules_file {
            Some(rules_file) => rules_file,
            None if migrate_only => PathBuf::new(),
            None => {
                return Err(AppError::Validation(
                    "RATE_LIMIT_RULES_FILE is required".to_owned(),
                ));
            }
        };

        let run_history_timeout_ms = parse_or(&lookup, "RUN_HISTORY_TIMEOUT_MS", 2_000_u64)?;
        let orphan_run_max_age_seconds =
            parse_or(&lookup, "ORPHAN_RUN_MAX_AGE_SECONDS", 21_600_i64)?;
        let orphan_sweep_interval_seconds =
            parse_or(&lookup, "ORPHAN_SWEEP_INTERVAL_SECONDS", 60_u64)?;
        let finished_run_retention_hours =
            parse_or(&lookup, "FINISHED_RUN_RETENTION_HOURS", 168_i64)?;

        require_positive("RUN_HISTORY_TIMEOUT_MS", run_history_timeout_ms)?;
        require_positive("ORPHAN_SWEEP_INTERVAL_SECONDS", orphan_sweep_interval_seconds)?;
        let orphan_run_max_age = TimeDelta::try_seconds(orphan_run_max_age_seconds)
            .filter(|value| *value > TimeDelta::zero())
            .ok_or_else(|| {
                AppError::Validation(
                    "ORPHAN_RUN_MAX_AGE_SECONDS must be a positive number of seconds".to_owned(),
                )
            })?;
        let finished_run_retention = TimeDelta::try_hours(finished_run_retention_hours)
            .filter(|value| *value > TimeDelta::zero())
            .ok_or_else(|| {
                AppError::Validation(
                    "FINISHED_RUN_RETENTION_HOURS must be a positive number of hours".to_owned(),
                )
            })?;

        let fail_open = lookup("ADMISSION_FAIL_OPEN")
            .unwrap_or_else(|| "false".to_owned())
            .trim()
            .eq_ignore_ascii_case("true");

        Ok(Self {
            migrate_only,
            api_host,
            api_port,
            rules_file,
            run_history_backend,
            run_history_timeout: Duration::from_millis(run_history_timeout_ms),
            orphan_run_max_age,
            orphan_sweep_interval: Duration::from_secs(orphan_sweep_interval_seconds),
            finished_run_retention,
            fail_open,
        })
    }

    pub fn socket_address(&self) -> AppResult<SocketAddr> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Validation(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> AppResult<String> {
    let value = lookup(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

fn require_positive(name: &str, value: u64) -> AppResult<()> {
    if value == 0 {
        return Err(AppError::Validation(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use chrono::TimeDelta;
    use runguard_core::AppError;

    use super::{ApiConfig, RunHistoryBackend};

    fn load(vars: &[(&str, &str)], migrate_only: bool) -> Result<ApiConfig, AppError> {
        let vars = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        ApiConfig::from_lookup(migrate_only, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_rules_file_is_set() {
        let config = load(&[("RATE_LIMIT_RULES_FILE", "rules.json")], false);
        let Ok(config) = config else {
            panic!("config should load");
        };

        assert_eq!(config.api_port, 3001);
        assert_eq!(config.run_history_backend, RunHistoryBackend::Memory);
        assert_eq!(config.run_history_timeout, Duration::from_secs(2));
        assert_eq!(config.orphan_run_max_age, TimeDelta::hours(6));
        assert_eq!(config.orphan_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.finished_run_retention, TimeDelta::days(7));
        assert!(!config.fail_open);
        assert!(config.socket_address().is_ok());
    }

    #[test]
    fn rules_file_is_required_unless_migrating() {
        assert!(matches!(load(&[], false), Err(AppError::Validation(_))));

        let migrate = load(
            &[
                ("RUN_HISTORY_BACKEND", "postgres"),
                ("DATABASE_URL", "postgres://localhost/runguard"),
            ],
            true,
        );
        assert!(migrate.is_ok());
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let missing = load(
            &[
                ("RATE_LIMIT_RULES_FILE", "rules.json"),
                ("RUN_HISTORY_BACKEND", "postgres"),
            ],
            false,
        );
        assert!(matches!(
            missing,
            Err(AppError::Validation(ref message)) if message.contains("DATABASE_URL")
        ));

        assert!(matches!(
            load(&[("RUN_HISTORY_BACKEND", "memory")], true),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn invalid_numbers_and_zero_intervals_are_rejected() {
        assert!(
            load(
                &[
                    ("RATE_LIMIT_RULES_FILE", "rules.json"),
                    ("RUN_HISTORY_TIMEOUT_MS", "soon"),
                ],
                false
            )
            .is_err()
        );
        assert!(
            load(
                &[
                    ("RATE_LIMIT_RULES_FILE", "rules.json"),
                    ("ORPHAN_SWEEP_INTERVAL_SECONDS", "0"),
                ],
                false
            )
            .is_err()
        );
        assert!(
            load(
                &[
                    ("RATE_LIMIT_RULES_FILE", "rules.json"),
                    ("ORPHAN_RUN_MAX_AGE_SECONDS", "-5"),
                ],
                false
            )
            .is_err()
        );
    }

    #[test]
    fn fail_open_is_opt_in() {
        let config = load(
            &[
                ("RATE_LIMIT_RULES_FILE", "rules.json"),
                ("ADMISSION_FAIL_OPEN", "TRUE"),
            ],
            false,
        );
        assert!(matches!(config, Ok(ref config) if config.fail_open));
    }
}
