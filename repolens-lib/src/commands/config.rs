use crate::Result;
use crate::github::DEFAULT_INACTIVE_AFTER_DAYS;
use crate::pipeline::{AnomalyThresholds, PipelineSettings, RateSettings, RetryPolicy};
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// Name of the configuration file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "repolens.toml";

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of repositories analyzed at the same time
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Save progress after this many repositories complete
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Time limit for a single analysis attempt
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Days without a commit after which a repository counts as inactive
    #[serde(default = "default_inactive_after_days")]
    pub inactive_after_days: u32,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate: RateSettings,

    #[serde(default)]
    pub anomalies: AnomalyThresholds,
}

fn default_workers() -> usize {
    PipelineSettings::default().workers
}

fn default_checkpoint_every() -> usize {
    PipelineSettings::default().checkpoint_every
}

fn default_request_timeout() -> Duration {
    PipelineSettings::default().request_timeout
}

const fn default_inactive_after_days() -> u32 {
    DEFAULT_INACTIVE_AFTER_DAYS
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// Without an explicit path, `repolens.toml` in `base_dir` is used if it exists.
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading repolens configuration file '{path}'"))?;
            (path.clone(), text)
        } else {
            let path = base_dir.join(CONFIG_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
                Err(e) => return Err(e).into_app_err_with(|| format!("reading repolens configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    /// Save the default configuration to a TOML file
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(app_err!("workers must be at least 1"));
        }

        if self.checkpoint_every == 0 {
            return Err(app_err!("checkpoint_every must be at least 1"));
        }

        if self.request_timeout.is_zero() {
            return Err(app_err!("request_timeout must be greater than zero"));
        }

        if self.inactive_after_days == 0 {
            return Err(app_err!("inactive_after_days must be at least 1"));
        }

        if self.retry.max_attempts == 0 {
            return Err(app_err!("retry.max_attempts must be at least 1"));
        }

        if self.retry.min_delay > self.retry.max_delay {
            return Err(app_err!(
                "retry.min_delay ({:?}) must not exceed retry.max_delay ({:?})",
                self.retry.min_delay,
                self.retry.max_delay
            ));
        }

        if self.rate.max_wait.is_zero() {
            return Err(app_err!("rate.max_wait must be greater than zero"));
        }

        if !(0.0..=1.0).contains(&self.anomalies.min_test_file_ratio) {
            return Err(app_err!(
                "anomalies.min_test_file_ratio must be between 0 and 1, got {}",
                self.anomalies.min_test_file_ratio
            ));
        }

        if !(0.0..=1.0).contains(&self.anomalies.monorepo_language_share) {
            return Err(app_err!(
                "anomalies.monorepo_language_share must be between 0 and 1, got {}",
                self.anomalies.monorepo_language_share
            ));
        }

        if self.anomalies.stale_repository_age_days < 0 || self.anomalies.stale_commit_days < 0 {
            return Err(app_err!("anomalies day thresholds must not be negative"));
        }

        Ok(())
    }

    /// Pipeline settings derived from this configuration.
    #[must_use]
    pub const fn pipeline_settings(&self, resume: bool) -> PipelineSettings {
        PipelineSettings {
            workers: self.workers,
            checkpoint_every: self.checkpoint_every,
            request_timeout: self.request_timeout,
            retry: self.retry,
            resume,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::pipeline::ReadmeClass;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
    }

    #[test]
    fn test_default_config_matches_built_in_defaults() {
        let config = Config::default();
        let settings = PipelineSettings::default();

        assert_eq!(config.workers, settings.workers);
        assert_eq!(config.checkpoint_every, settings.checkpoint_every);
        assert_eq!(config.request_timeout, settings.request_timeout);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.rate, RateSettings::default());
        assert_eq!(config.anomalies, AnomalyThresholds::default());
        assert_eq!(config.inactive_after_days, DEFAULT_INACTIVE_AFTER_DAYS);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("workers = 8\n[rate]\nlow_water_mark = 10\n").unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.checkpoint_every, 10);
        assert_eq!(config.rate.low_water_mark, 10);
        assert_eq!(config.rate.max_wait, RateSettings::default().max_wait);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_readme_threshold_parses() {
        let config: Config = toml::from_str("[anomalies]\nadequate_readme = \"comprehensive\"\n").unwrap();
        assert_eq!(config.anomalies.adequate_readme, ReadmeClass::Comprehensive);
        assert!(toml::from_str::<Config>("[anomalies]\nadequate_readme = \"huge\"\n").is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("wrokers = 8\n").is_err());
        assert!(toml::from_str::<Config>("[rate]\nlow_mark = 8\n").is_err());
    }

    #[test]
    fn test_durations_parse() {
        let config: Config = toml::from_str("request_timeout = \"45s\"\n[retry]\nmin_delay = \"250ms\"\n").unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.retry.min_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_validate_zero_workers() {
        let config = Config { workers: 0, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_checkpoint_every() {
        let config = Config { checkpoint_every: 0, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config { request_timeout: Duration::ZERO, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_retry_delays() {
        let config = Config {
            retry: RetryPolicy {
                min_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(1),
                ..RetryPolicy::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            retry: RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ratios() {
        let config = Config {
            anomalies: AnomalyThresholds {
                min_test_file_ratio: 1.5,
                ..AnomalyThresholds::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            anomalies: AnomalyThresholds {
                monorepo_language_share: -0.1,
                ..AnomalyThresholds::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_settings() {
        let config = Config { workers: 6, ..Config::default() };
        let settings = config.pipeline_settings(false);
        assert_eq!(settings.workers, 6);
        assert!(!settings.resume);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_save_default_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let output_path = base.join(CONFIG_FILE_NAME);
        Config::save_default(&output_path).unwrap();

        let loaded = Config::load(&base, Some(&output_path)).unwrap();
        loaded.validate().unwrap();

        let found = Config::load(&base, None).unwrap();
        assert_eq!(found.workers, loaded.workers);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_load_missing_config_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let config = Config::load(&base, None).unwrap();
        config.validate().unwrap();
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_load_invalid_config_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let path = base.join(CONFIG_FILE_NAME);
        fs::write(&path, "workers = 0\n").unwrap();

        assert!(Config::load(&base, Some(&path)).is_err());
        assert!(Config::load(&base, None).is_err());
    }
}
