use super::Host;
use super::config::Config;
use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file (default is `repolens.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,
}

pub fn validate_config<H: Host>(host: &mut H, args: &ValidateArgs) -> Result<()> {
    let config_path = args.config.as_ref();

    // `load` parses and range-checks every value.
    match Config::load(Utf8Path::new("."), config_path) {
        Ok(config) => {
            let _ = writeln!(host.output(), "Configuration file is valid");
            if let Some(path) = config_path {
                let _ = writeln!(host.output(), "Config file: {path}");
            } else {
                let _ = writeln!(host.output(), "Using configuration from the current directory, or defaults if none is found");
            }
            let _ = writeln!(
                host.output(),
                "{} workers, checkpoint every {} repositories, {} retry attempts",
                config.workers, config.checkpoint_every, config.retry.max_attempts
            );
            Ok(())
        }
        Err(e) => {
            let _ = writeln!(host.error(), "❌ Configuration validation failed: {e}");
            host.exit(1);
            Err(e)
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::commands::host::TestHost;
    use crate::commands::init::{InitArgs, init_config};

    fn validate_text(text: &str) -> (TestHost, Result<()>) {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = Utf8PathBuf::try_from(tmp.path().join("repolens.toml")).unwrap();
        std::fs::write(&config_path, text).unwrap();

        let mut host = TestHost::new();
        let result = validate_config(&mut host, &ValidateArgs { config: Some(config_path) });
        (host, result)
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_generated_config_is_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = Utf8PathBuf::try_from(tmp.path().join("repolens.toml")).unwrap();

        let mut init_host = TestHost::new();
        init_config(&mut init_host, &InitArgs { output: Some(config_path.clone()) }).unwrap();

        let mut host = TestHost::new();
        validate_config(&mut host, &ValidateArgs { config: Some(config_path) }).unwrap();

        assert!(host.output_text().contains("Configuration file is valid"));
        assert!(host.output_text().contains("4 workers, checkpoint every 10 repositories"));
        assert_eq!(host.exit_code, None);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_empty_config_is_valid() {
        let (host, result) = validate_text("# nothing set\n");
        result.unwrap();
        assert_eq!(host.exit_code, None);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_invalid_toml_syntax() {
        let (host, result) = validate_text("[rate\nlow_water_mark = 10\n");
        assert!(result.is_err());
        assert_eq!(host.exit_code, Some(1));
        assert!(host.error_text().contains("Configuration validation failed"));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_unknown_field() {
        let (host, result) = validate_text("workers = 2\nmystery = true\n");
        assert!(result.is_err());
        assert_eq!(host.exit_code, Some(1));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_invalid_duration_format() {
        let (host, result) = validate_text("request_timeout = \"not a duration\"\n");
        assert!(result.is_err());
        assert_eq!(host.exit_code, Some(1));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_out_of_range_value() {
        let (host, result) = validate_text("[anomalies]\nmin_test_file_ratio = 2.0\n");
        assert!(result.is_err());
        assert_eq!(host.exit_code, Some(1));
    }

    #[test]
    fn test_missing_file() {
        let mut host = TestHost::new();
        let args = ValidateArgs {
            config: Some(Utf8PathBuf::from("definitely/not/here/repolens.toml")),
        };
        assert!(validate_config(&mut host, &args).is_err());
        assert_eq!(host.exit_code, Some(1));
    }
}
