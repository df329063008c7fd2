use anyhow::Context;
use canary_core::{RunConfig, TARGET_HOST_ENV};
use clap::Parser;
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Staged-ramp HTTP canary load test.
#[derive(Parser, Debug)]
#[command(name = "canary", version)]
pub struct Args {
    /// YAML run configuration. Built-in defaults are used without one.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL to test. Takes precedence over the configuration file.
    #[arg(long, env = TARGET_HOST_ENV)]
    pub target_host: Option<String>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Serve Prometheus metrics on this address during the run.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Args {
    /// Read the configuration file, apply overrides and validate the result.
    pub fn load_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open config file {}", path.display()))?;
                serde_yaml::from_reader(file)
                    .with_context(|| format!("failed to parse config YAML {}", path.display()))?
            }
            None => RunConfig::default(),
        };

        if let Some(host) = &self.target_host {
            config.base_url = host.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canary_core::{ConfigError, RampPolicy, DEFAULT_BASE_URL};
    use std::time::Duration;

    fn write_config(name: &str, yaml: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("canary-{}-{name}.yaml", std::process::id()));
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn defaults_without_a_file() {
        let args = Args::try_parse_from(["canary"]).unwrap();
        let config = args.load_config().unwrap();

        if std::env::var_os(TARGET_HOST_ENV).is_none() {
            assert_eq!(config.base_url, DEFAULT_BASE_URL);
        }
        let expected = RunConfig {
            base_url: config.base_url.clone(),
            ..RunConfig::default()
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn target_host_flag_overrides_the_file() {
        let path = write_config(
            "override",
            r#"
base_url: http://from-file:8080
stages:
  - duration: 10s
    target: 2
ramp: step
"#,
        );

        let from_file = Args::try_parse_from(["canary", "-c", path.to_str().unwrap()]).unwrap();
        let from_flag = Args::try_parse_from([
            "canary",
            "--config",
            path.to_str().unwrap(),
            "--target-host",
            "https://from-flag",
        ])
        .unwrap();

        let config = from_flag.load_config().unwrap();
        assert_eq!(config.base_url, "https://from-flag");
        assert_eq!(config.ramp, RampPolicy::Step);
        assert_eq!(config.stages[0].duration, Duration::from_secs(10));

        if std::env::var_os(TARGET_HOST_ENV).is_none() {
            assert_eq!(
                from_file.load_config().unwrap().base_url,
                "http://from-file:8080"
            );
        }
    }

    #[test]
    fn invalid_config_is_a_config_error() {
        let path = write_config(
            "invalid",
            r#"
thresholds:
  latency_p99_ms: ["p(99)<500"]
"#,
        );
        let args = Args::try_parse_from(["canary", "-c", path.to_str().unwrap()]).unwrap();
        let err = args.load_config().unwrap_err();

        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnknownMetric("latency_p99_ms".to_string()))
        );
    }

    #[test]
    fn missing_file_has_context() {
        let args = Args::try_parse_from(["canary", "-c", "/nonexistent/canary.yaml"]).unwrap();
        let err = args.load_config().unwrap_err();
        assert!(err.to_string().contains("failed to open config file"));
    }

    #[test]
    fn metrics_addr_parses() {
        let args =
            Args::try_parse_from(["canary", "--json", "--metrics-addr", "127.0.0.1:9000"]).unwrap();
        assert!(args.json);
        assert_eq!(args.metrics_addr, Some("127.0.0.1:9000".parse().unwrap()));
    }
}
