use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rtcmesh_config::{ConfigLoader, LoggingConfig, RtcMeshConfig, WarningSeverity};
use rtcmesh_core::MeshError;

mod join;

/// 🕸️ rtcmesh: peer mesh over negotiated data channels
#[derive(Parser, Debug)]
#[command(name = "rtcmesh", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to rtcmesh.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Join the mesh and stay connected until Ctrl-C
    Join {
        /// Name to announce (overrides mesh.peer_name)
        #[arg(short, long)]
        name: Option<String>,
        /// Topic to subscribe to once the first peer connects (repeatable)
        #[arg(short, long = "subscribe", value_name = "TOPIC")]
        subscribe: Vec<String>,
    },
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and list every issue
    Check,
}

impl Cli {
    pub async fn run(self) -> rtcmesh_core::Result<()> {
        // `check` must be able to report on a config that fails validation.
        if let Commands::Check = self.command {
            let path = ConfigLoader::resolve_path(self.config.as_deref());
            let config = ConfigLoader::read(&path)?;
            self.init_logging(&config.logging);
            return Self::cmd_check(&config, &path);
        }

        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();
        self.init_logging(&config.logging);

        match self.command {
            Commands::Join { name, subscribe } => join::cmd_join(config, name, subscribe).await,
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Check => Ok(()),
        }
    }

    /// --verbose > --quiet > --log-level > config
    fn log_level<'a>(&'a self, logging: &'a LoggingConfig) -> &'a str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&logging.level)
        }
    }

    fn init_logging(&self, logging: &LoggingConfig) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(self.log_level(logging)));

        match logging.format.as_str() {
            "json" => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_target(true)
                .init(),
            "compact" => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .compact()
                .with_target(false)
                .init(),
            _ => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init(),
        }
    }

    fn cmd_config(config: &RtcMeshConfig, json: bool) -> rtcmesh_core::Result<()> {
        let rendered = if json {
            serde_json::to_string_pretty(config)?
        } else {
            toml::to_string_pretty(config).map_err(|e| MeshError::config(e.to_string()))?
        };
        println!("{rendered}");
        Ok(())
    }

    fn cmd_check(config: &RtcMeshConfig, path: &std::path::Path) -> rtcmesh_core::Result<()> {
        println!("🩺 rtcmesh check: {}", path.display());
        println!();

        let warnings = config.check();
        let mut errors = 0;
        let mut warns = 0;
        let mut infos = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Error => errors += 1,
                WarningSeverity::Warning => warns += 1,
                WarningSeverity::Info => infos += 1,
            }
        }

        if !warnings.is_empty() {
            println!();
        }
        println!("  ❌ {errors} errors, ⚠️  {warns} warnings, 💡 {infos} suggestions");

        if errors > 0 {
            return Err(MeshError::config(format!(
                "{errors} configuration error(s) in {}",
                path.display()
            )));
        }
        println!("  ✅ configuration is valid");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn join_collects_repeated_topics() {
        let cli = parse(&["rtcmesh", "join", "--name", "alice", "-s", "news", "-s", "sports"]);
        match cli.command {
            Commands::Join { name, subscribe } => {
                assert_eq!(name.as_deref(), Some("alice"));
                assert_eq!(subscribe, vec!["news".to_string(), "sports".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["rtcmesh", "config", "--json", "-c", "/tmp/mesh.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/mesh.toml")));
        assert!(matches!(cli.command, Commands::Config { json: true }));
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["rtcmesh", "-v", "-q", "check"]).is_err());
    }

    #[test]
    fn log_level_precedence() {
        let logging = LoggingConfig {
            level: "warn".into(),
            ..Default::default()
        };
        assert_eq!(parse(&["rtcmesh", "check"]).log_level(&logging), "warn");
        assert_eq!(
            parse(&["rtcmesh", "-l", "trace", "check"]).log_level(&logging),
            "trace"
        );
        assert_eq!(
            parse(&["rtcmesh", "-l", "trace", "-v", "check"]).log_level(&logging),
            "debug"
        );
        assert_eq!(parse(&["rtcmesh", "-q", "check"]).log_level(&logging), "error");
    }

    #[test]
    fn check_fails_on_errors() {
        let mut config = RtcMeshConfig::default();
        assert!(Cli::cmd_check(&config, std::path::Path::new("rtcmesh.toml")).is_ok());

        config.mesh.signal_server = "http://example.com".into();
        let err = Cli::cmd_check(&config, std::path::Path::new("rtcmesh.toml")).unwrap_err();
        assert_eq!(err.kind(), rtcmesh_core::ErrorKind::Config);
    }
}
