use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use ust_router::config::{load_config, validate_config, RouterConfig};
use ust_router::lifecycle::{self, EXIT_FAILURE, EXIT_SUCCESS};
use ust_router::observability::init_logging;

/// UstRouter: collects application telemetry and routes it upstream.
#[derive(Parser, Debug)]
#[command(name = "ust-router", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Installation root directory.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Ingestion listen address (tcp://host:port or unix:/path).
    #[arg(long)]
    address: Option<String>,

    /// Admin API listen address. May be repeated.
    #[arg(long = "api-address")]
    api_addresses: Vec<String>,

    /// File holding the ingestion password.
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// Admin API account: [readonly|full:]username:password_file. May be repeated.
    #[arg(long = "authorize")]
    authorizations: Vec<String>,

    /// Switch to this user after binding sockets.
    #[arg(long)]
    user: Option<String>,

    /// Switch to this group after binding sockets.
    #[arg(long)]
    group: Option<String>,

    /// Instance directory reported by the admin API.
    #[arg(long)]
    instance_dir: Option<PathBuf>,

    /// Descriptor inherited from the supervisor.
    #[arg(long)]
    feedback_fd: Option<i32>,

    /// Log level when RUST_LOG is not set.
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    validate: bool,
}

impl Cli {
    fn apply(self, config: &mut RouterConfig) {
        if let Some(root) = self.root {
            config.root_path = Some(root);
        }
        if let Some(address) = self.address {
            config.listener.address = address;
        }
        if !self.api_addresses.is_empty() {
            config.listener.api_addresses = self.api_addresses;
        }
        if let Some(file) = self.password_file {
            config.auth.password_file = Some(file);
        }
        config.auth.authorizations.extend(self.authorizations);
        if self.user.is_some() {
            config.privilege.user = self.user;
        }
        if self.group.is_some() {
            config.privilege.group = self.group;
        }
        if self.instance_dir.is_some() {
            config.instance_dir = self.instance_dir;
        }
        if self.feedback_fd.is_some() {
            config.supervisor.feedback_fd = self.feedback_fd;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let validate_only = cli.validate;

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return exit_code(EXIT_FAILURE);
        }
    };
    cli.apply(&mut config);

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("ERROR: {e}");
        return exit_code(EXIT_FAILURE);
    }

    if let Err(errors) = validate_config(&config) {
        for e in &errors {
            error!("ERROR: {e}");
        }
        return exit_code(EXIT_FAILURE);
    }
    if validate_only {
        info!("Configuration is valid");
        return exit_code(EXIT_SUCCESS);
    }

    let result = lifecycle::start(&config).and_then(|agent| agent.run());
    match result {
        Ok(outcome) => exit_code(outcome.exit_code()),
        Err(e) => {
            error!("ERROR: {e}");
            exit_code(EXIT_FAILURE)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_settings() {
        let cli = Cli::parse_from([
            "ust-router",
            "--root",
            "/opt/ust",
            "--api-address",
            "unix:/tmp/a.sock",
            "--api-address",
            "unix:/tmp/b.sock",
            "--authorize",
            "readonly:admin:/etc/pw",
            "--user",
            "nobody",
            "--feedback-fd",
            "3",
        ]);
        let mut config = RouterConfig::default();
        config.auth.authorizations.push("full:ops:/etc/ops".into());
        cli.apply(&mut config);

        assert_eq!(config.root_path, Some(PathBuf::from("/opt/ust")));
        assert_eq!(config.listener.api_addresses, vec!["unix:/tmp/a.sock", "unix:/tmp/b.sock"]);
        assert_eq!(config.auth.authorizations.len(), 2);
        assert_eq!(config.privilege.user.as_deref(), Some("nobody"));
        assert_eq!(config.privilege.group, None);
        assert_eq!(config.supervisor.feedback_fd, Some(3));
    }
}
