//! Load-test settings and the `--KEY=value` command line.

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser};

use crate::config::Limits;
use crate::error::{Error, Result};

/// Raw harness flags. Every value is taken as text and validated afterwards
/// so bad input produces a specific diagnostic.
#[derive(Parser, Debug, Default)]
#[command(name = "loadtest")]
#[command(about = "Drive synthetic chat traffic through the relay and record latency", long_about = None)]
pub struct HarnessArgs {
    /// Number of simulated clients
    #[arg(long = "NUM_CLIENTS")]
    pub num_clients: Option<String>,

    /// Messages each client sends, and samples each client records
    #[arg(long = "MESSAGES_PER_CLIENT")]
    pub messages_per_client: Option<String>,

    /// Relay host
    #[arg(long = "HOST")]
    pub host: Option<String>,

    /// Relay port
    #[arg(long = "PORT")]
    pub port: Option<String>,

    /// WebSocket path on the relay
    #[arg(long = "WS_PATH")]
    pub ws_path: Option<String>,

    /// Label of the relay under test, used in the results file name
    #[arg(long = "SERVER")]
    pub server: Option<String>,

    /// Directory receiving the results file
    #[arg(long = "RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    /// Seconds the whole run may take before it is abandoned
    #[arg(long = "DEADLINE_SECS")]
    pub deadline_secs: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl HarnessArgs {
    /// Keep only flags this command knows, so unrelated keys are ignored
    /// instead of rejected. The first item is the program name.
    fn retain_known<I, T>(args: I) -> Vec<String>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let command = Self::command();
        let known: Vec<&str> = command
            .get_arguments()
            .filter_map(|arg| arg.get_long())
            .collect();

        let mut iter = args.into_iter().map(Into::into).peekable();
        let mut kept: Vec<String> = iter.next().into_iter().collect();

        while let Some(arg) = iter.next() {
            let Some(flag) = arg.strip_prefix("--") else {
                continue;
            };
            let (key, inline_value) = match flag.split_once('=') {
                Some((key, _)) => (key, true),
                None => (flag, false),
            };
            if !known.contains(&key) {
                continue;
            }
            let takes_next = !inline_value && iter.peek().is_some_and(|next| !next.starts_with("--"));
            kept.push(arg.clone());
            if takes_next {
                if let Some(value) = iter.next() {
                    kept.push(value);
                }
            }
        }
        kept
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => usize::try_from(n)
            .map_err(|_| Error::ArgumentParse(format!("{key}={value} is too large"))),
        Ok(_) => Err(Error::ArgumentParse(format!(
            "{key} must be a positive integer, got {value}"
        ))),
        Err(_) => Err(Error::ArgumentParse(format!(
            "{key} must be an integer, got '{value}'"
        ))),
    }
}

/// Resolved load-test settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub num_clients: usize,
    pub messages_per_client: usize,
    pub host: String,
    pub port: u16,
    pub ws_path: String,
    pub results_dir: PathBuf,
    /// The `<lang>` part of the results file name.
    pub label: String,
    /// Upper bound for the whole run.
    pub deadline: Duration,
    /// Upper bound for one client's connect and handshake.
    pub connect_timeout: Duration,
    pub log_level: String,
    pub limits: Limits,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            num_clients: 1000,
            messages_per_client: 100,
            host: "127.0.0.1".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            results_dir: PathBuf::from("metric"),
            label: "rust".to_string(),
            deadline: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
            limits: Limits::default(),
        }
    }
}

impl HarnessConfig {
    /// Parse the process arguments.
    ///
    /// # Errors
    ///
    /// `Error::ArgumentParse` for non-numeric or non-positive values.
    pub fn load() -> Result<Self> {
        Self::from_args(std::env::args())
    }

    /// Parse an argument list whose first item is the program name.
    ///
    /// # Errors
    ///
    /// `Error::ArgumentParse` for non-numeric or non-positive values.
    pub fn from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let args = HarnessArgs::try_parse_from(HarnessArgs::retain_known(args))
            .map_err(|e| Error::ArgumentParse(e.to_string()))?;
        Self::try_from(args)
    }

    /// `host:port` of the relay.
    #[must_use]
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn results_file_name(&self) -> String {
        crate::harness::metrics::results_file_name(
            &self.label,
            self.num_clients,
            self.messages_per_client,
        )
    }

    #[must_use]
    pub fn with_clients(mut self, num_clients: usize, messages_per_client: usize) -> Self {
        self.num_clients = num_clients;
        self.messages_per_client = messages_per_client;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

impl TryFrom<HarnessArgs> for HarnessConfig {
    type Error = Error;

    fn try_from(args: HarnessArgs) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = args.num_clients {
            config.num_clients = parse_positive("NUM_CLIENTS", &value)?;
        }
        if let Some(value) = args.messages_per_client {
            config.messages_per_client = parse_positive("MESSAGES_PER_CLIENT", &value)?;
        }
        if let Some(value) = args.port {
            config.port = value
                .trim()
                .parse()
                .map_err(|_| Error::ArgumentParse(format!("PORT must be 0-65535, got '{value}'")))?;
        }
        if let Some(value) = args.deadline_secs {
            config.deadline = Duration::from_secs(parse_positive("DEADLINE_SECS", &value)? as u64);
        }
        if let Some(host) = args.host {
            config.host = host;
        }
        if let Some(ws_path) = args.ws_path {
            config.ws_path = ws_path;
        }
        if let Some(server) = args.server {
            let server = server.trim();
            if server.is_empty() {
                return Err(Error::ArgumentParse("SERVER must not be empty".into()));
            }
            config.label = server.to_string();
        }
        if let Some(dir) = args.results_dir {
            config.results_dir = dir;
        }
        if let Some(level) = args.log_level {
            config.log_level = level;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<HarnessConfig> {
        HarnessConfig::from_args(std::iter::once("loadtest").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.num_clients, 1000);
        assert_eq!(config.messages_per_client, 100);
        assert_eq!(config.relay_addr(), "127.0.0.1:8080");
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.results_dir, PathBuf::from("metric"));
    }

    #[test]
    fn test_equals_form() {
        let config = parse(&["--NUM_CLIENTS=3", "--MESSAGES_PER_CLIENT=5", "--PORT=9001"]).unwrap();
        assert_eq!(config.num_clients, 3);
        assert_eq!(config.messages_per_client, 5);
        assert_eq!(config.port, 9001);
    }

    #[test]
    fn test_space_form_and_unknown_keys() {
        let config = parse(&[
            "--VERBOSE=1",
            "--NUM_CLIENTS",
            "7",
            "--colour",
            "blue",
            "--RESULTS_DIR=/tmp/out",
            "stray",
        ])
        .unwrap();
        assert_eq!(config.num_clients, 7);
        assert_eq!(config.results_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_bad_counts_fail_fast() {
        assert!(matches!(
            parse(&["--NUM_CLIENTS=abc"]),
            Err(Error::ArgumentParse(msg)) if msg.contains("NUM_CLIENTS")
        ));
        assert!(matches!(
            parse(&["--MESSAGES_PER_CLIENT=0"]),
            Err(Error::ArgumentParse(msg)) if msg.contains("positive")
        ));
        assert!(matches!(
            parse(&["--NUM_CLIENTS=-4"]),
            Err(Error::ArgumentParse(_))
        ));
        assert!(matches!(parse(&["--PORT=http"]), Err(Error::ArgumentParse(_))));
    }

    #[test]
    fn test_deadline_flag() {
        let config = parse(&["--DEADLINE_SECS=3"]).unwrap();
        assert_eq!(config.deadline, Duration::from_secs(3));
    }

    #[test]
    fn test_results_file_name() {
        let config = HarnessConfig::default().with_clients(150, 150);
        assert_eq!(
            config.results_file_name(),
            "results-client-rust-150-messages-150.json"
        );
    }

    #[test]
    fn test_server_label_names_results_file() {
        let config = parse(&["--SERVER=go", "--NUM_CLIENTS=10", "--MESSAGES_PER_CLIENT=20"]).unwrap();
        assert_eq!(config.label, "go");
        assert_eq!(config.results_file_name(), "results-client-go-10-messages-20.json");

        assert!(matches!(
            parse(&["--SERVER="]),
            Err(Error::ArgumentParse(msg)) if msg.contains("SERVER")
        ));
    }
}
