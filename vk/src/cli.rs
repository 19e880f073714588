//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::api::Token;
use crate::config::ApiConfig;
use crate::domain::{Params, Priority};

/// vk - rate-limited VK API client
#[derive(Parser)]
#[command(
    name = "vk",
    about = "Call the VK API through a rate-limited, credential-aware scheduler",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Lane and priority flags shared by `call` and `fetch`
#[derive(Debug, Clone, Args)]
pub struct CallArgs {
    /// API method, e.g. users.get
    #[arg(value_name = "METHOD")]
    pub method: String,

    /// Call parameters as KEY=VALUE (integers are sent as numbers, lists comma-separated)
    #[arg(value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Use the access token right away
    #[arg(long)]
    pub private: bool,

    /// Priority (integer, or default/batch/top)
    #[arg(short, long, default_value = "default")]
    pub priority: Priority,

    /// Output format
    #[arg(short, long, default_value = "json")]
    pub format: OutputFormat,
}

impl CallArgs {
    pub fn parse_params(&self) -> Result<Params, String> {
        Params::from_pairs(&self.params)
    }
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Make a single API call
    Call {
        #[command(flatten)]
        args: CallArgs,
    },

    /// Load every item of a paginated list method
    Fetch {
        #[command(flatten)]
        args: CallArgs,

        /// Stop after this many items
        #[arg(long)]
        limit: Option<usize>,

        /// Request all remaining pages at once
        #[arg(long)]
        parallel: bool,

        /// Fail on errors instead of returning an empty list
        #[arg(long)]
        strict: bool,
    },

    /// Run every call listed in a file concurrently
    Run {
        /// File with one `METHOD KEY=VALUE ...` per line
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

/// One call read from a `run` file
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub method: String,
    pub params: Params,
}

/// Parse one line of a `run` file; blank lines and `#` comments yield `None`
pub fn parse_call_line(line: &str) -> Result<Option<ScriptedCall>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let method = words.next().unwrap_or_default().to_string();
    let params = Params::from_pairs(words)?;
    Ok(Some(ScriptedCall { method, params }))
}

/// Parse a whole `run` file, reporting the first bad line by number
pub fn parse_call_file(content: &str) -> Result<Vec<ScriptedCall>, String> {
    debug!(lines = content.lines().count(), "parse_call_file: called");
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| match parse_call_line(line) {
            Ok(call) => call.map(Ok),
            Err(e) => Some(Err(format!("line {}: {}", index + 1, e))),
        })
        .collect()
}

/// Whether the environment variable holds a usable (non-blank) token
fn token_present(var: &str) -> bool {
    let present = Token::from_optional(std::env::var(var).ok()).is_some();
    debug!(var, present, "token_present: checked");
    present
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vkapi")
        .join("logs")
        .join("vkapi.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Find the `--config` path in raw arguments, before clap has parsed them
pub fn config_path_from_args<I, S>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    while let Some(arg) = args.next() {
        if arg == "-c" || arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Generate the after_help text with credential status and log path
pub fn generate_after_help(api: &ApiConfig) -> String {
    debug!("generate_after_help: called");
    let log_path = get_log_path();

    let mut help = String::new();

    help.push_str("Credentials:\n");
    for (label, var) in [("access", &api.access_token_env), ("service", &api.service_token_env)] {
        let icon = if token_present(var) { "\u{2705}" } else { "\u{274C}" };
        help.push_str(&format!("  {} {:<8} {}\n", icon, label, var));
    }

    // Log path
    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", log_path.display()));

    help
}

/// Output format for results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// One JSON document per line
    Compact,
}

impl OutputFormat {
    pub fn render(&self, value: &serde_json::Value) -> serde_json::Result<String> {
        match self {
            Self::Json => serde_json::to_string_pretty(value),
            Self::Compact => serde_json::to_string(value),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" | "pretty" => Ok(Self::Json),
            "compact" | "line" => Ok(Self::Compact),
            _ => Err(format!("Unknown format: {}. Use: json or compact", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Compact => write!(f, "compact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParamValue;
    use serde_json::json;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["vk"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_call() {
        let cli = Cli::parse_from(["vk", "call", "users.get", "user_ids=1,2", "fields=photo_50"]);
        let Some(Command::Call { args }) = cli.command else {
            panic!("Expected Call command");
        };
        assert_eq!(args.method, "users.get");
        assert!(!args.private);
        assert_eq!(args.priority, Priority::DEFAULT);

        let params = args.parse_params().unwrap();
        assert_eq!(params.get("user_ids").map(ParamValue::item_count), Some(2));
        assert_eq!(params.get("fields").map(ToString::to_string).as_deref(), Some("photo_50"));
    }

    #[test]
    fn test_cli_parse_call_private_priority() {
        let cli = Cli::parse_from(["vk", "call", "friends.get", "--private", "--priority", "top"]);
        let Some(Command::Call { args }) = cli.command else {
            panic!("Expected Call command");
        };
        assert!(args.private);
        assert!(args.priority > Priority::BATCH);
    }

    #[test]
    fn test_cli_parse_fetch() {
        let cli = Cli::parse_from([
            "vk",
            "fetch",
            "wall.get",
            "owner_id=-1",
            "count=100",
            "--limit",
            "250",
            "--parallel",
            "--strict",
        ]);
        let Some(Command::Fetch {
            args,
            limit,
            parallel,
            strict,
        }) = cli.command
        else {
            panic!("Expected Fetch command");
        };
        assert_eq!(args.method, "wall.get");
        assert_eq!(limit, Some(250));
        assert!(parallel);
        assert!(strict);
    }

    #[test]
    fn test_cli_parse_run_and_config() {
        let cli = Cli::parse_from(["vk", "run", "calls.txt", "-f", "compact"]);
        assert!(matches!(
            cli.command,
            Some(Command::Run { ref file, format: OutputFormat::Compact }) if file == &PathBuf::from("calls.txt")
        ));

        let cli = Cli::parse_from(["vk", "config"]);
        assert!(matches!(cli.command, Some(Command::Config)));
    }

    #[test]
    fn test_cli_with_config_and_log_level() {
        let cli = Cli::parse_from(["vk", "-c", "/path/to/vkapi.yml", "-l", "debug", "config"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/vkapi.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_rejects_bad_param() {
        let cli = Cli::parse_from(["vk", "call", "users.get", "oops"]);
        let Some(Command::Call { args }) = cli.command else {
            panic!("Expected Call command");
        };
        assert!(args.parse_params().is_err());
    }

    #[test]
    fn test_parse_call_file() {
        let content = "\
# friends first
friends.get user_id=1

users.get user_ids=1,2,3 fields=photo_50
  wall.get owner_id=-1 count=5
";
        let calls = parse_call_file(content).unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].method, "friends.get");
        assert_eq!(calls[1].params.get("user_ids").map(ParamValue::item_count), Some(3));
        assert_eq!(calls[2].method, "wall.get");
        assert_eq!(calls[2].params.len(), 2);
    }

    #[test]
    fn test_parse_call_file_reports_line() {
        let err = parse_call_file("users.get\nfriends.get broken\n").unwrap_err();
        assert!(err.starts_with("line 2:"), "{err}");
    }

    #[test]
    fn test_output_format() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("COMPACT".parse::<OutputFormat>(), Ok(OutputFormat::Compact));
        assert!("table".parse::<OutputFormat>().is_err());

        let value = json!({"a": [1, 2]});
        assert_eq!(OutputFormat::Compact.render(&value).unwrap(), r#"{"a":[1,2]}"#);
        assert!(OutputFormat::Json.render(&value).unwrap().contains('\n'));
    }

    #[test]
    fn test_after_help_mentions_logs() {
        let help = generate_after_help(&ApiConfig::default());
        assert!(help.contains("Credentials:"));
        assert!(help.contains("VK_ACCESS_TOKEN"));
        assert!(help.contains("vkapi.log"));
    }

    #[test]
    fn test_after_help_uses_configured_token_vars() {
        let api = ApiConfig {
            access_token_env: "MY_VK_ACCESS".to_string(),
            service_token_env: "MY_VK_SERVICE".to_string(),
            ..Default::default()
        };
        let help = generate_after_help(&api);
        assert!(help.contains("MY_VK_ACCESS"));
        assert!(help.contains("MY_VK_SERVICE"));
        assert!(!help.contains("VK_ACCESS_TOKEN"));
    }

    #[test]
    fn test_config_path_from_args() {
        assert_eq!(
            config_path_from_args(["vk", "-c", "a.yml", "config"]),
            Some(PathBuf::from("a.yml"))
        );
        assert_eq!(
            config_path_from_args(["vk", "call", "--config=b.yml", "users.get"]),
            Some(PathBuf::from("b.yml"))
        );
        assert_eq!(config_path_from_args(["vk", "call", "users.get"]), None);
    }
}
