use std::str::FromStr;
use structopt::StructOpt;
use thiserror::Error;

#[derive(Debug, StructOpt)]
#[structopt(about = "Reserves seats through commands and awaits the replies of their handler.")]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        default_value = "info",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Format of log output
    ///
    /// Formats: text, compact, json
    #[structopt(long, default_value = "text", env, value_name = "format")]
    pub log_format: LogFormat,

    /// Redis server used to transport commands and notifications
    ///
    /// Omitting it keeps all messages in-process
    #[structopt(long, env, value_name = "url")]
    pub redis: Option<String>,

    /// Time to wait for each reply before giving up
    #[structopt(long, env, default_value = "5000", value_name = "ms")]
    pub listen_timeout: u64,

    /// Number of reservation requests to send
    #[structopt(short, long, default_value = "4", value_name = "count")]
    pub requests: usize,

    /// Seats available to the handler
    #[structopt(long, default_value = "5", value_name = "seats")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

#[derive(Debug, Error)]
#[error("unknown log format '{0}'")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(UnknownLogFormat(s.to_owned())),
        }
    }
}
