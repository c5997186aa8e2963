use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use pipecall_codec::{JsonCodec, TextEncoding};
use pipecall_rpc::FailurePolicy;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod request;
pub mod serve;
pub mod version;

/// Settings shared by every subcommand.
pub struct Context {
    pub format: OutputFormat,
    pub dispatch: tracing::Dispatch,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sample echo-length server (string in, length out).
    Serve(ServeArgs),
    /// Send string requests to a pipe server and print the returned lengths.
    Request(RequestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, ctx),
        Command::Request(args) => request::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum CodecArg {
    Json,
    Binary,
}

impl CodecArg {
    pub fn as_str(self) -> &'static str {
        match self {
            CodecArg::Json => "json",
            CodecArg::Binary => "binary",
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum EncodingArg {
    #[value(name = "utf-8")]
    Utf8,
    #[value(name = "utf-16le")]
    Utf16Le,
    #[value(name = "utf-16be")]
    Utf16Be,
}

impl EncodingArg {
    pub fn json_codec(self) -> JsonCodec {
        JsonCodec::with_encoding(match self {
            EncodingArg::Utf8 => TextEncoding::Utf8,
            EncodingArg::Utf16Le => TextEncoding::Utf16Le,
            EncodingArg::Utf16Be => TextEncoding::Utf16Be,
        })
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum OnHandlerError {
    /// Stop the failing listener instance.
    Terminate,
    /// Drop the connection without a response and keep serving.
    Continue,
}

impl OnHandlerError {
    pub fn policy(self) -> FailurePolicy {
        match self {
            OnHandlerError::Terminate => FailurePolicy::Terminate,
            OnHandlerError::Continue => FailurePolicy::LogAndContinue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OnHandlerError::Terminate => "terminate",
            OnHandlerError::Continue => "continue",
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Pipe name (or absolute socket path) to serve.
    pub pipe: String,
    /// Number of concurrent listener instances.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub instances: u16,
    /// Object codec; clients must use the same one.
    #[arg(long, value_enum, default_value = "json")]
    pub codec: CodecArg,
    /// Text encoding of JSON payloads.
    #[arg(long, value_enum, default_value = "utf-8")]
    pub encoding: EncodingArg,
    /// Make the handler fail on an empty request.
    #[arg(long)]
    pub fail_on_empty: bool,
    /// What a listener instance does when the handler fails.
    #[arg(long, value_enum, default_value = "terminate")]
    pub on_handler_error: OnHandlerError,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Pipe name (or absolute socket path) to connect to.
    pub pipe: String,
    /// Server name; only the local machine ("." or "localhost") is reachable.
    #[arg(long, default_value = ".")]
    pub server: String,
    /// Object codec; must match the server.
    #[arg(long, value_enum, default_value = "json")]
    pub codec: CodecArg,
    /// Text encoding of JSON payloads.
    #[arg(long, value_enum, default_value = "utf-8")]
    pub encoding: EncodingArg,
    /// Connect timeout (e.g. 5s, 500ms). Waits indefinitely when omitted.
    #[arg(long)]
    pub timeout: Option<String>,
    /// Send a single request instead of reading requests from stdin.
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
