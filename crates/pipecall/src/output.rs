use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct ResponseRecord<'a> {
    pub pipe: &'a str,
    pub codec: &'a str,
    pub request: &'a str,
    pub response: u32,
    pub timestamp: String,
}

impl<'a> ResponseRecord<'a> {
    pub fn new(pipe: &'a str, codec: &'a str, request: &'a str, response: u32) -> Self {
        Self {
            pipe,
            codec,
            request,
            response,
            timestamp: now_unix_seconds(),
        }
    }
}

#[derive(Serialize)]
pub struct ServerRecord<'a> {
    pub pipe: &'a str,
    pub path: String,
    pub codec: &'a str,
    pub instances: usize,
    pub on_handler_error: &'a str,
    pub timestamp: String,
}

pub fn print_response(record: &ResponseRecord<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PIPE", "CODEC", "REQUEST", "LENGTH"])
                .add_row(vec![
                    record.pipe.to_string(),
                    record.codec.to_string(),
                    record.request.to_string(),
                    record.response.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("\"{}\" length is {}", record.request, record.response);
        }
    }
}

pub fn print_server(record: &ServerRecord<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PIPE", "SOCKET", "CODEC", "INSTANCES", "ON ERROR"])
                .add_row(vec![
                    record.pipe.to_string(),
                    record.path.clone(),
                    record.codec.to_string(),
                    record.instances.to_string(),
                    record.on_handler_error.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "serving pipe={} socket={} codec={} instances={} on_handler_error={}",
                record.pipe,
                record.path,
                record.codec,
                record.instances,
                record.on_handler_error
            );
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
