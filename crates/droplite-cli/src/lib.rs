use anyhow::Context;
use droplite_core::{AppError, Config, ErrorMetadata, LogLevel};
use serde::Serialize;
use std::path::Path;
use tracing_subscriber::{
    fmt::format::Format, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

const DEFAULT_LOG_FILTER: &str = "droplite=info";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Exit code for failures worth retrying (`EX_TEMPFAIL`).
pub const EXIT_RETRYABLE: i32 = 75;

/// Initialize tracing for the CLI.
///
/// Logs go to stderr so stdout stays clean for JSON output and `cat`.
/// `RUST_LOG` overrides the default filter. `LOG_FORMAT` picks `json` or
/// `text`; when unset, production environments log JSON.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = use_json_logs(std::env::var("LOG_FORMAT").ok().as_deref(), config);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(Format::default().compact().with_target(false))
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn use_json_logs(log_format: Option<&str>, config: &Config) -> bool {
    match log_format {
        Some(format) => format.eq_ignore_ascii_case("json"),
        None => config.is_production(),
    }
}

/// Log a failed command and print a one-line summary to stderr.
///
/// Returns the process exit code: 2 for invalid input, 3 for unknown files,
/// [`EXIT_RETRYABLE`] for transient failures and 1 for everything else.
pub fn report_error(err: &anyhow::Error) -> i32 {
    let Some(app_err) = err.downcast_ref::<AppError>() else {
        tracing::error!(error = ?err, "Command failed");
        eprintln!("error: {:#}", err);
        return 1;
    };

    match app_err.log_level() {
        LogLevel::Debug => tracing::debug!(error = %app_err, code = app_err.error_code(), "Command failed"),
        LogLevel::Warn => tracing::warn!(error = %app_err, code = app_err.error_code(), "Command failed"),
        LogLevel::Error => tracing::error!(error = %app_err, code = app_err.error_code(), "Command failed"),
    }
    eprintln!("error [{}]: {}", app_err.error_code(), app_err.client_message());

    exit_code(app_err)
}

fn exit_code(err: &AppError) -> i32 {
    if err.is_validation() {
        2
    } else if err.is_not_found() {
        3
    } else if err.is_recoverable() {
        EXIT_RETRYABLE
    } else {
        1
    }
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// Parse a `key=value` metadata argument.
///
/// The value is read as JSON when it parses (`count=3`, `tags=["a"]`) and
/// kept as a plain string otherwise.
pub fn parse_metadata_pair(raw: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Metadata must be key=value, got {:?}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Metadata key is empty in {:?}", raw);
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Normalize MIME type by stripping parameters (e.g. "text/plain; charset=utf-8" -> "text/plain").
pub fn normalize_mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .map(|s| s.trim())
        .unwrap_or(content_type)
        .to_lowercase()
}

/// Best-effort MIME type from a file extension.
pub fn mime_from_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "json" => "application/json",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "md" => "text/markdown",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_MIME_TYPE,
    }
}
