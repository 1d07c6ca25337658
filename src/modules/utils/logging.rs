use env_logger::{Builder, Env, WriteStyle};
use log::{error, info, warn};
use std::fs::OpenOptions;
use std::path::Path;

/// Initialize the logging system, appending to `log_path`.
///
/// The level comes from `RUST_LOG` and defaults to `info`.
pub fn initialize_logging(log_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    // Create or append to log file
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;

    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .format_module_path(true)
        .write_style(WriteStyle::Never)
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

/// Mask an identifier so logs never carry it in full
pub(crate) fn format_sensitive(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}***{}", head, tail)
}

/// Structured logging for authentication events
pub fn log_auth_event(event_type: &str, subject: &str, success: bool, details: Option<&str>) {
    if success {
        info!(
            "Auth event: type={}, subject={}, success=true, details={:?}",
            event_type,
            format_sensitive(subject),
            details
        );
    } else {
        warn!(
            "Auth event: type={}, subject={}, success=false, details={:?}",
            event_type,
            format_sensitive(subject),
            details
        );
    }
}

/// Structured logging for store operations
pub fn log_data_operation(
    operation: &str,
    subject: &str,
    resource: &str,
    success: bool,
    details: Option<&str>,
) {
    if success {
        info!(
            "Data operation: op={}, subject={}, resource={}, success=true, details={:?}",
            operation,
            format_sensitive(subject),
            resource,
            details
        );
    } else {
        error!(
            "Data operation: op={}, subject={}, resource={}, success=false, details={:?}",
            operation,
            format_sensitive(subject),
            resource,
            details
        );
    }
}
