// file: src/utils/logging.rs
// description: Tracing subscriber initialization with verbosity levels and optional ANSI coloring

use colored::*;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Maps the number of `-v` flags to a tracing level.
pub fn verbosity_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

pub fn init_logger(colored_output: bool, verbose: u8) {
    let filter = EnvFilter::new(verbosity_level(verbose));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .with_ansi(colored_output);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

pub fn format_success(msg: &str) -> String {
    format!("{} {}", "✓".green().bold(), msg.green())
}

pub fn format_error(msg: &str) -> String {
    format!("{} {}", "✗".red().bold(), msg.red())
}

pub fn format_warning(msg: &str) -> String {
    format!("{} {}", "⚠".yellow().bold(), msg.yellow())
}

pub fn format_info(msg: &str) -> String {
    format!("{} {}", "ℹ".blue().bold(), msg)
}

pub fn format_step(msg: &str) -> String {
    format!("{} {}", "▶".cyan().bold(), msg.green())
}

pub fn format_header(msg: &str) -> String {
    msg.bright_blue().bold().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_level() {
        assert_eq!(verbosity_level(0), "warn");
        assert_eq!(verbosity_level(1), "info");
        assert_eq!(verbosity_level(2), "debug");
        assert_eq!(verbosity_level(3), "trace");
        assert_eq!(verbosity_level(7), "trace");
    }

    #[test]
    fn test_formatters_keep_message() {
        colored::control::set_override(false);
        assert_eq!(format_success("done"), "✓ done");
        assert_eq!(format_step("Importing"), "▶ Importing");
        assert!(format_error("boom").ends_with("boom"));
        colored::control::unset_override();
    }
}
