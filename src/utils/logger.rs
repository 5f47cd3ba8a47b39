use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

/// Install the colored formatter: dependencies at WARN, this crate at INFO (DEBUG when verbose).
/// Safe to call more than once; later calls are ignored.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let level_str = match record.level() {
                Level::Error => Some("ERROR".red()),
                Level::Warn => Some("WARN".yellow()),
                _ => None,
            };
            let line = match level_str {
                Some(level_str) => {
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, path, record.args())
                }
                None => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}

/// Colors for the export summary line.
pub struct Colors;

impl Colors {
    pub const OK: colored::Color = colored::Color::Green;
    pub const PARTIAL: colored::Color = colored::Color::Yellow;
    pub const FAILED: colored::Color = colored::Color::Red;

    pub fn colorize(color: colored::Color, text: &str) -> colored::ColoredString {
        text.color(color)
    }
}
