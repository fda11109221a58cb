/// Logging setup.
use anyhow::Result;
use colored::Colorize;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

use crate::common::constants::PROJECT_NAME;

/// Sets up a colored logger: errors from every crate, `level` for sandscan itself.
///
/// # Parameters
/// * `level`: LevelFilter - Verbosity of the sandscan target.
///
/// # Returns
/// * `Result<()>` - Ok if successful, error if a logger was already installed.
pub fn setup_logger(level: LevelFilter) -> Result<()> {
    let colors = ColoredLevelConfig {
        trace: Color::Cyan,
        debug: Color::Magenta,
        info: Color::Green,
        warn: Color::Yellow,
        error: Color::BrightRed,
        ..ColoredLevelConfig::new()
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                colors.color(record.level()),
                message.to_string().white()
            ))
        })
        .chain(std::io::stdout())
        .level(LevelFilter::Error)
        .level_for(PROJECT_NAME, level)
        .apply()?;

    Ok(())
}
