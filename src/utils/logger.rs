//! Logger initialization: colored level names on stdout, plus a dated
//! plain-text file per day when a log directory is configured.

use std::path::Path;

use colored::Colorize;
use log::{Level, LevelFilter};

/// Maps `-v` counts to a level filter.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _three_or_more => LevelFilter::Trace,
    }
}

/// Installs the global logger. `log_dir`, when given, receives one
/// file per day named after the application.
pub fn init(
    app_name: &str,
    verbosity: u8,
    log_dir: Option<&Path>,
) -> Result<(), fern::InitError> {
    let stdout_dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            let level = match record.level() {
                Level::Error => format!("{}", record.level()).red(),
                Level::Warn => format!("{}", record.level()).yellow(),
                Level::Info => format!("{}", record.level()).cyan(),
                Level::Debug => format!("{}", record.level()).purple(),
                Level::Trace => format!("{}", record.level()).normal(),
            };
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                level,
                record.target(),
                message
            ))
        })
        .level(level_for(verbosity))
        .chain(std::io::stdout());

    let mut root = fern::Dispatch::new().chain(stdout_dispatch);

    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let file_path = dir.join(format!(
            "{app_name}.{}.log",
            chrono::Utc::now().format("%Y_%m_%d")
        ));

        let file_dispatch = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} [{}] [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level_for(verbosity.max(2)))
            .chain(fern::log_file(file_path)?);

        root = root.chain(file_dispatch);
    }

    root.apply()?;
    Ok(())
}
