use std::{env, path::Path, time::SystemTime};
use log::{LevelFilter, info};
use crate::SendableError;

fn format_line(
    out: fern::FormatCallback,
    message: &std::fmt::Arguments,
    record: &log::Record,
) {
    out.finish(format_args!(
        "[{} {} {}] {}",
        humantime::format_rfc3339_seconds(SystemTime::now()),
        record.level(),
        record.target(),
        message
    ))
}

/// Builds the dispatcher without installing it. Log lines go to stderr so that
/// stdout stays free for payloads.
pub fn build_dispatch(level: LevelFilter, log_file: Option<&Path>) -> Result<fern::Dispatch, SendableError> {
    let mut dispatch = fern::Dispatch::new()
        .format(format_line)
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }
    Ok(dispatch)
}

pub fn setup_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<(), SendableError> {
    build_dispatch(level, log_file)?.apply()?;
    Ok(())
}

pub fn print_env() -> std::io::Result<()> {
    let path = env::current_dir()?;
    info!("The current directory is {}", path.display());
    Ok(())
}
