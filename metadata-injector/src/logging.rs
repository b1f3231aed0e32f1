use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use metadata_common::errors::ServiceError;

const LOG_PATTERN: &str = "{d(%Y-%m-%dT%H:%M:%S%.3f%:z)} {h({l:<5})} [{t}] {m}{n}";
const STDOUT_APPENDER: &str = "stdout";

/// Level for the root logger. The flag is set when `level` was not a valid
/// level name and `info` is used instead.
pub fn parse_log_level(level: &str) -> (LevelFilter, bool) {
    match LevelFilter::from_str(level.trim()) {
        Ok(l) if !level.trim().is_empty() => (l, false),
        _ => (LevelFilter::Info, true),
    }
}

fn console_config(level: LevelFilter) -> Result<Config, ServiceError> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();
    Config::builder()
        .appender(Appender::builder().build(STDOUT_APPENDER, Box::new(stdout)))
        .build(Root::builder().appender(STDOUT_APPENDER).build(level))
        .map_err(ServiceError::from_error("Unable to build logger configuration"))
}

pub fn init_logging(config_file: Option<&Path>, level: LevelFilter) -> Result<(), ServiceError> {
    match config_file {
        Some(path) => log4rs::init_file(path, Default::default()).map_err(|e| {
            ServiceError::from_string(format!("Unable to load log config {:?}: {}", path, e))
        }),
        None => log4rs::init_config(console_config(level)?)
            .map(|_| ())
            .map_err(ServiceError::from_error("Unable to initialize logger")),
    }
}
