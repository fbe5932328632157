//! Timestamped log records on stderr, optionally copied to a file.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use env_logger::{Builder, Target};
use log::{LevelFilter, Record};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn write_record(buf: &mut dyn Write, time: DateTime<Local>, record: &Record<'_>) -> io::Result<()> {
    writeln!(
        buf,
        "{} [{}] - {}",
        time.format(TIME_FORMAT),
        record.level(),
        record.args()
    )
}

/// Writes everything to stderr and to a file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Install the global logger at Info level; `RUST_LOG` overrides the level.
pub fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| write_record(buf, Local::now(), record));
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("could not create log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(Tee { file })));
    }
    builder.try_init().context("logger was already initialized")
}
