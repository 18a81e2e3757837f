use std::fs::File;

use anyhow::Context;
use time::{
    format_description::{self, parse},
    OffsetDateTime, UtcOffset,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

/// Logs everything to a timestamped file in the working directory.
///
/// Fails if another global subscriber is already set.
pub fn init_logger() -> anyhow::Result<()> {
    let file_name = get_log_file_name()?;
    let file = File::create(&file_name)
        .with_context(|| format!("could not create log file '{file_name}'"))?;
    let writer = BoxMakeWriter::new(file);
    // the local offset cannot always be determined once threads are running
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).context(
        "could not set global default tracing subscriber, disable logs if you already set one",
    )
}

fn get_log_file_name() -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]_arena_log.txt")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    Ok(now.format(&format)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_name_is_timestamped() {
        let name = get_log_file_name().unwrap();
        assert!(name.ends_with("_arena_log.txt"));
        assert!(name.starts_with(|c: char| c.is_ascii_digit()));
    }
}
