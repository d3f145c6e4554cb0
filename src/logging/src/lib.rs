use std::io::Write;

use chrono::Utc;
use env_logger::{Builder, Env};

fn builder(default_filter: &str) -> Builder {
    let env = Env::default().default_filter_or(default_filter);
    let mut builder = Builder::from_env(env);
    builder.format(|buf, record| {
        let level_style = buf.default_level_style(record.level());
        writeln!(
            buf,
            "[{} {} {}:{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            level_style.value(record.level()),
            record.file().unwrap_or("<unnamed>"),
            record.line().unwrap_or(0),
            &record.args()
        )
    });
    builder
}

/// Install the global logger. `RUST_LOG` overrides the default `info` filter.
///
/// Panics if a logger has already been installed.
pub fn init_log() {
    builder("info").init();
    log::info!("env_logger initialized");
}

/// Logger for tests: output goes through the test harness capture and
/// repeated calls from different tests are fine.
pub fn init_test_log() {
    let _ = builder("debug").is_test(true).try_init();
}
