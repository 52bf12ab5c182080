//! helpers for logging.
//!
//! The engine crates only ever talk to the `log` facade.  Binaries and tests pick a backend by calling one of the
//! functions here, once, early.  `RUST_LOG` controls filtering in both cases.

fn builder(default_filter: &str) -> env_logger::Builder {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format(|buf, record| {
        use std::io::Write;

        let now = time::OffsetDateTime::now_utc();

        writeln!(
            buf,
            "{} {} time={} target={}",
            record.level(),
            record.args(),
            now,
            record.target()
        )
    });
    builder
}

/// Log to stderr.
///
/// If called multiple times in the same process, only applies once.
pub fn log_to_stderr() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        builder("info").init();
    });
}

/// Log through the test harness's captured output.
///
/// Safe to call from every test; only the first call in a process installs the logger, and the rest are no-ops.
pub fn log_for_tests() {
    // try_init because other crates' tests may have raced us to it.
    let _ = builder("debug").is_test(true).try_init();
}
