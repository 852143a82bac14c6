use std::path::PathBuf;

/// Current timestamp, UTC.
pub fn now_utc() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

/// Initialize logging.
pub fn init_log(log: Option<PathBuf>) -> tracing_appender::non_blocking::WorkerGuard {
    let subscriber_builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true);
    let (non_blocking, guard) = if let Some(log) = log {
        // output to file, daily rotate, non-blocking
        if !log.is_dir() {
            panic!("log path is not a directory");
        }
        let file_appender = tracing_appender::rolling::daily(log, "lms_server.log");
        tracing_appender::non_blocking(file_appender)
    } else {
        // output to stdout
        tracing_appender::non_blocking(std::io::stdout())
    };
    tracing::subscriber::set_global_default(
        subscriber_builder.with_writer(non_blocking).finish(),
    )
    .expect("init log failed");
    guard
}
