//! [`slog`] logger initialization.

use slog::{o, Drain};
use slog_scope::GlobalLoggerGuard;

/// Initializes global [`slog`] logger which will output logs with
/// [`slog_term`]'s decorator, filtered by `RUST_LOG` via [`slog_envlogger`].
///
/// Returned guard must be kept alive for the lifetime of the process,
/// otherwise the global logger is reset.
pub fn init() -> GlobalLoggerGuard {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!());
    let scope_guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init().unwrap();

    scope_guard
}
