use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Verbosity of the test log output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
  /// Everything.
  Trace,
  /// Protocol decisions.
  Debug,
  /// Lifecycle changes.
  Info,
  /// Lost messages and peers.
  Warn,
  /// Failures only.
  Error,
  /// Reported as error.
  Fatal,
  /// Nothing at all.
  Off,
}
impl LogLevel {
  /// The most verbose level.
  pub const MIN: LogLevel = LogLevel::Trace;

  /// The matching `tracing` filter.
  pub fn filter(&self) -> LevelFilter {
    match self {
      LogLevel::Trace => LevelFilter::TRACE,
      LogLevel::Debug => LevelFilter::DEBUG,
      LogLevel::Info => LevelFilter::INFO,
      LogLevel::Warn => LevelFilter::WARN,
      LogLevel::Error | LogLevel::Fatal => LevelFilter::ERROR,
      LogLevel::Off => LevelFilter::OFF,
    }
  }
}

/// Installs a global subscriber that writes through the test harness. `RUST_LOG` wins over
/// `level` when set. Calling it more than once is harmless.
pub fn init_logging(level: LogLevel) {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::default().add_directive(level.filter().into()));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_test_writer()
    .try_init();
}
