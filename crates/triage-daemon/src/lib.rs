#![deny(clippy::all)]

mod clock;
mod config;
mod dispatcher;
mod error;
mod pending;
mod registry;
mod session;
#[cfg(unix)]
mod signal_handler;
mod worker;

pub use clock::Clock;
pub use clock::SystemClock;
pub use config::CorrelationMode;
pub use config::TriageConfig;
pub use config::WorkerCommand;
pub use config::DEFAULT_MAX_SESSIONS;
pub use dispatcher::domain_error_response;
pub use dispatcher::Dispatcher;
pub use error::DaemonError;
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::ResponseHandle;
pub use session::Session;
pub use session::SessionId;
pub use session::SessionInfo;
#[cfg(unix)]
pub use signal_handler::ShutdownNotifier;
#[cfg(unix)]
pub use signal_handler::ShutdownNotifierHandle;
#[cfg(unix)]
pub use signal_handler::SignalHandler;
pub use worker::WorkerEvents;
pub use worker::WorkerExit;
pub use worker::WorkerHandle;
pub use worker::WorkerNotRunning;

pub type Result<T> = std::result::Result<T, SessionError>;
