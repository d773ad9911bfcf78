use std::future::Future;
use std::time::Duration;

use clap::CommandFactory;
use clap::Parser;
use clap_complete::generate;

use triage::commands::Cli;
use triage::commands::Commands;
use triage::consult;
use triage::serve;
use triage::telemetry::init_tracing;
use triage::telemetry::LogDestination;
use triage_daemon::DaemonError;
use triage_daemon::SessionError;
use triage_daemon::TriageConfig;
use triage_protocol::error_codes::ErrorCategory;

/// Grace period for runtime tasks once the command has finished. The stdin
/// reader runs on a blocking thread and never observes cancellation.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(250);

fn main() {
    if let Err(e) = run() {
        if let Some(session_error) = e.downcast_ref::<SessionError>() {
            eprintln!("Error: {}", session_error);
            eprintln!("Suggestion: {}", session_error.suggestion());
            if session_error.is_retryable() {
                eprintln!("(This error may be transient - retry may succeed)");
            }
            std::process::exit(exit_code_for_category(session_error.category()));
        } else if let Some(daemon_error) = e.downcast_ref::<DaemonError>() {
            eprintln!("Error: {}", daemon_error);
            eprintln!("Suggestion: {}", daemon_error.suggestion());
            std::process::exit(74); // EX_IOERR for External category
        } else {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn exit_code_for_category(category: ErrorCategory) -> i32 {
    match category {
        ErrorCategory::InvalidInput => 64, // EX_USAGE
        ErrorCategory::NotFound => 69,     // EX_UNAVAILABLE
        ErrorCategory::Busy => 73,         // EX_CANTCREAT
        ErrorCategory::External => 74,     // EX_IOERR
        ErrorCategory::Internal => 74,     // EX_IOERR
        ErrorCategory::Timeout => 75,      // EX_TEMPFAIL
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _telemetry = init_tracing(
        if cli.verbose { "debug" } else { "info" },
        &LogDestination::from_env(),
    );

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "triage", &mut std::io::stdout());
            Ok(())
        }
        Commands::Serve => block_on(serve::run(TriageConfig::from_env())),
        Commands::Consult { symptoms } => {
            block_on(consult::run(TriageConfig::from_env(), symptoms))
        }
    }
}

fn block_on<F, E>(future: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = Result<(), E>>,
    E: Into<Box<dyn std::error::Error>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("triage-worker")
        .build()?;
    let result = runtime.block_on(future);
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result.map_err(Into::into)
}
