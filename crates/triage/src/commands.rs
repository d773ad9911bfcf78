use clap::Parser;
use clap::Subcommand;
pub use clap_complete::Shell;

const LONG_ABOUT: &str = r#"triage brokers conversations with a line-oriented diagnosis engine.

Each session owns one long-lived engine process. Commands are written to the
engine's stdin as JSON lines and replies are matched back to the caller in
send order. Idle sessions are reclaimed automatically.

CONFIGURATION:
    TRIAGE_WORKER_EXECUTABLE   interpreter or binary to run (default: python3)
    TRIAGE_WORKER_PATH         engine script (default: ai-engine/main.py)
    TRIAGE_REQUEST_TIMEOUT_MS  per-request timeout (default: 10000)
    TRIAGE_STARTUP_TIMEOUT_MS  handshake timeout (default: 10000)
    TRIAGE_IDLE_TIMEOUT        idle seconds before a session is reclaimed (default: 300)
    TRIAGE_SWEEP_INTERVAL      seconds between idle sweeps (default: 60)
    TRIAGE_MAX_SESSIONS        concurrent session cap (default: 64)
    TRIAGE_CORRELATION         fifo or tagged (default: fifo)
    TRIAGE_LOG                 append logs to this file instead of stderr

EXAMPLES:
    # Serve JSON-RPC on stdin/stdout
    triage serve

    # One-shot consultation
    triage consult --symptom fever=0.9 --symptom cough=0.6"#;

#[derive(Parser)]
#[command(name = "triage")]
#[command(author, version)]
#[command(about = "Session-scoped orchestrator for a diagnosis engine")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve JSON-RPC requests on stdin, one per line
    #[command(long_about = r#"Serve JSON-RPC requests on stdin, one per line.

Responses are written to stdout, one per line, in completion order.
Runs until stdin closes or SIGINT/SIGTERM arrives; every engine process is
terminated before exit.

METHODS:
    diagnose.start                                  -> {session_id, data}
    diagnose.answer {session_id, symptom, certainty} -> {data}
    diagnose.result {session_id}                     -> {data}
    diagnose.end {session_id}                        -> {terminated}
    sessions.list                                    -> {sessions}
    health                                           -> {status, sessions}"#)]
    Serve,

    /// Run one consultation and print every engine reply as a JSON line
    Consult {
        /// Reported symptom as NAME=CERTAINTY, certainty between 0 and 1
        #[arg(short, long = "symptom", value_parser = parse_symptom)]
        symptoms: Vec<Symptom>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symptom {
    pub name: String,
    pub certainty: f64,
}

fn parse_symptom(raw: &str) -> Result<Symptom, String> {
    let (name, certainty) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=CERTAINTY, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("symptom name must not be empty".to_string());
    }
    let certainty: f64 = certainty
        .trim()
        .parse()
        .map_err(|_| format!("certainty '{}' is not a number", certainty))?;
    if !(0.0..=1.0).contains(&certainty) {
        return Err(format!("certainty {} must be between 0 and 1", certainty));
    }
    Ok(Symptom {
        name: name.to_string(),
        certainty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_symptom() {
        assert_eq!(
            parse_symptom("fever=0.9"),
            Ok(Symptom {
                name: "fever".to_string(),
                certainty: 0.9
            })
        );
        assert_eq!(parse_symptom(" cough = 1 ").unwrap().name, "cough");
        assert!(parse_symptom("fever").is_err());
        assert!(parse_symptom("=0.5").is_err());
        assert!(parse_symptom("fever=high").is_err());
        assert!(parse_symptom("fever=1.5").is_err());
        assert!(parse_symptom("fever=-0.1").is_err());
    }

    #[test]
    fn test_consult_collects_repeated_symptoms() {
        let cli = Cli::try_parse_from([
            "triage",
            "consult",
            "--symptom",
            "fever=0.9",
            "-s",
            "cough=0.4",
        ])
        .unwrap();
        match cli.command {
            Commands::Consult { symptoms } => {
                assert_eq!(symptoms.len(), 2);
                assert_eq!(symptoms[1].name, "cough");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
