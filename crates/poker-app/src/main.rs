// Planning poker report entry point.
//
// Startup sequence:
// 1. Load config
// 2. Initialize tracing (log to file, not terminal)
// 3. Open database
// 4. Print the report for one session, or for all sessions
// 5. Optionally export the session to CSV, or print it as JSON
//
// Usage: planning-poker [SESSION_ID [export|json]]

use poker_app::config::{self, LoggingConfig};
use poker_app::db::Database;
use poker_app::export;
use poker_app::facilitator::Facilitator;

use anyhow::{bail, Context};
use poker_core::model::SessionId;
use tracing::info;

fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config.logging)?;
    info!("Planning poker starting up");
    info!(
        "Config loaded: database={}, exports={}",
        config.db_path,
        config.export_dir.display()
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (session_id, output) = parse_args(&args)?;

    // 3. Open database
    let db = Database::open(&config.db_path).context("failed to open database")?;
    let facilitator = Facilitator::new(db);

    // 4. Reports
    let session_ids: Vec<SessionId> = match session_id {
        Some(id) => vec![id],
        None => facilitator
            .sessions()
            .context("failed to list sessions")?
            .into_iter()
            .map(|s| s.id)
            .collect(),
    };
    if session_ids.is_empty() {
        println!("No sessions recorded in {}", config.db_path);
    }
    for id in &session_ids {
        let report = facilitator
            .report(*id)
            .with_context(|| format!("failed to build report for session {id}"))?;
        match output {
            Output::Json => println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report")?
            ),
            Output::Text | Output::Export => println!("{report}"),
        }
    }

    // 5. Export
    if let (Some(id), Output::Export) = (session_id, output) {
        let dir = config.export_dir.join(id.to_string());
        let written = export::export_session(facilitator.store(), id, &dir)
            .with_context(|| format!("failed to export session {id}"))?;
        for path in written {
            println!("Wrote {}", path.display());
        }
    }

    info!("Planning poker finished");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Text,
    Json,
    /// Text report, then CSV files.
    Export,
}

/// Parse `[SESSION_ID [export|json]]`.
fn parse_args(args: &[String]) -> anyhow::Result<(Option<SessionId>, Output)> {
    match args {
        [] => Ok((None, Output::Text)),
        [id] => Ok((Some(parse_session_id(id)?), Output::Text)),
        [id, cmd] => {
            let output = match cmd.as_str() {
                "export" => Output::Export,
                "json" => Output::Json,
                other => bail!("unknown command `{other}`; expected `export` or `json`"),
            };
            Ok((Some(parse_session_id(id)?), output))
        }
        _ => bail!("usage: planning-poker [SESSION_ID [export|json]]"),
    }
}

fn parse_session_id(raw: &str) -> anyhow::Result<SessionId> {
    raw.parse()
        .with_context(|| format!("invalid session id `{raw}`"))
}

/// Log to `<directory>/planning-poker.log`. `RUST_LOG` overrides the
/// configured filter.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(&logging.directory).with_context(|| {
        format!("failed to create log directory {}", logging.directory.display())
    })?;

    let log_file = std::fs::File::create(logging.directory.join("planning-poker.log"))
        .context("failed to create log file")?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&logging.filter)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_args_variants() {
        assert_eq!(parse_args(&args(&[])).unwrap(), (None, Output::Text));
        assert_eq!(parse_args(&args(&["3"])).unwrap(), (Some(3), Output::Text));
        assert_eq!(
            parse_args(&args(&["3", "export"])).unwrap(),
            (Some(3), Output::Export)
        );
        assert_eq!(parse_args(&args(&["3", "json"])).unwrap(), (Some(3), Output::Json));
    }

    #[test]
    fn parse_args_rejects_bad_input() {
        assert!(parse_args(&args(&["abc"])).is_err());
        assert!(parse_args(&args(&["3", "print"])).is_err());
        assert!(parse_args(&args(&["1", "export", "x"])).is_err());
    }
}
