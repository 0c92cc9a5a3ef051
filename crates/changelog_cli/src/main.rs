//! `change_log` command-line entry point.
//!
//! # Responsibility
//! - Parse arguments, snapshot the environment and resolve the directory once.
//! - Emit command results on stdout and diagnostics on stderr.
//!
//! # Invariants
//! - stdout only ever carries JSON (`create`, `show`) or JSON-Lines (`list`).
//! - Every failure prints `error: <message>` and exits non-zero.

use changelog_core::resolve::ResolveError;
use changelog_core::{
    init_from_config, open_existing, open_for_create, write_json, write_jsonl, Config,
    CreateRequest, EntryRecord, ListFilter, ServiceError, ServiceResult,
};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "change_log",
    version,
    about = "Record changelog entries as one markdown file per change"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an entry and print `{"id", "full_path"}` as JSON
    Create {
        /// Entry title
        #[arg(long)]
        title: String,
        /// Entry category
        #[arg(long = "type")]
        kind: Option<String>,
        /// Severity or weight (integer)
        #[arg(long, allow_negative_numbers = true)]
        impact: Option<i64>,
        /// Explicit id instead of a generated one
        #[arg(long)]
        id: Option<String>,
        /// Initial body text
        #[arg(long, short)]
        description: Option<String>,
    },
    /// Print matching entries as JSON-Lines, oldest first
    #[command(alias = "query")]
    List {
        /// Only entries of this type
        #[arg(long = "type")]
        kind: Option<String>,
        /// Only entries with impact >= N
        #[arg(long, allow_negative_numbers = true)]
        min_impact: Option<i64>,
        /// Only the entry with this id
        #[arg(long)]
        id: Option<String>,
        /// Stop after N entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print one entry as JSON
    Show {
        id: String,
    },
    /// Append a timestamped note to an entry's `## Notes` section
    AppendNote {
        id: String,
        /// Note text; read from stdin when omitted
        text: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::from_env();
    if let Err(err) = init_from_config(&config) {
        eprintln!("warning: file logging disabled: {err}");
    }

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(
                "event=cmd_failed module=cli status=error exit_code={} error={}",
                err.exit_code(),
                err
            );
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(command: Commands, config: &Config) -> ServiceResult<()> {
    let cwd = std::env::current_dir().map_err(ResolveError::CurrentDir)?;
    let dir = config.resolve_dir(&cwd)?;
    info!(
        "event=cmd_start module=cli status=start source={} dir={}",
        dir.source().as_str(),
        dir.path().display()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Create {
            title,
            kind,
            impact,
            id,
            description,
        } => {
            let service = open_for_create(&dir)?;
            let created = service.create(CreateRequest {
                title,
                kind,
                impact,
                id,
                description,
            })?;
            write_json(&mut out, &created)
        }
        Commands::List {
            kind,
            min_impact,
            id,
            limit,
        } => {
            let service = open_existing(&dir)?;
            let report = service.list(&ListFilter {
                kind,
                min_impact,
                id,
                limit,
            })?;
            for skipped in &report.skipped {
                eprintln!(
                    "warning: skipping malformed entry {}: {}",
                    skipped.path.display(),
                    skipped.reason
                );
            }
            write_jsonl(&mut out, &report.entries)
        }
        Commands::Show { id } => {
            let service = open_existing(&dir)?;
            let stored = service.show(&id)?;
            write_json(&mut out, &EntryRecord::from(&stored))
        }
        Commands::AppendNote { id, text } => {
            let text = match text {
                Some(text) => text,
                None => read_note_from_stdin()?,
            };
            let service = open_existing(&dir)?;
            service.append_note(&id, &text)?;
            Ok(())
        }
    }
}

fn read_note_from_stdin() -> ServiceResult<String> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(ServiceError::InvalidInput(
            "note text is required (pass it as an argument or pipe it on stdin)".to_string(),
        ));
    }
    let mut text = String::new();
    stdin.read_to_string(&mut text).map_err(|err| {
        ServiceError::InvalidInput(format!("failed to read note text from stdin: {err}"))
    })?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}
