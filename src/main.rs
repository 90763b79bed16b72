use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use keel::config::{ConfigError, CONFIG_FILE, KEEL_DIR, KeelConfig, LedgerPaths, load_effective_config};
use keel::decision::{DecisionInput, DecisionStatus, DecisionType};
use keel::error::LedgerError;
use keel::ledger::{self, Ledger, SupersedeInput};
use keel::query::QueryFilter;
use keel::review::CurateFilter;
use serde::Serialize;
use serde_json::json;

/// No limit unless `-n` or `search.limit` says otherwise.
const DEFAULT_SEARCH_LIMIT: usize = 0;

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<LedgerError> for CliError {
    fn from(value: LedgerError) -> Self {
        let code = match &value {
            LedgerError::InvalidId(_) => "invalid_id",
            LedgerError::InvalidType(_) => "invalid_type",
            LedgerError::InvalidStatus(_) => "invalid_status",
            LedgerError::InvalidRole(_) => "invalid_role",
            LedgerError::MissingField(_) => "missing_field",
            LedgerError::AlreadySuperseded { .. } => "already_superseded",
            LedgerError::InvalidPattern { .. } => "invalid_pattern",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::UnsupportedIndexVersion(_) => "unsupported_index",
            LedgerError::Io { .. } => "io_error",
            LedgerError::Sqlite(_) => "sqlite_error",
            LedgerError::Json(_) => "json_error",
        };
        Self::new(code, value.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::new("config_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(about = "An append-only ledger of engineering decisions")]
struct Cli {
    /// Only log errors.
    #[arg(long, short, global = true)]
    quiet: bool,
    /// Log debug output to stderr.
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .keel/ with an empty log and index.
    Init,
    /// Record a new decision.
    Decide(DecideArgs),
    /// Replace an active decision with a new one.
    Supersede(SupersedeArgs),
    /// Show one decision by id.
    Why(WhyArgs),
    /// Decisions affecting a file or symbol, plus active constraints.
    Context(ContextArgs),
    /// Full-text search, or list decisions when no query is given.
    Search(SearchArgs),
    /// Report active decisions that reference missing files.
    Validate,
    /// List active decisions that are candidates for summarisation.
    Curate(CurateArgs),
    /// Rebuild the index from the log.
    Rebuild,
}

#[derive(Args, Debug)]
struct DecideArgs {
    #[arg(long = "type", short = 't')]
    decision_type: String,
    #[arg(long)]
    problem: String,
    #[arg(long)]
    choice: String,
    #[arg(long)]
    rationale: Option<String>,
    /// Comma-separated.
    #[arg(long)]
    tradeoffs: Option<String>,
    /// Comma-separated.
    #[arg(long)]
    files: Option<String>,
    /// Comma-separated.
    #[arg(long)]
    symbols: Option<String>,
    /// Comma-separated.
    #[arg(long)]
    refs: Option<String>,
    #[arg(long)]
    hypothesis: Option<String>,
    #[arg(long)]
    success_criteria: Option<String>,
    #[arg(long)]
    supersedes: Option<String>,
    #[arg(long)]
    agent: bool,
}

#[derive(Args, Debug)]
struct SupersedeArgs {
    id: String,
    #[arg(long)]
    choice: String,
    /// Defaults to the original problem.
    #[arg(long)]
    problem: Option<String>,
    #[arg(long)]
    rationale: Option<String>,
    #[arg(long)]
    files: Option<String>,
    #[arg(long)]
    symbols: Option<String>,
    #[arg(long)]
    refs: Option<String>,
    #[arg(long)]
    agent: bool,
}

#[derive(Args, Debug)]
struct WhyArgs {
    id: String,
}

#[derive(Args, Debug)]
struct ContextArgs {
    #[arg(required_unless_present = "ref_id")]
    path: Option<String>,
    #[arg(long = "ref", conflicts_with = "path")]
    ref_id: Option<String>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    query: Option<String>,
    #[arg(long = "type", short = 't')]
    decision_type: Option<String>,
    #[arg(long)]
    status: Option<String>,
    /// 0 means no limit.
    #[arg(long, short = 'n')]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct CurateArgs {
    #[arg(long)]
    older_than: Option<u32>,
    #[arg(long = "type", short = 't')]
    decision_type: Option<String>,
    #[arg(long, short = 'f')]
    file_pattern: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(quiet: bool, verbose: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("KEEL_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // A second init only happens under test harnesses; keep the first.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(command: Command) -> Result<ExitCode, CliError> {
    let cwd = std::env::current_dir().map_err(|err| CliError::new("cwd_error", err.to_string()))?;
    let paths = LedgerPaths::new(cwd);
    if let Command::Init = command {
        return cmd_init(&paths);
    }

    require_initialized(&paths)?;
    let ledger = Ledger::open(paths)?;
    match command {
        Command::Init => Ok(ExitCode::SUCCESS),
        Command::Decide(args) => cmd_decide(&ledger, args),
        Command::Supersede(args) => cmd_supersede(&ledger, args),
        Command::Why(args) => cmd_why(&ledger, args),
        Command::Context(args) => cmd_context(&ledger, args),
        Command::Search(args) => cmd_search(&ledger, args),
        Command::Validate => cmd_validate(&ledger),
        Command::Curate(args) => cmd_curate(&ledger, args),
        Command::Rebuild => cmd_rebuild(&ledger),
    }
}

fn cmd_init(paths: &LedgerPaths) -> Result<ExitCode, CliError> {
    let created = ledger::init(paths)?;
    print_json(&json!({
        "status": "ok",
        "created": created,
        "keel_dir": paths.keel_dir,
        "log": paths.log,
        "index": paths.index,
    }))
}

fn cmd_decide(ledger: &Ledger, args: DecideArgs) -> Result<ExitCode, CliError> {
    let config = load_config(ledger.paths())?;
    let mut input = DecisionInput::new(
        args.decision_type.parse::<DecisionType>()?,
        args.problem,
        args.choice,
    );
    input.rationale = non_blank(args.rationale);
    input.tradeoffs = split_and_trim(args.tradeoffs.as_deref());
    input.files = split_and_trim(args.files.as_deref());
    input.symbols = split_and_trim(args.symbols.as_deref());
    input.refs = split_and_trim(args.refs.as_deref());
    input.hypothesis = non_blank(args.hypothesis);
    input.success_criteria = non_blank(args.success_criteria);
    input.supersedes = non_blank(args.supersedes);
    input.decided_by = Some(config.decided_by(args.agent));

    let decision = ledger.decide(input)?;
    print_json(&decision)
}

fn cmd_supersede(ledger: &Ledger, args: SupersedeArgs) -> Result<ExitCode, CliError> {
    let config = load_config(ledger.paths())?;
    let mut input = SupersedeInput::new(args.choice);
    input.problem = non_blank(args.problem);
    input.rationale = non_blank(args.rationale);
    input.files = args.files.as_deref().map(|raw| split_and_trim(Some(raw)));
    input.symbols = args.symbols.as_deref().map(|raw| split_and_trim(Some(raw)));
    input.refs = args.refs.as_deref().map(|raw| split_and_trim(Some(raw)));
    input.decided_by = Some(config.decided_by(args.agent));

    let outcome = ledger.supersede(&args.id, input)?;
    print_json(&outcome)
}

fn cmd_why(ledger: &Ledger, args: WhyArgs) -> Result<ExitCode, CliError> {
    match ledger.why(&args.id)? {
        Some(decision) => print_json(&decision),
        None => Err(CliError::new(
            "not_found",
            format!("decision {} not found", args.id.trim()),
        )),
    }
}

fn cmd_context(ledger: &Ledger, args: ContextArgs) -> Result<ExitCode, CliError> {
    let result = match (args.ref_id, args.path) {
        (Some(ref_id), _) => ledger.context_for_ref(&ref_id)?,
        (None, Some(path)) => ledger.context(&path)?,
        (None, None) => {
            return Err(CliError::new(
                "missing_target",
                "expected a path, symbol, or --ref",
            ));
        }
    };
    print_json(&result)
}

fn cmd_search(ledger: &Ledger, args: SearchArgs) -> Result<ExitCode, CliError> {
    let config = load_config(ledger.paths())?;
    let filter = QueryFilter {
        decision_type: parse_optional::<DecisionType>(args.decision_type.as_deref())?,
        status: parse_optional::<DecisionStatus>(args.status.as_deref())?,
        limit: Some(
            args.limit
                .or(config.search_limit)
                .unwrap_or(DEFAULT_SEARCH_LIMIT),
        ),
    };
    let decisions = ledger.search(args.query.as_deref(), filter)?;
    print_json(&json!({
        "count": decisions.len(),
        "decisions": decisions,
    }))
}

fn cmd_validate(ledger: &Ledger) -> Result<ExitCode, CliError> {
    let issues = ledger.validate()?;
    let clean = issues.is_empty();
    print_json(&json!({
        "status": if clean { "ok" } else { "issues" },
        "issue_count": issues.len(),
        "issues": issues,
    }))?;
    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_curate(ledger: &Ledger, args: CurateArgs) -> Result<ExitCode, CliError> {
    let filter = CurateFilter {
        older_than_days: args.older_than,
        decision_type: parse_optional::<DecisionType>(args.decision_type.as_deref())?,
        file_pattern: non_blank(args.file_pattern),
    };
    let candidates = ledger.curate(&filter, Utc::now())?;
    print_json(&json!({
        "count": candidates.len(),
        "candidates": candidates,
    }))
}

fn cmd_rebuild(ledger: &Ledger) -> Result<ExitCode, CliError> {
    let stats = ledger.rebuild()?;
    print_json(&json!({
        "status": "ok",
        "snapshots_read": stats.snapshots_read,
        "decisions_indexed": stats.decisions_indexed,
    }))
}

fn require_initialized(paths: &LedgerPaths) -> Result<(), CliError> {
    if !paths.is_initialized() {
        return Err(CliError::new(
            "not_initialized",
            "repository is not initialized; run `keel init`",
        ));
    }
    Ok(())
}

fn load_config(paths: &LedgerPaths) -> Result<KeelConfig, CliError> {
    let user_config = home_dir()?.join(KEEL_DIR).join(CONFIG_FILE);
    Ok(load_effective_config(
        Some(&paths.repo_config),
        Some(&user_config),
    )?)
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "HOME environment variable is not set"))
}

fn parse_optional<T>(raw: Option<&str>) -> Result<Option<T>, CliError>
where
    T: std::str::FromStr<Err = LedgerError>,
{
    Ok(raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(str::parse::<T>)
        .transpose()?)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn split_and_trim(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<ExitCode, CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}
