//! Purpose: `mznpipe` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON lines on stdout.
//! Invariants: Records and summaries go to stdout, one JSON document per line.
//! Invariants: Errors go to stderr as JSON when stderr is not a terminal.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use mznpipe::api::{
    EnumTable, Error, ErrorKind, ErrorPolicy, OutputMode, Rebase, SolutionStream, VarTypes,
    to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome { exit_code });
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `mznpipe --help`."));
            }
        },
    };

    init_tracing();
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "mznpipe",
    version,
    about = "Encode dzn data, run MiniZinc solvers, and parse their solution streams",
    after_help = r#"EXAMPLES
  $ mznpipe solve queens.mzn -d queens.dzn -a
  $ echo '{"n": 8}' | mznpipe encode
  $ mznpipe decode data.dzn
  $ minizinc model.mzn | mznpipe parse

LEARN MORE
  $ mznpipe <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Flatten and solve a model, streaming solutions as JSON lines",
        long_about = r#"Flatten and solve a model, streaming solutions as JSON lines.

Each solution is printed as soon as the solver emits it. A final summary line
carries the terminal status and statistics. Intermediate files are written
with a per-invocation token, deleted on success, and kept on failure."#,
        after_help = r#"EXAMPLES
  $ mznpipe solve queens.mzn --data-json n.json -n 3
  $ mznpipe solve golomb.mzn -d golomb.dzn --timeout 30 --keep"#
    )]
    Solve(SolveArgs),
    #[command(about = "Encode a JSON object of assignments as dzn")]
    Encode(EncodeArgs),
    #[command(about = "Decode a dzn document into a JSON object")]
    Decode(DecodeArgs),
    #[command(about = "Parse a captured solver output stream")]
    Parse(ParseArgs),
    #[command(about = "Print version info")]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ mznpipe completion bash > ~/.local/share/bash-completion/completions/mznpipe
  $ mznpipe completion zsh > ~/.zfunc/_mznpipe"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ModeCli {
    Dict,
    Json,
    JsonLines,
    Raw,
}

impl From<ModeCli> for OutputMode {
    fn from(value: ModeCli) -> Self {
        match value {
            ModeCli::Dict => OutputMode::Dict,
            ModeCli::Json => OutputMode::Json,
            ModeCli::JsonLines => OutputMode::JsonLines,
            ModeCli::Raw => OutputMode::Raw,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ErrorPolicyCli {
    Stop,
    Skip,
}

impl From<ErrorPolicyCli> for ErrorPolicy {
    fn from(value: ErrorPolicyCli) -> Self {
        match value {
            ErrorPolicyCli::Stop => ErrorPolicy::Stop,
            ErrorPolicyCli::Skip => ErrorPolicy::Skip,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RebaseCli {
    Auto,
    Force,
    Never,
}

impl From<RebaseCli> for Rebase {
    fn from(value: RebaseCli) -> Self {
        match value {
            RebaseCli::Auto => Rebase::Auto,
            RebaseCli::Force => Rebase::Force,
            RebaseCli::Never => Rebase::Never,
        }
    }
}

#[derive(Args, Debug, Default)]
struct CodecArgs {
    #[arg(
        long = "enum",
        value_name = "NAME=CASE,...",
        help = "Declare an enum, e.g. --enum Color=red,green,blue (repeatable)"
    )]
    enums: Vec<String>,
    #[arg(
        long = "type",
        value_name = "NAME=TYPE",
        help = "Declare a variable type, e.g. --type 'x=array[int] of float' (repeatable)"
    )]
    types: Vec<String>,
}

#[derive(Args)]
struct SolveArgs {
    #[arg(help = "Model file (.mzn)", value_hint = ValueHint::FilePath)]
    model: Option<PathBuf>,
    #[arg(long, conflicts_with = "model", help = "Model text instead of a file")]
    model_text: Option<String>,
    #[arg(short = 'd', long = "data", help = "Data file (.dzn), repeatable", value_hint = ValueHint::FilePath)]
    data_files: Vec<PathBuf>,
    #[arg(long, help = "JSON object of assignments to encode as data ('-' for stdin)")]
    data_json: Option<PathBuf>,
    #[arg(long, help = "Solver id (default: $MZNPIPE_SOLVER or gecode)")]
    solver: Option<String>,
    #[arg(short = 'a', long, help = "Report all solutions")]
    all_solutions: bool,
    #[arg(short = 'n', long, help = "Stop after N solutions")]
    num_solutions: Option<u32>,
    #[arg(short = 'p', long, help = "Solver threads")]
    parallel: Option<u32>,
    #[arg(short = 'r', long, help = "Random seed")]
    seed: Option<u64>,
    #[arg(short = 's', long, help = "Collect solver statistics")]
    statistics: bool,
    #[arg(long, value_name = "MS", help = "Solver-side time limit in milliseconds")]
    time_limit: Option<u64>,
    #[arg(long, value_name = "SECS", help = "Kill the solver after this many seconds")]
    timeout: Option<f64>,
    #[arg(long, value_enum, default_value = "dict", help = "Solver output format")]
    mode: ModeCli,
    #[arg(long, value_enum, default_value = "stop", help = "On a malformed block: stop|skip")]
    errors: ErrorPolicyCli,
    #[arg(long, value_enum, default_value = "auto", help = "Array index rebasing: auto|force|never")]
    rebase: RebaseCli,
    #[arg(long, help = "Keep intermediate files after a successful run")]
    keep: bool,
    #[arg(long, help = "Delete intermediate files even when the run fails")]
    no_keep_on_error: bool,
    #[arg(long, help = "Directory for intermediate files", value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,
    #[arg(short = 'I', long = "include", help = "Extra include directory, repeatable", value_hint = ValueHint::DirPath)]
    include_dirs: Vec<PathBuf>,
    #[arg(long, help = "MiniZinc driver executable (default: $MZNPIPE_MINIZINC or minizinc)", value_hint = ValueHint::ExecutablePath)]
    minizinc: Option<PathBuf>,
    #[arg(long = "async", help = "Run on the async runtime; Ctrl-C cancels cleanly")]
    use_async: bool,
    #[command(flatten)]
    codec: CodecArgs,
}

#[derive(Args)]
struct EncodeArgs {
    #[arg(help = "JSON input file (default: stdin)", value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,
    #[arg(long, help = "Prefix statements with their inferred types")]
    declare: bool,
    #[command(flatten)]
    codec: CodecArgs,
}

#[derive(Args)]
struct DecodeArgs {
    #[arg(help = "dzn input file (default: stdin)", value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "auto", help = "Array index rebasing: auto|force|never")]
    rebase: RebaseCli,
    #[command(flatten)]
    codec: CodecArgs,
}

#[derive(Args)]
struct ParseArgs {
    #[arg(help = "Captured output file (default: stdin)", value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "dict", help = "Format of the captured output")]
    mode: ModeCli,
    #[arg(long, value_enum, default_value = "stop", help = "On a malformed block: stop|skip")]
    errors: ErrorPolicyCli,
    #[arg(long, value_enum, default_value = "auto", help = "Array index rebasing: auto|force|never")]
    rebase: RebaseCli,
    #[command(flatten)]
    codec: CodecArgs,
}

fn parse_enum_flags(flags: &[String]) -> Result<EnumTable, Error> {
    let mut enums = EnumTable::new();
    for flag in flags {
        let (name, cases) = flag.split_once('=').ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid --enum `{flag}`"))
                .with_hint("Use NAME=CASE,CASE,... e.g. --enum Color=red,green.")
        })?;
        let cases = cases
            .split(',')
            .map(str::trim)
            .filter(|case| !case.is_empty())
            .collect::<Vec<_>>();
        enums.declare(name.trim(), cases)?;
    }
    Ok(enums)
}

fn parse_type_flags(flags: &[String]) -> Result<Option<VarTypes>, Error> {
    if flags.is_empty() {
        return Ok(None);
    }
    let mut types = VarTypes::new();
    for flag in flags {
        let (name, var_type) = flag.split_once('=').ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid --type `{flag}`"))
                .with_hint("Use NAME=TYPE e.g. --type 'x=set of int'.")
        })?;
        types.declare(name.trim(), var_type.trim())?;
    }
    Ok(Some(types))
}

/// Reads a file, or stdin for `None` and `-`.
fn read_input(path: Option<&Path>) -> Result<String, Error> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read input")
                .with_path(path)
                .with_source(err)
        }),
        _ => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read stdin")
                    .with_source(err)
            })?;
            Ok(text)
        }
    }
}

fn emit_json(value: Value) {
    let json = serde_json::to_string(&value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("mznpipe {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(json!({
            "name": "mznpipe",
            "version": env!("CARGO_PKG_VERSION"),
        }));
    }
}

fn summary_json(stream: &SolutionStream) -> Value {
    let mut summary = Map::new();
    summary.insert("status".to_string(), json!(stream.status()));
    summary.insert("solutions".to_string(), json!(stream.len()));
    if !stream.statistics().is_empty() {
        summary.insert("statistics".to_string(), json!(stream.statistics()));
    }
    if !stream.skipped().is_empty() {
        summary.insert("skipped".to_string(), json!(stream.skipped()));
    }
    json!({ "summary": summary })
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() || err.kind() != ErrorKind::Io {
        return err;
    }
    err.with_hint("I/O error. Check the path, permissions, and disk space.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share the command if it persists.",
    )
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::Io => "i/o error",
        ErrorKind::Encoding => "value cannot be encoded",
        ErrorKind::Parse => "malformed input",
        ErrorKind::Unsatisfiable => "problem is unsatisfiable",
        ErrorKind::Unbounded => "problem is unbounded",
        ErrorKind::UnsatOrUnbounded => "problem is unsatisfiable or unbounded",
        ErrorKind::Unknown => "no definitive result",
        ErrorKind::Execution => "solver execution failed",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    if let Some(fragment) = err.fragment() {
        inner.insert("fragment".to_string(), json!(fragment));
    }
    if let Some(code) = err.exit_code() {
        inner.insert("exit_code".to_string(), json!(code));
    }
    if let Some(stderr) = err.stderr() {
        inner.insert("stderr".to_string(), json!(stderr));
    }
    if let Some(partial) = err.partial() {
        inner.insert("status".to_string(), json!(partial.status()));
        inner.insert("solutions".to_string(), json!(partial.len()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    match (err.line(), err.column()) {
        (Some(line), Some(column)) => lines.push(format!("at: line {line}, column {column}")),
        (Some(line), None) => lines.push(format!("at: line {line}")),
        _ => {}
    }
    if let Some(fragment) = err.fragment() {
        lines.push(format!("near: {fragment}"));
    }
    if let Some(stderr) = err.stderr() {
        lines.push(format!("stderr:\n{}", stderr.trim_end()));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
