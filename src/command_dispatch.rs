//! Purpose: Hold top-level CLI command dispatch for `mznpipe`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Solutions are printed as they arrive; the summary line comes last.
//! Invariants: Library errors pass through unchanged so exit codes stay stable.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use tokio_stream::StreamExt;

use super::*;
use mznpipe::api::{
    CancelHandle, DecodeOptions, EncodeOptions, Instance, MiniZinc, ModelSource, ParserConfig,
    Pipeline, PipelineConfig, Solution, SolveOptions, assignment_from_json, assignment_to_json,
    decode, encode_data, parse_reader_with,
};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "mznpipe", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Encode(args) => run_encode(args),
        Command::Decode(args) => run_decode(args),
        Command::Parse(args) => run_parse(args),
        Command::Solve(args) => run_solve(args),
    }
}

fn read_json(path: Option<&Path>) -> Result<Value, Error> {
    let text = read_input(path)?;
    serde_json::from_str(&text).map_err(|err| {
        let mut error = Error::new(ErrorKind::Parse)
            .with_message("input is not valid JSON")
            .with_position(err.line() as u64, err.column() as u64)
            .with_source(err);
        if let Some(path) = path {
            error = error.with_path(path);
        }
        error
    })
}

fn decode_options(rebase: RebaseCli, types: Option<VarTypes>) -> DecodeOptions {
    let options = DecodeOptions::default().with_rebase(rebase.into());
    match types {
        Some(types) => options.with_types(types),
        None => options,
    }
}

fn solution_json(solution: &Solution, enums: &EnumTable) -> Result<Value, Error> {
    match solution {
        Solution::Assignment(assignment) => Ok(json!({
            "solution": Value::Object(assignment_to_json(assignment, enums)?),
        })),
        Solution::Raw(text) => Ok(json!({ "raw": text })),
    }
}

fn run_encode(args: EncodeArgs) -> Result<RunOutcome, Error> {
    let enums = parse_enum_flags(&args.codec.enums)?;
    let types = parse_type_flags(&args.codec.types)?;
    let json = read_json(args.input.as_deref())?;
    let assignment = assignment_from_json(&json, &enums, types.as_ref())?;
    let dzn = encode_data(
        &assignment,
        &enums,
        EncodeOptions {
            declare: args.declare,
        },
    )?;
    println!("{dzn}");
    Ok(RunOutcome::ok())
}

fn run_decode(args: DecodeArgs) -> Result<RunOutcome, Error> {
    let mut enums = parse_enum_flags(&args.codec.enums)?;
    let options = decode_options(args.rebase, parse_type_flags(&args.codec.types)?);
    let text = read_input(args.input.as_deref())?;
    let assignment = decode(&text, &mut enums, &options).map_err(|err| match &args.input {
        Some(path) if err.path().is_none() => err.with_path(path),
        _ => err,
    })?;
    emit_json(Value::Object(assignment_to_json(&assignment, &enums)?));
    Ok(RunOutcome::ok())
}

fn run_parse(args: ParseArgs) -> Result<RunOutcome, Error> {
    let enums = parse_enum_flags(&args.codec.enums)?;
    let options = decode_options(args.rebase, parse_type_flags(&args.codec.types)?);
    let config = ParserConfig::new(args.mode.into())
        .with_errors(args.errors.into())
        .with_decode(options)
        .with_enums(enums);
    let reader: Box<dyn BufRead> = match args.input.as_deref() {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to open input")
                    .with_path(path)
                    .with_source(err)
            })?;
            Box::new(BufReader::new(file))
        }
        _ => Box::new(io::stdin().lock()),
    };

    let stream = parse_reader_with(reader, config, |solution, enums| {
        emit_json(solution_json(solution, enums)?);
        Ok(())
    })?
    .check()?;
    emit_json(summary_json(&stream));
    Ok(RunOutcome::ok())
}

fn parse_timeout(seconds: f64) -> Result<Duration, Error> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|timeout| !timeout.is_zero())
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("--timeout must be a positive number of seconds")
                .with_hint("Use a value like --timeout 30 or --timeout 0.5.")
        })
}

fn run_solve(args: SolveArgs) -> Result<RunOutcome, Error> {
    let enums = parse_enum_flags(&args.codec.enums)?;
    let types = parse_type_flags(&args.codec.types)?;
    let model = match (args.model, args.model_text) {
        (Some(path), None) => ModelSource::File(path),
        (None, Some(text)) => ModelSource::Inline(text),
        _ => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("solve requires a model file or --model-text")
                .with_hint("Use `mznpipe solve model.mzn` or `mznpipe solve --model-text '...'`."));
        }
    };

    let mut instance = Instance::new();
    instance.data_files = args.data_files;
    if let Some(path) = args.data_json.as_deref() {
        instance.data = assignment_from_json(&read_json(Some(path))?, &enums, types.as_ref())?;
    }

    let solve = SolveOptions {
        all_solutions: args.all_solutions,
        num_solutions: args.num_solutions,
        parallel: args.parallel,
        seed: args.seed,
        statistics: args.statistics,
        time_limit: args.time_limit.map(Duration::from_millis),
        extra_args: Vec::new(),
    };
    let mut config = PipelineConfig::from_env()
        .with_mode(args.mode.into())
        .with_errors(args.errors.into())
        .with_decode(decode_options(args.rebase, types))
        .with_enums(enums)
        .with_solve_options(solve)
        .with_keep(args.keep);
    config.cleanup.keep_on_error = !args.no_keep_on_error;
    if let Some(solver) = args.solver {
        config = config.with_solver(solver);
    }
    if let Some(dir) = args.output_dir {
        config = config.with_output_dir(dir);
    }
    for dir in args.include_dirs {
        config = config.with_include_dir(dir);
    }
    if let Some(seconds) = args.timeout {
        config = config.with_timeout(parse_timeout(seconds)?);
    }
    let toolchain = args
        .minizinc
        .map(MiniZinc::new)
        .unwrap_or_else(MiniZinc::from_env);
    let pipeline = Pipeline::with_toolchain(toolchain, config);

    let stream = if args.use_async {
        solve_async(&pipeline, &model, &instance)?
    } else {
        solve_blocking(&pipeline, &model, &instance)?
    };
    emit_json(summary_json(&stream));
    Ok(RunOutcome::ok())
}

fn solve_blocking(
    pipeline: &Pipeline,
    model: &ModelSource,
    instance: &Instance,
) -> Result<SolutionStream, Error> {
    let enums = &pipeline.config().enums;
    let mut solutions = pipeline.solve_iter(model, instance)?;
    if let Some(handle) = solutions.cancel_handle() {
        cancel_on_interrupt(handle);
    }
    for solution in solutions.by_ref() {
        emit_json(solution_json(&solution, enums)?);
    }
    solutions.into_stream()
}

// The solver runs in its own process group, so Ctrl-C has to be forwarded.
fn cancel_on_interrupt(handle: CancelHandle) {
    std::thread::spawn(move || {
        let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        else {
            return;
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            handle.cancel();
        }
    });
}

fn solve_async(
    pipeline: &Pipeline,
    model: &ModelSource,
    instance: &Instance,
) -> Result<SolutionStream, Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start async runtime")
                .with_source(err)
        })?;
    runtime.block_on(async {
        let enums = &pipeline.config().enums;
        let mut solutions = pipeline.solve_stream_async(model, instance).await?;
        let handle = solutions.cancel_handle();
        loop {
            tokio::select! {
                next = solutions.next() => match next {
                    Some(solution) => emit_json(solution_json(&solution, enums)?),
                    None => break,
                },
                _ = tokio::signal::ctrl_c(), if !handle.is_cancelled() => handle.cancel(),
            }
        }
        solutions.into_stream().await
    })
}
