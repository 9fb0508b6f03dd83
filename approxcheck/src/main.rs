use approxcheck::*;

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

/// Find the instructions of a program that may be computed approximately
#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    /// Path to a textual IR listing
    input: PathBuf,
    /// Only analyze the function with this name (repeat for more)
    #[clap(long = "function")]
    functions: Vec<String>,
    /// Format of the per-function reports
    #[clap(long, arg_enum, default_value = "text")]
    format: report::ReportFormat,
    /// Path to output file for the reports, instead of stdout
    #[clap(long)]
    output: Option<PathBuf>,
    /// Output the def-use graph of each analyzed function, with exact instructions filled, as a
    /// GraphViz `<function>.dot` file in the given directory
    #[clap(long)]
    debug_output_graphviz: Option<PathBuf>,
    /// Disable terminal logging, even for high severity alerts. Strongly discouraged for normal
    /// use.
    #[clap(long)]
    debug_disable_terminal_logging: bool,
    /// Force blocking for terminal logging. If too many messages are being spewed the logger,
    /// by default, does not block, but instead dumps a dropped-messages alert. This option
    /// forces it to block and dump even if too many are being sent.
    #[clap(long)]
    debug_forced_blocking_terminal_logging: bool,
    /// Path to send log (as JSON) to
    ///
    /// Error or higher severity alerts will still continue being shown at stderr (in addition
    /// to being added to the log)
    #[clap(long = "--log")]
    log_file: Option<PathBuf>,
    /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
    #[clap(short, long, parse(from_occurrences))]
    debug: usize,
    /// Advanced configuration options to tweak the analysis behavior
    #[clap(short = 'Z', long, arg_enum)]
    advanced_config: Vec<analysis_config::CommandLineAnalysisConfig>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("{}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        source: il_parser::ParseError,
    },
    #[error("no function named `{0}` with a body")]
    UnknownFunction(String),
}

fn io_error(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> CliError + '_ {
    move |source| CliError::Io {
        path: path.to_owned(),
        source,
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let listing = std::fs::read_to_string(&args.input).map_err(io_error(&args.input))?;
    let prog = il_parser::lift_from(&listing).map_err(|source| CliError::Parse {
        path: args.input.clone(),
        source,
    })?;

    for name in &args.functions {
        if !prog.function(name).map_or(false, |f| !f.is_declaration()) {
            return Err(CliError::UnknownFunction(name.clone()));
        }
    }

    let analyses: Vec<_> = if args.functions.is_empty() {
        analysis::analyze_program(&prog, &analysis_config::CONFIG)
    } else {
        args.functions
            .iter()
            .filter_map(|name| prog.function(name))
            .map(analysis::ApproximabilityAnalysis::analyze)
            .collect()
    };

    if let Some(dir) = &args.debug_output_graphviz {
        std::fs::create_dir_all(dir).map_err(io_error(dir))?;
        for a in &analyses {
            let path = dir.join(format!("{}.dot", a.function().name()));
            let mut file = std::fs::File::create(&path).map_err(io_error(&path))?;
            a.write_dot(&mut file).map_err(io_error(&path))?;
            log::debug!("Wrote graph"; "path" => ?path);
        }
    }

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(std::fs::File::create(path).map_err(io_error(path))?),
        None => Box::new(std::io::stdout()),
    };
    let out_path = args.output.clone().unwrap_or_else(|| PathBuf::from("<stdout>"));
    for a in &analyses {
        write!(out, "{}", a.report().display(args.format)).map_err(io_error(&out_path))?;
    }
    out.flush().map_err(io_error(&out_path))?;

    log::trace!("Done");
    Ok(())
}

fn main() {
    let args = Args::parse();

    let logger = match log::FileAndTermDrain::new(
        args.debug,
        args.debug_disable_terminal_logging,
        args.debug_forced_blocking_terminal_logging,
        args.log_file.clone(),
    ) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Could not set up logging: {}", e);
            std::process::exit(2);
        }
    };
    let log_guard = slog_scope::set_global_logger(logger);

    analysis_config::AnalysisConfig::initialize(args.advanced_config.clone());

    let result = run(args);
    if let Err(e) = &result {
        log::error!("Analysis failed"; "error" => %e);
    }
    // Flush the logger before exiting
    drop(log_guard);
    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
