use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pdc::diag::{Diagnostic, DiagnosticRecord};
use pdc::pass::PassId;
use pdc::pipeline::{run_pipeline, CompilationState, CompileOptions};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Ast,
    Resolved,
    Regions,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum KernelsMode {
    /// Decompose kernels regions into parallel regions
    Split,
    /// Leave kernels regions whole
    Keep,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum DiagFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "pdc",
    version,
    about = "Parallel Directive Checker: resolves OpenMP/OpenACC directives and splits kernels regions"
)]
struct Cli {
    /// Input Fortran source file
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Regions)]
    emit: EmitStage,

    /// Kernels region handling
    #[arg(long, value_enum, default_value_t = KernelsMode::Split)]
    kernels: KernelsMode,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value_t = DiagFormat::Text)]
    diag_format: DiagFormat,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum DriverError {
    #[error("{}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot encode diagnostic: {0}")]
    Encode(#[from] serde_json::Error),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "pdc=debug" } else { "pdc=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(diags: &[Diagnostic], format: DiagFormat) -> Result<(), DriverError> {
    for diag in diags {
        match format {
            DiagFormat::Text => eprintln!("pdc: {diag}"),
            DiagFormat::Json => {
                eprintln!("{}", serde_json::to_string(&DiagnosticRecord::from(diag))?)
            }
        }
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<ExitCode, DriverError> {
    if cli.verbose {
        eprintln!("pdc: source = {}", cli.source.display());
        eprintln!("pdc: emit   = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = std::fs::read_to_string(&cli.source).map_err(|source| DriverError::Read {
        path: cli.source.clone(),
        source,
    })?;

    let parse_result = pdc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            eprintln!("pdc: parse error: {}", err);
        }
        return Ok(ExitCode::from(1));
    }
    let Some(program) = parse_result.program else {
        eprintln!("pdc: parse failed with no output");
        return Ok(ExitCode::from(1));
    };

    if cli.verbose {
        eprintln!("pdc: parsed {} program units", program.units.len());
    }

    if let EmitStage::Ast = cli.emit {
        println!("{program:#?}");
        return Ok(ExitCode::SUCCESS);
    }

    // ── Passes ──
    let terminal = match cli.emit {
        EmitStage::Resolved => PassId::Resolve,
        _ => PassId::ConvertKernels,
    };
    let options = CompileOptions {
        split_kernels: matches!(cli.kernels, KernelsMode::Split),
        verbose: cli.verbose,
    };
    let mut state = CompilationState::new(program);
    let mut report_err = None;
    let outcome = run_pipeline(&mut state, terminal, &options, |_, diags| {
        if report_err.is_none() {
            report_err = report(diags, cli.diag_format).err();
        }
    });
    if let Some(err) = report_err {
        return Err(err);
    }
    if outcome.is_err() {
        return Ok(ExitCode::from(1));
    }

    match cli.emit {
        EmitStage::Ast => {}
        EmitStage::Resolved => println!("{:#?}", state.program),
        EmitStage::Regions => {
            if let Some(regions) = &state.regions {
                print!("{regions}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pdc: error: {e}");
            ExitCode::from(2)
        }
    }
}
