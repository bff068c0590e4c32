#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use mosaic_core::{LoweredOp, LoweringRegistry, Registry, TraceContext};
use mosaic_ir::SubProgram;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod demos;

use config::ToolConfig;
use demos::Demo;

#[derive(Parser, Debug)]
#[command(name = "mosaic", version, about = "Trace and inspect accelerator kernel programs")]
struct Cli {
    /// TOML file with a `[trace]` table.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the bundled demo kernels
    List,
    /// Trace a demo kernel and print its program
    Demo {
        #[arg(value_enum)]
        name: Demo,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Also lower the program with the built-in lowering rules.
        #[arg(long)]
        lower: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

#[derive(Serialize)]
struct Report<'a> {
    demo: &'static str,
    program: &'a SubProgram,
    #[serde(skip_serializing_if = "Option::is_none")]
    lowered: Option<&'a [LoweredOp]>,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_demo(demo: Demo, cfg: &ToolConfig, format: Format, lower: bool) -> miette::Result<()> {
    let mut cx = TraceContext::new(Registry::standard(), cfg.trace.clone());
    let program = demo.build(&mut cx)?;
    info!(demo = demo.name(), eqns = program.eqns.len(), "traced");

    let lowered = if lower {
        let ops = LoweringRegistry::with_builtins()?.lower_program(&program)?;
        debug!(ops = ops.len(), "lowered");
        Some(ops)
    } else {
        None
    };

    match format {
        Format::Text => {
            println!("{program}");
            if let Some(ops) = &lowered {
                println!();
                for op in ops {
                    println!("{op}");
                }
            }
        }
        Format::Json => {
            let report = Report {
                demo: demo.name(),
                program: &program,
                lowered: lowered.as_deref(),
            };
            println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        }
    }
    Ok(())
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = ToolConfig::load(cli.config.as_deref())?;
    debug!(?cfg, "configuration");

    match cli.cmd {
        Cmd::List => {
            for demo in Demo::value_variants() {
                println!("{:<14} {}", demo.name(), demo.summary());
            }
            Ok(())
        }
        Cmd::Demo {
            name,
            format,
            lower,
        } => run_demo(name, &cfg, format, lower),
    }
}
