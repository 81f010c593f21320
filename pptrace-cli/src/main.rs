//! pptrace CLI - コマンドラインインターフェース
//!
//! バイナリのデバッグ情報の調査と、uprobeによる関数トレースを行います。

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pptrace_core::{parse_trace_targets, CompiledTarget, DryRun, EventNamer, ProbeSession};
use pptrace_dwarf::{
    load_debug_tree, DebugFileLocator, ElfImage, FunctionSignature, LocatorConfig, NameFilter,
    SymbolTable, TypeResolver, TypedefLayout, DEFAULT_DEBUG_ROOT,
};
use pptrace_tracefs::{list_instances, stop_channel, stop_on_signals, TraceFs, DEFAULT_TRACEFS};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// pptrace - uprobe based function tracer
#[derive(Parser)]
#[command(name = "pptrace")]
#[command(version)]
#[command(about = "Function tracer built on uprobes and DWARF debug info", long_about = None)]
struct Cli {
    /// Log tracefs commands as they are run
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect symbols and debug info of a binary
    Inspect {
        #[command(subcommand)]
        command: InspectCommand,
    },

    /// Trace functions: <binary> <function> [arg_expression...] [-- <binary> <function> ...]
    ///
    /// Flags must come before the first binary.
    Trace {
        /// Show commands that would be run without touching tracefs
        #[arg(long)]
        dry: bool,

        #[command(flatten)]
        tracefs: TraceFsArgs,

        #[arg(
            required = true,
            value_name = "TARGET",
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        args: Vec<String>,
    },

    /// Get tracefs state
    TracerState {
        #[command(subcommand)]
        command: TracerStateCommand,
    },
}

#[derive(Subcommand)]
enum InspectCommand {
    /// Show function arguments from DWARF
    Args {
        binary: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        debug: DebugArgs,
    },

    /// Show typedef member layouts from DWARF
    Types {
        binary: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        debug: DebugArgs,
    },

    /// Show uprobe offsets of function symbols
    Offset {
        binary: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show the file that carries debug info for a binary
    DebugFile {
        binary: PathBuf,
        #[command(flatten)]
        debug: DebugArgs,
    },
}

#[derive(Subcommand)]
enum TracerStateCommand {
    /// List tracer instances
    ListTracers {
        #[command(flatten)]
        tracefs: TraceFsArgs,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Function or type name (substring match unless --exact)
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    filter: Option<String>,

    /// Match on exact name
    #[arg(short, long)]
    exact: bool,

    /// Show everything
    #[arg(long)]
    all: bool,
}

impl QueryArgs {
    fn name_filter(&self) -> NameFilter {
        NameFilter::new(self.filter.as_deref(), self.exact, self.all)
    }
}

#[derive(Args)]
struct DebugArgs {
    /// Root of the separate debug file store
    #[arg(long, default_value = DEFAULT_DEBUG_ROOT)]
    debug_root: PathBuf,

    /// Reject .gnu_debuglink candidates whose CRC-32 does not match
    #[arg(long)]
    verify_crc: bool,
}

impl DebugArgs {
    fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            debug_root: self.debug_root.clone(),
            verify_crc: self.verify_crc,
        }
    }
}

#[derive(Args)]
struct TraceFsArgs {
    /// tracefs mount point
    #[arg(long = "tracefs", default_value = DEFAULT_TRACEFS)]
    root: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let dry = matches!(cli.command, Command::Trace { dry: true, .. });
    init_logging(cli.verbose || dry);

    match cli.command {
        Command::Inspect { command } => handle_inspect(command),
        Command::Trace { dry, tracefs, args } => handle_trace(&args, &tracefs.root, dry),
        Command::TracerState {
            command: TracerStateCommand::ListTracers { tracefs },
        } => handle_list_tracers(&tracefs.root),
    }
}

/// ログはstderrへ出す（stdoutはコマンド出力とトレースレコード用）
fn init_logging(verbose: bool) {
    let default = if verbose { "warn,pptrace=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn handle_inspect(command: InspectCommand) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        InspectCommand::Args { binary, query, debug } => {
            let tree = load_tree(&binary, &debug)?;
            let functions = TypeResolver::new(&tree).functions(&query.name_filter())?;
            print_functions(&mut out, &functions)?;
        }
        InspectCommand::Types { binary, query, debug } => {
            let tree = load_tree(&binary, &debug)?;
            let typedefs = TypeResolver::new(&tree).typedefs(&query.name_filter())?;
            print_typedefs(&mut out, &typedefs)?;
        }
        InspectCommand::Offset { binary, query } => {
            let image = ElfImage::open(&binary)?;
            let symbols = SymbolTable::read(&image)?;
            for function in symbols.resolve(&query.name_filter())? {
                writeln!(out, "{:016x} {:016x} {}", function.offset, function.address, function.name)?;
            }
        }
        InspectCommand::DebugFile { binary, debug } => {
            let path = DebugFileLocator::new(debug.locator_config()).locate(&binary)?;
            writeln!(out, "{}", path.display())?;
        }
    }

    Ok(())
}

fn load_tree(binary: &Path, debug: &DebugArgs) -> Result<pptrace_dwarf::DebugTree> {
    load_debug_tree(binary, &debug.locator_config())
        .with_context(|| format!("Failed to load debug info for {}", binary.display()))
}

/// 関数ごとに `%016x %016x name`、続けて引数を1行ずつ出力する
fn print_functions<W: Write>(out: &mut W, functions: &[FunctionSignature]) -> io::Result<()> {
    for function in functions {
        writeln!(out, "{:016x} {:016x} {}", function.low_pc, function.size, function.name)?;
        for arg in &function.args {
            writeln!(out, "\t{} {}", arg.name, arg.type_name)?;
        }
    }
    Ok(())
}

fn print_typedefs<W: Write>(out: &mut W, typedefs: &[TypedefLayout]) -> io::Result<()> {
    for typedef in typedefs {
        writeln!(out, "{}", typedef.name)?;
        for member in &typedef.members {
            writeln!(out, "{:3} {:>32}\t{}", member.offset, member.name, member.type_name)?;
        }
    }
    Ok(())
}

fn handle_trace(args: &[String], root: &Path, dry: bool) -> Result<()> {
    let targets = parse_trace_targets(args)?;
    let namer = EventNamer::new()?;
    let compiled = targets
        .iter()
        .enumerate()
        .map(|(idx, target)| target.compile(&namer, idx))
        .collect::<Result<Vec<_>>>()?;
    let events: Vec<_> = compiled.iter().map(CompiledTarget::uprobe).collect();

    if dry {
        let control = DryRun::new(root);
        let session = ProbeSession::start(&control, &events)?;
        control.trace_pipe();
        session.close();
        return Ok(());
    }

    // セットアップ中のCtrl-Cも後始末を経由させる
    let (stop, stop_signal) = stop_channel()?;
    stop_on_signals(stop)?;

    let control = TraceFs::new(root);
    let session = ProbeSession::start(&control, &events)?;
    let mut pipe = control.trace_pipe(stop_signal)?;
    info!("Tracing {} function(s), press Ctrl-C to stop", events.len());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    pipe.copy_to(&mut out)?;

    session.close();
    Ok(())
}

fn handle_list_tracers(root: &Path) -> Result<()> {
    for instance in list_instances(root)? {
        let on = instance
            .is_on()
            .with_context(|| format!("get on state err for {}", instance.name()))?;
        let tracer = instance
            .current_tracer()
            .with_context(|| format!("get current tracer err for {}", instance.name()))?;

        println!("Instance: {} on={} tracer={}", instance.name(), on, tracer);
    }
    Ok(())
}
