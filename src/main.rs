use std::io;
use std::num::ParseIntError;
use std::process;
use std::str::FromStr;

use regclobber::{
    boundary,
    interrupt::EXIT_SIGNALS,
    Command, ElfSymbols, Engine, ExitSignal, FixedAddress, NmSymbols, Report, SymbolResolver,
};
use structopt::clap::{AppSettings, ErrorKind};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "regclobber [FLAGS] [OPTIONS] <PROGRAM> [ARGS]...";

/// Run a program, clearing its registers after every instruction at or above the
/// address of a marker symbol.
#[derive(Debug, StructOpt)]
#[structopt(
    settings = &[AppSettings::TrailingVarArg, AppSettings::ColorNever],
    usage = USAGE,
)]
struct Opt {
    /// Symbol marking the start of code which may not rely on register contents
    #[structopt(long, default_value = "FORBID_REGS")]
    symbol: String,

    /// How to look up the symbol
    #[structopt(long, default_value = "elf", possible_values = &["elf", "nm"])]
    resolver: Resolver,

    /// Use this boundary address instead of looking up a symbol
    #[structopt(long, parse(try_from_str = parse_address))]
    boundary: Option<u64>,

    /// Log more; repeat for more detail
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,

    /// Program to run, and its arguments
    #[structopt(name = "PROGRAM", required = true, min_values = 1)]
    argv: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
enum Resolver {
    Elf,
    Nm,
}

impl FromStr for Resolver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elf" => Ok(Resolver::Elf),
            "nm" => Ok(Resolver::Nm),
            _ => Err(format!("unknown resolver: {}", s)),
        }
    }
}

fn parse_address(s: &str) -> Result<u64, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

fn run(opt: Opt) -> regclobber::Result<Report> {
    let exit_signal = ExitSignal::install(EXIT_SIGNALS)?;

    let cmd = Command::new(opt.argv)?;
    let mut tracee = regclobber::launch(&cmd)?;

    let resolver: Box<dyn SymbolResolver> = match (opt.boundary, opt.resolver) {
        (Some(addr), _) => Box::new(FixedAddress(Some(addr))),
        (None, Resolver::Elf) => Box::new(ElfSymbols),
        (None, Resolver::Nm) => Box::new(NmSymbols),
    };
    let boundary = boundary::resolve(tracee.pid(), resolver.as_ref(), &opt.symbol)?;

    let mut engine = Engine::new(boundary, exit_signal);
    let outcome = engine.run(&mut tracee)?;

    Ok(Report::new(engine.counters(), outcome))
}

fn main() {
    let opt = match Opt::from_iter_safe(std::env::args()) {
        Ok(opt) => opt,
        Err(err) if matches!(err.kind, ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed) => {
            err.exit()
        },
        Err(err) => {
            eprintln!("{}", err.message);
            process::exit(1);
        },
    };

    init_logging(opt.verbose);

    match run(opt) {
        Ok(report) => {
            eprintln!("\n{}", report);
            process::exit(report.exit_code());
        },
        Err(err) => {
            eprintln!("regclobber: {}", err);
            process::exit(1);
        },
    }
}
