use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use colored::Colorize;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use ropasm::assembler::Assembler;
use ropasm::script::Script;

#[derive(Parser)]
#[command(
    name = "ropasm",
    about = "Assemble return-oriented programs from gadgets in 32-bit PE/ELF modules"
)]
struct Cli {
    /// Modules to scan for gadgets, in lookup priority order
    #[arg(required = true)]
    modules: Vec<PathBuf>,

    /// JSON program script to assemble
    #[arg(short, long, conflicts_with = "list")]
    program: Option<PathBuf>,

    /// List every discovered instruction with its first addresses
    #[arg(short, long)]
    list: bool,

    /// Write the payload here instead of stdout
    #[arg(short, long, requires = "program")]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    if let Err(e) = SimpleLogger::new().with_level(level).env().init() {
        eprintln!("{}: logger: {}", "warning".yellow(), e);
    }

    if let Err(e) = run(&cli) {
        eprintln!("{}: {:#}", "error".red(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut asm = Assembler::new(&cli.modules)?;

    if cli.list {
        print_listing(&asm);
        return Ok(());
    }

    let Some(ref path) = cli.program else {
        bail!("nothing to do: pass --program <FILE> or --list");
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read program '{}'", path.display()))?;
    let script = Script::parse(&text)?;
    let program = script.compile(&mut asm)?;
    let payload = asm.assemble(&program)?;

    match cli.output {
        Some(ref out) => std::fs::write(out, &payload)
            .with_context(|| format!("write payload '{}'", out.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&payload)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn print_listing(asm: &Assembler) {
    let listing = asm.listing();
    for (op, addrs) in &listing {
        let shown: Vec<String> = addrs
            .iter()
            .take(5)
            .map(|a| format!("0x{:08x}", a))
            .collect();
        let more = if addrs.len() > 5 {
            format!(" (+{} more)", addrs.len() - 5)
        } else {
            String::new()
        };
        println!(
            "{:<16} {}{}",
            op.to_string().bold(),
            shown.join(" ").cyan(),
            more.dimmed()
        );
    }
    println!("{} distinct instructions", listing.len().to_string().green());
}
