use std::{path::PathBuf, process::ExitCode, time::Instant};

use clap::Parser;
use tomasulo::{error::Result, load_scenario};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tomasulo",
    version,
    about = "Cycle-accurate Tomasulo scheduling simulator"
)]
struct Cli {
    /// Scenario file (sectioned text, or JSON with a .json extension).
    scenario: PathBuf,

    /// Print the machine state after every cycle.
    #[arg(long)]
    trace: bool,

    /// Print the schedule as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let start = Instant::now();

    let scenario = load_scenario(&cli.scenario)?;
    let mut scheduler = scenario.build()?;
    scheduler.set_trace(cli.trace);
    let schedule = scheduler.run()?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&schedule)?);
        return Ok(());
    }

    for cycle in schedule.trace.iter().flatten() {
        println!("{cycle}");
    }

    println!("SCHEDULE:");
    print!("{schedule}");
    println!();
    println!("    SIMULATION COMPLETED");
    println!("    =====================");
    println!("    Instructions committed: {}", schedule.rows.len());
    println!("              Cycles taken: {}", schedule.cycles_taken);
    println!("    Instructions per clock: {:.2}", schedule.ipc());
    println!(
        "    Simulator time elapsed: {:.2}s",
        start.elapsed().as_secs_f32()
    );

    Ok(())
}
