//! Command-line stress and scenario runner for `insmalloc`.

use clap::{Parser, Subcommand};
use insmalloc_harness::constants::{DEFAULT_OPS_PER_THREAD, DEFAULT_THREADS, MAX_LIVE_PER_THREAD};
use insmalloc_harness::{scenarios, stress};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stress-test and scenario harness for insmalloc", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the multithreaded malloc/free stress workload.
    Stress {
        /// Worker thread count.
        #[arg(short, long, default_value_t = DEFAULT_THREADS)]
        threads: usize,
        /// Malloc attempts issued per worker thread.
        #[arg(short, long, default_value_t = DEFAULT_OPS_PER_THREAD)]
        ops: usize,
        /// Maximum objects a worker keeps outstanding at once.
        #[arg(long, default_value_t = MAX_LIVE_PER_THREAD)]
        max_live: usize,
    },
    /// Run the fixed correctness scenarios (S1-S5) and report pass/fail.
    Scenarios,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Stress { threads, ops, max_live } => {
            let config = stress::StressConfig {
                threads,
                ops_per_thread: ops,
                max_live_per_thread: max_live,
            };
            let summary = stress::run(config);
            stress::print_report(&config, &summary);
        }
        Command::Scenarios => {
            let results = scenarios::run_all();
            let mut failures = 0;
            for (name, result) in &results {
                match result {
                    Ok(()) => println!("{name}: PASS"),
                    Err(message) => {
                        println!("{name}: FAIL - {message}");
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} scenario(s) failed");
            }
        }
    }

    Ok(())
}
