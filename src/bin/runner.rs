//! `vtc` -- the command-line driver for the scripted conformance harness.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use vtc::runner::{self, Outcome, Verdict};

/// Run one or more `.vtc` scripts and report pass/fail/skip verdicts.
#[derive(Parser, Debug)]
#[command(name = "vtc", version, about, long_about = None)]
struct Cli {
    /// Stream every logged line to stdout as it happens, not just on failure.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Suppress the one-line-per-file summary; only print final verdicts.
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Leave each test's temp directory on disk instead of deleting it.
    #[arg(short = 'k', long)]
    keep_tmp: bool,

    /// Number of files to run concurrently.
    #[arg(short = 'j', long, default_value_t = num_cpus::get())]
    jobs: usize,

    /// Per-file wall-clock timeout, in seconds.
    #[arg(short = 't', long, default_value_t = 30)]
    timeout: u64,

    /// Parse each file and print its AST instead of running it.
    #[arg(long)]
    dump_ast: bool,

    /// The `.vtc` files to run.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.dump_ast {
        for path in &cli.files {
            match std::fs::read_to_string(path).and_then(|src| {
                vtc::ast::parse(&src).map_err(std::io::Error::other)
            }) {
                Ok(root) => println!("{}:\n{:#?}", path.display(), root),
                Err(e) => eprintln!("{}: {}", path.display(), e),
            }
        }
        return;
    }

    let deadline = Duration::from_secs(cli.timeout);
    let jobs = cli.jobs.max(1);
    let verbose = cli.verbose;
    let keep_tmp = cli.keep_tmp;

    let mut verdicts: Vec<Verdict> = Vec::with_capacity(cli.files.len());
    let mut pending = cli.files.into_iter();
    let mut in_flight = tokio::task::JoinSet::new();

    for path in pending.by_ref().take(jobs) {
        in_flight.spawn(async move { runner::run_file(&path, verbose, deadline, keep_tmp).await });
    }

    while let Some(result) = in_flight.join_next().await {
        if let Ok(verdict) = result {
            if !cli.quiet {
                print_verdict(&verdict);
            }
            verdicts.push(verdict);
        }
        if let Some(path) = pending.next() {
            in_flight.spawn(async move { runner::run_file(&path, verbose, deadline, keep_tmp).await });
        }
    }

    let worst = verdicts
        .iter()
        .map(|v| v.outcome)
        .max_by_key(|o| o.severity())
        .unwrap_or(Outcome::Pass);

    if !cli.quiet {
        let pass = verdicts.iter().filter(|v| v.outcome == Outcome::Pass).count();
        let fail = verdicts.iter().filter(|v| v.outcome == Outcome::Fail).count();
        let skip = verdicts.iter().filter(|v| v.outcome == Outcome::Skip).count();
        let error = verdicts.iter().filter(|v| v.outcome == Outcome::Error).count();
        println!(
            "\n{} run, {} passed, {} failed, {} skipped, {} errored",
            verdicts.len(),
            pass,
            fail,
            skip,
            error
        );
    }

    std::process::exit(worst.exit_code());
}

fn print_verdict(v: &Verdict) {
    let label = match v.outcome {
        Outcome::Pass => "PASS ",
        Outcome::Fail => "FAIL ",
        Outcome::Skip => "SKIP ",
        Outcome::Error => "ERROR",
    };
    let desc = v.description.as_deref().unwrap_or("");
    println!("{} {} {}", label, v.path.display(), desc);
    if let Some(msg) = &v.message {
        println!("      {}", msg);
    }
    if v.outcome == Outcome::Fail || v.outcome == Outcome::Error {
        for entry in &v.log {
            println!("      {}", entry);
        }
    }
}
