//! Driver and benchmarks for the nested-dissection LQR solver.
//!
//! # Usage
//! ```bash
//! # Solve a problem stored as JSON
//! ndlqr-bench solve --file problem.json --threads 4
//!
//! # Random problem, compared against the Riccati recursion
//! ndlqr-bench random --nhorizon 256 --nstates 12 --ninputs 6
//!
//! # Thread-count sweep
//! ndlqr-bench scaling --nhorizon 512 --max-threads 16
//! ```

mod solver_choice;
mod test_problems;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ndlqr_core::{settings::default_num_threads, LqrProblem, RiccatiSolver};
use solver_choice::{solve_with_choice, BackendChoice, NdRun};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "ndlqr-bench")]
#[command(about = "Parallel nested-dissection LQR solver driver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a problem loaded from a JSON file
    Solve {
        /// Path to the problem file
        #[arg(long)]
        file: PathBuf,

        /// Worker threads (defaults to half the logical cores)
        #[arg(long)]
        threads: Option<usize>,

        /// Dense backend
        #[arg(long, value_enum, default_value = "nalgebra")]
        backend: BackendChoice,

        /// Print the full solution vector
        #[arg(long)]
        print_solution: bool,
    },

    /// Solve a random problem and compare against the Riccati recursion
    Random {
        #[arg(long, default_value = "64")]
        nhorizon: usize,

        #[arg(long, default_value = "8")]
        nstates: usize,

        #[arg(long, default_value = "4")]
        ninputs: usize,

        #[arg(long, default_value = "12345")]
        seed: u64,

        #[arg(long)]
        threads: Option<usize>,

        #[arg(long, value_enum, default_value = "nalgebra")]
        backend: BackendChoice,

        /// Number of timed solves (the fastest is reported)
        #[arg(long, default_value = "5")]
        repeat: usize,
    },

    /// Sweep the worker count on a double-integrator problem
    Scaling {
        #[arg(long, default_value = "256")]
        nhorizon: usize,

        /// Number of axes (states = 2 * axes, inputs = axes)
        #[arg(long, default_value = "3")]
        axes: usize,

        #[arg(long, default_value = "16")]
        max_threads: usize,

        #[arg(long, value_enum, default_value = "nalgebra")]
        backend: BackendChoice,

        #[arg(long, default_value = "5")]
        repeat: usize,
    },
}

fn compare_with_riccati(prob: &LqrProblem, run: &NdRun) -> Result<()> {
    let mut riccati = RiccatiSolver::new(prob)?;
    let start = Instant::now();
    riccati.solve().context("riccati solve failed")?;
    let riccati_time = start.elapsed();

    let diff = run
        .solution
        .iter()
        .zip(riccati.solution())
        .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));

    println!("{:<24} {:>12.3} ms", "Riccati (1 thread)", riccati_time.as_secs_f64() * 1e3);
    println!("{:<24} {:>12.3} ms", "Nested dissection", run.profile.total.as_secs_f64() * 1e3);
    println!("{:<24} {:>12.3e}", "Max diff vs Riccati", diff);
    println!("{:<24} {:>12.3e}", "KKT residual", prob.kkt_residual(&run.solution)?);
    println!("{:<24} {:>12.6}", "Objective", prob.objective(&run.solution)?);
    Ok(())
}

fn print_header(title: &str, prob: &LqrProblem) {
    println!("{}", title);
    println!("{}", "=".repeat(60));
    println!(
        "nstates = {}, ninputs = {}, nhorizon = {}, nvars = {}\n",
        prob.nstates(),
        prob.ninputs(),
        prob.nhorizon,
        prob.nvars()
    );
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Solve { file, threads, backend, print_solution } => {
            let prob = LqrProblem::from_json_file(&file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            print_header(&format!("Solving {}", file.display()), &prob);

            let threads = threads.unwrap_or_else(default_num_threads);
            let run = solve_with_choice(&prob, backend, threads, 1)?;
            println!("{}", run.profile);
            compare_with_riccati(&prob, &run)?;
            if print_solution {
                println!("\nsolution = {:?}", run.solution);
            }
        }
        Commands::Random { nhorizon, nstates, ninputs, seed, threads, backend, repeat } => {
            let prob = test_problems::random_lqr(nstates, ninputs, nhorizon, seed)?;
            print_header("Random LQR problem", &prob);

            let threads = threads.unwrap_or_else(default_num_threads);
            let run = solve_with_choice(&prob, backend, threads, repeat)?;
            println!("{}", run.profile);
            compare_with_riccati(&prob, &run)?;
        }
        Commands::Scaling { nhorizon, axes, max_threads, backend, repeat } => {
            let prob = test_problems::double_integrator(axes, nhorizon, 0.1)?;
            print_header("Thread scaling (double integrator)", &prob);

            let baseline = solve_with_choice(&prob, backend, 1, repeat)?;
            println!("{:>8} {:>12} {:>10} {:>12}", "threads", "total (ms)", "speedup", "max diff");
            let mut threads = 1;
            let mut last = None;
            while threads <= max_threads.max(1) {
                let run = solve_with_choice(&prob, backend, threads, repeat)?;
                let diff = run
                    .solution
                    .iter()
                    .zip(&baseline.solution)
                    .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));
                let total = run.profile.total.as_secs_f64();
                println!(
                    "{:>8} {:>12.3} {:>10.2} {:>12.3e}",
                    threads,
                    total * 1e3,
                    baseline.profile.total.as_secs_f64() / total,
                    diff
                );
                if diff > 1e-10 {
                    log::warn!("{} threads differ from the serial solve by {:.3e}", threads, diff);
                }
                last = Some(run);
                threads *= 2;
            }
            if let Some(run) = last {
                println!("\n{}", run.profile.compare(&baseline.profile));
            }
        }
    }
    Ok(())
}
