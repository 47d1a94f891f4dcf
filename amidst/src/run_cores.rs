use crate::common::*;
use crate::run_learn::{learn_network, sample_records, LearnArgs};

use clap::Parser;
use serde::Serialize;

#[derive(Parser, Debug, Clone)]
pub struct CoresArgs {
    /// parameterised Bayesian network in `.json` format
    #[arg(long, short = 'n', required = true)]
    network: Box<str>,

    /// number of records (sequences for dynamic networks) to sample
    #[arg(long, default_value_t = 10000)]
    num_samples: usize,

    /// time steps per sequence of a dynamic network
    #[arg(long, default_value_t = 10)]
    sequence_length: usize,

    /// random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// records per batch
    #[arg(long, short = 'b', default_value_t = 100)]
    batch_size: usize,

    /// parallel or distributed
    #[arg(long, short = 'm', value_enum, default_value = "parallel")]
    mode: ModeArg,

    /// number of partitions in distributed mode
    #[arg(long, default_value_t = 4)]
    partitions: usize,

    /// largest number of worker threads to try
    #[arg(long, short = 't')]
    max_threads: Option<usize>,

    /// repeated runs per worker count
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// maximum number of global rounds
    #[arg(long, default_value_t = 10)]
    max_iter: usize,

    /// ELBO change below which learning stops
    #[arg(long, default_value_t = 0.01)]
    threshold: f64,

    /// output file header; the table goes to stdout without it
    #[arg(long, short)]
    out: Option<Box<str>>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoresRow {
    pub threads: usize,
    /// mean wall-clock seconds over the repeated runs
    pub seconds: f64,
    pub log_marginal: f64,
    pub rounds: usize,
}

impl CoresArgs {
    fn learn_args(&self, threads: usize) -> LearnArgs {
        LearnArgs {
            network: self.network.clone(),
            num_samples: self.num_samples,
            sequence_length: self.sequence_length,
            seed: self.seed,
            batch_size: self.batch_size,
            mode: self.mode,
            threads: Some(threads),
            partitions: self.partitions,
            max_iter: self.max_iter,
            threshold: self.threshold,
            alpha: 1.0,
            streaming: false,
            out: self.out.clone().unwrap_or_default(),
            verbose: false,
        }
    }
}

/// Learn the same sample with 1, 2, ... worker threads and report the
/// running times
pub fn compare_cores(args: &CoresArgs) -> anyhow::Result<Vec<CoresRow>> {
    if args.repeat == 0 {
        anyhow::bail!("at least one run per worker count is required");
    }
    if args.mode == ModeArg::Sequential {
        warn!("sequential mode ignores the number of worker threads");
    }

    let truth = read_network(&args.network)?;
    let data = sample_records(&truth, &args.learn_args(1))?;
    let max_threads = args.max_threads.unwrap_or_else(num_cpus::get).max(1);

    let mut rows = Vec::with_capacity(max_threads);
    for threads in 1..=max_threads {
        let learn_args = args.learn_args(threads);
        let mut seconds = 0.0;
        let mut last = None;
        for _ in 0..args.repeat {
            let (_, report) = learn_network(&truth, &data, &learn_args)?;
            seconds += report.seconds;
            last = Some(report);
        }
        let Some(report) = last else {
            continue;
        };
        let row = CoresRow {
            threads,
            seconds: seconds / args.repeat as f64,
            log_marginal: report.log_marginal,
            rounds: report.rounds.unwrap_or(0),
        };
        info!(
            "{} threads: {:.3}s, {} rounds",
            row.threads, row.seconds, row.rounds
        );
        rows.push(row);
    }
    Ok(rows)
}

fn format_table(rows: &[CoresRow]) -> String {
    let mut table = String::from("threads\tseconds\tlog_marginal\trounds\n");
    for r in rows {
        table.push_str(&format!(
            "{}\t{:.6}\t{:.6}\t{}\n",
            r.threads, r.seconds, r.log_marginal, r.rounds
        ));
    }
    table
}

/// Time learning across worker counts
pub fn run_cores(args: CoresArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let rows = compare_cores(&args)?;
    let table = format_table(&rows);

    match &args.out {
        Some(out) => {
            let file = format!("{}.cores.tsv", out);
            std::fs::write(&file, table)
                .map_err(|e| anyhow::anyhow!("failed to write {}: {}", file, e))?;
            write_json(&rows, &format!("{}.cores.json", out))?;
            info!("wrote {}", file);
        }
        None => print!("{}", table),
    }
    Ok(())
}
