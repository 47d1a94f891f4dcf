use crate::common::*;

use bn_model::{BatchedData, BayesianNetwork, BayesianNetworkSampler, DataOnMemory};
use natural_param::Hyperparameters;
use svb::{ParallelVb, RoundSummary, StreamingVb, SvbOptions, Termination};

use clap::Parser;
use serde::Serialize;
use std::time::Instant;

#[derive(Parser, Debug, Clone)]
pub struct LearnArgs {
    /// parameterised Bayesian network in `.json` format, used both to
    /// sample the training records and as the model structure
    #[arg(long, short = 'n', required = true)]
    pub network: Box<str>,

    /// number of records (sequences for dynamic networks) to sample
    #[arg(long, default_value_t = 1000)]
    pub num_samples: usize,

    /// time steps per sequence of a dynamic network
    #[arg(long, default_value_t = 10)]
    pub sequence_length: usize,

    /// random seed for sampling and local initialisation
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// records per batch
    #[arg(long, short = 'b', default_value_t = 100)]
    pub batch_size: usize,

    /// where the batches of each round are processed
    #[arg(long, short = 'm', value_enum, default_value = "parallel")]
    pub mode: ModeArg,

    /// worker threads (default: number of logical cores)
    #[arg(long, short = 't')]
    pub threads: Option<usize>,

    /// number of partitions in distributed mode
    #[arg(long, default_value_t = 4)]
    pub partitions: usize,

    /// maximum number of global rounds
    #[arg(long, default_value_t = 10)]
    pub max_iter: usize,

    /// ELBO change below which learning stops
    #[arg(long, default_value_t = 0.01)]
    pub threshold: f64,

    /// Dirichlet prior count per state
    #[arg(long, default_value_t = 1.0)]
    pub alpha: f64,

    /// single pass of streaming variational Bayes instead of rounds
    #[arg(long, default_value_t = false)]
    pub streaming: bool,

    /// output file header
    #[arg(long, short, required = true)]
    pub out: Box<str>,

    /// verbosity
    #[arg(long, short)]
    pub verbose: bool,
}

/// What was run and how it went; written next to the learnt network.
#[derive(Debug, Clone, Serialize)]
pub struct LearnReport {
    pub network: Box<str>,
    pub num_records: usize,
    pub sample_seed: u64,
    pub streaming: bool,
    pub options: SvbOptions,
    /// ELBO of the learnt posterior, or the streaming log marginal estimate
    pub log_marginal: f64,
    pub rounds: Option<usize>,
    pub termination: Option<Termination>,
    pub trace: Vec<RoundSummary>,
    pub seconds: f64,
}

pub fn svb_options(args: &LearnArgs) -> SvbOptions {
    SvbOptions {
        batch_size: args.batch_size,
        max_global_iterations: args.max_iter,
        global_threshold: args.threshold,
        num_threads: args.threads.unwrap_or_else(num_cpus::get),
        mode: args.mode.execution_mode(args.partitions),
        seed: args.seed,
        show_progress: args.verbose,
        hyper: Hyperparameters {
            alpha: args.alpha,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn sample_records(truth: &BayesianNetwork, args: &LearnArgs) -> anyhow::Result<DataOnMemory> {
    let sampler = BayesianNetworkSampler::new(truth).with_seed(args.seed);
    if truth.dag().is_dynamic() {
        sampler.sample_sequences(args.num_samples, args.sequence_length)
    } else {
        sampler.sample(args.num_samples)
    }
}

/// Learn the parameters of `truth`'s structure from `data`.
pub fn learn_network(
    truth: &BayesianNetwork,
    data: &DataOnMemory,
    args: &LearnArgs,
) -> anyhow::Result<(BayesianNetwork, LearnReport)> {
    let options = svb_options(args);
    let dag = truth.dag().clone();
    let timer = Instant::now();

    let mut report = LearnReport {
        network: dag.name().into(),
        num_records: data.num_instances(),
        sample_seed: args.seed,
        streaming: args.streaming,
        options: options.clone(),
        log_marginal: f64::NEG_INFINITY,
        rounds: None,
        termination: None,
        trace: vec![],
        seconds: 0.0,
    };

    let learnt = if args.streaming {
        let mut vb = StreamingVb::new(dag, &options)?;
        report.log_marginal = vb.update_model_on_data(data, options.batch_size)?;
        vb.learnt_bayesian_network()?
    } else {
        let mut vb = ParallelVb::new(dag, options)?;
        let outcome = vb.run_learning(data)?;
        report.log_marginal = outcome.elbo;
        report.rounds = Some(outcome.rounds);
        report.termination = Some(outcome.termination);
        report.trace = outcome.trace.clone();
        outcome.network.clone()
    };

    report.seconds = timer.elapsed().as_secs_f64();
    Ok((learnt, report))
}

/// Sample records from a network, learn its parameters back and write
/// `{out}.learnt.json` and `{out}.parameters.json`
pub fn run_learn(args: LearnArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let truth = read_network(&args.network)?;
    info!("Sampling {} records from {}", args.num_samples, truth.dag().name());
    let data = sample_records(&truth, &args)?;

    info!("Learning the parameters...");
    let (learnt, report) = learn_network(&truth, &data, &args)?;
    info!(
        "log marginal {:.4} after {:.3}s",
        report.log_marginal, report.seconds
    );
    if report.termination == Some(Termination::MaxIterations) {
        warn!("stopped at the round budget of {}", args.max_iter);
    }

    write_json(&learnt, &format!("{}.learnt.json", args.out))?;
    write_json(&report, &format!("{}.parameters.json", args.out))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bn_model::DagBuilder;

    fn coin_network() -> anyhow::Result<BayesianNetwork> {
        let mut b = DagBuilder::new("coin");
        let a = b.multinomial("A", 2);
        let c = b.multinomial("B", 3);
        b.add_parent(c, a);
        let mut bn = BayesianNetwork::new(b.build()?);
        bn.set_probabilities(a, 0, &[0.3, 0.7])?;
        bn.set_probabilities(c, 0, &[0.6, 0.3, 0.1])?;
        bn.set_probabilities(c, 1, &[0.1, 0.2, 0.7])?;
        Ok(bn)
    }

    fn args(network: &str, out: &str) -> LearnArgs {
        LearnArgs::parse_from([
            "learn",
            "--network",
            network,
            "--num-samples",
            "5000",
            "--threads",
            "2",
            "--out",
            out,
        ])
    }

    #[test]
    fn learnt_network_is_written_and_close() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let net = dir.path().join("coin.json");
        let net = net.to_string_lossy();
        let out = dir.path().join("coin");
        let out = out.to_string_lossy();

        let truth = coin_network()?;
        write_json(&truth, &net)?;

        let args = args(&net, &out);
        assert_eq!(args.mode, ModeArg::Parallel);
        let truth = read_network(&args.network)?;
        let data = sample_records(&truth, &args)?;
        let (learnt, report) = learn_network(&truth, &data, &args)?;
        assert!(learnt.equal_bns(&truth, 0.05), "{}", learnt);
        assert_eq!(report.num_records, 5000);
        assert!(report.rounds.is_some());

        write_json(&learnt, &format!("{}.learnt.json", out))?;
        let back = read_network(&format!("{}.learnt.json", out))?;
        assert!(back.equal_bns(&learnt, 1e-12));
        Ok(())
    }

    #[test]
    fn streaming_matches_the_rounds_on_observed_data() -> anyhow::Result<()> {
        let truth = coin_network()?;
        let mut rounds = args("net.json", "out");
        rounds.mode = ModeArg::Sequential;
        rounds.num_samples = 300;
        let mut streaming = rounds.clone();
        streaming.streaming = true;

        let data = sample_records(&truth, &rounds)?;
        let (a, ra) = learn_network(&truth, &data, &rounds)?;
        let (b, rb) = learn_network(&truth, &data, &streaming)?;
        assert!(a.equal_bns(&b, 1e-8));
        approx::assert_abs_diff_eq!(ra.log_marginal, rb.log_marginal, epsilon = 1e-6);
        assert!(rb.rounds.is_none());
        Ok(())
    }

    #[test]
    fn options_follow_the_arguments() {
        let args = LearnArgs::parse_from([
            "learn", "-n", "x.json", "-o", "y", "--mode", "distributed", "--partitions", "3",
            "--max-iter", "5", "--alpha", "2.5",
        ]);
        let options = svb_options(&args);
        assert_eq!(
            options.mode,
            svb::ExecutionMode::Distributed { partitions: 3 }
        );
        assert_eq!(options.max_global_iterations, 5);
        assert_eq!(options.hyper.alpha, 2.5);
        assert!(options.num_threads > 0);
    }

    #[test]
    fn unreadable_network_is_an_error() {
        assert!(read_network("/nonexistent/network.json").is_err());
    }
}
