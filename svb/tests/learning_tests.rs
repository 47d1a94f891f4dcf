use approx::assert_abs_diff_eq;
use bn_model::{BayesianNetwork, BayesianNetworkSampler, DagBuilder};
use natural_param::{CompoundVector, ParamBlock};
use svb::{ExecutionMode, LearningState, ParallelVb, StreamingVb, SvbOptions, Termination};

fn parent_child_network() -> anyhow::Result<BayesianNetwork> {
    let mut b = DagBuilder::new("parent_child");
    let a = b.multinomial("A", 2);
    let c = b.multinomial("B", 2);
    b.add_parent(c, a);
    let mut bn = BayesianNetwork::new(b.build()?);
    bn.set_probabilities(a, 0, &[0.6, 0.4])?;
    bn.set_probabilities(c, 0, &[0.75, 0.25])?;
    bn.set_probabilities(c, 1, &[0.25, 0.75])?;
    Ok(bn)
}

fn options(mode: ExecutionMode) -> SvbOptions {
    SvbOptions {
        mode,
        num_threads: 2,
        ..Default::default()
    }
}

#[test]
fn discrete_parent_child_recovers_parameters() -> anyhow::Result<()> {
    let truth = parent_child_network()?;
    let data = BayesianNetworkSampler::new(&truth).with_seed(0).sample(1000)?;

    let mut vb = ParallelVb::new(truth.dag().clone(), options(ExecutionMode::ThreadPool))?;
    let outcome = vb.run_learning(&data)?;

    assert_eq!(outcome.termination, Termination::Converged);
    assert!(outcome.network.equal_bns(&truth, 0.05), "{}", outcome.network);
    assert!(matches!(vb.state(), LearningState::Converged { .. }));
    assert!(vb.log_marginal_probability().is_some_and(|x| x < 0.0));
    Ok(())
}

#[test]
fn gaussian_recovers_mean_and_variance() -> anyhow::Result<()> {
    let mut b = DagBuilder::new("gaussian");
    let x = b.gaussian("X");
    let mut truth = BayesianNetwork::new(b.build()?);
    truth.set_normal(x, 0, 1.0, 0.1)?;
    let data = BayesianNetworkSampler::new(&truth).with_seed(5).sample(1000)?;

    let mut vb = ParallelVb::new(truth.dag().clone(), options(ExecutionMode::Sequential))?;
    let outcome = vb.run_learning(&data)?;

    let learnt = outcome.network.normal(x, 0).unwrap();
    assert_abs_diff_eq!(learnt.mean, 1.0, epsilon = 0.05);
    assert_abs_diff_eq!(learnt.variance, 0.1, epsilon = 0.05);
    Ok(())
}

#[test]
fn batch_larger_than_stream_is_one_batch() -> anyhow::Result<()> {
    let truth = parent_child_network()?;
    let data = BayesianNetworkSampler::new(&truth).sample(30)?;

    let opts = SvbOptions {
        batch_size: 500,
        ..options(ExecutionMode::ThreadPool)
    };
    let mut vb = ParallelVb::new(truth.dag().clone(), opts)?;
    let outcome = vb.run_learning(&data)?;
    assert!(outcome.trace.iter().all(|r| r.num_batches == 1));
    assert_eq!(outcome.termination, Termination::Converged);
    Ok(())
}

#[test]
fn rounds_agree_with_streaming_on_observed_data() -> anyhow::Result<()> {
    let mut b = DagBuilder::new("hybrid");
    let a = b.multinomial("A", 3);
    let x = b.gaussian("X");
    b.add_parent(x, a);
    let mut truth = BayesianNetwork::new(b.build()?);
    truth.set_probabilities(a, 0, &[0.2, 0.3, 0.5])?;
    truth.set_normal(x, 0, -1.0, 0.5)?;
    truth.set_normal(x, 1, 0.0, 1.0)?;
    truth.set_normal(x, 2, 2.0, 0.25)?;
    let data = BayesianNetworkSampler::new(&truth).with_seed(9).sample(700)?;

    let opts = SvbOptions {
        batch_size: 64,
        ..options(ExecutionMode::Distributed { partitions: 3 })
    };
    let mut vb = ParallelVb::new(truth.dag().clone(), opts.clone())?;
    let outcome = vb.run_learning(&data)?.clone();

    let mut streaming = StreamingVb::new(truth.dag().clone(), &opts)?;
    let log_marginal = streaming.update_model_on_data(&data, 64)?;
    assert_eq!(streaming.num_batches_seen(), 11);

    assert_abs_diff_eq!(outcome.elbo, log_marginal, epsilon = 1e-6);
    assert!(outcome.posterior.max_abs_diff(streaming.posterior())? < 1e-8);
    assert!(streaming.learnt_bayesian_network()?.equal_bns(&outcome.network, 1e-8));
    Ok(())
}

#[test]
fn dynamic_chain_learns_transitions() -> anyhow::Result<()> {
    let mut b = DagBuilder::dynamic("chain");
    let a = b.multinomial("A", 2);
    b.add_temporal_parent(a, a);
    let mut truth = BayesianNetwork::new(b.build()?);
    truth.set_probabilities(a, 0, &[0.9, 0.1])?;
    truth.set_probabilities(a, 1, &[0.2, 0.8])?;

    let data = BayesianNetworkSampler::new(&truth)
        .with_seed(3)
        .sample_sequences(50, 40)?;

    let mut vb = ParallelVb::new(truth.dag().clone(), options(ExecutionMode::ThreadPool))?;
    let outcome = vb.run_learning(&data)?;
    assert!(outcome.network.equal_bns(&truth, 0.05), "{}", outcome.network);
    Ok(())
}

/// component means of `x`, smallest first
fn sorted_means(bn: &BayesianNetwork, x: usize, configs: usize) -> Vec<f64> {
    let mut means: Vec<f64> = (0..configs)
        .filter_map(|c| bn.normal(x, c).map(|m| m.mean))
        .collect();
    means.sort_by(|a, b| a.total_cmp(b));
    means
}

#[test]
fn latent_mixture_recovers_components() -> anyhow::Result<()> {
    let mut b = DagBuilder::new("mixture");
    let h = b.latent_multinomial("H", 2);
    let x = b.gaussian("X");
    b.add_parent(x, h);
    let mut truth = BayesianNetwork::new(b.build()?);
    truth.set_normal(x, 0, -3.0, 1.0)?;
    truth.set_normal(x, 1, 3.0, 1.0)?;
    let data = BayesianNetworkSampler::new(&truth).with_seed(4).sample(1000)?;

    let mut vb = ParallelVb::new(truth.dag().clone(), options(ExecutionMode::ThreadPool))?;
    let outcome = vb.run_learning(&data)?;
    assert_eq!(outcome.termination, Termination::Converged);
    assert!(outcome.posterior.is_proper());

    // up to a swap of the labels
    let means = sorted_means(&outcome.network, x, 2);
    assert_abs_diff_eq!(means[0], -3.0, epsilon = 0.3);
    assert_abs_diff_eq!(means[1], 3.0, epsilon = 0.3);
    let weights = outcome.network.probabilities(h, 0).unwrap();
    assert_abs_diff_eq!(weights[0], 0.5, epsilon = 0.1);
    for c in 0..2 {
        let m = outcome.network.normal(x, c).unwrap();
        assert_abs_diff_eq!(m.variance, 1.0, epsilon = 0.3);
    }

    let posteriors = vb.posterior_over_latent_variables(&data, &[h])?;
    assert_eq!(posteriors.len(), 1000);
    for p in posteriors.iter() {
        let (var, q) = &p.posteriors[0];
        assert_eq!(*var, h);
        assert_abs_diff_eq!(q.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }
    assert!(vb.posterior_over_latent_variables(&data, &[x]).is_err());
    Ok(())
}

#[test]
fn latent_chain_separates_its_emissions() -> anyhow::Result<()> {
    let mut b = DagBuilder::dynamic("hmm");
    let h = b.latent_multinomial("H", 2);
    let x = b.gaussian("X");
    b.add_temporal_parent(h, h).add_parent(x, h);
    let mut truth = BayesianNetwork::new(b.build()?);
    truth.set_probabilities(h, 0, &[0.9, 0.1])?;
    truth.set_probabilities(h, 1, &[0.2, 0.8])?;
    truth.set_normal(x, 0, -2.0, 1.0)?;
    truth.set_normal(x, 1, 2.0, 1.0)?;
    let data = BayesianNetworkSampler::new(&truth)
        .with_seed(8)
        .sample_sequences(30, 30)?;

    let opts = SvbOptions {
        max_global_iterations: 30,
        ..options(ExecutionMode::ThreadPool)
    };
    let mut vb = ParallelVb::new(truth.dag().clone(), opts)?;
    let outcome = vb.run_learning(&data)?;

    let means = sorted_means(&outcome.network, x, 2);
    assert_abs_diff_eq!(means[0], -2.0, epsilon = 0.3);
    assert_abs_diff_eq!(means[1], 2.0, epsilon = 0.3);
    Ok(())
}

#[test]
fn random_asia_network_is_recovered() -> anyhow::Result<()> {
    let mut b = DagBuilder::new("asia");
    let asia = b.multinomial("VisitAsia", 2);
    let smoke = b.multinomial("Smoker", 2);
    let tub = b.multinomial("Tuberculosis", 2);
    let lung = b.multinomial("LungCancer", 2);
    let bronc = b.multinomial("Bronchitis", 2);
    let either = b.multinomial("TbOrCancer", 2);
    let xray = b.multinomial("XRay", 2);
    let dysp = b.multinomial("Dyspnea", 2);
    b.add_parent(tub, asia)
        .add_parent(lung, smoke)
        .add_parent(bronc, smoke)
        .add_parent(either, tub)
        .add_parent(either, lung)
        .add_parent(xray, either)
        .add_parent(dysp, either)
        .add_parent(dysp, bronc);
    let mut truth = BayesianNetwork::new(b.build()?);
    truth.random_initialization(0);
    let data = BayesianNetworkSampler::new(&truth).with_seed(0).sample(50000)?;

    let opts = SvbOptions {
        batch_size: 1000,
        ..options(ExecutionMode::ThreadPool)
    };
    let mut vb = ParallelVb::new(truth.dag().clone(), opts.clone())?;
    let outcome = vb.run_learning(&data)?;
    assert_eq!(outcome.termination, Termination::Converged);

    // every row within 0.05, or four standard errors for rarely seen
    // parent configurations
    for v in 0..truth.dag().num_variables() {
        let ParamBlock::Multinomial(rows) = outcome.posterior.block(v) else {
            panic!("every Asia variable is binary");
        };
        for (c, row) in rows.iter().enumerate() {
            let records = row.total() - 2.0 * opts.hyper.alpha;
            let tol = (4.0 * (0.25 / records.max(1.0)).sqrt()).max(0.05);
            let learnt = outcome.network.probabilities(v, c).unwrap();
            let expected = truth.probabilities(v, c).unwrap();
            for (p, q) in learnt.iter().zip(expected) {
                assert!(
                    (p - q).abs() <= tol,
                    "{} row {}: {:?} vs {:?}",
                    truth.dag().variable(v).name,
                    c,
                    learnt,
                    expected
                );
            }
        }
    }
    Ok(())
}

#[test]
fn previously_learnt_parameters_as_prior() -> anyhow::Result<()> {
    let truth = parent_child_network()?;
    let data = BayesianNetworkSampler::new(&truth).with_seed(2).sample(200)?;

    let opts = options(ExecutionMode::Sequential);
    let prior = CompoundVector::from_network(&truth, 1000.0, &opts.hyper)?;
    let mut vb = ParallelVb::new(truth.dag().clone(), opts)?.with_prior(prior)?;
    let outcome = vb.run_learning(&data)?;
    assert!(outcome.network.equal_bns(&truth, 0.05));
    Ok(())
}
