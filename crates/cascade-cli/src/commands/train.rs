//! Train command.
//!
//! The driver loop: pull example groups from the parser, hand each example
//! to the top of the learner stack, finish it exactly once, return it to the
//! pool, and notify the stack at the end of every pass. Data-parallel runs
//! launch one full pipeline per thread over a disjoint shard of the input
//! and average weights at the all-reduce barrier after each pass.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use cascade_allreduce::{ClusterContext, ReduceOp};
use cascade_checkpoint::{load_model, save_model, write_text_model};
use cascade_core::hashing::HashFamily;
use cascade_core::LossFunction;
use cascade_data::{ExamplePool, ExampleSource, TextParser, TextSource};
use cascade_learner::{build_stack, Algorithm, BuiltStack, Link, StackOptions};

/// Train a model from text-format examples.
///
/// # Example
///
/// ```bash
/// cascade train --data train.txt --final-model model.bin \
///     --learning-rate 0.5 --bits 18 --interactions ab
/// ```
#[derive(Args, Debug, Clone)]
pub struct TrainCommand {
    /// Input data file (text format)
    #[arg(long, short = 'd', env = "CASCADE_DATA")]
    pub data: PathBuf,

    /// Where to save the trained model
    #[arg(long, short = 'f')]
    pub final_model: Option<PathBuf>,

    /// Where to save the human-readable model dump
    #[arg(long)]
    pub readable_model: Option<PathBuf>,

    /// Continue training from a saved model
    #[arg(long, short = 'i')]
    pub initial_model: Option<PathBuf>,

    /// Number of passes over the data
    #[arg(long, default_value = "1")]
    pub passes: u32,

    /// Number of data-parallel workers (dense weights only)
    #[arg(long, default_value = "1")]
    pub threads: usize,

    /// Base learning rate
    #[arg(long, short = 'l', default_value = "0.5")]
    pub learning_rate: f32,

    /// Learning-rate decay exponent (0 = constant rate)
    #[arg(long, default_value = "0.5")]
    pub power_t: f32,

    /// Decay schedule time offset
    #[arg(long, default_value = "1.0")]
    pub initial_t: f32,

    /// L1 regularization
    #[arg(long, default_value = "0.0")]
    pub l1: f32,

    /// L2 regularization
    #[arg(long, default_value = "0.0")]
    pub l2: f32,

    /// log2 of the weight table size
    #[arg(long, short = 'b', default_value = "18")]
    pub bits: u32,

    /// Use the sparse hash-map weight backing
    #[arg(long)]
    pub sparse_weights: bool,

    /// Constant initial weight
    #[arg(long, default_value = "0.0")]
    pub initial_weight: f32,

    /// Initialize weights uniformly at random
    #[arg(long)]
    pub random_weights: bool,

    /// Seed for random initialization and sketches
    #[arg(long, default_value = "0")]
    pub random_seed: u64,

    /// Hash every token by content instead of indexing numeric tokens
    #[arg(long)]
    pub hash_all: bool,

    /// Namespace interaction terms (repeatable), e.g. -q ab
    #[arg(long = "interactions", short = 'q')]
    pub interactions: Vec<String>,

    /// Loss function: squared | logistic | hinge | quantile
    #[arg(long, default_value = "squared")]
    pub loss_function: String,

    /// Quantile for the quantile loss
    #[arg(long, default_value = "0.5")]
    pub quantile_tau: f32,

    /// Link function: identity | logistic | glf1
    #[arg(long, default_value = "identity")]
    pub link: String,

    /// Use per-coordinate adaptive learning rates
    #[arg(long)]
    pub adaptive: bool,

    /// Normalize by per-feature scale
    #[arg(long)]
    pub normalized: bool,

    /// Use FTRL-proximal instead of gradient descent
    #[arg(long)]
    pub ftrl: bool,

    /// FTRL alpha
    #[arg(long, default_value = "0.1")]
    pub ftrl_alpha: f32,

    /// FTRL beta
    #[arg(long, default_value = "1.0")]
    pub ftrl_beta: f32,

    /// Use the Oja-sketch online Newton
    #[arg(long)]
    pub oja_newton: bool,

    /// Use the random-projection online Newton
    #[arg(long)]
    pub rp_newton: bool,

    /// Sketch size for the Newton variants
    #[arg(long, default_value = "10")]
    pub sketch: usize,

    /// Epoch buffer size for the random-projection Newton
    #[arg(long, default_value = "16")]
    pub epoch: usize,

    /// Re-orthogonalization threshold for the Oja Newton
    #[arg(long, default_value = "1e7")]
    pub oja_threshold: f32,

    /// Map scalar predictions to {-1, +1}
    #[arg(long)]
    pub binary: bool,

    /// One-against-all multiclass with this many classes
    #[arg(long)]
    pub oaa: Option<u32>,

    /// Cost-sensitive one-against-all with this many classes
    #[arg(long)]
    pub csoaa: Option<u32>,

    /// Do not add the constant feature
    #[arg(long)]
    pub noconstant: bool,

    /// Materialize audit names
    #[arg(long)]
    pub audit: bool,

    /// Predict only, never update weights
    #[arg(long)]
    pub testonly: bool,

    /// Hold out every k-th example from training
    #[arg(long, default_value = "0")]
    pub holdout_period: u32,

    /// Group input as multi-line example blocks separated by blank lines
    #[arg(long)]
    pub multiline: bool,
}

impl TrainCommand {
    /// Maps the CLI surface onto resolved stack options.
    pub fn stack_options(&self) -> Result<StackOptions> {
        let algorithm = match (self.ftrl, self.oja_newton, self.rp_newton) {
            (false, false, false) => Algorithm::Sgd {
                adaptive: self.adaptive,
                normalized: self.normalized,
            },
            (true, false, false) => Algorithm::Ftrl {
                alpha: self.ftrl_alpha,
                beta: self.ftrl_beta,
            },
            (false, true, false) => Algorithm::OjaNewton {
                sketch: self.sketch,
                threshold: self.oja_threshold,
            },
            (false, false, true) => Algorithm::RpNewton {
                sketch: self.sketch,
                epoch: self.epoch,
            },
            _ => bail!("--ftrl, --oja-newton and --rp-newton are mutually exclusive"),
        };
        let loss = match self.loss_function.as_str() {
            "squared" => LossFunction::Squared,
            "logistic" => LossFunction::Logistic,
            "hinge" => LossFunction::Hinge,
            "quantile" => LossFunction::Quantile {
                tau: self.quantile_tau,
            },
            other => bail!("unknown loss function: {other}"),
        };
        let link = match self.link.as_str() {
            "identity" => Link::Identity,
            "logistic" => Link::Logistic,
            "glf1" => Link::Glf1,
            other => bail!("unknown link function: {other}"),
        };
        Ok(StackOptions {
            algorithm,
            learning_rate: self.learning_rate,
            power_t: self.power_t,
            initial_t: self.initial_t,
            l1: self.l1,
            l2: self.l2,
            num_bits: self.bits,
            sparse_weights: self.sparse_weights,
            initial_weight: self.initial_weight,
            random_weights: self.random_weights,
            random_seed: self.random_seed,
            hash: if self.hash_all {
                HashFamily::AllBytes
            } else {
                HashFamily::Plain
            },
            interactions: self.interactions.clone(),
            loss,
            link,
            binary: self.binary,
            oaa: self.oaa,
            csoaa: self.csoaa,
            noconstant: self.noconstant,
            audit: self.audit,
            testonly: self.testonly,
            holdout_period: self.holdout_period,
            ..StackOptions::default()
        })
    }

    fn parser(&self, opts: &StackOptions) -> TextParser {
        TextParser::new(
            opts.hash,
            opts.label_type(),
            opts.noconstant,
            opts.audit,
        )
    }

    pub fn run(&self) -> Result<()> {
        if self.threads > 1 {
            return self.run_parallel();
        }
        let mut stack = match &self.initial_model {
            Some(path) => load_model(path)
                .with_context(|| format!("loading initial model {}", path.display()))?,
            None => build_stack(self.stack_options()?)?,
        };
        let opts = stack.workspace.opts.clone();

        for pass in 0..self.passes {
            let reader = BufReader::new(
                File::open(&self.data)
                    .with_context(|| format!("opening data file {}", self.data.display()))?,
            );
            run_pass(&mut stack, reader, self.parser(&opts), self.multiline)?;
            stack.workspace.passes += 1;
            info!(pass = pass + 1, "pass complete");
        }

        stack.workspace.progress.summarize();
        self.save(&mut stack)?;
        Ok(())
    }

    /// Data-parallel training: one pipeline per worker over a disjoint
    /// shard, weights averaged at the per-pass all-reduce barrier.
    fn run_parallel(&self) -> Result<()> {
        let opts = self.stack_options()?;
        if opts.sparse_weights {
            bail!("data-parallel training requires the dense weight backing");
        }
        if self.initial_model.is_some() {
            bail!("data-parallel training cannot resume from a model yet");
        }
        let contexts = ClusterContext::local_cluster(self.threads);
        let mut stacks: Vec<Option<BuiltStack>> = Vec::new();
        for _ in 0..self.threads {
            stacks.push(Some(build_stack(opts.clone())?));
        }

        let results: Vec<Result<BuiltStack>> = std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (rank, (ctx, stack)) in contexts.iter().zip(stacks.iter_mut()).enumerate() {
                let mut stack = stack.take().expect("stack present");
                let cmd = self.clone();
                let opts = opts.clone();
                let ctx = ctx.clone();
                handles.push(scope.spawn(move || -> Result<BuiltStack> {
                    for _ in 0..cmd.passes {
                        let reader = BufReader::new(File::open(&cmd.data)?);
                        let shard = ShardedLines::new(reader, rank, cmd.threads);
                        run_pass(&mut stack, shard, cmd.parser(&opts), cmd.multiline)?;
                        stack.workspace.passes += 1;
                        // Barrier: every worker's view is consistent only
                        // after this returns.
                        let data = stack
                            .workspace
                            .weights
                            .dense_data_mut()
                            .expect("dense backing checked at startup");
                        ctx.all_reduce(data, ReduceOp::Average)?;
                    }
                    Ok(stack)
                }));
            }
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut merged: Option<BuiltStack> = None;
        for result in results {
            let stack = result?;
            if merged.is_none() {
                merged = Some(stack);
            }
        }
        let mut stack = merged.expect("at least one worker");
        stack.workspace.progress.summarize();
        self.save(&mut stack)?;
        Ok(())
    }

    fn save(&self, stack: &mut BuiltStack) -> Result<()> {
        if let Some(path) = &self.final_model {
            save_model(path, stack)
                .with_context(|| format!("saving model to {}", path.display()))?;
        }
        if let Some(path) = &self.readable_model {
            write_text_model(path, stack)
                .with_context(|| format!("writing readable model to {}", path.display()))?;
        }
        Ok(())
    }
}

/// One pass of the driver loop over a reader.
fn run_pass<R: BufRead>(
    stack: &mut BuiltStack,
    reader: R,
    parser: TextParser,
    multiline: bool,
) -> Result<()> {
    let pool = ExamplePool::default();
    let mut source = TextSource::new(reader, parser, multiline);
    let holdout_period = stack.workspace.opts.holdout_period as u64;
    let testonly = stack.workspace.opts.testonly;
    while let Some(group) = source.next_group(&pool)? {
        for mut ex in group {
            if holdout_period > 0 && ex.example_number % holdout_period == 0 {
                ex.test_only = true;
            }
            if testonly || ex.is_test() {
                stack.top.predict(&mut stack.workspace, &mut ex);
            } else {
                stack.top.learn(&mut stack.workspace, &mut ex);
            }
            stack.top.finish_example(&mut stack.workspace, &mut ex);
            pool.release(ex);
        }
    }
    stack.top.end_pass(&mut stack.workspace);
    Ok(())
}

/// A reader view yielding only this worker's residue of the line space.
struct ShardedLines<R: BufRead> {
    inner: R,
    rank: usize,
    world: usize,
    line_no: usize,
}

impl<R: BufRead> ShardedLines<R> {
    fn new(inner: R, rank: usize, world: usize) -> Self {
        Self {
            inner,
            rank,
            world,
            line_no: 0,
        }
    }
}

impl<R: BufRead> std::io::Read for ShardedLines<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: BufRead> BufRead for ShardedLines<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }

    fn read_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
        loop {
            let n = self.inner.read_line(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mine = self.line_no % self.world == self.rank;
            self.line_no += 1;
            if mine {
                return Ok(n);
            }
            buf.clear();
        }
    }
}
