//! Predict command.
//!
//! Loads a saved model, runs examples through it without updating weights,
//! and writes one prediction per example. With `--audit`, each prediction is
//! followed by the per-feature breakdown from the audit walk.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use cascade_checkpoint::load_model;
use cascade_core::iterate::{foreach_feature_named, IterationScope};
use cascade_core::Prediction;
use cascade_data::{ExamplePool, ExampleSource, TextParser, TextSource};

/// Predict with a saved model.
///
/// # Example
///
/// ```bash
/// cascade predict --initial-model model.bin --data test.txt \
///     --predictions preds.txt
/// ```
#[derive(Args, Debug, Clone)]
pub struct PredictCommand {
    /// Saved model to load
    #[arg(long, short = 'i')]
    pub initial_model: PathBuf,

    /// Input data file (text format)
    #[arg(long, short = 'd', env = "CASCADE_DATA")]
    pub data: PathBuf,

    /// Where to write predictions (stdout when omitted)
    #[arg(long, short = 'p')]
    pub predictions: Option<PathBuf>,

    /// Print the per-feature audit breakdown for every example
    #[arg(long)]
    pub audit: bool,

    /// Group input as multi-line example blocks separated by blank lines
    #[arg(long)]
    pub multiline: bool,
}

impl PredictCommand {
    pub fn run(&self) -> Result<()> {
        let mut stack = load_model(&self.initial_model)
            .with_context(|| format!("loading model {}", self.initial_model.display()))?;
        stack.workspace.opts.testonly = true;
        let audit = self.audit || stack.workspace.opts.audit;
        stack.workspace.opts.audit = audit;

        let mut out: Box<dyn Write> = match &self.predictions {
            Some(path) => Box::new(BufWriter::new(
                File::create(path)
                    .with_context(|| format!("creating predictions file {}", path.display()))?,
            )),
            None => Box::new(std::io::stdout().lock()),
        };

        let opts = &stack.workspace.opts;
        let parser = TextParser::new(opts.hash, opts.label_type(), opts.noconstant, audit);
        let reader = BufReader::new(
            File::open(&self.data)
                .with_context(|| format!("opening data file {}", self.data.display()))?,
        );
        let mut source = TextSource::new(reader, parser, self.multiline);
        let pool = ExamplePool::default();

        while let Some(group) = source.next_group(&pool)? {
            for mut ex in group {
                stack.top.predict(&mut stack.workspace, &mut ex);
                write_prediction(&mut out, &ex.pred, &ex.tag)?;
                if audit {
                    let scope =
                        IterationScope::new(&stack.workspace.interactions, stack.workspace.num_models);
                    foreach_feature_named(scope, &ex, |value, index, name| {
                        let _ = writeln!(out, "\t{name}:{index}:{value}");
                    });
                }
                stack.top.finish_example(&mut stack.workspace, &mut ex);
                pool.release(ex);
            }
        }
        out.flush()?;
        stack.workspace.progress.summarize();
        Ok(())
    }
}

fn write_prediction(out: &mut dyn Write, pred: &Prediction, tag: &[u8]) -> Result<()> {
    let tag_suffix = if tag.is_empty() {
        String::new()
    } else {
        format!(" {}", String::from_utf8_lossy(tag))
    };
    match pred {
        Prediction::Scalar(v) | Prediction::Prob(v) => writeln!(out, "{v}{tag_suffix}")?,
        Prediction::Multiclass(c) => writeln!(out, "{c}{tag_suffix}")?,
        Prediction::Multilabels(classes) => {
            let joined: Vec<String> = classes.iter().map(u32::to_string).collect();
            writeln!(out, "{}{tag_suffix}", joined.join(","))?;
        }
        Prediction::Scalars(values) => {
            let joined: Vec<String> = values.iter().map(f32::to_string).collect();
            writeln!(out, "{}{tag_suffix}", joined.join(" "))?;
        }
        Prediction::ActionScores(scores) => {
            let joined: Vec<String> = scores
                .iter()
                .map(|(action, score)| format!("{action}:{score}"))
                .collect();
            writeln!(out, "{}{tag_suffix}", joined.join(","))?;
        }
        Prediction::None => writeln!(out, "{tag_suffix}")?,
    }
    Ok(())
}
