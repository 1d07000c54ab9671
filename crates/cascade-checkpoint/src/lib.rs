//! Model persistence.
//!
//! A model file is a versioned stream: a fixed magic and format version, a
//! header carrying every option that affects model compatibility (the full
//! resolved [`StackOptions`]), the runtime counters, each active node's
//! `save_load` payload written in chain order (outermost first), and finally
//! the weight dump under the header's declared backing.
//!
//! Round-trip contract: saving and then loading into a freshly constructed
//! stack reproduces identical addressable weight values, and therefore
//! identical subsequent predictions. The JSON text dump exists for human
//! inspection only and does not round-trip at full precision.
//!
//! Files whose path ends in `.gz` are transparently gzip-compressed.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use cascade_core::io::StateIo;
use cascade_core::weights::WeightState;
use cascade_core::WeightStore;
use cascade_learner::{build_stack, BuiltStack, StackOptions};

/// Leading bytes of every Cascade model file.
pub const MODEL_MAGIC: &[u8; 4] = b"CSCD";

/// Current model format version.
pub const FORMAT_VERSION: u32 = 1;

/// Errors for model save/load.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("not a cascade model file (bad magic)")]
    BadMagic,

    #[error("unsupported model format version {found}, this build reads {FORMAT_VERSION}")]
    VersionMismatch { found: u32 },

    #[error("model encode/decode failed: {message}")]
    Codec { message: String },

    #[error(transparent)]
    Core(#[from] cascade_core::CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

impl From<bincode::Error> for CheckpointError {
    fn from(err: bincode::Error) -> Self {
        CheckpointError::Codec {
            message: err.to_string(),
        }
    }
}

/// Everything that affects model compatibility, recorded up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHeader {
    pub format_version: u32,
    pub options: StackOptions,
}

/// Runtime counters that continue across save/load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RuntimeState {
    t: f32,
    passes: u32,
    examples: u64,
    weighted_examples: f64,
    sum_loss: f64,
}

fn open_writer(path: &Path) -> Result<Box<dyn Write>> {
    let file = BufWriter::new(File::create(path)?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Box::new(file))
    }
}

fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Saves a trained stack to `path`.
pub fn save_model(path: &Path, stack: &mut BuiltStack) -> Result<()> {
    let mut writer = open_writer(path)?;
    writer.write_all(MODEL_MAGIC)?;
    let header = ModelHeader {
        format_version: FORMAT_VERSION,
        options: stack.workspace.opts.clone(),
    };
    bincode::serialize_into(&mut writer, &header)?;
    let runtime = RuntimeState {
        t: stack.workspace.t,
        passes: stack.workspace.passes,
        examples: stack.workspace.progress.examples,
        weighted_examples: stack.workspace.progress.weighted_examples,
        sum_loss: stack.workspace.progress.sum_loss,
    };
    bincode::serialize_into(&mut writer, &runtime)?;
    {
        let mut io = StateIo::writer(&mut writer);
        stack.top.save_load(&mut io)?;
    }
    let weights = stack.workspace.weights.to_state();
    bincode::serialize_into(&mut writer, &weights)?;
    writer.flush()?;
    info!(path = %path.display(), "model saved");
    Ok(())
}

/// Loads a model from `path`, reconstructing the identically configured
/// stack recorded in its header.
pub fn load_model(path: &Path) -> Result<BuiltStack> {
    let mut reader = open_reader(path)?;
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MODEL_MAGIC {
        return Err(CheckpointError::BadMagic);
    }
    let header: ModelHeader = bincode::deserialize_from(&mut reader)?;
    if header.format_version != FORMAT_VERSION {
        return Err(CheckpointError::VersionMismatch {
            found: header.format_version,
        });
    }
    let mut stack = build_stack(header.options)?;
    let runtime: RuntimeState = bincode::deserialize_from(&mut reader)?;
    stack.workspace.t = runtime.t;
    stack.workspace.passes = runtime.passes;
    stack.workspace.progress.examples = runtime.examples;
    stack.workspace.progress.weighted_examples = runtime.weighted_examples;
    stack.workspace.progress.sum_loss = runtime.sum_loss;
    {
        let mut io = StateIo::reader(&mut reader);
        stack.top.save_load(&mut io)?;
    }
    let weights: WeightState = bincode::deserialize_from(&mut reader)?;
    stack.workspace.weights = WeightStore::from_state(weights);
    info!(path = %path.display(), "model loaded");
    Ok(stack)
}

/// Writes the human-readable text dump: the header as JSON, the chain
/// payload as `name = value` lines, and the nonzero weight rows.
pub fn write_text_model(path: &Path, stack: &mut BuiltStack) -> Result<()> {
    let mut writer = open_writer(path)?;
    let header = ModelHeader {
        format_version: FORMAT_VERSION,
        options: stack.workspace.opts.clone(),
    };
    let json = serde_json::to_string_pretty(&header).map_err(|e| CheckpointError::Codec {
        message: e.to_string(),
    })?;
    writeln!(writer, "{json}")?;
    {
        let mut io = StateIo::text_writer(&mut writer);
        stack.top.save_load(&mut io)?;
    }
    let state = stack.workspace.weights.to_state();
    let stride = 1usize << state.config.stride_shift;
    match (&state.dense, &state.sparse) {
        (Some(data), _) => {
            for (row, chunk) in data.chunks_exact(stride).enumerate() {
                if chunk.iter().any(|&v| v != 0.0) {
                    writeln!(writer, "{row}: {chunk:?}")?;
                }
            }
        }
        (None, Some(rows)) => {
            for (index, row) in rows {
                writeln!(writer, "{index}: {row:?}")?;
            }
        }
        (None, None) => {}
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{Example, Label};
    use cascade_learner::{Algorithm, Learner};

    fn example(label: f32, pairs: &[(u64, f32)]) -> Example {
        let mut ex = Example::new();
        for &(index, value) in pairs {
            ex.namespace_mut(b'a').add(value, index);
        }
        ex.label = Label::Simple {
            label,
            weight: 1.0,
            initial: 0.0,
        };
        ex.finalize(false, false);
        ex
    }

    fn train(stack: &mut BuiltStack, rounds: usize) {
        for i in 0..rounds {
            let label = if i % 2 == 0 { 1.0 } else { -1.0 };
            let value = if i % 2 == 0 { 1.0 } else { -1.0 };
            let mut ex = example(label, &[(7, 1.0), (13, value)]);
            stack.top.learn(&mut stack.workspace, &mut ex);
            stack.top.finish_example(&mut stack.workspace, &mut ex);
        }
    }

    fn predict(stack: &mut BuiltStack) -> f32 {
        let mut probe = example(0.0, &[(7, 1.0), (13, 1.0)]);
        probe.label = Label::None;
        stack.top.predict(&mut stack.workspace, &mut probe);
        probe.pred.as_scalar().unwrap()
    }

    #[test]
    fn test_round_trip_reproduces_predictions() {
        for algorithm in [
            Algorithm::Sgd {
                adaptive: true,
                normalized: false,
            },
            Algorithm::Ftrl {
                alpha: 0.2,
                beta: 1.0,
            },
            Algorithm::OjaNewton {
                sketch: 4,
                threshold: 1e7,
            },
        ] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("model.bin");
            let opts = StackOptions {
                algorithm,
                num_bits: 12,
                power_t: 0.5,
                ..StackOptions::default()
            };
            let mut stack = build_stack(opts).unwrap();
            train(&mut stack, 50);
            save_model(&path, &mut stack).unwrap();

            let mut restored = load_model(&path).unwrap();
            let p_restored = predict(&mut restored);
            let p_original = predict(&mut stack);
            assert!(
                (p_restored - p_original).abs() <= 1e-6 * p_original.abs().max(1.0),
                "{algorithm:?}: {p_original} vs {p_restored}"
            );

            // Continuing training stays in sync with the in-memory instance.
            train(&mut stack, 10);
            train(&mut restored, 10);
            let a = predict(&mut stack);
            let b = predict(&mut restored);
            assert!(
                (a - b).abs() <= 1e-6 * a.abs().max(1.0),
                "{algorithm:?} diverged after resume: {a} vs {b}"
            );
        }
    }

    #[test]
    fn test_gzip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin.gz");
        let mut stack = build_stack(StackOptions {
            num_bits: 10,
            ..StackOptions::default()
        })
        .unwrap();
        train(&mut stack, 10);
        save_model(&path, &mut stack).unwrap();
        let mut restored = load_model(&path).unwrap();
        assert!((predict(&mut restored) - predict(&mut stack)).abs() < 1e-6);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.bin");
        std::fs::write(&path, b"NOPE....").unwrap();
        assert!(matches!(
            load_model(&path),
            Err(CheckpointError::BadMagic)
        ));
    }

    #[test]
    fn test_sparse_backing_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.bin");
        let opts = StackOptions {
            sparse_weights: true,
            num_bits: 20,
            ..StackOptions::default()
        };
        let mut stack = build_stack(opts).unwrap();
        train(&mut stack, 20);
        save_model(&path, &mut stack).unwrap();
        let mut restored = load_model(&path).unwrap();
        assert!((predict(&mut restored) - predict(&mut stack)).abs() < 1e-6);
    }

    #[test]
    fn test_text_dump_contains_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.txt");
        let mut stack = build_stack(StackOptions {
            num_bits: 8,
            ..StackOptions::default()
        })
        .unwrap();
        train(&mut stack, 4);
        write_text_model(&path, &mut stack).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("format_version"));
        assert!(text.contains("num_bits"));
    }

    #[test]
    fn test_runtime_counters_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let mut stack = build_stack(StackOptions {
            num_bits: 10,
            ..StackOptions::default()
        })
        .unwrap();
        train(&mut stack, 8);
        let t_before = stack.workspace.t;
        save_model(&path, &mut stack).unwrap();
        let restored = load_model(&path).unwrap();
        assert_eq!(restored.workspace.t, t_before);
        assert_eq!(restored.workspace.progress.examples, 8);
    }
}
