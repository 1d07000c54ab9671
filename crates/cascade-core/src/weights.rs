//! The shared weight vector.
//!
//! Weights live in a flat, power-of-two-sized, strided parameter array
//! addressed by masked hashed indices. Each distinct index owns `stride`
//! float slots; the base learner uses slot 0 for the weight itself and
//! reductions claim further slots for auxiliary state (gradient history,
//! normalization, sketch components).
//!
//! Two physical backings are supported behind one addressing contract: a
//! dense flat array and a sparse hash-map. The choice changes memory/time
//! tradeoffs for large bit-widths, never algorithm behavior: for any index
//! and slot, `get` and `set` observe the same values on either backing.

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::hashing::hash_bytes;

/// How slot 0 of a freshly touched weight row is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum InitializerConfig {
    /// All weights start at zero.
    #[default]
    Zeros,
    /// All weights start at a constant.
    Constant(f32),
    /// Weights start uniformly random in `[low, high)`, deterministically
    /// per index so dense and sparse backings agree.
    Uniform { low: f32, high: f32 },
}

impl InitializerConfig {
    /// The initial slot-0 value for `index`.
    ///
    /// Pure in (config, seed, index): repeated calls agree, and both
    /// backings derive identical initial values.
    pub fn initial(&self, seed: u64, index: u64) -> f32 {
        match self {
            InitializerConfig::Zeros => 0.0,
            InitializerConfig::Constant(c) => *c,
            InitializerConfig::Uniform { low, high } => {
                let mix = hash_bytes(&index.to_le_bytes(), seed);
                let mut rng = StdRng::seed_from_u64(mix);
                rng.gen_range(*low..*high)
            }
        }
    }
}

/// Construction-time configuration of the weight vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    /// log2 of the number of distinct weight indices.
    pub num_bits: u32,
    /// log2 of the number of float slots per index.
    pub stride_shift: u32,
    /// Use the sparse hash-map backing instead of the dense array.
    pub sparse: bool,
    /// Initializer for slot 0 of each row.
    pub initializer: InitializerConfig,
    /// Seed for the deterministic random initializer.
    pub seed: u64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            num_bits: 18,
            stride_shift: 0,
            sparse: false,
            initializer: InitializerConfig::Zeros,
            seed: 0,
        }
    }
}

/// Serializable snapshot of a weight vector, used for model round trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightState {
    pub config: WeightConfig,
    /// Full slot array for the dense backing.
    pub dense: Option<Vec<f32>>,
    /// Touched rows for the sparse backing.
    pub sparse: Option<Vec<(u64, Vec<f32>)>>,
}

/// The flat strided parameter store.
#[derive(Debug, Clone)]
pub enum WeightStore {
    Dense(DenseWeights),
    Sparse(SparseWeights),
}

/// Dense backing: one flat `Vec<f32>` covering every addressable row.
#[derive(Debug, Clone)]
pub struct DenseWeights {
    data: Vec<f32>,
    mask: u64,
    stride_shift: u32,
    config: WeightConfig,
}

/// Sparse backing: rows materialize on first touch.
#[derive(Debug, Clone)]
pub struct SparseWeights {
    rows: HashMap<u64, Vec<f32>>,
    mask: u64,
    stride_shift: u32,
    config: WeightConfig,
}

impl WeightStore {
    /// Builds a weight store from configuration.
    ///
    /// The bit-width is fixed for the lifetime of the store; growing it is a
    /// startup-time administrative decision, never a mid-run resize.
    pub fn new(config: WeightConfig) -> Self {
        let mask = (1u64 << config.num_bits) - 1;
        if config.sparse {
            WeightStore::Sparse(SparseWeights {
                rows: HashMap::new(),
                mask,
                stride_shift: config.stride_shift,
                config,
            })
        } else {
            let rows = 1usize << config.num_bits;
            let stride = 1usize << config.stride_shift;
            let mut data = vec![0.0f32; rows * stride];
            if config.initializer != InitializerConfig::Zeros {
                for (i, chunk) in data.chunks_exact_mut(stride).enumerate() {
                    chunk[0] = config.initializer.initial(config.seed, i as u64);
                }
            }
            WeightStore::Dense(DenseWeights {
                data,
                mask,
                stride_shift: config.stride_shift,
                config,
            })
        }
    }

    /// The index mask; every address is reduced through it.
    #[inline]
    pub fn mask(&self) -> u64 {
        match self {
            WeightStore::Dense(d) => d.mask,
            WeightStore::Sparse(s) => s.mask,
        }
    }

    /// Number of float slots per weight index.
    #[inline]
    pub fn stride(&self) -> u32 {
        1 << self.stride_shift()
    }

    /// log2 of the stride.
    #[inline]
    pub fn stride_shift(&self) -> u32 {
        match self {
            WeightStore::Dense(d) => d.stride_shift,
            WeightStore::Sparse(s) => s.stride_shift,
        }
    }

    /// The configuration this store was built from.
    pub fn config(&self) -> &WeightConfig {
        match self {
            WeightStore::Dense(d) => &d.config,
            WeightStore::Sparse(s) => &s.config,
        }
    }

    /// Reads one slot of one row.
    #[inline]
    pub fn get(&mut self, index: u64, slot: usize) -> f32 {
        self.row(index)[slot]
    }

    /// Writes one slot of one row.
    #[inline]
    pub fn set(&mut self, index: u64, slot: usize, value: f32) {
        self.row(index)[slot] = value;
    }

    /// Mutable access to the full slot row of a masked index.
    ///
    /// The sparse backing materializes the row on first touch, initializing
    /// slot 0 through the configured initializer.
    #[inline]
    pub fn row(&mut self, index: u64) -> &mut [f32] {
        match self {
            WeightStore::Dense(d) => {
                let masked = index & d.mask;
                let stride = 1usize << d.stride_shift;
                let base = (masked as usize) << d.stride_shift;
                &mut d.data[base..base + stride]
            }
            WeightStore::Sparse(s) => {
                let masked = index & s.mask;
                let stride = 1usize << s.stride_shift;
                let config = &s.config;
                s.rows.entry(masked).or_insert_with(|| {
                    let mut row = vec![0.0f32; stride];
                    row[0] = config.initializer.initial(config.seed, masked);
                    row
                })
            }
        }
    }

    /// The dense slot array, when this store is dense.
    ///
    /// Data-parallel all-reduce operates on this flat view; the sparse
    /// backing does not participate (rejected at configuration time).
    pub fn dense_data_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            WeightStore::Dense(d) => Some(&mut d.data),
            WeightStore::Sparse(_) => None,
        }
    }

    /// Snapshots the store for serialization.
    pub fn to_state(&self) -> WeightState {
        match self {
            WeightStore::Dense(d) => WeightState {
                config: d.config.clone(),
                dense: Some(d.data.clone()),
                sparse: None,
            },
            WeightStore::Sparse(s) => {
                let mut rows: Vec<(u64, Vec<f32>)> =
                    s.rows.iter().map(|(k, v)| (*k, v.clone())).collect();
                rows.sort_unstable_by_key(|(k, _)| *k);
                WeightState {
                    config: s.config.clone(),
                    dense: None,
                    sparse: Some(rows),
                }
            }
        }
    }

    /// Rebuilds a store from a snapshot.
    pub fn from_state(state: WeightState) -> Self {
        let mut store = WeightStore::new(state.config);
        match &mut store {
            WeightStore::Dense(d) => {
                if let Some(data) = state.dense {
                    d.data = data;
                } else if let Some(rows) = state.sparse {
                    // Cross-backing restore: addressable values are what
                    // round-trips, not the physical layout.
                    let stride = 1usize << d.stride_shift;
                    for (index, row) in rows {
                        let base = (index as usize) << d.stride_shift;
                        d.data[base..base + stride].copy_from_slice(&row);
                    }
                }
            }
            WeightStore::Sparse(s) => {
                if let Some(rows) = state.sparse {
                    s.rows = rows.into_iter().collect();
                } else if let Some(data) = state.dense {
                    let stride = 1usize << s.stride_shift;
                    for (i, chunk) in data.chunks_exact(stride).enumerate() {
                        if chunk.iter().any(|&v| v != 0.0) {
                            s.rows.insert(i as u64, chunk.to_vec());
                        }
                    }
                }
            }
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sparse: bool) -> WeightConfig {
        WeightConfig {
            num_bits: 4,
            stride_shift: 2,
            sparse,
            initializer: InitializerConfig::Zeros,
            seed: 0,
        }
    }

    #[test]
    fn test_dense_get_set() {
        let mut w = WeightStore::new(config(false));
        w.set(3, 1, 0.5);
        assert_eq!(w.get(3, 1), 0.5);
        assert_eq!(w.get(3, 0), 0.0);
        assert_eq!(w.stride(), 4);
        assert_eq!(w.mask(), 15);
    }

    #[test]
    fn test_mask_wraps_large_indices() {
        let mut w = WeightStore::new(config(false));
        w.set(0xffff_ffff_ffff_fff3, 0, 1.25);
        assert_eq!(w.get(3, 0), 1.25);
    }

    #[test]
    fn test_backings_agree() {
        let mut dense = WeightStore::new(config(false));
        let mut sparse = WeightStore::new(config(true));
        for index in [0u64, 7, 15, 1 << 40] {
            for slot in 0..4 {
                let v = (index as f32) + slot as f32 * 0.1;
                dense.set(index, slot, v);
                sparse.set(index, slot, v);
            }
        }
        for index in [0u64, 7, 15, 1 << 40, 99] {
            for slot in 0..4 {
                assert_eq!(dense.get(index, slot), sparse.get(index, slot));
            }
        }
    }

    #[test]
    fn test_uniform_initializer_deterministic_across_backings() {
        let mut cfg = config(false);
        cfg.initializer = InitializerConfig::Uniform {
            low: -0.1,
            high: 0.1,
        };
        cfg.seed = 7;
        let mut dense = WeightStore::new(cfg.clone());
        cfg.sparse = true;
        let mut sparse = WeightStore::new(cfg);
        for index in 0..16u64 {
            let d = dense.get(index, 0);
            assert!((-0.1..0.1).contains(&d));
            assert_eq!(d, sparse.get(index, 0));
            // Aux slots start at zero regardless of initializer.
            assert_eq!(dense.get(index, 1), 0.0);
        }
    }

    #[test]
    fn test_state_round_trip() {
        let mut w = WeightStore::new(config(true));
        w.set(5, 0, 1.0);
        w.set(5, 3, -2.0);
        w.set(11, 0, 0.25);
        let restored = WeightStore::from_state(w.to_state());
        let mut restored = restored;
        assert_eq!(restored.get(5, 0), 1.0);
        assert_eq!(restored.get(5, 3), -2.0);
        assert_eq!(restored.get(11, 0), 0.25);
    }

    #[test]
    fn test_config_serialization() {
        let cfg = WeightConfig {
            num_bits: 20,
            stride_shift: 2,
            sparse: true,
            initializer: InitializerConfig::Uniform {
                low: -0.5,
                high: 0.5,
            },
            seed: 9,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: WeightConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_cross_backing_restore_preserves_addressable_values() {
        let mut sparse = WeightStore::new(config(true));
        sparse.set(5, 2, 4.0);
        let mut state = sparse.to_state();
        state.config.sparse = false;
        let mut dense = WeightStore::from_state(state);
        assert_eq!(dense.get(5, 2), 4.0);
        assert_eq!(dense.get(6, 2), 0.0);
    }
}
