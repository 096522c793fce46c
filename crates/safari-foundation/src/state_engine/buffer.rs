use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Recurrent state of one liquid layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    pub membrane_potential: Vec<f32>,
    pub synaptic_current: Vec<f32>,
    pub time_step: u64,
    /// Milliseconds since the Unix epoch; `0` for a layer that never stepped.
    pub last_update_ms: u64,
}

impl LayerState {
    /// A zeroed layer.
    pub fn new(layer_size: usize) -> Self {
        Self {
            membrane_potential: vec![0.0; layer_size],
            synaptic_current: vec![0.0; layer_size],
            time_step: 0,
            last_update_ms: 0,
        }
    }

    /// Mean absolute membrane potential.
    pub fn activity(&self) -> f32 {
        if self.membrane_potential.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.membrane_potential.iter().map(|v| v.abs()).sum();
        sum / self.membrane_potential.len() as f32
    }
}

/// Layer index to layer state, owned by a single session or call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBuffer {
    layers: BTreeMap<usize, LayerState>,
}

impl StateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self, index: usize) -> Option<&LayerState> {
        self.layers.get(&index)
    }

    pub(crate) fn commit(&mut self, index: usize, state: LayerState) -> &LayerState {
        use std::collections::btree_map::Entry;
        match self.layers.entry(index) {
            Entry::Occupied(mut slot) => {
                slot.insert(state);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(state),
        }
    }

    /// Concatenated membrane potentials in ascending layer order.
    pub fn aggregate(&self) -> Vec<f32> {
        self.layers
            .values()
            .flat_map(|l| l.membrane_potential.iter().copied())
            .collect()
    }

    /// Drop every layer; the next step starts from zero.
    pub fn reset(&mut self) {
        self.layers.clear();
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Approximate bytes held by the recurrent vectors.
    pub fn memory_bytes(&self) -> u64 {
        self.layers
            .values()
            .map(|l| {
                ((l.membrane_potential.len() + l.synaptic_current.len()) * std::mem::size_of::<f32>())
                    as u64
            })
            .sum()
    }
}
