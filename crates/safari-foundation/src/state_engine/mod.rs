//! Liquid State Engine
//!
//! Continuous-time leaky-integrator layers whose effective time constant
//! adapts to their own activity.
//!
//! # Update rule
//!
//! ```text
//! current   = backend.forward(input)
//! dt        = min(now - last_update, tau_max)
//! activity  = mean(|potential|)
//! tau       = tau_min + (tau_max - tau_min) * sigmoid(activity)
//! decay     = exp(-dt / tau)
//! potential = potential * decay + current * (1 - decay)
//! ```
//!
//! Layer `0` is driven by the extracted features; layer `i` is driven by the
//! freshly updated potential of layer `i - 1`. The engine itself is
//! immutable and shared; all mutable recurrent state lives in a
//! [`StateBuffer`] owned by exactly one session or call.

mod buffer;

pub use buffer::{LayerState, StateBuffer};

use std::sync::Arc;

use safari_kernel::config::ModelSettings;
use safari_kernel::{ComputeBackend, DetectResult, DetectionError};

use crate::backend::DenseBackend;

/// Upper bound applied to layer activity before the sigmoid.
const MAX_ACTIVITY: f32 = 30.0;

/// Immutable per-layer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidLayerConfig {
    layer_size: usize,
    tau_min: f32,
    tau_max: f32,
}

impl LiquidLayerConfig {
    /// Validate and build a layer configuration.
    pub fn new(layer_size: usize, (tau_min, tau_max): (f32, f32)) -> DetectResult<Self> {
        if !(256..=2048).contains(&layer_size) || layer_size % 128 != 0 {
            return Err(DetectionError::InvalidInput(format!(
                "layer_size {layer_size} must be a multiple of 128 within [256, 2048]"
            )));
        }
        if !(tau_min >= 1.0 && tau_min < tau_max && tau_max <= 1000.0) {
            return Err(DetectionError::InvalidInput(format!(
                "time constants ({tau_min}, {tau_max}) must satisfy 1 <= min < max <= 1000"
            )));
        }
        Ok(Self {
            layer_size,
            tau_min,
            tau_max,
        })
    }

    pub fn from_settings(settings: &ModelSettings) -> DetectResult<Self> {
        Self::new(settings.layer_size, settings.time_constants_range)
    }

    pub fn layer_size(&self) -> usize {
        self.layer_size
    }

    pub fn tau_min(&self) -> f32 {
        self.tau_min
    }

    pub fn tau_max(&self) -> f32 {
        self.tau_max
    }

    /// Adaptive time constant for a layer with the given mean absolute potential.
    pub fn adaptive_tau(&self, activity: f32) -> f32 {
        let activity = if activity.is_finite() {
            activity.clamp(0.0, MAX_ACTIVITY)
        } else {
            MAX_ACTIVITY
        };
        self.tau_min + (self.tau_max - self.tau_min) * sigmoid(activity)
    }

    /// Elapsed time since the last update, capped at `tau_max`.
    ///
    /// A clock that moved backwards yields `0`.
    pub fn effective_dt(&self, last_update_ms: u64, now_ms: u64) -> f32 {
        let elapsed = now_ms.saturating_sub(last_update_ms) as f64;
        elapsed.min(self.tau_max as f64) as f32
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// One leaky-integration step.
///
/// Returns the convex combination `prior * decay + current * (1 - decay)`
/// with `decay = exp(-dt / tau)`. With `dt == 0` the prior is returned
/// unchanged.
pub fn leaky_integrate(prior: &[f32], current: &[f32], dt: f32, tau: f32) -> Vec<f32> {
    let decay = (-dt / tau).exp();
    prior
        .iter()
        .zip(current)
        .map(|(p, c)| p * decay + c * (1.0 - decay))
        .collect()
}

/// Outcome of a full propagation through every layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Propagation {
    /// Concatenated layer potentials.
    pub state: Vec<f32>,
    pub layer_steps: u64,
}

/// The stack of liquid layers.
pub struct LiquidStateEngine {
    config: LiquidLayerConfig,
    layers: Vec<Arc<dyn ComputeBackend>>,
}

impl std::fmt::Debug for LiquidStateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidStateEngine")
            .field("config", &self.config)
            .field(
                "layers",
                &self.layers.iter().map(|l| l.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl LiquidStateEngine {
    /// Build an engine over explicit per-layer backends.
    ///
    /// Every backend must map `layer_size -> layer_size`.
    pub fn new(
        config: LiquidLayerConfig,
        layers: Vec<Arc<dyn ComputeBackend>>,
    ) -> DetectResult<Self> {
        if layers.is_empty() {
            return Err(DetectionError::InvalidInput(
                "a liquid state engine needs at least one layer".to_string(),
            ));
        }
        for backend in &layers {
            if backend.input_dim() != config.layer_size || backend.output_dim() != config.layer_size {
                return Err(DetectionError::InvalidInput(format!(
                    "backend '{}' maps {} -> {}, expected {} -> {}",
                    backend.name(),
                    backend.input_dim(),
                    backend.output_dim(),
                    config.layer_size,
                    config.layer_size
                )));
            }
        }
        Ok(Self { config, layers })
    }

    /// Engine whose layers are seeded dense transforms.
    pub fn dense(config: LiquidLayerConfig, num_layers: usize, seed: u64) -> DetectResult<Self> {
        let layers = (0..num_layers)
            .map(|i| {
                Arc::new(DenseBackend::xavier(
                    format!("liquid-{i}"),
                    config.layer_size,
                    config.layer_size,
                    seed.wrapping_add(i as u64),
                )) as Arc<dyn ComputeBackend>
            })
            .collect();
        Self::new(config, layers)
    }

    pub fn config(&self) -> &LiquidLayerConfig {
        &self.config
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Length of [`StateBuffer::aggregate`] once every layer has stepped.
    pub fn state_dim(&self) -> usize {
        self.layers.len() * self.config.layer_size
    }

    /// Advance one layer.
    ///
    /// On error the buffer is left exactly as it was.
    pub fn step<'a>(
        &self,
        buffer: &'a mut StateBuffer,
        layer: usize,
        input: &[f32],
        now_ms: u64,
    ) -> DetectResult<&'a LayerState> {
        let size = self.config.layer_size;
        let backend = self.layers.get(layer).ok_or_else(|| {
            DetectionError::Internal(format!(
                "layer {layer} out of range for a {}-layer engine",
                self.layers.len()
            ))
        })?;

        if input.len() != size {
            return Err(DetectionError::InvalidInputShape {
                expected: size,
                actual: input.len(),
            });
        }
        if input.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::NumericInstability { layer });
        }

        let current = backend.forward(input)?;
        if current.len() != size {
            return Err(DetectionError::ModelInferenceError(format!(
                "backend '{}' returned {} values, expected {size}",
                backend.name(),
                current.len()
            )));
        }
        if current.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::NumericInstability { layer });
        }

        let fresh;
        let prior = match buffer.layer(layer) {
            Some(state) => state,
            None => {
                fresh = LayerState::new(size);
                &fresh
            }
        };

        let dt = self.config.effective_dt(prior.last_update_ms, now_ms);
        let tau = self.config.adaptive_tau(prior.activity());
        let potential = leaky_integrate(&prior.membrane_potential, &current, dt, tau);
        if potential.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::NumericInstability { layer });
        }

        let next = LayerState {
            membrane_potential: potential,
            synaptic_current: current,
            time_step: prior.time_step + 1,
            last_update_ms: now_ms,
        };
        Ok(buffer.commit(layer, next))
    }

    /// Feed `features` through every layer in order and return the aggregate.
    ///
    /// A failing layer leaves the layers before it updated; callers recover
    /// by resetting the buffer.
    pub fn propagate(
        &self,
        buffer: &mut StateBuffer,
        features: &[f32],
        now_ms: u64,
    ) -> DetectResult<Propagation> {
        let mut input = features.to_vec();
        for layer in 0..self.layers.len() {
            let state = self.step(buffer, layer, &input, now_ms)?;
            input = state.membrane_potential.clone();
        }
        Ok(Propagation {
            state: buffer.aggregate(),
            layer_steps: self.layers.len() as u64,
        })
    }
}
