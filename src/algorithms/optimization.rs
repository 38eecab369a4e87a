use std::collections::BTreeMap;

use ndarray::Array1;
use tracing::{debug, info, warn};

use crate::core::error::{Error, Result};
use crate::core::EstimatorConfig;

/// Named, flattened model parameters ("TemplateData", "ControlPoints", "Momenta", ...)
///
/// Frozen parameters are simply absent from the map.
pub type FixedEffects = BTreeMap<String, Array1<f64>>;

/// Value of the objective split into its data-fit and penalty parts
#[derive(Debug, Clone, PartialEq)]
pub struct LogLikelihood {
    pub attachment: f64,
    pub regularity: f64,
    /// Gradient of `attachment + regularity`, one entry per fixed effect
    pub gradient: Option<FixedEffects>,
}

impl LogLikelihood {
    pub fn new(attachment: f64, regularity: f64) -> Self {
        LogLikelihood {
            attachment,
            regularity,
            gradient: None,
        }
    }

    pub fn with_gradient(mut self, gradient: FixedEffects) -> Self {
        self.gradient = Some(gradient);
        self
    }

    pub fn total(&self) -> f64 {
        self.attachment + self.regularity
    }
}

/// Model-agnostic contract consumed by the estimator
pub trait StatisticalModel {
    type Dataset;

    /// Current parameters
    fn fixed_effects(&self) -> FixedEffects;

    /// Evaluate the objective at `fixed_effects` without modifying the model
    fn compute_log_likelihood(
        &self,
        dataset: &Self::Dataset,
        fixed_effects: &FixedEffects,
        with_grad: bool,
    ) -> Result<LogLikelihood>;

    fn set_fixed_effects(&mut self, fixed_effects: &FixedEffects) -> Result<()>;

    /// Persist the current parameters (checkpoint)
    fn write(&self, dataset: &Self::Dataset) -> Result<()>;
}

/// Why the ascent stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Relative improvement fell below the tolerance
    Converged,
    /// No improving step found within the line search budget
    LineSearchExhausted,
    MaxIterations,
}

/// Optimization result
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Last accepted parameters
    pub fixed_effects: FixedEffects,
    /// Objective at the last accepted parameters
    pub log_likelihood: LogLikelihood,
    /// Per-parameter step sizes at exit
    pub step_sizes: BTreeMap<String, f64>,
    /// Number of accepted steps
    pub iterations: usize,
    pub termination: TerminationReason,
    pub converged: bool,
    pub message: String,
}

/// Gradient ascent with one adaptive step size per fixed effect
#[derive(Debug, Clone)]
pub struct GradientAscent {
    pub initial_step_size: f64,
    pub max_iterations: usize,
    pub max_line_search_iterations: usize,
    /// Step multiplier after a failed attempt, in (0, 1)
    pub line_search_shrink: f64,
    /// Step multiplier after an accepted iteration
    pub line_search_expand: f64,
    pub convergence_tolerance: f64,
    pub print_every_n_iters: usize,
    pub save_every_n_iters: usize,
}

impl Default for GradientAscent {
    fn default() -> Self {
        let config = EstimatorConfig::default();
        Self {
            initial_step_size: config.initial_step_size,
            max_iterations: config.max_iterations,
            max_line_search_iterations: config.max_line_search_iterations,
            line_search_shrink: config.line_search_shrink,
            line_search_expand: config.line_search_expand,
            convergence_tolerance: config.convergence_tolerance,
            print_every_n_iters: config.print_every_n_iters,
            save_every_n_iters: config.save_every_n_iters,
        }
    }
}

fn every(iteration: usize, period: usize) -> bool {
    period > 0 && iteration % period == 0
}

impl GradientAscent {
    /// Create a new optimizer with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EstimatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            initial_step_size: config.initial_step_size,
            max_iterations: config.max_iterations,
            max_line_search_iterations: config.max_line_search_iterations,
            line_search_shrink: config.line_search_shrink,
            line_search_expand: config.line_search_expand,
            convergence_tolerance: config.convergence_tolerance,
            print_every_n_iters: config.print_every_n_iters,
            save_every_n_iters: config.save_every_n_iters,
        })
    }

    pub fn with_initial_step_size(mut self, step_size: f64) -> Self {
        self.initial_step_size = step_size;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_line_search_iterations(mut self, iterations: usize) -> Self {
        self.max_line_search_iterations = iterations;
        self
    }

    /// Set line search shrink / expand factors
    pub fn with_line_search(mut self, shrink: f64, expand: f64) -> Self {
        self.line_search_shrink = shrink;
        self.line_search_expand = expand;
        self
    }

    pub fn with_convergence_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence_tolerance = tolerance;
        self
    }

    pub fn with_print_every(mut self, iterations: usize) -> Self {
        self.print_every_n_iters = iterations;
        self
    }

    pub fn with_save_every(mut self, iterations: usize) -> Self {
        self.save_every_n_iters = iterations;
        self
    }

    fn validate(&self) -> Result<()> {
        EstimatorConfig {
            initial_step_size: self.initial_step_size,
            max_iterations: self.max_iterations,
            max_line_search_iterations: self.max_line_search_iterations,
            line_search_shrink: self.line_search_shrink,
            line_search_expand: self.line_search_expand,
            convergence_tolerance: self.convergence_tolerance,
            print_every_n_iters: self.print_every_n_iters,
            save_every_n_iters: self.save_every_n_iters,
        }
        .validate()
    }

    /// Run the ascent on `model`, leaving the best parameters found in it.
    ///
    /// The model is checkpointed (`set_fixed_effects` + `write`) on exit whatever the
    /// termination reason.
    pub fn update<M: StatisticalModel>(
        &self,
        model: &mut M,
        dataset: &M::Dataset,
    ) -> Result<OptimizationResult> {
        self.validate()?;

        let mut current = model.fixed_effects();
        let first = model.compute_log_likelihood(dataset, &current, true)?;
        let mut gradient = take_gradient(first.clone(), &current)?;
        let mut current_ll = LogLikelihood::new(first.attachment, first.regularity);
        report(0, &current_ll);

        let keys: Vec<String> = gradient.keys().cloned().collect();
        let mut steps = vec![self.initial_step_size; keys.len()];

        let initial_value = current_ll.total();
        let mut last_value = initial_value;
        let mut iterations = 0;
        let mut termination = TerminationReason::MaxIterations;

        for iteration in 1..=self.max_iterations {
            if every(iteration, self.print_every_n_iters) {
                for (key, step) in keys.iter().zip(steps.iter()) {
                    debug!(iteration, parameter = %key, step, "step size");
                }
            }

            let accepted =
                self.line_search(model, dataset, &current, &gradient, &mut steps, last_value)?;
            let (candidate, candidate_ll) = match accepted {
                Some(accepted) => accepted,
                None => {
                    model.set_fixed_effects(&current)?;
                    warn!(
                        iteration,
                        "number of line search loops exceeded, stopping"
                    );
                    termination = TerminationReason::LineSearchExhausted;
                    break;
                }
            };

            current = candidate;
            current_ll = candidate_ll;
            iterations = iteration;

            let value = current_ll.total();
            let delta_current = last_value - value;
            let delta_initial = initial_value - value;
            if delta_current.abs() < self.convergence_tolerance * delta_initial.abs() {
                info!(iteration, "tolerance threshold met, stopping");
                termination = TerminationReason::Converged;
                break;
            }

            if every(iteration, self.print_every_n_iters) {
                report(iteration, &current_ll);
            }
            if every(iteration, self.save_every_n_iters) {
                checkpoint(model, dataset, &current)?;
            }

            for step in steps.iter_mut() {
                *step *= self.line_search_expand;
            }
            last_value = value;

            let evaluated = model.compute_log_likelihood(dataset, &current, true)?;
            gradient = take_gradient(evaluated, &current)?;
        }

        checkpoint(model, dataset, &current)?;

        let message = match termination {
            TerminationReason::Converged => "Tolerance threshold met",
            TerminationReason::LineSearchExhausted => "Number of line search loops exceeded",
            TerminationReason::MaxIterations => "Maximum iterations reached",
        };
        Ok(OptimizationResult {
            fixed_effects: current,
            log_likelihood: current_ll,
            step_sizes: keys.into_iter().zip(steps).collect(),
            iterations,
            termination,
            converged: termination == TerminationReason::Converged,
            message: message.to_string(),
        })
    }

    /// Look for a strictly improving step, adapting `steps` in place.
    fn line_search<M: StatisticalModel>(
        &self,
        model: &M,
        dataset: &M::Dataset,
        current: &FixedEffects,
        gradient: &FixedEffects,
        steps: &mut [f64],
        last_value: f64,
    ) -> Result<Option<(FixedEffects, LogLikelihood)>> {
        let shrink = self.line_search_shrink;

        for _ in 0..self.max_line_search_iterations {
            let candidate = ascent_step(current, gradient, steps)?;
            let ll = model.compute_log_likelihood(dataset, &candidate, false)?;
            if ll.total() > last_value {
                return Ok(Some((candidate, ll)));
            }

            for step in steps.iter_mut() {
                *step *= shrink;
            }
            if steps.len() < 2 {
                continue;
            }

            // Probe each parameter with its own step re-expanded, from the shrunk baseline
            let mut best: Option<(usize, FixedEffects, LogLikelihood)> = None;
            for k in 0..steps.len() {
                let mut local = steps.to_vec();
                local[k] /= shrink;
                let probe = ascent_step(current, gradient, &local)?;
                let probe_ll = model.compute_log_likelihood(dataset, &probe, false)?;
                let improves = probe_ll.total() > last_value;
                let is_best = best
                    .as_ref()
                    .map_or(true, |(_, _, b)| probe_ll.total() > b.total());
                if improves && is_best {
                    best = Some((k, probe, probe_ll));
                }
            }
            if let Some((k, probe, probe_ll)) = best {
                steps[k] /= shrink;
                return Ok(Some((probe, probe_ll)));
            }
        }
        Ok(None)
    }
}

/// current[key] + gradient[key] * step[k], keys in map order
fn ascent_step(
    current: &FixedEffects,
    gradient: &FixedEffects,
    steps: &[f64],
) -> Result<FixedEffects> {
    let mut out = current.clone();
    for ((key, grad), &step) in gradient.iter().zip(steps.iter()) {
        let value = out
            .get_mut(key)
            .ok_or_else(|| Error::InvalidState(format!("no fixed effect named '{key}'")))?;
        if value.len() != grad.len() {
            return Err(Error::DimensionMismatch {
                expected: value.len(),
                got: grad.len(),
            });
        }
        value.scaled_add(step, grad);
    }
    Ok(out)
}

fn take_gradient(ll: LogLikelihood, current: &FixedEffects) -> Result<FixedEffects> {
    let gradient = ll.gradient.ok_or_else(|| {
        Error::InvalidState("model returned no gradient when asked for one".to_string())
    })?;
    if let Some(key) = gradient.keys().find(|k| !current.contains_key(*k)) {
        return Err(Error::InvalidState(format!(
            "gradient has an entry for unknown fixed effect '{key}'"
        )));
    }
    Ok(gradient)
}

fn report(iteration: usize, ll: &LogLikelihood) {
    info!(
        "Iteration {}: log-likelihood = {:.3e} [attachment = {:.3e} ; regularity = {:.3e}]",
        iteration,
        ll.total(),
        ll.attachment,
        ll.regularity
    );
}

fn checkpoint<M: StatisticalModel>(
    model: &mut M,
    dataset: &M::Dataset,
    fixed_effects: &FixedEffects,
) -> Result<()> {
    debug!("writing checkpoint");
    model.set_fixed_effects(fixed_effects)?;
    model.write(dataset)
}
