use std::path::Path;

use ndarray::Array2;
use tracing::debug;

use crate::attachments::DeformableMultiObject;
use crate::core::config::validate_time_bounds;
use crate::core::linalg::{check_same_shape, scale};
use crate::core::{DeformationConfig, Error, IntegrationScheme, Kernel, Result, Scalar};
use crate::deformations::exponential::{Exponential, State};
use crate::io::write_2d_array;

/// Two-sided geodesic around a reference time `t0`.
///
/// A backward exponential covers `[tmin, t0]` and a forward one `[t0, tmax]`. Both start from
/// the same control points and template data; the momenta handed to each segment carry the
/// segment duration, so each exponential integrates over unit time.
#[derive(Debug, Clone)]
pub struct Geodesic<K, T = f64> {
    t0: f64,
    tmin: f64,
    tmax: f64,
    concentration_of_time_points: usize,

    control_points_t0: Option<Array2<T>>,
    momenta_t0: Option<Array2<T>>,
    template_data_t0: Option<Array2<T>>,

    backward: Exponential<K, T>,
    forward: Exponential<K, T>,

    shoot_state: State,
    flow_state: State,
}

/// Number of recorded states of a segment lasting `duration`
fn segment_time_points(duration: f64, concentration: usize) -> usize {
    let n = (duration * concentration as f64 + 1.5).floor();
    if n < 1.0 {
        1
    } else {
        n as usize
    }
}

/// Chronological concatenation: reversed backward segment without its copy of t0, then forward
fn concatenate<X: Clone>(backward: &[X], forward: &[X]) -> Vec<X> {
    backward
        .iter()
        .skip(1)
        .rev()
        .chain(forward.iter())
        .cloned()
        .collect()
}

impl<K: Kernel + Clone, T: Scalar> Geodesic<K, T> {
    pub fn new(kernel: K, config: &DeformationConfig) -> Self {
        Geodesic {
            t0: config.t0,
            tmin: config.tmin,
            tmax: config.tmax,
            concentration_of_time_points: config.concentration_of_time_points,
            control_points_t0: None,
            momenta_t0: None,
            template_data_t0: None,
            backward: Exponential::new(kernel.clone(), config.integration_scheme),
            forward: Exponential::new(kernel, config.integration_scheme),
            shoot_state: State::Stale,
            flow_state: State::Stale,
        }
    }
}

impl<K: Kernel, T: Scalar> Geodesic<K, T> {
    pub fn set_t0(&mut self, t0: f64) {
        self.t0 = t0;
        self.mark_shoot_stale();
    }

    pub fn set_tmin(&mut self, tmin: f64) {
        self.tmin = tmin;
        self.mark_shoot_stale();
    }

    pub fn set_tmax(&mut self, tmax: f64) {
        self.tmax = tmax;
        self.mark_shoot_stale();
    }

    pub fn set_concentration_of_time_points(&mut self, concentration: usize) {
        self.concentration_of_time_points = concentration;
        self.mark_shoot_stale();
    }

    pub fn set_integration_scheme(&mut self, scheme: IntegrationScheme) {
        self.backward.set_integration_scheme(scheme);
        self.forward.set_integration_scheme(scheme);
        self.mark_shoot_stale();
    }

    pub fn set_control_points_t0(&mut self, control_points: Array2<T>) {
        self.control_points_t0 = Some(control_points);
        self.mark_shoot_stale();
    }

    pub fn set_momenta_t0(&mut self, momenta: Array2<T>) {
        self.momenta_t0 = Some(momenta);
        self.mark_shoot_stale();
    }

    pub fn set_template_data_t0(&mut self, template_data: Array2<T>) {
        self.template_data_t0 = Some(template_data);
        self.flow_state = State::Stale;
    }

    fn mark_shoot_stale(&mut self) {
        self.shoot_state = State::Stale;
        self.flow_state = State::Stale;
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn tmin(&self) -> f64 {
        self.tmin
    }

    pub fn tmax(&self) -> f64 {
        self.tmax
    }

    pub fn state(&self) -> State {
        if self.shoot_state == State::Fresh && self.flow_state == State::Fresh {
            State::Fresh
        } else {
            State::Stale
        }
    }

    pub fn backward_exponential(&self) -> &Exponential<K, T> {
        &self.backward
    }

    pub fn forward_exponential(&self) -> &Exponential<K, T> {
        &self.forward
    }

    fn backward_duration(&self) -> f64 {
        self.t0 - self.tmin
    }

    fn forward_duration(&self) -> f64 {
        self.tmax - self.t0
    }

    /// Re-seed the stale segments and integrate them.
    pub fn update(&mut self) -> Result<()> {
        validate_time_bounds(self.tmin, self.t0, self.tmax)?;
        if self.state() == State::Fresh {
            return Ok(());
        }

        if self.shoot_state == State::Stale {
            let control_points = self.control_points_t0.as_ref().ok_or_else(|| {
                Error::InvalidState("control points at t0 are not set".to_string())
            })?;
            let momenta = self
                .momenta_t0
                .as_ref()
                .ok_or_else(|| Error::InvalidState("momenta at t0 are not set".to_string()))?;
            check_same_shape(control_points.view(), momenta.view())?;

            let backward_duration = self.backward_duration();
            let forward_duration = self.forward_duration();
            let backward_points =
                segment_time_points(backward_duration, self.concentration_of_time_points);
            let forward_points =
                segment_time_points(forward_duration, self.concentration_of_time_points);
            debug!(
                t0 = self.t0,
                tmin = self.tmin,
                tmax = self.tmax,
                backward_points,
                forward_points,
                "seeding geodesic"
            );

            self.backward.set_number_of_time_points(backward_points);
            self.backward
                .set_initial_control_points(control_points.clone());
            self.backward
                .set_initial_momenta(scale(momenta, T::constant(-backward_duration)));

            self.forward.set_number_of_time_points(forward_points);
            self.forward.set_initial_control_points(control_points.clone());
            self.forward
                .set_initial_momenta(scale(momenta, T::constant(forward_duration)));
        }

        if self.flow_state == State::Stale {
            if let Some(template_data) = self.template_data_t0.as_ref() {
                self.backward
                    .set_initial_template_data(template_data.clone());
                self.forward.set_initial_template_data(template_data.clone());
            }
        }

        self.backward.update()?;
        self.forward.update()?;

        self.shoot_state = State::Fresh;
        self.flow_state = State::Fresh;
        Ok(())
    }

    fn check_fresh(&self) -> Result<()> {
        if self.shoot_state == State::Stale {
            return Err(Error::StaleState(
                "geodesic was modified and not updated".to_string(),
            ));
        }
        if self.flow_state == State::Stale {
            return Err(Error::StaleState(
                "template data at t0 was modified and not flowed".to_string(),
            ));
        }
        Ok(())
    }

    /// Nearest discretised index of `time` inside a segment of `duration` and `n` states
    fn time_index(&self, time: f64, duration: f64, n: usize) -> usize {
        if n <= 1 || duration <= 0.0 {
            return 0;
        }
        let step = duration / (n - 1) as f64;
        let index = ((time - self.t0).abs() / step).round() as usize;
        index.min(n - 1)
    }

    /// Template data deformed up to `time`
    pub fn get_template_data(&self, time: f64) -> Result<&Array2<T>> {
        if !(self.tmin <= time && time <= self.tmax) {
            return Err(Error::TimeOutOfRange {
                time,
                tmin: self.tmin,
                tmax: self.tmax,
            });
        }
        self.check_fresh()?;

        if time <= self.t0 {
            let index = self.time_index(
                time,
                self.backward_duration(),
                self.backward.number_of_time_points(),
            );
            self.backward.get_template_data(index)
        } else {
            let index = self.time_index(
                time,
                self.forward_duration(),
                self.forward.number_of_time_points(),
            );
            self.forward.get_template_data(index)
        }
    }

    /// Discretised times from tmin to tmax, matching the trajectory getters
    pub fn get_times(&self) -> Result<Vec<f64>> {
        self.check_fresh()?;
        let segment = |duration: f64, n: usize, sign: f64| -> Vec<f64> {
            if n <= 1 {
                return vec![self.t0];
            }
            (0..n)
                .map(|i| self.t0 + sign * duration * i as f64 / (n - 1) as f64)
                .collect()
        };
        let backward = segment(
            self.backward_duration(),
            self.backward.number_of_time_points(),
            -1.0,
        );
        let forward = segment(
            self.forward_duration(),
            self.forward.number_of_time_points(),
            1.0,
        );
        Ok(concatenate(&backward, &forward))
    }

    pub fn get_control_points_trajectory(&self) -> Result<Vec<Array2<T>>> {
        self.check_fresh()?;
        Ok(concatenate(
            self.backward.control_points_trajectory()?,
            self.forward.control_points_trajectory()?,
        ))
    }

    /// Momenta per unit of time along the geodesic
    pub fn get_momenta_trajectory(&self) -> Result<Vec<Array2<T>>> {
        self.check_fresh()?;
        let momenta_t0 = self
            .momenta_t0
            .as_ref()
            .ok_or_else(|| Error::InvalidState("momenta at t0 are not set".to_string()))?;

        let rescale = |trajectory: &[Array2<T>], duration: f64, sign: f64| -> Vec<Array2<T>> {
            if duration > 0.0 {
                trajectory
                    .iter()
                    .map(|momenta| scale(momenta, T::constant(sign / duration)))
                    .collect()
            } else {
                vec![momenta_t0.clone()]
            }
        };
        let backward = rescale(
            self.backward.momenta_trajectory()?,
            self.backward_duration(),
            -1.0,
        );
        let forward = rescale(
            self.forward.momenta_trajectory()?,
            self.forward_duration(),
            1.0,
        );
        Ok(concatenate(&backward, &forward))
    }

    pub fn get_template_trajectory(&self) -> Result<Vec<Array2<T>>> {
        self.check_fresh()?;
        Ok(concatenate(
            self.backward.template_trajectory()?,
            self.forward.template_trajectory()?,
        ))
    }

    /// Kinetic energy of the forward segment
    pub fn get_norm_squared(&self) -> Result<T> {
        self.check_fresh()?;
        self.forward.get_norm_squared()
    }
}

impl<K: Kernel> Geodesic<K, f64> {
    /// Parallel transport of `momenta_to_transport` (given at t0) along the whole geodesic,
    /// ordered as the trajectory getters.
    pub fn parallel_transport(&self, momenta_to_transport: &Array2<f64>) -> Result<Vec<Array2<f64>>> {
        self.check_fresh()?;
        let transport = |exponential: &Exponential<K, f64>| {
            if exponential.number_of_time_points() > 1 {
                exponential.parallel_transport(momenta_to_transport)
            } else {
                Ok(vec![momenta_to_transport.clone()])
            }
        };
        let backward = transport(&self.backward)?;
        let forward = transport(&self.forward)?;
        Ok(concatenate(&backward, &forward))
    }

    /// Write the template trajectory, one file per object and discretised time.
    pub fn write_flow(
        &self,
        root_name: &str,
        template: &DeformableMultiObject,
        output_dir: &Path,
    ) -> Result<()> {
        let trajectory = self.get_template_trajectory()?;
        let times = self.get_times()?;
        debug!(root_name, states = trajectory.len(), "writing geodesic flow");

        for (index, (data, time)) in trajectory.iter().zip(times.iter()).enumerate() {
            let parts = template.split_points(data)?;
            for (object, points) in template.objects().iter().zip(parts.iter()) {
                let file_name = format!(
                    "{root_name}__{}__tp_{index}__age_{time:.2}.txt",
                    object.name()
                );
                write_2d_array(&output_dir.join(file_name), points)?;
            }
        }
        Ok(())
    }
}
