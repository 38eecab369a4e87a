use ndarray::Array2;
use tracing::debug;

use crate::core::linalg::{axpy, check_same_shape, frobenius_dot, scale, solve_spd};
use crate::core::{Error, IntegrationScheme, Kernel, Result, Scalar};

/// Freshness tag of a cached trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Trajectory matches the current inputs
    Fresh,
    /// Some input changed since the last `update()`
    Stale,
}

/// One integration step of the control points / momenta system
pub(crate) struct Step<T> {
    pub control_points: Array2<T>,
    pub momenta: Array2<T>,
    /// Midpoint state (midpoint scheme only), reused to flow the landmark data
    pub midpoint: Option<(Array2<T>, Array2<T>)>,
}

/// One geodesic segment: shoots control points and momenta over [0, 1] and flows the
/// template landmark data along the induced velocity field.
///
/// The segment duration is absorbed in the initial momenta by the caller, so every segment
/// is integrated with the step `1 / (number_of_time_points - 1)`.
#[derive(Debug, Clone)]
pub struct Exponential<K, T = f64> {
    kernel: K,
    scheme: IntegrationScheme,
    number_of_time_points: usize,

    initial_control_points: Option<Array2<T>>,
    initial_momenta: Option<Array2<T>>,
    initial_template_data: Option<Array2<T>>,

    control_points_t: Vec<Array2<T>>,
    momenta_t: Vec<Array2<T>>,
    midpoints_t: Vec<(Array2<T>, Array2<T>)>,
    template_data_t: Vec<Array2<T>>,

    shoot_state: State,
    flow_state: State,
}

impl<K: Kernel, T: Scalar> Exponential<K, T> {
    pub fn new(kernel: K, scheme: IntegrationScheme) -> Self {
        Exponential {
            kernel,
            scheme,
            number_of_time_points: 11,
            initial_control_points: None,
            initial_momenta: None,
            initial_template_data: None,
            control_points_t: Vec::new(),
            momenta_t: Vec::new(),
            midpoints_t: Vec::new(),
            template_data_t: Vec::new(),
            shoot_state: State::Stale,
            flow_state: State::Stale,
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn set_initial_control_points(&mut self, control_points: Array2<T>) {
        self.initial_control_points = Some(control_points);
        self.mark_shoot_stale();
    }

    pub fn set_initial_momenta(&mut self, momenta: Array2<T>) {
        self.initial_momenta = Some(momenta);
        self.mark_shoot_stale();
    }

    /// Only the flow has to be recomputed after this call
    pub fn set_initial_template_data(&mut self, template_data: Array2<T>) {
        self.initial_template_data = Some(template_data);
        self.flow_state = State::Stale;
    }

    pub fn set_number_of_time_points(&mut self, number_of_time_points: usize) {
        self.number_of_time_points = number_of_time_points;
        self.mark_shoot_stale();
    }

    pub fn set_integration_scheme(&mut self, scheme: IntegrationScheme) {
        self.scheme = scheme;
        self.mark_shoot_stale();
    }

    fn mark_shoot_stale(&mut self) {
        self.shoot_state = State::Stale;
        self.flow_state = State::Stale;
    }

    pub fn number_of_time_points(&self) -> usize {
        self.number_of_time_points
    }

    pub fn integration_scheme(&self) -> IntegrationScheme {
        self.scheme
    }

    pub fn initial_control_points(&self) -> Option<&Array2<T>> {
        self.initial_control_points.as_ref()
    }

    pub fn initial_momenta(&self) -> Option<&Array2<T>> {
        self.initial_momenta.as_ref()
    }

    pub fn initial_template_data(&self) -> Option<&Array2<T>> {
        self.initial_template_data.as_ref()
    }

    pub fn state(&self) -> State {
        if self.shoot_state == State::Fresh && self.flow_state == State::Fresh {
            State::Fresh
        } else {
            State::Stale
        }
    }

    fn shoot_inputs(&self) -> Result<(&Array2<T>, &Array2<T>)> {
        let control_points = self.initial_control_points.as_ref().ok_or_else(|| {
            Error::InvalidState("initial control points are not set".to_string())
        })?;
        let momenta = self
            .initial_momenta
            .as_ref()
            .ok_or_else(|| Error::InvalidState("initial momenta are not set".to_string()))?;
        check_same_shape(control_points.view(), momenta.view())?;
        Ok((control_points, momenta))
    }

    /// Shoot (if needed) then flow (if needed), rebuilding the trajectories.
    pub fn update(&mut self) -> Result<()> {
        if self.number_of_time_points == 0 {
            return Err(Error::InvalidConfiguration(
                "an exponential needs at least one time point".to_string(),
            ));
        }
        if self.shoot_state == State::Stale {
            self.shoot()?;
            self.flow_state = State::Stale;
        }
        if self.flow_state == State::Stale {
            self.flow()?;
        }
        Ok(())
    }

    fn shoot(&mut self) -> Result<()> {
        let (control_points, momenta) = self.shoot_inputs()?;
        let n = self.number_of_time_points;
        debug!(time_points = n, scheme = ?self.scheme, "shooting");

        let mut control_points_t = Vec::with_capacity(n);
        let mut momenta_t = Vec::with_capacity(n);
        let mut midpoints_t = Vec::new();
        control_points_t.push(control_points.clone());
        momenta_t.push(momenta.clone());

        if n > 1 {
            let dt = T::constant(1.0 / (n - 1) as f64);
            for i in 0..n - 1 {
                let step = self.step(&control_points_t[i], &momenta_t[i], dt)?;
                control_points_t.push(step.control_points);
                momenta_t.push(step.momenta);
                if let Some(midpoint) = step.midpoint {
                    midpoints_t.push(midpoint);
                }
            }
        }

        self.control_points_t = control_points_t;
        self.momenta_t = momenta_t;
        self.midpoints_t = midpoints_t;
        self.shoot_state = State::Fresh;
        Ok(())
    }

    fn flow(&mut self) -> Result<()> {
        let template_data = match self.initial_template_data.as_ref() {
            Some(template_data) => template_data,
            None => {
                self.template_data_t.clear();
                self.flow_state = State::Fresh;
                return Ok(());
            }
        };
        let dimension = self.control_points_t[0].ncols();
        if template_data.ncols() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                got: template_data.ncols(),
            });
        }

        let n = self.number_of_time_points;
        let mut template_data_t = Vec::with_capacity(n);
        template_data_t.push(template_data.clone());

        if n > 1 {
            let dt = T::constant(1.0 / (n - 1) as f64);
            let half = T::constant(0.5 / (n - 1) as f64);
            for i in 0..n - 1 {
                let next = {
                    let x = &template_data_t[i];
                    let velocity =
                        self.kernel
                            .convolve(&self.control_points_t[i], x, &self.momenta_t[i])?;
                    match self.scheme {
                        IntegrationScheme::Euler => axpy(x, dt, &velocity)?,
                        IntegrationScheme::Midpoint => {
                            let (q_mid, p_mid) = self.midpoints_t.get(i).ok_or_else(|| {
                                Error::InvalidState("missing midpoint state".to_string())
                            })?;
                            let x_mid = axpy(x, half, &velocity)?;
                            let velocity_mid = self.kernel.convolve(q_mid, &x_mid, p_mid)?;
                            axpy(x, dt, &velocity_mid)?
                        }
                    }
                };
                template_data_t.push(next);
            }
        }

        self.template_data_t = template_data_t;
        self.flow_state = State::Fresh;
        Ok(())
    }

    /// Advance (q, p) by `dt` along the Hamiltonian flow with the configured scheme
    pub(crate) fn step(&self, q: &Array2<T>, p: &Array2<T>, dt: T) -> Result<Step<T>> {
        let velocity = self.kernel.convolve(q, q, p)?;
        let force = self.kernel.convolve_gradient(p, q)?;
        match self.scheme {
            IntegrationScheme::Euler => Ok(Step {
                control_points: axpy(q, dt, &velocity)?,
                momenta: axpy(p, -dt, &force)?,
                midpoint: None,
            }),
            IntegrationScheme::Midpoint => {
                let half = dt * T::constant(0.5);
                let q_mid = axpy(q, half, &velocity)?;
                let p_mid = axpy(p, -half, &force)?;
                let velocity_mid = self.kernel.convolve(&q_mid, &q_mid, &p_mid)?;
                let force_mid = self.kernel.convolve_gradient(&p_mid, &q_mid)?;
                Ok(Step {
                    control_points: axpy(q, dt, &velocity_mid)?,
                    momenta: axpy(p, -dt, &force_mid)?,
                    midpoint: Some((q_mid, p_mid)),
                })
            }
        }
    }

    fn check_shoot_fresh(&self) -> Result<()> {
        if self.shoot_state == State::Stale {
            return Err(Error::StaleState(
                "exponential was modified and not updated".to_string(),
            ));
        }
        Ok(())
    }

    fn check_flow_fresh(&self) -> Result<()> {
        self.check_shoot_fresh()?;
        if self.flow_state == State::Stale {
            return Err(Error::StaleState(
                "template data was modified and not flowed".to_string(),
            ));
        }
        if self.initial_template_data.is_none() {
            return Err(Error::InvalidState(
                "no template data attached to the exponential".to_string(),
            ));
        }
        Ok(())
    }

    /// Deformed template data at `time_index`
    pub fn get_template_data(&self, time_index: usize) -> Result<&Array2<T>> {
        self.check_flow_fresh()?;
        self.template_data_t
            .get(time_index)
            .ok_or(Error::IndexOutOfRange {
                index: time_index,
                len: self.template_data_t.len(),
            })
    }

    pub fn control_points_trajectory(&self) -> Result<&[Array2<T>]> {
        self.check_shoot_fresh()?;
        Ok(&self.control_points_t)
    }

    pub fn momenta_trajectory(&self) -> Result<&[Array2<T>]> {
        self.check_shoot_fresh()?;
        Ok(&self.momenta_t)
    }

    pub fn template_trajectory(&self) -> Result<&[Array2<T>]> {
        self.check_flow_fresh()?;
        Ok(&self.template_data_t)
    }

    /// Kinetic energy p·K(q, q)p of the initial state
    pub fn get_norm_squared(&self) -> Result<T> {
        let (control_points, momenta) = self.shoot_inputs()?;
        let velocity = self.kernel.convolve(control_points, control_points, momenta)?;
        frobenius_dot(momenta, &velocity)
    }
}

impl<K: Kernel> Exponential<K, f64> {
    /// Parallel transport of `momenta_to_transport` (given at the initial control points)
    /// along the shot trajectory, one vector per time point.
    ///
    /// Jacobi-field scheme: perturbed geodesics are advanced with the
    /// shooting step, the resulting velocity is pulled back to momenta with the kernel matrix,
    /// and the orthogonal part is renormalised at every step.
    pub fn parallel_transport(&self, momenta_to_transport: &Array2<f64>) -> Result<Vec<Array2<f64>>> {
        if self.number_of_time_points < 2 {
            return Err(Error::InvalidState(
                "parallel transport needs at least two time points".to_string(),
            ));
        }
        self.check_shoot_fresh()?;
        let control_points_t = &self.control_points_t;
        let momenta_t = &self.momenta_t;
        check_same_shape(control_points_t[0].view(), momenta_to_transport.view())?;

        let h = 1.0 / (self.number_of_time_points - 1) as f64;
        let epsilon = h;

        // Split off the component along the geodesic momenta, which is transported exactly
        let norm_squared = self.get_norm_squared()?;
        let velocity_0 = self
            .kernel
            .convolve(&control_points_t[0], &control_points_t[0], &momenta_t[0])?;
        let along = if norm_squared > 0.0 {
            frobenius_dot(momenta_to_transport, &velocity_0)? / norm_squared
        } else {
            0.0
        };
        let orthogonal = axpy(momenta_to_transport, -along, &momenta_t[0])?;
        let initial_norm_squared = {
            let k_orthogonal =
                self.kernel
                    .convolve(&control_points_t[0], &control_points_t[0], &orthogonal)?;
            frobenius_dot(&orthogonal, &k_orthogonal)?
        };

        let mut transported = Vec::with_capacity(self.number_of_time_points);
        transported.push(orthogonal);

        for i in 0..self.number_of_time_points - 1 {
            let current = &transported[i];
            let positive = axpy(&momenta_t[i], epsilon, current)?;
            let negative = axpy(&momenta_t[i], -epsilon, current)?;
            let q_positive = self.step(&control_points_t[i], &positive, h)?.control_points;
            let q_negative = self.step(&control_points_t[i], &negative, h)?.control_points;

            let mut approx_velocity = q_positive - &q_negative;
            approx_velocity.mapv_inplace(|v| v / (2.0 * epsilon * h));

            let next_points = &control_points_t[i + 1];
            let kernel_matrix = self.kernel.kernel_matrix(next_points);
            let mut approx_momenta = solve_spd(&kernel_matrix, &approx_velocity)?;

            if norm_squared > 0.0 {
                let geodesic_velocity =
                    self.kernel
                        .convolve(next_points, next_points, &momenta_t[i + 1])?;
                let component = frobenius_dot(&approx_momenta, &geodesic_velocity)? / norm_squared;
                approx_momenta = axpy(&approx_momenta, -component, &momenta_t[i + 1])?;
            }

            let k_approx = kernel_matrix.dot(&approx_momenta);
            let approx_norm_squared = frobenius_dot(&approx_momenta, &k_approx)?;
            if approx_norm_squared > 0.0 && initial_norm_squared > 0.0 {
                approx_momenta = scale(
                    &approx_momenta,
                    (initial_norm_squared / approx_norm_squared).sqrt(),
                );
            }
            transported.push(approx_momenta);
        }

        transported
            .iter()
            .zip(momenta_t.iter())
            .map(|(orthogonal, momenta)| axpy(orthogonal, along, momenta))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::GaussianKernel;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn two_point_exponential(scheme: IntegrationScheme, n: usize) -> Exponential<GaussianKernel> {
        let kernel = GaussianKernel::new(1.0).unwrap();
        let mut exponential = Exponential::new(kernel, scheme);
        exponential.set_initial_control_points(arr2(&[[0.0, 0.0], [1.0, 0.0]]));
        exponential.set_initial_momenta(arr2(&[[0.5, 0.3], [-0.2, 0.6]]));
        exponential.set_initial_template_data(arr2(&[[0.5, 0.5], [0.0, 1.0], [2.0, -1.0]]));
        exponential.set_number_of_time_points(n);
        exponential
    }

    fn hamiltonian(exponential: &Exponential<GaussianKernel>, index: usize) -> f64 {
        let q = &exponential.control_points_trajectory().unwrap()[index];
        let p = &exponential.momenta_trajectory().unwrap()[index];
        let v = exponential.kernel().convolve(q, q, p).unwrap();
        frobenius_dot(p, &v).unwrap()
    }

    #[test]
    fn test_single_time_point_is_initial_state() {
        let mut exponential = two_point_exponential(IntegrationScheme::Midpoint, 1);
        exponential.update().unwrap();

        assert_eq!(exponential.control_points_trajectory().unwrap().len(), 1);
        assert_eq!(
            exponential.get_template_data(0).unwrap(),
            &arr2(&[[0.5, 0.5], [0.0, 1.0], [2.0, -1.0]])
        );
    }

    #[test]
    fn test_zero_time_points_is_rejected() {
        let mut exponential = two_point_exponential(IntegrationScheme::Euler, 0);
        assert!(matches!(
            exponential.update(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_stale_getters_fail() {
        let mut exponential = two_point_exponential(IntegrationScheme::Euler, 5);
        assert!(matches!(
            exponential.get_template_data(0),
            Err(Error::StaleState(_))
        ));

        exponential.update().unwrap();
        assert!(exponential.get_template_data(4).is_ok());

        exponential.set_initial_momenta(arr2(&[[0.0, 0.0], [0.0, 0.0]]));
        assert!(matches!(
            exponential.control_points_trajectory(),
            Err(Error::StaleState(_))
        ));

        exponential.update().unwrap();
        exponential.set_initial_template_data(arr2(&[[0.0, 0.0]]));
        // shooting is still current, only the flow is stale
        assert!(exponential.momenta_trajectory().is_ok());
        assert!(matches!(
            exponential.template_trajectory(),
            Err(Error::StaleState(_))
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut exponential = two_point_exponential(IntegrationScheme::Midpoint, 4);
        exponential.update().unwrap();
        assert!(matches!(
            exponential.get_template_data(4),
            Err(Error::IndexOutOfRange { index: 4, len: 4 })
        ));
    }

    #[test]
    fn test_mismatched_momenta_are_rejected() {
        let mut exponential = two_point_exponential(IntegrationScheme::Euler, 3);
        exponential.set_initial_momenta(arr2(&[[1.0, 0.0]]));
        assert!(matches!(
            exponential.update(),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_midpoint_is_more_accurate_than_euler() {
        let mut reference = two_point_exponential(IntegrationScheme::Midpoint, 2001);
        reference.update().unwrap();
        let exact = reference.get_template_data(2000).unwrap().clone();

        let mut euler = two_point_exponential(IntegrationScheme::Euler, 11);
        euler.update().unwrap();
        let mut midpoint = two_point_exponential(IntegrationScheme::Midpoint, 11);
        midpoint.update().unwrap();

        let err_euler = (euler.get_template_data(10).unwrap() - &exact)
            .mapv(f64::abs)
            .sum();
        let err_midpoint = (midpoint.get_template_data(10).unwrap() - &exact)
            .mapv(f64::abs)
            .sum();

        assert!(
            err_midpoint < err_euler,
            "expected midpoint to be more accurate: {err_midpoint} vs {err_euler}"
        );
    }

    #[test]
    fn test_hamiltonian_is_nearly_conserved() {
        let mut exponential = two_point_exponential(IntegrationScheme::Midpoint, 51);
        exponential.update().unwrap();

        let h0 = exponential.get_norm_squared().unwrap();
        assert_relative_eq!(h0, hamiltonian(&exponential, 0), epsilon = 1e-14);
        for i in 0..51 {
            let h = hamiltonian(&exponential, i);
            assert!((h - h0).abs() < 1e-3 * h0, "H drifted at {i}: {h} vs {h0}");
        }
    }

    #[test]
    fn test_parallel_transport_requires_two_time_points() {
        let mut exponential = two_point_exponential(IntegrationScheme::Midpoint, 1);
        exponential.update().unwrap();
        let v = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        assert!(matches!(
            exponential.parallel_transport(&v),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_parallel_transport_of_zero_is_zero() {
        let mut exponential = two_point_exponential(IntegrationScheme::Midpoint, 11);
        exponential.update().unwrap();

        let transported = exponential
            .parallel_transport(&Array2::zeros((2, 2)))
            .unwrap();
        assert_eq!(transported.len(), 11);
        for vector in transported {
            assert!(vector.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_parallel_transport_of_geodesic_momenta_follows_the_geodesic() {
        let mut exponential = two_point_exponential(IntegrationScheme::Midpoint, 11);
        exponential.update().unwrap();

        let initial = exponential.initial_momenta().unwrap().clone();
        let transported = exponential.parallel_transport(&initial).unwrap();
        let momenta_t = exponential.momenta_trajectory().unwrap();
        for (transported, momenta) in transported.iter().zip(momenta_t) {
            for (a, b) in transported.iter().zip(momenta.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_parallel_transport_preserves_kernel_norm() {
        let mut exponential = two_point_exponential(IntegrationScheme::Midpoint, 21);
        exponential.update().unwrap();

        let vector = arr2(&[[0.1, -0.4], [0.7, 0.2]]);
        let transported = exponential.parallel_transport(&vector).unwrap();
        let control_points_t = exponential.control_points_trajectory().unwrap();
        let kernel = exponential.kernel();

        let norm = |q: &Array2<f64>, w: &Array2<f64>| {
            frobenius_dot(w, &kernel.convolve(q, q, w).unwrap()).unwrap()
        };
        let n0 = norm(&control_points_t[0], &transported[0]);
        assert_relative_eq!(n0, norm(&control_points_t[0], &vector), epsilon = 1e-12);
        for (q, w) in control_points_t.iter().zip(transported.iter()) {
            assert_relative_eq!(norm(q, w), n0, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_parallel_transport_needs_fresh_trajectory() {
        let mut exponential = two_point_exponential(IntegrationScheme::Euler, 5);
        exponential.update().unwrap();
        exponential.set_integration_scheme(IntegrationScheme::Midpoint);
        assert!(matches!(
            exponential.parallel_transport(&Array2::zeros((2, 2))),
            Err(Error::StaleState(_))
        ));
    }
}
