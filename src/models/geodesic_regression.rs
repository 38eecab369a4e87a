use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{s, Array1, Array2};
use tracing::{debug, info};

use crate::algorithms::optimization::{FixedEffects, LogLikelihood, StatisticalModel};
use crate::attachments::{DeformableMultiObject, MultiObjectAttachment};
use crate::core::linalg::lift;
use crate::core::{DeformationConfig, Error, Kernel, Result, Scalar, Tape, Var};
use crate::deformations::Geodesic;
use crate::io::write_2d_array;
use crate::kernels::GaussianKernel;

pub const TEMPLATE_DATA: &str = "TemplateData";
pub const CONTROL_POINTS: &str = "ControlPoints";
pub const MOMENTA: &str = "Momenta";

/// Observations of one subject at increasing ages
#[derive(Debug, Clone)]
pub struct TimeSeriesDataset {
    times: Vec<f64>,
    targets: Vec<DeformableMultiObject>,
}

impl TimeSeriesDataset {
    pub fn new(times: Vec<f64>, targets: Vec<DeformableMultiObject>) -> Result<Self> {
        if times.is_empty() {
            return Err(Error::InvalidConfiguration(
                "a time series needs at least one observation".to_string(),
            ));
        }
        if times.len() != targets.len() {
            return Err(Error::DimensionMismatch {
                expected: times.len(),
                got: targets.len(),
            });
        }
        if let Some(time) = times.iter().find(|t| !t.is_finite()) {
            return Err(Error::InvalidConfiguration(format!(
                "observation time {time} is not finite"
            )));
        }
        Ok(TimeSeriesDataset { times, targets })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn targets(&self) -> &[DeformableMultiObject] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Time span covered by the observations and the reference time `t0`
    pub fn time_bounds(&self, t0: f64) -> (f64, f64) {
        let tmin = self.times.iter().copied().fold(t0, f64::min);
        let tmax = self.times.iter().copied().fold(t0, f64::max);
        (tmin, tmax)
    }
}

/// Geodesic regression: one template, deformed along one geodesic, fitted to a time series.
///
/// The objective is `-Σ_t weighted_distance(φ_t(template), target_t) - |v_0|²`, where `φ_t`
/// is the flow of the geodesic shot from the control points and momenta at `t0`.
#[derive(Debug, Clone)]
pub struct GeodesicRegression<K = GaussianKernel> {
    name: String,
    template: DeformableMultiObject,
    attachment: MultiObjectAttachment,
    kernel: K,
    config: DeformationConfig,

    control_points: Array2<f64>,
    momenta: Array2<f64>,

    freeze_template: bool,
    freeze_control_points: bool,
    smoothing_kernel: Option<GaussianKernel>,
    output_dir: Option<PathBuf>,
}

impl<K: Kernel + Clone> GeodesicRegression<K> {
    /// Build the model with control points on a regular grid and zero momenta.
    pub fn new(
        name: impl Into<String>,
        template: DeformableMultiObject,
        attachment: MultiObjectAttachment,
        kernel: K,
        config: DeformationConfig,
    ) -> Result<Self> {
        config.validate()?;
        if template.dimension() != config.dimension {
            return Err(Error::DimensionMismatch {
                expected: config.dimension,
                got: template.dimension(),
            });
        }
        if attachment.norms().len() != template.len() {
            return Err(Error::DimensionMismatch {
                expected: template.len(),
                got: attachment.norms().len(),
            });
        }

        let control_points = regular_grid(&template.bounding_box(), config.cp_spacing())?;
        let momenta = Array2::zeros(control_points.dim());
        info!(
            control_points = control_points.nrows(),
            "set of control points defined"
        );

        Ok(GeodesicRegression {
            name: name.into(),
            template,
            attachment,
            kernel,
            config,
            control_points,
            momenta,
            freeze_template: false,
            freeze_control_points: false,
            smoothing_kernel: None,
            output_dir: None,
        })
    }

    /// Replace the initial control points; momenta are reset to zero.
    pub fn with_control_points(mut self, control_points: Array2<f64>) -> Result<Self> {
        if control_points.ncols() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                got: control_points.ncols(),
            });
        }
        self.momenta = Array2::zeros(control_points.dim());
        self.control_points = control_points;
        Ok(self)
    }

    pub fn with_momenta(mut self, momenta: Array2<f64>) -> Result<Self> {
        if momenta.dim() != self.control_points.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.control_points.nrows(),
                got: momenta.nrows(),
            });
        }
        self.momenta = momenta;
        Ok(self)
    }

    pub fn freeze_template(mut self, freeze: bool) -> Self {
        self.freeze_template = freeze;
        self
    }

    pub fn freeze_control_points(mut self, freeze: bool) -> Self {
        self.freeze_control_points = freeze;
        self
    }

    /// Smooth the template gradient with a Gaussian kernel of this width
    pub fn with_smoothing_kernel_width(mut self, width: f64) -> Result<Self> {
        self.smoothing_kernel = Some(GaussianKernel::new(width)?);
        Ok(self)
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &DeformableMultiObject {
        &self.template
    }

    pub fn template_data(&self) -> Array2<f64> {
        self.template.points()
    }

    pub fn control_points(&self) -> &Array2<f64> {
        &self.control_points
    }

    pub fn momenta(&self) -> &Array2<f64> {
        &self.momenta
    }

    pub fn config(&self) -> &DeformationConfig {
        &self.config
    }

    /// Template data, control points and momenta, frozen ones taken from the model
    fn unpack(&self, fixed_effects: &FixedEffects) -> Result<(Array2<f64>, Array2<f64>, Array2<f64>)> {
        let template_data = if self.freeze_template {
            self.template.points()
        } else {
            reshape(fixed_effects, TEMPLATE_DATA, self.template.points().dim())?
        };
        let control_points = if self.freeze_control_points {
            self.control_points.clone()
        } else {
            reshape(fixed_effects, CONTROL_POINTS, self.control_points.dim())?
        };
        let momenta = reshape(fixed_effects, MOMENTA, self.momenta.dim())?;
        Ok((template_data, control_points, momenta))
    }

    fn geodesic<T: Scalar>(
        &self,
        dataset: &TimeSeriesDataset,
        template_data: &Array2<T>,
        control_points: &Array2<T>,
        momenta: &Array2<T>,
    ) -> Result<Geodesic<K, T>> {
        let (tmin, tmax) = dataset.time_bounds(self.config.t0);
        let mut geodesic = Geodesic::new(self.kernel.clone(), &self.config);
        geodesic.set_tmin(tmin);
        geodesic.set_tmax(tmax);
        geodesic.set_control_points_t0(control_points.clone());
        geodesic.set_momenta_t0(momenta.clone());
        geodesic.set_template_data_t0(template_data.clone());
        geodesic.update()?;
        Ok(geodesic)
    }

    /// (attachment, regularity) for any scalar type
    fn attachment_and_regularity<T: Scalar>(
        &self,
        dataset: &TimeSeriesDataset,
        template_data: &Array2<T>,
        control_points: &Array2<T>,
        momenta: &Array2<T>,
    ) -> Result<(T, T)> {
        let geodesic = self.geodesic(dataset, template_data, control_points, momenta)?;
        let regularity = -geodesic.get_norm_squared()?;

        let mut attachment = T::zero();
        for (&time, target) in dataset.times().iter().zip(dataset.targets()) {
            let deformed = geodesic.get_template_data(time)?;
            attachment -= self
                .attachment
                .weighted_distance(deformed, &self.template, target)?;
        }
        Ok((attachment, regularity))
    }

    /// Convolve the template gradient with the smoothing kernel, object by object
    fn smooth_template_gradient(
        &self,
        template_data: &Array2<f64>,
        gradient: Array2<f64>,
    ) -> Result<Array2<f64>> {
        let kernel = match self.smoothing_kernel.as_ref() {
            Some(kernel) => kernel,
            None => return Ok(gradient),
        };
        let points = self.template.split_points(template_data)?;
        let blocks = self.template.split_points(&gradient)?;
        let mut smoothed = Array2::zeros(gradient.dim());
        let mut start = 0;
        for (points, block) in points.iter().zip(blocks.iter()) {
            let end = start + points.nrows();
            let convolved = kernel.convolve(points, points, block)?;
            smoothed.slice_mut(s![start..end, ..]).assign(&convolved);
            start = end;
        }
        Ok(smoothed)
    }
}

impl<K: Kernel + Clone> StatisticalModel for GeodesicRegression<K> {
    type Dataset = TimeSeriesDataset;

    fn fixed_effects(&self) -> FixedEffects {
        let mut fixed_effects = FixedEffects::new();
        if !self.freeze_template {
            fixed_effects.insert(TEMPLATE_DATA.to_string(), flatten(&self.template.points()));
        }
        if !self.freeze_control_points {
            fixed_effects.insert(CONTROL_POINTS.to_string(), flatten(&self.control_points));
        }
        fixed_effects.insert(MOMENTA.to_string(), flatten(&self.momenta));
        fixed_effects
    }

    fn compute_log_likelihood(
        &self,
        dataset: &TimeSeriesDataset,
        fixed_effects: &FixedEffects,
        with_grad: bool,
    ) -> Result<LogLikelihood> {
        let (template_data, control_points, momenta) = self.unpack(fixed_effects)?;

        if !with_grad {
            let (attachment, regularity) =
                self.attachment_and_regularity(dataset, &template_data, &control_points, &momenta)?;
            return Ok(LogLikelihood::new(attachment, regularity));
        }

        let tape = Tape::new();
        let template_vars: Array2<Var<'_>> = if self.freeze_template {
            lift(&template_data)
        } else {
            tape.variables(&template_data)
        };
        let control_point_vars: Array2<Var<'_>> = if self.freeze_control_points {
            lift(&control_points)
        } else {
            tape.variables(&control_points)
        };
        let momenta_vars = tape.variables(&momenta);

        let (attachment, regularity) = self.attachment_and_regularity(
            dataset,
            &template_vars,
            &control_point_vars,
            &momenta_vars,
        )?;
        let total = attachment + regularity;
        let adjoints = total.gradient();
        debug!(nodes = tape.len(), "log-likelihood gradient computed");

        let mut gradient = FixedEffects::new();
        if !self.freeze_template {
            let raw = adjoints.wrt_array(&template_vars);
            let smoothed = self.smooth_template_gradient(&template_data, raw)?;
            gradient.insert(TEMPLATE_DATA.to_string(), flatten(&smoothed));
        }
        if !self.freeze_control_points {
            gradient.insert(
                CONTROL_POINTS.to_string(),
                flatten(&adjoints.wrt_array(&control_point_vars)),
            );
        }
        gradient.insert(MOMENTA.to_string(), flatten(&adjoints.wrt_array(&momenta_vars)));

        Ok(LogLikelihood::new(attachment.value(), regularity.value()).with_gradient(gradient))
    }

    fn set_fixed_effects(&mut self, fixed_effects: &FixedEffects) -> Result<()> {
        let (template_data, control_points, momenta) = self.unpack(fixed_effects)?;
        if !self.freeze_template {
            self.template = self.template.with_points(&template_data)?;
        }
        self.control_points = control_points;
        self.momenta = momenta;
        Ok(())
    }

    fn write(&self, dataset: &TimeSeriesDataset) -> Result<()> {
        let output_dir = match self.output_dir.as_ref() {
            Some(dir) => dir,
            None => {
                debug!("no output directory configured, skipping write");
                return Ok(());
            }
        };
        fs::create_dir_all(output_dir)?;
        self.write_parameters(output_dir)?;

        let template_data = self.template.points();
        let geodesic = self.geodesic(dataset, &template_data, &self.control_points, &self.momenta)?;
        geodesic.write_flow(
            &format!("{}__GeodesicFlow", self.name),
            &self.template,
            output_dir,
        )
    }
}

impl<K: Kernel + Clone> GeodesicRegression<K> {
    fn write_parameters(&self, output_dir: &Path) -> Result<()> {
        let root = format!("{}__EstimatedParameters", self.name);
        for object in self.template.objects() {
            write_2d_array(
                &output_dir.join(format!("{root}__Template_{}.txt", object.name())),
                object.points(),
            )?;
        }
        write_2d_array(
            &output_dir.join(format!("{root}__ControlPoints.txt")),
            &self.control_points,
        )?;
        write_2d_array(
            &output_dir.join(format!("{root}__Momenta.txt")),
            &self.momenta,
        )
    }
}

fn flatten(array: &Array2<f64>) -> Array1<f64> {
    array.iter().copied().collect()
}

fn reshape(fixed_effects: &FixedEffects, key: &str, shape: (usize, usize)) -> Result<Array2<f64>> {
    let flat = fixed_effects
        .get(key)
        .ok_or_else(|| Error::InvalidState(format!("missing fixed effect '{key}'")))?;
    if flat.len() != shape.0 * shape.1 {
        return Err(Error::DimensionMismatch {
            expected: shape.0 * shape.1,
            got: flat.len(),
        });
    }
    Array2::from_shape_vec(shape, flat.to_vec()).map_err(|e| Error::InvalidState(e.to_string()))
}

/// Regular grid covering `bounds` (one `[min, max]` row per axis), centred in each direction
pub fn regular_grid(bounds: &Array2<f64>, spacing: f64) -> Result<Array2<f64>> {
    let dimension = bounds.nrows();
    if dimension != 2 && dimension != 3 {
        return Err(Error::InvalidConfiguration(format!(
            "control point grids are defined in 2D or 3D, got dimension {dimension}"
        )));
    }

    let axes: Vec<Vec<f64>> = bounds
        .outer_iter()
        .map(|bound| {
            let (min, max) = (bound[0], bound[1]);
            let length = max - min;
            let offset = 0.5 * (length - spacing * (length / spacing).floor());
            let count = ((length - offset) / spacing + 1e-10).floor() as usize + 1;
            (0..count).map(|i| min + offset + spacing * i as f64).collect()
        })
        .collect();

    let mut points = Vec::new();
    match dimension {
        2 => {
            for &y in &axes[1] {
                for &x in &axes[0] {
                    points.extend([x, y]);
                }
            }
        }
        _ => {
            for &y in &axes[1] {
                for &x in &axes[0] {
                    for &z in &axes[2] {
                        points.extend([x, y, z]);
                    }
                }
            }
        }
    }
    let rows = points.len() / dimension;
    Array2::from_shape_vec((rows, dimension), points).map_err(|e| Error::InvalidState(e.to_string()))
}
