use ndarray::{Array2, ArrayView2};

use crate::attachments::objects::{DeformableMultiObject, DeformableObject, ObjectKind};
use crate::core::linalg::{dot, frobenius_dot, lift, squared_distance};
use crate::core::{Error, Kernel, NormKind, ObjectConfig, Result, Scalar};
use crate::kernels::GaussianKernel;

/// How one object of the template is compared with its target
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectNorm<K> {
    pub kind: NormKind,
    pub kernel: K,
    pub noise_variance: f64,
}

/// Data-fit term between a deformed multi-object and a target multi-object
#[derive(Debug, Clone, PartialEq)]
pub struct MultiObjectAttachment<K = GaussianKernel> {
    norms: Vec<ObjectNorm<K>>,
}

impl MultiObjectAttachment<GaussianKernel> {
    /// Gaussian attachment kernels built from per-object settings
    pub fn from_specifications(specifications: &[ObjectConfig]) -> Result<Self> {
        let norms = specifications
            .iter()
            .map(|object| {
                if !(object.noise_variance() > 0.0) {
                    return Err(Error::InvalidConfiguration(format!(
                        "noise std of object '{}' must be positive",
                        object.name
                    )));
                }
                Ok(ObjectNorm {
                    kind: object.norm,
                    kernel: GaussianKernel::new(object.kernel_width)?,
                    noise_variance: object.noise_variance(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MultiObjectAttachment { norms })
    }
}

impl<K: Kernel> MultiObjectAttachment<K> {
    pub fn new(norms: Vec<ObjectNorm<K>>) -> Self {
        MultiObjectAttachment { norms }
    }

    pub fn norms(&self) -> &[ObjectNorm<K>] {
        &self.norms
    }

    /// Sum of the per-object distances between the template placed at `points` and `target`
    pub fn distance<T: Scalar>(
        &self,
        points: &Array2<T>,
        template: &DeformableMultiObject,
        target: &DeformableMultiObject,
    ) -> Result<T> {
        let mut total = T::zero();
        for d in self.object_distances(points, template, target)? {
            total += d;
        }
        Ok(total)
    }

    /// Sum of the per-object distances, each divided by its noise variance
    pub fn weighted_distance<T: Scalar>(
        &self,
        points: &Array2<T>,
        template: &DeformableMultiObject,
        target: &DeformableMultiObject,
    ) -> Result<T> {
        let mut total = T::zero();
        let distances = self.object_distances(points, template, target)?;
        for (d, norm) in distances.into_iter().zip(self.norms.iter()) {
            total += d / T::constant(norm.noise_variance);
        }
        Ok(total)
    }

    fn object_distances<T: Scalar>(
        &self,
        points: &Array2<T>,
        template: &DeformableMultiObject,
        target: &DeformableMultiObject,
    ) -> Result<Vec<T>> {
        if template.len() != target.len() {
            return Err(Error::DimensionMismatch {
                expected: template.len(),
                got: target.len(),
            });
        }
        if self.norms.len() != template.len() {
            return Err(Error::DimensionMismatch {
                expected: self.norms.len(),
                got: template.len(),
            });
        }

        let blocks = template.split_points(points)?;
        template
            .objects()
            .iter()
            .zip(target.objects().iter())
            .zip(blocks.iter())
            .zip(self.norms.iter())
            .map(|(((source, target), block), norm)| {
                if source.kind() != target.kind() {
                    return Err(Error::TypeMismatch(format!(
                        "cannot compare {:?} '{}' with {:?} '{}'",
                        source.kind(),
                        source.name(),
                        target.kind(),
                        target.name()
                    )));
                }
                let d = object_distance(norm, source, block.view(), target)?;
                // roundoff can leave a tiny negative value
                Ok(if d.value() < 0.0 { T::zero() } else { d })
            })
            .collect()
    }
}

type InnerProduct<K, T> =
    fn(&K, &Array2<T>, &Array2<T>, &Array2<T>, &Array2<T>) -> Result<T>;

fn object_distance<K: Kernel, T: Scalar>(
    norm: &ObjectNorm<K>,
    source: &DeformableObject,
    points: ArrayView2<T>,
    target: &DeformableObject,
) -> Result<T> {
    match norm.kind {
        NormKind::Landmark => landmark_distance(points, target.points().view()),
        NormKind::Current | NormKind::Varifold => {
            if source.kind() == ObjectKind::Landmark {
                return Err(Error::InvalidConfiguration(format!(
                    "{:?} norm is undefined on landmark object '{}'",
                    norm.kind,
                    source.name()
                )));
            }
            let (c_s, n_s) = source.centers_and_normals(points)?;
            let (c_t, n_t) = target.centers_and_normals(target.points().view())?;
            let (c_t, n_t) = (lift::<T>(&c_t), lift::<T>(&n_t));

            let product: InnerProduct<K, T> = match norm.kind {
                NormKind::Current => current_product::<K, T>,
                _ => varifold_product::<K, T>,
            };
            let ss = product(&norm.kernel, &c_s, &n_s, &c_s, &n_s)?;
            let tt = product(&norm.kernel, &c_t, &n_t, &c_t, &n_t)?;
            let st = product(&norm.kernel, &c_s, &n_s, &c_t, &n_t)?;
            Ok(ss + tt - st * T::constant(2.0))
        }
    }
}

fn landmark_distance<T: Scalar>(points: ArrayView2<T>, target: ArrayView2<f64>) -> Result<T> {
    if points.dim() != target.dim() {
        return Err(Error::DimensionMismatch {
            expected: target.nrows(),
            got: points.nrows(),
        });
    }
    let mut total = T::zero();
    for (&x, &y) in points.iter().zip(target.iter()) {
        let d = x - T::constant(y);
        total += d * d;
    }
    Ok(total)
}

/// ⟨S, T⟩ = Σ_ij k(c_i, c'_j) n_i·n'_j
fn current_product<K: Kernel, T: Scalar>(
    kernel: &K,
    centers_a: &Array2<T>,
    normals_a: &Array2<T>,
    centers_b: &Array2<T>,
    normals_b: &Array2<T>,
) -> Result<T> {
    let field = kernel.convolve(centers_b, centers_a, normals_b)?;
    frobenius_dot(normals_a, &field)
}

/// ⟨S, T⟩ = Σ_ij k(c_i, c'_j) (n_i·n'_j)² / (|n_i| |n'_j|)
fn varifold_product<K: Kernel, T: Scalar>(
    kernel: &K,
    centers_a: &Array2<T>,
    normals_a: &Array2<T>,
    centers_b: &Array2<T>,
    normals_b: &Array2<T>,
) -> Result<T> {
    if centers_a.ncols() != centers_b.ncols() {
        return Err(Error::DimensionMismatch {
            expected: centers_a.ncols(),
            got: centers_b.ncols(),
        });
    }
    let lengths = |normals: &Array2<T>| -> Vec<T> {
        normals
            .outer_iter()
            .map(|n| dot(n.view(), n.view()).sqrt())
            .collect()
    };
    let (lengths_a, lengths_b) = (lengths(normals_a), lengths(normals_b));

    let mut total = T::zero();
    for i in 0..centers_a.nrows() {
        if lengths_a[i].value() == 0.0 {
            continue;
        }
        for j in 0..centers_b.nrows() {
            if lengths_b[j].value() == 0.0 {
                continue;
            }
            let k = kernel.profile(squared_distance(centers_a.row(i), centers_b.row(j)));
            let d = dot(normals_a.row(i), normals_b.row(j));
            total += k * d * d / (lengths_a[i] * lengths_b[j]);
        }
    }
    Ok(total)
}
