//! Deformable geometric objects: landmark sets, polylines and triangle meshes.

use ndarray::{s, Array2, ArrayView2, Axis};

use crate::core::{Error, Result, Scalar};

/// Geometric nature of a template object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Unstructured point set
    Landmark,
    /// Segments given as pairs of point indices
    PolyLine,
    /// Triangles given as triples of point indices (3D only)
    SurfaceMesh,
}

impl ObjectKind {
    fn cell_size(&self) -> usize {
        match self {
            ObjectKind::Landmark => 1,
            ObjectKind::PolyLine => 2,
            ObjectKind::SurfaceMesh => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeformableObject {
    name: String,
    kind: ObjectKind,
    points: Array2<f64>,
    connectivity: Array2<usize>,
}

impl DeformableObject {
    pub fn landmark(name: impl Into<String>, points: Array2<f64>) -> Result<Self> {
        let n = points.nrows();
        let connectivity = Array2::from_shape_fn((n, 1), |(i, _)| i);
        Self::new(name, ObjectKind::Landmark, points, connectivity)
    }

    pub fn polyline(
        name: impl Into<String>,
        points: Array2<f64>,
        segments: Array2<usize>,
    ) -> Result<Self> {
        Self::new(name, ObjectKind::PolyLine, points, segments)
    }

    pub fn surface_mesh(
        name: impl Into<String>,
        points: Array2<f64>,
        triangles: Array2<usize>,
    ) -> Result<Self> {
        if points.ncols() != 3 {
            return Err(Error::DimensionMismatch {
                expected: 3,
                got: points.ncols(),
            });
        }
        Self::new(name, ObjectKind::SurfaceMesh, points, triangles)
    }

    fn new(
        name: impl Into<String>,
        kind: ObjectKind,
        points: Array2<f64>,
        connectivity: Array2<usize>,
    ) -> Result<Self> {
        if points.nrows() == 0 {
            return Err(Error::InvalidConfiguration(
                "a deformable object needs at least one point".to_string(),
            ));
        }
        if connectivity.ncols() != kind.cell_size() {
            return Err(Error::DimensionMismatch {
                expected: kind.cell_size(),
                got: connectivity.ncols(),
            });
        }
        if let Some(&index) = connectivity.iter().find(|&&i| i >= points.nrows()) {
            return Err(Error::IndexOutOfRange {
                index,
                len: points.nrows(),
            });
        }
        Ok(DeformableObject {
            name: name.into(),
            kind,
            points,
            connectivity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn points(&self) -> &Array2<f64> {
        &self.points
    }

    pub fn connectivity(&self) -> &Array2<usize> {
        &self.connectivity
    }

    pub fn number_of_points(&self) -> usize {
        self.points.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.points.ncols()
    }

    /// Cell centres and normals of the object placed at `points`.
    ///
    /// Polylines: segment midpoints and tangents `b - a`.
    /// Surface meshes: triangle centroids and area-weighted normals `(b - a) × (c - a) / 2`.
    pub fn centers_and_normals<T: Scalar>(
        &self,
        points: ArrayView2<T>,
    ) -> Result<(Array2<T>, Array2<T>)> {
        if points.dim() != self.points.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.points.nrows(),
                got: points.nrows(),
            });
        }
        let dimension = points.ncols();
        let cells = self.connectivity.nrows();
        let mut centers = Array2::<T>::zeros((cells, dimension));
        let mut normals = Array2::<T>::zeros((cells, dimension));

        match self.kind {
            ObjectKind::Landmark => {
                return Err(Error::InvalidConfiguration(format!(
                    "landmark object '{}' has no cells",
                    self.name
                )))
            }
            ObjectKind::PolyLine => {
                let half = T::constant(0.5);
                for (cell, segment) in self.connectivity.outer_iter().enumerate() {
                    let (a, b) = (points.row(segment[0]), points.row(segment[1]));
                    for c in 0..dimension {
                        centers[[cell, c]] = (a[c] + b[c]) * half;
                        normals[[cell, c]] = b[c] - a[c];
                    }
                }
            }
            ObjectKind::SurfaceMesh => {
                let third = T::constant(1.0 / 3.0);
                let half = T::constant(0.5);
                for (cell, triangle) in self.connectivity.outer_iter().enumerate() {
                    let a = points.row(triangle[0]);
                    let b = points.row(triangle[1]);
                    let c = points.row(triangle[2]);
                    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
                    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
                    normals[[cell, 0]] = (u[1] * v[2] - u[2] * v[1]) * half;
                    normals[[cell, 1]] = (u[2] * v[0] - u[0] * v[2]) * half;
                    normals[[cell, 2]] = (u[0] * v[1] - u[1] * v[0]) * half;
                    for k in 0..3 {
                        centers[[cell, k]] = (a[k] + b[k] + c[k]) * third;
                    }
                }
            }
        }
        Ok((centers, normals))
    }
}

/// Ordered list of objects sharing one concatenated point array
#[derive(Debug, Clone, PartialEq)]
pub struct DeformableMultiObject {
    objects: Vec<DeformableObject>,
}

impl DeformableMultiObject {
    pub fn new(objects: Vec<DeformableObject>) -> Result<Self> {
        let first = objects.first().ok_or_else(|| {
            Error::InvalidConfiguration("a multi-object needs at least one object".to_string())
        })?;
        let dimension = first.dimension();
        if let Some(object) = objects.iter().find(|o| o.dimension() != dimension) {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                got: object.dimension(),
            });
        }
        Ok(DeformableMultiObject { objects })
    }

    pub fn objects(&self) -> &[DeformableObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.objects[0].dimension()
    }

    pub fn number_of_points(&self) -> usize {
        self.objects.iter().map(|o| o.number_of_points()).sum()
    }

    /// Points of every object stacked in order
    pub fn points(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.number_of_points(), self.dimension()));
        let mut start = 0;
        for object in &self.objects {
            let end = start + object.number_of_points();
            out.slice_mut(s![start..end, ..]).assign(object.points());
            start = end;
        }
        out
    }

    /// Cut a concatenated point array back into per-object blocks
    pub fn split_points<T: Clone>(&self, points: &Array2<T>) -> Result<Vec<Array2<T>>> {
        if points.nrows() != self.number_of_points() {
            return Err(Error::DimensionMismatch {
                expected: self.number_of_points(),
                got: points.nrows(),
            });
        }
        if points.ncols() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                got: points.ncols(),
            });
        }
        let mut start = 0;
        Ok(self
            .objects
            .iter()
            .map(|object| {
                let end = start + object.number_of_points();
                let block = points.slice(s![start..end, ..]).to_owned();
                start = end;
                block
            })
            .collect())
    }

    /// Replace every object's points from a concatenated array
    pub fn with_points(&self, points: &Array2<f64>) -> Result<Self> {
        let blocks = self.split_points(points)?;
        let objects = self
            .objects
            .iter()
            .zip(blocks)
            .map(|(object, block)| DeformableObject {
                points: block,
                ..object.clone()
            })
            .collect();
        Ok(DeformableMultiObject { objects })
    }

    /// Per-axis `[min, max]` over all points, one row per axis
    pub fn bounding_box(&self) -> Array2<f64> {
        let points = self.points();
        let mut bounds = Array2::zeros((self.dimension(), 2));
        for (axis, column) in points.axis_iter(Axis(1)).enumerate() {
            let min = column.iter().copied().fold(f64::INFINITY, f64::min);
            let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            bounds[[axis, 0]] = min;
            bounds[[axis, 1]] = max;
        }
        bounds
    }
}
