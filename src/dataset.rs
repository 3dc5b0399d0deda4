//! The input seen by the tree: cells reduced to center points, plus named field arrays.

use crate::buffer::Point;
use crate::kdtree::Bounds;

/// A named array of scalar values attached to the cells or points of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldArray {
    /// The array name.
    pub name: String,
    /// One value per cell or point.
    pub values: Vec<f64>,
}

impl FieldArray {
    /// A named array.
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// `[min, max]` of the values, `None` if the array is empty.
    ///
    /// NaN values are ignored.
    pub fn range(&self) -> Option<[f64; 2]> {
        let mut values = self.values.iter().copied().filter(|v| !v.is_nan());
        let first = values.next()?;
        Some(values.fold([first, first], |[lo, hi], v| [lo.min(v), hi.max(v)]))
    }
}

/// One process's piece of the data to be partitioned.
///
/// The tree only ever looks at a cell through its center point, so any geometric representation
/// can be used as long as it can produce one.
pub trait DataSet {
    /// The number of cells.
    fn number_of_cells(&self) -> usize;

    /// The center of `cell`.
    fn cell_center(&self, cell: usize) -> [f64; 3];

    /// The spatial extent of the dataset. [`Bounds::EMPTY`] if it has no cells.
    ///
    /// Defaults to the bounds of the cell centers; datasets whose cells have extent should
    /// return the bounds of the cells themselves.
    fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::EMPTY;
        for cell in 0..self.number_of_cells() {
            let c = self.cell_center(cell);
            for d in 0..3 {
                bounds.min[d] = bounds.min[d].min(c[d]);
                bounds.max[d] = bounds.max[d].max(c[d]);
            }
        }
        bounds
    }

    /// Arrays with one value per cell.
    fn cell_arrays(&self) -> &[FieldArray] {
        &[]
    }

    /// Arrays with one value per point.
    fn point_arrays(&self) -> &[FieldArray] {
        &[]
    }
}

/// The center of `cell` at the precision the tree is built from.
pub(crate) fn cell_point<D: DataSet + ?Sized>(data: &D, cell: usize) -> Point {
    let c = data.cell_center(cell);
    [c[0] as f32, c[1] as f32, c[2] as f32]
}

/// The center of `cell` as placed by the tree: rounded the way it was during the build, so a
/// lookup always lands in the region the cell was counted in.
pub(crate) fn rounded_center<D: DataSet + ?Sized>(data: &D, cell: usize) -> [f64; 3] {
    let p = cell_point(data, cell);
    [p[0] as f64, p[1] as f64, p[2] as f64]
}

/// A dataset whose cells are single points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<[f64; 3]>,
    cell_arrays: Vec<FieldArray>,
    point_arrays: Vec<FieldArray>,
}

impl PointCloud {
    /// A cloud with one cell per point.
    pub fn new(points: Vec<[f64; 3]>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }

    /// Attach an array with one value per cell.
    pub fn with_cell_array(mut self, array: FieldArray) -> Self {
        self.cell_arrays.push(array);
        self
    }

    /// Attach an array with one value per point.
    pub fn with_point_array(mut self, array: FieldArray) -> Self {
        self.point_arrays.push(array);
        self
    }

    /// The points.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }
}

impl DataSet for PointCloud {
    fn number_of_cells(&self) -> usize {
        self.points.len()
    }

    fn cell_center(&self, cell: usize) -> [f64; 3] {
        self.points[cell]
    }

    fn cell_arrays(&self) -> &[FieldArray] {
        &self.cell_arrays
    }

    fn point_arrays(&self) -> &[FieldArray] {
        &self.point_arrays
    }
}
