use crate::buffer::Point;

/// A coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    /// The x axis.
    X,
    /// The y axis.
    Y,
    /// The z axis.
    Z,
}

impl Axis {
    /// All axes, in the order they are tried.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// The coordinate index of this axis.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The axis with coordinate index `i`.
    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }
}

/// An axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Lower corner.
    pub min: [f64; 3],
    /// Upper corner.
    pub max: [f64; 3],
}

impl Bounds {
    /// The bounds of a node whose contents are not known on this process.
    pub const PLACEHOLDER: Bounds = Bounds {
        min: [-1.0; 3],
        max: [-1.0; 3],
    };

    /// An empty box that any point or box extends.
    pub const EMPTY: Bounds = Bounds {
        min: [f64::INFINITY; 3],
        max: [f64::NEG_INFINITY; 3],
    };

    /// A box from its corners.
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// A box from `[xmin, xmax, ymin, ymax, zmin, zmax]`.
    pub fn from_array(b: [f64; 6]) -> Self {
        Self {
            min: [b[0], b[2], b[4]],
            max: [b[1], b[3], b[5]],
        }
    }

    /// `[xmin, xmax, ymin, ymax, zmin, zmax]`.
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.min[0],
            self.max[0],
            self.min[1],
            self.max[1],
            self.min[2],
            self.max[2],
        ]
    }

    /// The degenerate box holding exactly `p`.
    pub fn around_point(p: &Point) -> Self {
        let c = [p[0] as f64, p[1] as f64, p[2] as f64];
        Self { min: c, max: c }
    }

    /// Whether no point was ever added.
    pub fn is_empty(&self) -> bool {
        (0..3).any(|d| self.min[d] > self.max[d])
    }

    /// Grow to include `p`.
    #[inline]
    pub fn extend_point(&mut self, p: &Point) {
        for d in 0..3 {
            let v = p[d] as f64;
            if v < self.min[d] {
                self.min[d] = v;
            }
            if v > self.max[d] {
                self.max[d] = v;
            }
        }
    }

    /// Grow to include `other`.
    pub fn extend(&mut self, other: &Bounds) {
        for d in 0..3 {
            self.min[d] = self.min[d].min(other.min[d]);
            self.max[d] = self.max[d].max(other.max[d]);
        }
    }

    /// Width along `axis`.
    #[inline]
    pub fn extent(&self, axis: Axis) -> f64 {
        self.max[axis.index()] - self.min[axis.index()]
    }

    /// Whether `p` lies inside or on the boundary.
    pub fn contains(&self, p: &[f64; 3]) -> bool {
        (0..3).all(|d| p[d] >= self.min[d] && p[d] <= self.max[d])
    }

    /// Whether `p` lies on one of the six faces.
    pub fn on_boundary(&self, p: &[f64; 3]) -> bool {
        self.contains(p) && (0..3).any(|d| p[d] == self.min[d] || p[d] == self.max[d])
    }

    /// Cut at `coord` perpendicular to `axis`.
    pub fn split(&self, axis: Axis, coord: f64) -> (Bounds, Bounds) {
        let mut left = *self;
        let mut right = *self;
        left.max[axis.index()] = coord;
        right.min[axis.index()] = coord;
        (left, right)
    }

    /// Whether the two boxes share any point.
    pub fn intersects(&self, other: &Bounds) -> bool {
        (0..3).all(|d| self.min[d] <= other.max[d] && other.min[d] <= self.max[d])
    }

    /// The center of the box.
    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_shares_the_cut_plane() {
        let b = Bounds::new([0.0; 3], [10.0, 20.0, 30.0]);
        let (l, r) = b.split(Axis::Y, 5.0);
        assert_eq!(l.max, [10.0, 5.0, 30.0]);
        assert_eq!(r.min, [0.0, 5.0, 0.0]);
        assert_eq!(l.min, b.min);
        assert_eq!(r.max, b.max);
    }

    #[test]
    fn extend_from_empty() {
        let mut b = Bounds::EMPTY;
        assert!(b.is_empty());
        b.extend_point(&[1.0, -2.0, 3.0]);
        b.extend_point(&[0.0, 4.0, 3.0]);
        assert_eq!(b, Bounds::new([0.0, -2.0, 3.0], [1.0, 4.0, 3.0]));
        assert_eq!(Bounds::from_array(b.to_array()), b);
        assert_eq!(b.extent(Axis::Z), 0.0);
    }

    #[test]
    fn boundary_points() {
        let b = Bounds::new([0.0; 3], [1.0; 3]);
        assert!(b.on_boundary(&[1.0, 0.5, 0.5]));
        assert!(b.on_boundary(&[0.0, 0.0, 0.0]));
        assert!(!b.on_boundary(&[0.5, 0.5, 0.5]));
        assert!(!b.on_boundary(&[1.5, 1.0, 0.5]));
    }

    #[test]
    fn axis_indices() {
        for (i, axis) in Axis::ALL.into_iter().enumerate() {
            assert_eq!(axis.index(), i);
            assert_eq!(Axis::from_index(i), Some(axis));
        }
        assert_eq!(Axis::from_index(3), None);
    }
}
