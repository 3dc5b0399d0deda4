//! In-place three-way partitions of one process's piece of the point array.
//!
//! Both partitions return `(first_equal, first_greater)` as offsets into the slice: values before
//! `first_equal` are less than the pivot on the chosen axis, values in
//! `first_equal..first_greater` equal it, and the rest are greater. If no value is greater,
//! `first_greater` is the slice length.

use crate::buffer::Point;

/// Move every point satisfying `pred` to the front, swapping from both ends. Returns the number of
/// points that satisfy it.
#[inline]
fn partition_by(points: &mut [Point], pred: impl Fn(&Point) -> bool) -> usize {
    let mut i = 0;
    let mut j = points.len();
    loop {
        while i < j && pred(&points[i]) {
            i += 1;
        }
        while i < j && !pred(&points[j - 1]) {
            j -= 1;
        }
        if i == j {
            return i;
        }
        points.swap(i, j - 1);
        i += 1;
        j -= 1;
    }
}

/// Partition `points` about the value `t`, which may or may not be present.
pub fn partition_about_other_value(points: &mut [Point], axis: usize, t: f32) -> (usize, usize) {
    let n = points.len();
    let less = partition_by(points, |p| p[axis] < t);
    if less == n {
        // all less than t
        return (n, n);
    }
    let equal = partition_by(&mut points[less..], |p| p[axis] == t);
    (less, less + equal)
}

/// Partition `points` about the value of the point at offset `k` on `axis`.
///
/// The pivot point itself ends up at `first_equal`.
pub fn partition_about_my_value(points: &mut [Point], k: usize, axis: usize) -> (usize, usize) {
    let n = points.len();
    let t = points[k][axis];
    points.swap(0, k);

    let less = partition_by(&mut points[1..], |p| p[axis] < t);
    // The slot just past the values less than t takes the pivot.
    points.swap(0, less);
    if less + 1 == n {
        return (less, n);
    }
    let equal = partition_by(&mut points[less + 1..], |p| p[axis] == t);
    (less, less + 1 + equal)
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn check(points: &[Point], axis: usize, t: f32, (i, j): (usize, usize)) {
        assert!(i <= j && j <= points.len());
        assert!(points[..i].iter().all(|p| p[axis] < t));
        assert!(points[i..j].iter().all(|p| p[axis] == t));
        assert!(points[j..].iter().all(|p| p[axis] > t));
    }

    fn random_points(n: usize, distinct: u32, seed: u64) -> Vec<Point> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                [
                    rng.gen_range(0..distinct) as f32,
                    rng.gen_range(0..distinct) as f32,
                    rng.gen_range(0..distinct) as f32,
                ]
            })
            .collect()
    }

    #[test]
    fn about_my_value() {
        for seed in 0..20 {
            let mut points = random_points(50, 7, seed);
            let k = (seed as usize * 7) % points.len();
            let t = points[k][1];
            let idx = partition_about_my_value(&mut points, k, 1);
            check(&points, 1, t, idx);
            assert_eq!(points[idx.0][1], t);
        }
    }

    #[test]
    fn about_other_value() {
        for seed in 0..20 {
            let mut points = random_points(40, 10, seed);
            let t = seed as f32 / 2.0;
            let idx = partition_about_other_value(&mut points, 2, t);
            check(&points, 2, t, idx);
        }
    }

    #[test]
    fn special_cases() {
        let mut all_less = vec![[1.0, 0.0, 0.0]; 4];
        assert_eq!(partition_about_other_value(&mut all_less, 0, 2.0), (4, 4));

        let mut all_greater = vec![[3.0, 0.0, 0.0]; 4];
        assert_eq!(partition_about_other_value(&mut all_greater, 0, 2.0), (0, 0));

        let mut all_equal = vec![[2.0, 0.0, 0.0]; 4];
        assert_eq!(partition_about_other_value(&mut all_equal, 0, 2.0), (0, 4));
        assert_eq!(partition_about_my_value(&mut all_equal, 3, 0), (0, 4));

        let mut empty: Vec<Point> = vec![];
        assert_eq!(partition_about_other_value(&mut empty, 0, 2.0), (0, 0));

        let mut single = vec![[5.0, 1.0, 1.0]];
        assert_eq!(partition_about_my_value(&mut single, 0, 0), (0, 1));
    }

    #[test]
    fn pivot_is_the_maximum() {
        let mut points = vec![[3.0; 3], [9.0; 3], [1.0; 3], [4.0; 3]];
        assert_eq!(partition_about_my_value(&mut points, 1, 0), (3, 4));
        assert_eq!(points[3], [9.0; 3]);
    }
}
