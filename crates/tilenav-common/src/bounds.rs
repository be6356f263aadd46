//! Axis-aligned bounding box used throughout the navigation pipeline

use glam::{Affine3A, Vec3};

/// Axis-aligned bounding box in 3D space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl BoundingBox {
    /// An inverted box that merges to the first point it sees.
    pub const UNDEFINED: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Creates a box from min/max corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// True once the box has been given at least one point.
    pub fn is_defined(&self) -> bool {
        self.min.x <= self.max.x
    }

    /// Grows the box to contain a point.
    pub fn merge_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grows the box to contain another box.
    pub fn merge(&mut self, other: &BoundingBox) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Expands the box outward by `padding` on every axis.
    pub fn padded(&self, padding: Vec3) -> Self {
        Self {
            min: self.min - padding,
            max: self.max + padding,
        }
    }

    /// Center of the box.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Extent of the box.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Axis-aligned box containing this box after an affine transform.
    pub fn transformed(&self, transform: &Affine3A) -> Self {
        let center = self.center();
        let half = self.size() * 0.5;
        let new_center = transform.transform_point3(center);
        let m = transform.matrix3;
        // Abs of the linear part maps half extents conservatively
        let new_half = Vec3::new(
            m.x_axis.x.abs() * half.x + m.y_axis.x.abs() * half.y + m.z_axis.x.abs() * half.z,
            m.x_axis.y.abs() * half.x + m.y_axis.y.abs() * half.y + m.z_axis.y.abs() * half.z,
            m.x_axis.z.abs() * half.x + m.y_axis.z.abs() * half.y + m.z_axis.z.abs() * half.z,
        );
        Self {
            min: new_center - new_half,
            max: new_center + new_half,
        }
    }

    /// Checks whether two boxes overlap (inclusive).
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        !(self.min.x > other.max.x
            || self.max.x < other.min.x
            || self.min.y > other.max.y
            || self.max.y < other.min.y
            || self.min.z > other.max.z
            || self.max.z < other.min.z)
    }

    /// Checks whether a point lies inside the box (inclusive).
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Distance from a point to the box surface; 0 when inside.
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        let clamped = point.clamp(self.min, self.max);
        (point - clamped).length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_contains() {
        let mut bb = BoundingBox::UNDEFINED;
        assert!(!bb.is_defined());
        bb.merge_point(Vec3::new(1.0, 2.0, 3.0));
        bb.merge_point(Vec3::new(-1.0, 0.0, -3.0));
        assert!(bb.is_defined());
        assert!(bb.contains_point(Vec3::ZERO));
        assert!(!bb.contains_point(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_distance_to_point() {
        let bb = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(bb.distance_to_point(Vec3::splat(0.5)), 0.0);
        assert!((bb.distance_to_point(Vec3::new(2.0, 0.5, 0.5)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_transformed_translation() {
        let bb = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let moved = bb.transformed(&Affine3A::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        assert_eq!(moved.min, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(moved.max, Vec3::new(6.0, 1.0, 1.0));
    }
}
