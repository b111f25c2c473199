use crate::glam::Vec3A;
use crate::ilattice::prelude::Extent;

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub start: Vec3A,
    inverse_velocity: Vec3A,
}

impl Ray {
    pub fn new(start: Vec3A, velocity: Vec3A) -> Self {
        Self {
            start,
            inverse_velocity: 1.0 / velocity,
        }
    }

    /// If the ray intersects box `aabb`, returns `(tmin, tmax)`, the entrance and exit times of the ray, and the axis (0, 1 or
    /// 2) whose slab the ray entered last. That is the axis of the face crossed at `tmin`.
    ///
    /// Implemented as branchless, vectorized "slab method". Does not attempt to handle NaNs properly.
    ///
    /// Refer to [this reference](https://tavianator.com/2015/ray_box_nan.html).
    pub fn cast_at_extent_with_entry_axis(&self, aabb: Extent<Vec3A>) -> Option<([f32; 2], usize)> {
        let blub = aabb.least_upper_bound();

        let t1 = (aabb.minimum - self.start) * self.inverse_velocity;
        let t2 = (blub - self.start) * self.inverse_velocity;

        let near = t1.min(t2);
        let tmin = near.max_element();
        let tmax = t1.max(t2).min_element();

        let entry_axis = if near.x == tmin {
            0
        } else if near.y == tmin {
            1
        } else {
            2
        };

        (tmax >= tmin.max(0.0)).then(|| ([tmin, tmax], entry_axis))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub center: Vec3A,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3A, radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn contains_point(&self, p: Vec3A) -> bool {
        self.center.distance_squared(p) <= self.radius * self.radius
    }

    /// True iff every corner of `extent` lies inside the sphere, which implies the whole box does.
    pub fn contains_extent(&self, extent: Extent<Vec3A>) -> bool {
        let min = extent.minimum;
        let max = extent.least_upper_bound();
        (0..8).all(|corner| {
            let p = Vec3A::new(
                if corner & 1 == 0 { min.x } else { max.x },
                if corner & 2 == 0 { min.y } else { max.y },
                if corner & 4 == 0 { min.z } else { max.z },
            );
            self.contains_point(p)
        })
    }

    pub fn aabb(&self) -> Extent<Vec3A> {
        Extent::from_min_and_shape(Vec3A::splat(-self.radius), Vec3A::splat(2.0 * self.radius))
            + self.center
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
