use crate::parameters::FluidParameters;
use crate::{Scalar, Vec2};

/// An object represented implicitly by a signed distance field.
pub trait ImplicitObject {
    fn signed_distance(&self, x: Vec2) -> Scalar;

    fn normal(&self, x: Vec2) -> Vec2;

    /// Pushes `x` back onto the surface if it has ended up outside. Returns the outward
    /// normal at the contact, or `None` if `x` was already inside.
    fn project(&self, x: &mut Vec2) -> Option<Vec2> {
        let phi = self.signed_distance(*x);
        if phi > 0. {
            let n = self.normal(*x);
            *x -= phi * n;
            Some(n)
        } else {
            None
        }
    }
}

/// A solid disc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Vec2,
    pub radius: Scalar,
}

impl ImplicitObject for Circle {
    fn signed_distance(&self, x: Vec2) -> Scalar {
        (x - self.center).magnitude() - self.radius
    }

    /// A point exactly at the center has no well-defined normal; `+x` is used.
    fn normal(&self, x: Vec2) -> Vec2 {
        let d = x - self.center;
        let dist = d.magnitude();
        if dist == 0. {
            Vec2::x()
        } else {
            d / dist
        }
    }
}

/// The circular cup the tea lives in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cup {
    pub center: Vec2,
    /// Outer radius, including the wall
    pub radius: Scalar,
    pub wall: Scalar,
}

impl Cup {
    pub fn new(params: &FluidParameters) -> Self {
        Cup {
            center: params.cup_center(),
            radius: params.cup_radius(),
            wall: params.cup_wall,
        }
    }

    /// Radius of the inside of the cup.
    pub fn interior_radius(&self) -> Scalar {
        Scalar::max(0., self.radius - self.wall)
    }

    /// The region the center of a body of radius `r` is confined to.
    pub fn interior_for(&self, r: Scalar) -> Circle {
        Circle {
            center: self.center,
            radius: Scalar::max(0., self.radius - self.wall - r),
        }
    }

    /// Lowest point (largest y) the center of a body of radius `r` can reach.
    pub fn bottom_for(&self, r: Scalar) -> Scalar {
        self.center.y + self.interior_for(r).radius
    }
}

/// Keeps a body of radius `r` inside the cup. If it was pushed back, the outward normal
/// component of its velocity is reflected, scaled by `restitution`.
pub fn confine_to_cup(
    cup: &Cup,
    r: Scalar,
    restitution: Scalar,
    position: &mut Vec2,
    velocity: &mut Vec2,
) -> bool {
    match cup.interior_for(r).project(position) {
        Some(n) => {
            let vn = velocity.dot(&n);
            if vn > 0. {
                *velocity -= (1. + restitution) * vn * n;
            }
            true
        }
        None => false,
    }
}

/// Separates two overlapping discs 50/50 along the line between their centers and, if
/// they are approaching, exchanges an impulse with the given restitution. Returns `false`
/// if they did not touch (or are too close to each other to define a normal).
pub fn resolve_pair(
    (xi, vi): (&mut Vec2, &mut Vec2),
    (xj, vj): (&mut Vec2, &mut Vec2),
    min_dist: Scalar,
    restitution: Scalar,
) -> bool {
    let d = *xj - *xi;
    let dist2 = d.magnitude_squared();
    if dist2 <= 1e-4 || dist2 >= min_dist * min_dist {
        return false;
    }

    let dist = dist2.sqrt();
    let n = d / dist;
    let overlap = min_dist - dist;
    *xi -= n * overlap * 0.5;
    *xj += n * overlap * 0.5;

    let vn = (*vj - *vi).dot(&n);
    if vn < 0. {
        let impulse = -(1. + restitution) * vn * 0.5;
        *vi -= impulse * n;
        *vj += impulse * n;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circle_projection() {
        let circle = Circle {
            center: Vec2::new(10., 10.),
            radius: 5.,
        };
        let mut x = Vec2::new(10., 20.);
        let n = circle.project(&mut x).unwrap();
        assert!((x - Vec2::new(10., 15.)).magnitude() < 1e-5);
        assert!((n - Vec2::new(0., 1.)).magnitude() < 1e-5);

        let mut inside = Vec2::new(11., 11.);
        assert!(circle.project(&mut inside).is_none());
        assert_eq!(inside, Vec2::new(11., 11.));
    }

    #[test]
    fn confine_reflects_outward_velocity() {
        let cup = Cup {
            center: Vec2::zeros(),
            radius: 100.,
            wall: 10.,
        };
        let mut x = Vec2::new(0., 95.);
        let mut v = Vec2::new(3., 10.);
        assert!(confine_to_cup(&cup, 4., 0.5, &mut x, &mut v));
        assert!((x.y - 86.).abs() < 1e-4);
        assert!((v.y + 5.).abs() < 1e-4);
        assert!((v.x - 3.).abs() < 1e-4);
    }

    #[test]
    fn confine_keeps_inward_velocity() {
        let cup = Cup {
            center: Vec2::zeros(),
            radius: 100.,
            wall: 10.,
        };
        let mut x = Vec2::new(0., 95.);
        let mut v = Vec2::new(0., -10.);
        assert!(confine_to_cup(&cup, 4., 0.5, &mut x, &mut v));
        assert_eq!(v, Vec2::new(0., -10.));
    }

    #[test]
    fn pair_restitution() {
        let (mut xi, mut vi) = (Vec2::new(0., 0.), Vec2::new(2., 0.));
        let (mut xj, mut vj) = (Vec2::new(7., 0.), Vec2::new(-2., 0.));
        assert!(resolve_pair((&mut xi, &mut vi), (&mut xj, &mut vj), 8., 0.5));

        assert!(((xj - xi).magnitude() - 8.).abs() < 1e-5);
        // relative normal velocity -4 becomes +2
        assert!(((vj - vi).x - 2.).abs() < 1e-5);
        // momentum is conserved
        assert!((vi + vj).magnitude() < 1e-5);
    }
}
