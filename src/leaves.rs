use crate::collisions::{self, Cup, ImplicitObject};
use crate::grid::FluidGrid;
use crate::parameters::FluidParameters;
use crate::particles::ParticlePool;
use crate::spatial_hash::SpatialHash;
use crate::{Scalar, Vec2};
use rand::Rng;

/// A tea leaf, drawn as a short thick segment and collided as a disc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafParticle {
    pub position: Vec2,
    pub angle: Scalar,
    pub length: Scalar,
    /// 1 when dry, falling to 0 as the leaf soaks
    pub strength: Scalar,
    /// Displacement per step, not per second
    pub velocity: Vec2,
}

impl LeafParticle {
    pub fn new(position: Vec2, angle: Scalar, length: Scalar) -> Self {
        LeafParticle {
            position,
            angle,
            length,
            strength: 1.,
            velocity: Vec2::zeros(),
        }
    }

    /// The two endpoints of the leaf.
    pub fn segment(&self) -> (Vec2, Vec2) {
        let half = Vec2::new(self.angle.cos(), self.angle.sin()) * self.length * 0.5;
        (self.position - half, self.position + half)
    }
}

pub struct LeafPool {
    pub leaves: Vec<LeafParticle>,
    hash: SpatialHash,
    bounds: Vec2,
    gravity: Scalar,
    radius: Scalar,
    restitution: Scalar,
    friction: Scalar,
    settle_pull: Scalar,
    wet_threshold: Scalar,
    soak_rate: Scalar,
    dye_radius: Scalar,
    dye_rate: Scalar,
    base_length: Scalar,
}

impl LeafPool {
    pub fn new(params: &FluidParameters) -> Self {
        LeafPool {
            leaves: Vec::new(),
            hash: SpatialHash::new(Scalar::max(4., params.leaf_radius * 2.)),
            bounds: Vec2::new(params.window_width as Scalar, params.window_height as Scalar),
            gravity: params.gravity,
            radius: params.leaf_radius,
            restitution: params.leaf_restitution,
            friction: params.leaf_friction,
            settle_pull: params.leaf_settle_pull,
            wet_threshold: params.leaf_wet_threshold,
            soak_rate: params.leaf_soak_rate,
            dye_radius: params.leaf_dye_radius,
            dye_rate: params.leaf_dye_rate,
            base_length: params.leaf_length,
        }
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Drops a dry leaf at `position` with a random orientation and length.
    pub fn add_leaf<R: Rng>(&mut self, rng: &mut R, position: Vec2) {
        let angle = rng.gen_range(0.0..std::f32::consts::PI);
        let length = rng.gen_range(self.base_length * 0.7..self.base_length * 1.2);
        self.leaves.push(LeafParticle::new(position, angle, length));
    }

    /// Keeps a leaf inside the cup. A leaf resting on the bottom stops falling and slides
    /// with friction.
    fn clamp_to_cup(&self, cup: &Cup, leaf: &mut LeafParticle) {
        cup.interior_for(self.radius).project(&mut leaf.position);

        if leaf.position.y >= cup.bottom_for(self.radius) - 0.5 {
            leaf.velocity.y = 0.;
            leaf.velocity.x *= self.friction;
        }
    }

    /// Moves every leaf with the local flow, soaks the ones sitting in water (which stain the
    /// droplets around them), then resolves leaf-leaf contacts.
    ///
    /// Reads the grid after advection and masking, so leaves react to what is on screen.
    pub fn step(&mut self, dt: Scalar, grid: &FluidGrid, particles: &mut ParticlePool, cup: &Cup) {
        if self.leaves.is_empty() {
            return;
        }

        let bottom = cup.bottom_for(self.radius);

        for i in 0..self.leaves.len() {
            let mut leaf = self.leaves[i];
            let start = leaf.position;
            let flow = grid.velocity_at(start) * dt;

            leaf.velocity.y += self.gravity * 0.35 * dt;
            leaf.velocity = (leaf.velocity + flow * 0.6) * 0.96;

            leaf.position += leaf.velocity;
            leaf.position.x = leaf.position.x.clamp(0., self.bounds.x);
            leaf.position.y = leaf.position.y.clamp(0., self.bounds.y);

            if leaf.position.y < bottom {
                leaf.velocity.y += self.settle_pull * dt;
            }

            self.clamp_to_cup(cup, &mut leaf);

            if grid.water_at(start) > self.wet_threshold {
                leaf.strength = Scalar::max(0., leaf.strength - self.soak_rate * dt);
                if !particles.is_empty() {
                    particles.stain_near(leaf.position, self.dye_radius, self.dye_rate * dt);
                }
            }

            self.leaves[i] = leaf;
        }

        self.resolve_collisions(cup);
    }

    /// Same pairwise scheme as the droplets, except that every contact also bleeds off
    /// velocity through friction and both leaves are pushed back into the cup.
    pub fn resolve_collisions(&mut self, cup: &Cup) {
        if self.leaves.len() < 2 {
            return;
        }

        self.hash.rebuild(self.leaves.iter().map(|l| l.position));
        let min_dist = self.radius * 2.;

        for i in 0..self.leaves.len() {
            let neighbors = self
                .hash
                .get_neighbors(self.leaves[i].position)
                .filter(|&j| j > i)
                .collect::<smallvec::SmallVec<[usize; 16]>>();

            for j in neighbors {
                let (left, right) = self.leaves.split_at_mut(j);
                let a = &mut left[i];
                let b = &mut right[0];
                let touched = collisions::resolve_pair(
                    (&mut a.position, &mut a.velocity),
                    (&mut b.position, &mut b.velocity),
                    min_dist,
                    self.restitution,
                );
                if !touched {
                    continue;
                }

                a.velocity *= self.friction;
                b.velocity *= self.friction;

                let (mut a, mut b) = (*a, *b);
                self.clamp_to_cup(cup, &mut a);
                self.clamp_to_cup(cup, &mut b);
                self.leaves[i] = a;
                self.leaves[j] = b;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::WaterParticle;
    use rand::{rngs::StdRng, SeedableRng};

    fn setup() -> (FluidParameters, FluidGrid, ParticlePool, LeafPool, Cup) {
        let params = FluidParameters::default();
        let grid = FluidGrid::new(&params);
        let particles = ParticlePool::new(&params);
        let leaves = LeafPool::new(&params);
        let cup = Cup::new(&params);
        (params, grid, particles, leaves, cup)
    }

    #[test]
    fn segment_endpoints() {
        let leaf = LeafParticle::new(Vec2::new(10., 10.), 0., 20.);
        let (a, b) = leaf.segment();
        assert!((a - Vec2::new(0., 10.)).magnitude() < 1e-5);
        assert!((b - Vec2::new(20., 10.)).magnitude() < 1e-5);
    }

    #[test]
    fn random_leaves_are_dry() {
        let (params, _, _, mut leaves, _) = setup();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            leaves.add_leaf(&mut rng, Vec2::new(400., 400.));
        }
        for leaf in &leaves.leaves {
            assert_eq!(leaf.strength, 1.);
            assert!(leaf.angle >= 0. && leaf.angle < std::f32::consts::PI);
            assert!(leaf.length >= params.leaf_length * 0.7);
            assert!(leaf.length < params.leaf_length * 1.2);
        }
    }

    #[test]
    fn leaves_sink_and_rest_on_the_bottom() {
        let (params, grid, mut particles, mut leaves, cup) = setup();
        leaves.leaves.push(LeafParticle::new(Vec2::new(480., 400.), 0., 20.));

        for _ in 0..600 {
            leaves.step(1. / 60., &grid, &mut particles, &cup);
        }

        let leaf = leaves.leaves[0];
        let bottom = cup.bottom_for(params.leaf_radius);
        assert!((leaf.position.y - bottom).abs() < 1.);
        assert_eq!(leaf.velocity.y, 0.);
        assert!((leaf.position - cup.center).magnitude() <= bottom - cup.center.y + 1e-3);
    }

    #[test]
    fn wet_leaf_soaks_and_stains() {
        let (_, mut grid, mut particles, mut leaves, cup) = setup();
        let at = Vec2::new(480., 500.);
        leaves.leaves.push(LeafParticle::new(at, 0., 20.));

        particles.particles.push(WaterParticle {
            position: at + Vec2::new(10., 0.),
            velocity: Vec2::zeros(),
            radius: 4.,
            dye: 0.,
        });
        particles.particles.push(WaterParticle {
            position: at + Vec2::new(60., 0.),
            velocity: Vec2::zeros(),
            radius: 4.,
            dye: 0.,
        });
        particles.resolve_collisions();

        let (gx, gy) = grid.cell_of(at).unwrap();
        let i = grid.index(gx, gy);
        grid.water[i] = 1.;

        leaves.step(0.1, &grid, &mut particles, &cup);

        assert!((leaves.leaves[0].strength - 0.94).abs() < 1e-5);
        assert!((particles.particles[0].dye - 0.14).abs() < 1e-5);
        assert_eq!(particles.particles[1].dye, 0.);
    }

    #[test]
    fn dry_cell_does_not_soak() {
        let (_, grid, mut particles, mut leaves, cup) = setup();
        leaves.leaves.push(LeafParticle::new(Vec2::new(480., 500.), 0., 20.));
        leaves.step(0.1, &grid, &mut particles, &cup);
        assert_eq!(leaves.leaves[0].strength, 1.);
    }

    #[test]
    fn overlapping_leaves_separate_with_friction() {
        let (params, _, _, mut leaves, cup) = setup();
        let mut a = LeafParticle::new(Vec2::new(470., 430.), 0., 20.);
        let mut b = LeafParticle::new(Vec2::new(480., 430.), 0., 20.);
        a.velocity = Vec2::new(1., 0.);
        b.velocity = Vec2::new(0., 1.);
        leaves.leaves.push(a);
        leaves.leaves.push(b);

        leaves.resolve_collisions(&cup);

        let (a, b) = (leaves.leaves[0], leaves.leaves[1]);
        assert!(((b.position - a.position).magnitude() - 2. * params.leaf_radius).abs() < 1e-4);
        // restitution 0: the approaching normal component is removed, then friction
        assert!((a.velocity.x - 0.5 * params.leaf_friction).abs() < 1e-5);
        assert!((b.velocity.x - 0.5 * params.leaf_friction).abs() < 1e-5);
        assert!((b.velocity.y - params.leaf_friction).abs() < 1e-5);
    }
}
