use crate::collisions::{self, Cup};
use crate::parameters::{CapacityPolicy, FluidParameters};
use crate::spatial_hash::SpatialHash;
use crate::{Scalar, Vec2};
use rand::Rng;

/// A free droplet of water.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterParticle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: Scalar,
    /// How much tea this droplet carries, in `[0, 1]`
    pub dye: Scalar,
}

/// Contains all of the droplets, plus the spatial hash used to find their neighbors.
///
/// The hash is rebuilt from scratch during every [`ParticlePool::resolve_collisions`] and is
/// reused afterwards (by the leaves) for the rest of the step.
pub struct ParticlePool {
    pub particles: Vec<WaterParticle>,
    pub hash: SpatialHash,
    capacity: usize,
    policy: CapacityPolicy,
    gravity: Scalar,
    damping: Scalar,
    restitution: Scalar,
}

impl ParticlePool {
    pub fn new(params: &FluidParameters) -> Self {
        ParticlePool {
            particles: Vec::new(),
            hash: SpatialHash::new(Scalar::max(2., params.particle_radius * 2.)),
            capacity: params.max_particles,
            policy: params.capacity_policy,
            gravity: params.gravity * params.particle_gravity_scale,
            damping: params.velocity_damp,
            restitution: params.particle_restitution,
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds a droplet, subject to the capacity policy. Returns whether it was added.
    pub fn add_particle(&mut self, particle: WaterParticle) -> bool {
        if self.particles.len() >= self.capacity {
            match self.policy {
                CapacityPolicy::Drop => return false,
                CapacityPolicy::EvictOldest => {
                    if self.capacity == 0 {
                        return false;
                    }
                    let overflow = self.particles.len() + 1 - self.capacity;
                    self.particles.drain(..overflow);
                }
            }
        }
        self.particles.push(particle);
        true
    }

    /// Spawns up to `count` droplets jittered by up to `jitter` on each axis around `center`,
    /// falling with a random downward velocity. Returns how many were spawned.
    pub fn pour<R: Rng>(
        &mut self,
        rng: &mut R,
        center: Vec2,
        jitter: Scalar,
        count: usize,
        radius: Scalar,
    ) -> usize {
        if self.policy == CapacityPolicy::Drop && self.particles.len() >= self.capacity {
            return 0;
        }

        let mut spawned = 0;
        for _ in 0..count {
            let offset = Vec2::new(
                rng.gen_range(-jitter..=jitter),
                rng.gen_range(-jitter..=jitter),
            );
            let particle = WaterParticle {
                position: center + offset,
                velocity: Vec2::new(0., rng.gen_range(20.0..40.0)),
                radius,
                dye: 0.,
            };
            if !self.add_particle(particle) {
                break;
            }
            spawned += 1;
        }
        spawned
    }

    /// Applies gravity and damping, moves every droplet, and keeps them inside the cup.
    pub fn integrate(&mut self, dt: Scalar, cup: &Cup) {
        for p in &mut self.particles {
            p.velocity.y += self.gravity * dt;
            p.velocity *= self.damping;
            p.position += p.velocity * dt;

            collisions::confine_to_cup(
                cup,
                p.radius,
                self.restitution,
                &mut p.position,
                &mut p.velocity,
            );
        }
    }

    /// One pass of pairwise overlap resolution. Each unordered pair is visited at most once.
    ///
    /// Dye is left alone here: mixing only happens on the grid, so droplet collisions and dye
    /// transport can be tuned independently.
    pub fn resolve_collisions(&mut self) {
        self.hash.rebuild(self.particles.iter().map(|p| p.position));

        let hash = &self.hash;
        let particles = &mut self.particles;
        let restitution = self.restitution;

        for i in 0..particles.len() {
            let neighbors = hash.get_neighbors(particles[i].position);
            for j in neighbors {
                if j <= i {
                    continue;
                }
                // j > i, so p lives in the left half and q in the right
                let (left, right) = particles.split_at_mut(j);
                let p = &mut left[i];
                let q = &mut right[0];
                collisions::resolve_pair(
                    (&mut p.position, &mut p.velocity),
                    (&mut q.position, &mut q.velocity),
                    p.radius + q.radius,
                    restitution,
                );
            }
        }
    }

    pub fn step(&mut self, dt: Scalar, cup: &Cup) {
        if self.particles.is_empty() {
            return;
        }
        self.integrate(dt, cup);
        self.resolve_collisions();
    }

    /// Raises the dye of every droplet within `radius` of `center`, using the hash built in
    /// the last collision pass.
    pub fn stain_near(&mut self, center: Vec2, radius: Scalar, amount: Scalar) {
        let radius2 = radius * radius;
        let reach = self.hash.reach_for(radius);
        for idx in self.hash.get_neighbors_within(center, reach) {
            // the hash may be stale if droplets were added after the last pass
            let p = match self.particles.get_mut(idx) {
                Some(p) => p,
                None => continue,
            };
            if (p.position - center).magnitude_squared() <= radius2 {
                p.dye = Scalar::min(1., p.dye + amount);
            }
        }
    }

    /// Sum of the overlap depth over every touching pair. Used to check that collision
    /// resolution converges.
    pub fn total_overlap(&self) -> Scalar {
        let mut total = 0.;
        for (i, p) in self.particles.iter().enumerate() {
            for q in &self.particles[i + 1..] {
                let dist = (q.position - p.position).magnitude();
                total += Scalar::max(0., p.radius + q.radius - dist);
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn pool_with(params: &FluidParameters, particles: &[WaterParticle]) -> ParticlePool {
        let mut pool = ParticlePool::new(params);
        pool.particles.extend_from_slice(particles);
        pool
    }

    fn at(x: Scalar, y: Scalar, vx: Scalar, vy: Scalar) -> WaterParticle {
        WaterParticle {
            position: Vec2::new(x, y),
            velocity: Vec2::new(vx, vy),
            radius: 4.,
            dye: 0.,
        }
    }

    #[test]
    fn resting_pair_is_separated_exactly() {
        let params = FluidParameters::default();
        let r = params.particle_radius;
        let mut pool = pool_with(
            &params,
            &[at(300., 300., 0., 0.), at(300. + 2. * r - 1., 300., 0., 0.)],
        );
        pool.resolve_collisions();

        let a = pool.particles[0];
        let b = pool.particles[1];
        assert!(((b.position - a.position).magnitude() - 2. * r).abs() < 1e-4);
        // they moved apart symmetrically
        assert!((a.position.x - 299.5).abs() < 1e-4);
        assert!((b.position.x - 307.5).abs() < 1e-4);
        // nothing was approaching, so no impulse: v' = -e * 0 along the normal
        assert_eq!(a.velocity, Vec2::zeros());
        assert_eq!(b.velocity, Vec2::zeros());
    }

    #[test]
    fn approaching_pair_satisfies_restitution() {
        let params = FluidParameters::default();
        let e = params.particle_restitution;
        let mut pool = pool_with(&params, &[at(300., 300., 0., 5.), at(300., 307., 0., -5.)]);
        pool.resolve_collisions();

        let a = pool.particles[0];
        let b = pool.particles[1];
        let n = (b.position - a.position).normalize();
        let before = -10.;
        let after = (b.velocity - a.velocity).dot(&n);
        assert!((after + e * before).abs() < 1e-4);
        // momentum is conserved
        assert!((a.velocity + b.velocity).magnitude() < 1e-4);
    }

    #[test]
    fn dye_untouched_by_collisions() {
        let params = FluidParameters::default();
        let mut a = at(300., 300., 0., 3.);
        a.dye = 0.8;
        let mut pool = pool_with(&params, &[a, at(300., 305., 0., -3.)]);
        pool.resolve_collisions();
        assert_eq!(pool.particles[0].dye, 0.8);
        assert_eq!(pool.particles[1].dye, 0.);
    }

    #[test]
    fn droplets_stay_in_the_cup() {
        let params = FluidParameters::default();
        let cup = Cup::new(&params);
        let mut pool = pool_with(&params, &[at(480., 620., 0., 400.), at(700., 430., 300., 0.)]);
        for _ in 0..10 {
            pool.step(1. / 60., &cup);
        }
        let limit = cup.interior_for(params.particle_radius).radius + 1e-3;
        for p in &pool.particles {
            assert!((p.position - cup.center).magnitude() <= limit);
        }
    }

    #[test]
    fn evict_oldest_keeps_newest() {
        let params = FluidParameters {
            max_particles: 3,
            capacity_policy: CapacityPolicy::EvictOldest,
            ..Default::default()
        };
        let mut pool = ParticlePool::new(&params);
        for i in 0..5 {
            assert!(pool.add_particle(at(i as Scalar, 0., 0., 0.)));
        }
        let xs = pool.particles.iter().map(|p| p.position.x).collect::<Vec<_>>();
        assert_eq!(xs, vec![2., 3., 4.]);
    }

    #[test]
    fn drop_policy_refuses() {
        let params = FluidParameters {
            max_particles: 2,
            ..Default::default()
        };
        let mut pool = ParticlePool::new(&params);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pool.pour(&mut rng, Vec2::new(100., 100.), 6., 10, 4.), 2);
        assert_eq!(pool.pour(&mut rng, Vec2::new(100., 100.), 6., 10, 4.), 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn stain_near_reaches_past_one_bucket() {
        let params = FluidParameters::default();
        let mut pool = pool_with(
            &params,
            &[at(300., 300., 0., 0.), at(318., 300., 0., 0.), at(330., 300., 0., 0.)],
        );
        pool.resolve_collisions();
        pool.stain_near(Vec2::new(300., 300.), 20., 0.5);
        assert_eq!(pool.particles[0].dye, 0.5);
        assert_eq!(pool.particles[1].dye, 0.5);
        assert_eq!(pool.particles[2].dye, 0.);

        pool.stain_near(Vec2::new(300., 300.), 20., 0.8);
        assert_eq!(pool.particles[0].dye, 1.);
    }

    proptest! {
        #[test]
        fn pour_never_exceeds_capacity(
            cap in 0usize..60,
            pours in proptest::collection::vec(0usize..25, 1..20),
            evict in any::<bool>(),
        ) {
            let params = FluidParameters {
                max_particles: cap,
                capacity_policy: if evict { CapacityPolicy::EvictOldest } else { CapacityPolicy::Drop },
                ..Default::default()
            };
            let mut pool = ParticlePool::new(&params);
            let mut rng = StdRng::seed_from_u64(7);
            for count in pours {
                pool.pour(&mut rng, Vec2::new(480., 300.), 6., count, 4.);
                prop_assert!(pool.len() <= cap);
            }
        }

        #[test]
        fn second_pass_does_not_increase_overlap(
            angle in 0f32..std::f32::consts::TAU,
            dist in 0.5f32..7.9,
            va in (-20f32..20., -20f32..20.),
            vb in (-20f32..20., -20f32..20.),
        ) {
            let params = FluidParameters::default();
            let a = at(300., 300., va.0, va.1);
            let b = at(300. + dist * angle.cos(), 300. + dist * angle.sin(), vb.0, vb.1);
            let mut pool = pool_with(&params, &[a, b]);

            let before = pool.total_overlap();
            pool.resolve_collisions();
            let first = pool.total_overlap();
            pool.resolve_collisions();
            let second = pool.total_overlap();

            prop_assert!(first < before);
            prop_assert!(first < 1e-3);
            prop_assert!(second <= first + 1e-5);
        }
    }
}
