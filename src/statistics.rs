use crate::FluidSimulation;
use crate::Scalar;
use itertools::izip;

pub trait SimulationStatistics {
    fn total_time(&self) -> Scalar;
    fn total_water(&self) -> Scalar;
    fn total_dye(&self) -> Scalar;
    fn total_particle_dye(&self) -> Scalar;
    fn particle_count(&self) -> usize;
    fn leaf_count(&self) -> usize;
    fn kinetic_energy(&self) -> Scalar;
    fn mean_leaf_strength(&self) -> Scalar;
}

impl SimulationStatistics for FluidSimulation {
    fn total_time(&self) -> Scalar {
        self.time()
    }

    fn total_water(&self) -> Scalar {
        self.grid.water.iter().sum()
    }

    /// Dye on the grid, weighted by how much water each cell holds.
    fn total_dye(&self) -> Scalar {
        izip!(&self.grid.dye, &self.grid.water, self.grid.container_mask())
            .map(|(&d, &w, &m)| d * Scalar::max(w, 1.) * m)
            .sum()
    }

    fn total_particle_dye(&self) -> Scalar {
        self.water_particles().iter().map(|p| p.dye).sum()
    }

    fn particle_count(&self) -> usize {
        self.particles.len()
    }

    fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Droplets all have the same mass, so this is just `1/2 |v|^2` summed.
    fn kinetic_energy(&self) -> Scalar {
        self.water_particles()
            .iter()
            .map(|p| 0.5 * p.velocity.dot(&p.velocity))
            .sum()
    }

    /// 1 when every leaf is dry. An empty cup counts as dry.
    fn mean_leaf_strength(&self) -> Scalar {
        let leaves = self.leaf_particles();
        if leaves.is_empty() {
            return 1.;
        }
        leaves.iter().map(|l| l.strength).sum::<Scalar>() / leaves.len() as Scalar
    }
}
