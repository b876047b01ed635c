use crate::collisions::Cup;
use crate::parameters::FluidParameters;
use crate::particles::WaterParticle;
use crate::{Scalar, Vec2};

/// Stores the Eulerian fields of the simulation.
///
/// Every field is `height` rows of `width` cells, row-major. `water` is a density (number of
/// droplets per cell), `dye` a concentration, and `u`/`v` the horizontal/vertical velocity.
pub struct FluidGrid {
    pub width: usize,
    pub height: usize,
    /// The grid spacing
    pub cell_size: Scalar,
    /// Reciprocal of the grid spacing, for efficient computation
    pub one_over_cell: Scalar,
    pub u: Vec<Scalar>,
    pub v: Vec<Scalar>,
    pub water: Vec<Scalar>,
    pub dye: Vec<Scalar>,
    /// Number of droplets rasterized into each cell during the last rebuild
    count: Vec<Scalar>,
    /// 1 inside the cup, 0 outside. Never changes after construction.
    mask: Vec<Scalar>,
}

macro_rules! field_accessors {
    ($($field_name:ident | $at_name:ident),*) => {
        impl FluidGrid {
            $(
                /// Value at the cell containing `position`, clamped into the grid.
                pub fn $at_name(&self, position: Vec2) -> Scalar {
                    let (gx, gy) = self.clamped_cell(position);
                    self.$field_name[self.index(gx, gy)]
                }
            )*
        }
    };
}

field_accessors!(u | u_at, v | v_at, water | water_at, dye | dye_at);

impl FluidGrid {
    pub fn new(params: &FluidParameters) -> Self {
        let width = params.grid_width();
        let height = params.grid_height();
        let num_cells = width * height;
        let cell_size = params.cell_size as Scalar;

        let mut grid = FluidGrid {
            width,
            height,
            cell_size,
            one_over_cell: 1. / cell_size,
            u: vec![0.; num_cells],
            v: vec![0.; num_cells],
            water: vec![0.; num_cells],
            dye: vec![0.; num_cells],
            count: vec![0.; num_cells],
            mask: Vec::new(),
        };
        grid.mask = grid.build_container_mask(&Cup::new(params));

        tracing::debug!(
            "Using Grid w/ Size: [{}, {}] and {} cells, {} inside the cup",
            width,
            height,
            num_cells,
            grid.mask.iter().filter(|&&m| m > 0.).count()
        );

        grid
    }

    pub fn num_cells(&self) -> usize {
        self.width * self.height
    }

    pub fn index(&self, gx: usize, gy: usize) -> usize {
        gx + self.width * gy
    }

    pub fn index_to_cell(&self, i: usize) -> (usize, usize) {
        (i % self.width, i / self.width)
    }

    /// World-space location of the center of a cell.
    pub fn cell_center(&self, gx: usize, gy: usize) -> Vec2 {
        Vec2::new(
            (gx as Scalar + 0.5) * self.cell_size,
            (gy as Scalar + 0.5) * self.cell_size,
        )
    }

    /// The cell containing `position`, or `None` if it lies outside the grid.
    pub fn cell_of(&self, position: Vec2) -> Option<(usize, usize)> {
        let gx = (position.x * self.one_over_cell).floor();
        let gy = (position.y * self.one_over_cell).floor();
        if gx < 0. || gy < 0. || gx >= self.width as Scalar || gy >= self.height as Scalar {
            return None;
        }
        Some((gx as usize, gy as usize))
    }

    /// The cell containing `position`, clamped onto the edge of the grid.
    pub fn clamped_cell(&self, position: Vec2) -> (usize, usize) {
        let clamp = |x: Scalar, n: usize| (x.floor().max(0.) as usize).min(n - 1);
        (
            clamp(position.x * self.one_over_cell, self.width),
            clamp(position.y * self.one_over_cell, self.height),
        )
    }

    pub fn velocity_at(&self, position: Vec2) -> Vec2 {
        Vec2::new(self.u_at(position), self.v_at(position))
    }

    /// Marks every cell whose center lies within the interior of the cup.
    pub fn build_container_mask(&self, cup: &Cup) -> Vec<Scalar> {
        let inner = cup.interior_radius();
        let inner2 = inner * inner;

        (0..self.num_cells())
            .map(|i| {
                let (gx, gy) = self.index_to_cell(i);
                let d = self.cell_center(gx, gy) - cup.center;
                if d.magnitude_squared() <= inner2 {
                    1.
                } else {
                    0.
                }
            })
            .collect()
    }

    pub fn container_mask(&self) -> &[Scalar] {
        &self.mask
    }

    pub fn inside_container(&self, gx: usize, gy: usize) -> bool {
        self.mask[self.index(gx, gy)] > 0.
    }

    /// Zeroes every field outside the cup. This is the only thing keeping the fields inside
    /// the cup, so it has to run after everything else that writes to them.
    pub fn apply_container_bounds(&mut self) {
        let mask = &self.mask;
        for field in [&mut self.water, &mut self.dye, &mut self.u, &mut self.v] {
            field.iter_mut().zip(mask).for_each(|(x, &m)| *x *= m);
        }
    }

    /// Fills each of the fields in the grid with zeros.
    pub fn clear_grid(&mut self) {
        self.water.fill(0.);
        self.dye.fill(0.);
        self.u.fill(0.);
        self.v.fill(0.);
        self.count.fill(0.);
    }

    /// Particle-to-grid transfer: every droplet lands in the cell containing it. `u`, `v` and
    /// `dye` become per-cell averages, `water` stays the raw droplet count.
    pub fn rebuild_from_particles(&mut self, particles: &[WaterParticle]) {
        self.clear_grid();

        for p in particles {
            let (gx, gy) = match self.cell_of(p.position) {
                Some(cell) => cell,
                None => continue,
            };
            let i = self.index(gx, gy);
            self.water[i] += 1.;
            self.dye[i] += p.dye;
            self.u[i] += p.velocity.x;
            self.v[i] += p.velocity.y;
            self.count[i] += 1.;
        }

        for i in 0..self.num_cells() {
            let count = self.count[i];
            if count > 0. {
                self.u[i] /= count;
                self.v[i] /= count;
                self.dye[i] /= count;
            }
            // Note that we don't need to handle the `else` case because everything has
            // already been zeroed out
        }
    }

    /// Adds `amount` of water and a downward push to the square of cells within `radius`
    /// of `(gx, gy)`, clipped to the grid.
    pub fn deposit(&mut self, gx: isize, gy: isize, radius: usize, amount: Scalar, push: Scalar) {
        let r = radius as isize;
        let x0 = (gx - r).max(0) as usize;
        let x1 = (gx + r + 1).clamp(0, self.width as isize) as usize;
        let y0 = (gy - r).max(0) as usize;
        let y1 = (gy + r + 1).clamp(0, self.height as isize) as usize;

        for y in y0..y1 {
            for x in x0..x1 {
                let i = self.index(x, y);
                self.water[i] += amount;
                self.v[i] += push;
            }
        }
    }
}
