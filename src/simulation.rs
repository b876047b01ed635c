use crate::advection::{self, Advector, FieldView};
use crate::collisions::Cup;
use crate::grid::FluidGrid;
use crate::leaves::{LeafParticle, LeafPool};
use crate::parameters::FluidParameters;
use crate::particles::{ParticlePool, WaterParticle};
use crate::render::Renderer;
use crate::{Error, FrameSource, Scalar, Vec2};
use image::RgbImage;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Contains all of the state for the tea simulation: the grid, the droplets, the leaves, and
/// the worker pool the dye advection runs on.
pub struct FluidSimulation {
    pub params: FluidParameters,
    pub grid: FluidGrid,
    pub particles: ParticlePool,
    pub leaves: LeafPool,
    cup: Cup,
    advector: Advector,
    /// Destination of the dye advection, swapped with `grid.dye` afterwards
    scratch: Vec<Scalar>,
    rng: StdRng,
    time: Scalar,
    steps: u64,
}

impl FluidSimulation {
    /// Creates a new simulation with the given parameters, with `seed_leaves` leaves already
    /// scattered through the lower middle of the window.
    pub fn new(params: FluidParameters) -> Result<FluidSimulation, Error> {
        params.validate()?;

        let grid = FluidGrid::new(&params);
        let advector = Advector::new(grid.height)?;
        let scratch = vec![0.; grid.num_cells()];

        let mut sim = FluidSimulation {
            particles: ParticlePool::new(&params),
            leaves: LeafPool::new(&params),
            cup: Cup::new(&params),
            rng: StdRng::seed_from_u64(params.seed),
            grid,
            advector,
            scratch,
            time: 0.,
            steps: 0,
            params,
        };

        let (w, h) = (
            sim.params.window_width as Scalar,
            sim.params.window_height as Scalar,
        );
        for _ in 0..sim.params.seed_leaves {
            let x = sim.rng.gen_range(w * 0.3..w * 0.7);
            let y = sim.rng.gen_range(h * 0.5..h * 0.9);
            sim.add_leaf(x, y);
        }

        tracing::info!(
            "simulation ready: {}x{} grid, {} leaves, up to {} droplets",
            sim.grid.width,
            sim.grid.height,
            sim.leaves.len(),
            sim.params.max_particles
        );

        Ok(sim)
    }

    pub fn cup(&self) -> &Cup {
        &self.cup
    }

    /// Simulated time, in seconds.
    pub fn time(&self) -> Scalar {
        self.time
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn water_particles(&self) -> &[WaterParticle] {
        &self.particles.particles
    }

    pub fn leaf_particles(&self) -> &[LeafParticle] {
        &self.leaves.leaves
    }

    pub fn advection_threads(&self) -> usize {
        self.advector.num_threads()
    }

    /// Advances the simulation by `dt` seconds.
    ///
    /// The order matters: leaves look at the fields after transport and masking, and the mask
    /// runs after transport so dye can't show up outside the cup on the frame it got there.
    pub fn step(&mut self, dt: Scalar) {
        // 1. droplets
        self.particles.step(dt, &self.cup);

        // 2. particles to grid
        self.grid.rebuild_from_particles(&self.particles.particles);

        // 3. + 4. dye transport and decay
        if self.params.dye_transport {
            self.transport_dye(dt);
        }

        // 5.
        self.grid.apply_container_bounds();

        // 6.
        self.leaves
            .step(dt, &self.grid, &mut self.particles, &self.cup);

        self.time += dt;
        self.steps += 1;
    }

    fn transport_dye(&mut self, dt: Scalar) {
        let (width, height) = (self.grid.width, self.grid.height);

        self.advector.advect(
            FieldView::new(&self.grid.dye, width, height),
            &self.grid.u,
            &self.grid.v,
            &mut self.scratch,
            dt,
            self.grid.one_over_cell,
        );

        if self.params.diffuse_water > 0. {
            let presence = self.grid.water.clone();
            advection::diffuse_in_place(
                &mut self.grid.water,
                &presence,
                width,
                height,
                self.params.diffuse_water,
                self.params.min_water,
            );
        }
        advection::diffuse_in_place(
            &mut self.scratch,
            &self.grid.water,
            width,
            height,
            self.params.diffuse_dye,
            self.params.min_water,
        );

        let decay = self.params.dye_decay;
        self.scratch.iter_mut().for_each(|d| *d *= decay);

        std::mem::swap(&mut self.grid.dye, &mut self.scratch);
    }

    /// Pours `amount` of water into the cells around `(gx, gy)` and spawns a handful of
    /// droplets there. Returns how many droplets were actually spawned; once the pool is
    /// full this is zero (unless the capacity policy evicts).
    pub fn add_water(&mut self, gx: isize, gy: isize, amount: Scalar) -> usize {
        let push = self.params.gravity * 0.08;
        self.grid
            .deposit(gx, gy, self.params.pour_radius, amount, push);

        let cell = self.grid.cell_size;
        let center = Vec2::new(
            gx as Scalar * cell + cell * 0.5,
            gy as Scalar * cell + cell * 0.5,
        );
        self.particles.pour(
            &mut self.rng,
            center,
            cell,
            self.params.particles_per_pour,
            self.params.particle_radius,
        )
    }

    /// Drops a dry leaf at world position `(x, y)`.
    pub fn add_leaf(&mut self, x: Scalar, y: Scalar) {
        self.leaves.add_leaf(&mut self.rng, Vec2::new(x, y));
    }

    /// The cell just inside the rim at the top of the cup, where the kettle pours.
    pub fn pour_cell(&self) -> (isize, isize) {
        let one_over_cell = self.grid.one_over_cell;
        let top = self.cup.center.y - self.cup.radius + self.cup.wall + 2.;
        (
            (self.cup.center.x * one_over_cell).floor() as isize,
            (top * one_over_cell).floor() as isize,
        )
    }

    /// One frame's worth of the continuous pour into the cup.
    pub fn pour(&mut self, dt: Scalar) -> usize {
        let (gx, gy) = self.pour_cell();
        self.add_water(gx, gy, self.params.pour_rate * dt)
    }
}

/// Runs the simulation and the renderer on the calling thread, pouring continuously.
pub struct LocalFrames {
    pub sim: FluidSimulation,
    renderer: Renderer,
    frame: RgbImage,
}

impl LocalFrames {
    pub fn new(params: FluidParameters) -> Result<Self, Error> {
        let renderer = Renderer::new(&params);
        let frame = renderer.new_frame();
        Ok(LocalFrames {
            sim: FluidSimulation::new(params)?,
            renderer,
            frame,
        })
    }

    pub fn frame(&self) -> &RgbImage {
        &self.frame
    }
}

impl FrameSource for LocalFrames {
    fn dimensions(&self) -> (u32, u32) {
        self.frame.dimensions()
    }

    fn next_frame(&mut self, dt: Scalar) -> Result<&RgbImage, Error> {
        self.sim.pour(dt);
        self.sim.step(dt);
        self.renderer.render(&self.sim, &mut self.frame);
        Ok(&self.frame)
    }
}
