use crate::{Error, Scalar, Vec2};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A struct containing all of the high-level parameters for the tea simulation.
///
/// World units are raster pixels, so `window_width`/`window_height` are both the size of
/// the rendered frame and the extent of the simulated domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidParameters {
    pub window_width: u32,
    pub window_height: u32,
    /// Edge length of a grid cell
    pub cell_size: u32,
    /// Downward acceleration (positive y points down the raster)
    pub gravity: Scalar,
    /// Fraction of `gravity` applied to free droplets
    pub particle_gravity_scale: Scalar,
    /// Per-step multiplicative damping of droplet velocity
    pub velocity_damp: Scalar,
    /// Per-step multiplicative decay of the dye field
    pub dye_decay: Scalar,
    /// Diffusion rate of the water field. Zero disables diffusion entirely.
    pub diffuse_water: Scalar,
    /// Diffusion rate of the dye field. Zero disables diffusion entirely.
    pub diffuse_dye: Scalar,
    /// Water level above which a cell counts as "wet" for diffusion
    pub min_water: Scalar,
    /// Run semi-Lagrangian transport (and diffusion and decay) of the dye field
    pub dye_transport: bool,
    /// Amount of water poured per second by [`FluidSimulation::pour`](crate::FluidSimulation::pour)
    pub pour_rate: Scalar,
    /// Radius, in cells, of the square a pour deposits water into
    pub pour_radius: usize,
    pub particles_per_pour: usize,
    pub particle_radius: Scalar,
    pub particle_restitution: Scalar,
    pub max_particles: usize,
    /// What happens to a pour once `max_particles` is reached
    pub capacity_policy: CapacityPolicy,
    pub leaf_length: Scalar,
    /// Stroke width leaves are drawn with
    pub leaf_thickness: Scalar,
    /// Collision radius of a leaf
    pub leaf_radius: Scalar,
    pub leaf_restitution: Scalar,
    /// Velocity multiplier applied after leaf contacts and while resting on the bottom
    pub leaf_friction: Scalar,
    pub leaf_settle_pull: Scalar,
    /// Water level at a leaf's cell above which it starts soaking
    pub leaf_wet_threshold: Scalar,
    /// Strength lost per second while soaking
    pub leaf_soak_rate: Scalar,
    /// Droplets within this distance of a soaking leaf pick up dye
    pub leaf_dye_radius: Scalar,
    /// Dye picked up per second by those droplets
    pub leaf_dye_rate: Scalar,
    /// Number of leaves dropped into the cup at construction
    pub seed_leaves: usize,
    pub cup_width: Scalar,
    pub cup_height: Scalar,
    /// Thickness of the cup wall
    pub cup_wall: Scalar,
    /// Gap between the bottom of the cup and the bottom of the window
    pub cup_margin_bottom: Scalar,
    /// Fixed tick rate (Hz) of the out-of-process producer
    pub tick_rate: u32,
    pub seed: u64,
}

/// Policy for pours that would push the droplet count past `max_particles`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Refuse new droplets once the pool is full. Old droplets keep their slots forever.
    Drop,
    /// Remove the oldest droplets to make room for new ones.
    EvictOldest,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        CapacityPolicy::Drop
    }
}

impl Default for FluidParameters {
    fn default() -> Self {
        Self {
            window_width: 960,
            window_height: 720,
            cell_size: 6,
            gravity: 60.,
            particle_gravity_scale: 0.8,
            velocity_damp: 0.992,
            dye_decay: 0.99999,
            diffuse_water: 0.,
            diffuse_dye: 0.,
            min_water: 0.02,
            dye_transport: true,
            pour_rate: 6.,
            pour_radius: 3,
            particles_per_pour: 10,
            particle_radius: 4.,
            particle_restitution: 0.65,
            max_particles: 800,
            capacity_policy: CapacityPolicy::default(),
            leaf_length: 20.,
            leaf_thickness: 5.,
            leaf_radius: 8.,
            leaf_restitution: 0.,
            leaf_friction: 0.85,
            leaf_settle_pull: 8.,
            leaf_wet_threshold: 0.15,
            leaf_soak_rate: 0.6,
            leaf_dye_radius: 20.,
            leaf_dye_rate: 1.4,
            seed_leaves: 50,
            cup_width: 420.,
            cup_height: 500.,
            cup_wall: 10.,
            cup_margin_bottom: 40.,
            tick_rate: 60,
            seed: 0,
        }
    }
}

impl FluidParameters {
    /// Reads parameters from a JSON file. Missing fields take their default value.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read(path)?;
        let params: FluidParameters = serde_json::from_slice(&json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.cell_size == 0 {
            return Err(Error::InvalidParameters("cell_size must be non-zero".into()));
        }
        if self.window_width < self.cell_size || self.window_height < self.cell_size {
            return Err(Error::InvalidParameters(format!(
                "window {}x{} is smaller than one cell of size {}",
                self.window_width, self.window_height, self.cell_size
            )));
        }
        if self.tick_rate == 0 {
            return Err(Error::InvalidParameters("tick_rate must be non-zero".into()));
        }
        if !(self.particle_radius > 0.) {
            return Err(Error::InvalidParameters(
                "particle_radius must be positive".into(),
            ));
        }
        if !(self.leaf_length > 0.) {
            return Err(Error::InvalidParameters("leaf_length must be positive".into()));
        }
        Ok(())
    }

    pub fn grid_width(&self) -> usize {
        (self.window_width / self.cell_size) as usize
    }

    pub fn grid_height(&self) -> usize {
        (self.window_height / self.cell_size) as usize
    }

    /// Number of bytes in one RGB frame.
    pub fn frame_len(&self) -> usize {
        self.window_width as usize * self.window_height as usize * 3
    }

    /// Centre of the circular cup, in world units.
    pub fn cup_center(&self) -> Vec2 {
        Vec2::new(
            self.window_width as Scalar * 0.5,
            self.window_height as Scalar - self.cup_margin_bottom - self.cup_height * 0.5,
        )
    }

    /// Outer radius of the cup.
    pub fn cup_radius(&self) -> Scalar {
        Scalar::min(self.cup_width, self.cup_height) * 0.5
    }

    /// Radius of the interior the fluid fields live in.
    pub fn cup_interior_radius(&self) -> Scalar {
        Scalar::max(0., self.cup_radius() - self.cup_wall)
    }
}
