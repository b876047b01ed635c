//! A 2D tea-pouring fluid: droplets and tea leaves coupled to a small Eulerian grid that
//! carries water density and dye, rendered to an RGB raster every frame. The whole
//! simulate-and-render loop can also run in a second process and hand frames over through
//! a double-buffered shared memory segment (see [`channel`]).

extern crate nalgebra as na;

pub mod advection;
pub mod channel;
pub mod collisions;
mod error;
pub mod grid;
pub mod leaves;
pub mod parameters;
pub mod particles;
pub mod render;
pub mod simulation;
pub mod spatial_hash;
pub mod statistics;

pub use channel::{ChannelError, SharedSimSurface};
pub use error::Error;
pub use parameters::{CapacityPolicy, FluidParameters};
pub use render::Renderer;
pub use simulation::{FluidSimulation, LocalFrames};
pub use statistics::SimulationStatistics;

pub type Scalar = f32;
pub type Vec2 = na::Vector2<Scalar>;

/// Something the host can pull one finished frame out of per tick.
///
/// Either an in-process simulation + renderer ([`LocalFrames`]) or the consumer side of the
/// cross-process channel ([`SharedSimSurface`]). The host never touches simulation internals.
pub trait FrameSource {
    /// `(width, height)` of every frame this source produces.
    fn dimensions(&self) -> (u32, u32);

    /// Returns the frame to show for this tick. `dt` is the host's frame time; sources that
    /// run on their own clock ignore it.
    fn next_frame(&mut self, dt: Scalar) -> Result<&image::RgbImage, Error>;
}
