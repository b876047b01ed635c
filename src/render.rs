//! Software rasterizer for the tea scene. Everything is drawn on the CPU into an
//! [`image::RgbImage`], which is what both the frame files and the shared frame buffers hold.

use crate::leaves::LeafParticle;
use crate::parameters::FluidParameters;
use crate::simulation::FluidSimulation;
use crate::{Scalar, Vec2};
use image::RgbImage;

type Color = [Scalar; 3];

pub const BACKGROUND: [u8; 3] = [12, 16, 22];
pub const CUP_COLOR: [u8; 3] = [200, 200, 210];
const WATER_COLOR: Color = [90., 140., 220.];
const TEA_COLOR: Color = [160., 110., 50.];
const LEAF_DRY: Color = [40., 90., 30.];
const LEAF_WET: Color = [160., 110., 50.];
/// Added to every cell so that empty space isn't pitch black
const AMBIENT: Scalar = 15.;

fn lerp(a: Color, b: Color, t: Scalar) -> Color {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

fn to_rgb(c: Color) -> [u8; 3] {
    [
        c[0].round().clamp(0., 255.) as u8,
        c[1].round().clamp(0., 255.) as u8,
        c[2].round().clamp(0., 255.) as u8,
    ]
}

/// Color of a single grid cell.
pub fn cell_color(water: Scalar, dye: Scalar) -> Color {
    let w = (water * 1.8).clamp(0., 1.);
    let d = (dye * 3.).clamp(0., 1.);
    [
        (w * WATER_COLOR[0] + d * TEA_COLOR[0] + AMBIENT).min(255.),
        (w * WATER_COLOR[1] + d * TEA_COLOR[1] + AMBIENT).min(255.),
        (w * WATER_COLOR[2] + d * TEA_COLOR[2] + AMBIENT).min(255.),
    ]
}

pub struct Renderer {
    width: u32,
    height: u32,
    /// Per-cell colors of the current frame, reused between frames
    cells: Vec<Color>,
    leaf_thickness: Scalar,
}

impl Renderer {
    pub fn new(params: &FluidParameters) -> Self {
        Renderer {
            width: params.window_width,
            height: params.window_height,
            cells: vec![[0.; 3]; params.grid_width() * params.grid_height()],
            leaf_thickness: params.leaf_thickness,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// A black raster of the right size to render into.
    pub fn new_frame(&self) -> RgbImage {
        RgbImage::new(self.width, self.height)
    }

    /// Draws the current state of `sim` into `frame`, overwriting all of it.
    pub fn render(&mut self, sim: &FluidSimulation, frame: &mut RgbImage) {
        assert_eq!(
            frame.dimensions(),
            (self.width, self.height),
            "frame does not match the window size"
        );

        let grid = &sim.grid;
        assert_eq!(self.cells.len(), grid.num_cells());
        for ((cell, &water), &dye) in self.cells.iter_mut().zip(&grid.water).zip(&grid.dye) {
            *cell = cell_color(water, dye);
        }
        self.upscale(grid.width, grid.height, grid.cell_size, frame);

        for p in sim.water_particles() {
            let t = Scalar::min(1., grid.dye_at(p.position) * 1.5);
            let color = to_rgb(lerp(WATER_COLOR, TEA_COLOR, t));
            fill_circle(frame, p.position, p.radius, color);
        }

        for leaf in sim.leaf_particles() {
            self.draw_leaf(frame, leaf);
        }

        let cup = sim.cup();
        draw_ring(frame, cup.center, cup.radius, cup.wall, CUP_COLOR);

        // open up the top of the cup
        let erase_h = Scalar::max(4., cup.wall + 90.);
        fill_rect(
            frame,
            cup.center.x - cup.radius,
            cup.center.y - cup.radius - erase_h * 0.5,
            cup.radius * 2.,
            erase_h,
            BACKGROUND,
        );
    }

    /// Bilinear upscale of the cell colors onto the whole raster. Pixel centers are mapped
    /// onto cell centers, and lookups past the outer cell centers are clamped.
    fn upscale(&self, grid_w: usize, grid_h: usize, cell_size: Scalar, frame: &mut RgbImage) {
        let width = self.width as usize;
        let to_grid = |p: usize, n: usize| {
            let g = ((p as Scalar + 0.5) / cell_size - 0.5).clamp(0., (n - 1) as Scalar);
            let g0 = g.floor() as usize;
            (g0, (g0 + 1).min(n - 1), g - g0 as Scalar)
        };

        let raw: &mut [u8] = frame;
        for (py, row) in raw.chunks_exact_mut(width * 3).enumerate() {
            let (y0, y1, sy) = to_grid(py, grid_h);
            for (px, pixel) in row.chunks_exact_mut(3).enumerate() {
                let (x0, x1, sx) = to_grid(px, grid_w);

                let a = self.cells[x0 + grid_w * y0];
                let b = self.cells[x1 + grid_w * y0];
                let c = self.cells[x0 + grid_w * y1];
                let d = self.cells[x1 + grid_w * y1];

                let top = lerp(a, b, sx);
                let bottom = lerp(c, d, sx);
                pixel.copy_from_slice(&to_rgb(lerp(top, bottom, sy)));
            }
        }
    }

    fn draw_leaf(&self, frame: &mut RgbImage, leaf: &LeafParticle) {
        let color = to_rgb(lerp(LEAF_DRY, LEAF_WET, 1. - leaf.strength));
        let (a, b) = leaf.segment();
        fill_segment(frame, a, b, self.leaf_thickness * 0.5, color);
    }
}

/// Integer pixel range covering `[lo, hi]`, clipped to `[0, n)`.
fn pixel_span(lo: Scalar, hi: Scalar, n: u32) -> std::ops::Range<u32> {
    let start = lo.floor().max(0.) as u32;
    let end = (hi.ceil() + 1.).clamp(0., n as Scalar) as u32;
    start.min(end)..end
}

fn pixel_center(x: u32, y: u32) -> Vec2 {
    Vec2::new(x as Scalar + 0.5, y as Scalar + 0.5)
}

fn fill_circle(frame: &mut RgbImage, center: Vec2, radius: Scalar, color: [u8; 3]) {
    let (w, h) = frame.dimensions();
    let r2 = radius * radius;
    for y in pixel_span(center.y - radius, center.y + radius, h) {
        for x in pixel_span(center.x - radius, center.x + radius, w) {
            if (pixel_center(x, y) - center).magnitude_squared() <= r2 {
                frame.put_pixel(x, y, image::Rgb(color));
            }
        }
    }
}

fn fill_segment(frame: &mut RgbImage, a: Vec2, b: Vec2, half_width: Scalar, color: [u8; 3]) {
    let (w, h) = frame.dimensions();
    let ab = b - a;
    let len2 = ab.magnitude_squared();
    let hw2 = half_width * half_width;

    let xs = pixel_span(a.x.min(b.x) - half_width, a.x.max(b.x) + half_width, w);
    let ys = pixel_span(a.y.min(b.y) - half_width, a.y.max(b.y) + half_width, h);
    for y in ys {
        for x in xs.clone() {
            let p = pixel_center(x, y);
            let t = if len2 > 0. {
                ((p - a).dot(&ab) / len2).clamp(0., 1.)
            } else {
                0.
            };
            if (p - (a + ab * t)).magnitude_squared() <= hw2 {
                frame.put_pixel(x, y, image::Rgb(color));
            }
        }
    }
}

fn draw_ring(frame: &mut RgbImage, center: Vec2, radius: Scalar, thickness: Scalar, color: [u8; 3]) {
    let (w, h) = frame.dimensions();
    let outer2 = radius * radius;
    let inner = Scalar::max(0., radius - thickness);
    let inner2 = inner * inner;
    for y in pixel_span(center.y - radius, center.y + radius, h) {
        for x in pixel_span(center.x - radius, center.x + radius, w) {
            let d2 = (pixel_center(x, y) - center).magnitude_squared();
            if d2 <= outer2 && d2 >= inner2 {
                frame.put_pixel(x, y, image::Rgb(color));
            }
        }
    }
}

fn fill_rect(frame: &mut RgbImage, x: Scalar, y: Scalar, w: Scalar, h: Scalar, color: [u8; 3]) {
    let (fw, fh) = frame.dimensions();
    if w <= 0. || h <= 0. {
        return;
    }
    for py in pixel_span(y, y + h - 1., fh) {
        for px in pixel_span(x, x + w - 1., fw) {
            frame.put_pixel(px, py, image::Rgb(color));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::WaterParticle;

    fn setup() -> (FluidSimulation, Renderer, RgbImage) {
        let params = FluidParameters {
            seed_leaves: 0,
            ..Default::default()
        };
        let renderer = Renderer::new(&params);
        let frame = renderer.new_frame();
        (FluidSimulation::new(params).unwrap(), renderer, frame)
    }

    #[test]
    fn cell_colors() {
        assert_eq!(to_rgb(cell_color(0., 0.)), [15, 15, 15]);
        assert_eq!(to_rgb(cell_color(1., 0.)), [105, 155, 235]);
        // both saturate, and the sum is clamped
        assert_eq!(to_rgb(cell_color(5., 5.)), [255, 255, 255]);
    }

    #[test]
    fn empty_scene() {
        let (sim, mut renderer, mut frame) = setup();
        renderer.render(&sim, &mut frame);

        assert_eq!(frame.dimensions(), (960, 720));
        assert_eq!(frame.get_pixel(0, 0).0, [15, 15, 15]);
        // bottom of the ring
        assert_eq!(frame.get_pixel(480, 635).0, CUP_COLOR);
        // the top of the ring is cut away
        assert_eq!(frame.get_pixel(480, 225).0, BACKGROUND);
    }

    #[test]
    fn water_and_droplets() {
        let (mut sim, mut renderer, mut frame) = setup();
        for gy in 78..83 {
            for gx in 78..83 {
                let i = sim.grid.index(gx, gy);
                sim.grid.water[i] = 1.;
            }
        }
        sim.particles.particles.push(WaterParticle {
            position: Vec2::new(400., 500.),
            velocity: Vec2::zeros(),
            radius: 4.,
            dye: 0.,
        });
        renderer.render(&sim, &mut frame);

        assert_eq!(frame.get_pixel(483, 483).0, [105, 155, 235]);
        assert_eq!(frame.get_pixel(400, 500).0, [90, 140, 220]);
    }

    #[test]
    fn leaves_darken_as_they_soak() {
        let (mut sim, mut renderer, mut frame) = setup();
        let mut wet = LeafParticle::new(Vec2::new(420., 560.), 0., 20.);
        wet.strength = 0.;
        sim.leaves.leaves.push(LeafParticle::new(Vec2::new(500., 550.), 0., 20.));
        sim.leaves.leaves.push(wet);
        renderer.render(&sim, &mut frame);

        assert_eq!(frame.get_pixel(500, 550).0, [40, 90, 30]);
        assert_eq!(frame.get_pixel(425, 560).0, [160, 110, 50]);
        // thickness 5 means nothing 4 pixels off the axis
        assert_eq!(frame.get_pixel(500, 554).0, [15, 15, 15]);
    }

    #[test]
    #[should_panic]
    fn wrong_frame_size() {
        let (sim, mut renderer, _) = setup();
        let mut frame = RgbImage::new(10, 10);
        renderer.render(&sim, &mut frame);
    }
}
