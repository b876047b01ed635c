//! Semi-Lagrangian transport of grid fields, as in Stam 99 / Bridson 08: every destination
//! cell traces backwards along the velocity field and bilinearly samples the old field there.
//!
//! The work is split into horizontal bands of rows that run on a persistent thread pool.
//! Each band only writes its own rows of the destination and only reads the source, so the
//! bands need no synchronization beyond the final join.

use crate::Scalar;
use rayon::prelude::*;
use rayon::ThreadPool;

/// A row-major field together with its dimensions.
#[derive(Clone, Copy)]
pub struct FieldView<'a> {
    pub data: &'a [Scalar],
    pub width: usize,
    pub height: usize,
}

impl<'a> FieldView<'a> {
    pub fn new(data: &'a [Scalar], width: usize, height: usize) -> Self {
        debug_assert_eq!(data.len(), width * height);
        FieldView {
            data,
            width,
            height,
        }
    }

    fn at(&self, x: usize, y: usize) -> Scalar {
        self.data[x + self.width * y]
    }

    /// Bilinear interpolation at a fractional grid coordinate. The coordinate must already be
    /// clamped into `[0, width - 1] x [0, height - 1]`.
    pub fn sample(&self, x: Scalar, y: Scalar) -> Scalar {
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let sx = x - x0 as Scalar;
        let sy = y - y0 as Scalar;

        let a = self.at(x0, y0);
        let b = self.at(x1, y0);
        let c = self.at(x0, y1);
        let d = self.at(x1, y1);

        (a * (1. - sx) + b * sx) * (1. - sy) + (c * (1. - sx) + d * sx) * sy
    }
}

/// Owns the worker pool the advection bands run on.
pub struct Advector {
    pool: ThreadPool,
    chunk_rows: usize,
}

impl Advector {
    /// Builds a pool of `max(2, parallelism - 1)` workers, and bands of
    /// `max(8, rows / parallelism)` rows so there are about as many bands as cores.
    pub fn new(rows: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let workers = usize::max(2, parallelism - 1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("advect-{}", i))
            .build()?;

        let chunk_rows = usize::max(8, rows / parallelism);
        tracing::info!(
            "advection pool: {} workers, bands of {} rows",
            workers,
            chunk_rows
        );

        Ok(Advector { pool, chunk_rows })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Advects `src` along `(u, v)` into `dst`. `dst` must not alias `src`; callers advect into
    /// a scratch field and swap it in afterwards. Blocks until every band has finished.
    pub fn advect(
        &self,
        src: FieldView,
        u: &[Scalar],
        v: &[Scalar],
        dst: &mut [Scalar],
        dt: Scalar,
        one_over_cell: Scalar,
    ) {
        assert_eq!(dst.len(), src.data.len());
        let width = src.width;
        let band_len = self.chunk_rows * width;

        self.pool.install(|| {
            dst.par_chunks_mut(band_len)
                .enumerate()
                .for_each(|(band, rows)| {
                    let y_start = band * self.chunk_rows;
                    advect_rows(src, u, v, rows, y_start, dt, one_over_cell);
                });
        });
    }
}

/// Advects the rows starting at `y_start` into `out` (which holds exactly those rows).
pub fn advect_rows(
    src: FieldView,
    u: &[Scalar],
    v: &[Scalar],
    out: &mut [Scalar],
    y_start: usize,
    dt: Scalar,
    one_over_cell: Scalar,
) {
    let width = src.width;
    let max_x = width as Scalar - 1.001;
    let max_y = src.height as Scalar - 1.001;

    for (k, value) in out.iter_mut().enumerate() {
        let x = k % width;
        let y = y_start + k / width;
        let i = x + width * y;

        let back_x = (x as Scalar - u[i] * dt * one_over_cell).clamp(0., max_x.max(0.));
        let back_y = (y as Scalar - v[i] * dt * one_over_cell).clamp(0., max_y.max(0.));

        *value = src.sample(back_x, back_y);
    }
}

/// Relaxes `field` towards the average of its wet 4-neighbors (wrapping around the edges).
/// A neighbor is wet where `water > min_water`.
pub fn diffuse_in_place(
    field: &mut [Scalar],
    water: &[Scalar],
    width: usize,
    height: usize,
    rate: Scalar,
    min_water: Scalar,
) {
    if rate <= 0. {
        return;
    }

    let presence = |i: usize| if water[i] > min_water { 1. } else { 0. };
    let old = field.to_vec();

    for y in 0..height {
        let up = (y + height - 1) % height;
        let down = (y + 1) % height;
        for x in 0..width {
            let left = (x + width - 1) % width;
            let right = (x + 1) % width;
            let neighbors = [
                left + width * y,
                right + width * y,
                x + width * up,
                x + width * down,
            ];

            let (weighted, denom) = neighbors.iter().fold((0., 0.), |(w, d), &n| {
                let p = presence(n);
                (w + old[n] * p, d + p)
            });

            let i = x + width * y;
            let average = if denom > 0. { weighted / denom } else { old[i] };
            field[i] += (average - old[i]) * rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Vec<Scalar> {
        (0..width * height)
            .map(|i| ((i % width) + 3 * (i / width)) as Scalar)
            .collect()
    }

    #[test]
    fn bilinear_sample() {
        let data = vec![0., 1., 2., 3.];
        let field = FieldView::new(&data, 2, 2);
        assert_eq!(field.sample(0., 0.), 0.);
        assert_eq!(field.sample(1., 1.), 3.);
        assert!((field.sample(0.5, 0.5) - 1.5).abs() < 1e-6);
        assert!((field.sample(0.25, 0.) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn zero_velocity_is_identity() {
        let (w, h) = (37, 29);
        let src = ramp(w, h);
        let zeros = vec![0.; w * h];
        let mut dst = vec![0.; w * h];

        let advector = Advector::new(h).unwrap();
        advector.advect(FieldView::new(&src, w, h), &zeros, &zeros, &mut dst, 0.1, 1. / 6.);

        for y in 0..h {
            for x in 0..w {
                let i = x + w * y;
                // the last row and column are sampled a hair inside the edge
                let tol = if x == w - 1 || y == h - 1 { 1e-2 } else { 1e-4 };
                assert!((src[i] - dst[i]).abs() < tol);
            }
        }
    }

    #[test]
    fn uniform_flow_shifts_the_field() {
        // one cell per step to the right
        let (w, h) = (20, 16);
        let mut src = vec![0.; w * h];
        src[5 + w * 7] = 1.;
        let u = vec![6.; w * h];
        let v = vec![0.; w * h];
        let mut dst = vec![0.; w * h];

        let advector = Advector::new(h).unwrap();
        advector.advect(FieldView::new(&src, w, h), &u, &v, &mut dst, 1., 1. / 6.);

        assert!((dst[6 + w * 7] - 1.).abs() < 1e-5);
        assert!(dst[5 + w * 7].abs() < 1e-5);
    }

    #[test]
    fn parallel_matches_serial() {
        let (w, h) = (40, 53);
        let src = ramp(w, h);
        let u = (0..w * h).map(|i| ((i * 7) % 13) as Scalar - 6.).collect::<Vec<_>>();
        let v = (0..w * h).map(|i| ((i * 5) % 11) as Scalar - 5.).collect::<Vec<_>>();

        let mut serial = vec![0.; w * h];
        advect_rows(FieldView::new(&src, w, h), &u, &v, &mut serial, 0, 0.3, 1. / 6.);

        let mut parallel = vec![0.; w * h];
        let advector = Advector::new(h).unwrap();
        advector.advect(FieldView::new(&src, w, h), &u, &v, &mut parallel, 0.3, 1. / 6.);

        assert_eq!(serial, parallel);
    }

    #[test]
    fn diffusion_spreads_between_wet_cells() {
        let (w, h) = (5, 5);
        let mut field = vec![0.; w * h];
        field[2 + w * 2] = 1.;
        let water = vec![1.; w * h];

        diffuse_in_place(&mut field, &water, w, h, 0.5, 0.02);

        assert!((field[2 + w * 2] - 0.5).abs() < 1e-6);
        assert!((field[1 + w * 2] - 0.125).abs() < 1e-6);
        assert!((field.iter().sum::<Scalar>() - 1.).abs() < 1e-5);
    }

    #[test]
    fn zero_rate_disables_diffusion() {
        let mut field = vec![0., 1., 0., 0.];
        diffuse_in_place(&mut field, &[1.; 4], 2, 2, 0., 0.02);
        assert_eq!(field, vec![0., 1., 0., 0.]);
    }
}
