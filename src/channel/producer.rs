use super::{ChannelError, FrameSegment};
use crate::{Error, FluidParameters, FluidSimulation, Renderer, Scalar};
use itertools::{Itertools, MinMaxResult};
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

/// Number of ticks the timing statistics are computed over.
const TIMING_WINDOW: usize = 600;
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Fixed-rate tick clock: sleeps until a full period has passed since the previous tick and
/// reports how long it actually was.
struct TickClock {
    period: Duration,
    last: Instant,
}

impl TickClock {
    fn new(tick_rate: u32) -> Self {
        TickClock {
            period: Duration::from_secs_f64(1. / tick_rate.max(1) as f64),
            last: Instant::now(),
        }
    }

    /// Returns the elapsed time in seconds, capped at four periods so that a stall (a
    /// suspended process, a debugger) doesn't hand the simulation a huge step.
    fn tick(&mut self) -> Scalar {
        let deadline = self.last + self.period;
        let now = Instant::now();
        if now < deadline {
            std::thread::sleep(deadline - now);
        }

        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        elapsed.min(self.period * 4).as_secs_f32()
    }
}

/// The last `TIMING_WINDOW` samples of one phase of the tick.
#[derive(Default)]
struct Rolling(VecDeque<Duration>);

impl Rolling {
    fn push(&mut self, sample: Duration) {
        if self.0.len() == TIMING_WINDOW {
            self.0.pop_front();
        }
        self.0.push_back(sample);
    }

    /// `min/avg/max` in milliseconds
    fn summary(&self) -> String {
        let ms = |d: &Duration| d.as_secs_f64() * 1000.;
        let (min, max) = match self.0.iter().minmax() {
            MinMaxResult::NoElements => return "-/-/-".to_owned(),
            MinMaxResult::OneElement(x) => (x, x),
            MinMaxResult::MinMax(min, max) => (min, max),
        };
        let avg = self.0.iter().map(ms).sum::<f64>() / self.0.len() as f64;
        format!("{:.2}/{:.2}/{:.2}", ms(min), avg, ms(max))
    }
}

#[derive(Default)]
struct TickTimings {
    dt: Rolling,
    step: Rolling,
    draw: Rolling,
    copy: Rolling,
}

impl TickTimings {
    fn report(&self) {
        tracing::info!(
            "producer timings (ms, min/avg/max over {} ticks): dt {} step {} draw {} copy {}",
            self.dt.0.len(),
            self.dt.summary(),
            self.step.summary(),
            self.draw.summary(),
            self.copy.summary()
        );
    }
}

#[cfg(unix)]
fn parent_pid() -> Option<u32> {
    Some(std::os::unix::process::parent_id())
}

#[cfg(not(unix))]
fn parent_pid() -> Option<u32> {
    None
}

/// Body of the producer process: simulates, renders and publishes frames into the segment
/// at `segment_path` at `params.tick_rate` until the consumer asks it to stop.
pub fn run_producer(segment_path: &Path, params: FluidParameters) -> Result<(), Error> {
    let mut segment = FrameSegment::open(segment_path)?;
    if segment.dimensions() != (params.window_width, params.window_height) {
        let (w, h) = segment.dimensions();
        return Err(ChannelError::BadSegment(format!(
            "segment holds {}x{} frames but the window is {}x{}",
            w, h, params.window_width, params.window_height
        ))
        .into());
    }

    let mut renderer = Renderer::new(&params);
    let mut frame = renderer.new_frame();
    let tick_rate = params.tick_rate;
    let mut sim = FluidSimulation::new(params)?;

    let parent = parent_pid();

    segment.set_ready();
    tracing::info!(
        "producer {} ready at {} Hz, writing to {:?}",
        std::process::id(),
        tick_rate,
        segment_path
    );

    let mut clock = TickClock::new(tick_rate);
    let mut timings = TickTimings::default();
    let mut last_report = Instant::now();

    while !segment.stop_requested() {
        // an orphaned producer has nobody left to ask it to stop
        if parent.is_some() && parent_pid() != parent {
            tracing::warn!("consumer went away, stopping");
            break;
        }

        let dt = clock.tick();

        let step_start = Instant::now();
        sim.pour(dt);
        sim.step(dt);
        let draw_start = Instant::now();
        renderer.render(&sim, &mut frame);
        let copy_start = Instant::now();
        let counter = segment.publish(&frame);
        let copy_end = Instant::now();

        timings.dt.push(Duration::from_secs_f32(dt));
        timings.step.push(draw_start - step_start);
        timings.draw.push(copy_start - draw_start);
        timings.copy.push(copy_end - copy_start);
        tracing::trace!("published frame {}", counter);

        if last_report.elapsed() >= REPORT_INTERVAL {
            timings.report();
            last_report = Instant::now();
        }
    }

    tracing::info!(
        "producer stopping after {} steps ({:.1}s simulated)",
        sim.steps(),
        sim.time()
    );
    Ok(())
}
