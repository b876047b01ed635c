use super::segment::MAX_READ_ATTEMPTS;
use super::{ChannelError, FrameSegment};
use crate::{Error, FluidParameters, FrameSource, Scalar};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Consumer side of the frame channel: owns the shared segment and the producer process,
/// and copies out whichever frame was published last.
pub struct SharedSimSurface {
    params: FluidParameters,
    segment: FrameSegment,
    program: PathBuf,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    child: Option<Child>,
    /// Frame handed out through [`FrameSource`], only replaced by a complete copy
    frame: RgbImage,
    scratch: RgbImage,
    read_attempts: usize,
    shut_down: bool,
}

impl SharedSimSurface {
    /// Creates the shared segment. The producer is not launched until [`start`](Self::start).
    pub fn new(params: FluidParameters) -> Result<Self, Error> {
        params.validate()?;
        let (width, height) = (params.window_width, params.window_height);
        let segment = FrameSegment::create(&FrameSegment::unique_path(), width, height)?;

        Ok(SharedSimSurface {
            params,
            segment,
            program: std::env::current_exe()?,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            child: None,
            frame: RgbImage::new(width, height),
            scratch: RgbImage::new(width, height),
            read_attempts: MAX_READ_ATTEMPTS,
            shut_down: false,
        })
    }

    /// Launches `program produce ...` instead of the running executable. The program must
    /// understand the `produce` subcommand.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn segment_path(&self) -> &Path {
        self.segment.path()
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Spawns the producer and waits until it has built its simulation. On failure the
    /// producer is killed and reaped before the error is returned. Calling this while the
    /// producer is running does nothing.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.child.is_some() {
            return Ok(());
        }
        if self.shut_down {
            return Err(ChannelError::NotStarted.into());
        }

        let params = serde_json::to_string(&self.params)?;
        let mut child = Command::new(&self.program)
            .arg("produce")
            .arg("--segment")
            .arg(self.segment.path())
            .arg("--params")
            .arg(params)
            .stdin(Stdio::null())
            .spawn()
            .map_err(ChannelError::Spawn)?;

        match wait_for_ready(&self.segment, &mut child, self.startup_timeout) {
            Ok(()) => {
                tracing::info!("producer {} is ready", child.id());
                self.child = Some(child);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("producer failed to start: {}", e);
                let _ = child.kill();
                let _ = child.wait();
                Err(e.into())
            }
        }
    }

    /// `(counter, active_index)` of the last published frame.
    pub fn frame_state(&self) -> (u32, usize) {
        self.segment.frame_state()
    }

    /// Copy of the last published frame.
    pub fn get_frame(&self) -> Result<RgbImage, Error> {
        let (width, height) = self.segment.dimensions();
        let mut frame = RgbImage::new(width, height);
        self.read_frame_into(&mut frame)?;
        Ok(frame)
    }

    /// Copies the last published frame into `frame` without waiting on the producer, and
    /// returns its counter. If this fails with [`ChannelError::Contended`] the contents of
    /// `frame` are unspecified.
    pub fn read_frame_into(&self, frame: &mut RgbImage) -> Result<u32, Error> {
        read_published(&self.segment, self.child.is_some(), frame, self.read_attempts)
    }

    /// Asks the producer to stop, waits for it for a bounded time (killing it if it doesn't
    /// exit), and removes the segment file. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.segment.request_stop();

        if let Some(mut child) = self.child.take() {
            match join_with_timeout(&mut child, self.shutdown_timeout)? {
                Some(status) => tracing::info!("producer exited with {}", status),
                None => {
                    tracing::warn!(
                        "producer still running after {:?}, killing it",
                        self.shutdown_timeout
                    );
                    child.kill()?;
                    child.wait()?;
                }
            }
        }

        self.segment.remove_file()?;
        Ok(())
    }
}

impl Drop for SharedSimSurface {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("frame channel shutdown failed: {}", e);
        }
    }
}

impl FrameSource for SharedSimSurface {
    fn dimensions(&self) -> (u32, u32) {
        self.segment.dimensions()
    }

    /// The producer runs on its own clock, so `dt` is ignored. When the producer keeps
    /// publishing over every copy attempt the previous frame is handed out again.
    fn next_frame(&mut self, _dt: Scalar) -> Result<&RgbImage, Error> {
        let running = self.child.is_some();
        match read_published(&self.segment, running, &mut self.scratch, self.read_attempts) {
            Ok(_) => std::mem::swap(&mut self.frame, &mut self.scratch),
            Err(Error::Channel(ChannelError::Contended { .. })) => {}
            Err(e) => return Err(e),
        }
        Ok(&self.frame)
    }
}

fn read_published(
    segment: &FrameSegment,
    running: bool,
    frame: &mut RgbImage,
    attempts: usize,
) -> Result<u32, Error> {
    if !running {
        return Err(ChannelError::NotStarted.into());
    }
    assert_eq!(
        frame.dimensions(),
        segment.dimensions(),
        "frame does not match the shared segment"
    );
    let counter = segment.read_into_with_attempts(frame, attempts)?;
    Ok(counter)
}

/// Polls until the producer marks the segment ready, exits, or `timeout` elapses.
fn wait_for_ready(
    segment: &FrameSegment,
    child: &mut Child,
    timeout: Duration,
) -> Result<(), ChannelError> {
    let deadline = Instant::now() + timeout;
    loop {
        if segment.is_ready() {
            return Ok(());
        }
        if let Some(status) = child.try_wait().map_err(ChannelError::Spawn)? {
            return Err(ChannelError::ProducerExited(status));
        }
        if Instant::now() >= deadline {
            return Err(ChannelError::StartupTimeout(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Waits up to `timeout` for `child` to exit. `None` means it is still running.
fn join_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn small_params() -> FluidParameters {
        FluidParameters {
            window_width: 240,
            window_height: 180,
            cup_width: 160.,
            cup_height: 160.,
            cup_margin_bottom: 10.,
            ..Default::default()
        }
    }

    #[test]
    fn silent_producer_times_out() {
        let path = FrameSegment::unique_path();
        let segment = FrameSegment::create(&path, 8, 8).unwrap();
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();

        let started = Instant::now();
        let result = wait_for_ready(&segment, &mut child, Duration::from_millis(100));
        child.kill().unwrap();
        child.wait().unwrap();
        segment.remove_file().unwrap();

        assert!(matches!(result, Err(ChannelError::StartupTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn slow_child_is_reported_as_running() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let status = join_with_timeout(&mut child, Duration::from_millis(50)).unwrap();
        assert!(status.is_none());
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn frames_need_a_running_producer() {
        let mut surface = SharedSimSurface::new(small_params()).unwrap();
        assert!(matches!(
            surface.get_frame(),
            Err(Error::Channel(ChannelError::NotStarted))
        ));

        let path = surface.segment_path().to_owned();
        assert!(path.exists());
        surface.shutdown().unwrap();
        surface.shutdown().unwrap();
        assert!(!path.exists());

        // once shut down there is nothing to start again
        assert!(surface.start().is_err());
    }

    #[test]
    fn contended_reads_keep_the_last_complete_frame() {
        let mut surface = SharedSimSurface::new(small_params()).unwrap();
        surface.shutdown_timeout = Duration::from_millis(50);
        surface.child = Some(Command::new("sleep").arg("5").spawn().unwrap());
        let mut producer = FrameSegment::open(surface.segment_path()).unwrap();
        let len = producer.frame_len();

        producer.publish(&vec![7; len]);
        assert!(surface.next_frame(0.).unwrap().as_raw().iter().all(|&b| b == 7));

        // no copy gets a chance to finish
        surface.read_attempts = 0;
        producer.publish(&vec![9; len]);
        let frame = surface.next_frame(0.).unwrap();
        assert!(frame.as_raw().iter().all(|&b| b == 7));
        assert!(matches!(
            surface.get_frame(),
            Err(Error::Channel(ChannelError::Contended { attempts: 0 }))
        ));

        surface.read_attempts = MAX_READ_ATTEMPTS;
        assert!(surface.next_frame(0.).unwrap().as_raw().iter().all(|&b| b == 9));

        surface.shutdown().unwrap();
    }
}
