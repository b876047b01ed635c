//! Cross-process frame channel.
//!
//! The simulation and renderer run in a child process (the `produce` subcommand of this
//! binary) and hand finished frames to the host through a file-backed shared mapping holding
//! two RGB buffers. The producer always writes into the buffer that isn't published and then
//! flips a single atomic word holding the frame counter and the index of the published
//! buffer, so the consumer can copy a frame without ever waiting on the producer.

mod producer;
mod segment;
mod surface;

pub use producer::run_producer;
pub use segment::FrameSegment;
pub use surface::SharedSimSurface;

use std::fmt;
use std::time::Duration;

/// The frame counter wraps around at this value.
pub const COUNTER_WRAP: u32 = 1 << 30;

#[derive(Debug)]
pub enum ChannelError {
    /// The producer process could not be launched at all.
    Spawn(std::io::Error),
    /// The producer exited before it signalled that it was ready.
    ProducerExited(std::process::ExitStatus),
    /// The producer didn't signal readiness within the timeout.
    StartupTimeout(Duration),
    /// The shared segment has the wrong size or header.
    BadSegment(String),
    /// Frames were requested before `start` or after `shutdown`.
    NotStarted,
    /// The producer published during every one of `attempts` copies.
    Contended { attempts: usize },
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Spawn(e) => write!(f, "failed to launch the producer: {}", e),
            ChannelError::ProducerExited(status) => {
                write!(f, "producer exited before it was ready ({})", status)
            }
            ChannelError::StartupTimeout(t) => {
                write!(f, "producer was not ready after {:.1}s", t.as_secs_f32())
            }
            ChannelError::BadSegment(msg) => write!(f, "bad shared segment: {}", msg),
            ChannelError::NotStarted => write!(f, "the producer is not running"),
            ChannelError::Contended { attempts } => write!(
                f,
                "the producer published during each of {} frame copies",
                attempts
            ),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

/// Packs the frame counter and the published buffer index into one word, so they can be
/// read and written together.
pub(crate) fn pack_state(counter: u32, active: usize) -> u64 {
    ((counter as u64) << 32) | (active as u64 & 1)
}

pub(crate) fn unpack_state(state: u64) -> (u32, usize) {
    ((state >> 32) as u32, (state & 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn state_roundtrip(counter in 0u32..COUNTER_WRAP, active in 0usize..2) {
            prop_assert_eq!(unpack_state(pack_state(counter, active)), (counter, active));
        }
    }
}
