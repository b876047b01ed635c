use super::{pack_state, unpack_state, ChannelError, COUNTER_WRAP};
use crate::Error;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

const MAGIC: u32 = u32::from_be_bytes(*b"TEA2");

const MAGIC_OFFSET: usize = 0;
const WIDTH_OFFSET: usize = 4;
const HEIGHT_OFFSET: usize = 8;
const READY_OFFSET: usize = 12;
const STATE_OFFSET: usize = 16;
const STOP_OFFSET: usize = 24;
/// The frame buffers start here
pub const HEADER_LEN: usize = 64;

/// Number of times a read is retried when the producer publishes during the copy.
pub const MAX_READ_ATTEMPTS: usize = 8;

/// One mapping of the shared segment: a small header followed by two `width * height * 3`
/// RGB buffers.
///
/// Each process maps the file on its own. The header words are only ever touched through
/// atomics, and the buffers only through raw copies.
pub struct FrameSegment {
    map: MmapMut,
    path: PathBuf,
    width: u32,
    height: u32,
    frame_len: usize,
}

fn read_u32(map: &MmapMut, offset: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&map[offset..offset + 4]);
    u32::from_ne_bytes(bytes)
}

impl FrameSegment {
    /// A fresh path for a segment, in `/dev/shm` when it exists so the frames never touch
    /// a disk.
    pub fn unique_path() -> PathBuf {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let name = format!(
            "tea_fluid-{}-{}.frames",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        );
        let shm = Path::new("/dev/shm");
        if shm.is_dir() {
            shm.join(name)
        } else {
            std::env::temp_dir().join(name)
        }
    }

    /// Creates a new segment at `path` with both buffers zeroed. Fails if the file exists.
    pub fn create(path: &Path, width: u32, height: u32) -> Result<Self, Error> {
        let frame_len = width as usize * height as usize * 3;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len((HEADER_LEN + 2 * frame_len) as u64)?;

        // SAFETY: the file was just created by us and is only shared with the producer we
        // spawn, which maps it the same way.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&MAGIC.to_ne_bytes());
        map[WIDTH_OFFSET..WIDTH_OFFSET + 4].copy_from_slice(&width.to_ne_bytes());
        map[HEIGHT_OFFSET..HEIGHT_OFFSET + 4].copy_from_slice(&height.to_ne_bytes());

        tracing::debug!("created {}x{} frame segment at {:?}", width, height, path);

        Ok(FrameSegment {
            map,
            path: path.to_owned(),
            width,
            height,
            frame_len,
        })
    }

    /// Maps an existing segment, checking its header against its size.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: see `create`.
        let map = unsafe { MmapMut::map_mut(&file)? };

        if map.len() < HEADER_LEN {
            return Err(ChannelError::BadSegment(format!("{} bytes is too short", map.len())).into());
        }
        if read_u32(&map, MAGIC_OFFSET) != MAGIC {
            return Err(ChannelError::BadSegment("wrong magic".to_owned()).into());
        }

        let width = read_u32(&map, WIDTH_OFFSET);
        let height = read_u32(&map, HEIGHT_OFFSET);
        let frame_len = width as usize * height as usize * 3;
        if map.len() != HEADER_LEN + 2 * frame_len {
            return Err(ChannelError::BadSegment(format!(
                "{} bytes can't hold two {}x{} frames",
                map.len(),
                width,
                height
            ))
            .into());
        }

        Ok(FrameSegment {
            map,
            path: path.to_owned(),
            width,
            height,
            frame_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: the mapping is page aligned, the offset is a multiple of 4 inside the
        // header, and the word is never accessed non-atomically.
        unsafe { &*(self.map.as_ptr().add(offset) as *const AtomicU32) }
    }

    fn state(&self) -> &AtomicU64 {
        // SAFETY: as above, with an 8-aligned offset.
        unsafe { &*(self.map.as_ptr().add(STATE_OFFSET) as *const AtomicU64) }
    }

    pub fn set_ready(&self) {
        self.atomic_u32(READY_OFFSET).store(1, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.atomic_u32(READY_OFFSET).load(Ordering::Acquire) != 0
    }

    pub fn request_stop(&self) {
        self.atomic_u32(STOP_OFFSET).store(1, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.atomic_u32(STOP_OFFSET).load(Ordering::Acquire) != 0
    }

    /// `(counter, active_index)` of the most recently published frame. Both are zero before
    /// the first publish, and the zeroed buffer 0 is a valid (black) frame.
    pub fn frame_state(&self) -> (u32, usize) {
        unpack_state(self.state().load(Ordering::Acquire))
    }

    fn buffer_offset(&self, index: usize) -> usize {
        HEADER_LEN + index * self.frame_len
    }

    /// Copies `frame` into the unpublished buffer and publishes it. Must only be called by
    /// the single producer. Returns the new frame counter.
    pub fn publish(&mut self, frame: &[u8]) -> u32 {
        assert_eq!(frame.len(), self.frame_len);

        // nobody else writes the state, so this is exactly what we published last time
        let (counter, active) = unpack_state(self.state().load(Ordering::Relaxed));
        let target = active ^ 1;
        let offset = self.buffer_offset(target);

        // SAFETY: `target` lies within the mapping and the consumer never reads it until the
        // store below.
        unsafe {
            std::ptr::copy_nonoverlapping(
                frame.as_ptr(),
                self.map.as_mut_ptr().add(offset),
                self.frame_len,
            );
        }

        let counter = (counter + 1) % COUNTER_WRAP;
        self.state()
            .store(pack_state(counter, target), Ordering::Release);
        counter
    }

    /// Copies the published frame into `out`. If the producer publishes while the copy is in
    /// flight the copy is retried, up to [`MAX_READ_ATTEMPTS`] times. Returns the counter of
    /// the frame that was copied. On `Contended` the contents of `out` are unspecified.
    pub fn read_into(&self, out: &mut [u8]) -> Result<u32, ChannelError> {
        self.read_into_with_attempts(out, MAX_READ_ATTEMPTS)
    }

    pub(crate) fn read_into_with_attempts(
        &self,
        out: &mut [u8],
        attempts: usize,
    ) -> Result<u32, ChannelError> {
        assert_eq!(out.len(), self.frame_len);

        for _ in 0..attempts {
            let before = self.state().load(Ordering::Acquire);
            let (counter, active) = unpack_state(before);

            // SAFETY: the buffer lies within the mapping, and the producer leaves the published
            // buffer alone until it has published the other one.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.map.as_ptr().add(self.buffer_offset(active)),
                    out.as_mut_ptr(),
                    self.frame_len,
                );
            }

            fence(Ordering::Acquire);
            if self.state().load(Ordering::Relaxed) == before {
                return Ok(counter);
            }
        }

        tracing::warn!(
            "producer published during each of {} frame copies, giving up on this read",
            attempts
        );
        Err(ChannelError::Contended { attempts })
    }

    /// Unlinks the backing file. The mappings stay valid until they are dropped.
    pub fn remove_file(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
