//! Frame sinks - where reassembled screenshots go.
//!
//! The session calls [`FrameSink::deliver`] once per frame, in wire order,
//! from its own task. Provided sinks:
//!
//! - [`ChannelSink`] - hands frames to another task over a bounded mpsc channel
//! - [`PngDirSink`] - writes each frame as a numbered PNG file
//! - any `FnMut(Frame) -> Result<()> + Send` closure
//!
//! # Example
//!
//! ```
//! use shotwire::sink::{channel_sink, FrameSink};
//! use shotwire::protocol::Frame;
//! use bytes::Bytes;
//!
//! let (mut sink, mut frames) = channel_sink(4);
//! sink.deliver(Frame::try_new(1, Bytes::from(vec![0u8; 3])).unwrap()).unwrap();
//!
//! assert_eq!(frames.try_recv().unwrap().width(), 1);
//! ```

use std::path::{Path, PathBuf};

use image::RgbImage;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{Result, ShotwireError};
use crate::protocol::Frame;

/// Receives complete frames from a session.
///
/// An error ends the session run; frames are never retried.
pub trait FrameSink: Send {
    /// Take ownership of one frame.
    fn deliver(&mut self, frame: Frame) -> Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(Frame) -> Result<()> + Send,
{
    fn deliver(&mut self, frame: Frame) -> Result<()> {
        self(frame)
    }
}

/// Default queue depth for [`channel_sink`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Forwards frames to a bounded channel.
///
/// Delivery never waits. Once the receiver is `capacity` frames behind,
/// `deliver` returns [`ShotwireError::Backpressure`] and the frame is
/// dropped, so at most `capacity` frames are ever queued.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
    capacity: usize,
}

impl ChannelSink {
    /// Wrap an existing sender. Its capacity bounds the queue.
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        let capacity = tx.max_capacity();
        Self { tx, capacity }
    }

    /// Queue depth of the underlying channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, frame: Frame) -> Result<()> {
        let capacity = self.capacity;
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ShotwireError::Backpressure { capacity },
            TrySendError::Closed(_) => ShotwireError::Sink("frame receiver dropped".to_string()),
        })
    }
}

/// Create a [`ChannelSink`] holding at most `capacity` frames (minimum 1)
/// and the receiver its frames arrive on.
pub fn channel_sink(capacity: usize) -> (ChannelSink, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink::new(tx), rx)
}

/// Run blocking work off the async worker when the runtime allows it.
///
/// `block_in_place` is only available on the multi-thread runtime; on a
/// current-thread runtime or outside tokio the work runs inline.
fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

/// Convert a frame's RGB payload into an image buffer.
pub fn to_rgb_image(frame: &Frame) -> Result<RgbImage> {
    RgbImage::from_raw(frame.width(), frame.height(), frame.payload().to_vec()).ok_or_else(|| {
        ShotwireError::Sink(format!(
            "payload of {} bytes does not fit {}x{} RGB",
            frame.payload_len(),
            frame.width(),
            frame.height()
        ))
    })
}

/// Writes frames as `<prefix>-<sequence>.png` into a directory.
///
/// Encoding and the file write are blocking. On a multi-thread runtime they
/// run through `block_in_place` so other tasks keep going; on a
/// current-thread runtime they stall the runtime for the duration of each
/// write.
#[derive(Debug)]
pub struct PngDirSink {
    dir: PathBuf,
    prefix: String,
    next_index: u64,
    last_path: Option<PathBuf>,
}

impl PngDirSink {
    /// Create the sink, creating `dir` if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            ShotwireError::Sink(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self {
            dir,
            prefix: "screenshot".to_string(),
            next_index: 1,
            last_path: None,
        })
    }

    /// Use a different file name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the most recently written file.
    pub fn last_path(&self) -> Option<&Path> {
        self.last_path.as_deref()
    }

    fn path_for(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{}-{:06}.png", self.prefix, index))
    }
}

impl FrameSink for PngDirSink {
    fn deliver(&mut self, frame: Frame) -> Result<()> {
        let path = self.path_for(self.next_index);

        run_blocking(|| {
            to_rgb_image(&frame)?
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| ShotwireError::Sink(format!("cannot write {}: {}", path.display(), e)))
        })?;

        tracing::info!(
            "Saved {}x{} screenshot to {}",
            frame.width(),
            frame.height(),
            path.display()
        );
        self.next_index += 1;
        self.last_path = Some(path);
        Ok(())
    }
}
