//! # Tello Video Stream
//!
//! Receives the drone's H.264 stream over UDP and decodes it on a dedicated
//! thread. The most recent decoded frame is published through a `watch`
//! channel and handed out by [`TelloVideoSource::next_frame`].
//!
//! ## Framing
//!
//! The drone splits each access unit into datagrams of at most
//! [`MAX_CHUNK`] bytes. A shorter datagram closes the unit:
//!
//! ```text
//! [1460][1460][1460][ 812] -> one access unit of 5192 bytes
//! [ 300]                   -> one access unit of 300 bytes
//! ```

use image::RgbImage;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::FrameSource;
use crate::error::Result;

/// Largest datagram the drone sends for one piece of an access unit
pub const MAX_CHUNK: usize = 1460;

/// Access units growing past this are discarded as corrupt
const MAX_ACCESS_UNIT: usize = 2 * 1024 * 1024;

/// Receive buffer, larger than any datagram the drone sends
const RECV_BUFFER: usize = 2048;

/// How often the receiver thread checks for shutdown while idle
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Reassembles access units from stream datagrams
#[derive(Debug, Default)]
pub struct StreamAssembler {
    buffer: Vec<u8>,
}

impl StreamAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one datagram; returns the access unit it completes, if any
    pub fn push(&mut self, datagram: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(datagram);

        if self.buffer.len() > MAX_ACCESS_UNIT {
            warn!("Video access unit exceeded {} bytes, discarding", MAX_ACCESS_UNIT);
            self.buffer.clear();
            return None;
        }

        if datagram.len() < MAX_CHUNK && !self.buffer.is_empty() {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Bytes waiting for the closing datagram
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Turns access units into RGB frames
pub trait FrameDecoder {
    /// Decode one access unit. `Ok(None)` means the decoder needs more data
    /// (e.g. parameter sets only).
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<RgbImage>>;
}

/// OpenH264 backed decoder
#[cfg(feature = "tello-video")]
pub struct H264Decoder {
    decoder: openh264::decoder::Decoder,
}

#[cfg(feature = "tello-video")]
impl H264Decoder {
    /// # Errors
    ///
    /// Returns `Video` if the decoder cannot be initialised.
    pub fn new() -> Result<Self> {
        let decoder = openh264::decoder::Decoder::new()
            .map_err(|e| crate::error::HudError::Video(format!("Cannot create H.264 decoder: {}", e)))?;
        Ok(Self { decoder })
    }
}

#[cfg(feature = "tello-video")]
impl FrameDecoder for H264Decoder {
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<RgbImage>> {
        use openh264::formats::YUVSource;

        let mut latest = None;
        for nal in openh264::nal_units(access_unit) {
            let decoded = self
                .decoder
                .decode(nal)
                .map_err(|e| crate::error::HudError::Video(e.to_string()))?;

            if let Some(yuv) = decoded {
                let (width, height) = yuv.dimensions();
                let mut rgb = vec![0u8; width * height * 3];
                yuv.write_rgb8(&mut rgb);
                latest = RgbImage::from_raw(width as u32, height as u32, rgb);
            }
        }
        Ok(latest)
    }
}

/// Live frames from the drone camera
#[derive(Debug)]
pub struct TelloVideoSource {
    frames: watch::Receiver<Option<RgbImage>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl TelloVideoSource {
    /// Listen on `port` (0 picks a free port) and decode with the decoder
    /// returned by `make_decoder`, which runs on the receiver thread.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the socket cannot be bound or the thread cannot start.
    pub fn spawn<D, F>(port: u16, make_decoder: F) -> Result<Self>
    where
        D: FrameDecoder,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;

        let (tx, frames) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = thread::Builder::new().name("tello-video".to_string()).spawn({
            let stop = Arc::clone(&stop);
            move || match make_decoder() {
                Ok(decoder) => receive_loop(&socket, decoder, &tx, &stop),
                Err(e) => error!("Video receiver not started: {}", e),
            }
        })?;

        info!("Receiving video stream on {}", local_addr);
        Ok(Self {
            frames,
            stop,
            worker: Some(worker),
            local_addr,
        })
    }

    /// Open the drone stream with the H.264 decoder
    ///
    /// # Errors
    ///
    /// Returns `Io` if the socket cannot be bound.
    #[cfg(feature = "tello-video")]
    pub fn open(port: u16) -> Result<Self> {
        Self::spawn(port, H264Decoder::new)
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl FrameSource for TelloVideoSource {
    fn next_frame(&mut self) -> Option<RgbImage> {
        self.frames.borrow().clone()
    }
}

impl Drop for TelloVideoSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Video receiver thread panicked");
            }
        }
    }
}

fn receive_loop<D: FrameDecoder>(
    socket: &UdpSocket,
    mut decoder: D,
    frames: &watch::Sender<Option<RgbImage>>,
    stop: &AtomicBool,
) {
    let mut assembler = StreamAssembler::new();
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut decoded: u64 = 0;

    while !stop.load(Ordering::Acquire) {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                error!("Video socket failed: {}", e);
                break;
            }
        };

        let Some(unit) = assembler.push(&buf[..len]) else {
            continue;
        };

        match decoder.decode(&unit) {
            Ok(Some(frame)) => {
                decoded += 1;
                if decoded == 1 {
                    info!("First video frame {}x{}", frame.width(), frame.height());
                }
                frames.send_replace(Some(frame));
            }
            Ok(None) => {}
            Err(e) => debug!("Dropping undecodable access unit ({} bytes): {}", unit.len(), e),
        }
    }

    debug!("Video receiver exiting after {} frames", decoded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HudError;
    use image::Rgb;
    use std::time::Instant;

    /// Emits a 4x2 frame whose red channel is the access unit length mod 256
    struct LengthDecoder;

    impl FrameDecoder for LengthDecoder {
        fn decode(&mut self, access_unit: &[u8]) -> Result<Option<RgbImage>> {
            if access_unit.len() == 3 {
                return Err(HudError::Video("garbage".to_string()));
            }
            let shade = (access_unit.len() % 256) as u8;
            Ok(Some(RgbImage::from_pixel(4, 2, Rgb([shade, 0, 0]))))
        }
    }

    fn wait_for_frame(source: &mut TelloVideoSource, shade: u8) -> RgbImage {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(frame) = source.next_frame() {
                if frame.get_pixel(0, 0)[0] == shade {
                    return frame;
                }
            }
            assert!(Instant::now() < deadline, "no frame with shade {}", shade);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_short_datagram_closes_unit() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.push(&[0u8; MAX_CHUNK]).is_none());
        assert!(assembler.push(&[0u8; MAX_CHUNK]).is_none());
        assert_eq!(assembler.pending(), 2 * MAX_CHUNK);

        let unit = assembler.push(&[1u8; 10]).unwrap();
        assert_eq!(unit.len(), 2 * MAX_CHUNK + 10);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_single_small_datagram_is_a_unit() {
        let mut assembler = StreamAssembler::new();
        assert_eq!(assembler.push(&[7, 8, 9]), Some(vec![7, 8, 9]));
    }

    #[test]
    fn test_empty_datagram_alone_is_ignored() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.push(&[]).is_none());
    }

    #[test]
    fn test_oversized_unit_is_discarded() {
        let mut assembler = StreamAssembler::new();
        let chunk = [0u8; MAX_CHUNK];
        for _ in 0..=(MAX_ACCESS_UNIT / MAX_CHUNK) {
            assert!(assembler.push(&chunk).is_none());
        }
        assert!(assembler.pending() <= MAX_ACCESS_UNIT);

        // The next unit starts clean
        let unit = assembler.push(&[1u8; 5]).unwrap();
        assert!(unit.len() < MAX_ACCESS_UNIT);
    }

    #[test]
    fn test_source_publishes_decoded_frames() {
        let mut source = TelloVideoSource::spawn(0, || Ok(LengthDecoder)).unwrap();
        assert!(source.next_frame().is_none());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = ("127.0.0.1", source.local_addr().port());

        // 1460 + 10 bytes -> shade (1470 % 256) = 190
        sender.send_to(&[0u8; MAX_CHUNK], target).unwrap();
        sender.send_to(&[0u8; 10], target).unwrap();
        let frame = wait_for_frame(&mut source, 190);
        assert_eq!(frame.dimensions(), (4, 2));

        // Undecodable unit keeps the previous frame, then a new one replaces it
        sender.send_to(&[0u8; 3], target).unwrap();
        sender.send_to(&[0u8; 20], target).unwrap();
        wait_for_frame(&mut source, 20);
    }

    #[test]
    fn test_failed_decoder_leaves_source_empty() {
        let mut source =
            TelloVideoSource::spawn(0, || Err::<LengthDecoder, _>(HudError::Video("no codec".to_string()))).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_drop_stops_receiver() {
        let source = TelloVideoSource::spawn(0, || Ok(LengthDecoder)).unwrap();
        let started = Instant::now();
        drop(source);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
