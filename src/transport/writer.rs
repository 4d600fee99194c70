use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use may::queue::mpsc::Queue;
use may::sync::Mutex;

use super::frame::Frame;

/// Frame writer shared by every call of a connection.
///
/// `send` never interleaves two frames, and frames sent by one caller reach
/// the socket in the order they were sent. Callers don't wait on each other:
/// a frame is queued and whoever finds the writer idle drains the queue into
/// one socket write.
///
/// After the first failed socket write the writer is broken and every later
/// `send` fails with `BrokenPipe` without touching the socket.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    // frames queued but not yet drained
    queued: AtomicUsize,
    frames: Queue<Vec<u8>>,
    broken: AtomicBool,
    sock: Mutex<W>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(sock: W) -> Self {
        FrameWriter {
            queued: AtomicUsize::new(0),
            frames: Queue::new(),
            broken: AtomicBool::new(false),
            sock: Mutex::new(sock),
        }
    }

    /// Queue one frame towards the peer.
    ///
    /// Only the caller that drains the queue sees the socket error of that
    /// drain; the others find out on their next `send`.
    pub fn send(&self, frame: &Frame) -> io::Result<()> {
        if self.broken.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection writer is broken",
            ));
        }
        self.frames.push(frame.encode());
        if self.queued.fetch_add(1, Ordering::AcqRel) != 0 {
            // somebody is draining, it picks up our frame too
            return Ok(());
        }

        let mut sock = self.sock.lock().unwrap();
        let mut batch = Vec::with_capacity(1024 * 32);
        loop {
            let mut drained = 0;
            while let Some(data) = self.frames.pop() {
                batch.extend_from_slice(&data);
                drained += 1;
            }
            if self.queued.fetch_sub(drained, Ordering::AcqRel) == drained {
                break;
            }
        }

        let ret = sock.write_all(&batch).and_then(|_| sock.flush());
        if let Err(ref e) = ret {
            error!("frame writer failed, err={}", e);
            self.broken.store(true, Ordering::Release);
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::config::DEFAULT_MAX_FRAME_LEN;
    use crate::transport::FrameKind;

    #[derive(Clone, Default)]
    struct Shared(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn frames(&self) -> Vec<Frame> {
            let data = self.0.lock().unwrap().clone();
            let len = data.len() as u64;
            let mut r = Cursor::new(data);
            let mut buf = BytesMut::new();
            let mut frames = Vec::new();
            while r.position() < len {
                frames.push(Frame::decode_from(&mut r, &mut buf, DEFAULT_MAX_FRAME_LEN).unwrap());
            }
            frames
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn frames_keep_send_order() {
        let out = Shared::default();
        let writer = FrameWriter::new(out.clone());
        writer.send(&Frame::open(1, "m")).unwrap();
        writer.send(&Frame::half_close(1)).unwrap();
        writer.send(&Frame::cancel(1)).unwrap();

        let kinds: Vec<_> = out.frames().iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![FrameKind::Open, FrameKind::HalfClose, FrameKind::Cancel]
        );
    }

    #[test]
    fn concurrent_calls_keep_their_own_order() {
        let out = Shared::default();
        let writer = Arc::new(FrameWriter::new(out.clone()));
        let handles: Vec<_> = (0..8u64)
            .map(|id| {
                let writer = writer.clone();
                may::go!(move || {
                    writer.send(&Frame::open(id, "m")).unwrap();
                    for _ in 0..50 {
                        writer.send(&Frame::half_close(id)).unwrap();
                    }
                    writer.send(&Frame::cancel(id)).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let frames = out.frames();
        assert_eq!(frames.len(), 8 * 52);
        for id in 0..8u64 {
            let kinds: Vec<_> = frames
                .iter()
                .filter(|f| f.id == id)
                .map(|f| f.kind)
                .collect();
            assert_eq!(kinds.len(), 52);
            assert_eq!(kinds[0], FrameKind::Open);
            assert_eq!(kinds[51], FrameKind::Cancel);
        }
    }

    #[test]
    fn broken_writer_fails_fast() {
        let writer = FrameWriter::new(Broken);
        let err = writer.send(&Frame::cancel(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        let err = writer.send(&Frame::cancel(2)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
