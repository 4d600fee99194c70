use std::io::{self, ErrorKind, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

use crate::message::codec;
use crate::{Code, Error, Message, Status};

// Frame layout
// id(u64) + len(u64) + kind(u8) + body([u8; len - 1])
//
// open frame body:       method name, utf8
// message frame body:    bincode encoded Message
// half close / cancel:   empty
// status frame body:     code(u8) + reason, utf8

const HEAD_LEN: usize = 16;

/// Kind byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// client opens a call
    Open = 0,
    /// a message in either direction
    Message = 1,
    /// client ends its request stream
    HalfClose = 2,
    /// client cancels the call
    Cancel = 3,
    /// server ends the call with a terminal status
    Status = 4,
}

impl FrameKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FrameKind::Open),
            1 => Some(FrameKind::Message),
            2 => Some(FrameKind::HalfClose),
            3 => Some(FrameKind::Cancel),
            4 => Some(FrameKind::Status),
            _ => None,
        }
    }
}

/// raw frame wrapper, low level protocol
#[derive(Debug, Clone)]
pub struct Frame {
    /// call id, every frame of a call carries the same id
    pub id: u64,
    /// what the body holds
    pub kind: FrameKind,
    body: Bytes,
}

impl Frame {
    fn new(id: u64, kind: FrameKind, body: Bytes) -> Self {
        Frame { id, kind, body }
    }

    /// open frame for `method`
    pub fn open(id: u64, method: &str) -> Self {
        Frame::new(id, FrameKind::Open, Bytes::copy_from_slice(method.as_bytes()))
    }

    /// message frame
    pub fn message(id: u64, msg: &Message) -> Result<Self, Error> {
        let mut w = BytesMut::with_capacity(64).writer();
        codec::encode_into(&mut w, msg)?;
        Ok(Frame::new(id, FrameKind::Message, w.into_inner().freeze()))
    }

    /// half close frame
    pub fn half_close(id: u64) -> Self {
        Frame::new(id, FrameKind::HalfClose, Bytes::new())
    }

    /// cancel frame
    pub fn cancel(id: u64) -> Self {
        Frame::new(id, FrameKind::Cancel, Bytes::new())
    }

    /// status frame
    pub fn status(id: u64, status: &Status) -> Self {
        let mut body = BytesMut::with_capacity(1 + status.message().len());
        body.put_u8(status.code().as_u8());
        body.put_slice(status.message().as_bytes());
        Frame::new(id, FrameKind::Status, body.freeze())
    }

    /// the raw body
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// decode the method name of an open frame
    pub fn decode_method(&self) -> Result<&str, Error> {
        std::str::from_utf8(&self.body)
            .map_err(|e| Error::Protocol(format!("method name is not utf8: {e}")))
    }

    /// decode the message of a message frame
    pub fn decode_message(&self) -> Result<Message, Error> {
        codec::decode(&self.body)
    }

    /// decode the status of a status frame
    pub fn decode_status(&self) -> Result<Status, Error> {
        let (&code, reason) = self
            .body
            .split_first()
            .ok_or_else(|| Error::Protocol("empty status frame".to_owned()))?;
        let code = Code::from_u8(code)
            .ok_or_else(|| Error::Protocol(format!("invalid status code. code={code}")))?;
        let reason = String::from_utf8_lossy(reason);
        Ok(Status::new(code, reason))
    }

    /// encode self into raw buf that can be sent
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEAD_LEN + 1 + self.body.len());
        // writes into a Vec can't fail
        buf.write_u64::<BigEndian>(self.id).ok();
        buf.write_u64::<BigEndian>(self.body.len() as u64 + 1).ok();
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.body);
        buf
    }

    /// decode a frame from the reader
    pub fn decode_from<R: Read>(r: &mut R, buf: &mut BytesMut, max_len: u64) -> io::Result<Self> {
        let id = r.read_u64::<BigEndian>()?;
        let len = r.read_u64::<BigEndian>()?;
        debug!("decode frame id = {}, len = {}", id, len);

        if len == 0 || len > max_len {
            let s = format!("decode invalid frame length. len={len}");
            error!("{s}");
            return Err(io::Error::new(ErrorKind::InvalidInput, s));
        }

        let len = len as usize;
        buf.clear();
        buf.resize(len, 0);
        r.read_exact(&mut buf[..])?;
        let mut data = buf.split_to(len).freeze();

        let kind = data[0];
        let kind = FrameKind::from_u8(kind).ok_or_else(|| {
            let s = format!("invalid frame kind. kind={kind}");
            error!("{s}");
            io::Error::new(ErrorKind::InvalidData, s)
        })?;
        let body = data.split_off(1);

        Ok(Frame { id, kind, body })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::DEFAULT_MAX_FRAME_LEN;

    fn round_trip(frame: &Frame) -> Frame {
        let data = frame.encode();
        let mut buf = BytesMut::new();
        Frame::decode_from(&mut Cursor::new(data), &mut buf, DEFAULT_MAX_FRAME_LEN).unwrap()
    }

    #[test]
    fn frames_survive_the_wire() {
        let open = round_trip(&Frame::open(7, "simpleRpc"));
        assert_eq!((open.id, open.kind), (7, FrameKind::Open));
        assert_eq!(open.decode_method().unwrap(), "simpleRpc");

        let msg = Message::new("hi", 3, true, 1.0);
        let frame = round_trip(&Frame::message(8, &msg).unwrap());
        assert_eq!(frame.kind, FrameKind::Message);
        assert_eq!(frame.decode_message().unwrap(), msg);

        let status = Status::invalid_argument("no request");
        let frame = round_trip(&Frame::status(9, &status));
        assert_eq!(frame.kind, FrameKind::Status);
        assert_eq!(frame.decode_status().unwrap(), status);

        let frame = round_trip(&Frame::half_close(10));
        assert_eq!(frame.kind, FrameKind::HalfClose);
        assert!(frame.body().is_empty());
    }

    #[test]
    fn consecutive_frames_decode_in_order() {
        let mut data = Frame::open(1, "a").encode();
        data.extend(Frame::cancel(1).encode());
        data.extend(Frame::status(1, &Status::ok()).encode());

        let mut r = Cursor::new(data);
        let mut buf = BytesMut::new();
        let kinds: Vec<_> = (0..3)
            .map(|_| {
                Frame::decode_from(&mut r, &mut buf, DEFAULT_MAX_FRAME_LEN)
                    .unwrap()
                    .kind
            })
            .collect();
        assert_eq!(
            kinds,
            vec![FrameKind::Open, FrameKind::Cancel, FrameKind::Status]
        );
        let eof = Frame::decode_from(&mut r, &mut buf, DEFAULT_MAX_FRAME_LEN).unwrap_err();
        assert_eq!(eof.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn too_big_frame_is_rejected() {
        let data = Frame::open(1, "a_rather_long_method_name").encode();
        let mut buf = BytesMut::new();
        let err = Frame::decode_from(&mut Cursor::new(data), &mut buf, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut data = Frame::cancel(1).encode();
        data[HEAD_LEN] = 42;
        let mut buf = BytesMut::new();
        let err = Frame::decode_from(&mut Cursor::new(data), &mut buf, DEFAULT_MAX_FRAME_LEN)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn bad_status_body_is_a_protocol_error() {
        let frame = Frame::new(1, FrameKind::Status, Bytes::from_static(&[2]));
        assert!(matches!(frame.decode_status(), Err(Error::Protocol(_))));
        let frame = Frame::new(1, FrameKind::Status, Bytes::new());
        assert!(matches!(frame.decode_status(), Err(Error::Protocol(_))));
    }
}
