use std::io::{self, Read, Write};
use std::net::Shutdown;

use may::io::SplitIo;

/// Byte streams a connection can run over.
pub trait StreamExt: Sized + SplitIo + Read + Write + Send + 'static {
    /// try clone the stream
    fn try_clone(&self) -> io::Result<Self>;
    /// the remote end, for logging
    fn peer(&self) -> String;
    /// shut down both directions, a blocked reader sees end of stream
    fn close(&self) -> io::Result<()>;
}

macro_rules! impl_stream_ext {
    ($name: ty) => {
        impl StreamExt for $name {
            fn try_clone(&self) -> io::Result<Self> {
                (*self).try_clone()
            }
            fn peer(&self) -> String {
                match (*self).peer_addr() {
                    Ok(addr) => format!("{addr:?}"),
                    Err(_) => "<unknown peer>".to_owned(),
                }
            }
            fn close(&self) -> io::Result<()> {
                (*self).shutdown(Shutdown::Both)
            }
        }
    };
}

impl_stream_ext!(may::net::TcpStream);
#[cfg(unix)]
impl_stream_ext!(may::os::unix::net::UnixStream);
