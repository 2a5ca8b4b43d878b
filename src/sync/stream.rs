use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::opts::Opts;

/// A byte stream a `Conn` can run a session over
///
/// `Stream` covers TCP and Unix sockets. Implement this for anything else
/// (an in-memory pipe, a proxy tunnel) and hand it to `Conn::with_stream`.
pub trait Transport: Read + Write + Sized {
    /// Open a new stream to the target in `opts`
    fn open(opts: &Opts) -> Result<Self>;

    /// Apply the per-exchange deadline. Streams without timeouts ignore it.
    fn set_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(unix)]
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    #[cfg(unix)]
    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    fn connect_tcp(host: &str, opts: &Opts) -> Result<TcpStream> {
        let mut last_error = None;
        for addr in (host, opts.port).to_socket_addrs()? {
            let attempt = match opts.timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    tracing::debug!(%addr, error = %err, "connect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(match last_error {
            Some(err) => err.into(),
            None => Error::BadConfigError(format!("{host} did not resolve to any address")),
        })
    }
}

impl Transport for Stream {
    fn open(opts: &Opts) -> Result<Self> {
        if let Some(socket_path) = &opts.socket {
            #[cfg(unix)]
            return Ok(Self::unix(UnixStream::connect(socket_path)?));
            #[cfg(not(unix))]
            return Err(Error::BadConfigError(format!(
                "Unix sockets are not supported on this platform: {socket_path}"
            )));
        }

        let host = opts.host.as_ref().ok_or_else(|| {
            Error::BadConfigError("Missing host in connection options".to_string())
        })?;
        let stream = Self::connect_tcp(host, opts)?;
        stream.set_nodelay(opts.tcp_nodelay)?;
        Ok(Self::tcp(stream))
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Self::Tcp(reader) => {
                reader.get_ref().set_read_timeout(timeout)?;
                reader.get_ref().set_write_timeout(timeout)?;
            }
            #[cfg(unix)]
            Self::Unix(reader) => {
                reader.get_ref().set_read_timeout(timeout)?;
                reader.get_ref().set_write_timeout(timeout)?;
            }
        }
        Ok(())
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(reader) => reader.read(buf),
            #[cfg(unix)]
            Self::Unix(reader) => reader.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(reader) => reader.get_mut().write(buf),
            #[cfg(unix)]
            Self::Unix(reader) => reader.get_mut().write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(reader) => reader.get_mut().flush(),
            #[cfg(unix)]
            Self::Unix(reader) => reader.get_mut().flush(),
        }
    }
}
