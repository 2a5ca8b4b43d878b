use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, BufReader, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::{Error, Result};
use crate::opts::Opts;

/// A byte stream an async `Conn` can run a session over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + Sized {
    /// Open a new stream to the target in `opts`. Streams that can only be
    /// supplied by the caller keep the default, which fails.
    fn open(_opts: &Opts) -> impl Future<Output = Result<Self>> + Send {
        std::future::ready(Err(Error::BadConfigError(
            "this transport must be supplied with Conn::with_stream".to_string(),
        )))
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

    async fn connect(opts: &Opts) -> Result<Self> {
        if let Some(socket_path) = &opts.socket {
            #[cfg(unix)]
            return Ok(Self::unix(UnixStream::connect(socket_path).await?));
            #[cfg(not(unix))]
            return Err(Error::BadConfigError(format!(
                "Unix sockets are not supported on this platform: {socket_path}"
            )));
        }

        let host = opts.host.as_ref().ok_or_else(|| {
            Error::BadConfigError("Missing host in connection options".to_string())
        })?;
        let stream = TcpStream::connect((host.as_str(), opts.port)).await?;
        stream.set_nodelay(opts.tcp_nodelay)?;
        Ok(Self::tcp(stream))
    }
}

impl Transport for Stream {
    async fn open(opts: &Opts) -> Result<Self> {
        match opts.timeout {
            Some(timeout) => tokio::time::timeout(timeout, Self::connect(opts))
                .await
                .map_err(|_elapsed| Error::Timeout)?,
            None => Self::connect(opts).await,
        }
    }
}

/// In-memory pipe, for tests and for tunnelling through another task
impl Transport for DuplexStream {}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(reader) => Pin::new(reader).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(reader) => Pin::new(reader.get_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(reader) => Pin::new(reader.get_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(reader) => Pin::new(reader.get_mut()).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(reader) => Pin::new(reader.get_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(reader) => Pin::new(reader.get_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(reader) => Pin::new(reader.get_mut()).poll_shutdown(cx),
        }
    }
}
