use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::buffer::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::ber::frame_length;
use crate::protocol::connection::{Init, InitResult, Negotiated};
use crate::protocol::query::{Query, QueryType};
use crate::record::Record;
use crate::result_set::{Absorbed, Fetched, ResultSet};
use crate::session::{Session, SessionState};

use super::stream::{Stream, Transport};

/// An async Z39.50 session
///
/// Every exchange is bounded by `Opts::timeout`. Dropping a call's future
/// mid-exchange leaves the stream out of sync; the next call on the session
/// fails with `SessionClosed`.
#[derive(Debug)]
pub struct Conn<S: Transport = Stream> {
    stream: Option<S>,
    buffer_set: BufferSet,
    session: Session,
}

impl Conn<Stream> {
    /// Create an unconnected session. `connect` opens the socket.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;
        Ok(Self {
            stream: None,
            buffer_set: BufferSet::new(),
            session: Session::new(opts)?,
        })
    }
}

impl<S: Transport> Conn<S> {
    /// Create an unconnected session over an already open stream
    pub fn with_stream<O: TryInto<Opts>>(stream: S, opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;
        Ok(Self {
            stream: Some(stream),
            buffer_set: BufferSet::new(),
            session: Session::new(opts)?,
        })
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Process-unique id of this session
    pub fn session_id(&self) -> u64 {
        self.session.id()
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.session.negotiated()
    }

    pub fn protocol_version(&self) -> Option<u8> {
        self.session.negotiated().map(|n| n.protocol_version)
    }

    pub fn syntax(&self) -> Option<&str> {
        self.session.opts().syntax.as_deref()
    }

    pub fn opts(&self) -> &Opts {
        self.session.opts()
    }

    pub fn set_syntax(&mut self, name: &str) -> Result<()> {
        let result = self.session.set_syntax(name);
        self.settle(result)
    }

    pub fn set_element_set(&mut self, name: Option<&str>) -> Result<()> {
        let result = self.session.set_element_set(name);
        self.settle(result)
    }

    pub fn set_database(&mut self, database: &str) -> Result<()> {
        let result = self.session.set_database(database);
        self.settle(result)
    }

    /// Deadline for each later exchange
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.session.set_timeout(timeout);
    }

    /// Open the transport if needed and run the Init exchange
    #[instrument(skip_all)]
    pub async fn connect(&mut self) -> Result<()> {
        let init = self.session.begin_connect();
        let mut init = self.settle(init)?;
        let result = self.handshake(&mut init).await;
        self.settle(result)
    }

    async fn handshake(&mut self, init: &mut Init) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(S::open(self.session.opts()).await?);
        }

        self.buffer_set.read_buffer.clear();
        loop {
            match init.drive(&self.buffer_set.read_buffer)? {
                InitResult::Write(request) => {
                    *self.buffer_set.new_write_buffer() = request;
                    self.exchange().await?;
                }
                InitResult::Connected(negotiated) => {
                    self.session.connected(negotiated);
                    return Ok(());
                }
            }
        }
    }

    /// Search the current database
    #[instrument(skip_all)]
    pub async fn search(&mut self, query: &str, query_type: QueryType) -> Result<ResultSet> {
        let ready = self.session.check_search();
        self.settle(ready)?;
        let query = Query::new(query, query_type)?;
        self.search_query(&query).await
    }

    /// Search with a prebuilt query
    #[instrument(skip_all)]
    pub async fn search_query(&mut self, query: &Query) -> Result<ResultSet> {
        let pending = self
            .session
            .begin_search(query, self.buffer_set.new_write_buffer());
        let pending = self.settle(pending)?;
        let result = match self.exchange().await {
            Ok(()) => self
                .session
                .finish_search(pending, &self.buffer_set.read_buffer),
            Err(err) => Err(err),
        };
        self.settle(result)
    }

    /// The record at 0-based `position`, fetched from the server on a cache miss
    #[instrument(skip_all)]
    pub async fn record<'r, P: TryInto<usize>>(
        &mut self,
        result_set: &'r mut ResultSet,
        position: P,
    ) -> Result<&'r Record> {
        let checked = self.session.check_result_set(result_set);
        self.settle(checked)?;
        let position = result_set.check_position(position)?;

        if !result_set.is_cached(position) {
            let count = result_set.plan(position, self.session.opts().present_chunk);
            let mut absorbed = self.present(result_set, position, count).await?;
            if let Some(diagnostic) = absorbed.take_diagnostic(position) {
                return Err(Error::SurrogateDiagnostic(diagnostic));
            }
        }
        result_set
            .cached(position)
            .ok_or(Error::NoRecord { position })
    }

    /// Fetch `count` records starting at `start`, clipped to the end of the set
    #[instrument(skip_all)]
    pub async fn fetch<P: TryInto<usize>>(
        &mut self,
        result_set: &mut ResultSet,
        start: P,
        count: usize,
    ) -> Result<Fetched> {
        let checked = self.session.check_result_set(result_set);
        self.settle(checked)?;
        let start = result_set.check_position(start)?;
        let requested = count.min(result_set.size() - start);
        if requested == 0 {
            return Ok(Fetched {
                requested: 0,
                delivered: 0,
            });
        }

        let absorbed = self.present(result_set, start, requested).await?;
        Ok(Fetched {
            requested,
            delivered: absorbed.delivered,
        })
    }

    /// Delete the set on the server. Returns whether the server confirmed it;
    /// without named result sets nothing is sent and this returns `false`.
    #[instrument(skip_all)]
    pub async fn release(&mut self, result_set: ResultSet) -> Result<bool> {
        let begun = self
            .session
            .begin_release(&result_set, self.buffer_set.new_write_buffer());
        if !self.settle(begun)? {
            return Ok(false);
        }
        let result = match self.exchange().await {
            Ok(()) => self.session.finish_release(&self.buffer_set.read_buffer),
            Err(err) => Err(err),
        };
        self.settle(result)
    }

    /// Send a Close PDU if the session is open and release the transport
    ///
    /// Failing to send the Close is logged, not returned. Closing twice is a no-op.
    #[instrument(skip_all)]
    pub async fn close(&mut self) -> Result<()> {
        let send = self.session.begin_close(self.buffer_set.new_write_buffer());
        if let Some(mut stream) = self.stream.take()
            && send
        {
            let request = self.buffer_set.write_buffer();
            let sent = with_deadline(self.session.opts().timeout, async move {
                stream.write_all(request).await?;
                stream.shutdown().await?;
                Ok::<_, Error>(())
            })
            .await;
            if let Err(err) = sent {
                tracing::warn!(error = %err, "failed to send Close");
            }
        }
        Ok(())
    }

    async fn present(
        &mut self,
        result_set: &mut ResultSet,
        start: usize,
        count: usize,
    ) -> Result<Absorbed> {
        self.session.begin_present(
            result_set,
            start,
            count,
            self.buffer_set.new_write_buffer(),
        );
        let result = match self.exchange().await {
            Ok(()) => self
                .session
                .finish_present(result_set, start, &self.buffer_set.read_buffer),
            Err(err) => Err(err),
        };
        self.settle(result)
    }

    /// Write the pending request and read one response PDU within the deadline
    #[instrument(skip_all)]
    async fn exchange(&mut self) -> Result<()> {
        let timeout = self.session.opts().timeout;
        let max_size = self.session.opts().max_pdu_size;
        let stream = self.stream.as_mut().ok_or(Error::SessionClosed)?;
        let buffer_set = &mut self.buffer_set;

        with_deadline(timeout, async move {
            stream.write_all(buffer_set.write_buffer()).await?;
            stream.flush().await?;
            read_pdu(stream, &mut buffer_set.read_buffer, max_size).await
        })
        .await
    }

    /// Apply the outcome of an operation to the session state, dropping the
    /// stream once the session is closed.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.session.fail(err);
        }
        if self.session.state() == SessionState::Closed {
            self.stream = None;
        }
        result
    }
}

async fn with_deadline<T>(
    timeout: Option<Duration>,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .map_err(|_elapsed| Error::Timeout)?,
        None => future.await,
    }
}

/// Read one complete BER-framed PDU into `buffer`
#[instrument(skip_all)]
pub async fn read_pdu<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    max_size: usize,
) -> Result<()> {
    buffer.clear();

    let total = loop {
        match frame_length(buffer, max_size) {
            Ok(total) => break total,
            Err(Error::Incomplete { needed }) => {
                let start = buffer.len();
                buffer.resize(start + needed, 0);
                reader.read_exact(&mut buffer[start..]).await?;
            }
            Err(err) => return Err(err),
        }
    };

    let start = buffer.len();
    buffer.resize(total, 0);
    reader.read_exact(&mut buffer[start..]).await?;
    Ok(())
}
