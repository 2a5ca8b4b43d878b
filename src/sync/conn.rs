use std::io::{Read, Write};
use std::time::Duration;

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

/// A blocking Z39.50 session
///
/// ```no_run
/// # use zero_z3950::sync::Conn;
/// # use zero_z3950::QueryType;
/// # fn main() -> zero_z3950::error::Result<()> {
/// let mut conn = Conn::new("z3950.loc.gov:7090/voyager?syntax=usmarc")?;
/// conn.connect()?;
/// let mut rs = conn.search("@attr 1=7 0253333490", QueryType::Prefix)?;
/// if !rs.is_empty() {
///     let record = conn.record(&mut rs, 0)?;
///     println!("{} bytes of {}", record.raw_bytes().len(), record.syntax());
/// }
/// conn.close()?;
/// # Ok(())
/// # }
/// ```
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

    /// What the server agreed to during init
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.session.negotiated()
    }

    pub fn protocol_version(&self) -> Option<u8> {
        self.session.negotiated().map(|n| n.protocol_version)
    }

    /// Preferred record syntax name, if any
    pub fn syntax(&self) -> Option<&str> {
        self.session.opts().syntax.as_deref()
    }

    pub fn opts(&self) -> &Opts {
        self.session.opts()
    }

    /// Change the preferred record syntax for later searches
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

    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.session.set_timeout(timeout);
        if let Some(stream) = self.stream.as_mut() {
            stream.set_timeout(timeout)?;
        }
        Ok(())
    }

    /// Open the transport if needed and run the Init exchange
    #[tracing::instrument(skip_all)]
    pub fn connect(&mut self) -> Result<()> {
        let init = self.session.begin_connect();
        let mut init = self.settle(init)?;
        let result = self.handshake(&mut init);
        self.settle(result)
    }

    fn handshake(&mut self, init: &mut Init) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(S::open(self.session.opts())?);
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.set_timeout(self.session.opts().timeout)?;
        }

        self.buffer_set.read_buffer.clear();
        loop {
            match init.drive(&self.buffer_set.read_buffer)? {
                InitResult::Write(request) => {
                    *self.buffer_set.new_write_buffer() = request;
                    self.exchange()?;
                }
                InitResult::Connected(negotiated) => {
                    self.session.connected(negotiated);
                    return Ok(());
                }
            }
        }
    }

    /// Search the current database
    #[tracing::instrument(skip_all)]
    pub fn search(&mut self, query: &str, query_type: QueryType) -> Result<ResultSet> {
        let ready = self.session.check_search();
        self.settle(ready)?;
        let query = Query::new(query, query_type)?;
        self.search_query(&query)
    }

    /// Search with a prebuilt query
    #[tracing::instrument(skip_all)]
    pub fn search_query(&mut self, query: &Query) -> Result<ResultSet> {
        let pending = self
            .session
            .begin_search(query, self.buffer_set.new_write_buffer());
        let pending = self.settle(pending)?;
        let result = self
            .exchange()
            .and_then(|()| self.session.finish_search(pending, &self.buffer_set.read_buffer));
        self.settle(result)
    }

    /// The record at 0-based `position`, fetched from the server on a cache miss
    ///
    /// A miss asks for up to `Opts::present_chunk` adjacent uncached records.
    #[tracing::instrument(skip_all)]
    pub fn record<'r, P: TryInto<usize>>(
        &mut self,
        result_set: &'r mut ResultSet,
        position: P,
    ) -> Result<&'r Record> {
        let checked = self.session.check_result_set(result_set);
        self.settle(checked)?;
        let position = result_set.check_position(position)?;

        if !result_set.is_cached(position) {
            let count = result_set.plan(position, self.session.opts().present_chunk);
            let mut absorbed = self.present(result_set, position, count)?;
            if let Some(diagnostic) = absorbed.take_diagnostic(position) {
                return Err(Error::SurrogateDiagnostic(diagnostic));
            }
        }
        result_set
            .cached(position)
            .ok_or(Error::NoRecord { position })
    }

    /// Fetch `count` records starting at `start`, clipped to the end of the set
    #[tracing::instrument(skip_all)]
    pub fn fetch<P: TryInto<usize>>(
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

        let absorbed = self.present(result_set, start, requested)?;
        Ok(Fetched {
            requested,
            delivered: absorbed.delivered,
        })
    }

    /// Delete the set on the server. Returns whether the server confirmed it;
    /// without named result sets nothing is sent and this returns `false`.
    #[tracing::instrument(skip_all)]
    pub fn release(&mut self, result_set: ResultSet) -> Result<bool> {
        let begun = self
            .session
            .begin_release(&result_set, self.buffer_set.new_write_buffer());
        if !self.settle(begun)? {
            return Ok(false);
        }
        let result = self
            .exchange()
            .and_then(|()| self.session.finish_release(&self.buffer_set.read_buffer));
        self.settle(result)
    }

    /// Send a Close PDU if the session is open and release the transport
    ///
    /// Failing to send the Close is logged, not returned. Closing twice is a no-op.
    #[tracing::instrument(skip_all)]
    pub fn close(&mut self) -> Result<()> {
        let send = self.session.begin_close(self.buffer_set.new_write_buffer());
        if let Some(mut stream) = self.stream.take()
            && send
        {
            let sent = stream
                .write_all(self.buffer_set.write_buffer())
                .and_then(|()| stream.flush());
            if let Err(err) = sent {
                tracing::warn!(error = %err, "failed to send Close");
            }
        }
        Ok(())
    }

    fn present(
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
        let result = self.exchange().and_then(|()| {
            self.session
                .finish_present(result_set, start, &self.buffer_set.read_buffer)
        });
        self.settle(result)
    }

    /// Write the pending request and read one response PDU
    #[tracing::instrument(skip_all)]
    fn exchange(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::SessionClosed)?;
        stream.write_all(self.buffer_set.write_buffer())?;
        stream.flush()?;
        read_pdu(
            stream,
            &mut self.buffer_set.read_buffer,
            self.session.opts().max_pdu_size,
        )
    }

    /// Apply the outcome of an exchange to the session state, dropping the
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

/// Read one complete BER-framed PDU into `buffer`
#[tracing::instrument(skip_all)]
pub fn read_pdu<R: Read>(reader: &mut R, buffer: &mut Vec<u8>, max_size: usize) -> Result<()> {
    buffer.clear();

    let total = loop {
        match frame_length(buffer, max_size) {
            Ok(total) => break total,
            Err(Error::Incomplete { needed }) => {
                let start = buffer.len();
                buffer.resize(start + needed, 0);
                reader.read_exact(&mut buffer[start..])?;
            }
            Err(err) => return Err(err),
        }
    };

    let start = buffer.len();
    buffer.resize(total, 0);
    reader.read_exact(&mut buffer[start..])?;
    Ok(())
}
