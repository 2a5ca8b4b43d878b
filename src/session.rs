//! Runtime-independent session state shared by the sync and tokio connections.
//!
//! `Session` decides what to send and how to interpret what comes back; the
//! connections only move bytes. Each `begin_*` writes a request and marks the
//! session in flight, each `finish_*` consumes the response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constant::{DEFAULT_RESULT_SET_NAME, SYNTAXES, resolve};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::ber::Oid;
use crate::protocol::command::close::write_close;
use crate::protocol::command::delete::{read_delete_response, write_delete};
use crate::protocol::command::present::{PresentParams, read_present_response, write_present};
use crate::protocol::command::search::{SearchParams, read_search_response, write_search};
use crate::protocol::connection::{Init, InitConfig, Negotiated};
use crate::protocol::pdu::CloseReason;
use crate::protocol::query::Query;
use crate::result_set::{Absorbed, ResultSet};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unconnected,
    Negotiating,
    Ready,
    Searching,
    Presenting,
    Deleting,
    Closed,
}

impl SessionState {
    /// A request was sent and its response not yet consumed
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Negotiating | Self::Searching | Self::Presenting | Self::Deleting
        )
    }
}

/// A search request on the wire, waiting for its response
#[derive(Debug)]
pub(crate) struct PendingSearch {
    name: String,
    serial: u64,
}

#[derive(Debug)]
pub(crate) struct Session {
    id: u64,
    opts: Opts,
    syntax: Option<Oid>,
    state: SessionState,
    negotiated: Option<Negotiated>,
    search_serial: u64,
    /// Result-set name -> serial of the search that currently owns it
    live: HashMap<String, u64>,
}

impl Session {
    pub fn new(opts: Opts) -> Result<Self> {
        opts.validate()?;
        let syntax = opts.syntax_oid()?;
        Ok(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            opts,
            syntax,
            state: SessionState::Unconnected,
            negotiated: None,
            search_serial: 0,
            live: HashMap::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    pub fn set_syntax(&mut self, name: &str) -> Result<()> {
        self.check_configurable("set syntax")?;
        let oid = resolve(SYNTAXES, name).ok_or_else(|| Error::UnknownSyntax(name.to_string()))?;
        self.opts.syntax = Some(name.to_string());
        self.syntax = Some(oid);
        Ok(())
    }

    pub fn set_element_set(&mut self, name: Option<&str>) -> Result<()> {
        self.check_configurable("set element set")?;
        self.opts.element_set_name = name.map(str::to_string);
        Ok(())
    }

    pub fn set_database(&mut self, database: &str) -> Result<()> {
        self.check_configurable("set database")?;
        if database.is_empty() {
            return Err(Error::BadConfigError("database name is empty".to_string()));
        }
        self.opts.database = database.to_string();
        Ok(())
    }

    pub fn set_timeout(&mut self, timeout: Option<std::time::Duration>) {
        self.opts.timeout = timeout;
    }

    /// Record the outcome of an operation. Fatal errors, and any failure
    /// during init, close the session.
    pub fn fail(&mut self, err: &Error) {
        if err.is_fatal() || self.state == SessionState::Negotiating {
            if self.state != SessionState::Closed {
                tracing::warn!(session_id = self.id, error = %err, "closing session");
            }
            self.state = SessionState::Closed;
        } else if self.state.is_in_flight() {
            self.state = SessionState::Ready;
        }
    }

    /// Closed sessions fail. A session left in flight by a cancelled call
    /// cannot be resynchronized, so it is closed here.
    fn check_idle(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => Err(Error::SessionClosed),
            state if state.is_in_flight() => {
                tracing::warn!(
                    session_id = self.id,
                    ?state,
                    "previous exchange was abandoned, closing session"
                );
                self.state = SessionState::Closed;
                Err(Error::SessionClosed)
            }
            _ => Ok(()),
        }
    }

    fn check_ready(&mut self, operation: &'static str) -> Result<()> {
        self.check_idle()?;
        if self.state != SessionState::Ready {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn check_configurable(&mut self, operation: &'static str) -> Result<()> {
        self.check_idle()?;
        match self.state {
            SessionState::Unconnected | SessionState::Ready => Ok(()),
            state => Err(Error::InvalidState { operation, state }),
        }
    }

    // ========================================================================
    // Init
    // ========================================================================

    pub fn begin_connect(&mut self) -> Result<Init> {
        self.check_idle()?;
        if self.state != SessionState::Unconnected {
            return Err(Error::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }
        self.state = SessionState::Negotiating;
        Ok(Init::new(InitConfig::from(&self.opts)))
    }

    pub fn connected(&mut self, negotiated: Negotiated) {
        tracing::debug!(
            session_id = self.id,
            version = negotiated.protocol_version,
            options = ?negotiated.options,
            server = negotiated.implementation_name.as_deref().unwrap_or(""),
            "session ready"
        );
        self.negotiated = Some(negotiated);
        self.state = SessionState::Ready;
    }

    fn named_result_sets(&self) -> bool {
        self.negotiated
            .as_ref()
            .is_some_and(Negotiated::named_result_sets)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Fails without side effects unless the session is ready
    pub fn check_search(&mut self) -> Result<()> {
        self.check_ready("search")
    }

    pub fn begin_search(&mut self, query: &Query, out: &mut Vec<u8>) -> Result<PendingSearch> {
        self.check_ready("search")?;
        let serial = self.search_serial + 1;
        let name = if self.named_result_sets() {
            format!("rs{serial}")
        } else {
            DEFAULT_RESULT_SET_NAME.to_string()
        };

        write_search(
            out,
            SearchParams {
                query: query.structured(),
                result_set_name: &name,
                database: &self.opts.database,
                syntax: self.syntax.as_ref(),
                element_set_name: self.opts.element_set_name.as_deref(),
            },
        );
        tracing::debug!(
            session_id = self.id,
            result_set = %name,
            query_type = %query.query_type(),
            query = query.text(),
            "search"
        );
        self.search_serial = serial;
        self.state = SessionState::Searching;
        Ok(PendingSearch { name, serial })
    }

    pub fn finish_search(&mut self, pending: PendingSearch, payload: &[u8]) -> Result<ResultSet> {
        self.state = SessionState::Ready;
        // The server replaces any set of the same name, even when the search fails
        self.live.remove(&pending.name);
        let response = read_search_response(payload)?;

        let size = usize::try_from(response.result_count)
            .map_err(|_err| Error::malformed(format!("resultCount {}", response.result_count)))?;
        self.live.insert(pending.name.clone(), pending.serial);

        let partial = (!response.search_status)
            .then_some(response.result_set_status)
            .flatten();
        let mut result_set = ResultSet::new(
            pending.name,
            size,
            self.id,
            pending.serial,
            self.syntax.clone(),
            self.opts.element_set_name.clone(),
        )
        .with_partial(partial);
        let piggybacked = result_set.absorb(0, response.records);
        tracing::debug!(
            session_id = self.id,
            result_set = result_set.name(),
            hits = size,
            piggybacked = piggybacked.delivered,
            "search complete"
        );
        Ok(result_set)
    }

    // ========================================================================
    // Present
    // ========================================================================

    /// The result set must come from this session and still be current
    pub fn check_result_set(&mut self, result_set: &ResultSet) -> Result<()> {
        self.check_idle()?;
        if result_set.session_id() != self.id
            || self.live.get(result_set.name()) != Some(&result_set.serial())
        {
            return Err(Error::StaleResultSet);
        }
        self.check_ready("present")
    }

    pub fn begin_present(
        &mut self,
        result_set: &ResultSet,
        start: usize,
        count: usize,
        out: &mut Vec<u8>,
    ) {
        write_present(
            out,
            PresentParams {
                result_set_name: result_set.name(),
                start,
                count,
                syntax: result_set.syntax(),
                element_set_name: result_set.element_set_name(),
            },
        );
        tracing::debug!(
            session_id = self.id,
            result_set = result_set.name(),
            start,
            count,
            "present"
        );
        self.state = SessionState::Presenting;
    }

    pub fn finish_present(
        &mut self,
        result_set: &mut ResultSet,
        start: usize,
        payload: &[u8],
    ) -> Result<Absorbed> {
        self.state = SessionState::Ready;
        let response = read_present_response(payload)?;
        Ok(result_set.absorb(start, response.records))
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Forget the set. Returns whether a DeleteResultSetRequest was written.
    pub fn begin_release(&mut self, result_set: &ResultSet, out: &mut Vec<u8>) -> Result<bool> {
        self.check_result_set(result_set)?;
        self.live.remove(result_set.name());
        if !self.named_result_sets() {
            return Ok(false);
        }
        write_delete(out, &[result_set.name()]);
        self.state = SessionState::Deleting;
        Ok(true)
    }

    pub fn finish_release(&mut self, payload: &[u8]) -> Result<bool> {
        self.state = SessionState::Ready;
        let response = read_delete_response(payload)?;
        if response.status != 0 {
            tracing::debug!(
                session_id = self.id,
                status = response.status,
                "result set not deleted"
            );
        }
        Ok(response.status == 0)
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Move to `Closed`. Returns whether a Close PDU should be sent.
    pub fn begin_close(&mut self, out: &mut Vec<u8>) -> bool {
        let send = !matches!(
            self.state,
            SessionState::Closed | SessionState::Unconnected
        );
        if send {
            write_close(out, CloseReason::Finished);
            tracing::debug!(session_id = self.id, "close");
        }
        self.state = SessionState::Closed;
        self.live.clear();
        send
    }
}
