use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::protocol::ber::Oid;
use crate::protocol::pdu::{Diagnostic, RecordPayload, Records, ResultSetStatus};
use crate::record::Record;

/// A server-held set of search hits.
///
/// Records are fetched through the owning connection (`conn.record(&mut rs, i)`)
/// and cached here by 0-based position. The set only remembers which session
/// produced it; once that session closes, or a later search reuses the set's
/// name, fetching fails with `StaleResultSet`.
#[derive(Debug, Clone)]
pub struct ResultSet {
    name: String,
    size: usize,
    session_id: u64,
    serial: u64,
    syntax: Option<Oid>,
    element_set_name: Option<String>,
    partial: Option<ResultSetStatus>,
    cache: BTreeMap<usize, Record>,
}

/// Outcome of an explicit batch fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetched {
    pub requested: usize,
    pub delivered: usize,
}

/// What a present response contributed to the cache
#[derive(Debug, Default)]
pub(crate) struct Absorbed {
    pub delivered: usize,
    pub diagnostics: Vec<(usize, Diagnostic)>,
}

impl Absorbed {
    pub fn take_diagnostic(&mut self, position: usize) -> Option<Diagnostic> {
        let index = self.diagnostics.iter().position(|(p, _)| *p == position)?;
        Some(self.diagnostics.swap_remove(index).1)
    }
}

impl ResultSet {
    pub(crate) fn new(
        name: String,
        size: usize,
        session_id: u64,
        serial: u64,
        syntax: Option<Oid>,
        element_set_name: Option<String>,
    ) -> Self {
        Self {
            name,
            size,
            session_id,
            serial,
            syntax,
            element_set_name,
            partial: None,
            cache: BTreeMap::new(),
        }
    }

    pub(crate) fn with_partial(mut self, partial: Option<ResultSetStatus>) -> Self {
        self.partial = partial;
        self
    }

    /// Server-side name of the set
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of hits, fixed at search time
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// `Subset` or `Interim` when the search stopped early and the server
    /// kept only part of the hits
    pub fn partial(&self) -> Option<ResultSetStatus> {
        self.partial
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    /// Record syntax requested when fetching
    pub fn syntax(&self) -> Option<&Oid> {
        self.syntax.as_ref()
    }

    pub fn element_set_name(&self) -> Option<&str> {
        self.element_set_name.as_deref()
    }

    /// A record already fetched, without I/O
    pub fn cached(&self, position: usize) -> Option<&Record> {
        self.cache.get(&position)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Fetched records in position order
    pub fn cached_records(&self) -> impl Iterator<Item = (usize, &Record)> {
        self.cache.iter().map(|(position, record)| (*position, record))
    }

    pub(crate) fn is_cached(&self, position: usize) -> bool {
        self.cache.contains_key(&position)
    }

    /// Validate a caller-supplied 0-based position
    pub(crate) fn check_position<P: TryInto<usize>>(&self, position: P) -> Result<usize> {
        position
            .try_into()
            .ok()
            .filter(|position| *position < self.size)
            .ok_or(Error::OutOfRange { size: self.size })
    }

    /// Number of records to ask for when `position` misses the cache:
    /// adjacent uncached positions, at most `chunk`.
    pub(crate) fn plan(&self, position: usize, chunk: usize) -> usize {
        (position..self.size)
            .take(chunk.max(1))
            .take_while(|p| !self.cache.contains_key(p))
            .count()
            .max(1)
    }

    /// Cache the records of a response whose first record is at `start`
    pub(crate) fn absorb(&mut self, start: usize, records: Option<Records>) -> Absorbed {
        let mut absorbed = Absorbed::default();
        let Some(Records::ResponseRecords(records)) = records else {
            return absorbed;
        };

        for (offset, named) in records.into_iter().enumerate() {
            let position = start + offset;
            if position >= self.size {
                tracing::warn!(position, size = self.size, "server sent a record past the end");
                break;
            }
            match named.record {
                RecordPayload::Retrieval(external) => {
                    let record =
                        Record::from_external(external, named.database, self.syntax.as_ref());
                    self.cache.insert(position, record);
                    absorbed.delivered += 1;
                }
                RecordPayload::SurrogateDiagnostic(diag) => {
                    tracing::debug!(position, code = diag.code, "surrogate diagnostic");
                    absorbed.diagnostics.push((position, diag));
                }
            }
        }
        absorbed
    }
}
