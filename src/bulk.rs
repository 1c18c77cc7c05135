//! Bulk request processing.
//!
//! A bulk body is newline-delimited JSON. Each operation is a single-key
//! object naming the action, followed by a document line for every action
//! except `delete`:
//!
//! ```text
//! { "update": {"_id": "5", "_index": "index1"} }
//! { "doc": {"my_field": "baz"} }
//! ```
//!
//! Only the action line is inspected. `create` operations get an outcome from
//! the [`ActionOdds`] table and one entry in the response; every other action
//! is only counted.

use crate::metrics::{Counter, CounterSink};
use crate::odds::{ActionOdds, ActionOutcome};
use flate2::read::GzDecoder;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{self, BufRead, BufReader, Read};
use thiserror::Error;
use tracing::{debug, warn};

/// Request-level failures. Either one aborts the request without a body.
#[derive(Debug, Error)]
pub enum BulkError {
    /// The request body could not be read or decompressed.
    #[error("failed to decode bulk body: {0}")]
    Decode(#[source] io::Error),

    /// The response could not be serialized.
    #[error("failed to encode bulk response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a single line was discarded.
#[derive(Debug, Error)]
enum LineError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("number of keys off: {0} should be 1")]
    KeyCount(usize),
}

/// Bulk response, as returned with `filter_path=errors,items.*.status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkResponse {
    pub errors: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<BulkItem>,
}

/// One response entry per `create` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItem {
    pub created: ItemStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemStatus {
    pub status: u16,
}

impl BulkResponse {
    fn record_create(&mut self, outcome: ActionOutcome) {
        if !outcome.is_ok() {
            self.errors = true;
        }
        self.items.push(BulkItem {
            created: ItemStatus {
                status: outcome.status(),
            },
        });
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> Result<Vec<u8>, BulkError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Per-request operation counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub index: u64,
    pub create: u64,
    pub update: u64,
    pub delete: u64,
    /// Well-formed action lines naming an action we don't know.
    pub unknown: u64,
    /// Lines that were not a single-key JSON object.
    pub discarded: u64,
}

/// Result of processing one bulk body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub response: BulkResponse,
    pub summary: BulkSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Index,
    Create,
    Update,
    Delete,
    Other,
}

impl Action {
    fn from_key(key: &str) -> Self {
        match key {
            "index" => Action::Index,
            "create" => Action::Create,
            "update" => Action::Update,
            "delete" => Action::Delete,
            _ => Action::Other,
        }
    }
}

/// What the next non-blank line is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// An action line; it is parsed.
    Action,
    /// The document companion of the previous action; it is skipped.
    Document,
}

/// Parse an action line into its action.
fn parse_action(line: &[u8]) -> Result<Action, LineError> {
    let object: Map<String, Value> = serde_json::from_slice(line)?;
    if object.len() != 1 {
        return Err(LineError::KeyCount(object.len()));
    }
    Ok(object
        .keys()
        .next()
        .map_or(Action::Other, |key| Action::from_key(key)))
}

fn outcome_counter(outcome: ActionOutcome) -> Counter {
    match outcome {
        ActionOutcome::Ok => Counter::CreateOk,
        ActionOutcome::Conflict => Counter::CreateDuplicate,
        ActionOutcome::TooManyRequests => Counter::CreateTooMany,
        ActionOutcome::NotAcceptable => Counter::CreateNonIndex,
    }
}

/// Strip the line terminator (`\n` or `\r\n`).
fn trim_line_end(mut line: &[u8]) -> &[u8] {
    if let [rest @ .., b'\n'] = line {
        line = rest;
    }
    if let [rest @ .., b'\r'] = line {
        line = rest;
    }
    line
}

/// Longest line kept in memory, matching the 64 KiB token limit of
/// common bulk clients' line scanners.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Result of reading one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRead {
    Eof,
    /// The line is in the buffer, terminator included.
    Line,
    /// The line exceeded the limit; it was consumed but not kept.
    Oversized,
}

/// Read one line into `buf`, keeping at most `limit` bytes of content.
///
/// Memory stays bounded by `limit` plus one reader chunk however long the
/// line is.
fn read_bounded_line<B: BufRead>(
    reader: &mut B,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<LineRead> {
    buf.clear();
    let mut seen = false;
    let mut oversized = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }
        seen = true;

        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        if !oversized {
            buf.extend_from_slice(&available[..used]);
            if trim_line_end(buf).len() > limit {
                oversized = true;
                buf.clear();
            }
        }
        reader.consume(used);
        if done {
            break;
        }
    }

    Ok(match (seen, oversized) {
        (false, _) => LineRead::Eof,
        (true, false) => LineRead::Line,
        (true, true) => LineRead::Oversized,
    })
}

/// Streams a bulk body and builds the simulated response.
pub struct BulkProcessor<'a> {
    odds: &'a ActionOdds,
    counters: &'a dyn CounterSink,
    max_line_bytes: usize,
}

impl<'a> BulkProcessor<'a> {
    pub fn new(odds: &'a ActionOdds, counters: &'a dyn CounterSink) -> Self {
        Self {
            odds,
            counters,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Override [`MAX_LINE_BYTES`].
    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Process a raw request body, gunzipping it first when `gzip` is set.
    ///
    /// The body is consumed as it is read; nothing beyond the current line
    /// is buffered.
    pub fn process_body<D: Read, R: Rng + ?Sized>(
        &self,
        body: D,
        gzip: bool,
        rng: &mut R,
    ) -> Result<BulkOutcome, BulkError> {
        if gzip {
            self.process(BufReader::new(GzDecoder::new(body)), rng)
        } else {
            self.process(BufReader::new(body), rng)
        }
    }

    /// Process a line-oriented stream.
    ///
    /// Read errors abort processing; malformed lines are logged and skipped.
    pub fn process<B: BufRead, R: Rng + ?Sized>(
        &self,
        mut reader: B,
        rng: &mut R,
    ) -> Result<BulkOutcome, BulkError> {
        let mut outcome = BulkOutcome::default();
        let mut expect = Expect::Action;
        let mut buf = Vec::new();
        let mut line_no: u64 = 0;

        loop {
            let read = read_bounded_line(&mut reader, &mut buf, self.max_line_bytes)
                .map_err(BulkError::Decode)?;
            expect = match read {
                LineRead::Eof => break,
                LineRead::Line => {
                    line_no += 1;
                    self.step(expect, trim_line_end(&buf), line_no, &mut outcome, rng)
                }
                LineRead::Oversized => {
                    line_no += 1;
                    // An oversized document is skipped like any other.
                    if expect == Expect::Action {
                        warn!(
                            line = line_no,
                            limit = self.max_line_bytes,
                            "Discarding oversized bulk line"
                        );
                        outcome.summary.discarded += 1;
                    }
                    Expect::Action
                }
            };
        }

        debug!(
            lines = line_no,
            creates = outcome.summary.create,
            discarded = outcome.summary.discarded,
            errors = outcome.response.errors,
            "Processed bulk body"
        );

        Ok(outcome)
    }

    /// Handle one line and return the next state.
    fn step<R: Rng + ?Sized>(
        &self,
        expect: Expect,
        line: &[u8],
        line_no: u64,
        outcome: &mut BulkOutcome,
        rng: &mut R,
    ) -> Expect {
        // A blank line also ends a pending document skip.
        if line.is_empty() || expect == Expect::Document {
            return Expect::Action;
        }

        let action = match parse_action(line) {
            Ok(action) => action,
            Err(e) => {
                warn!(line = line_no, error = %e, "Discarding bulk line");
                outcome.summary.discarded += 1;
                return Expect::Action;
            }
        };

        match action {
            Action::Index => {
                self.counters.increment(Counter::Index);
                outcome.summary.index += 1;
                Expect::Document
            }
            Action::Create => {
                let result = self.odds.sample(rng);
                self.counters.increment(outcome_counter(result));
                outcome.summary.create += 1;
                outcome.response.record_create(result);
                Expect::Document
            }
            Action::Update => {
                self.counters.increment(Counter::Update);
                outcome.summary.update += 1;
                Expect::Document
            }
            Action::Delete => {
                self.counters.increment(Counter::Delete);
                outcome.summary.delete += 1;
                Expect::Action
            }
            Action::Other => {
                outcome.summary.unknown += 1;
                expect
            }
        }
    }
}
