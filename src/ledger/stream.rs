//! Streams and the Stream Registry
//!
//! Each business domain writes to its own independently chained stream with
//! its own genesis and sequence space.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::RwLock;
use tracing::info;

use crate::error::LedgerError;

const MAX_STREAM_ID_LEN: usize = 64;

/// Name of an independently chained stream: 1 to 64 chars of `[a-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    pub fn new(name: impl Into<String>) -> Result<Self, LedgerError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_STREAM_ID_LEN {
            return Err(LedgerError::InvalidStream(format!(
                "stream id must be 1 to {} characters, got {}",
                MAX_STREAM_ID_LEN,
                name.len()
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')))
        {
            return Err(LedgerError::InvalidStream(format!(
                "stream id '{}' contains invalid character '{}'",
                name, bad
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StreamId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StreamId::new(value)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Built-in business domains, each mapped to its own stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    AdminLog,
    GovernanceDecisions,
    QualityRuns,
    ReportLedger,
    DeploymentAttestations,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::AdminLog,
        Domain::GovernanceDecisions,
        Domain::QualityRuns,
        Domain::ReportLedger,
        Domain::DeploymentAttestations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::AdminLog => "admin-log",
            Domain::GovernanceDecisions => "governance-decisions",
            Domain::QualityRuns => "quality-runs",
            Domain::ReportLedger => "report-ledger",
            Domain::DeploymentAttestations => "deployment-attestations",
        }
    }

    pub fn stream_id(&self) -> StreamId {
        // Domain names are static and always valid
        StreamId(self.as_str().to_string())
    }
}

impl From<Domain> for StreamId {
    fn from(domain: Domain) -> Self {
        domain.stream_id()
    }
}

/// Set of streams the ledger accepts appends for.
#[derive(Debug)]
pub struct StreamRegistry {
    streams: RwLock<BTreeSet<StreamId>>,
    strict: bool,
}

impl StreamRegistry {
    /// Registry pre-populated with the built-in domains.
    pub fn new(strict: bool) -> Self {
        let streams = Domain::ALL.iter().map(Domain::stream_id).collect();
        Self {
            streams: RwLock::new(streams),
            strict,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Returns true if the stream was not registered before.
    pub fn register(&self, stream: StreamId) -> bool {
        let mut streams = self.streams.write().unwrap_or_else(|e| e.into_inner());
        let added = streams.insert(stream.clone());
        if added {
            info!("Registered stream '{}'", stream);
        }
        added
    }

    pub fn contains(&self, stream: &StreamId) -> bool {
        self.streams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(stream)
    }

    pub fn streams(&self) -> Vec<StreamId> {
        self.streams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Gate an append. Strict registries refuse unknown streams; lenient ones
    /// register them, starting a fresh chain at genesis.
    pub fn admit(&self, stream: &StreamId) -> Result<(), LedgerError> {
        if self.contains(stream) {
            return Ok(());
        }
        if self.strict {
            return Err(LedgerError::InvalidStream(format!(
                "stream '{}' is not registered",
                stream
            )));
        }
        self.register(stream.clone());
        Ok(())
    }
}
