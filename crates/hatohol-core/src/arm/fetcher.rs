//! The backend capability an [`Arm`](super::Arm) polls through.
//!
//! Concrete adapters (Zabbix JSON-RPC, Nagios NDOUtils, plugin processes over
//! a message broker) live outside this crate. The arm only needs to know
//! whether a fetch worked and, when it did not, which failure slot to blame.

use chrono::{DateTime, Utc};
use hatohol_common::TriggerId;
use serde::{Deserialize, Serialize};

/// Failure categories a poller can report, deepest first.
///
/// The declaration order is the escalation order: a failure at a lower index
/// (can't reach the broker at all) masks the significance of every failure
/// at a higher index (the payload didn't parse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BrokerUnreachable,
    PluginUnavailable,
    Disconnected,
    ParserError,
    PluginInternalError,
    InternalError,
}

impl FailureKind {
    /// Number of failure slots per arm.
    pub const COUNT: usize = 6;

    /// Every kind, in escalation order.
    pub const ALL: [FailureKind; FailureKind::COUNT] = [
        FailureKind::BrokerUnreachable,
        FailureKind::PluginUnavailable,
        FailureKind::Disconnected,
        FailureKind::ParserError,
        FailureKind::PluginInternalError,
        FailureKind::InternalError,
    ];

    /// Position in the escalation table.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable trigger ID used when the poller doesn't supply its own.
    pub fn default_trigger_id(self) -> &'static str {
        match self {
            FailureKind::BrokerUnreachable => "self.broker_unreachable",
            FailureKind::PluginUnavailable => "self.plugin_unavailable",
            FailureKind::Disconnected => "self.disconnected",
            FailureKind::ParserError => "self.parser_error",
            FailureKind::PluginInternalError => "self.plugin_internal_error",
            FailureKind::InternalError => "self.internal_error",
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            FailureKind::BrokerUnreachable => "Failed to connect to the message broker.",
            FailureKind::PluginUnavailable => "The monitoring plugin is not available.",
            FailureKind::Disconnected => "Failed to connect to the monitoring server.",
            FailureKind::ParserError => "Failed to parse a response from the monitoring server.",
            FailureKind::PluginInternalError => "The monitoring plugin reported an internal error.",
            FailureKind::InternalError => "An internal error occurred while polling.",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::BrokerUnreachable => "broker_unreachable",
            FailureKind::PluginUnavailable => "plugin_unavailable",
            FailureKind::Disconnected => "disconnected",
            FailureKind::ParserError => "parser_error",
            FailureKind::PluginInternalError => "plugin_internal_error",
            FailureKind::InternalError => "internal_error",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        FailureKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.to_string() == wanted)
            .ok_or_else(|| format!("unknown failure kind: {}", s))
    }
}

/// Outcome of one fetch or poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "kind")]
pub enum PollResult {
    Ok,
    Failed(FailureKind),
}

impl PollResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, PollResult::Ok)
    }
}

impl std::str::FromStr for PollResult {
    type Err = String;

    /// `ok`, or the name of a failure kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("ok") {
            return Ok(PollResult::Ok);
        }
        s.parse::<FailureKind>().map(PollResult::Failed)
    }
}

/// A failure slot a poller wants tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub kind: FailureKind,
    pub trigger_id: TriggerId,
    pub message: String,
}

impl SlotSpec {
    /// Slot with the default trigger ID and message for `kind`.
    pub fn standard(kind: FailureKind) -> Self {
        Self {
            kind,
            trigger_id: TriggerId::from(kind.default_trigger_id()),
            message: kind.default_message().to_string(),
        }
    }
}

/// Parameters of an on-demand history fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub host_id: String,
    pub item_id: String,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One historical value of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySample {
    pub item_id: String,
    pub value: String,
    pub clock: DateTime<Utc>,
}

/// Backend operations an arm runs on its worker thread.
///
/// Every call blocks the worker; implementations are expected to apply their
/// own transport timeouts.
pub trait Fetcher: Send {
    /// Failure slots this poller can raise. Registered once at construction.
    fn failure_slots(&self) -> Vec<SlotSpec>;

    /// One full scheduled poll cycle against the monitored source.
    fn regular_poll(&mut self) -> PollResult;

    fn fetch_items(&mut self) -> PollResult;

    fn fetch_history(&mut self, query: &HistoryQuery) -> (PollResult, Vec<HistorySample>);

    fn fetch_triggers(&mut self) -> PollResult;

    /// Human-readable detail for the most recent failure, if any.
    fn failure_comment(&self) -> Option<String> {
        None
    }
}
