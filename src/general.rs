//! Shared plain data that flows between the orchestrator and its callers:
//! engine configuration, the per-hop step log, and the connection report.
//!
//! Deadlines are an orchestrator-level concern rather than something each
//! protocol client owns individually, so this module holds `EngineConfig`
//! and the orchestrator's step/report types.

use crate::descriptor::ProxyDescriptor;
use std::time::{Duration, SystemTime};

/// Tunable knobs for an [`crate::chain::Engine`]. Immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub per_step_timeout: Duration,
    pub total_timeout: Duration,
    pub max_retries: u32,
    pub logging_enabled: bool,
}

impl EngineConfig {
    pub fn new(
        per_step_timeout: Duration,
        total_timeout: Duration,
        max_retries: u32,
        logging_enabled: bool,
    ) -> EngineConfig {
        EngineConfig {
            per_step_timeout,
            total_timeout,
            max_retries,
            logging_enabled,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            per_step_timeout: Duration::from_millis(30_000),
            total_timeout: Duration::from_millis(120_000),
            max_retries: 2,
            logging_enabled: true,
        }
    }
}

/// What kind of step a [`StepRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Opening the transport to hop 1.
    DirectOpen,
    /// A hop negotiating a tunnel onward to the next hop.
    ProxyToProxy,
    /// The final hop negotiating a tunnel to the ultimate target.
    ProxyToTarget,
}

/// Whether a step succeeded, and the redacted reason if it did not.
/// The wrapped string is built from a [`crate::chain::ChainError`]'s
/// `Display`, which never interpolates credentials.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Ok,
    Error(String),
}

/// One entry in the orchestrator's step log, in order, 1-based.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub index: u32,
    pub kind: StepKind,
    pub proxy: ProxyDescriptor,
    /// The host:port this hop was asked to reach; absent for `DirectOpen`.
    pub next_endpoint: Option<(String, u16)>,
    pub outcome: StepOutcome,
    pub timestamp: SystemTime,
}

/// The step-by-step account of a [`crate::chain::Engine::build_chain`]
/// call, returned alongside the tunnel handle on success and attached to
/// the [`crate::chain::ChainError`] on failure — on failure, the last step
/// in `steps` carries the error, and `error_message`/`failing_step` name it
/// again at the top level for a caller that only wants the summary.
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub chain_id: String,
    pub chain_name: String,
    pub target_host: String,
    pub target_port: u16,
    pub steps: Vec<StepRecord>,
    pub start_time: SystemTime,
    pub duration: Duration,
    /// The final hop's reported bound address/port echo. `None` on failure.
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    /// Set only when `build_chain` failed: the redacted error text.
    pub error_message: Option<String>,
    /// Set only when `build_chain` failed: the step index that failed.
    pub failing_step: Option<u32>,
}

/// Returned by [`crate::chain::Engine::stats`].
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub live_tunnel_count: usize,
    pub config: EngineConfig,
}
