//! The orchestrator: opens hop 1, then walks every hop in order
//! negotiating it over the one re-used transport, producing a single
//! end-to-end tunnel plus a [`ConnectionReport`] of what happened.

use crate::clients::{negotiate_hop, StepError};
use crate::descriptor::{ChainDescriptor, ConfigError};
use crate::general::{ConnectionReport, EngineConfig, EngineStats, StepKind, StepOutcome, StepRecord};
use crate::transport::{Connector, TcpConnector, Transport, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Everything that can make [`Engine::build_chain`] fail. Displays the
/// failing step index and underlying cause; never interpolates hop
/// credentials, since none of the wrapped error types do either.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("step {step} failed: {source}")]
    Step {
        step: u32,
        #[source]
        source: StepError,
        report: Option<ConnectionReport>,
    },
    #[error("step {step} timed out ({scope} deadline)")]
    Timeout {
        step: u32,
        scope: &'static str,
        report: Option<ConnectionReport>,
    },
}

impl ChainError {
    /// The step log accumulated before this error occurred, with the last
    /// step carrying the error (spec.md §4.5's cleanup contract). `None`
    /// only for [`ChainError::Config`], which fails before any chain
    /// context — hop 1, target, deadline — is established.
    pub fn report(&self) -> Option<&ConnectionReport> {
        match self {
            ChainError::Config(_) => None,
            ChainError::Step { report, .. } => report.as_ref(),
            ChainError::Timeout { report, .. } => report.as_ref(),
        }
    }

    fn with_report(mut self, report: ConnectionReport) -> Self {
        match &mut self {
            ChainError::Step { report: slot, .. } | ChainError::Timeout { report: slot, .. } => {
                *slot = Some(report);
            }
            ChainError::Config(_) => {}
        }
        self
    }
}

type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// An established end-to-end tunnel. Reads/writes pass straight through to
/// the underlying transport; the handle also shares ownership with the
/// engine's live-tunnel set so [`Engine::close_all`] can reach it.
pub struct TunnelHandle {
    id: u64,
    transport: SharedTransport,
}

impl TunnelHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn read_exact(&self, n: usize) -> Result<Vec<u8>, TransportError> {
        self.transport.lock().await.read_exact(n).await
    }

    pub async fn read_until_crlf(&self, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        self.transport.lock().await.read_until_crlf(max_bytes).await
    }

    pub async fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.transport.lock().await.write_all(bytes).await
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.lock().await.close().await
    }
}

/// Builds and tracks proxy-chain tunnels. Cheap to clone-share via `Arc` in
/// a caller's own code, though the engine itself is already internally
/// synchronized and can be used directly behind a shared reference.
pub struct Engine {
    config: EngineConfig,
    connector: Box<dyn Connector>,
    tunnels: Mutex<HashMap<u64, SharedTransport>>,
    next_tunnel_id: AtomicU64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            connector: Box::new(TcpConnector),
            tunnels: Mutex::new(HashMap::new()),
            next_tunnel_id: AtomicU64::new(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_connector(config: EngineConfig, connector: Box<dyn Connector>) -> Self {
        Engine {
            config,
            connector,
            tunnels: Mutex::new(HashMap::new()),
            next_tunnel_id: AtomicU64::new(1),
        }
    }

    /// Negotiates every hop of `chain` in order and returns a tunnel to
    /// `target_host:target_port`. Any failure closes the transport and
    /// unwinds with a [`ChainError`] naming the hop that failed.
    pub async fn build_chain(
        &self,
        chain: &ChainDescriptor,
        target_host: &str,
        target_port: u16,
    ) -> Result<(TunnelHandle, ConnectionReport), ChainError> {
        chain.validate()?;
        if target_host.trim().is_empty() {
            return Err(ConfigError::EmptyTargetHost.into());
        }
        if target_port == 0 {
            return Err(ConfigError::InvalidTargetPort(target_port).into());
        }

        let start_time = SystemTime::now();
        let deadline = Instant::now() + self.config.total_timeout;
        let mut steps = Vec::with_capacity(chain.proxies.len() + 1);

        let first_hop = &chain.proxies[0];
        if self.config.logging_enabled {
            tracing::info!(address = %first_hop.address, port = first_hop.port, "opening first hop");
        }
        let mut transport = match self.open_hop1_with_retry(first_hop, &deadline).await {
            Ok(transport) => transport,
            Err(err) => {
                let message = err.to_string();
                let failed_step = vec![StepRecord {
                    index: 1,
                    kind: StepKind::DirectOpen,
                    proxy: first_hop.clone(),
                    next_endpoint: None,
                    outcome: StepOutcome::Error(message.clone()),
                    timestamp: SystemTime::now(),
                }];
                let report = Self::failure_report(
                    chain,
                    target_host,
                    target_port,
                    start_time,
                    failed_step,
                    1,
                    message,
                );
                return Err(err.with_report(report));
            }
        };

        steps.push(StepRecord {
            index: 1,
            kind: StepKind::DirectOpen,
            proxy: first_hop.clone(),
            next_endpoint: None,
            outcome: StepOutcome::Ok,
            timestamp: SystemTime::now(),
        });

        let mut bind_address = None;
        let mut bind_port = None;

        for (hop_index, hop) in chain.proxies.iter().enumerate() {
            // Step-log index is 1-based with the direct_open step occupying
            // index 1, so hop negotiation steps start at 2.
            let index = hop_index as u32 + 2;
            let (next_host, next_port): (&str, u16) = match chain.proxies.get(hop_index + 1) {
                Some(next_hop) => (next_hop.address.as_str(), next_hop.port),
                None => (target_host, target_port),
            };
            let kind = if hop_index + 1 < chain.proxies.len() {
                StepKind::ProxyToProxy
            } else {
                StepKind::ProxyToTarget
            };

            if self.config.logging_enabled {
                tracing::info!(step = index, proxy = %hop.address, next = %next_host, "negotiating hop");
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let per_step = self.config.per_step_timeout.min(remaining);

            let result = timeout(
                per_step,
                negotiate_hop(&mut *transport, hop, next_host, next_port),
            )
            .await;

            let outcome = match result {
                Ok(Ok(hop_outcome)) => {
                    bind_address = hop_outcome.bind_address;
                    bind_port = hop_outcome.bind_port;
                    StepOutcome::Ok
                }
                Ok(Err(source)) => {
                    let _ = transport.close().await;
                    let err = ChainError::Step { step: index, source, report: None };
                    let message = err.to_string();
                    steps.push(StepRecord {
                        index,
                        kind,
                        proxy: hop.clone(),
                        next_endpoint: Some((next_host.to_string(), next_port)),
                        outcome: StepOutcome::Error(message.clone()),
                        timestamp: SystemTime::now(),
                    });
                    let report = Self::failure_report(
                        chain,
                        target_host,
                        target_port,
                        start_time,
                        steps,
                        index,
                        message,
                    );
                    return Err(err.with_report(report));
                }
                Err(_) => {
                    let _ = transport.close().await;
                    let scope = if remaining <= self.config.per_step_timeout {
                        "total"
                    } else {
                        "step"
                    };
                    let err = ChainError::Timeout { step: index, scope, report: None };
                    let message = err.to_string();
                    steps.push(StepRecord {
                        index,
                        kind,
                        proxy: hop.clone(),
                        next_endpoint: Some((next_host.to_string(), next_port)),
                        outcome: StepOutcome::Error(message.clone()),
                        timestamp: SystemTime::now(),
                    });
                    let report = Self::failure_report(
                        chain,
                        target_host,
                        target_port,
                        start_time,
                        steps,
                        index,
                        message,
                    );
                    return Err(err.with_report(report));
                }
            };

            steps.push(StepRecord {
                index,
                kind,
                proxy: hop.clone(),
                next_endpoint: Some((next_host.to_string(), next_port)),
                outcome,
                timestamp: SystemTime::now(),
            });
        }

        let shared: SharedTransport = Arc::new(Mutex::new(transport));
        let id = self.next_tunnel_id.fetch_add(1, Ordering::Relaxed);
        self.tunnels.lock().await.insert(id, shared.clone());

        let report = ConnectionReport {
            chain_id: chain.id.clone(),
            chain_name: chain.name.clone(),
            target_host: target_host.to_string(),
            target_port,
            steps,
            start_time,
            duration: start_time.elapsed().unwrap_or(Duration::ZERO),
            bind_address,
            bind_port,
            error_message: None,
            failing_step: None,
        };

        Ok((TunnelHandle { id, transport: shared }, report))
    }

    /// Builds the [`ConnectionReport`] attached to a failed [`ChainError`],
    /// carrying whatever step log had accumulated before the failure.
    fn failure_report(
        chain: &ChainDescriptor,
        target_host: &str,
        target_port: u16,
        start_time: SystemTime,
        steps: Vec<StepRecord>,
        failing_step: u32,
        error_message: String,
    ) -> ConnectionReport {
        ConnectionReport {
            chain_id: chain.id.clone(),
            chain_name: chain.name.clone(),
            target_host: target_host.to_string(),
            target_port,
            steps,
            start_time,
            duration: start_time.elapsed().unwrap_or(Duration::ZERO),
            bind_address: None,
            bind_port: None,
            error_message: Some(error_message),
            failing_step: Some(failing_step),
        }
    }

    async fn open_hop1_with_retry(
        &self,
        first_hop: &crate::descriptor::ProxyDescriptor,
        deadline: &Instant,
    ) -> Result<Box<dyn Transport>, ChainError> {
        let attempts = 1 + self.config.max_retries;
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = Duration::from_secs(attempt as u64);
                if self.config.logging_enabled {
                    tracing::warn!(attempt, backoff_secs = attempt, "retrying first hop after backoff");
                }
                tokio::time::sleep(backoff).await;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChainError::Timeout { step: 0, scope: "total", report: None });
            }
            let per_step = self.config.per_step_timeout.min(remaining);

            match timeout(
                per_step,
                self.connector.open(&first_hop.address, first_hop.port),
            )
            .await
            {
                Ok(Ok(transport)) => return Ok(transport),
                Ok(Err(source)) => {
                    last_err = Some(ChainError::Step {
                        step: 0,
                        source: source.into(),
                        report: None,
                    })
                }
                Err(_) => {
                    let scope = if remaining <= self.config.per_step_timeout {
                        "total"
                    } else {
                        "step"
                    };
                    return Err(ChainError::Timeout { step: 0, scope, report: None });
                }
            }
        }

        Err(last_err.expect("loop always runs at least once"))
    }

    /// Closes every live tunnel and returns how many were closed.
    /// Administrative only: not a connection pool, and closed tunnels are
    /// removed from the set.
    pub async fn close_all(&self) -> usize {
        let mut tunnels = self.tunnels.lock().await;
        let count = tunnels.len();
        for (_, transport) in tunnels.drain() {
            let _ = transport.lock().await.close().await;
        }
        count
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            live_tunnel_count: self.tunnels.lock().await.len(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ChainDescriptor, ProxyDescriptor, ProxyKind};
    use crate::testing::{FailingConnector, ScriptedConnector, ScriptedTransport, StallingConnector};

    fn cfg() -> EngineConfig {
        EngineConfig::new(
            Duration::from_millis(500),
            Duration::from_millis(2000),
            1,
            false,
        )
    }

    #[tokio::test]
    async fn single_hop_socks5_chain_s1() {
        let mut script = vec![0x05, 0x00];
        script.extend_from_slice(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        let transport = ScriptedTransport::new(script);
        let connector = Box::new(ScriptedConnector::new(transport.clone()));
        let engine = Engine::with_connector(cfg(), connector);

        let chain = ChainDescriptor::new("c1", "single hop").with_proxies(vec![
            ProxyDescriptor::new("proxy1", 1080, ProxyKind::Socks5),
        ]);

        let (handle, report) = engine.build_chain(&chain, "1.2.3.4", 443).await.unwrap();
        // S1: one direct_open step plus one proxy_to_target step (N+1 = 2).
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].kind, StepKind::DirectOpen);
        assert_eq!(report.steps[0].index, 1);
        assert!(matches!(report.steps[1].outcome, StepOutcome::Ok));
        assert_eq!(report.steps[1].kind, StepKind::ProxyToTarget);
        assert_eq!(report.steps[1].index, 2);
        handle.close().await.unwrap();
        assert_eq!(engine.stats().await.live_tunnel_count, 1);
    }

    #[tokio::test]
    async fn two_hop_chain_routes_to_next_hop_then_target() {
        // Hop 1 (SOCKS5) CONNECTs to hop 2; hop 2 (SOCKS4) CONNECTs to the target.
        let mut script = vec![0x05, 0x00];
        script.extend_from_slice(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        script.extend_from_slice(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]);
        let transport = ScriptedTransport::new(script);
        let connector = Box::new(ScriptedConnector::new(transport.clone()));
        let engine = Engine::with_connector(cfg(), connector);

        let chain = ChainDescriptor::new("c2", "two hop").with_proxies(vec![
            ProxyDescriptor::new("proxy1", 1080, ProxyKind::Socks5),
            ProxyDescriptor::new("proxy2", 1081, ProxyKind::Socks4),
        ]);

        let (_, report) = engine.build_chain(&chain, "target.example", 8080).await.unwrap();
        // N=2 hops -> N+1 = 3 step records: direct_open, proxy_to_proxy, proxy_to_target.
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.steps[0].kind, StepKind::DirectOpen);
        assert_eq!(report.steps[1].kind, StepKind::ProxyToProxy);
        assert_eq!(report.steps[1].next_endpoint.as_ref().unwrap().0, "proxy2");
        assert_eq!(report.steps[2].kind, StepKind::ProxyToTarget);
        assert_eq!(report.steps[2].next_endpoint.as_ref().unwrap().0, "target.example");
    }

    #[tokio::test]
    async fn three_hop_heterogeneous_chain_s5() {
        // Hop 1 (SOCKS5, no auth) CONNECTs to hop 2; hop 2 (SOCKS4) CONNECTs
        // to hop 3; hop 3 (HTTP CONNECT) CONNECTs to the ultimate target —
        // all three negotiated in order over the one re-used stream.
        let mut script = vec![0x05, 0x00];
        script.extend_from_slice(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        script.extend_from_slice(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]);
        script.extend_from_slice(b"HTTP/1.1 200 Connection Established\r\n\r\n");
        let transport = ScriptedTransport::new(script);
        let connector = Box::new(ScriptedConnector::new(transport.clone()));
        let engine = Engine::with_connector(cfg(), connector);

        let chain = ChainDescriptor::new("c5-3hop", "three hop").with_proxies(vec![
            ProxyDescriptor::new("proxy1", 1080, ProxyKind::Socks5),
            ProxyDescriptor::new("proxy2", 1081, ProxyKind::Socks4),
            ProxyDescriptor::new("proxy3", 3128, ProxyKind::Http),
        ]);

        let (_, report) = engine.build_chain(&chain, "target", 443).await.unwrap();
        // N=3 hops -> N+1 = 4 step records.
        assert_eq!(report.steps.len(), 4);
        assert_eq!(report.steps[0].kind, StepKind::DirectOpen);
        assert_eq!(report.steps[1].kind, StepKind::ProxyToProxy);
        assert_eq!(report.steps[1].next_endpoint.as_ref().unwrap().0, "proxy2");
        assert_eq!(report.steps[2].kind, StepKind::ProxyToProxy);
        assert_eq!(report.steps[2].next_endpoint.as_ref().unwrap().0, "proxy3");
        assert_eq!(report.steps[3].kind, StepKind::ProxyToTarget);
        assert_eq!(report.steps[3].next_endpoint.as_ref().unwrap().0, "target");
        assert!(report.steps.iter().all(|s| matches!(s.outcome, StepOutcome::Ok)));
    }

    #[tokio::test]
    async fn rejects_empty_chain_before_opening_anything() {
        let connector = Box::new(FailingConnector);
        let engine = Engine::with_connector(cfg(), connector);
        let chain = ChainDescriptor::new("c3", "empty");
        let err = engine.build_chain(&chain, "target.example", 80).await.unwrap_err();
        assert!(matches!(err, ChainError::Config(ConfigError::EmptyChain)));
    }

    #[tokio::test]
    async fn hop1_open_failure_retries_then_surfaces_step_zero() {
        let connector = Box::new(FailingConnector);
        let engine = Engine::with_connector(cfg(), connector);
        let chain = ChainDescriptor::new("c4", "unreachable").with_proxies(vec![
            ProxyDescriptor::new("proxy1", 1080, ProxyKind::Socks5),
        ]);
        let err = engine.build_chain(&chain, "target.example", 80).await.unwrap_err();
        match &err {
            ChainError::Step { step, .. } => assert_eq!(*step, 0),
            other => panic!("unexpected error: {other:?}"),
        }
        let report = err.report().expect("failure report should be attached");
        assert_eq!(report.failing_step, Some(1));
        assert!(report.steps[0].index == 1 && matches!(report.steps[0].outcome, StepOutcome::Error(_)));
    }

    #[tokio::test]
    async fn mid_chain_rejection_reports_failing_step_and_closes() {
        let mut script = vec![0x05, 0x00];
        // Connect rejected with 0x02 (not allowed by ruleset).
        script.extend_from_slice(&[0x05, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        let transport = ScriptedTransport::new(script);
        let connector = Box::new(ScriptedConnector::new(transport.clone()));
        let engine = Engine::with_connector(cfg(), connector);

        let chain = ChainDescriptor::new("c5", "rejected").with_proxies(vec![
            ProxyDescriptor::new("proxy1", 1080, ProxyKind::Socks5),
            ProxyDescriptor::new("proxy2", 1081, ProxyKind::Socks4),
        ]);

        let err = engine.build_chain(&chain, "target.example", 80).await.unwrap_err();
        // Step 1 is direct_open (already succeeded); the first hop's
        // negotiation is step 2.
        match &err {
            ChainError::Step { step, .. } => assert_eq!(*step, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(transport.is_closed().await);

        let report = err.report().expect("failure report should be attached");
        assert_eq!(report.failing_step, Some(2));
        assert_eq!(report.chain_id, "c5");
        assert!(report.error_message.is_some());
        // direct_open (ok) + the rejected hop negotiation.
        assert_eq!(report.steps.len(), 2);
    }

    #[tokio::test]
    async fn total_timeout_fires_before_per_step_timeout_s6() {
        // per_step_timeout is generous, but the total deadline is short, so
        // the stalled negotiation must fail with scope "total" (property #6:
        // deadline monotonicity — the tighter of the two bounds wins).
        let config = EngineConfig::new(
            Duration::from_secs(60),
            Duration::from_millis(50),
            0,
            false,
        );
        let connector = Box::new(StallingConnector::new(Duration::from_secs(60)));
        let engine = Engine::with_connector(config, connector);
        let chain = ChainDescriptor::new("c7", "stalled").with_proxies(vec![
            ProxyDescriptor::new("proxy1", 1080, ProxyKind::Socks5),
        ]);

        let err = engine.build_chain(&chain, "target.example", 443).await.unwrap_err();
        match err {
            ChainError::Timeout { scope, .. } => assert_eq!(scope, "total"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.stats().await.live_tunnel_count, 0);
    }

    #[tokio::test]
    async fn close_all_clears_live_tunnels() {
        let mut script = vec![0x05, 0x00];
        script.extend_from_slice(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        let transport = ScriptedTransport::new(script);
        let connector = Box::new(ScriptedConnector::new(transport.clone()));
        let engine = Engine::with_connector(cfg(), connector);
        let chain = ChainDescriptor::new("c6", "single").with_proxies(vec![
            ProxyDescriptor::new("proxy1", 1080, ProxyKind::Socks5),
        ]);
        engine.build_chain(&chain, "1.2.3.4", 443).await.unwrap();
        assert_eq!(engine.close_all().await, 1);
        assert_eq!(engine.stats().await.live_tunnel_count, 0);
        assert!(transport.is_closed().await);
    }
}
