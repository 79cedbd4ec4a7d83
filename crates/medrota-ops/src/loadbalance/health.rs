//! Active health probing.
//!
//! A background task probes every registered instance each cycle, in
//! parallel. Any failure (non-expected status, timeout, connect error)
//! counts against the instance; the registry applies the failure threshold
//! and stale cleanup.

use crate::loadbalance::registry::{ServiceInstance, ServiceRegistry};
use crate::metrics::OpsMetrics;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone)]
pub enum ProbeKind {
    /// HTTP GET `path`, expecting the given status.
    Http { path: String, expect_status: u16 },
    /// TCP connect and close.
    Tcp,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub kind: ProbeKind,
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::Http {
                path: "/health".to_string(),
                expect_status: 200,
            },
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(30),
        }
    }
}

pub struct HealthProber {
    registry: Arc<ServiceRegistry>,
    config: ProbeConfig,
    metrics: Arc<OpsMetrics>,
    client: reqwest::Client,
}

impl HealthProber {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        config: ProbeConfig,
        metrics: Arc<OpsMetrics>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            registry,
            config,
            metrics,
            client,
        }
    }

    /// Probe one instance once. Returns whether it passed.
    pub async fn probe(&self, instance: &ServiceInstance) -> bool {
        let timer = self.metrics.probe_duration.start_timer();
        let passed = match &self.config.kind {
            ProbeKind::Http { path, expect_status } => {
                let url = format!("{}{}", instance.endpoint(), path);
                match self.client.get(&url).send().await {
                    Ok(response) => response.status().as_u16() == *expect_status,
                    Err(_) => false,
                }
            }
            ProbeKind::Tcp => {
                let addr = format!("{}:{}", instance.host, instance.port);
                matches!(
                    tokio::time::timeout(
                        self.config.timeout,
                        tokio::net::TcpStream::connect(&addr),
                    )
                    .await,
                    Ok(Ok(_))
                )
            }
        };
        timer.observe_duration();
        passed
    }

    /// Probe every registered instance concurrently and record outcomes.
    pub async fn run_cycle(&self) {
        let instances = self.registry.all_instances();
        let results = join_all(instances.iter().map(|i| self.probe(i))).await;

        for (instance, passed) in instances.iter().zip(results) {
            if passed {
                self.registry.record_probe_success(&instance.id);
            } else {
                self.registry.record_probe_failure(&instance.id);
            }
        }

        self.registry.cleanup_stale();
        self.metrics
            .lb_healthy_instances
            .set(self.registry.healthy_count() as i64);
    }

    /// Start the probe loop. The returned handle stops it and can trigger
    /// an immediate out-of-cycle probe for a single instance.
    pub fn start(self: Arc<Self>) -> ProberHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<String>();

        let prober = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(prober.config.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => prober.run_cycle().await,
                    Some(instance_id) = trigger_rx.recv() => {
                        if let Some(instance) = prober.registry.get(&instance_id) {
                            let passed = prober.probe(&instance).await;
                            if passed {
                                prober.registry.record_probe_success(&instance.id);
                            } else {
                                prober.registry.record_probe_failure(&instance.id);
                            }
                            prober.metrics
                                .lb_healthy_instances
                                .set(prober.registry.healthy_count() as i64);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        ProberHandle {
            trigger: trigger_tx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

pub struct ProberHandle {
    trigger: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ProberHandle {
    /// Request an immediate probe of one instance.
    pub fn trigger_probe(&self, instance_id: &str) {
        let _ = self.trigger.send(instance_id.to_string());
    }

    /// Sender half for components that need to trigger probes.
    pub fn trigger_sender(&self) -> mpsc::UnboundedSender<String> {
        self.trigger.clone()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
