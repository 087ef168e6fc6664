//! Scatter-gather metric sampler
//!
//! Synchronous kinds are read directly into the snapshot. Rate kinds take a
//! first reading immediately, then a scheduled task takes the second reading
//! after the sampling delay and contributes the computed rate to a
//! [`PendingJoin`]. No thread blocks for the delay.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use vigil_core::{MetricKind, Result, VigilError};

use crate::join::PendingJoin;
use crate::provider::{CpuTicks, DiskCounters, MetricsProvider, NetCounters};
use crate::rate::{cpu_usage, disk_rates, network_rates};
use crate::snapshot::{
    CpuUsage, DiskIoRate, MetricSnapshot, NetIfRate, SnapshotBuilder, SystemSummary,
};

/// Delay between the two readings of a rate metric
pub const SAMPLING_DELAY: Duration = Duration::from_secs(1);

/// First half of a rate metric
enum FirstReading {
    Cpu { ticks: CpuTicks, cpu_num: usize },
    DiskIo(Vec<DiskCounters>),
    Network(Vec<NetCounters>),
}

/// Completed rate metric, ready to merge into the snapshot
enum RateSection {
    Cpu(CpuUsage),
    DiskIo(Vec<DiskIoRate>),
    Network(Vec<NetIfRate>),
}

impl RateSection {
    fn apply(self, builder: &mut SnapshotBuilder) {
        match self {
            RateSection::Cpu(cpu) => builder.cpu(cpu),
            RateSection::DiskIo(rates) => builder.disk_io(rates),
            RateSection::Network(rates) => builder.network(rates),
        };
    }
}

/// Produces one [`MetricSnapshot`] per collection
#[derive(Clone)]
pub struct MetricSampler {
    provider: Arc<dyn MetricsProvider>,
    delay: Duration,
}

impl MetricSampler {
    pub fn new(provider: Arc<dyn MetricsProvider>) -> Self {
        Self {
            provider,
            delay: SAMPLING_DELAY,
        }
    }

    /// Override the sampling delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Collect `kinds` and hand the snapshot (or the first error) to
    /// `on_done` exactly once. `ports` are the ones the `port` kind reports on.
    ///
    /// Rate kinds are completed on the tokio runtime, so this must be called
    /// from within one when any rate kind is requested.
    pub fn collect_with<F>(&self, node: &str, kinds: &[MetricKind], ports: &[u16], on_done: F)
    where
        F: FnOnce(Result<MetricSnapshot>) + Send + 'static,
    {
        let kinds: BTreeSet<MetricKind> = kinds.iter().copied().collect();
        let mut builder = SnapshotBuilder::new(node);

        for kind in kinds.iter().filter(|k| !k.is_rate()) {
            if let Err(e) = self.read_sync(*kind, ports, &mut builder) {
                warn!("Sampling {} failed: {}", kind, e);
                on_done(Err(e));
                return;
            }
        }

        let mut firsts = Vec::new();
        for kind in kinds.iter().filter(|k| k.is_rate()) {
            match self.first_reading(*kind) {
                Ok(first) => firsts.push(first),
                Err(e) => {
                    warn!("Sampling {} failed: {}", kind, e);
                    on_done(Err(e));
                    return;
                }
            }
        }

        debug!(
            "Collecting {} kinds for {} ({} delayed)",
            kinds.len(),
            node,
            firsts.len()
        );

        let join = PendingJoin::new(firsts.len(), builder, move |result| {
            on_done(result.map(SnapshotBuilder::build))
        });

        let started = Instant::now();
        for first in firsts {
            self.schedule_second(first, started, join.clone());
        }
        join.seal();
    }

    /// Collect `kinds` into a snapshot
    pub async fn collect(&self, node: &str, kinds: &[MetricKind]) -> Result<MetricSnapshot> {
        self.collect_ports(node, kinds, &[]).await
    }

    /// Collect `kinds` into a snapshot, reporting on `ports` if the `port`
    /// kind is requested
    pub async fn collect_ports(
        &self,
        node: &str,
        kinds: &[MetricKind],
        ports: &[u16],
    ) -> Result<MetricSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.collect_with(node, kinds, ports, move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| {
            VigilError::Sampling("collection ended without delivering a snapshot".to_string())
        })?
    }

    fn read_sync(&self, kind: MetricKind, ports: &[u16], builder: &mut SnapshotBuilder) -> Result<()> {
        let provider = &self.provider;
        match kind {
            MetricKind::Process => {
                builder.process(provider.process()?);
            }
            MetricKind::Disk => {
                builder.disk(provider.disks()?);
            }
            MetricKind::Sys => {
                builder.sys(SystemSummary {
                    cpu_num: provider.cpu_count()?,
                    load_average: provider.load_average()?.effective(),
                    memory: provider.system_memory()?,
                });
            }
            MetricKind::SysFile => {
                builder.sys_file(provider.file_stores()?);
            }
            MetricKind::Memory => {
                builder.memory(provider.runtime_memory()?);
            }
            MetricKind::Thread => {
                builder.thread(provider.threads()?);
            }
            MetricKind::Gc => {
                builder.gc(provider.gc()?);
            }
            MetricKind::Port => {
                builder.port(provider.port_states(ports)?);
            }
            MetricKind::Cpu | MetricKind::DiskIo | MetricKind::Network => {
                return Err(VigilError::Sampling(format!(
                    "{} is a rate metric and cannot be read synchronously",
                    kind
                )));
            }
        }
        Ok(())
    }

    fn first_reading(&self, kind: MetricKind) -> Result<FirstReading> {
        match kind {
            MetricKind::Cpu => Ok(FirstReading::Cpu {
                ticks: self.provider.cpu_ticks()?,
                cpu_num: self.provider.cpu_count()?,
            }),
            MetricKind::DiskIo => Ok(FirstReading::DiskIo(self.provider.disk_counters()?)),
            MetricKind::Network => Ok(FirstReading::Network(self.provider.net_counters()?)),
            other => Err(VigilError::Sampling(format!(
                "{} is not a rate metric",
                other
            ))),
        }
    }

    fn schedule_second(
        &self,
        first: FirstReading,
        started: Instant,
        join: Arc<PendingJoin<SnapshotBuilder>>,
    ) {
        let provider = self.provider.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let elapsed = started.elapsed();

            match second_reading(provider.as_ref(), first, elapsed) {
                Ok(section) => {
                    join.complete_one(|builder| section.apply(builder));
                }
                Err(e) => {
                    warn!("Second sampling reading failed: {}", e);
                    join.fail(e);
                }
            }
        });
    }
}

fn second_reading(
    provider: &dyn MetricsProvider,
    first: FirstReading,
    elapsed: Duration,
) -> Result<RateSection> {
    match first {
        FirstReading::Cpu { ticks, cpu_num } => {
            let now = provider.cpu_ticks()?;
            Ok(RateSection::Cpu(cpu_usage(&ticks, &now, cpu_num)))
        }
        FirstReading::DiskIo(before) => {
            let now = provider.disk_counters()?;
            Ok(RateSection::DiskIo(disk_rates(&before, &now, elapsed)))
        }
        FirstReading::Network(before) => {
            let now = provider.net_counters()?;
            Ok(RateSection::Network(network_rates(&before, &now, elapsed)))
        }
    }
}
