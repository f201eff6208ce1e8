//! Host counters read through `sysinfo`.
//!
//! Each metric family lives in its own module and can be switched off
//! individually. Load average and uptime ride along with the CPU family.

mod cpu;
mod disk;
mod load;
mod memory;
mod network;

use crate::{CollectContext, CollectError, Result, Source};
use async_trait::async_trait;
use metricsd_common::Metric;
use std::sync::Mutex;

pub use cpu::CpuCollector;
pub use disk::DiskCollector;
pub use load::LoadCollector;
pub use memory::MemoryCollector;
pub use network::NetworkCollector;

/// Which families the [`SystemSource`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemFamilies {
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
    pub network: bool,
}

impl SystemFamilies {
    pub fn all() -> Self {
        Self {
            cpu: true,
            memory: true,
            disk: true,
            network: true,
        }
    }

    pub fn any(&self) -> bool {
        self.cpu || self.memory || self.disk || self.network
    }
}

#[derive(Default)]
struct Collectors {
    cpu: Option<CpuCollector>,
    load: Option<LoadCollector>,
    memory: Option<MemoryCollector>,
    disk: Option<DiskCollector>,
    network: Option<NetworkCollector>,
}

pub struct SystemSource {
    collectors: Mutex<Collectors>,
}

impl SystemSource {
    pub fn new(families: SystemFamilies) -> Self {
        let collectors = Collectors {
            cpu: families.cpu.then(CpuCollector::new),
            load: families.cpu.then(LoadCollector::new),
            memory: families.memory.then(MemoryCollector::new),
            disk: families.disk.then(DiskCollector::new),
            network: families.network.then(NetworkCollector::new),
        };
        Self {
            collectors: Mutex::new(collectors),
        }
    }
}

#[async_trait]
impl Source for SystemSource {
    fn name(&self) -> &str {
        "system"
    }

    async fn collect(&self, _ctx: &CollectContext) -> Result<Vec<Metric>> {
        let mut collectors = self
            .collectors
            .lock()
            .map_err(|_| CollectError::Other("system collector state poisoned".into()))?;
        let mut metrics = Vec::new();
        if let Some(cpu) = collectors.cpu.as_mut() {
            cpu.collect(&mut metrics);
        }
        if let Some(load) = collectors.load.as_mut() {
            load.collect(&mut metrics);
        }
        if let Some(memory) = collectors.memory.as_mut() {
            memory.collect(&mut metrics);
        }
        if let Some(disk) = collectors.disk.as_mut() {
            disk.collect(&mut metrics);
        }
        if let Some(network) = collectors.network.as_mut() {
            network.collect(&mut metrics);
        }
        Ok(metrics)
    }
}
