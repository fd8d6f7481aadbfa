//! DRAM device timing models. The scheme layer only ever calls
//! `access(req, chain, bursts)` and reads back a response cycle; the
//! devices are timing-only and never move bytes.

use serde::Serialize;

use crate::mem::request::{Cycle, MemRequest};

/// How a device access chains onto the request's timing DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    /// Start a fresh chain at the request cycle.
    Fresh,
    /// Append to the previous access and extend the critical path.
    Chained,
    /// Append as a sibling, off the critical path. Callers discard the
    /// response cycle; the access still occupies device bandwidth.
    Sibling,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceGeometry {
    pub channels: u32,
    pub ranks: u32,
    pub bankgroups: u32,
    pub banks: u32,
    pub rows: u32,
    pub columns: u32,
}

impl Default for DeviceGeometry {
    fn default() -> Self {
        Self {
            channels: 2,
            ranks: 2,
            bankgroups: 4,
            banks: 4,
            rows: 16384,
            columns: 128,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    /// Fixed latency added to every access.
    pub latency: Cycle,
    /// Cycles one burst occupies the device.
    pub burst_cycles: Cycle,
    /// Outstanding-burst window of the timed model.
    pub queue_depth: u32,
    pub geometry: DeviceGeometry,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            latency: 50,
            burst_cycles: 1,
            queue_depth: 16,
            geometry: DeviceGeometry::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeviceStats {
    pub reads: u64,
    pub writes: u64,
    pub bursts: u64,
    pub chained: u64,
    pub siblings: u64,
}

/// A fixed-latency responder, or a service-law model with a bandwidth
/// occupancy window. Small fixed set, so static dispatch.
#[derive(Debug)]
pub enum DramDevice {
    Simple(SimpleDram),
    Timed(TimedDram),
}

impl DramDevice {
    pub fn simple(config: DeviceConfig) -> Self {
        Self::Simple(SimpleDram {
            config,
            stats: DeviceStats::default(),
        })
    }

    pub fn timed(config: DeviceConfig) -> Self {
        Self::Timed(TimedDram {
            config,
            busy_until: 0,
            stats: DeviceStats::default(),
        })
    }

    /// Response cycle for a `bursts`-long access at `req.cycle`. Always
    /// `>= req.cycle` by construction.
    pub fn access(&mut self, req: &MemRequest, chain: ChainMode, bursts: u32) -> Cycle {
        match self {
            Self::Simple(dev) => dev.access(req, chain, bursts),
            Self::Timed(dev) => dev.access(req, chain, bursts),
        }
    }

    /// Called once per controller tick by the host; returns outstanding
    /// occupancy in burst-cycles.
    pub fn ticks(&mut self, cycle: Cycle) -> u32 {
        match self {
            Self::Simple(_) => 0,
            Self::Timed(dev) => {
                let backlog = dev.busy_until.saturating_sub(cycle);
                if dev.busy_until < cycle {
                    dev.busy_until = cycle;
                }
                backlog.min(u32::MAX as u64) as u32
            }
        }
    }

    pub fn stats(&self) -> &DeviceStats {
        match self {
            Self::Simple(dev) => &dev.stats,
            Self::Timed(dev) => &dev.stats,
        }
    }

    fn config(&self) -> &DeviceConfig {
        match self {
            Self::Simple(dev) => &dev.config,
            Self::Timed(dev) => &dev.config,
        }
    }

    pub fn channels(&self) -> u32 {
        self.config().geometry.channels
    }

    pub fn ranks(&self) -> u32 {
        self.config().geometry.ranks
    }

    pub fn bankgroups(&self) -> u32 {
        self.config().geometry.bankgroups
    }

    pub fn banks(&self) -> u32 {
        self.config().geometry.banks
    }

    pub fn rows(&self) -> u32 {
        self.config().geometry.rows
    }

    pub fn columns(&self) -> u32 {
        self.config().geometry.columns
    }
}

fn record(stats: &mut DeviceStats, req: &MemRequest, chain: ChainMode, bursts: u32) {
    if req.kind.is_load() {
        stats.reads += 1;
    } else {
        stats.writes += 1;
    }
    stats.bursts += bursts as u64;
    match chain {
        ChainMode::Fresh => {}
        ChainMode::Chained => stats.chained += 1,
        ChainMode::Sibling => stats.siblings += 1,
    }
}

#[derive(Debug)]
pub struct SimpleDram {
    config: DeviceConfig,
    stats: DeviceStats,
}

impl SimpleDram {
    fn access(&mut self, req: &MemRequest, chain: ChainMode, bursts: u32) -> Cycle {
        record(&mut self.stats, req, chain, bursts);
        req.cycle + self.config.latency + bursts as u64 * self.config.burst_cycles
    }
}

/// Service-law device: base latency plus per-burst throughput, with a
/// bounded occupancy window standing in for the request queue.
#[derive(Debug)]
pub struct TimedDram {
    config: DeviceConfig,
    busy_until: Cycle,
    stats: DeviceStats,
}

impl TimedDram {
    fn access(&mut self, req: &MemRequest, chain: ChainMode, bursts: u32) -> Cycle {
        record(&mut self.stats, req, chain, bursts);
        let service = bursts as u64 * self.config.burst_cycles;
        let window = self.config.queue_depth as u64 * self.config.burst_cycles;
        // Occupancy beyond the queue window stalls the new access.
        let begin = if self.busy_until > req.cycle + window {
            self.busy_until - window
        } else {
            req.cycle
        };
        self.busy_until = self.busy_until.max(req.cycle) + service;
        begin + self.config.latency + service
    }
}

/// The two DRAM sides owned by one memory controller.
#[derive(Debug)]
pub struct DramPool {
    pub mcdram: Vec<DramDevice>,
    pub ext: DramDevice,
}

impl DramPool {
    pub fn new(mcdram: Vec<DramDevice>, ext: DramDevice) -> Self {
        Self { mcdram, ext }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::request::{AccessKind, MemRequest};

    fn req_at(cycle: Cycle) -> MemRequest {
        MemRequest::new(0x100, AccessKind::Gets, cycle)
    }

    #[test]
    fn simple_device_adds_latency_and_bursts() {
        let mut dev = DramDevice::simple(DeviceConfig {
            latency: 10,
            burst_cycles: 2,
            ..DeviceConfig::default()
        });
        let resp = dev.access(&req_at(100), ChainMode::Fresh, 4);
        assert_eq!(resp, 100 + 10 + 8);
    }

    #[test]
    fn response_never_precedes_request() {
        let mut dev = DramDevice::timed(DeviceConfig::default());
        for cycle in [0u64, 5, 3, 1000, 999] {
            let resp = dev.access(&req_at(cycle), ChainMode::Fresh, 4);
            assert!(resp >= cycle);
        }
    }

    #[test]
    fn timed_device_accumulates_occupancy() {
        let mut dev = DramDevice::timed(DeviceConfig {
            latency: 1,
            burst_cycles: 1,
            queue_depth: 2,
            ..DeviceConfig::default()
        });
        let first = dev.access(&req_at(0), ChainMode::Fresh, 4);
        // Back-to-back issue at cycle 0: the window is 2 burst-cycles, so
        // the second access starts behind the backlog.
        let second = dev.access(&req_at(0), ChainMode::Fresh, 4);
        assert!(second > first);
    }

    #[test]
    fn ticks_reports_and_relaxes_backlog() {
        let mut dev = DramDevice::timed(DeviceConfig {
            latency: 1,
            burst_cycles: 1,
            queue_depth: 16,
            ..DeviceConfig::default()
        });
        dev.access(&req_at(0), ChainMode::Fresh, 8);
        assert!(dev.ticks(0) > 0);
        assert_eq!(dev.ticks(1_000_000), 0);
    }

    #[test]
    fn geometry_accessors_expose_config() {
        let dev = DramDevice::simple(DeviceConfig::default());
        assert_eq!(dev.channels(), 2);
        assert_eq!(dev.rows(), 16384);
    }
}
