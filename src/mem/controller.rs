//! The memory-controller front-end: applies coherence state updates,
//! discards clean write-backs, remaps addresses through the page mapper,
//! gates every access through the configured cache scheme, and runs the
//! periodic bandwidth-balance step.

use std::path::Path;
use std::sync::Mutex;

use log::warn;
use serde_json::json;

use crate::mem::device::DramPool;
use crate::mem::error::FatalError;
use crate::mem::page_map::{PageMapMode, PageMapper};
use crate::mem::request::{AccessKind, Cycle, MemRequest, MesiState};
use crate::mem::scheme::{build_scheme, CacheScheme, SchemeParams};
use crate::mem::trace::TraceWriter;

pub struct MemoryController {
    name: String,
    inner: Mutex<Inner>,
}

struct Inner {
    id: u64,
    scheme: Box<dyn CacheScheme>,
    pool: DramPool,
    mapper: PageMapper,
    num_requests: u64,
    step_length: u64,
    bw_balance: bool,
    trace: Option<TraceWriter>,
    warned_zero: bool,
}

impl MemoryController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        id: u64,
        params: SchemeParams,
        pagemap: PageMapMode,
        pool: DramPool,
        step_length: u64,
        page_size: u64,
        trace_dir: Option<&Path>,
    ) -> Result<Self, FatalError> {
        let name = name.into();
        let cfg = &params.cfg;
        let bw_balance = cfg.bw_balance;
        let step_length = if step_length == 0 {
            (cfg.cache_size / 64 / 10).max(1)
        } else {
            step_length
        };
        let mapper = PageMapper::new(pagemap, cfg.ext_size, page_size, id);

        // Only the first controller records a trace.
        let trace = match trace_dir {
            Some(dir) if name == "mem-0" => Some(TraceWriter::create(dir, &name).map_err(|e| {
                FatalError::config(format!("cannot create trace file in {}: {e}", dir.display()))
            })?),
            _ => None,
        };

        let scheme = build_scheme(params)?;
        Ok(Self {
            name,
            inner: Mutex::new(Inner {
                id,
                scheme,
                pool,
                mapper,
                num_requests: 0,
                step_length,
                bw_balance,
                trace,
                warned_zero: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self, req: &mut MemRequest) -> Result<Cycle, FatalError> {
        req.state = match req.kind {
            AccessKind::Puts | AccessKind::Putx => MesiState::I,
            AccessKind::Gets => {
                if req.no_excl {
                    MesiState::S
                } else {
                    MesiState::E
                }
            }
            AccessKind::Getx => MesiState::M,
        };
        // Clean write-backs carry no data the memory side cares about.
        if req.kind == AccessKind::Puts {
            return Ok(req.cycle);
        }

        let mut inner = self.inner.lock().expect("controller mutex poisoned");
        let inner = &mut *inner;

        if let Some(trace) = inner.trace.as_mut() {
            if let Err(e) = trace.record(req.line_addr, req.kind.is_writeback()) {
                warn!("trace write failed: {e}");
            }
        }

        if req.line_addr == 0 && !inner.warned_zero {
            warn!("{}: access to address 0", self.name);
            inner.warned_zero = true;
        }

        inner.num_requests += 1;
        let entry_cycle = req.cycle;
        let virt_addr = req.line_addr;
        req.line_addr = inner.mapper.map_line(virt_addr)?;
        let result = inner.scheme.access(req, &mut inner.pool);
        req.line_addr = virt_addr;
        let response = result?;
        if response < entry_cycle {
            return Err(FatalError::DeviceFailure(format!(
                "response cycle {response} precedes request cycle {entry_cycle}"
            )));
        }

        if inner.bw_balance && inner.num_requests % inner.step_length == 0 {
            inner.scheme.period(req, &mut inner.pool)?;
        }
        Ok(response)
    }

    /// Advances the device models; called once per host tick.
    pub fn tick(&self, cycle: Cycle) {
        let mut inner = self.inner.lock().expect("controller mutex poisoned");
        for dev in &mut inner.pool.mcdram {
            dev.ticks(cycle);
        }
        inner.pool.ext.ticks(cycle);
    }

    pub fn num_requests(&self) -> u64 {
        self.inner
            .lock()
            .expect("controller mutex poisoned")
            .num_requests
    }

    pub fn mapped_pages(&self) -> usize {
        self.inner
            .lock()
            .expect("controller mutex poisoned")
            .mapper
            .mapped_pages()
    }

    /// Runs a closure against the scheme, for inspection in tests and in
    /// the stats report.
    pub fn with_scheme<R>(&self, f: impl FnOnce(&dyn CacheScheme) -> R) -> R {
        let inner = self.inner.lock().expect("controller mutex poisoned");
        f(inner.scheme.as_ref())
    }

    pub fn stats_report(&self) -> serde_json::Value {
        let inner = self.inner.lock().expect("controller mutex poisoned");
        let mut report = json!({
            "name": self.name,
            "id": inner.id,
            "numRequests": inner.num_requests,
            "mappedPages": inner.mapper.mapped_pages(),
        });
        report["scheme"] = inner.scheme.stats_report();
        report["extDram"] = serde_json::to_value(inner.pool.ext.stats()).unwrap_or_default();
        report["mcdram"] = serde_json::Value::Array(
            inner
                .pool
                .mcdram
                .iter()
                .map(|d| serde_json::to_value(d.stats()).unwrap_or_default())
                .collect(),
        );
        report
    }
}
