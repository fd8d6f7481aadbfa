use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use mcdsim::mem::controller::MemoryController;
use mcdsim::mem::hash::Lcg48;
use mcdsim::mem::request::{AccessKind, MemRequest};
use mcdsim::sim::config::{Config, MemConfig, SimConfig};
use mcdsim::sim::{build_controller, stats_dump};

#[derive(Parser)]
#[command(version, about)]
struct McdsimArgs {
    /// TOML configuration file; defaults apply when omitted.
    config_path: Option<PathBuf>,

    #[arg(long)]
    scheme: Option<String>,
    #[arg(long)]
    requests: Option<u64>,
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

/// Deterministic synthetic traffic: interleaved strided streams with a
/// pseudo-random store mix.
fn synthetic_request(rng: &mut Lcg48, i: u64) -> MemRequest {
    let stream = rng.next_below(4);
    let line_addr = match stream {
        0 => i % 0x10000,                      // sequential reuse window
        1 => (i * 17) % 0x40000,               // strided
        2 => rng.next_below(0x80000),          // uniform
        _ => 0x1000 + (i % 64),                // hot set
    };
    let kind = match rng.next_below(10) {
        0..=5 => AccessKind::Gets,
        6..=7 => AccessKind::Getx,
        8 => AccessKind::Putx,
        _ => AccessKind::Puts,
    };
    MemRequest::new(line_addr, kind, i)
}

fn run(mc: &MemoryController, num_requests: u64, seed: u64) -> Result<()> {
    let mut rng = Lcg48::new(seed);
    for i in 0..num_requests {
        let mut req = synthetic_request(&mut rng, i);
        mc.access(&mut req)
            .with_context(|| format!("request {i} at {:#x}", req.line_addr))?;
        if i % 1024 == 0 {
            mc.tick(i);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = McdsimArgs::parse();

    let doc: toml::Value = match &args.config_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?
            .parse()
            .with_context(|| format!("cannot parse {}", path.display()))?,
        None => toml::Value::Table(Default::default()),
    };
    let sim = SimConfig::from_section(doc.get("sim"));
    let mut mem = MemConfig::from_section(doc.get("mem"));
    if let Some(scheme) = args.scheme {
        mem.cache_scheme = scheme;
    }
    let num_requests = args.requests.unwrap_or(sim.num_requests);

    let mc = build_controller(&mem, "mem-0", 0)?;
    info!(
        "running {} requests against {}",
        num_requests, mem.cache_scheme
    );
    run(&mc, num_requests, sim.seed)?;

    let report = mc.stats_report();
    let stats_out = args
        .stats_out
        .or_else(|| sim.stats_out.as_ref().map(PathBuf::from));
    match stats_out {
        Some(path) => {
            stats_dump::write_stats(&path, &report)
                .with_context(|| format!("cannot write {}", path.display()))?;
            info!("stats written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
