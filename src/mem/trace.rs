//! Binary access-trace writer. Little-endian layout: a 4-byte zero
//! header, then full batches of 10_000 u64 line addresses followed by
//! 10_000 u32 kinds (0 = read, 1 = write). Partial batches are dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const TRACE_BATCH_LEN: usize = 10_000;

#[derive(Debug)]
pub struct TraceWriter {
    path: PathBuf,
    addrs: Vec<u64>,
    kinds: Vec<u32>,
}

impl TraceWriter {
    pub fn create(dir: &Path, name: &str) -> io::Result<Self> {
        let path = dir.join(format!("{name}trace.bin"));
        let mut file = File::create(&path)?;
        file.write_all(&0u32.to_le_bytes())?;
        Ok(Self {
            path,
            addrs: Vec::with_capacity(TRACE_BATCH_LEN),
            kinds: Vec::with_capacity(TRACE_BATCH_LEN),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, line_addr: u64, is_write: bool) -> io::Result<()> {
        self.addrs.push(line_addr);
        self.kinds.push(is_write as u32);
        if self.addrs.len() == TRACE_BATCH_LEN {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn flush_batch(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut out = BufWriter::new(file);
        for addr in &self.addrs {
            out.write_all(&addr.to_le_bytes())?;
        }
        for kind in &self.kinds {
            out.write_all(&kind.to_le_bytes())?;
        }
        out.flush()?;
        self.addrs.clear();
        self.kinds.clear();
        Ok(())
    }
}
