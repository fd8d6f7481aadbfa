use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde_json::Value;

/// Writes the end-of-run stats document, one pretty-printed JSON object.
pub fn write_stats(path: &Path, stats: &Value) -> io::Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, stats)?;
    out.write_all(b"\n")?;
    out.flush()
}
