/// Append-only log sink for sandwich findings.
use chrono::Local;
use parking_lot::Mutex;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::common::constants::RecordFormat;
use crate::sandwich::correlator::SandwichFinding;
use crate::sandwich::normalizer::EMPTY_ADDRESS;

/// Destination for finding records.
pub trait LogSink: Send + Sync {
    fn append(&self, record: &[u8]) -> io::Result<()>;
}

/// File-backed sink, one file per detection run.
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogSink {
    /// Creates `sandwich_attack_<timestamp>.log` inside `dir`, creating `dir` if needed.
    pub fn create(dir: &Path) -> io::Result<Self> {
        create_dir_all(dir)?;
        let name = format!(
            "sandwich_attack_{}.log",
            Local::now().format("%Y_%m_%d_%H:%M:%S")
        );
        let path = dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLogSink {
    fn append(&self, record: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        file.write_all(record)?;
        file.flush()
    }
}

/// Renders one finding as a newline-terminated record.
pub fn format_finding(finding: &SandwichFinding, format: RecordFormat) -> String {
    match format {
        RecordFormat::Text => format_text(finding),
        RecordFormat::Json => match serde_json::to_string(finding) {
            Ok(line) => line + "\n",
            // Serializing plain data cannot fail; fall back to text rather than drop the record.
            Err(_) => format_text(finding),
        },
    }
}

fn format_text(finding: &SandwichFinding) -> String {
    let mut out = format!("Detected sandwich attack in block {}:\n", finding.block_number);
    for (n, tx) in [&finding.front, &finding.victim, &finding.back]
        .into_iter()
        .enumerate()
    {
        let n = n + 1;
        out.push_str(&format!(
            "tx{n}: {:?} gas{n}: {} sender{n}: {:?} to{n}: {:?} valuein{n}: {} valueout{n}: {}\n",
            tx.hash,
            tx.gas_cost,
            tx.sender,
            tx.recipient,
            display_amount(tx.value_in()),
            display_amount(tx.value_out()),
        ));
    }
    out.push_str(&format!(
        "Trading pair address: {:?}\n",
        finding.front.token_pair.unwrap_or(EMPTY_ADDRESS)
    ));
    out
}

fn display_amount(value: Option<ethers::types::U256>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
