//! Result cache embedded at the top of a capture file.
//!
//! A whole-file analysis is summarised in a fixed 13-line `#` comment block that is prepended
//! to the CSV. The block is decoded with a single regular expression over its first 13 lines;
//! anything that does not match exactly is treated as "no cache".
//!
//! ```text
//! ####################################################################################################
//! # Generated by lpm01a-daq analyze.
//! # Stores the result of a whole-file calculation so that it does not
//! # have to be repeated. Delete this block to force a recalculation.
//! #
//! # This will only be generated if the calculation is done for the
//! # whole CSV file (flags -s, --start and -e, --end are not used)
//! #
//! # Generated on: 2024-05-01_14:03:59
//! # Calculation time window: 3 s (3000 ms)
//! # Number of values: 4
//! # Average current consumption: 0.0005 Ah (0.5 mAh)
//! ####################################################################################################
//! ```
//!
//! The block is not tied to the data below it; editing the samples without removing the
//! block leaves a stale result in place.

use crate::error::AppResult;
use crate::units;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Number of lines in an encoded block.
pub const CACHE_BLOCK_LINES: usize = 13;

const RULE_WIDTH: usize = 100;

const FIXED_LINES: [&str; 6] = [
    "# Generated by lpm01a-daq analyze.",
    "# Stores the result of a whole-file calculation so that it does not",
    "# have to be repeated. Delete this block to force a recalculation.",
    "#",
    "# This will only be generated if the calculation is done for the",
    "# whole CSV file (flags -s, --start and -e, --end are not used)",
];

const FLOAT: &str = r"([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)";

static CACHE_RE: Lazy<Regex> = Lazy::new(|| {
    let mut pattern = String::from(r"\A#{100,}\n");
    for line in FIXED_LINES {
        pattern.push_str(&regex::escape(line));
        pattern.push_str(r"\n");
    }
    pattern.push_str(r"#\n");
    pattern.push_str(r"# Generated on: (\d{4}-\d{2}-\d{2})_(\d{2}:\d{2}:\d{2})\n");
    pattern.push_str(&format!(r"# Calculation time window: {FLOAT} s \({FLOAT} ms\)\n"));
    pattern.push_str(r"# Number of values: (\d+)\n");
    pattern.push_str(&format!(
        r"# Average current consumption: {FLOAT} Ah \({FLOAT} mAh\)\n"
    ));
    pattern.push_str(r"#{100,}\z");
    Regex::new(&pattern).expect("Invalid cache block regex")
});

/// Decoded summary of a whole-file calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheBlock {
    /// `YYYY-MM-DD`
    pub generated_date: String,
    /// `HH:MM:SS`
    pub generated_time: String,
    /// Elapsed time covered by the calculation, in seconds.
    pub window_s: f64,
    /// The same window in milliseconds.
    pub window_ms: f64,
    /// Number of samples used.
    pub num_values: u64,
    /// Integrated charge in ampere-hours.
    pub avg_current_ah: f64,
    /// The same charge in milliampere-hours.
    pub avg_current_mah: f64,
}

impl CacheBlock {
    /// Build a block for a calculation finished at `generated`.
    pub fn new(generated: DateTime<Local>, window_s: f64, num_values: u64, charge_ah: f64) -> Self {
        Self {
            generated_date: generated.format("%Y-%m-%d").to_string(),
            generated_time: generated.format("%H:%M:%S").to_string(),
            window_s,
            window_ms: units::s_to_ms(window_s),
            num_values,
            avg_current_ah: charge_ah,
            avg_current_mah: units::a_to_ma(charge_ah),
        }
    }

    /// Render the 13-line block, newline-terminated.
    pub fn encode(&self) -> String {
        let rule = "#".repeat(RULE_WIDTH);
        let mut lines: Vec<String> = Vec::with_capacity(CACHE_BLOCK_LINES);
        lines.push(rule.clone());
        lines.extend(FIXED_LINES.iter().map(|l| l.to_string()));
        lines.push("#".to_string());
        lines.push(format!(
            "# Generated on: {}_{}",
            self.generated_date, self.generated_time
        ));
        lines.push(format!(
            "# Calculation time window: {} s ({} ms)",
            self.window_s, self.window_ms
        ));
        lines.push(format!("# Number of values: {}", self.num_values));
        lines.push(format!(
            "# Average current consumption: {} Ah ({} mAh)",
            self.avg_current_ah, self.avg_current_mah
        ));
        lines.push(rule);

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    /// Decode the block from the first 13 lines of `text`. Returns `None` on any mismatch.
    pub fn decode(text: &str) -> Option<Self> {
        let lines: Vec<&str> = text
            .lines()
            .take(CACHE_BLOCK_LINES)
            .map(|l| l.trim_end_matches('\r'))
            .collect();
        if lines.len() < CACHE_BLOCK_LINES {
            return None;
        }

        let joined = lines.join("\n");
        let caps = CACHE_RE.captures(&joined)?;
        Some(Self {
            generated_date: caps[1].to_string(),
            generated_time: caps[2].to_string(),
            window_s: caps[3].parse().ok()?,
            window_ms: caps[4].parse().ok()?,
            num_values: caps[5].parse().ok()?,
            avg_current_ah: caps[6].parse().ok()?,
            avg_current_mah: caps[7].parse().ok()?,
        })
    }
}

/// Probe `path` for a cache block. I/O failures count as a miss.
pub fn read_cache(path: impl AsRef<Path>) -> Option<CacheBlock> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("No cache for '{}': {}", path.display(), e);
            return None;
        }
    };

    let mut head = String::new();
    for line in BufReader::new(file).lines().take(CACHE_BLOCK_LINES) {
        match line {
            Ok(line) => {
                head.push_str(&line);
                head.push('\n');
            }
            Err(e) => {
                debug!("No cache for '{}': {}", path.display(), e);
                return None;
            }
        }
    }

    let block = CacheBlock::decode(&head);
    if block.is_none() {
        debug!("No parsable cache block in '{}'", path.display());
    }
    block
}

/// Remove a parsable cache block from the start of `content`, if there is one.
pub fn strip_existing_block(content: &str) -> &str {
    let head_len: usize = content
        .split_inclusive('\n')
        .take(CACHE_BLOCK_LINES)
        .map(str::len)
        .sum();
    let (head, rest) = content.split_at(head_len);
    match CacheBlock::decode(head) {
        Some(_) => rest,
        None => content,
    }
}

/// Prepend `block` to the file at `path`, replacing any block already there.
///
/// The new content is written to a temporary file in the same directory, which then
/// atomically replaces the original and keeps its permissions.
pub fn write_cache(path: impl AsRef<Path>, block: &CacheBlock) -> AppResult<()> {
    let path = path.as_ref();
    let original = std::fs::read_to_string(path)?;
    let permissions = std::fs::metadata(path)?.permissions();
    let body = strip_existing_block(&original);

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(block.encode().as_bytes())?;
    tmp.write_all(body.as_bytes())?;
    tmp.as_file().sync_all()?;
    std::fs::set_permissions(tmp.path(), permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;

    info!("Cached result in '{}'", path.display());
    Ok(())
}
