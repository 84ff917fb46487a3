//! A decoder backend that replays a recorded transcript.
//!
//! A transcript is a JSON array of entries:
//!
//! ```json
//! [
//!   {
//!     "arch": "arm",
//!     "modes": ["thumb"],
//!     "bytes": "0x61,0xb6",
//!     "insn": { "mnemonic": "cpsie", "op_str": "f", "cps_mode": 2, "cps_flag": 1 }
//!   }
//! ]
//! ```
//!
//! Decoding looks for the longest recorded byte sequence that is a prefix of the bytes at
//! the cursor, among the entries recorded for the same architecture and modes.

use super::{Backend, DecodeContext, DecodeError, DecodedInstruction, Decoder, format_bytes};
use crate::directive::{Arch, Mode, ModeSet};
use crate::parser::parse_byte_list;
use anyhow::{Context as _, Result, anyhow};
use serde_derive::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Entry {
    arch: String,
    modes: Vec<String>,
    bytes: String,
    insn: DecodedInstruction,
}

type Table = HashMap<(Arch, ModeSet), Vec<(Vec<u8>, DecodedInstruction)>>;

/// Backend serving decodes from a transcript.
pub struct ReplayBackend {
    table: Arc<Table>,
}

impl ReplayBackend {
    /// Load a transcript from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<Entry> = serde_json::from_str(json).context("malformed transcript")?;
        let mut table = Table::new();
        for (i, entry) in entries.into_iter().enumerate() {
            let arch: Arch = entry
                .arch
                .parse()
                .map_err(|e| anyhow!("transcript entry {i}: {e}"))?;
            let modes = entry
                .modes
                .iter()
                .map(|m| m.parse::<Mode>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow!("transcript entry {i}: {e}"))?;
            let bytes =
                parse_byte_list(&entry.bytes).map_err(|e| anyhow!("transcript entry {i}: {e}"))?;
            let mut insn = entry.insn;
            if insn.size == 0 {
                insn.size = bytes.len();
            }
            table
                .entry((arch, ModeSet::new(modes)))
                .or_default()
                .push((bytes, insn));
        }
        Ok(Self {
            table: Arc::new(table),
        })
    }

    /// Load a transcript file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read transcript {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("in transcript {}", path.display()))
    }

    /// Number of recorded instructions.
    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Backend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn is_reentrant(&self) -> bool {
        true
    }

    fn open(&self, context: &DecodeContext) -> Result<Box<dyn Decoder>, DecodeError> {
        Ok(Box::new(ReplayDecoder {
            table: self.table.clone(),
            key: (context.arch, context.modes.clone()),
        }))
    }
}

struct ReplayDecoder {
    table: Arc<Table>,
    key: (Arch, ModeSet),
}

impl Decoder for ReplayDecoder {
    fn decode(&mut self, bytes: &[u8], address: u64) -> Result<DecodedInstruction, DecodeError> {
        self.table
            .get(&self.key)
            .into_iter()
            .flatten()
            .filter(|(recorded, _)| bytes.starts_with(recorded))
            .max_by_key(|(recorded, _)| recorded.len())
            .map(|(_, insn)| insn.clone())
            .ok_or_else(|| DecodeError::InvalidEncoding {
                offset: address as usize,
                bytes: format_bytes(&bytes[..bytes.len().min(4)]),
            })
    }
}
