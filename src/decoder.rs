//! Decoder adapter.
//!
//! The harness never decodes bytes itself. A `Backend` opens a `Decoder` for one
//! architecture context (architecture, modes, options), and the `DecoderAdapter` hands out
//! `ArchContext` capability objects that wrap those decoders. Each `ArchContext`
//! serializes access to its decoder with its own mutex, so a non-reentrant engine is never
//! entered twice at once while different architecture contexts still run in parallel.

use crate::directive::{Arch, ArchDirective, DecodeOption, ModeSet};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub mod replay;

#[cfg(feature = "disas")]
pub mod capstone;

bitflags::bitflags! {
    /// How an operand is accessed by the instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl Default for Access {
    fn default() -> Self {
        Access::empty()
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.contains(Access::READ), self.contains(Access::WRITE)) {
            (true, true) => f.write_str("READ | WRITE"),
            (true, false) => f.write_str("READ"),
            (false, true) => f.write_str("WRITE"),
            (false, false) => f.write_str("NONE"),
        }
    }
}

/// Instruction-level shift: a shifter type code and an optional amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub kind: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.value {
            Some(v) => write!(f, "{} = {}", self.kind, v),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Memory operand components.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemOperand {
    pub base: Option<String>,
    pub index: Option<String>,
    pub scale: i64,
    pub disp: i64,
    pub lshift: i64,
}

/// The typed payload of one operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    Reg(String),
    Imm(i64),
    Fp(f64),
    Mem(MemOperand),
}

impl OperandKind {
    /// The `REG`/`IMM`/`FP`/`MEM` tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Reg(_) => "REG",
            Self::Imm(_) => "IMM",
            Self::Fp(_) => "FP",
            Self::Mem(_) => "MEM",
        }
    }
}

/// One decoded operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operand {
    #[serde(flatten)]
    pub kind: OperandKind,
    #[serde(default)]
    pub access: Access,
}

/// A decoder's normalized view of one instruction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodedInstruction {
    pub mnemonic: String,
    pub op_str: String,
    /// Number of bytes consumed.
    pub size: usize,
    pub operands: Vec<Operand>,
    pub regs_read: Vec<String>,
    pub regs_modified: Vec<String>,
    pub groups: Vec<String>,
    pub writeback: Option<bool>,
    pub update_flags: Option<bool>,
    pub code_condition: Option<u32>,
    pub predicate_mask: Option<u32>,
    pub cps_mode: Option<u32>,
    pub cps_flag: Option<u32>,
    pub memory_barrier: Option<u32>,
    pub shift: Option<Shift>,
}

impl DecodedInstruction {
    /// Mnemonic and operands rendered as one line of text.
    pub fn text(&self) -> String {
        if self.op_str.is_empty() {
            self.mnemonic.clone()
        } else {
            format!("{} {}", self.mnemonic, self.op_str)
        }
    }
}

/// Ways a single decode can fail. These are per-line failures, never fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid or unsupported encoding at offset {offset}: {bytes}")]
    InvalidEncoding { offset: usize, bytes: String },
    #[error("no bytes left to decode at offset {offset}")]
    OutOfBytes { offset: usize },
    #[error("decoder does not support {0}")]
    Unsupported(String),
    #[error("decoder failure: {0}")]
    Engine(String),
}

/// Render bytes the way fixtures spell them: `0x90,0xe8`.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:#04x}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Everything that selects a decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodeContext {
    pub arch: Arch,
    pub modes: ModeSet,
    pub options: Vec<DecodeOption>,
}

impl DecodeContext {
    /// Is detail output (operands, registers, groups, scalar fields) requested?
    pub fn detail(&self) -> bool {
        self.options.contains(&DecodeOption::Detail)
    }
}

impl From<&ArchDirective> for DecodeContext {
    fn from(d: &ArchDirective) -> Self {
        Self {
            arch: d.arch,
            modes: d.modes.clone(),
            options: d.options.clone(),
        }
    }
}

impl fmt::Display for DecodeContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}]", self.arch, self.modes)
    }
}

/// A decoder bound to one architecture context.
pub trait Decoder: Send {
    /// Decode exactly one instruction from the start of `bytes`. `address` is the
    /// offset of `bytes[0]` within the test case's byte sequence.
    fn decode(&mut self, bytes: &[u8], address: u64) -> Result<DecodedInstruction, DecodeError>;
}

/// A source of decoders.
pub trait Backend: Send + Sync {
    /// Name identifying this backend in logs.
    fn name(&self) -> &'static str;

    /// May one decoder of this backend be used by several threads in turn, or must each
    /// context be shared under a lock?
    fn is_reentrant(&self) -> bool {
        false
    }

    /// Create a decoder for `context`.
    fn open(&self, context: &DecodeContext) -> Result<Box<dyn Decoder>, DecodeError>;
}

/// Read position within a test case's byte sequence.
///
/// The cursor only ever moves forward.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteCursor {
    offset: usize,
}

impl ByteCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn advance(&mut self, n: usize) {
        self.offset += n;
    }
}

/// The capability to decode within one architecture context.
pub struct ArchContext {
    context: DecodeContext,
    decoder: Mutex<Box<dyn Decoder>>,
}

impl ArchContext {
    fn new(context: DecodeContext, decoder: Box<dyn Decoder>) -> Self {
        Self {
            context,
            decoder: Mutex::new(decoder),
        }
    }

    pub fn context(&self) -> &DecodeContext {
        &self.context
    }

    /// Decode one instruction at `cursor` and advance the cursor past it.
    pub fn decode(
        &self,
        bytes: &[u8],
        cursor: &mut ByteCursor,
    ) -> Result<DecodedInstruction, DecodeError> {
        let offset = cursor.offset();
        let rest = match bytes.get(offset..) {
            Some(rest) if !rest.is_empty() => rest,
            _ => return Err(DecodeError::OutOfBytes { offset }),
        };
        let insn = {
            let mut decoder = self
                .decoder
                .lock()
                .map_err(|_| DecodeError::Engine(format!("{} decoder poisoned", self.context)))?;
            decoder.decode(rest, offset as u64)?
        };
        if insn.size == 0 || insn.size > rest.len() {
            return Err(DecodeError::Engine(format!(
                "decoder reported a size of {} with {} bytes available",
                insn.size,
                rest.len()
            )));
        }
        log::debug!(
            "{}: decoded '{}' from {} ({} bytes)",
            self.context,
            insn.text(),
            format_bytes(&rest[..insn.size]),
            insn.size
        );
        cursor.advance(insn.size);
        Ok(insn)
    }
}

/// Hands out `ArchContext`s backed by one `Backend`.
pub struct DecoderAdapter {
    backend: Arc<dyn Backend>,
    contexts: Mutex<HashMap<DecodeContext, Arc<ArchContext>>>,
}

impl DecoderAdapter {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Get the context for `directive`.
    ///
    /// Reentrant backends get a fresh context per call. Otherwise contexts are cached so
    /// every case with the same architecture context shares one decoder and its lock.
    pub fn context(&self, directive: &ArchDirective) -> Result<Arc<ArchContext>, DecodeError> {
        let key = DecodeContext::from(directive);
        if self.backend.is_reentrant() {
            let decoder = self.backend.open(&key)?;
            return Ok(Arc::new(ArchContext::new(key, decoder)));
        }

        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| DecodeError::Engine("decoder context table poisoned".to_string()))?;
        if let Some(ctx) = contexts.get(&key) {
            return Ok(ctx.clone());
        }
        log::info!("opening {} decoder for {}", self.backend.name(), key);
        let decoder = self.backend.open(&key)?;
        let ctx = Arc::new(ArchContext::new(key.clone(), decoder));
        contexts.insert(key, ctx.clone());
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{Mode, parse_arch_directive};
    use crate::error::Location;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Decodes every byte as a one-byte `nop`, except 0xff which is invalid.
    struct Nops;

    impl Decoder for Nops {
        fn decode(
            &mut self,
            bytes: &[u8],
            address: u64,
        ) -> Result<DecodedInstruction, DecodeError> {
            if bytes[0] == 0xff {
                return Err(DecodeError::InvalidEncoding {
                    offset: address as usize,
                    bytes: format_bytes(&bytes[..1]),
                });
            }
            Ok(DecodedInstruction {
                mnemonic: "nop".into(),
                size: 1,
                ..Default::default()
            })
        }
    }

    struct CountingBackend {
        opened: AtomicUsize,
        reentrant: bool,
    }

    impl Backend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn is_reentrant(&self) -> bool {
            self.reentrant
        }

        fn open(&self, _: &DecodeContext) -> Result<Box<dyn Decoder>, DecodeError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Nops))
        }
    }

    fn thumb() -> ArchDirective {
        parse_arch_directive("CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL", Location::line(1))
            .unwrap()
    }

    #[test]
    fn cursor_advances_by_consumed_bytes() {
        let ctx = ArchContext::new(DecodeContext::from(&thumb()), Box::new(Nops));
        let mut cursor = ByteCursor::new();
        ctx.decode(&[0x00, 0x01], &mut cursor).unwrap();
        assert_eq!(cursor.offset(), 1);
        ctx.decode(&[0x00, 0x01], &mut cursor).unwrap();
        assert_eq!(cursor.offset(), 2);
        assert_eq!(
            ctx.decode(&[0x00, 0x01], &mut cursor),
            Err(DecodeError::OutOfBytes { offset: 2 })
        );
    }

    #[test]
    fn failed_decode_leaves_cursor() {
        let ctx = ArchContext::new(DecodeContext::from(&thumb()), Box::new(Nops));
        let mut cursor = ByteCursor::new();
        let e = ctx.decode(&[0xff], &mut cursor).unwrap_err();
        assert_eq!(e.to_string(), "invalid or unsupported encoding at offset 0: 0xff");
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    fn contexts_are_shared_per_directive() {
        let backend = Arc::new(CountingBackend {
            opened: AtomicUsize::new(0),
            reentrant: false,
        });
        let adapter = DecoderAdapter::new(backend.clone());
        let a = adapter.context(&thumb()).unwrap();
        let b = adapter.context(&thumb()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 1);

        let arm = parse_arch_directive("CS_ARCH_ARM, CS_MODE_ARM", Location::line(3)).unwrap();
        let c = adapter.context(&arm).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(!c.context().modes.contains(Mode::Thumb));
        assert!(a.context().detail());
        assert!(!c.context().detail());
        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reentrant_backends_get_fresh_contexts() {
        let backend = Arc::new(CountingBackend {
            opened: AtomicUsize::new(0),
            reentrant: true,
        });
        let adapter = DecoderAdapter::new(backend.clone());
        let a = adapter.context(&thumb()).unwrap();
        let b = adapter.context(&thumb()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn access_display() {
        assert_eq!((Access::READ | Access::WRITE).to_string(), "READ | WRITE");
        assert_eq!(Access::WRITE.to_string(), "WRITE");
    }

    #[test]
    fn transcript_json_shape() {
        let json = r#"{
            "mnemonic": "ldrh", "op_str": "r5, [r7, #62]", "size": 2,
            "operands": [
                {"reg": "r5", "access": "WRITE"},
                {"mem": {"base": "r7", "disp": 62}, "access": "READ"}
            ],
            "regs_read": ["r7"], "regs_modified": ["r5"], "groups": ["IsThumb"]
        }"#;
        let insn: DecodedInstruction = serde_json::from_str(json).unwrap();
        assert_eq!(insn.text(), "ldrh r5, [r7, #62]");
        assert_eq!(insn.operands[0].access, Access::WRITE);
        match &insn.operands[1].kind {
            OperandKind::Mem(m) => {
                assert_eq!(m.base.as_deref(), Some("r7"));
                assert_eq!(m.disp, 62);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(insn.code_condition, None);
    }
}
