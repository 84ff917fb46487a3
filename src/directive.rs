//! Parsed representation of `!#` architecture directives.
//!
//! An architecture directive selects the architecture, the execution modes and the decoder
//! options used for every assertion line that follows it:
//!
//! ```text
//! !# CS_ARCH_ARM, CS_MODE_THUMB | CS_MODE_V8, CS_OPT_DETAIL
//! ```
//!
//! Mode tokens are combined with `|`. The same capstone mode bit may mean different things
//! on different architectures, so a `ModeSet` keeps the tokens themselves rather than
//! their bitwise union.

use crate::error::{Location, ParseResult};
use std::fmt;
use std::str::FromStr;

/// Architectures a fixture can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    Arm,
    Aarch64,
    X86,
    Mips,
    Ppc,
    Sparc,
    Sysz,
    Xcore,
    M68k,
    Tms320c64x,
    M680x,
    Evm,
    Mos65xx,
    Wasm,
    Bpf,
    Riscv,
    Sh,
    Tricore,
}

const ARCHES: &[(&str, Arch)] = &[
    ("ARM", Arch::Arm),
    ("AARCH64", Arch::Aarch64),
    ("ARM64", Arch::Aarch64),
    ("X86", Arch::X86),
    ("MIPS", Arch::Mips),
    ("PPC", Arch::Ppc),
    ("SPARC", Arch::Sparc),
    ("SYSZ", Arch::Sysz),
    ("XCORE", Arch::Xcore),
    ("M68K", Arch::M68k),
    ("TMS320C64X", Arch::Tms320c64x),
    ("M680X", Arch::M680x),
    ("EVM", Arch::Evm),
    ("MOS65XX", Arch::Mos65xx),
    ("WASM", Arch::Wasm),
    ("BPF", Arch::Bpf),
    ("RISCV", Arch::Riscv),
    ("SH", Arch::Sh),
    ("TRICORE", Arch::Tricore),
];

impl Arch {
    /// Look up a `CS_ARCH_*` token.
    pub fn from_token(token: &str) -> Option<Self> {
        let name = token.strip_prefix("CS_ARCH_")?;
        ARCHES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, arch)| arch)
    }

    /// Short lower-case name, as accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Arm => "arm",
            Self::Aarch64 => "aarch64",
            Self::X86 => "x86",
            Self::Mips => "mips",
            Self::Ppc => "ppc",
            Self::Sparc => "sparc",
            Self::Sysz => "sysz",
            Self::Xcore => "xcore",
            Self::M68k => "m68k",
            Self::Tms320c64x => "tms320c64x",
            Self::M680x => "m680x",
            Self::Evm => "evm",
            Self::Mos65xx => "mos65xx",
            Self::Wasm => "wasm",
            Self::Bpf => "bpf",
            Self::Riscv => "riscv",
            Self::Sh => "sh",
            Self::Tricore => "tricore",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = String;

    /// Accepts both `arm` and `CS_ARCH_ARM` spellings.
    fn from_str(s: &str) -> Result<Self, String> {
        let upper = s.trim().to_ascii_uppercase();
        let token = if upper.starts_with("CS_ARCH_") {
            upper
        } else {
            format!("CS_ARCH_{upper}")
        };
        Self::from_token(&token).ok_or_else(|| format!("unknown architecture '{s}'"))
    }
}

/// A single `CS_MODE_*` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    LittleEndian,
    Arm,
    Mode16,
    Mode32,
    Mode64,
    Thumb,
    MClass,
    V8,
    Micro,
    Mips3,
    Mips32R6,
    Mips2,
    Mips32,
    Mips64,
    V9,
    Qpx,
    Spe,
    Booke,
    Ps,
    RiscV32,
    RiscV64,
    RiscVC,
    BigEndian,
}

const MODES: &[(&str, Mode)] = &[
    ("LITTLE_ENDIAN", Mode::LittleEndian),
    ("ARM", Mode::Arm),
    ("16", Mode::Mode16),
    ("32", Mode::Mode32),
    ("64", Mode::Mode64),
    ("THUMB", Mode::Thumb),
    ("MCLASS", Mode::MClass),
    ("V8", Mode::V8),
    ("MICRO", Mode::Micro),
    ("MIPS3", Mode::Mips3),
    ("MIPS32R6", Mode::Mips32R6),
    ("MIPS2", Mode::Mips2),
    ("MIPS32", Mode::Mips32),
    ("MIPS64", Mode::Mips64),
    ("V9", Mode::V9),
    ("QPX", Mode::Qpx),
    ("SPE", Mode::Spe),
    ("BOOKE", Mode::Booke),
    ("PS", Mode::Ps),
    ("RISCV32", Mode::RiscV32),
    ("RISCV64", Mode::RiscV64),
    ("RISCVC", Mode::RiscVC),
    ("BIG_ENDIAN", Mode::BigEndian),
];

impl Mode {
    /// Look up a `CS_MODE_*` token.
    pub fn from_token(token: &str) -> Option<Self> {
        let name = token.strip_prefix("CS_MODE_")?;
        MODES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, mode)| mode)
    }

    /// The `CS_MODE_*` token naming this mode.
    pub fn token(self) -> String {
        let name = MODES
            .iter()
            .find(|&&(_, m)| m == self)
            .map_or("?", |&(n, _)| n);
        format!("CS_MODE_{name}")
    }
}

impl FromStr for Mode {
    type Err = String;

    /// Accepts both `thumb` and `CS_MODE_THUMB` spellings.
    fn from_str(s: &str) -> Result<Self, String> {
        let upper = s.trim().to_ascii_uppercase();
        let token = if upper.starts_with("CS_MODE_") {
            upper
        } else {
            format!("CS_MODE_{upper}")
        };
        Self::from_token(&token).ok_or_else(|| format!("unknown mode '{s}'"))
    }
}

/// The set of mode tokens named by one directive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ModeSet {
    modes: Vec<Mode>,
}

impl ModeSet {
    /// Build a set from tokens, dropping duplicates.
    pub fn new(modes: impl IntoIterator<Item = Mode>) -> Self {
        let mut modes: Vec<Mode> = modes.into_iter().collect();
        modes.sort();
        modes.dedup();
        Self { modes }
    }

    /// Does this set name `mode`?
    pub fn contains(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }

    /// Member tokens, sorted.
    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }
}

impl fmt::Display for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, mode) in self.modes.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(&mode.token())?;
        }
        Ok(())
    }
}

/// Decoder options a directive can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DecodeOption {
    Detail,
    SyntaxIntel,
    SyntaxAtt,
    SyntaxMasm,
    SyntaxNoRegName,
    Unsigned,
}

impl DecodeOption {
    /// Look up a `CS_OPT_*` token.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "CS_OPT_DETAIL" => Self::Detail,
            "CS_OPT_SYNTAX_INTEL" => Self::SyntaxIntel,
            "CS_OPT_SYNTAX_ATT" => Self::SyntaxAtt,
            "CS_OPT_SYNTAX_MASM" => Self::SyntaxMasm,
            "CS_OPT_SYNTAX_NOREGNAME" => Self::SyntaxNoRegName,
            "CS_OPT_UNSIGNED" => Self::Unsigned,
            _ => return None,
        })
    }
}

/// One architecture directive and the source line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchDirective {
    pub arch: Arch,
    pub modes: ModeSet,
    /// Enabled options, sorted and deduplicated.
    pub options: Vec<DecodeOption>,
    pub location: Location,
}

impl fmt::Display for ArchDirective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}]", self.arch, self.modes)
    }
}

/// Does the directive body look like an architecture selector rather than a description?
pub fn is_arch_directive(body: &str) -> bool {
    body.trim_start().starts_with("CS_ARCH_")
}

/// Parse the body of an architecture directive (the text after `!#`).
pub fn parse_arch_directive(body: &str, loc: Location) -> ParseResult<ArchDirective> {
    let mut parts = body.split(',').map(str::trim);

    let arch_token = parts.next().unwrap_or("");
    let arch = match Arch::from_token(arch_token) {
        Some(arch) => arch,
        None => return err!(loc, "unknown architecture '{}'", arch_token),
    };

    let mode_list = match parts.next() {
        Some(list) if !list.is_empty() => list,
        _ => return err!(loc, "directive for {} is missing a mode", arch),
    };
    let mut modes = Vec::new();
    for token in mode_list.split('|').map(str::trim) {
        match Mode::from_token(token) {
            Some(mode) => modes.push(mode),
            None => return err!(loc, "unknown mode '{}'", token),
        }
    }

    let mut options = Vec::new();
    for token in parts {
        if token.is_empty() {
            continue;
        }
        match DecodeOption::from_token(token) {
            Some(opt) => options.push(opt),
            None => return err!(loc, "unknown option '{}'", token),
        }
    }
    options.sort();
    options.dedup();

    Ok(ArchDirective {
        arch,
        modes: ModeSet::new(modes),
        options,
        location: loc,
    })
}
