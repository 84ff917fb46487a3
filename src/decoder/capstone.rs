//! A decoder backend driving the capstone disassembler.
//!
//! Capstone's C numbering is rebased where fixtures use a different one: ARM condition
//! codes count from `eq` = 0 here, while capstone reserves 0 for "invalid".

use super::{
    Access, Backend, DecodeContext, DecodeError, DecodedInstruction, Decoder, MemOperand, Operand,
    OperandKind, Shift, format_bytes,
};
use crate::directive::{Arch, DecodeOption, Mode};
use crate::predicate::block_mask;
use capstone::arch::arm::{ArmOperandType, ArmShift};
use capstone::arch::{
    self, ArchDetail, BuildsCapstone, BuildsCapstoneEndian, BuildsCapstoneExtraMode,
    BuildsCapstoneSyntax, DetailsArchInsn,
};
use capstone::{Capstone, Endian, RegAccessType, RegId};

/// Backend opening one capstone handle per architecture context.
pub struct CapstoneBackend;

impl Backend for CapstoneBackend {
    fn name(&self) -> &'static str {
        "capstone"
    }

    fn open(&self, context: &DecodeContext) -> Result<Box<dyn Decoder>, DecodeError> {
        Ok(Box::new(CapstoneDecoder {
            cs: build(context)?,
            arch: context.arch,
            detail: context.detail(),
        }))
    }
}

struct CapstoneDecoder {
    cs: Capstone,
    arch: Arch,
    /// `CS_OPT_DETAIL` was given; without it only text and size are reported.
    detail: bool,
}

// SAFETY: the handle is owned exclusively by this decoder and only used through
// `&mut self`, which `ArchContext` hands out under its mutex. Capstone keeps no
// thread-local state, so moving the handle between threads is sound.
unsafe impl Send for CapstoneDecoder {}

fn engine(e: capstone::Error) -> DecodeError {
    DecodeError::Engine(e.to_string())
}

fn build(context: &DecodeContext) -> Result<Capstone, DecodeError> {
    let modes = &context.modes;
    let has = |m| modes.contains(m);
    let endian = if has(Mode::BigEndian) {
        Endian::Big
    } else {
        Endian::Little
    };
    let unsupported = |what: &str| DecodeError::Unsupported(format!("{what} ({context})"));
    let detail = context.detail();

    for option in &context.options {
        match (context.arch, option) {
            (_, DecodeOption::Detail) => {}
            (Arch::X86, DecodeOption::SyntaxIntel | DecodeOption::SyntaxAtt) => {}
            (_, other) => return Err(unsupported(&format!("option {other:?}"))),
        }
    }

    let cs = match context.arch {
        Arch::Arm => {
            let mode = if has(Mode::Thumb) {
                arch::arm::ArchMode::Thumb
            } else {
                arch::arm::ArchMode::Arm
            };
            let mut extra = Vec::new();
            if has(Mode::MClass) {
                extra.push(arch::arm::ArchExtraMode::MClass);
            }
            if has(Mode::V8) {
                extra.push(arch::arm::ArchExtraMode::V8);
            }
            Capstone::new()
                .arm()
                .mode(mode)
                .extra_mode(extra.into_iter())
                .endian(endian)
                .detail(detail)
                .build()
        }
        Arch::Aarch64 => Capstone::new()
            .arm64()
            .mode(arch::arm64::ArchMode::Arm)
            .detail(detail)
            .build(),
        Arch::X86 => {
            let mode = if has(Mode::Mode16) {
                arch::x86::ArchMode::Mode16
            } else if has(Mode::Mode32) {
                arch::x86::ArchMode::Mode32
            } else {
                arch::x86::ArchMode::Mode64
            };
            let syntax = if context.options.contains(&DecodeOption::SyntaxAtt) {
                arch::x86::ArchSyntax::Att
            } else {
                arch::x86::ArchSyntax::Intel
            };
            Capstone::new()
                .x86()
                .mode(mode)
                .syntax(syntax)
                .detail(detail)
                .build()
        }
        Arch::Mips => {
            let mode = if has(Mode::Mips64) {
                arch::mips::ArchMode::Mips64
            } else if has(Mode::Mips32R6) {
                arch::mips::ArchMode::Mips32R6
            } else if has(Mode::Mips3) {
                arch::mips::ArchMode::Mips3
            } else if has(Mode::Mips2) {
                arch::mips::ArchMode::Mips2
            } else {
                arch::mips::ArchMode::Mips32
            };
            let mut extra = Vec::new();
            if has(Mode::Micro) {
                extra.push(arch::mips::ArchExtraMode::Micro);
            }
            Capstone::new()
                .mips()
                .mode(mode)
                .extra_mode(extra.into_iter())
                .endian(endian)
                .detail(detail)
                .build()
        }
        Arch::Riscv => {
            let mode = if has(Mode::RiscV64) {
                arch::riscv::ArchMode::RiscV64
            } else {
                arch::riscv::ArchMode::RiscV32
            };
            let mut extra = Vec::new();
            if has(Mode::RiscVC) {
                extra.push(arch::riscv::ArchExtraMode::RiscVC);
            }
            Capstone::new()
                .riscv()
                .mode(mode)
                .extra_mode(extra.into_iter())
                .detail(detail)
                .build()
        }
        Arch::Sysz => Capstone::new()
            .sysz()
            .mode(arch::sysz::ArchMode::Default)
            .detail(detail)
            .build(),
        other => return Err(unsupported(&format!("architecture {other}"))),
    };
    cs.map_err(engine)
}

impl Decoder for CapstoneDecoder {
    fn decode(&mut self, bytes: &[u8], address: u64) -> Result<DecodedInstruction, DecodeError> {
        let invalid = || DecodeError::InvalidEncoding {
            offset: address as usize,
            bytes: format_bytes(&bytes[..bytes.len().min(4)]),
        };
        let insns = self
            .cs
            .disasm_count(bytes, address, 1)
            .map_err(|_| invalid())?;
        let insn = insns.iter().next().ok_or_else(invalid)?;

        let mut out = DecodedInstruction {
            mnemonic: insn.mnemonic().unwrap_or_default().to_string(),
            op_str: insn.op_str().unwrap_or_default().to_string(),
            size: insn.bytes().len(),
            ..Default::default()
        };
        if !self.detail {
            return Ok(out);
        }
        let detail = self.cs.insn_detail(&insn).map_err(engine)?;
        out.regs_read = self.names(detail.regs_read());
        out.regs_modified = self.names(detail.regs_write());
        out.groups = detail
            .groups()
            .iter()
            .filter_map(|g| self.cs.group_name(*g))
            .collect();

        if let (Arch::Arm, ArchDetail::ArmDetail(arm)) = (self.arch, detail.arch_detail()) {
            out.code_condition = (arm.cc() as u32).checked_sub(1);
            out.update_flags = Some(arm.update_flags());
            out.writeback = Some(arm.writeback());
            out.cps_mode = nonzero(arm.cps_mode() as u32);
            out.cps_flag = nonzero(arm.cps_flag() as u32);
            out.memory_barrier = nonzero(arm.mem_barrier() as u32);
            if out.mnemonic.starts_with("it") {
                out.predicate_mask = it_predicate_mask(insn.bytes());
            }

            for op in arm.operands() {
                if out.shift.is_none() {
                    out.shift = shift(&op.shift);
                }
                let access = access_flags(op.access);
                let kind = match op.op_type {
                    ArmOperandType::Reg(r) | ArmOperandType::SysReg(r) => {
                        let name = self.name(r).unwrap_or_default();
                        note_access(&mut out, &name, access);
                        OperandKind::Reg(name)
                    }
                    ArmOperandType::Imm(n)
                    | ArmOperandType::Cimm(n)
                    | ArmOperandType::Pimm(n) => OperandKind::Imm(i64::from(n)),
                    ArmOperandType::Fp(x) => OperandKind::Fp(x),
                    ArmOperandType::Mem(m) => {
                        let base = self.name(m.base());
                        let index = self.name(m.index());
                        for name in base.iter().chain(index.iter()) {
                            note_access(&mut out, name, Access::READ);
                        }
                        OperandKind::Mem(MemOperand {
                            base,
                            index,
                            scale: i64::from(m.scale()),
                            disp: i64::from(m.disp()),
                            lshift: mem_lshift(&op.shift),
                        })
                    }
                    _ => continue,
                };
                out.operands.push(Operand { kind, access });
            }
        }
        Ok(out)
    }
}

impl CapstoneDecoder {
    fn name(&self, reg: RegId) -> Option<String> {
        if reg.0 == 0 {
            None
        } else {
            self.cs.reg_name(reg)
        }
    }

    fn names(&self, regs: &[RegId]) -> Vec<String> {
        regs.iter().filter_map(|r| self.name(*r)).collect()
    }
}

fn nonzero(v: u32) -> Option<u32> {
    (v != 0).then_some(v)
}

fn access_flags(a: Option<RegAccessType>) -> Access {
    match a {
        Some(RegAccessType::ReadOnly) => Access::READ,
        Some(RegAccessType::WriteOnly) => Access::WRITE,
        Some(RegAccessType::ReadWrite) => Access::READ | Access::WRITE,
        None => Access::empty(),
    }
}

/// Merge an explicit register access into the implicit register sets.
fn note_access(out: &mut DecodedInstruction, name: &str, access: Access) {
    if name.is_empty() {
        return;
    }
    let add = |set: &mut Vec<String>| {
        if !set.iter().any(|r| r == name) {
            set.push(name.to_string());
        }
    };
    if access.contains(Access::READ) {
        add(&mut out.regs_read);
    }
    if access.contains(Access::WRITE) {
        add(&mut out.regs_modified);
    }
}

/// Predicate mask of a Thumb `it`, encoded as `0xbf` followed by `firstcond:mask`.
fn it_predicate_mask(bytes: &[u8]) -> Option<u32> {
    match bytes {
        &[low, 0xbf] => block_mask(u32::from(low >> 4), u32::from(low & 0xf)),
        _ => None,
    }
}

/// Left shift applied to a memory operand's index register.
fn mem_lshift(s: &ArmShift) -> i64 {
    match s {
        ArmShift::Lsl(n) => i64::from(*n),
        _ => 0,
    }
}

/// Shifter type codes: immediate shifts 1-5, register shifts 6-10.
fn shift(s: &ArmShift) -> Option<Shift> {
    let (kind, value) = match s {
        ArmShift::Asr(n) => (1, Some(*n)),
        ArmShift::Lsl(n) => (2, Some(*n)),
        ArmShift::Lsr(n) => (3, Some(*n)),
        ArmShift::Ror(n) => (4, Some(*n)),
        ArmShift::Rrx(n) => (5, Some(*n)),
        ArmShift::AsrReg(_) => (6, None),
        ArmShift::LslReg(_) => (7, None),
        ArmShift::LsrReg(_) => (8, None),
        ArmShift::RorReg(_) => (9, None),
        ArmShift::RrxReg(_) => (10, None),
        _ => return None,
    };
    Some(Shift {
        kind,
        value: value.map(i64::from),
    })
}
