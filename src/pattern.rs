//! Instruction pattern library.
//!
//! Recognizes a closed set of 32-bit x86 encodings in the bytes that
//! immediately precede a `RET` (0xC3) and renders each one as a canonical
//! operation symbol such as `"POP EAX"` or `"XOR EBX, ECX"`.
//!
//! Only the forms listed in [`Rule`] are recognized; this is not a
//! general decoder. Every `RET` in a code buffer is tried against
//! every rule, so one return can yield several gadgets that start at
//! different (possibly overlapping) offsets.

use std::fmt;
use std::str::FromStr;

use crate::types::Reg32;

/// The near return opcode every gadget must end in.
pub const RET: u8 = 0xC3;

/// Canonical operation symbol, e.g. `"ADD ESP, 12"`.
///
/// Symbols compare by text. They are produced by formatting an
/// [`Instruction`], and accepted verbatim from callers when looking up
/// the catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Operation(String);

impl Operation {
    pub fn new(text: impl Into<String>) -> Self {
        Operation(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Operation {
    fn from(text: &str) -> Self {
        Operation(text.to_string())
    }
}

impl From<String> for Operation {
    fn from(text: String) -> Self {
        Operation(text)
    }
}

impl From<&Instruction> for Operation {
    fn from(insn: &Instruction) -> Self {
        Operation(insn.to_string())
    }
}

impl FromStr for Operation {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Operation::from(s))
    }
}

/// Two-operand ALU/move operations with the `op r/m32, r32` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Adc,
    Add,
    And,
    Mov,
    Or,
    Sbb,
    Sub,
    Xor,
}

impl AluOp {
    pub const ALL: [AluOp; 8] = [
        AluOp::Adc,
        AluOp::Add,
        AluOp::And,
        AluOp::Mov,
        AluOp::Or,
        AluOp::Sbb,
        AluOp::Sub,
        AluOp::Xor,
    ];

    /// Opcode of the `r/m32, r32` form. Setting bit 1 (the direction
    /// bit) gives the `r32, r/m32` form.
    pub fn opcode(self) -> u8 {
        match self {
            AluOp::Adc => 0x11,
            AluOp::Add => 0x01,
            AluOp::And => 0x21,
            AluOp::Mov => 0x89,
            AluOp::Or => 0x09,
            AluOp::Sbb => 0x19,
            AluOp::Sub => 0x29,
            AluOp::Xor => 0x31,
        }
    }

    /// Identify an opcode in either direction. Returns the operation and
    /// whether the direction bit is set.
    pub fn from_opcode(opcode: u8) -> Option<(AluOp, bool)> {
        let op = Self::ALL.iter().copied().find(|op| op.opcode() == opcode & !0x02)?;
        Some((op, opcode & 0x02 != 0))
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Adc => "ADC",
            AluOp::Add => "ADD",
            AluOp::And => "AND",
            AluOp::Mov => "MOV",
            AluOp::Or => "OR",
            AluOp::Sbb => "SBB",
            AluOp::Sub => "SUB",
            AluOp::Xor => "XOR",
        }
    }
}

/// An operand of a recognized ALU instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Reg32),
    /// `[reg]`, always with zero displacement.
    Mem(Reg32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Mem(r) => write!(f, "[{}]", r),
        }
    }
}

/// A decoded instruction preceding a return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Alu { op: AluOp, dst: Operand, src: Operand },
    Inc(Reg32),
    Dec(Reg32),
    Push(Reg32),
    Pop(Reg32),
    /// Synthetic: a run of POPs used purely to skip stack slots.
    AddEsp(u32),
    Xchg { dst: Reg32, src: Reg32 },
    Int3,
    Nop,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Alu { op, dst, src } => write!(f, "{} {}, {}", op.mnemonic(), dst, src),
            Instruction::Inc(r) => write!(f, "INC {}", r),
            Instruction::Dec(r) => write!(f, "DEC {}", r),
            Instruction::Push(r) => write!(f, "PUSH {}", r),
            Instruction::Pop(r) => write!(f, "POP {}", r),
            Instruction::AddEsp(n) => write!(f, "ADD ESP, {}", n),
            Instruction::Xchg { dst, src } => write!(f, "XCHG {}, {}", dst, src),
            Instruction::Int3 => f.write_str("INT3"),
            Instruction::Nop => f.write_str("NOP"),
        }
    }
}

/// One entry of the fixed recognizer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Maximal run of `POP r32` bytes (58..5F) -> `ADD ESP, 4*k`.
    PopRun,
    /// `op r/m32, r32` / `op r32, r/m32` with mod 00 or 11.
    AluModRm,
    /// `87 /r` with mod 11.
    XchgModRm,
    /// 40..4F.
    IncDec,
    /// 50..5F.
    PushPop,
    /// 91..97. 0x90 is left to [`Rule::Nop`].
    XchgEax,
    /// CC.
    Int3,
    /// 90.
    Nop,
}

/// Recognizers in evaluation order: longest and most specific first.
pub const RULES: [Rule; 8] = [
    Rule::PopRun,
    Rule::AluModRm,
    Rule::XchgModRm,
    Rule::IncDec,
    Rule::PushPop,
    Rule::XchgEax,
    Rule::Int3,
    Rule::Nop,
];

impl Rule {
    /// Try to decode the tail of `window`, the bytes that precede a
    /// `RET`. On success returns the instruction and how many trailing
    /// bytes of `window` it covers.
    pub fn decode(self, window: &[u8]) -> Option<(Instruction, usize)> {
        let last = *window.last()?;
        match self {
            Rule::PopRun => {
                let run = window.iter().rev().take_while(|b| is_pop(**b)).count();
                if run == 0 {
                    return None;
                }
                let n = u32::try_from(run).ok()?.checked_mul(4)?;
                Some((Instruction::AddEsp(n), run))
            }
            Rule::AluModRm => {
                let (opcode, modrm) = trailing_pair(window)?;
                let (op, reversed) = AluOp::from_opcode(opcode)?;
                let (rm, reg) = decode_modrm(modrm)?;
                let reg = Operand::Reg(reg);
                let (dst, src) = if reversed { (reg, rm) } else { (rm, reg) };
                Some((Instruction::Alu { op, dst, src }, 2))
            }
            Rule::XchgModRm => {
                let (opcode, modrm) = trailing_pair(window)?;
                if opcode != 0x87 || modrm < 0xC0 {
                    return None;
                }
                let dst = Reg32::from_index(modrm >> 3);
                let src = Reg32::from_index(modrm);
                Some((Instruction::Xchg { dst, src }, 2))
            }
            Rule::IncDec => match last {
                0x40..=0x47 => Some((Instruction::Inc(Reg32::from_index(last)), 1)),
                0x48..=0x4F => Some((Instruction::Dec(Reg32::from_index(last)), 1)),
                _ => None,
            },
            Rule::PushPop => match last {
                0x50..=0x57 => Some((Instruction::Push(Reg32::from_index(last)), 1)),
                0x58..=0x5F => Some((Instruction::Pop(Reg32::from_index(last)), 1)),
                _ => None,
            },
            Rule::XchgEax => match last {
                0x91..=0x97 => Some((
                    Instruction::Xchg { dst: Reg32::Eax, src: Reg32::from_index(last) },
                    1,
                )),
                _ => None,
            },
            Rule::Int3 => (last == 0xCC).then_some((Instruction::Int3, 1)),
            Rule::Nop => (last == 0x90).then_some((Instruction::Nop, 1)),
        }
    }
}

fn is_pop(byte: u8) -> bool {
    (0x58..=0x5F).contains(&byte)
}

fn trailing_pair(window: &[u8]) -> Option<(u8, u8)> {
    match window {
        [.., opcode, modrm] => Some((*opcode, *modrm)),
        _ => None,
    }
}

/// Split a ModR/M byte into its r/m operand and reg field.
///
/// Only register-direct (mod 11) and register-indirect without
/// displacement (mod 00) are accepted. Under mod 00, r/m 100 needs a SIB
/// byte and r/m 101 a disp32, so neither is a two-byte instruction.
fn decode_modrm(modrm: u8) -> Option<(Operand, Reg32)> {
    let reg = Reg32::from_index(modrm >> 3);
    let rm = Reg32::from_index(modrm);
    match modrm >> 6 {
        0b11 => Some((Operand::Reg(rm), reg)),
        0b00 if !matches!(rm, Reg32::Esp | Reg32::Ebp) => Some((Operand::Mem(rm), reg)),
        _ => None,
    }
}

/// A recognized gadget inside a code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GadgetMatch {
    /// Offset of the gadget's first byte within the scanned buffer.
    pub offset: usize,
    pub instruction: Instruction,
}

/// Scan a code buffer for every recognized instruction that is directly
/// followed by a `RET`.
///
/// Matches are reported in ascending order of the `RET` they end at and,
/// for the same `RET`, in [`RULES`] order. Overlapping matches are all
/// kept; bytes that happen to decode here may be the middle of some
/// other instruction when executed from a different start.
pub fn scan(code: &[u8]) -> Vec<GadgetMatch> {
    let mut matches = Vec::new();
    for (ret_pos, &byte) in code.iter().enumerate() {
        if byte != RET {
            continue;
        }
        let window = &code[..ret_pos];
        for rule in RULES {
            if let Some((instruction, len)) = rule.decode(window) {
                matches.push(GadgetMatch {
                    offset: ret_pos - len,
                    instruction,
                });
            }
        }
    }
    matches
}
