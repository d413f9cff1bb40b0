//! The 32-bit RISC-V (RV32IM) assembly layer.
//!
//! # Registers
//!
//! The register enum lists the machine's register file in numbering order,
//! so `as usize` is the index the allocator tracks.  Three groups matter:
//!
//! - *Scratch* (caller-saved) registers `t0`-`t2`, `a0`-`a7`, `t3`-`t4`:
//!   the pool the LRU allocator hands out.
//! - *Callee-saved* registers `fp`, `s1`-`s11`: reserved for the names a
//!   super-block preserves across its whole extent (`fp` itself is the
//!   frame pointer and never reassigned).
//! - Everything else is reserved: `zero`, `ra`, `sp`, `gp`, `tp`, and
//!   `t5`/`t6`, which serve as immediate scratch inside single emission
//!   sequences and never hold a tenant.
//!
//! # Call stack frame
//!
//! The stack grows down and frames are 16-byte aligned.  A function's
//! prologue saves the caller's `fp` at the new `sp`, points `fp` at the
//! old `sp`, and saves `ra` at `-4(fp)`.  Slot offsets recorded by the
//! frame manager are subtracted from `fp`; offsets beyond the 12-bit
//! immediate range go through `t5` (see [`safe_mem`]).

use derive_more::Display;
use std::fmt;

pub const REG_COUNT: usize = 32;
pub const FREE_REG_NUM: usize = 13;
pub const SAVED_REG_NUM: usize = 12;
/// One past the largest 12-bit immediate.
pub const IMM12_MAX: i32 = 2048;

/// Registers of the RV32 machine, in register-file order.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Register {
    #[display("zero")]
    Zero,
    #[display("ra")]
    Ra,
    #[display("sp")]
    Sp,
    #[display("gp")]
    Gp,
    #[display("tp")]
    Tp,
    #[display("t0")]
    T0,
    #[display("t1")]
    T1,
    #[display("t2")]
    T2,
    #[display("fp")]
    Fp,
    #[display("s1")]
    S1,
    #[display("a0")]
    A0,
    #[display("a1")]
    A1,
    #[display("a2")]
    A2,
    #[display("a3")]
    A3,
    #[display("a4")]
    A4,
    #[display("a5")]
    A5,
    #[display("a6")]
    A6,
    #[display("a7")]
    A7,
    #[display("s2")]
    S2,
    #[display("s3")]
    S3,
    #[display("s4")]
    S4,
    #[display("s5")]
    S5,
    #[display("s6")]
    S6,
    #[display("s7")]
    S7,
    #[display("s8")]
    S8,
    #[display("s9")]
    S9,
    #[display("s10")]
    S10,
    #[display("s11")]
    S11,
    #[display("t3")]
    T3,
    #[display("t4")]
    T4,
    #[display("t5")]
    T5,
    #[display("t6")]
    T6,
}

use Register::*;

pub const REGISTERS: [Register; REG_COUNT] = [
    Zero, Ra, Sp, Gp, Tp, T0, T1, T2, Fp, S1, A0, A1, A2, A3, A4, A5, A6, A7, S2, S3, S4, S5, S6,
    S7, S8, S9, S10, S11, T3, T4, T5, T6,
];

/// The scratch pool, in allocation-preference order.
pub const FREE_REGS: [Register; FREE_REG_NUM] =
    [T0, T1, T2, A0, A1, A2, A3, A4, A5, A6, A7, T3, T4];

/// Callee-saved registers; index 0 is `fp` and is never handed out.
pub const SAVED_REGS: [Register; SAVED_REG_NUM] =
    [Fp, S1, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11];

/// The argument registers of the calling convention, `a0` first.
pub const ARG_REGS: [Register; 8] = [A0, A1, A2, A3, A4, A5, A6, A7];

impl Register {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Arithmetic operations of the `Arith`/`ArithI` instruction families.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ArithOp {
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("mul")]
    Mul,
    #[display("div")]
    Div,
    #[display("rem")]
    Rem,
    #[display("and")]
    And,
    #[display("or")]
    Or,
    #[display("xor")]
    Xor,
    #[display("sll")]
    Sll,
    #[display("sra")]
    Sra,
    /// Set if less than: dst = 1 if lhs < rhs, otherwise 0.
    #[display("slt")]
    Slt,
    #[display("sgt")]
    Sgt,
}

/// `seqz`/`snez` pseudo-instructions.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ZeroCond {
    #[display("eq")]
    Eq,
    #[display("ne")]
    Ne,
}

/// A RISC-V instruction, including the pseudo-instructions the assembler
/// expands (`li`, `la`, `mv`, `j`, `call`, `seqz`/`snez`, `bnez`).
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Insn {
    Li {
        rd: Register,
        imm: i32,
    },
    La {
        rd: Register,
        symbol: String,
    },
    Mv {
        rd: Register,
        rs: Register,
    },
    Lw {
        rd: Register,
        offset: i32,
        base: Register,
    },
    Sw {
        rs: Register,
        offset: i32,
        base: Register,
    },
    Arith {
        op: ArithOp,
        rd: Register,
        rs1: Register,
        rs2: Register,
    },
    ArithI {
        op: ArithOp,
        rd: Register,
        rs1: Register,
        imm: i32,
    },
    SCmpZ {
        cond: ZeroCond,
        rd: Register,
        rs: Register,
    },
    Bnez {
        rs: Register,
        target: String,
    },
    J {
        target: String,
    },
    Call {
        target: String,
    },
    Ret,
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Insn::*;
        match self {
            Li { rd, imm } => write!(f, "li {rd}, {imm}"),
            La { rd, symbol } => write!(f, "la {rd}, {symbol}"),
            Mv { rd, rs } => write!(f, "mv {rd}, {rs}"),
            Lw { rd, offset, base } => write!(f, "lw {rd}, {offset}({base})"),
            Sw { rs, offset, base } => write!(f, "sw {rs}, {offset}({base})"),
            Arith { op, rd, rs1, rs2 } => write!(f, "{op} {rd}, {rs1}, {rs2}"),
            ArithI { op, rd, rs1, imm } => write!(f, "{op}i {rd}, {rs1}, {imm}"),
            SCmpZ { cond, rd, rs } => write!(f, "s{cond}z {rd}, {rs}"),
            Bnez { rs, target } => write!(f, "bnez {rs}, {target}"),
            J { target } => write!(f, "j {target}"),
            Call { target } => write!(f, "call {target}"),
            Ret => write!(f, "ret"),
        }
    }
}

/// One output line.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Line {
    Label(String),
    Insn(Insn),
    Data,
    Text,
    Globl(String),
    Word(i32),
    Zero(i32),
    Comment(String),
    Blank,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Label(name) => write!(f, "{name}:"),
            Line::Insn(insn) => write!(f, "  {insn}"),
            Line::Data => write!(f, "  .data"),
            Line::Text => write!(f, "  .text"),
            Line::Globl(symbol) => write!(f, "  .globl {symbol}"),
            Line::Word(value) => write!(f, "  .word {value}"),
            Line::Zero(bytes) => write!(f, "  .zero {bytes}"),
            Line::Comment(text) => write!(f, "  # {text}"),
            Line::Blank => Ok(()),
        }
    }
}

/// The output program as an editable line buffer.  Codegen appends lines
/// in one pass; the function prologue's frame-size `li` is patched once
/// the frame is fully laid out.
#[derive(Default)]
pub struct Asm {
    pub lines: Vec<Line>,
}

impl Asm {
    pub fn new() -> Asm {
        Asm::default()
    }

    pub fn emit(&mut self, insn: Insn) {
        self.lines.push(Line::Insn(insn));
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.lines.push(Line::Label(name.into()));
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.lines.push(Line::Comment(text.into()));
    }

    /// Index of the next line; used to patch placeholder instructions.
    pub fn mark(&self) -> usize {
        self.lines.len()
    }

    /// The final assembly text.
    pub fn code(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(&line.to_string());
            text.push('\n');
        }
        text
    }
}

/// Memory access direction for [`safe_mem`] and the spill helpers.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MemOp {
    Load,
    Store,
}

pub fn mem_insn(op: MemOp, reg: Register, offset: i32, base: Register) -> Insn {
    match op {
        MemOp::Load => Insn::Lw {
            rd: reg,
            offset,
            base,
        },
        MemOp::Store => Insn::Sw {
            rs: reg,
            offset,
            base,
        },
    }
}

/// Access the slot `loc` bytes below `base`.  Offsets outside the 12-bit
/// immediate range re-base through `t5`.
pub fn safe_mem(op: MemOp, reg: Register, loc: i32, base: Register, asm: &mut Asm) {
    if loc <= IMM12_MAX && loc > -IMM12_MAX {
        asm.emit(mem_insn(op, reg, -loc, base));
    } else {
        asm.emit(Insn::Li { rd: T5, imm: loc });
        asm.emit(Insn::Arith {
            op: ArithOp::Sub,
            rd: T5,
            rs1: base,
            rs2: T5,
        });
        asm.emit(mem_insn(op, reg, 0, T5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_indices_follow_file_order() {
        assert_eq!(Zero.index(), 0);
        assert_eq!(Fp.index(), 8);
        assert_eq!(A0.index(), 10);
        assert_eq!(T6.index(), 31);
        for (i, reg) in REGISTERS.iter().enumerate() {
            assert_eq!(reg.index(), i);
        }
    }

    #[test]
    fn pools_do_not_overlap() {
        for reg in FREE_REGS {
            assert!(!SAVED_REGS.contains(&reg));
        }
        // immediate scratch stays out of both pools
        assert!(!FREE_REGS.contains(&T5) && !FREE_REGS.contains(&T6));
        assert!(FREE_REGS.starts_with(&[T0]));
    }

    #[test]
    fn insn_text() {
        assert_eq!(Insn::Li { rd: A0, imm: 14 }.to_string(), "li a0, 14");
        assert_eq!(
            Insn::Lw {
                rd: T0,
                offset: -4,
                base: Fp
            }
            .to_string(),
            "lw t0, -4(fp)"
        );
        assert_eq!(
            Insn::ArithI {
                op: ArithOp::Add,
                rd: T0,
                rs1: T1,
                imm: -8
            }
            .to_string(),
            "addi t0, t1, -8"
        );
        assert_eq!(
            Insn::SCmpZ {
                cond: ZeroCond::Ne,
                rd: T0,
                rs: T1
            }
            .to_string(),
            "snez t0, t1"
        );
    }

    #[test]
    fn safe_mem_in_range() {
        let mut asm = Asm::new();
        safe_mem(MemOp::Store, A0, 8, Fp, &mut asm);
        assert_eq!(asm.code(), "  sw a0, -8(fp)\n");
    }

    #[test]
    fn safe_mem_rebases_large_offsets() {
        let mut asm = Asm::new();
        safe_mem(MemOp::Load, A0, 40000, Fp, &mut asm);
        assert_eq!(
            asm.code(),
            "  li t5, 40000\n  sub t5, fp, t5\n  lw a0, 0(t5)\n"
        );
    }
}
