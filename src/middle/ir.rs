//! The in-memory IR: values (instructions), basic blocks, super-blocks,
//! functions, and the whole program, plus their textual form.
//!
//! Instructions are a small tagged record — an opcode and positional string
//! operands.  Operands are either numeric literals or IR names (see
//! [`crate::middle::names`]).

use std::fmt;

use derive_more::Display;

use crate::common::Set;
use crate::front::ast::{BinOp, FuncType};

/// The runtime library: name, return type, and IR declaration line.
pub const LIB_FUNCS: [(&str, FuncType, &str); 8] = [
    ("getint", FuncType::Int, "decl @getint(): i32"),
    ("getch", FuncType::Int, "decl @getch(): i32"),
    ("getarray", FuncType::Int, "decl @getarray(*i32): i32"),
    ("putint", FuncType::Void, "decl @putint(i32)"),
    ("putch", FuncType::Void, "decl @putch(i32)"),
    ("putarray", FuncType::Void, "decl @putarray(i32, *i32)"),
    ("starttime", FuncType::Void, "decl @starttime()"),
    ("stoptime", FuncType::Void, "decl @stoptime()"),
];

/// IR opcodes.  Arithmetic, comparison, and logical instructions reuse the
/// front-end operator enum; its display form is the opcode mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Op {
    #[display("{_0}")]
    Binary(BinOp),
    #[display("alloc")]
    Alloc,
    #[display("global alloc")]
    GlobalAlloc,
    #[display("load")]
    Load,
    #[display("store")]
    Store,
    #[display("getelemptr")]
    GetElemPtr,
    #[display("getptr")]
    GetPtr,
    #[display("jump")]
    Jump,
    #[display("br")]
    Branch,
    #[display("ret")]
    Ret,
    #[display("call_int")]
    CallInt,
    #[display("call_void")]
    CallVoid,
    /// Declaration marker for register-resident temporaries; rendered as a
    /// `//!` comment in the IR text.
    #[display("//! decl")]
    Decl,
}

impl Op {
    /// Ends a basic block.
    pub fn is_terminator(self) -> bool {
        matches!(self, Op::Jump | Op::Branch | Op::Ret)
    }
}

/// One IR instruction.  `discard` marks values that exist only to make the
/// text self-describing (argument slot setup); analyses and codegen skip
/// them.
#[derive(Clone, Debug)]
pub struct Value {
    pub op: Op,
    pub args: Vec<String>,
    pub discard: bool,
}

impl Value {
    pub fn new<S: Into<String>>(op: Op, args: Vec<S>) -> Value {
        Value {
            op,
            args: args.into_iter().map(Into::into).collect(),
            discard: false,
        }
    }

    pub fn discarded<S: Into<String>>(op: Op, args: Vec<S>) -> Value {
        Value {
            discard: true,
            ..Value::new(op, args)
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.op.is_terminator()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.args;
        match self.op {
            Op::Binary(op) => write!(f, "{} = {} {}, {}", a[0], op, a[1], a[2])?,
            Op::Alloc | Op::Load => write!(f, "{} = {} {}", a[0], self.op, a[1])?,
            Op::GlobalAlloc => write!(f, "global {} = alloc {}, {}", a[0], a[1], a[2])?,
            Op::GetElemPtr | Op::GetPtr => {
                write!(f, "{} = {} {}, {}", a[0], self.op, a[1], a[2])?
            }
            Op::Store => write!(f, "store {}, {}", a[0], a[1])?,
            Op::Jump => write!(f, "jump {}", a[0])?,
            Op::Branch => write!(f, "br {}, {}, {}", a[0], a[1], a[2])?,
            Op::Ret => {
                write!(f, "ret")?;
                if let Some(value) = a.first() {
                    write!(f, " {value}")?;
                }
            }
            Op::CallInt => {
                write!(f, "{} = call @{}({})", a[1], a[0], a[2..].join(", "))?
            }
            Op::CallVoid => write!(f, "call @{}({})", a[0], a[1..].join(", "))?,
            Op::Decl => write!(f, "//! decl {}, {}", a[0], a[1])?,
        }
        if self.discard {
            write!(f, " //! discard")?;
        }
        Ok(())
    }
}

/// Straight-line IR ending in exactly one control transfer.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub name: String,
    pub values: Vec<Value>,
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for value in &self.values {
            writeln!(f, "  {value}")?;
        }
        Ok(())
    }
}

/// A group of basic blocks treated atomically for callee-saved register
/// bookkeeping: one loop-free region, or one loop (which nests).
#[derive(Debug, Default)]
pub struct SuperBlock {
    pub items: Vec<SuperItem>,
    /// Names kept resident in callee-saved registers throughout this region.
    pub preserve: Set<String>,
}

#[derive(Debug)]
pub enum SuperItem {
    Block(BasicBlock),
    Loop(SuperBlock),
}

impl SuperBlock {
    /// The entry block's name, i.e. the label this region is entered by.
    pub fn entry_name(&self) -> &str {
        match self.items.first() {
            Some(SuperItem::Block(block)) => &block.name,
            Some(SuperItem::Loop(inner)) => inner.entry_name(),
            None => panic!("super-block with no blocks"),
        }
    }
}

/// A function parameter in IR form.
#[derive(Clone, Debug, Display)]
#[display("{name}: {ty}")]
pub struct Param {
    /// The IR-level name: `%arg_<var>` for scalars, `@<var>` for arrays.
    pub name: String,
    pub ty: ParamType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ParamType {
    #[display("i32")]
    I32,
    #[display("*i32")]
    PtrI32,
}

impl Param {
    /// The stack-slot tenant name for this parameter.  Scalar arguments are
    /// spilled into the caller's argument area under their program-variable
    /// name.
    pub fn slot_name(&self) -> String {
        match self.name.strip_prefix("%arg_") {
            Some(rest) => format!("@{rest}"),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug)]
pub struct FunctionIr {
    pub name: String,
    pub return_type: FuncType,
    pub params: Vec<Param>,
    pub blocks: Vec<BasicBlock>,
    /// Built by `gather_super` after all blocks exist; `blocks` is drained
    /// into it.
    pub super_block: Option<SuperBlock>,
}

impl fmt::Display for FunctionIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(Param::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "fun @{}({})", self.name, params)?;
        if self.return_type == FuncType::Int {
            write!(f, ": i32")?;
        }
        writeln!(f, " {{")?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        writeln!(f, "}}")
    }
}

#[derive(Debug, Default)]
pub struct ProgramIr {
    /// Global `global alloc` values, in declaration order.
    pub values: Vec<Value>,
    pub functions: Vec<FunctionIr>,
}

impl fmt::Display for ProgramIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, _, decl) in LIB_FUNCS {
            writeln!(f, "{decl}")?;
        }
        writeln!(f)?;
        for value in &self.values {
            writeln!(f, "{value}")?;
        }
        writeln!(f)?;
        for function in &self.functions {
            writeln!(f, "{function}")?;
        }
        Ok(())
    }
}

/// Byte size of an IR type: `i32` or `[i32, N]`.
pub fn type_size(ty: &str) -> i32 {
    if ty == "i32" {
        return 4;
    }
    let count = ty
        .strip_prefix("[i32, ")
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or_else(|| panic!("malformed IR type '{ty}'"));
    count * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_text() {
        let add = Value::new(Op::Binary(BinOp::Add), vec!["%t0", "%a", "1"]);
        assert_eq!(add.to_string(), "%t0 = add %a, 1");
        let call = Value::new(Op::CallInt, vec!["f", "%t1", "%t0", "2"]);
        assert_eq!(call.to_string(), "%t1 = call @f(%t0, 2)");
        let call = Value::new(Op::CallVoid, vec!["putint", "%t1"]);
        assert_eq!(call.to_string(), "call @putint(%t1)");
        let global = Value::new(Op::GlobalAlloc, vec!["@a_0", "[i32, 6]", "undef"]);
        assert_eq!(global.to_string(), "global @a_0 = alloc [i32, 6], undef");
        let ret = Value::new(Op::Ret, Vec::<String>::new());
        assert_eq!(ret.to_string(), "ret");
        let store = Value::discarded(Op::Store, vec!["%arg_x_0", "@x_0"]);
        assert_eq!(store.to_string(), "store %arg_x_0, @x_0 //! discard");
    }

    #[test]
    fn param_slots() {
        let scalar = Param {
            name: "%arg_x_0".to_string(),
            ty: ParamType::I32,
        };
        assert_eq!(scalar.to_string(), "%arg_x_0: i32");
        assert_eq!(scalar.slot_name(), "@x_0");
        let array = Param {
            name: "@a_1".to_string(),
            ty: ParamType::PtrI32,
        };
        assert_eq!(array.slot_name(), "@a_1");
    }

    #[test]
    fn type_sizes() {
        assert_eq!(type_size("i32"), 4);
        assert_eq!(type_size("[i32, 6]"), 24);
    }
}
