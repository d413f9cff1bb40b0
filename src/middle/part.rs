//! A concatenable fragment of IR under construction.
//!
//! A fragment holds the instruction tail of the currently open leading
//! block (`head`), a list of already sealed blocks, and a cursor that is
//! either still on the head or on a named, not-yet-sealed successor block.
//! Fragments are built leaf-first during lowering and merged into their
//! parent; the function definition finally seals the head as `%entry`.

use crate::middle::ir::{BasicBlock, Op, Value};
use crate::middle::symbols::IrInfo;
use crate::front::ast::FuncType;

/// Where appended instructions currently go.
#[derive(Debug)]
enum Cursor {
    /// Still filling the leading instruction sequence.
    Head,
    /// Filling an open successor block with a known name.
    Pending { name: String, values: Vec<Value> },
}

#[derive(Debug)]
pub struct PartIr {
    head: Vec<Value>,
    blocks: Vec<BasicBlock>,
    cursor: Cursor,
}

impl Default for PartIr {
    fn default() -> Self {
        Self::new()
    }
}

impl PartIr {
    pub fn new() -> PartIr {
        PartIr {
            head: vec![],
            blocks: vec![],
            cursor: Cursor::Head,
        }
    }

    /// Append one instruction.  Appends after a terminator are dropped:
    /// the block is implicitly dead after `ret`/`jump`/`br`.  A terminator
    /// appended to an open successor block seals it.
    pub fn append(&mut self, value: Value, info: &IrInfo) {
        match &mut self.cursor {
            Cursor::Pending { values, .. } => {
                let seal = value.is_terminator();
                values.push(value);
                if seal {
                    self.seal_next(info);
                }
            }
            Cursor::Head => {
                if !self.head.last().is_some_and(Value::is_terminator) {
                    self.head.push(value);
                }
            }
        }
    }

    /// Open a new successor block.  At most one may be open at a time.
    pub fn create_new_block(&mut self, name: String) {
        assert!(
            matches!(self.cursor, Cursor::Head),
            "opening block '{name}' while another block is still open"
        );
        self.cursor = Cursor::Pending {
            name,
            values: vec![],
        };
    }

    /// Seal the open successor block, if any, into a real basic block.
    /// A block that does not end in a terminator jumps to the function's
    /// exit label.
    pub fn seal_next(&mut self, info: &IrInfo) {
        let Cursor::Pending { name, values } = std::mem::replace(&mut self.cursor, Cursor::Head)
        else {
            return;
        };
        let mut values = values;
        if !values.last().is_some_and(Value::is_terminator) {
            values.push(Value::new(Op::Jump, vec![info.exit_label()]));
        }
        self.blocks.push(BasicBlock { name, values });
    }

    /// Seal the head sequence as the function's leading block (`%entry`).
    /// A missing terminator becomes `ret 0` for int functions, `ret` for
    /// void ones.
    pub fn seal_prev(&mut self, name: &str, return_type: FuncType) {
        let mut values = std::mem::take(&mut self.head);
        if !values.last().is_some_and(Value::is_terminator) {
            let args = match return_type {
                FuncType::Int => vec!["0".to_string()],
                FuncType::Void => vec![],
            };
            values.push(Value::new(Op::Ret, args));
        }
        self.blocks.insert(
            0,
            BasicBlock {
                name: name.to_string(),
                values,
            },
        );
    }

    /// Splice another fragment onto this one.  The other fragment's sealed
    /// blocks are adopted; its head continues whatever block is currently
    /// open here (unless that block already ended), and its open successor
    /// block becomes the open block of the merged fragment.
    pub fn merge(&mut self, other: PartIr, info: &IrInfo) {
        let PartIr {
            head: other_head,
            blocks: other_blocks,
            cursor: other_cursor,
        } = other;
        self.blocks.extend(other_blocks);
        match &mut self.cursor {
            Cursor::Pending { values, .. } => {
                values.extend(other_head);
                if values.last().is_some_and(Value::is_terminator) {
                    self.seal_next(info);
                }
            }
            Cursor::Head => {
                if !self.head.last().is_some_and(Value::is_terminator) {
                    self.head.extend(other_head);
                }
            }
        }
        if let Cursor::Pending { .. } = other_cursor {
            self.cursor = other_cursor;
        }
    }

    /// Rewrite every control-flow target `from` to `to`, across the head,
    /// the sealed blocks, and the open block.  This is how `break` and
    /// `continue` placeholders get bound to their enclosing loop's labels.
    pub fn substitute(&mut self, from: &str, to: &str) {
        let rewrite = |value: &mut Value| {
            let targets = match value.op {
                Op::Jump => &mut value.args[0..1],
                Op::Branch => &mut value.args[1..3],
                _ => return,
            };
            for target in targets {
                if target == from {
                    *target = to.to_string();
                }
            }
        };
        self.head.iter_mut().for_each(rewrite);
        if let Cursor::Pending { values, .. } = &mut self.cursor {
            values.iter_mut().for_each(rewrite);
        }
        for block in &mut self.blocks {
            block.values.iter_mut().for_each(rewrite);
        }
    }

    /// Consume the fragment, returning only its head instructions.  Used
    /// for the global declaration list, which never forms blocks.
    pub fn into_head(self) -> Vec<Value> {
        self.head
    }

    /// Consume the fully sealed fragment into its blocks.
    pub fn into_blocks(self) -> Vec<BasicBlock> {
        assert!(
            self.head.is_empty() && matches!(self.cursor, Cursor::Head),
            "fragment still has unsealed instructions"
        );
        self.blocks
    }
}
