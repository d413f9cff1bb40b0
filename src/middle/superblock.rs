//! Grouping of basic blocks into super-blocks, and the use-count analysis
//! that picks which names stay resident in callee-saved registers per
//! super-block.
//!
//! The walk starts at `%entry` and follows terminator successors.  Meeting
//! a `while_cond` label opens a nested super-block covering the loop; the
//! matching `while_next` is handed back to the parent.  Exit blocks belong
//! to the root region only.

use std::collections::VecDeque;

use crate::back::asm::SAVED_REG_NUM;
use crate::common::{Map, Set};
use crate::middle::ir::{BasicBlock, FunctionIr, Op, ProgramIr, SuperBlock, SuperItem};
use crate::middle::names::is_alloc_var;

impl ProgramIr {
    pub fn gather_super(&mut self) {
        for function in &mut self.functions {
            function.gather_super();
        }
    }

    pub fn alloc_preserve(&mut self) {
        for function in &mut self.functions {
            function.alloc_preserve();
        }
    }
}

impl FunctionIr {
    pub fn gather_super(&mut self) {
        let mut map: Map<String, BasicBlock> = self
            .blocks
            .drain(..)
            .map(|block| (block.name.clone(), block))
            .collect();
        self.super_block = Some(gather(&mut map, "%entry", true));
    }

    pub fn alloc_preserve(&mut self) {
        self.super_block
            .as_mut()
            .expect("gather_super must run before alloc_preserve")
            .alloc_preserve(false);
    }
}

fn gather(map: &mut Map<String, BasicBlock>, start: &str, root: bool) -> SuperBlock {
    let mut result = SuperBlock::default();
    let mut permit_next: Set<String> = Set::new();
    let mut queue = VecDeque::new();
    queue.push_back(start.to_string());
    while let Some(cur) = queue.pop_front() {
        if cur.starts_with("%label_while_next_") && !permit_next.contains(&cur) {
            // loop exits are re-queued by the loop's parent, not entered
            // from inside the loop body
            continue;
        }
        if cur.starts_with("%labelexit_") && !root {
            continue;
        }
        if cur.starts_with("%label_while_cond_") && cur != start {
            let suffix = cur.strip_prefix("%label_while_cond_").unwrap().to_string();
            result.items.push(SuperItem::Loop(gather(map, &cur, false)));
            let next_name = format!("%label_while_next_{suffix}");
            permit_next.insert(next_name.clone());
            queue.push_back(next_name);
            continue;
        }
        let Some(block) = map.remove(&cur) else {
            // already claimed by some region
            continue;
        };
        match block.values.last() {
            Some(value) if value.op == Op::Jump => {
                if value.args[0] != start {
                    queue.push_back(value.args[0].clone());
                }
            }
            Some(value) if value.op == Op::Branch => {
                queue.push_back(value.args[1].clone());
                queue.push_back(value.args[2].clone());
            }
            _ => {}
        }
        result.items.push(SuperItem::Block(block));
    }
    result
}

fn add_count(count: &mut Map<String, u32>, name: &str) {
    if is_alloc_var(name) {
        *count.entry(name.to_string()).or_insert(0) += 1;
    }
}

impl BasicBlock {
    /// Count, per allocated name, the operand positions that would need a
    /// register.  Declaration markers and discarded values contribute
    /// nothing.
    fn use_counts(&self) -> Map<String, u32> {
        let mut count = Map::new();
        for value in &self.values {
            if value.discard {
                continue;
            }
            match value.op {
                Op::Ret => {
                    if let Some(arg) = value.args.first() {
                        add_count(&mut count, arg);
                    }
                }
                Op::Branch => add_count(&mut count, &value.args[0]),
                Op::Load => {
                    add_count(&mut count, &value.args[0]);
                    add_count(&mut count, &value.args[1]);
                }
                Op::Store if !value.args[0].starts_with('{') => {
                    add_count(&mut count, &value.args[0]);
                    add_count(&mut count, &value.args[1]);
                }
                Op::Binary(_) => {
                    for arg in &value.args[..3] {
                        add_count(&mut count, arg);
                    }
                }
                Op::CallInt | Op::CallVoid => {
                    for arg in &value.args[1..] {
                        add_count(&mut count, arg);
                    }
                }
                Op::GetPtr | Op::GetElemPtr => add_count(&mut count, &value.args[2]),
                _ => {}
            }
        }
        count
    }
}

impl SuperBlock {
    /// Compute this region's preserve set and return its aggregated use
    /// counts for the enclosing region.  Inside a loop any used name is
    /// worth preserving; outside, only names used more than once.
    pub fn alloc_preserve(&mut self, in_loop: bool) -> Map<String, u32> {
        let mut count: Map<String, u32> = Map::new();
        for item in &mut self.items {
            let child = match item {
                SuperItem::Block(block) => block.use_counts(),
                SuperItem::Loop(inner) => inner.alloc_preserve(true),
            };
            for (name, uses) in child {
                *count.entry(name).or_insert(0) += uses;
            }
        }
        let mut ranked: Vec<(&String, u32)> = count.iter().map(|(k, v)| (k, *v)).collect();
        // descending by count, name as the tie-break for reproducibility
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let threshold = if in_loop { 0 } else { 1 };
        self.preserve = ranked
            .iter()
            .take(SAVED_REG_NUM - 1)
            .filter(|(_, uses)| *uses > threshold)
            .map(|(name, _)| (*name).clone())
            .collect();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::{lower, parse};

    fn prepared(source: &str) -> ProgramIr {
        let mut ir = lower(parse(source).unwrap());
        ir.gather_super();
        ir.alloc_preserve();
        ir
    }

    fn block_names(region: &SuperBlock) -> Vec<String> {
        region
            .items
            .iter()
            .map(|item| match item {
                SuperItem::Block(block) => block.name.clone(),
                SuperItem::Loop(inner) => format!("loop@{}", inner.entry_name()),
            })
            .collect()
    }

    #[test]
    fn straight_line_is_one_region() {
        let ir = prepared("int main() { return 0; }");
        let root = ir.functions[0].super_block.as_ref().unwrap();
        assert_eq!(block_names(root), vec!["%entry"]);
    }

    #[test]
    fn loops_become_nested_regions() {
        let ir = prepared(
            "int main(int a, int b) { while (a) { while (b) { b = b - 1; } a = a - 1; } return a; }",
        );
        let root = ir.functions[0].super_block.as_ref().unwrap();
        let names = block_names(root);
        // every path through while_next_0 returns, so the exit block is
        // unreachable and claimed by no region
        assert_eq!(
            names,
            vec!["%entry", "loop@%label_while_cond_0", "%label_while_next_0"]
        );
        let SuperItem::Loop(outer) = &root.items[1] else {
            panic!("expected a loop region");
        };
        let outer_names = block_names(outer);
        assert_eq!(outer_names[0], "%label_while_cond_0");
        assert_eq!(outer_names[1], "%label_while_then_0");
        assert_eq!(outer_names[2], "loop@%label_while_cond_1");
        assert_eq!(outer_names[3], "%label_while_next_1");
    }

    #[test]
    fn loop_uses_are_preserved() {
        let ir = prepared(
            "int main(int a, int b) { while (a) { while (b) { b = b - 1; } a = a - 1; } return a; }",
        );
        let root = ir.functions[0].super_block.as_ref().unwrap();
        let SuperItem::Loop(outer) = &root.items[1] else {
            panic!("expected a loop region");
        };
        // both loop counters live in callee-saved registers inside the loop
        assert!(outer.preserve.contains("@a_0"), "{:?}", outer.preserve);
        assert!(outer.preserve.contains("@b_0"), "{:?}", outer.preserve);
    }

    #[test]
    fn single_uses_outside_loops_are_not_preserved() {
        let ir = prepared("int main(int a) { return a; }");
        let root = ir.functions[0].super_block.as_ref().unwrap();
        // @a_0 is loaded once; the threshold outside loops is > 1
        assert!(root.preserve.is_empty(), "{:?}", root.preserve);
    }

    #[test]
    fn discarded_values_do_not_count() {
        let ir = prepared("int f(int x) { return 0; } int main() { return f(1); }");
        let root = ir.functions[0].super_block.as_ref().unwrap();
        // the only mentions of @x_0 are its discarded home alloc and store
        assert!(root.preserve.is_empty(), "{:?}", root.preserve);
    }
}
