//! The per-program symbol registry.
//!
//! One registry is shared across all lowering activity of a program.  It
//! hands out unique IR names (temporaries, labels, program variables),
//! remembers folded constants, tracks lexical scoping through a chain of
//! per-level maps, and knows every function's signature.

use crate::common::Map;
use crate::front::ast::FuncType;
use crate::middle::ir::{Op, Param, ParamType, Value, LIB_FUNCS};
use crate::middle::names::{is_alloc_var, is_program_var, is_temp};
use crate::middle::part::PartIr;

/// One shadowing instance of a program variable.
#[derive(Debug, Clone)]
struct VarEntry {
    ident: String,
    /// Shadowing index; `@<ident>_<index>` is the IR name.
    index: u32,
    /// Folded literal for `const` declarations.
    constant: Option<i32>,
    /// Lexical depth at declaration.  0 = global, 1 = function argument.
    level: usize,
    is_arg: bool,
    /// Array dimensions; `None` marks the elided first dimension of an
    /// array parameter.  Empty for scalars.
    dims: Vec<Option<usize>>,
}

impl VarEntry {
    fn ir_name(&self) -> String {
        format!("@{}_{}", self.ident, self.index)
    }
}

pub struct IrInfo {
    level: usize,
    /// Per-function timestamp ordering temporaries for prologue emission.
    clock: u32,
    label_count: Map<String, u32>,
    temp_count: Map<String, u32>,
    /// Counter values at the end of the previous function, so prologue
    /// declarations cover only this function's temporaries.
    temp_last_count: Map<String, u32>,
    temp_time: Map<String, u32>,
    /// Shadowing counter per identifier, monotonic across the program.
    var_count: Map<String, u32>,
    /// All variable entries of the current function plus every global.
    entries: Vec<VarEntry>,
    /// Scope chain: one map per lexical level, identifier → entry index.
    scopes: Vec<Map<String, usize>>,
    func_type: Map<String, FuncType>,
    /// Name produced by the most recently lowered expression.
    pub last_result: String,
    /// True while lowering the global declaration list.
    pub global_scope: bool,
    /// Function currently being lowered; names its canonical exit label.
    pub func_name: String,
}

impl Default for IrInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl IrInfo {
    pub fn new() -> IrInfo {
        let mut func_type = Map::new();
        for (name, ty, _) in LIB_FUNCS {
            func_type.insert(name.to_string(), ty);
        }
        IrInfo {
            level: 0,
            clock: 0,
            label_count: Map::new(),
            temp_count: Map::new(),
            temp_last_count: Map::new(),
            temp_time: Map::new(),
            var_count: Map::new(),
            entries: vec![],
            scopes: vec![Map::new()],
            func_type,
            last_result: String::new(),
            global_scope: false,
            func_name: String::new(),
        }
    }

    /// The canonical exit label of the current function.
    pub fn exit_label(&self) -> String {
        format!("%labelexit_{}", self.func_name)
    }

    /// Allocate a fresh temporary `%temp_<category>_<n>`, or
    /// `%alloc_<category>_<n>` when the temporary needs a stack slot.
    pub fn allocate_temp(&mut self, category: &str, needs_slot: bool) -> String {
        let key = format!("{}{category}", if needs_slot { "alloc_" } else { "temp_" });
        self.temp_last_count.entry(key.clone()).or_insert(0);
        let count = self.temp_count.entry(key.clone()).or_insert(0);
        let name = format!("%{key}_{count}");
        *count += 1;
        self.temp_time.insert(name.clone(), self.clock);
        self.clock += 1;
        name
    }

    /// Allocate a fresh label `%label_<category>_<n>`.
    pub fn allocate_label(&mut self, category: &str) -> String {
        let count = self.label_count.entry(category.to_string()).or_insert(0);
        let name = format!("%label_{category}_{count}");
        *count += 1;
        name
    }

    /// Declare a program variable in the current scope and return its
    /// unique IR name.
    pub fn declare_var(&mut self, ident: &str, is_arg: bool, dims: Vec<Option<usize>>) -> String {
        let index = self.var_count.entry(ident.to_string()).or_insert(0);
        let entry = VarEntry {
            ident: ident.to_string(),
            index: *index,
            constant: None,
            level: self.level,
            is_arg,
            dims,
        };
        *index += 1;
        let name = entry.ir_name();
        let slot = self.entries.len();
        self.entries.push(entry);
        self.scopes
            .last_mut()
            .expect("scope chain is never empty")
            .insert(ident.to_string(), slot);
        name
    }

    fn current_entry(&self, ident: &str) -> Option<&VarEntry> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(ident))
            .map(|&slot| &self.entries[slot])
    }

    fn current_entry_mut(&mut self, ident: &str) -> Option<&mut VarEntry> {
        let slot = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(ident))
            .copied()?;
        Some(&mut self.entries[slot])
    }

    /// Identifier part of an IR name: `@sum_3` → `sum`.  Source identifiers
    /// and temporaries pass through unchanged.
    fn strip_name(name: &str) -> &str {
        match name.strip_prefix('@') {
            Some(rest) => &rest[..rest.rfind('_').unwrap_or(rest.len())],
            None => name,
        }
    }

    /// Resolve a source identifier to its innermost binding's IR name.
    /// Temporaries pass through unchanged.
    pub fn get_var_name(&self, ast_name: &str) -> String {
        if is_temp(ast_name) {
            return ast_name.to_string();
        }
        self.current_entry(ast_name)
            .unwrap_or_else(|| panic!("use of undeclared variable '{ast_name}'"))
            .ir_name()
    }

    /// Bind a folded constant to the identifier's innermost declaration.
    pub fn set_const(&mut self, ident: &str, value: i32) {
        self.current_entry_mut(ident)
            .unwrap_or_else(|| panic!("use of undeclared variable '{ident}'"))
            .constant = Some(value);
    }

    /// The constant bound to a program variable name, if any.
    pub fn get_const(&self, name: &str) -> Option<i32> {
        if !is_program_var(name) {
            return None;
        }
        self.current_entry(Self::strip_name(name))?.constant
    }

    /// Array dimensions of a name; empty for scalars.
    pub fn get_type(&self, name: &str) -> Vec<Option<usize>> {
        self.current_entry(Self::strip_name(name))
            .unwrap_or_else(|| panic!("use of undeclared variable '{name}'"))
            .dims
            .clone()
    }

    /// True only for array parameters (first dimension elided): these hold
    /// a pointer already and are indexed with `getptr`.
    pub fn is_arg(&self, name: &str) -> bool {
        self.current_entry(Self::strip_name(name))
            .map(|entry| entry.is_arg && !entry.dims.is_empty())
            .unwrap_or(false)
    }

    pub fn set_func(&mut self, name: &str, ty: FuncType) {
        self.func_type.insert(name.to_string(), ty);
    }

    pub fn get_func(&self, name: &str) -> FuncType {
        *self
            .func_type
            .get(name)
            .unwrap_or_else(|| panic!("call to unknown function '{name}'"))
    }

    pub fn inc_level(&mut self) {
        self.level += 1;
        self.scopes.push(Map::new());
    }

    pub fn dec_level(&mut self) {
        self.scopes.pop();
        self.level -= 1;
    }

    /// Open a function: declare its parameters and build the IR fragment
    /// that homes scalar arguments into stack slots.  The alloc/store pairs
    /// are discard-tagged; codegen reads scalar arguments straight from the
    /// argument registers and the caller's frame.
    pub fn start_func(&mut self, args: &[(String, Vec<Option<usize>>)]) -> (PartIr, Vec<Param>) {
        self.clock = 0;
        let mut part = PartIr::new();
        let mut params = vec![];
        for (ident, dims) in args {
            let pname = self.declare_var(ident, true, dims.clone());
            if dims.is_empty() {
                let tname = format!("%arg_{}", &pname[1..]);
                params.push(Param {
                    name: tname.clone(),
                    ty: ParamType::I32,
                });
                part.append(Value::discarded(Op::Alloc, vec![pname.clone(), "i32".into()]), self);
                part.append(Value::discarded(Op::Store, vec![tname, pname]), self);
            } else {
                params.push(Param {
                    name: pname,
                    ty: ParamType::PtrI32,
                });
            }
        }
        (part, params)
    }

    /// The prologue allocation fragment: one `alloc` per non-constant,
    /// non-argument local variable, then one declaration per temporary of
    /// this function, in allocation-timestamp order.
    pub fn get_alloc(&self) -> PartIr {
        let mut part = PartIr::new();
        for entry in &self.entries {
            if entry.level <= 1 || entry.constant.is_some() || entry.is_arg {
                continue;
            }
            let ty = if entry.dims.is_empty() {
                "i32".to_string()
            } else {
                let size: usize = entry
                    .dims
                    .iter()
                    .map(|dim| dim.expect("local array dimension must be known"))
                    .product();
                format!("[i32, {size}]")
            };
            part.append(Value::new(Op::Alloc, vec![entry.ir_name(), ty]), self);
        }
        let mut decls = vec![];
        for (key, &count) in &self.temp_count {
            let start = self.temp_last_count.get(key).copied().unwrap_or(0);
            for i in start..count {
                let name = format!("%{key}_{i}");
                let value = if is_alloc_var(&name) {
                    Value::new(Op::Alloc, vec![name.clone(), "i32".to_string()])
                } else {
                    Value::new(Op::Decl, vec![name.clone(), "i32".to_string()])
                };
                decls.push((self.temp_time[&name], value));
            }
        }
        decls.sort_by_key(|(time, _)| *time);
        for (_, value) in decls {
            part.append(value, self);
        }
        part
    }

    /// Close a function: drop its variable entries (globals stay) and
    /// advance the per-category counters so the next function declares only
    /// its own temporaries.
    pub fn end_func(&mut self) {
        self.entries.retain(|entry| entry.level == 0);
        self.temp_time.clear();
        for (key, count) in &self.temp_count {
            self.temp_last_count.insert(key.clone(), *count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_and_label_names() {
        let mut info = IrInfo::new();
        assert_eq!(info.allocate_temp("add", false), "%temp_add_0");
        assert_eq!(info.allocate_temp("add", false), "%temp_add_1");
        assert_eq!(info.allocate_temp("and_alloc", true), "%alloc_and_alloc_0");
        assert_eq!(info.allocate_label("if_then"), "%label_if_then_0");
        assert_eq!(info.allocate_label("if_then"), "%label_if_then_1");
        assert_eq!(info.allocate_label("while_cond"), "%label_while_cond_0");
    }

    #[test]
    fn shadowing_and_scopes() {
        let mut info = IrInfo::new();
        info.declare_var("x", false, vec![]);
        assert_eq!(info.get_var_name("x"), "@x_0");
        info.inc_level();
        info.declare_var("x", false, vec![]);
        assert_eq!(info.get_var_name("x"), "@x_1");
        info.dec_level();
        assert_eq!(info.get_var_name("x"), "@x_0");
        // A later re-declaration never reuses an index.
        info.inc_level();
        info.declare_var("x", false, vec![]);
        assert_eq!(info.get_var_name("x"), "@x_2");
        info.dec_level();
    }

    #[test]
    fn constants() {
        let mut info = IrInfo::new();
        info.declare_var("c", false, vec![]);
        info.set_const("c", 14);
        assert_eq!(info.get_const("@c_0"), Some(14));
        assert_eq!(info.get_const("%temp_add_0"), None);
        info.inc_level();
        info.declare_var("c", false, vec![]);
        assert_eq!(info.get_const("@c_1"), None);
        info.dec_level();
    }

    #[test]
    fn array_parameters_use_getptr() {
        let mut info = IrInfo::new();
        info.inc_level();
        let (_, params) = info.start_func(&[
            ("x".to_string(), vec![]),
            ("p".to_string(), vec![None, Some(3)]),
        ]);
        assert_eq!(params[0].to_string(), "%arg_x_0: i32");
        assert_eq!(params[1].to_string(), "@p_0: *i32");
        assert!(!info.is_arg("@x_0"));
        assert!(info.is_arg("@p_0"));
        assert_eq!(info.get_type("@p_0"), vec![None, Some(3)]);
        info.end_func();
        info.dec_level();
    }

    #[test]
    fn prologue_allocs_skip_consts_args_and_globals() {
        let mut info = IrInfo::new();
        info.declare_var("g", false, vec![]); // global, level 0
        info.inc_level(); // function level
        info.func_name = "f".to_string();
        let _ = info.start_func(&[("x".to_string(), vec![])]);
        info.inc_level(); // body
        info.declare_var("a", false, vec![]);
        info.declare_var("c", false, vec![]);
        info.set_const("c", 1);
        info.declare_var("m", false, vec![Some(2), Some(3)]);
        let t = info.allocate_temp("add", false);
        let names: Vec<String> = info
            .get_alloc()
            .into_head()
            .into_iter()
            .map(|v| v.args[0].clone())
            .collect();
        assert_eq!(names, vec!["@a_0".to_string(), "@m_0".to_string(), t]);
        info.dec_level();
        info.end_func();
        info.dec_level();
    }

    #[test]
    fn temp_declarations_follow_allocation_order() {
        let mut info = IrInfo::new();
        info.inc_level();
        info.func_name = "f".to_string();
        let _ = info.start_func(&[]);
        let t0 = info.allocate_temp("load", false);
        let a0 = info.allocate_temp("or_alloc", true);
        let t1 = info.allocate_temp("load", false);
        let decls: Vec<(Op, String)> = info
            .get_alloc()
            .into_head()
            .into_iter()
            .map(|v| (v.op, v.args[0].clone()))
            .collect();
        assert_eq!(
            decls,
            vec![
                (Op::Decl, t0.clone()),
                (Op::Alloc, a0),
                (Op::Decl, t1),
            ]
        );
        info.end_func();
        info.dec_level();

        // The next function's counters continue where this one stopped.
        info.inc_level();
        let _ = info.start_func(&[]);
        assert_eq!(info.allocate_temp("load", false), "%temp_load_2");
        assert_eq!(info.get_alloc().into_head().len(), 1);
        info.end_func();
        info.dec_level();
    }
}
