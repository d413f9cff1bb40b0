//! Lowering from the AST to the block-structured IR.
//!
//! The walk produces [`PartIr`] fragments bottom-up.  Expressions are first
//! folded in place by [`try_eval`]; whatever remains is emitted as
//! three-address instructions.  `&&`/`||` whose right operand may have a
//! side effect expand into branching block structure; array accesses are
//! linearized against the declared dimensions before any IR is emitted.

use crate::front::ast::*;
use crate::middle::ir::{FunctionIr, Op, ProgramIr, Value};
use crate::middle::names::{is_alloc_var, is_num};
use crate::middle::part::PartIr;
use crate::middle::symbols::IrInfo;

/// Lower a whole program.  Global declarations come first (in declaration
/// order), then every function signature is registered, then bodies are
/// lowered.
pub fn lower(mut program: Program) -> ProgramIr {
    let mut info = IrInfo::new();
    let mut result = ProgramIr::default();

    info.global_scope = true;
    let mut globals = PartIr::new();
    for decl in &mut program.globals {
        let part = lower_decl(decl, &mut info);
        globals.merge(part, &info);
    }
    info.global_scope = false;
    result.values = globals.into_head();

    for func in &program.functions {
        info.set_func(&func.ident, func.ret);
    }
    for func in &mut program.functions {
        result.functions.push(lower_func(func, &mut info));
    }
    result
}

fn lower_func(func: &mut FuncDef, info: &mut IrInfo) -> FunctionIr {
    info.inc_level();
    info.func_name = func.ident.to_string();

    let mut args = vec![];
    for param in &mut func.params {
        let mut dims = vec![];
        for dim in &mut param.dims {
            match dim {
                None => dims.push(None),
                Some(expr) => {
                    try_eval(expr, info);
                    dims.push(Some(expect_dim(expr, &param.ident)));
                }
            }
        }
        args.push((param.ident.to_string(), dims));
    }
    let (prealloc, params) = info.start_func(&args);

    let body = lower_block(&mut func.body, info);

    let mut part = info.get_alloc();
    part.merge(prealloc, info);
    part.merge(body, info);
    part.seal_prev("%entry", func.ret);
    part.seal_next(info);
    part.create_new_block(info.exit_label());
    let ret_args = match func.ret {
        FuncType::Int => vec!["0".to_string()],
        FuncType::Void => vec![],
    };
    part.append(Value::new(Op::Ret, ret_args), info);

    let result = FunctionIr {
        name: func.ident.to_string(),
        return_type: func.ret,
        params,
        blocks: part.into_blocks(),
        super_block: None,
    };
    info.end_func();
    info.dec_level();
    result
}

fn lower_block(block: &mut Block, info: &mut IrInfo) -> PartIr {
    info.inc_level();
    let mut result = PartIr::new();
    for stmt in &mut block.stmts {
        let part = lower_stmt(stmt, info);
        result.merge(part, info);
    }
    info.dec_level();
    result
}

fn lower_stmt(stmt: &mut Stmt, info: &mut IrInfo) -> PartIr {
    match stmt {
        Stmt::Block(block) => lower_block(block, info),
        Stmt::Expr(None) => PartIr::new(),
        Stmt::Expr(Some(expr)) => {
            try_eval(expr, info);
            match expr {
                // a folded or variable expression statement has no effect
                Expr::Num(_) | Expr::Var(_) => PartIr::new(),
                _ => lower_expr(expr, info),
            }
        }
        Stmt::Return(expr) => {
            let mut part = PartIr::new();
            let args = match expr {
                Some(expr) => {
                    try_eval(expr, info);
                    vec![eval_to_name(expr, &mut part, info)]
                }
                None => vec![],
            };
            part.append(Value::new(Op::Ret, args), info);
            part
        }
        Stmt::Assign {
            ident,
            indices,
            value,
        } => {
            try_eval(value, info);
            let mut part = PartIr::new();
            let value_name = eval_to_name(value, &mut part, info);
            let dest = if indices.is_empty() {
                info.get_var_name(ident)
            } else {
                // compute the element address through a no-load access
                let mut at = Expr::Index {
                    array: *ident,
                    indices: indices.clone(),
                    deref: false,
                };
                try_eval(&mut at, info);
                let at_ir = lower_expr(&at, info);
                part.merge(at_ir, info);
                info.last_result.clone()
            };
            part.append(Value::new(Op::Store, vec![value_name, dest]), info);
            part
        }
        Stmt::Decl(decl) => lower_decl(decl, info),
        Stmt::If { cond, then, alt } => {
            try_eval(cond, info);
            let mut part = PartIr::new();
            let arg = eval_to_name(cond, &mut part, info);
            let then_label = info.allocate_label("if_then");
            let else_label = info.allocate_label("if_else");
            let next_label = info.allocate_label("if_next");
            let alt_target = if alt.is_some() {
                else_label.clone()
            } else {
                next_label.clone()
            };
            part.append(
                Value::new(Op::Branch, vec![arg, then_label.clone(), alt_target]),
                info,
            );

            part.create_new_block(then_label);
            let then_ir = lower_block(then, info);
            part.merge(then_ir, info);
            part.append(Value::new(Op::Jump, vec![next_label.clone()]), info);

            if let Some(alt) = alt {
                part.create_new_block(else_label);
                let else_ir = lower_block(alt, info);
                part.merge(else_ir, info);
                part.append(Value::new(Op::Jump, vec![next_label.clone()]), info);
            }

            part.create_new_block(next_label);
            part
        }
        Stmt::While { cond, body } => {
            try_eval(cond, info);
            let cond_label = info.allocate_label("while_cond");
            let then_label = info.allocate_label("while_then");
            let next_label = info.allocate_label("while_next");
            let mut part = PartIr::new();
            part.append(Value::new(Op::Jump, vec![cond_label.clone()]), info);
            part.create_new_block(cond_label.clone());

            let arg = eval_to_name(cond, &mut part, info);
            part.append(
                Value::new(
                    Op::Branch,
                    vec![arg, then_label.clone(), next_label.clone()],
                ),
                info,
            );

            part.create_new_block(then_label);
            let body_ir = lower_block(body, info);
            part.merge(body_ir, info);
            part.append(Value::new(Op::Jump, vec![cond_label.clone()]), info);

            part.create_new_block(next_label.clone());

            // bind this loop's placeholders; inner loops already bound theirs
            part.substitute("continue", &cond_label);
            part.substitute("break", &next_label);
            part
        }
        Stmt::Break => {
            let mut part = PartIr::new();
            part.append(Value::new(Op::Jump, vec!["break"]), info);
            part
        }
        Stmt::Continue => {
            let mut part = PartIr::new();
            part.append(Value::new(Op::Jump, vec!["continue"]), info);
            part
        }
    }
}

fn lower_decl(decl: &mut Decl, info: &mut IrInfo) -> PartIr {
    let mut part = PartIr::new();
    // the initializer of a scalar refers to the enclosing binding, so it is
    // folded before the new name shadows it
    if decl.dims.is_empty() {
        if let Some(Init::Expr(expr)) = &mut decl.init {
            try_eval(expr, info);
        }
    }
    let mut dims = vec![];
    for dim in &mut decl.dims {
        try_eval(dim, info);
        dims.push(Some(expect_dim(dim, &decl.ident)));
    }
    let name = info.declare_var(&decl.ident, false, dims.clone());

    if decl.dims.is_empty() {
        match &mut decl.init {
            Some(Init::Expr(Expr::Num(value))) if decl.is_const => {
                info.set_const(&decl.ident, *value);
            }
            Some(Init::Expr(expr)) => {
                let value = eval_to_name(expr, &mut part, info);
                let store = if info.global_scope {
                    Value::new(Op::GlobalAlloc, vec![name, "i32".to_string(), value])
                } else {
                    Value::new(Op::Store, vec![value, name])
                };
                part.append(store, info);
            }
            Some(Init::List(_)) => panic!("brace initializer on scalar '{}'", decl.ident),
            None => {
                if info.global_scope {
                    part.append(
                        Value::new(Op::GlobalAlloc, vec![name, "i32".into(), "undef".into()]),
                        info,
                    );
                }
            }
        }
        return part;
    }

    // arrays
    let size: usize = dims.iter().map(|d| d.unwrap_or(0)).product();
    let ty = format!("[i32, {size}]");
    let exps = decl
        .init
        .as_mut()
        .map(|init| flatten_init(init, info, &dims));
    if info.global_scope {
        let init_str = match &exps {
            Some(exps) => init_vector(exps, info),
            None => "undef".to_string(),
        };
        part.append(Value::new(Op::GlobalAlloc, vec![name, ty, init_str]), info);
    } else if let Some(exps) = exps {
        let mut store_part = PartIr::new();
        for (offset, expr) in exps.iter().enumerate() {
            let element = match expr {
                // constant elements travel in the bulk vector
                Expr::Num(_) => continue,
                Expr::Var(_) => eval_to_name(expr, &mut store_part, info),
                _ => {
                    let expr_ir = lower_expr(expr, info);
                    part.merge(expr_ir, info);
                    info.last_result.clone()
                }
            };
            let ptr = info.allocate_temp("getelemptr", false);
            store_part.append(
                Value::new(
                    Op::GetElemPtr,
                    vec![ptr.clone(), name.clone(), offset.to_string()],
                ),
                info,
            );
            store_part.append(Value::new(Op::Store, vec![element, ptr]), info);
        }
        part.append(
            Value::new(Op::Store, vec![init_vector(&exps, info), name]),
            info,
        );
        part.merge(store_part, info);
    }
    part
}

fn expect_dim(expr: &Expr, ident: &impl std::fmt::Display) -> usize {
    match expr {
        Expr::Num(value) if *value > 0 => *value as usize,
        _ => panic!("array dimension of '{ident}' is not a positive constant"),
    }
}

/// Realize a (possibly nested) brace initializer against the dimension
/// list: flat elements fill in order, each inner brace list fills the
/// largest dimension suffix aligned at the current offset, and the tail is
/// padded with zeros up to the full element count.
fn flatten_init(init: &mut Init, info: &IrInfo, dims: &[Option<usize>]) -> Vec<Expr> {
    match init {
        Init::Expr(expr) => {
            try_eval(expr, info);
            vec![expr.clone()]
        }
        Init::List(items) => {
            let total: usize = dims.iter().map(|d| d.unwrap_or(0)).product();
            let mut exps = vec![];
            for item in items {
                match item {
                    Init::Expr(_) => exps.extend(flatten_init(item, info, dims)),
                    Init::List(_) => {
                        let mut offset = exps.len();
                        let mut sub_dims: Vec<Option<usize>> = vec![];
                        for dim in dims.iter().rev() {
                            let dim = dim.unwrap_or(0);
                            if dim != 0 && offset % dim == 0 && sub_dims.len() != dims.len() - 1 {
                                sub_dims.insert(0, Some(dim));
                                offset /= dim;
                            } else {
                                break;
                            }
                        }
                        exps.extend(flatten_init(item, info, &sub_dims));
                    }
                }
            }
            exps.resize(total.max(exps.len()), Expr::Num(0));
            exps
        }
    }
}

/// The literal vector form of a flattened initializer: folded elements by
/// value, runtime elements as `undef` (they get element-wise stores).
fn init_vector(exps: &[Expr], _info: &IrInfo) -> String {
    let words: Vec<String> = exps
        .iter()
        .map(|expr| match expr {
            Expr::Num(value) => value.to_string(),
            _ => "undef".to_string(),
        })
        .collect();
    format!("{{{}}}", words.join(", "))
}

/// Fold an expression in place.  Literals and const-bound variables become
/// `Num`; array accesses are rewritten to a single linearized index (and
/// downgraded to address-only when under-indexed); binary operators over
/// two literals fold with 32-bit wrapping semantics.
pub fn try_eval(expr: &mut Expr, info: &IrInfo) {
    match expr {
        Expr::Num(_) => {}
        Expr::Var(ident) => {
            let name = info.get_var_name(ident.as_str());
            if let Some(value) = info.get_const(&name) {
                *expr = Expr::Num(value);
            }
        }
        Expr::Index {
            array,
            indices,
            deref,
        } => {
            let dims = info.get_type(array.as_str());
            if dims.is_empty() {
                panic!("indexing non-array '{array}'");
            }
            if dims.len() != indices.len() {
                // an under-indexed access denotes a sub-array address
                *deref = false;
            }
            let mut terms = std::mem::take(indices).into_iter().enumerate().map(
                |(position, index)| {
                    let stride: usize = dims[position + 1..]
                        .iter()
                        .map(|d| d.expect("inner array dimension must be known"))
                        .product();
                    Expr::binary(BinOp::Mul, index, Expr::Num(stride as i32))
                },
            );
            let mut linear = terms.next().expect("array access with no indices");
            for term in terms {
                linear = Expr::binary(BinOp::Add, linear, term);
            }
            try_eval(&mut linear, info);
            indices.push(linear);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                try_eval(arg, info);
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            try_eval(lhs, info);
            try_eval(rhs, info);
            if let (Expr::Num(lhs), Expr::Num(rhs)) = (lhs.as_ref(), rhs.as_ref()) {
                *expr = Expr::Num(op.eval(*lhs, *rhs));
            }
        }
    }
}

/// Produce the IR name of an already-folded expression, emitting into
/// `part` whatever the value path needs (constant resolution, loads of
/// scalars, pointer decay of arrays).
fn eval_to_name(expr: &Expr, part: &mut PartIr, info: &mut IrInfo) -> String {
    match expr {
        Expr::Num(_) | Expr::Var(_) => lower_value(expr, part, info),
        _ => {
            let expr_ir = lower_expr(expr, info);
            part.merge(expr_ir, info);
            info.last_result.clone()
        }
    }
}

/// The value path: literals pass through, const variables resolve, arrays
/// decay to a pointer to their first element, scalars load from their slot.
fn lower_value(expr: &Expr, part: &mut PartIr, info: &mut IrInfo) -> String {
    match expr {
        Expr::Num(value) => value.to_string(),
        Expr::Var(ident) => {
            let name = info.get_var_name(ident.as_str());
            if let Some(value) = info.get_const(&name) {
                return value.to_string();
            }
            if !info.get_type(&name).is_empty() {
                let (op, category) = if info.is_arg(&name) {
                    (Op::GetPtr, "getptr")
                } else {
                    (Op::GetElemPtr, "getelemptr")
                };
                let result = info.allocate_temp(category, false);
                part.append(
                    Value::new(op, vec![result.clone(), name, "0".to_string()]),
                    info,
                );
                result
            } else if is_alloc_var(&name) {
                let result = info.allocate_temp("load", false);
                part.append(Value::new(Op::Load, vec![result.clone(), name]), info);
                result
            } else {
                name
            }
        }
        _ => panic!("expression is not a value"),
    }
}

/// Lower an operand of a compound expression: value-path operands emit
/// straight into `part`, compound operands come back as their own fragment
/// for the caller to place.
fn lower_operand(
    expr: &Expr,
    part: &mut PartIr,
    info: &mut IrInfo,
) -> (Option<PartIr>, String) {
    match expr {
        Expr::Num(_) | Expr::Var(_) => (None, lower_value(expr, part, info)),
        _ => {
            let expr_ir = lower_expr(expr, info);
            (Some(expr_ir), info.last_result.clone())
        }
    }
}

/// Lower a non-value expression into a fragment; the produced name is left
/// in `info.last_result`.
fn lower_expr(expr: &Expr, info: &mut IrInfo) -> PartIr {
    let mut result = PartIr::new();
    match expr {
        Expr::Binary { op: op @ (BinOp::And | BinOp::Or), lhs, rhs } if rhs.side_effect() => {
            let current = info.allocate_temp(&op.to_string(), false);
            let (lhs_ir, lhs_name) = lower_operand(lhs, &mut result, info);
            if let Some(lhs_ir) = lhs_ir {
                result.merge(lhs_ir, info);
            }

            let comp_label = info.allocate_label(&format!("{op}_comp"));
            let lazy_label = info.allocate_label(&format!("{op}_lazy"));
            let next_label = info.allocate_label(&format!("{op}_next"));
            let slot = info.allocate_temp(&format!("{op}_alloc"), true);

            let (on_true, on_false) = match op {
                BinOp::And => (comp_label.clone(), lazy_label.clone()),
                _ => (lazy_label.clone(), comp_label.clone()),
            };
            part_br(&mut result, info, lhs_name, on_true, on_false);

            // the lazy block knows the result without looking at the rhs
            result.create_new_block(lazy_label);
            let lazy_value = if *op == BinOp::Or { "1" } else { "0" };
            result.append(
                Value::new(Op::Store, vec![lazy_value.to_string(), slot.clone()]),
                info,
            );
            result.append(Value::new(Op::Jump, vec![next_label.clone()]), info);

            result.create_new_block(comp_label);
            let rhs_ir = lower_expr(rhs, info);
            let rhs_name = info.last_result.clone();
            result.merge(rhs_ir, info);
            if is_num(&rhs_name) {
                let bit = if rhs_name == "0" { "0" } else { "1" };
                result.append(
                    Value::new(Op::Store, vec![bit.to_string(), slot.clone()]),
                    info,
                );
            } else {
                let boolize = info.allocate_temp(&format!("{op}_boolize"), false);
                result.append(
                    Value::new(
                        Op::Binary(BinOp::Ne),
                        vec![boolize.clone(), rhs_name, "0".to_string()],
                    ),
                    info,
                );
                result.append(Value::new(Op::Store, vec![boolize, slot.clone()]), info);
            }
            result.append(Value::new(Op::Jump, vec![next_label.clone()]), info);

            result.create_new_block(next_label);
            result.append(Value::new(Op::Load, vec![current.clone(), slot]), info);
            info.last_result = current;
        }
        Expr::Binary { op: op @ (BinOp::And | BinOp::Or), lhs, rhs } => {
            let current = info.allocate_temp(&op.to_string(), false);
            let (lhs_ir, lhs_name) = lower_operand(lhs, &mut result, info);
            let (rhs_ir, rhs_name) = lower_operand(rhs, &mut result, info);
            if let Some(lhs_ir) = lhs_ir {
                result.merge(lhs_ir, info);
            }
            if let Some(rhs_ir) = rhs_ir {
                result.merge(rhs_ir, info);
            }
            let lhs_bit = boolize(lhs_name, op, &mut result, info);
            let rhs_bit = boolize(rhs_name, op, &mut result, info);
            result.append(
                Value::new(Op::Binary(*op), vec![current.clone(), lhs_bit, rhs_bit]),
                info,
            );
            info.last_result = current;
        }
        Expr::Binary { op, lhs, rhs } => {
            let current = info.allocate_temp(&op.to_string(), false);
            let (lhs_ir, lhs_name) = lower_operand(lhs, &mut result, info);
            let (rhs_ir, rhs_name) = lower_operand(rhs, &mut result, info);
            if let Some(lhs_ir) = lhs_ir {
                result.merge(lhs_ir, info);
            }
            if let Some(rhs_ir) = rhs_ir {
                result.merge(rhs_ir, info);
            }
            result.append(
                Value::new(Op::Binary(*op), vec![current.clone(), lhs_name, rhs_name]),
                info,
            );
            info.last_result = current;
        }
        Expr::Call { callee, args } => {
            let current = info.allocate_temp(&format!("func_{callee}"), false);
            let mut arg_irs = vec![];
            let mut arg_names = vec![];
            for arg in args {
                let (arg_ir, arg_name) = lower_operand(arg, &mut result, info);
                arg_irs.push(arg_ir);
                arg_names.push(arg_name);
            }
            for arg_ir in arg_irs.into_iter().flatten() {
                result.merge(arg_ir, info);
            }
            let mut call_args = vec![callee.to_string()];
            let op = match info.get_func(callee.as_str()) {
                FuncType::Int => {
                    call_args.push(current.clone());
                    Op::CallInt
                }
                FuncType::Void => Op::CallVoid,
            };
            call_args.extend(arg_names);
            result.append(Value::new(op, call_args), info);
            info.last_result = current;
        }
        Expr::Index {
            array,
            indices,
            deref,
        } => {
            let (index_ir, index_name) = lower_operand(&indices[0], &mut result, info);
            if let Some(index_ir) = index_ir {
                result.merge(index_ir, info);
            }
            let parr = info.get_var_name(array.as_str());
            let op = if info.is_arg(&parr) {
                Op::GetPtr
            } else {
                Op::GetElemPtr
            };
            let ptr = info.allocate_temp("atptr", false);
            result.append(Value::new(op, vec![ptr.clone(), parr, index_name]), info);
            if *deref {
                let current = info.allocate_temp("at", false);
                result.append(Value::new(Op::Load, vec![current.clone(), ptr]), info);
                info.last_result = current;
            } else {
                info.last_result = ptr;
            }
        }
        Expr::Num(_) | Expr::Var(_) => panic!("lowering a value expression as compound"),
    }
    result
}

fn part_br(part: &mut PartIr, info: &IrInfo, cond: String, on_true: String, on_false: String) {
    part.append(Value::new(Op::Branch, vec![cond, on_true, on_false]), info);
}

/// Normalize an operand of a strict `&&`/`||` to 0/1.
fn boolize(name: String, op: &BinOp, part: &mut PartIr, info: &mut IrInfo) -> String {
    if is_num(&name) {
        return if name == "0" { "0" } else { "1" }.to_string();
    }
    let bit = info.allocate_temp(&format!("{op}_boolize"), false);
    part.append(
        Value::new(Op::Binary(BinOp::Ne), vec![bit.clone(), name, "0".to_string()]),
        info,
    );
    bit
}
