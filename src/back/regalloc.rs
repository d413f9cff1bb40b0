//! Register and frame state for the RISC-V lowering.
//!
//! The [`Controller`] pairs a register file (who sits in which register,
//! LRU-ordered) with a frame manager (which name owns which stack slot)
//! and the program-wide global/function symbol tables.  All spill and
//! reload traffic goes through `var_mem`, which picks global addressing
//! (`la` + offset 0) or frame addressing (`fp` - slot) per name.

use crate::back::asm::{
    mem_insn, safe_mem, Asm, Insn, MemOp, Register, ARG_REGS, FREE_REGS, REGISTERS, REG_COUNT,
    SAVED_REGS, SAVED_REG_NUM,
};
use crate::common::{Map, Set};
use crate::middle::ir::Param;
use crate::middle::names::is_alloc_var;

/// Program-wide assembly symbol tables.
#[derive(Default)]
pub struct GlobalInfo {
    /// IR global name (`@a_0`) → assembly symbol (`globl_a_0`).
    pub global_var: Map<String, String>,
    /// IR function name → assembly symbol (`main` stays, others are
    /// mangled `func_<name>` to avoid colliding with the runtime).
    pub func_name: Map<String, String>,
}

/// Stack-frame layout of the function being emitted.  Slots grow one at a
/// time; the recorded position is the distance below `fp`.
#[derive(Default)]
pub struct Frame {
    mem_need: i32,
    save_pos: Map<String, i32>,
}

impl Frame {
    /// Bytes of frame space requested so far (callee-saved homes included).
    pub fn mem_need(&self) -> i32 {
        self.mem_need
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.save_pos.contains_key(name)
    }

    pub fn save_pos(&self, name: &str) -> i32 {
        *self
            .save_pos
            .get(name)
            .unwrap_or_else(|| panic!("'{name}' has no stack slot"))
    }

    /// Home slots for the original values of the callee-saved registers,
    /// at fixed offsets right below the saved `ra`.
    fn init_save_regs(&mut self) {
        for i in 1..SAVED_REG_NUM {
            self.save_pos.insert(format!("saved {i}"), (i as i32 + 1) * 4);
        }
    }
}

/// The scratch register file.
struct RegFile {
    in_use: [Option<String>; REG_COUNT],
    pos: Map<String, usize>,
    last_used: [u32; REG_COUNT],
    clock: u32,
}

impl RegFile {
    fn new() -> RegFile {
        RegFile {
            in_use: std::array::from_fn(|_| None),
            pos: Map::new(),
            last_used: [0; REG_COUNT],
            clock: 0,
        }
    }

    fn touch(&mut self, reg: usize) {
        self.last_used[reg] = self.clock;
        self.clock += 1;
    }

    fn bind(&mut self, reg: usize, name: &str) {
        self.in_use[reg] = Some(name.to_string());
        self.pos.insert(name.to_string(), reg);
        self.touch(reg);
    }

    fn unbind(&mut self, reg: usize) {
        if let Some(name) = self.in_use[reg].take() {
            self.pos.remove(&name);
        }
    }

    /// Least recently used scratch register.
    fn lru(&self) -> usize {
        FREE_REGS
            .iter()
            .map(|reg| reg.index())
            .min_by_key(|&reg| self.last_used[reg])
            .expect("scratch pool is not empty")
    }

    fn reset_clock(&mut self) {
        self.clock = 0;
        self.last_used = [0; REG_COUNT];
    }
}

pub struct Controller {
    regs: RegFile,
    pub frame: Frame,
    pub globals: GlobalInfo,
    /// Names known to hold an address (produced by `getptr`/`getelemptr`);
    /// `load`/`store` on them go through memory instead of a move.
    pub ptr: Set<String>,
    /// Which callee-saved register currently holds which preserved name.
    pub current_save: Map<String, usize>,
    /// Labels already emitted; a `jump` to an emitted loop head skips the
    /// preparation stub.
    label_set: Set<String>,
    long_jump: u32,
}

impl Controller {
    pub fn new(globals: GlobalInfo) -> Controller {
        Controller {
            regs: RegFile::new(),
            frame: Frame::default(),
            globals,
            ptr: Set::new(),
            current_save: Map::new(),
            label_set: Set::new(),
            long_jump: 0,
        }
    }

    /// Reinitialize all per-function state for a function with the given
    /// parameter list.  Scalar arguments start resident in `a0`-`a7` with
    /// home slots in the caller's argument area; arguments past the eighth
    /// live in the caller's frame above `fp`.
    pub fn begin_func(&mut self, params: &[Param]) {
        self.ptr.clear();
        self.frame = Frame::default();
        self.frame.mem_need = 4 * SAVED_REG_NUM as i32;
        self.regs = RegFile::new();
        self.label_set.clear();
        self.current_save.clear();
        for (i, reg) in SAVED_REGS.iter().enumerate().skip(1) {
            self.current_save.insert(format!("saved {i}"), reg.index());
        }

        self.regs.in_use[Register::Zero.index()] = Some("zero".to_string());
        self.regs.in_use[Register::Ra.index()] = Some("return address".to_string());
        self.regs.in_use[Register::Sp.index()] = Some("stack pointer".to_string());
        self.regs.in_use[Register::Gp.index()] = Some("global pointer".to_string());
        self.regs.in_use[Register::Tp.index()] = Some("thread pointer".to_string());
        self.regs.in_use[Register::Fp.index()] = Some("frame pointer".to_string());
        self.regs.in_use[Register::S1.index()] = Some("saved 1".to_string());
        for (i, reg) in SAVED_REGS.iter().enumerate().skip(2) {
            self.regs.in_use[reg.index()] = Some(format!("saved {i}"));
        }

        let argc = params.len();
        for (i, param) in params.iter().enumerate().take(8) {
            let slot = param.slot_name();
            self.regs.bind(ARG_REGS[i].index(), &slot);
            self.frame
                .save_pos
                .insert(slot, (1 + i as i32 - argc as i32) * 4);
        }
        for (i, param) in params.iter().enumerate().skip(8) {
            self.frame
                .save_pos
                .insert(param.slot_name(), -((i as i32 - 8) * 4));
        }
        self.frame.init_save_regs();
        self.regs.reset_clock();
    }

    /// Spill or reload `name` at its home: a global goes through `la t5`,
    /// a local through its frame slot.
    pub fn var_mem(&self, op: MemOp, name: &str, reg: Register, asm: &mut Asm) {
        if let Some(symbol) = self.globals.global_var.get(name) {
            asm.emit(Insn::La {
                rd: Register::T5,
                symbol: symbol.clone(),
            });
            asm.emit(mem_insn(op, reg, 0, Register::T5));
        } else {
            safe_mem(op, reg, self.frame.save_pos(name), Register::Fp, asm);
        }
    }

    /// Flush every scratch-register tenant.  With `save` false (right
    /// before a return) only globals are written back; either way all
    /// scratch registers end up free and the LRU clock restarts.
    pub fn refresh(&mut self, asm: &mut Asm, save: bool) {
        for reg in FREE_REGS {
            let idx = reg.index();
            if let Some(tenant) = self.regs.in_use[idx].clone() {
                if save || self.globals.global_var.contains_key(&tenant) {
                    self.var_mem(MemOp::Store, &tenant, reg, asm);
                }
                self.regs.unbind(idx);
            }
        }
        self.regs.reset_clock();
    }

    /// Synchronize globals living in callee-saved registers with memory,
    /// in the given direction.  Used around calls: the callee addresses
    /// globals through memory.
    pub fn transition(&mut self, asm: &mut Asm, op: MemOp) {
        for (name, &reg) in &self.current_save {
            if self.globals.global_var.contains_key(name) {
                self.var_mem(op, name, REGISTERS[reg], asm);
            }
        }
    }

    /// The epilogue's register restoration: write preserved globals back
    /// and reload every callee-saved register whose original value was
    /// displaced by a preserved name.
    pub fn prepare_return(&mut self, asm: &mut Asm) {
        for (name, &reg) in &self.current_save {
            if self.globals.global_var.contains_key(name) {
                self.var_mem(MemOp::Store, name, REGISTERS[reg], asm);
            }
            for (j, saved) in SAVED_REGS.iter().enumerate().skip(1) {
                if reg == saved.index() && !name.starts_with("saved ") {
                    asm.emit(Insn::Lw {
                        rd: *saved,
                        offset: -((j as i32 + 1) * 4),
                        base: Register::Fp,
                    });
                }
            }
        }
    }

    pub fn bind(&mut self, reg: Register, name: &str) {
        self.regs.bind(reg.index(), name);
    }

    /// Reserve a stack slot for `name` (idempotent).  Scalar slots may
    /// also claim a free scratch register so the first store lands in a
    /// register instead of memory.
    pub fn alloc(&mut self, name: &str, want_reg: bool, size: i32) {
        if self.frame.has_slot(name) {
            return;
        }
        self.frame.mem_need += size;
        self.frame.save_pos.insert(name.to_string(), self.frame.mem_need);
        if want_reg && size == 4 {
            for reg in FREE_REGS {
                if self.regs.in_use[reg.index()].is_none() {
                    self.regs.bind(reg.index(), name);
                    return;
                }
            }
        }
    }

    /// Write the tenant of `reg` back to its home without freeing the
    /// register; with `sync` the tenancy also ends.
    pub fn save_back(&mut self, reg: Register, asm: &mut Asm, sync: bool) {
        if let Some(tenant) = self.regs.in_use[reg.index()].clone() {
            self.var_mem(MemOp::Store, &tenant, reg, asm);
            if sync {
                self.regs.unbind(reg.index());
            }
        }
    }

    fn find_reg(&mut self, asm: &mut Asm) -> usize {
        for reg in FREE_REGS {
            if self.regs.in_use[reg.index()].is_none() {
                self.regs.touch(reg.index());
                return reg.index();
            }
        }
        let reg = self.regs.lru();
        self.save_back(REGISTERS[reg], asm, false);
        self.regs.touch(reg);
        self.regs.unbind(reg);
        reg
    }

    /// Return the register holding `name`, reclaiming one if needed:
    /// preferably a free scratch register, otherwise the least recently
    /// used tenant is spilled.  With `do_load` false the register is bound
    /// without reading memory (the caller is about to overwrite it).
    /// `specify` forces a particular register, spilling and copying as the
    /// ABI requires.
    pub fn load(
        &mut self,
        name: &str,
        asm: &mut Asm,
        do_load: bool,
        specify: Option<Register>,
    ) -> Register {
        if let Some(spec) = specify {
            let idx = spec.index();
            if self.regs.pos.get(name) == Some(&idx) {
                self.regs.touch(idx);
                return spec;
            }
            if let Some(tenant) = self.regs.in_use[idx].clone() {
                self.var_mem(MemOp::Store, &tenant, spec, asm);
                self.regs.unbind(idx);
            }
            if let Some(&old) = self.regs.pos.get(name) {
                asm.emit(Insn::Mv {
                    rd: spec,
                    rs: REGISTERS[old],
                });
                self.regs.in_use[old] = None;
            } else {
                self.var_mem(MemOp::Load, name, spec, asm);
            }
            self.regs.bind(idx, name);
            return spec;
        }

        if let Some(&reg) = self.regs.pos.get(name) {
            self.regs.touch(reg);
            return REGISTERS[reg];
        }
        let reg = self.find_reg(asm);
        self.regs.bind(reg, name);
        if do_load {
            self.var_mem(MemOp::Load, name, REGISTERS[reg], asm);
        }
        REGISTERS[reg]
    }

    /// Free a consumed temporary's register without spilling.  Allocated
    /// names keep their registers: their home is authoritative memory.
    pub fn try_invalidate(&mut self, name: &str) {
        if is_alloc_var(name) {
            return;
        }
        if let Some(&reg) = self.regs.pos.get(name) {
            self.regs.unbind(reg);
        }
    }

    /// Migrate the callee-saved registers to a new preserve assignment at
    /// a super-block boundary.  Pairs already in place (the untouched
    /// `saved i` placeholders) are left alone; everything else gets a slot
    /// and is loaded into its assigned register.
    pub fn checkout(&mut self, new_set: &Map<String, usize>, asm: &mut Asm) {
        let old = std::mem::take(&mut self.current_save);
        for (name, &reg) in new_set {
            if !(old.get(name) == Some(&reg) && name.starts_with("saved ")) {
                self.alloc(name, false, 4);
                self.load(name, asm, true, Some(REGISTERS[reg]));
            }
            self.current_save.insert(name.clone(), reg);
        }
    }

    pub fn has_set_label(&self, label: &str) -> bool {
        self.label_set.contains(label)
    }

    pub fn set_label(&mut self, label: &str) {
        self.label_set.insert(label.to_string());
    }

    /// A fresh trampoline label for branch inversion.
    pub fn next_long_jump(&mut self) -> String {
        let label = format!("labellongjump_{}", self.long_jump);
        self.long_jump += 1;
        label
    }
}
