//! The back-end of the compiler.

pub mod asm;
pub mod codegen;
pub mod regalloc;

pub use asm::*;
pub use codegen::code_gen;
pub use regalloc::Controller;
