//! The middle-end: the IR, its builder, and the analyses that run on it.

pub mod ir;
pub mod names;
pub mod part;
pub mod superblock;
pub mod symbols;

pub use ir::*;
pub use part::PartIr;
pub use symbols::IrInfo;
