//! PIR data model: entities, instructions, and the function/block container.

pub mod entities;
pub mod function;
pub mod instruction;

pub use entities::{Block, ClosureId, CodeIndex, Inst, SlotAssignment, Value};
pub use function::{BasicBlock, Function, PhiData, UseSite};
pub use instruction::{CodeRef, ConstId, Instruction, Opcode, ValueType};
