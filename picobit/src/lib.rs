pub mod bignum;
pub mod builder;
pub mod bytecode;
pub mod cell;
mod error;
mod gc;
mod heap;
mod host;
pub mod image;
mod interpreter;
pub mod primitives;
pub mod printer;
mod roots;
mod vector;
mod vm;

pub use builder::{ImageBuilder, Label};
pub use bytecode::{Instruction, Op, disassemble};
pub use cell::{
    CELL_SIZE, Cell, CellFlags, CellKind, CellType, Class, Constant, Ptr,
};
pub use error::{Space, VmError};
pub use gc::{GcStats, NoRoots, RootProvider};
pub use heap::{Heap, HeapSettings};
pub use host::{BufferHost, Host, TICKS_PER_SECOND, Terminal, Transcript};
pub use image::Image;
pub use primitives::{PRIMITIVES, Primitive, Step};
pub use roots::RootScope;
pub use vector::VectorHeap;
pub use vm::{VM, VmSettings, VmState};
