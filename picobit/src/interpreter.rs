//! The fetch, decode and execute loop and the procedure call protocol.
use log::{debug, trace};

use crate::{
    PRIMITIVES, Ptr, VM, VmError,
    bytecode::{Instruction, Op, decode_at},
    primitives::Step,
};

impl VM {
    /// Runs from the current `pc` until `#%halt`.
    pub fn run(&mut self) -> Result<(), VmError> {
        while self.step()? == Step::Continue {}
        debug!(
            "halted at {:#06x} after {} collections",
            self.pc,
            self.heap.stats().collections
        );
        Ok(())
    }

    /// Executes one instruction.
    pub fn step(&mut self) -> Result<Step, VmError> {
        let pc = self.pc;
        let (instruction, next) = decode_at(self.image.bytes(), pc)?;
        if self.settings.trace {
            trace!("{pc:#06x}  {instruction}  [depth {}]", self.stack_depth());
        }
        self.pc = next;

        match instruction {
            Instruction::Constant(p) => self.push(p)?,
            Instruction::LoadStack { depth } => {
                let value = self.peek(depth as usize);
                self.push(value)?;
            }
            Instruction::LoadGlobal { index } => {
                let value = self.heap.load_global(index)?;
                self.push(value)?;
            }
            Instruction::StoreGlobal { index } => {
                let value = self.pop()?;
                self.heap.store_global(index, value)?;
            }
            Instruction::CallClosure { argc } => {
                let argc = self.prepare_arguments(argc)?;
                self.build_environment(argc)?;
                self.save_cont()?;
                self.enter();
            }
            Instruction::JumpClosure { argc } => {
                let argc = self.prepare_arguments(argc)?;
                self.build_environment(argc)?;
                self.enter();
            }
            Instruction::Call { target } => {
                self.prepare_direct(target)?;
                self.save_cont()?;
                self.enter();
            }
            Instruction::Jump { target } => {
                self.prepare_direct(target)?;
                self.enter();
            }
            Instruction::Branch { target } => self.pc = target,
            Instruction::BranchIfFalse { target } => {
                if self.pop()? == Ptr::FALSE {
                    self.pc = target;
                }
            }
            Instruction::MakeClosure { entry } => self.make_closure(entry)?,
            Instruction::Primitive { index } => {
                return self.call_primitive(index, pc);
            }
        }
        Ok(Step::Continue)
    }

    fn code_byte(&self, at: usize) -> Result<u8, VmError> {
        self.image
            .byte(at)
            .ok_or(VmError::ProgramCounterOutOfRange { pc: at })
    }

    fn code_address(at: usize) -> Result<u16, VmError> {
        u16::try_from(at).map_err(|_| VmError::ProgramCounterOutOfRange { pc: at })
    }

    /// Moves into the frame prepared in `reg1`.
    fn enter(&mut self) {
        self.state.env = self.state.reg1;
        self.pc = self.entry;
        self.state.reg1 = Ptr::NIL;
        self.state.reg2 = Ptr::NIL;
    }

    // ── Call protocol ─────────────────────────────────────────────────

    /// Pops the closure on top of the stack and checks `argc` against its
    /// descriptor. Leaves the closure's environment in `reg1`, with the
    /// surplus arguments consed in front of it for a rest procedure, and
    /// returns how many arguments are left for [`VM::build_environment`].
    pub(crate) fn prepare_arguments(&mut self, argc: u8) -> Result<u8, VmError> {
        self.state.reg2 = self.tos()?;
        self.state.reg1 = self.heap.car(self.state.reg2);

        let closure = self.state.reg1;
        if !self.heap.in_ram(closure) {
            return Err(VmError::type_fault("closure", closure));
        }
        let (entry, env) = self.closure_parts(closure)?;
        let descriptor = self.code_byte(entry)?;
        self.entry = entry + 1;
        self.state.reg1 = env;

        if descriptor & 0x80 == 0 {
            if argc != descriptor {
                return Err(VmError::ArityFault {
                    expected: descriptor,
                    got: argc,
                    rest: false,
                });
            }
            self.state.reg2 = Ptr::NIL;
            return Ok(argc);
        }

        let fixed = !descriptor;
        if argc < fixed {
            return Err(VmError::ArityFault {
                expected: fixed,
                got: argc,
                rest: true,
            });
        }

        // the popped stack cells become the rest list
        self.state.reg3 = Ptr::NIL;
        for _ in fixed..argc {
            self.state.reg4 = self.tos()?;
            self.heap.set_cdr(self.state.reg4, self.state.reg3);
            self.state.reg3 = self.state.reg4;
        }
        let frame = self.state.reg2;
        self.heap.set_cdr(frame, self.state.reg1);
        self.heap.set_car(frame, self.state.reg3);
        self.state.reg1 = frame;
        self.state.reg2 = Ptr::NIL;
        self.state.reg3 = Ptr::NIL;
        self.state.reg4 = Ptr::NIL;
        Ok(fixed)
    }

    /// Moves `argc` stack cells onto the frame in `reg1`.
    pub(crate) fn build_environment(&mut self, argc: u8) -> Result<(), VmError> {
        for _ in 0..argc {
            self.state.reg2 = self.tos()?;
            self.heap.set_cdr(self.state.reg2, self.state.reg1);
            self.state.reg1 = self.state.reg2;
        }
        self.state.reg2 = Ptr::NIL;
        Ok(())
    }

    /// Frame for a top level procedure, which closes over nothing.
    fn prepare_direct(&mut self, target: usize) -> Result<(), VmError> {
        let descriptor = self.code_byte(target)?;
        if descriptor & 0x80 != 0 {
            return Err(VmError::bad_image(format!(
                "direct call to {target:#06x}, which takes rest arguments"
            )));
        }
        self.entry = target + 1;
        self.state.reg1 = Ptr::NIL;
        self.build_environment(descriptor)
    }

    /// Pushes a continuation that resumes at `pc` in the current frame.
    fn save_cont(&mut self) -> Result<(), VmError> {
        let resume = Self::code_address(self.pc)?;
        self.state.reg4 = self.new_closure(self.state.env, resume)?;
        self.state.cont = self.new_continuation(self.state.cont, self.state.reg4)?;
        self.state.reg4 = Ptr::NIL;
        Ok(())
    }

    /// Replaces the environment on top of the stack by a closure over it,
    /// reusing the stack cell.
    fn make_closure(&mut self, entry: usize) -> Result<(), VmError> {
        let entry = Self::code_address(entry)?;
        self.state.reg2 = self.tos()?;
        self.state.reg3 = self.heap.car(self.state.reg2);
        self.state.reg1 = self.new_closure(self.state.reg3, entry)?;

        let cell = self.state.reg2;
        self.heap.set_cdr(cell, self.state.env);
        self.heap.set_car(cell, self.state.reg1);
        self.state.env = cell;
        self.state.reg1 = Ptr::NIL;
        self.state.reg2 = Ptr::NIL;
        self.state.reg3 = Ptr::NIL;
        Ok(())
    }

    // ── Primitives ────────────────────────────────────────────────────

    fn call_primitive(&mut self, index: u8, pc: usize) -> Result<Step, VmError> {
        let prim = PRIMITIVES.get(index as usize).ok_or(VmError::UnknownOpcode {
            opcode: Op::Primitive as u8 | index,
            pc,
        })?;

        if prim.arity >= 3 {
            self.state.reg3 = self.pop()?;
        }
        if prim.arity >= 2 {
            self.state.reg2 = self.pop()?;
        }
        if prim.arity >= 1 {
            self.state.reg1 = self.pop()?;
        }

        let step = (prim.function)(self)?;
        if step == Step::Halt {
            return Ok(step);
        }
        if prim.pushes {
            let value = self.state.reg1;
            self.push(value)?;
        }
        self.state.reg1 = Ptr::NIL;
        self.state.reg2 = Ptr::NIL;
        self.state.reg3 = Ptr::NIL;
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferHost, HeapSettings, ImageBuilder, VmSettings};

    fn run(builder: ImageBuilder) -> (VM, Result<(), VmError>) {
        let settings = VmSettings {
            heap: HeapSettings {
                ram_cells: 500,
                vector_units: 64,
            },
            debug: true,
            trace: true,
        };
        let mut vm = VM::new(builder.finish(), settings, Box::new(BufferHost::default()))
            .expect("valid vm");
        let result = vm.run();
        (vm, result)
    }

    fn int(v: i32) -> Ptr {
        Ptr::small_int(v).expect("small")
    }

    #[test]
    fn load_stack_walks_the_environment() {
        let mut b = ImageBuilder::new(0);
        b.int(1);
        b.int(2);
        b.int(3);
        b.load_stack(2);
        b.load_stack(9);
        b.halt();
        let (vm, result) = run(b);

        assert_eq!(result, Ok(()));
        assert_eq!(vm.peek(0), Ptr::NIL, "past the bottom");
        assert_eq!(vm.peek(1), int(1));
        assert_eq!(vm.stack_depth(), 5);
    }

    #[test]
    fn globals_round_trip() {
        let mut b = ImageBuilder::new(20);
        b.int(7);
        b.store_global(3);
        b.int(9);
        b.store_global(19);
        b.load_global(19);
        b.load_global(3);
        b.halt();
        let (vm, result) = run(b);

        assert_eq!(result, Ok(()));
        assert_eq!(vm.peek(0), int(7));
        assert_eq!(vm.peek(1), int(9));
        assert_eq!(vm.heap.global(3), int(7));
    }

    #[test]
    fn branches_pop_their_condition() {
        let mut b = ImageBuilder::new(0);
        let skip = b.new_label();
        let end = b.new_label();
        b.constant(Ptr::FALSE);
        b.branch_short_if_false(skip);
        b.int(100);
        b.bind(skip);
        b.constant(Ptr::TRUE);
        b.branch_relative_if_false(end);
        b.int(5);
        b.branch(end);
        b.int(6);
        b.bind(end);
        b.halt();
        let (vm, result) = run(b);

        assert_eq!(result, Ok(()));
        assert_eq!(vm.stack_depth(), 1);
        assert_eq!(vm.peek(0), int(5));
    }

    #[test]
    fn closures_call_and_return() {
        // ((lambda (a b) (- a b)) 10 4)
        let mut b = ImageBuilder::new(0);
        let sub = b.new_label();
        b.int(10);
        b.int(4);
        b.constant(Ptr::NIL);
        b.closure(sub);
        b.call_closure(2);
        b.halt();
        b.entry(sub, 2);
        b.load_stack(0);
        b.load_stack(2);
        b.prim("#%-");
        b.prim("return");
        let (vm, result) = run(b);

        assert_eq!(result, Ok(()));
        assert_eq!(vm.peek(0), int(6));
        assert_eq!(vm.stack_depth(), 1);
        assert_eq!(vm.state.cont, Ptr::NIL);
    }

    #[test]
    fn rest_arguments_arrive_as_a_list() {
        // ((lambda (a . rest) rest) 1 2 3)
        let mut b = ImageBuilder::new(0);
        let proc = b.new_label();
        b.int(1);
        b.int(2);
        b.int(3);
        b.constant(Ptr::NIL);
        b.closure(proc);
        b.call_closure(3);
        b.halt();
        b.entry_rest(proc, 1);
        b.load_stack(1);
        b.prim("return");
        let (vm, result) = run(b);

        assert_eq!(result, Ok(()));
        let rest = vm.peek(0);
        assert_eq!(vm.heap.car(rest), int(2));
        assert_eq!(vm.heap.car(vm.heap.cdr(rest)), int(3));
        assert_eq!(vm.heap.cdr(vm.heap.cdr(rest)), Ptr::NIL);
    }

    #[test]
    fn top_level_calls_save_a_continuation() {
        let mut b = ImageBuilder::new(0);
        let double = b.new_label();
        b.int(21);
        b.call(double);
        b.halt();
        b.entry(double, 1);
        b.load_stack(0);
        b.load_stack(1);
        b.prim("#%+");
        b.prim("return");
        let (vm, result) = run(b);

        assert_eq!(result, Ok(()));
        assert_eq!(vm.peek(0), int(42));
    }

    #[test]
    fn tail_calls_reuse_the_continuation() {
        // a procedure that tail calls its helper with one argument
        let mut b = ImageBuilder::new(0);
        let outer = b.new_label();
        let helper = b.new_label();
        b.call_relative(outer);
        b.halt();
        b.entry(outer, 0);
        b.int(8);
        b.jump_relative(helper);
        b.entry(helper, 1);
        b.load_stack(0);
        b.prim("return");
        let (vm, result) = run(b);

        assert_eq!(result, Ok(()));
        assert_eq!(vm.peek(0), int(8));
        assert_eq!(vm.state.cont, Ptr::NIL);
    }

    #[test]
    fn arity_mismatch_is_a_fault() {
        // one short and one extra argument for a procedure of two
        for argc in [1u8, 3] {
            let mut b = ImageBuilder::new(0);
            let proc = b.new_label();
            for i in 0..argc {
                b.int(i as i64);
            }
            b.constant(Ptr::NIL);
            b.closure(proc);
            b.call_closure(argc);
            b.halt();
            b.entry(proc, 2);
            b.prim("return");
            let (vm, result) = run(b);
            assert_eq!(
                result,
                Err(VmError::ArityFault {
                    expected: 2,
                    got: argc,
                    rest: false
                })
            );
            assert_eq!(vm.state.cont, Ptr::NIL, "no frame was entered");
        }
    }

    #[test]
    fn calling_a_non_closure_is_a_type_fault() {
        let mut b = ImageBuilder::new(0);
        b.int(5);
        b.call_closure(0);
        let (_, result) = run(b);
        assert_eq!(result, Err(VmError::type_fault("closure", int(5))));
    }

    #[test]
    fn unknown_opcodes_and_running_off_the_end() {
        let mut b = ImageBuilder::new(0);
        b.byte(0xBC);
        let (vm, result) = run(b);
        assert_eq!(
            result,
            Err(VmError::UnknownOpcode {
                opcode: 0xBC,
                pc: vm.image.code_start()
            })
        );

        let mut b = ImageBuilder::new(0);
        b.int(1);
        let (vm, result) = run(b);
        assert_eq!(
            result,
            Err(VmError::ProgramCounterOutOfRange { pc: vm.image.len() })
        );

        let mut b = ImageBuilder::new(0);
        b.byte(0xC0 | 0x3F);
        let (_, result) = run(b);
        assert!(matches!(result, Err(VmError::UnknownOpcode { opcode: 0xFF, .. })));
    }
}
