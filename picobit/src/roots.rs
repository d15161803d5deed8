use std::ops::{Deref, DerefMut};

use crate::{Ptr, VM};

/// A block of GC roots on the VM's temp stack.
///
/// The slots start out as `()` and are released when the scope is dropped.
/// Scopes nest: a function holding a scope can pass `&mut scope` on as a
/// `&mut VM` and the callee opens its own scope above it.
pub struct RootScope<'vm> {
    vm: &'vm mut VM,
    base: usize,
    len: usize,
}

impl VM {
    #[inline]
    pub fn scope(&mut self, slots: usize) -> RootScope<'_> {
        let base = self.state.temps.len();
        self.state.temps.resize(base + slots, Ptr::NIL);
        RootScope {
            vm: self,
            base,
            len: slots,
        }
    }
}

impl RootScope<'_> {
    #[inline(always)]
    pub fn get(&self, slot: usize) -> Ptr {
        debug_assert!(slot < self.len, "root slot {slot} out of range");
        self.vm.state.temps[self.base + slot]
    }

    #[inline(always)]
    pub fn set(&mut self, slot: usize, value: Ptr) {
        debug_assert!(slot < self.len, "root slot {slot} out of range");
        self.vm.state.temps[self.base + slot] = value;
    }
}

impl Deref for RootScope<'_> {
    type Target = VM;

    fn deref(&self) -> &VM {
        self.vm
    }
}

impl DerefMut for RootScope<'_> {
    fn deref_mut(&mut self) -> &mut VM {
        self.vm
    }
}

impl Drop for RootScope<'_> {
    fn drop(&mut self) {
        debug_assert!(
            self.vm.state.temps.len() >= self.base + self.len,
            "root scopes dropped out of order"
        );
        self.vm.state.temps.truncate(self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferHost, HeapSettings, ImageBuilder, VmSettings};

    fn mk_vm() -> VM {
        let settings = VmSettings {
            heap: HeapSettings {
                ram_cells: 40,
                vector_units: 8,
            },
            ..Default::default()
        };
        VM::new(
            ImageBuilder::new(0).finish(),
            settings,
            Box::new(BufferHost::default()),
        )
        .expect("valid vm")
    }

    fn nested(vm: &mut VM) -> usize {
        let mut inner = vm.scope(2);
        inner.set(1, Ptr::TRUE);
        inner.state.temps.len()
    }

    #[test]
    fn scopes_nest_and_unwind() {
        let mut vm = mk_vm();
        {
            let mut outer = vm.scope(3);
            outer.set(0, Ptr::POS1);
            assert_eq!(nested(&mut outer), 5);
            assert_eq!(outer.state.temps.len(), 3);
            assert_eq!(outer.get(0), Ptr::POS1);
            assert_eq!(outer.get(2), Ptr::NIL);
        }
        assert!(vm.state.temps.is_empty());
    }

    #[test]
    fn scoped_values_survive_collection() {
        let mut vm = mk_vm();
        let mut scope = vm.scope(1);
        let p = scope.new_pair(Ptr::POS1, Ptr::NIL).expect("room");
        scope.set(0, p);
        let garbage = scope.new_pair(Ptr::ZERO, Ptr::NIL).expect("room");

        scope.gc().expect("healthy heap");
        assert_eq!(scope.heap.stats().last_marked, 1);
        assert_eq!(scope.heap.car(p), Ptr::POS1);
        let reused = scope.alloc_cell().expect("room");
        assert_eq!(reused, garbage, "the unrooted pair was reclaimed first");
    }
}
