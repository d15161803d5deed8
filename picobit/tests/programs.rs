use picobit::{
    BufferHost, CellKind, HeapSettings, Image, ImageBuilder, Ptr, Transcript, VM,
    VmError, VmSettings,
};

fn settings(ram_cells: usize) -> VmSettings {
    VmSettings {
        heap: HeapSettings {
            ram_cells,
            vector_units: 128,
        },
        debug: true,
        trace: false,
    }
}

fn run_with(image: Image, ram_cells: usize) -> (VM, Transcript, Result<(), VmError>) {
    let host = BufferHost::default();
    let transcript = host.transcript();
    let mut vm = VM::new(image, settings(ram_cells), Box::new(host)).expect("valid vm");
    let result = vm.run();
    (vm, transcript, result)
}

fn run(image: Image) -> (VM, Transcript, Result<(), VmError>) {
    run_with(image, 1000)
}

fn output(transcript: &Transcript) -> String {
    String::from_utf8(transcript.lock().clone()).expect("ascii output")
}

fn int(v: i32) -> Ptr {
    Ptr::small_int(v).expect("small")
}

#[test]
fn cons_two_small_integers() {
    let mut b = ImageBuilder::new(0);
    b.int(1);
    b.int(2);
    b.prim("cons");
    b.prim("print");
    b.halt();
    let (vm, transcript, result) = run(b.finish());

    assert_eq!(result, Ok(()));
    assert_eq!(output(&transcript), "(1 . 2)\n");
    assert_eq!(vm.stack_depth(), 0, "print pushes nothing");
}

#[test]
fn build_and_print_a_list() {
    // (print (cons 1 (cons 2 (cons 3 '()))))
    let mut b = ImageBuilder::new(0);
    b.int(1);
    b.int(2);
    b.int(3);
    b.constant(Ptr::NIL);
    b.prim("cons");
    b.prim("cons");
    b.prim("cons");
    b.prim("print");
    b.halt();
    let (_, transcript, result) = run(b.finish());

    assert_eq!(result, Ok(()));
    assert_eq!(output(&transcript), "(1 2 3)\n");
}

#[test]
fn encode_1000_is_a_one_cell_bignum() {
    let mut vm = VM::new(
        ImageBuilder::new(0).finish(),
        settings(100),
        Box::new(BufferHost::default()),
    )
    .expect("valid vm");
    let p = vm.encode_int(1000).expect("room");
    assert_eq!(
        vm.heap.cell(p).map(|c| c.kind()),
        Some(CellKind::Bignum {
            next: Ptr::ZERO,
            digit: 1000
        })
    );
    assert_eq!(vm.decode_int(p), Ok(1000));
}

#[test]
fn five_thousand_pairs_then_collect() {
    // keep the last pair of a long chain of garbage
    let mut b = ImageBuilder::new(2);
    let top = b.new_label();
    let done = b.new_label();
    b.int(5000);
    b.store_global(0);
    b.bind(top);
    b.load_global(0);
    b.constant(Ptr::ZERO);
    b.prim("=");
    b.branch_relative_if_false(done);
    b.halt();
    b.bind(done);
    b.load_global(0);
    b.constant(Ptr::NIL);
    b.prim("cons");
    b.store_global(1);
    b.load_global(0);
    b.int(1);
    b.prim("#%-");
    b.store_global(0);
    b.branch(top);
    let (mut vm, _, result) = run_with(b.finish(), 600);

    assert_eq!(result, Ok(()));
    assert!(vm.heap.stats().collections > 0, "5000 pairs do not fit in 600 cells");
    let last = vm.heap.global(1);
    assert_eq!(vm.heap.car(last), Ptr::POS1);

    vm.gc().expect("healthy heap");
    assert_eq!(vm.heap.stats().last_marked, 1, "only the last pair is live");
    assert_eq!(vm.heap.free_count(), vm.heap.capacity() - 1);
}

#[test]
fn unreachable_chain_frees_the_whole_heap() {
    let mut vm = VM::new(
        ImageBuilder::new(0).finish(),
        settings(6000),
        Box::new(BufferHost::default()),
    )
    .expect("valid vm");
    for i in 0..5000 {
        vm.state.env = vm.new_pair(int(i % 256), vm.state.env).expect("room");
    }
    assert_eq!(vm.heap.stats().collections, 0);

    vm.state.env = Ptr::NIL;
    vm.gc().expect("healthy heap");
    assert_eq!(vm.heap.stats().last_marked, 0);
    assert_eq!(vm.heap.free_count(), vm.heap.capacity());
}

#[test]
fn vector_of_seven_set_ref_and_overrun() {
    let mut b = ImageBuilder::new(2);
    b.int(7);
    b.prim("#%make-u8vector");
    b.store_global(0);
    // (u8vector-set! v 6 99)
    b.load_global(0);
    b.int(6);
    b.int(99);
    b.prim("u8vector-set!");
    // (print (u8vector-ref v 6))
    b.load_global(0);
    b.int(6);
    b.prim("u8vector-ref");
    b.prim("print");
    b.load_global(0);
    b.prim("u8vector-length");
    b.prim("print");
    b.load_global(0);
    b.prim("print");
    // (u8vector-ref v 7)
    b.load_global(0);
    b.int(7);
    b.prim("u8vector-ref");
    b.halt();
    let (_, transcript, result) = run(b.finish());

    assert_eq!(output(&transcript), "99\n7\n#<vector 7>\n");
    assert_eq!(
        result,
        Err(VmError::VectorIndexOutOfRange {
            index: 7,
            length: 7
        })
    );
}

#[test]
fn car_of_a_number_faults() {
    let mut b = ImageBuilder::new(0);
    b.int(3);
    b.prim("car");
    b.halt();
    let (_, _, result) = run(b.finish());
    assert_eq!(result, Err(VmError::type_fault("pair", int(3))));
}

#[test]
fn too_few_arguments_to_a_rest_procedure() {
    let mut b = ImageBuilder::new(0);
    let proc = b.new_label();
    b.int(1);
    b.constant(Ptr::NIL);
    b.closure(proc);
    b.call_closure(1);
    b.halt();
    b.entry_rest(proc, 2);
    b.prim("return");
    let (_, _, result) = run(b.finish());
    assert_eq!(
        result,
        Err(VmError::ArityFault {
            expected: 2,
            got: 1,
            rest: true
        })
    );
}

#[test]
fn extra_arguments_need_a_rest_parameter() {
    // ((lambda (a . r) r) 1 2 3) then ((lambda (a) a) 1 2)
    let mut b = ImageBuilder::new(0);
    let rest = b.new_label();
    let fixed = b.new_label();
    b.int(1);
    b.int(2);
    b.int(3);
    b.constant(Ptr::NIL);
    b.closure(rest);
    b.call_closure(3);
    b.prim("print");
    b.int(1);
    b.int(2);
    b.constant(Ptr::NIL);
    b.closure(fixed);
    b.call_closure(2);
    b.halt();

    b.entry_rest(rest, 1);
    // frame: (a r)
    b.load_stack(1);
    b.prim("return");

    b.entry(fixed, 1);
    b.load_stack(0);
    b.prim("return");
    let (_, transcript, result) = run(b.finish());

    assert_eq!(output(&transcript), "(2 3)\n");
    assert_eq!(
        result,
        Err(VmError::ArityFault {
            expected: 1,
            got: 2,
            rest: false
        })
    );
}

#[test]
fn closures_capture_their_environment() {
    // (define (adder n) (lambda (x) (+ x n)))
    // (print ((adder 5) 37))
    let mut b = ImageBuilder::new(0);
    let adder = b.new_label();
    let add_n = b.new_label();
    b.int(37);
    b.int(5);
    b.call(adder);
    b.call_closure(1);
    b.prim("print");
    b.halt();

    b.entry(adder, 1);
    // the environment to close over is the current frame, (n)
    b.load_stack(0);
    b.constant(Ptr::NIL);
    b.prim("cons");
    b.closure(add_n);
    b.prim("return");

    b.entry(add_n, 1);
    // frame: (x n)
    b.load_stack(0);
    b.load_stack(2);
    b.prim("#%+");
    b.prim("return");
    let (_, transcript, result) = run(b.finish());

    assert_eq!(result, Ok(()));
    assert_eq!(output(&transcript), "42\n");
}

#[test]
fn escaping_through_a_captured_continuation() {
    // (print (+ 1 (call/cc (lambda (k) (return-to-cont k 41)))))
    // with call/cc taking the continuation of its caller
    let mut b = ImageBuilder::new(0);
    let callcc = b.new_label();
    b.int(1);
    b.call(callcc);
    b.prim("#%+");
    b.prim("print");
    b.halt();

    b.entry(callcc, 0);
    b.prim("get-cont");
    b.int(41);
    b.prim("return-to-cont");
    b.int(1000);
    b.prim("print");
    b.halt();
    let (_, transcript, result) = run(b.finish());

    assert_eq!(result, Ok(()));
    assert_eq!(output(&transcript), "42\n");
}

#[test]
fn grafting_a_thunk_onto_a_continuation() {
    let mut b = ImageBuilder::new(0);
    let capture = b.new_label();
    let thunk = b.new_label();
    b.call(capture);
    b.prim("print");
    b.halt();

    b.entry(capture, 0);
    b.prim("get-cont");
    b.constant(Ptr::NIL);
    b.closure(thunk);
    b.prim("graft-to-cont");

    b.entry(thunk, 0);
    b.int(7);
    b.prim("return");
    let (_, transcript, result) = run(b.finish());

    assert_eq!(result, Ok(()));
    assert_eq!(output(&transcript), "7\n");
}

#[test]
fn bignum_arithmetic_from_rom_constants() {
    let mut b = ImageBuilder::new(0);
    b.int(4_000_000_000);
    b.int(3_000_000_000);
    b.prim("#%+");
    b.prim("print");
    b.int(-70_000);
    b.int(3);
    b.prim("#%mul-non-neg");
    b.halt();
    let (_, transcript, result) = run(b.finish());

    assert_eq!(output(&transcript), "7000000000\n");
    assert!(
        matches!(
            result,
            Err(VmError::TypeFault {
                expected: "non-negative integer",
                ..
            })
        ),
        "got {result:?}"
    );
}
