use std::rc::Rc;

use symvm::prelude::*;
use symvm::program::{BinOp, Intrinsic, Operand, TypeDesc};
use symvm::store::ICmpOp;

fn check<S: SymStore>(module: Module, ctx: CtxRef) -> Verdict {
    let mut reachability: Reachability<S> =
        Reachability::new(Rc::new(module), ctx).expect("driver construction");
    reachability.run().expect("search")
}

fn check_smt(module: Module) -> Verdict {
    check::<SmtStore>(module, Context::with_defaults())
}

#[test]
fn trivial_program_is_safe() {
    let mut m = ModuleBuilder::new();
    let main = m.declare("main");
    let mut f = FunctionBuilder::new();
    f.ret(Some(Operand::imm(0, 32)));
    m.define(main, f);

    match check_smt(m.finish()) {
        Verdict::Safe { states } => assert!(states <= 2, "explored {states} states"),
        err => panic!("expected Safe, got {err:?}"),
    }
}

/// `x = nondet(); assume(x > 0); assert(x > 0);`
#[test]
fn assumed_assertion_holds() {
    let mut m = ModuleBuilder::new();
    let main = m.declare("main");
    let mut f = FunctionBuilder::new();
    let x = f.reg(8);
    let assumed = f.reg(1);
    let checked = f.reg(1);
    f.call_intrinsic(Some(x), Intrinsic::Input { bw: 8 }, vec![]);
    f.icmp(ICmpOp::Sgt, assumed, Operand::Reg(x), Operand::imm(0, 8));
    f.call_intrinsic(None, Intrinsic::Assume, vec![Operand::Reg(assumed)]);
    f.icmp(ICmpOp::Sgt, checked, Operand::Reg(x), Operand::imm(0, 8));
    f.call_intrinsic(None, Intrinsic::Assert, vec![Operand::Reg(checked)]);
    f.ret(None);
    m.define(main, f);

    assert!(matches!(check_smt(m.finish()), Verdict::Safe { .. }));
}

/// `x = nondet(); assert(x > 0);` — the failure path carries `x <= 0`.
#[test]
fn unguarded_assertion_fails() {
    let mut m = ModuleBuilder::new();
    let main = m.declare("main");
    let mut f = FunctionBuilder::new();
    let x = f.reg(8);
    let checked = f.reg(1);
    f.call_intrinsic(Some(x), Intrinsic::Input { bw: 8 }, vec![]);
    f.icmp(ICmpOp::Sgt, checked, Operand::Reg(x), Operand::imm(0, 8));
    f.call_intrinsic(None, Intrinsic::Assert, vec![Operand::Reg(checked)]);
    f.ret(None);
    m.define(main, f);

    match check_smt(m.finish()) {
        Verdict::ErrorReached { state, .. } => {
            assert!(state.contains("Error state"));
            assert!(state.contains("<="), "path condition missing x <= 0: {state}");
        }
        other => panic!("expected an error, got {other:?}"),
    }
}

/// Thread A spins while `glob == 0`; thread B sets `glob = 1`. The loop
/// states repeat, so subsumption closes the space.
#[test]
fn racing_read_terminates_safe() {
    let mut m = ModuleBuilder::new();
    let glob = m.global_scalar("glob", 32, 0);
    let main = m.declare("main");
    let worker = m.declare("worker");

    let mut w = FunctionBuilder::new();
    w.store(Operand::imm(1, 32), Operand::Global(glob));
    w.ret(None);
    m.define(worker, w);

    let mut f = FunctionBuilder::new();
    let handle = f.ptr_reg();
    let seen = f.reg(32);
    let again = f.reg(1);
    let spin = f.block();
    let done = f.block();
    f.alloca(handle, TypeDesc::Scalar(64));
    f.call_intrinsic(
        None,
        Intrinsic::ThreadCreate,
        vec![
            Operand::Reg(handle),
            Operand::Null,
            Operand::Fun(worker),
            Operand::Null,
        ],
    );
    f.br(spin);
    f.select_block(spin);
    f.load(seen, Operand::Global(glob));
    f.icmp(ICmpOp::Eq, again, Operand::Reg(seen), Operand::imm(0, 32));
    f.cond_br(Operand::Reg(again), spin, done);
    f.select_block(done);
    f.ret(None);
    m.define(main, f);

    match check_smt(m.finish()) {
        Verdict::Safe { states } => assert!(states > 2),
        other => panic!("expected Safe, got {other:?}"),
    }
}

/// Two threads increment a shared counter under a mutex; the final count is
/// between 1 and 2.
#[test]
fn mutex_exclusion_is_safe() {
    let mut m = ModuleBuilder::new();
    let mutex = m.global_scalar("m", 32, 0);
    let counter = m.global_scalar("counter", 32, 0);
    let main = m.declare("main");
    let worker = m.declare("worker");

    let mut w = FunctionBuilder::new();
    let seen = w.reg(32);
    let bumped = w.reg(32);
    w.call_intrinsic(None, Intrinsic::MutexLock, vec![Operand::Global(mutex)]);
    w.load(seen, Operand::Global(counter));
    w.binary(BinOp::Add, bumped, Operand::Reg(seen), Operand::imm(1, 32));
    w.store(Operand::Reg(bumped), Operand::Global(counter));
    w.call_intrinsic(None, Intrinsic::MutexUnlock, vec![Operand::Global(mutex)]);
    w.ret(None);
    m.define(worker, w);

    let mut f = FunctionBuilder::new();
    let h1 = f.ptr_reg();
    let h2 = f.ptr_reg();
    let t1 = f.reg(64);
    let t2 = f.reg(64);
    let total = f.reg(32);
    let lower = f.reg(1);
    let upper = f.reg(1);
    f.alloca(h1, TypeDesc::Scalar(64));
    f.alloca(h2, TypeDesc::Scalar(64));
    for (handle, _) in [(h1, t1), (h2, t2)] {
        f.call_intrinsic(
            None,
            Intrinsic::ThreadCreate,
            vec![
                Operand::Reg(handle),
                Operand::Null,
                Operand::Fun(worker),
                Operand::Null,
            ],
        );
    }
    for (handle, tid) in [(h1, t1), (h2, t2)] {
        f.load(tid, Operand::Reg(handle));
        f.call_intrinsic(None, Intrinsic::ThreadJoin, vec![Operand::Reg(tid)]);
    }
    f.load(total, Operand::Global(counter));
    f.icmp(ICmpOp::Uge, lower, Operand::Reg(total), Operand::imm(1, 32));
    f.call_intrinsic(None, Intrinsic::Assert, vec![Operand::Reg(lower)]);
    f.icmp(ICmpOp::Ule, upper, Operand::Reg(total), Operand::imm(2, 32));
    f.call_intrinsic(None, Intrinsic::Assert, vec![Operand::Reg(upper)]);
    f.ret(None);
    m.define(main, f);

    assert!(matches!(check_smt(m.finish()), Verdict::Safe { .. }));
}

/// The partitioned store agrees with the monolithic one on a symbolic
/// scenario.
#[test]
fn partial_store_agrees_on_assumed_assertion() {
    let build = || {
        let mut m = ModuleBuilder::new();
        let main = m.declare("main");
        let mut f = FunctionBuilder::new();
        let x = f.reg(8);
        let ok = f.reg(1);
        f.call_intrinsic(Some(x), Intrinsic::Input { bw: 8 }, vec![]);
        f.icmp(ICmpOp::Ult, ok, Operand::Reg(x), Operand::imm(100, 8));
        f.call_intrinsic(None, Intrinsic::Assume, vec![Operand::Reg(ok)]);
        f.ret(None);
        m.define(main, f);
        m.finish()
    };

    let monolithic = check::<SmtStore>(build(), Context::with_defaults());
    let partitioned = check::<PartialStore>(build(), Context::with_defaults());
    assert!(matches!(monolithic, Verdict::Safe { .. }));
    assert!(matches!(partitioned, Verdict::Safe { .. }));
}

/// Function calls push and pop whole stack frames; returned values land in
/// the caller's destination register.
#[test]
fn call_return_writes_back() {
    let mut m = ModuleBuilder::new();
    let main = m.declare("main");
    let double = m.declare("double");

    let mut g = FunctionBuilder::new();
    let n = g.param(8);
    let out = g.reg(8);
    g.binary(BinOp::Add, out, Operand::Reg(n), Operand::Reg(n));
    g.ret(Some(Operand::Reg(out)));
    m.define(double, g);

    let mut f = FunctionBuilder::new();
    let got = f.reg(8);
    let ok = f.reg(1);
    f.call_fun(Some(got), double, vec![Operand::imm(21, 8)]);
    f.icmp(ICmpOp::Eq, ok, Operand::Reg(got), Operand::imm(42, 8));
    f.call_intrinsic(None, Intrinsic::Assert, vec![Operand::Reg(ok)]);
    f.ret(None);
    m.define(main, f);

    assert!(matches!(check_smt(m.finish()), Verdict::Safe { .. }));
}
