use std::rc::Rc;

use symvm::prelude::*;
use symvm::program::Operand;

/// Büchi automaton for the negation of `G(req -> F ack)`, i.e.
/// `F(req && G !ack)`: q0 loops on true, jumps to accepting q1 on
/// `req && !ack`, and q1 loops on `!ack`.
fn negated_response_ba(aps: &ApTable) -> BuchiAutomaton {
    let mut ba = BuchiAutomaton::new();
    let q0 = ba.add_state(false);
    let q1 = ba.add_state(true);
    ba.set_init(q0);
    ba.add_edge(q0, q0, aps.translate("1").unwrap());
    ba.add_edge(q0, q1, aps.translate("req && !ack").unwrap());
    ba.add_edge(q1, q1, aps.translate("!ack").unwrap());
    ba
}

fn flag_table() -> ApTable {
    let mut aps = ApTable::new();
    aps.declare_global_nonzero("req", 0, 32);
    aps.declare_global_nonzero("ack", 1, 32);
    aps
}

/// Raises `req`, never `ack`, and spins forever.
fn request_without_ack() -> Module {
    let mut m = ModuleBuilder::new();
    let req = m.global_scalar("req", 32, 0);
    let _ack = m.global_scalar("ack", 32, 0);
    let main = m.declare("main");

    let mut f = FunctionBuilder::new();
    let spin = f.block();
    f.store(Operand::imm(1, 32), Operand::Global(req));
    f.br(spin);
    f.select_block(spin);
    f.br(spin);
    m.define(main, f);
    m.finish()
}

/// Raises `req` and `ack` together, then spins.
fn request_with_ack() -> Module {
    let mut m = ModuleBuilder::new();
    let req = m.global_scalar("req", 32, 0);
    let ack = m.global_scalar("ack", 32, 0);
    let main = m.declare("main");

    let mut f = FunctionBuilder::new();
    let spin = f.block();
    f.store(Operand::imm(1, 32), Operand::Global(req));
    f.store(Operand::imm(1, 32), Operand::Global(ack));
    f.br(spin);
    f.select_block(spin);
    f.br(spin);
    m.define(main, f);
    m.finish()
}

fn run_ltl(module: Module, iterative: bool) -> LtlVerdict {
    let aps = flag_table();
    let ba = negated_response_ba(&aps);
    let mut ltl: Ltl<SmtStore> = Ltl::new(Rc::new(module), ba, Context::with_defaults(), iterative)
        .expect("driver construction");
    ltl.run().expect("search")
}

#[test]
fn liveness_violation_is_a_cycle() {
    match run_ltl(request_without_ack(), false) {
        LtlVerdict::CycleFound { .. } => {}
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn iterative_deepening_finds_the_same_cycle() {
    assert!(matches!(
        run_ltl(request_without_ack(), true),
        LtlVerdict::CycleFound { .. }
    ));
}

#[test]
fn acknowledged_request_holds() {
    match run_ltl(request_with_ack(), false) {
        LtlVerdict::Holds { states } => assert!(states >= 1),
        other => panic!("expected the property to hold, got {other:?}"),
    }
}
