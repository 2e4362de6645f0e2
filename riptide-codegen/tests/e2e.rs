//! Whole-pipeline tests: builder IR in, x86-64 bytes out.
//!
//! Assertions target instruction patterns, not exact byte images — the
//! allocator is free to pick registers as long as the shape is right.

use riptide_codegen::{compile_function, compile_module, Config, DiagnosticKind, X64};
use riptide_ir::{
    DataType, Function, FunctionBuilder, Linkage, Module, Op, Prototype, SymbolId, SymbolKind,
};

fn proto(params: &[DataType], returns: &[DataType]) -> Prototype {
    Prototype {
        params: params.to_vec(),
        returns: returns.to_vec(),
        ..Prototype::default()
    }
}

fn builder(params: &[DataType], returns: &[DataType]) -> FunctionBuilder {
    FunctionBuilder::new("t", SymbolId(0), proto(params, returns))
}

fn compile(f: Function) -> Vec<u8> {
    let module = Module::new();
    compile_function(&module, f, &X64, &Config::default())
        .expect("compilation failed")
        .code
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// `return (cond ? 2 : 2) + 3` folds to `mov eax, 5; ret`.
#[test]
fn diamond_constant_folds_to_a_single_move() {
    let mut b = builder(&[DataType::I32], &[DataType::I32]);
    let (t, e) = b.cond_branch(b.param(0)).unwrap();
    let merge = b.region();
    b.set_control(Some(t));
    let two_a = b.sint(32, 2).unwrap();
    b.goto(merge).unwrap();
    b.set_control(Some(e));
    let two_b = b.sint(32, 2).unwrap();
    b.goto(merge).unwrap();
    b.enter_region(merge);
    let phi = b.phi(merge, &[two_a, two_b]).unwrap();
    let three = b.sint(32, 3).unwrap();
    let sum = b.binop(Op::Add, phi, three).unwrap();
    b.ret(&[sum]).unwrap();

    let code = compile(b.finish());
    assert_eq!(code, vec![0xb8, 5, 0, 0, 0, 0xc3], "mov eax, 5; ret");
}

/// `return x * 8` comes out as a shift, not a multiply.
#[test]
fn strength_reduced_multiply_emits_a_shift() {
    let mut b = builder(&[DataType::I32], &[DataType::I32]);
    let eight = b.sint(32, 8).unwrap();
    let prod = b.binop(Op::Mul, b.param(0), eight).unwrap();
    b.ret(&[prod]).unwrap();

    let code = compile(b.finish());
    // shl r32, 3 is c1 /4 ib: modrm 0xe0..=0xe7.
    let has_shl = code
        .windows(3)
        .any(|w| w[0] == 0xc1 && (0xe0..=0xe7).contains(&w[1]) && w[2] == 3);
    assert!(has_shl, "expected shl by 3 in {code:02x?}");
    assert!(
        !contains(&code, &[0x0f, 0xaf]),
        "imul survived strength reduction"
    );
    assert_eq!(code.last(), Some(&0xc3));
}

/// `return a[i + 1]` (4-byte elements) folds base, scaled index and
/// displacement into one memory operand.
#[test]
fn address_computation_folds_into_the_load() {
    let mut b = builder(&[DataType::Ptr, DataType::I64], &[DataType::I32]);
    let one = b.sint(64, 1).unwrap();
    let idx = b.binop(Op::Add, b.param(1), one).unwrap();
    let addr = b.array(b.param(0), idx, 4).unwrap();
    let val = b.load(DataType::I32, addr, 4).unwrap();
    b.ret(&[val]).unwrap();

    let code = compile(b.finish());
    // One mov with a SIB byte carrying scale=4 and disp8 == 4.
    let folded = code.windows(4).any(|w| {
        w[0] == 0x8b && w[1] & 0xc7 == 0x44 && w[2] >> 6 == 2 && w[3] == 4
    });
    assert!(folded, "no [base + index*4 + 4] operand in {code:02x?}");
    // The add must be gone entirely.
    assert!(
        !code.windows(2).any(|w| w[0] == 0x83 && w[1] & 0xf8 == 0xc0),
        "index increment was not folded: {code:02x?}"
    );
}

/// A store into a local nothing reads disappears, leaving only the
/// return sequence.
#[test]
fn dead_store_emits_no_store_instruction() {
    let mut b = builder(&[], &[DataType::I32]);
    let slot = b.local(4, 4, Some("x"));
    let v = b.sint(32, 42).unwrap();
    b.store(slot, v, 4).unwrap();
    let zero = b.sint(32, 0).unwrap();
    b.ret(&[zero]).unwrap();

    let code = compile(b.finish());
    assert_eq!(code, vec![0xb8, 0, 0, 0, 0, 0xc3], "mov eax, 0; ret");
}

/// The counted-loop accumulator: the loop phi survives, the body add
/// stays inside the loop, and the backedge carries no redundant moves.
#[test]
fn loop_accumulator_compiles_with_a_backward_branch() {
    // for (i = 0; i < n; ++i) sum += a[i]; return sum;
    let mut b = builder(&[DataType::Ptr, DataType::I64], &[DataType::I32]);
    let zero64 = b.sint(64, 0).unwrap();
    let zero32 = b.sint(32, 0).unwrap();
    let one = b.sint(64, 1).unwrap();

    let header = b.region();
    b.goto(header).unwrap();
    b.enter_region(header);
    let i = b.phi(header, &[zero64]).unwrap();
    let sum = b.phi(header, &[zero32]).unwrap();
    let mem_in = b.get_memory().unwrap();
    let mem_phi = b.phi(header, &[mem_in]).unwrap();
    b.set_memory(Some(mem_phi));

    let cond = b.cmp(Op::CmpSlt, i, b.param(1)).unwrap();
    let (body_edge, exit_edge) = b.cond_branch(cond).unwrap();

    let body = b.region();
    b.add_pred(body, body_edge);
    b.enter_region(body);
    let addr = b.array(b.param(0), i, 4).unwrap();
    let elt = b.load(DataType::I32, addr, 4).unwrap();
    let sum2 = b.binop(Op::Add, sum, elt).unwrap();
    let i2 = b.binop(Op::Add, i, one).unwrap();
    b.goto(header).unwrap();

    let exit = b.region();
    b.add_pred(exit, exit_edge);
    b.enter_region(exit);
    b.ret(&[sum]).unwrap();

    let mut f = b.finish();
    f.add_input(i, Some(i2));
    f.add_input(sum, Some(sum2));
    f.add_input(mem_phi, Some(mem_phi_backedge(&f, body)));

    let code = compile(f);
    // Some jump must go backward: a rel32 with its sign bit set.
    let backward = code.windows(5).any(|w| {
        (w[0] == 0xe9 || (w[0] == 0x0f && (0x80..=0x8f).contains(&w[1])))
            && w[w.len() - 1] & 0x80 != 0
    });
    assert!(backward, "no backedge in {code:02x?}");
    assert_eq!(code.last(), Some(&0xc3));
}

/// The loop body produces no new memory version here (pure loads), so the
/// backedge re-uses the header's memory phi input.
fn mem_phi_backedge(f: &Function, _body: riptide_ir::NodeId) -> riptide_ir::NodeId {
    // The phi's own output value: loads do not advance memory.
    f.live_ids()
        .find(|&n| f.op(n) == Op::Phi && f.dt(n) == DataType::Memory)
        .expect("memory phi")
}

/// `if (x < y)` fuses into a cmp/jcc pair with no setcc materialized.
#[test]
fn compare_branch_fusion_yields_cmp_jl() {
    let mut b = builder(&[DataType::I32, DataType::I32], &[DataType::I32]);
    let cond = b.cmp(Op::CmpSlt, b.param(0), b.param(1)).unwrap();
    let (t, e) = b.cond_branch(cond).unwrap();

    let (then_r, else_r) = (b.region(), b.region());
    b.add_pred(then_r, t);
    b.add_pred(else_r, e);
    b.enter_region(then_r);
    let one = b.sint(32, 1).unwrap();
    b.ret(&[one]).unwrap();
    b.enter_region(else_r);
    let two = b.sint(32, 2).unwrap();
    b.ret(&[two]).unwrap();

    let code = compile(b.finish());
    // cmp r, r (39 /r) immediately followed by jl rel32 (0f 8c).
    let fused = code
        .windows(4)
        .any(|w| w[0] == 0x39 && w[2] == 0x0f && w[3] == 0x8c);
    assert!(fused, "no cmp/jl pair in {code:02x?}");
    assert!(
        !code.windows(2).any(|w| w[0] == 0x0f && w[1] == 0x9c),
        "setl materialized despite fusion: {code:02x?}"
    );
}

#[test]
fn frame_pointer_config_shapes_the_prologue() {
    let mut b = builder(&[], &[]);
    b.ret(&[]).unwrap();
    let module = Module::new();
    let cfg = Config {
        frame_pointer: true,
        ..Config::default()
    };
    let out = compile_function(&module, b.finish(), &X64, &cfg).unwrap();
    assert_eq!(&out.code[..4], &[0x55, 0x48, 0x89, 0xe5], "push rbp; mov rbp, rsp");
    assert!(out.prologue_length >= 4);
    assert_eq!(out.code.last(), Some(&0xc3));
}

#[test]
fn calls_produce_patches_and_respect_the_abi() {
    let module = Module::new();
    let callee = module.declare(
        "callee",
        SymbolKind::Function(proto(&[DataType::I32], &[DataType::I32])),
        Linkage::External,
    );
    let mut b = builder(&[DataType::I32], &[DataType::I32]);
    let target = b.symbol(callee);
    let rets = b
        .call(target, proto(&[DataType::I32], &[DataType::I32]), &[b.param(0)])
        .unwrap();
    b.ret(&[rets[0]]).unwrap();

    let out = compile_function(&module, b.finish(), &X64, &Config::default()).unwrap();
    assert!(
        out.patches.iter().any(|p| p.target == callee),
        "call site must patch against the callee"
    );
    assert!(contains(&out.code, &[0xe8]), "no call instruction");
}

#[test]
fn tls_without_index_symbol_is_rejected_per_function() {
    let module = Module::new();

    let mut good = builder(&[], &[DataType::I32]);
    let zero = good.sint(32, 0).unwrap();
    good.ret(&[zero]).unwrap();

    let mut bad = FunctionBuilder::new("uses_tls", SymbolId(1), proto(&[], &[DataType::I32]));
    let slot = bad.tls_local(4, 4, Some("counter"));
    let v = bad.load(DataType::I32, slot, 4).unwrap();
    bad.ret(&[v]).unwrap();

    let (compiled, diags) = compile_module(
        &module,
        vec![good.finish(), bad.finish()],
        &X64,
        &Config::default(),
    );
    assert_eq!(compiled.len(), 1, "the healthy function still compiles");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagnosticKind::UnsupportedTarget);
    assert_eq!(diags[0].function, "uses_tls");
}

#[test]
fn debug_locations_follow_safepoints() {
    let mut b = builder(&[], &[DataType::I32]);
    b.safepoint(riptide_ir::SourceLoc {
        file: 1,
        line: 7,
        column: 3,
    })
    .unwrap();
    let zero = b.sint(32, 0).unwrap();
    b.ret(&[zero]).unwrap();

    let module = Module::new();
    let out = compile_function(&module, b.finish(), &X64, &Config::default()).unwrap();
    assert_eq!(out.locations.len(), 1);
    assert_eq!(out.locations[0].loc.line, 7);

    let mut b2 = builder(&[], &[DataType::I32]);
    b2.safepoint(riptide_ir::SourceLoc {
        file: 1,
        line: 7,
        column: 3,
    })
    .unwrap();
    let zero = b2.sint(32, 0).unwrap();
    b2.ret(&[zero]).unwrap();
    let cfg = Config {
        emit_debug_locations: false,
        ..Config::default()
    };
    let out = compile_function(&module, b2.finish(), &X64, &cfg).unwrap();
    assert!(out.locations.is_empty());
}

#[test]
fn division_lowers_through_fixed_registers() {
    let mut b = builder(&[DataType::I32, DataType::I32], &[DataType::I32]);
    let q = b.binop(Op::Sdiv, b.param(0), b.param(1)).unwrap();
    b.ret(&[q]).unwrap();

    let code = compile(b.finish());
    // cdq (99) followed eventually by idiv (f7 /7: modrm 0xf8..0xff).
    assert!(contains(&code, &[0x99]), "no sign extension in {code:02x?}");
    let has_idiv = code
        .windows(2)
        .any(|w| w[0] == 0xf7 && (0xf8..=0xff).contains(&w[1]));
    assert!(has_idiv, "no idiv in {code:02x?}");
}

#[test]
fn float_arithmetic_uses_sse_tiles() {
    let mut b = builder(&[DataType::F64, DataType::F64], &[DataType::F64]);
    let s = b.fbinop(Op::Fadd, b.param(0), b.param(1)).unwrap();
    b.ret(&[s]).unwrap();

    let code = compile(b.finish());
    assert!(
        code.windows(3)
            .any(|w| w[0] == 0xf2 && w[1] == 0x0f && w[2] == 0x58),
        "no addsd in {code:02x?}"
    );
}

#[test]
fn memcpy_lowers_to_rep_movsb() {
    let mut b = builder(&[DataType::Ptr, DataType::Ptr, DataType::I64], &[]);
    b.memcpy(b.param(0), b.param(1), b.param(2), 1).unwrap();
    b.ret(&[]).unwrap();

    let code = compile(b.finish());
    assert!(contains(&code, &[0xf3, 0xa4]), "no rep movsb in {code:02x?}");
}
