//! The function-at-a-time compilation driver.
//!
//! A task takes one built function and runs peephole optimization, CFG
//! construction, scheduling, instruction selection, register allocation
//! and emission to completion on the calling thread. Functions of a module
//! are independent; the shared symbol table is the only synchronized
//! state, so a driver may fan tasks out across threads freely.

use tracing::{debug, info_span};

use riptide_ir::{Function, Linkage, Module, Op, Prototype, SymbolId, SymbolKind};
use riptide_opt::{optimize, schedule, Cfg, OptLevel};

use crate::emit::EmitCtx;
use crate::error::{CompileError, Diagnostic};
use crate::frame::FrameLayout;
use crate::isel::select_function;
use crate::liveness;
use crate::output::CompiledFunction;
use crate::regalloc;
use crate::target::{Target, TargetLatency};
use crate::tile::{PhysReg, RegClass};

/// Configuration the core recognizes; everything else is the driver's
/// business.
#[derive(Debug, Clone)]
pub struct Config {
    /// Keep a frame pointer (push/pop in the prologue/epilogue).
    pub frame_pointer: bool,
    /// How hard the optimizer works.
    pub opt_level: OptLevel,
    /// Populate the debug-location table.
    pub emit_debug_locations: bool,
    /// Name of the runtime TLS index symbol; required before any
    /// thread-local LOCAL can be lowered.
    pub tls_index_symbol: Option<String>,
    /// Stack frames above this many bytes call the probe helper.
    pub chkstk_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            frame_pointer: false,
            opt_level: OptLevel::Normal,
            emit_debug_locations: true,
            tls_index_symbol: None,
            chkstk_limit: 4096,
        }
    }
}

/// Compiles one function to bytes plus side tables.
pub fn compile_function<T: Target>(
    module: &Module,
    mut f: Function,
    target: &T,
    config: &Config,
) -> Result<CompiledFunction, CompileError> {
    let span = info_span!("compile", function = %f.name);
    let _enter = span.enter();

    optimize(&mut f, config.opt_level)?;
    let lat = TargetLatency(target);
    let mut sched = schedule(&f, Cfg::build(&f), &lat);

    if config.opt_level == OptLevel::Aggressive {
        // A second peephole round over whatever isel-level cleanup exposed,
        // then a fresh schedule before committing to tiles.
        optimize(&mut f, OptLevel::Normal)?;
        sched = schedule(&f, Cfg::build(&f), &lat);
    }

    let tls_index = resolve_tls(module, &f, config)?;
    let sel = select_function(&f, &sched, target, tls_index)?;

    let live = liveness::compute(&sel.list, &sched.cfg);
    let alloc = regalloc::allocate(target, &f, &sel.list, &sched.cfg, &live, &sel.classes);
    let list = regalloc::apply(target, &f, sel.list, &alloc);

    let gpr_saves = alloc
        .used_callee_saved
        .first()
        .copied()
        .unwrap_or(0);
    let saves: Vec<PhysReg> = (0..target.reg_count(RegClass(0)))
        .filter(|&r| gpr_saves & (1 << r) != 0)
        .map(PhysReg)
        .collect();
    let chkstk_sym = module_probe_symbol(module);
    let outgoing = list
        .tiles
        .iter()
        .flatten()
        .map(|tile| target.outgoing_bytes(tile))
        .max()
        .unwrap_or(0);
    let has_calls = f.live_ids().any(|n| f.op(n) == Op::Call);
    let frame = FrameLayout::compute(
        &f,
        alloc.spill_slots,
        target.spill_size(RegClass(0)),
        saves,
        config.frame_pointer,
        config.chkstk_limit,
        Some(chkstk_sym),
        outgoing,
        has_calls,
    );

    let mut ctx = EmitCtx::new(&frame, sched.cfg.blocks.len(), config.emit_debug_locations);
    target.emit_prologue(&mut ctx, &frame)?;
    let prologue_length = ctx.here();
    for (i, &b) in list.layout.iter().enumerate() {
        ctx.bind_label(b);
        ctx.next_block = list.layout.get(i + 1).copied();
        for tile in &list.tiles[b.index()] {
            target.emit(&mut ctx, tile)?;
        }
    }
    let epilogue_length = ctx.epilogue_length;
    let stack_slots = frame.stack_slots(&f);
    let (code, patches, locations) = ctx.finish();

    debug!(bytes = code.len(), patches = patches.len(), "emitted");
    Ok(CompiledFunction {
        code,
        patches,
        locations,
        stack_slots,
        prologue_length,
        epilogue_length,
        stack_usage: frame.stack_usage,
        section: f.section,
    })
}

/// Compiles every function, keeping the survivors and collecting one
/// diagnostic per failure. The module's symbol table ends up describing
/// exactly the functions that compiled.
pub fn compile_module<T: Target>(
    module: &Module,
    functions: Vec<Function>,
    target: &T,
    config: &Config,
) -> (Vec<CompiledFunction>, Vec<Diagnostic>) {
    let mut compiled = Vec::with_capacity(functions.len());
    let mut diagnostics = Vec::new();
    for f in functions {
        let name = f.name.clone();
        match compile_function(module, f, target, config) {
            Ok(out) => compiled.push(out),
            Err(err) => diagnostics.push(Diagnostic::from_error(&name, &err)),
        }
    }
    (compiled, diagnostics)
}

/// Looks up (or declares) the configured TLS index symbol; refuses TLS
/// locals without one.
fn resolve_tls(
    module: &Module,
    f: &Function,
    config: &Config,
) -> Result<Option<SymbolId>, CompileError> {
    let uses_tls = f
        .live_ids()
        .any(|n| f.op(n) == Op::Local && f.node(n).local_info().is_some_and(|i| i.tls));
    match (&config.tls_index_symbol, uses_tls) {
        (Some(name), _) => Ok(Some(module.declare(
            name,
            SymbolKind::Global {
                data: None,
                align: 8,
                tls: false,
            },
            Linkage::External,
        ))),
        (None, true) => Err(CompileError::Unsupported {
            target: "configuration",
            op: Op::Local,
            reason: "thread-local storage requires tls_index_symbol".to_owned(),
        }),
        (None, false) => Ok(None),
    }
}

fn module_probe_symbol(module: &Module) -> SymbolId {
    module.declare(
        "__chkstk",
        SymbolKind::Function(Prototype::default()),
        Linkage::External,
    )
}
