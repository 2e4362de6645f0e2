//! Frontend-facing construction API.
//!
//! The builder owns the [`Function`] while IR is being created and keeps
//! two moving pieces of state: the current control point and the current
//! memory version. Every effectful instruction threads both; the frontend
//! is responsible for joining them with explicit PHIs at regions, exactly
//! as it is responsible for data PHIs.
//!
//! All shape checks happen here. Once a function leaves the builder, a
//! malformed graph is a compiler bug, not a user error.

use tracing::trace;

use crate::dt::DataType;
use crate::error::BuildError;
use crate::func::Function;
use crate::module::{Module, Prototype, SourceLoc, SymbolId};
use crate::node::{LocalInfo, MemOrder, NodeId, Payload};
use crate::op::Op;

/// Incremental builder for one function's graph.
#[derive(Debug)]
pub struct FunctionBuilder {
    f: Function,
    ctrl: Option<NodeId>,
    mem: Option<NodeId>,
    params: Vec<NodeId>,
}

type Result<T> = core::result::Result<T, BuildError>;

impl FunctionBuilder {
    /// Starts a function: materializes START and its control, memory and
    /// parameter projections, and opens the entry block.
    pub fn new(name: impl Into<String>, sym: SymbolId, proto: Prototype) -> Self {
        let mut f = Function::new(name, sym, proto.clone());
        let start = f.start;
        let ctrl = f.node_with_inputs(
            Op::Proj,
            DataType::Control,
            &[Some(start)],
            Payload::Proj(0),
        );
        let mem = f.node_with_inputs(
            Op::Proj,
            DataType::Memory,
            &[Some(start)],
            Payload::Proj(1),
        );
        let params = proto
            .params
            .iter()
            .enumerate()
            .map(|(i, &dt)| {
                f.node_with_inputs(Op::Proj, dt, &[Some(start)], Payload::Proj(2 + i as u32))
            })
            .collect();
        FunctionBuilder {
            f,
            ctrl: Some(ctrl),
            mem: Some(mem),
            params,
        }
    }

    /// Finishes construction and hands the graph to the pipeline.
    pub fn finish(self) -> Function {
        trace!(name = %self.f.name, nodes = self.f.node_count(), "built function");
        self.f
    }

    /// Read access to the graph mid-build (tests, dumps).
    pub fn func(&self) -> &Function {
        &self.f
    }

    /// The projection of parameter `i`.
    pub fn param(&self, i: usize) -> NodeId {
        self.params[i]
    }

    /// The current control insertion point.
    pub fn get_control(&self) -> Option<NodeId> {
        self.ctrl
    }

    /// Moves the insertion point (entering a region, usually).
    pub fn set_control(&mut self, ctrl: Option<NodeId>) {
        self.ctrl = ctrl;
    }

    /// The current memory version.
    pub fn get_memory(&self) -> Option<NodeId> {
        self.mem
    }

    /// Replaces the current memory version (after a memory PHI).
    pub fn set_memory(&mut self, mem: Option<NodeId>) {
        self.mem = mem;
    }

    fn ctrl_for(&self, op: Op) -> Result<NodeId> {
        self.ctrl.ok_or(BuildError::NoControl { op })
    }

    fn mem_for(&self, op: Op) -> Result<NodeId> {
        self.mem.ok_or(BuildError::NoControl { op })
    }

    // --- constants and addresses -----------------------------------------

    /// Signed integer constant of the given width.
    pub fn sint(&mut self, bits: u32, v: i64) -> Result<NodeId> {
        if !(1..=64).contains(&bits) {
            return Err(BuildError::BadWidth { bits });
        }
        let dt = DataType::Int(bits as u8);
        Ok(self
            .f
            .new_node(Op::IntConst, dt, 1, Payload::Int(dt.normalize(v))))
    }

    /// Unsigned integer constant of the given width.
    pub fn uint(&mut self, bits: u32, v: u64) -> Result<NodeId> {
        self.sint(bits, v as i64)
    }

    /// Boolean constant.
    pub fn bool_const(&mut self, v: bool) -> NodeId {
        self.f
            .new_node(Op::IntConst, DataType::BOOL, 1, Payload::Int(v as i64))
    }

    /// f32 constant.
    pub fn float32(&mut self, v: f32) -> NodeId {
        self.f
            .new_node(Op::FloatConst, DataType::F32, 1, Payload::F32(v.to_bits()))
    }

    /// f64 constant.
    pub fn float64(&mut self, v: f64) -> NodeId {
        self.f
            .new_node(Op::FloatConst, DataType::F64, 1, Payload::F64(v.to_bits()))
    }

    /// The null pointer.
    pub fn null_ptr(&mut self) -> NodeId {
        self.f.new_node(Op::IntConst, DataType::Ptr, 1, Payload::Int(0))
    }

    /// Address of a module symbol.
    pub fn symbol(&mut self, sym: SymbolId) -> NodeId {
        self.f
            .new_node(Op::Symbol, DataType::Ptr, 1, Payload::Symbol(sym))
    }

    /// Interns a NUL-terminated string in the module and takes its address.
    pub fn cstring(&mut self, module: &Module, s: &str) -> NodeId {
        let mut data = s.as_bytes().to_vec();
        data.push(0);
        let sym = module.declare_data(data, 1);
        self.symbol(sym)
    }

    /// A stack slot of `size` bytes aligned to `align`.
    pub fn local(&mut self, size: u32, align: u32, name: Option<&str>) -> NodeId {
        let start = self.f.start;
        self.f.node_with_inputs(
            Op::Local,
            DataType::Ptr,
            &[Some(start)],
            Payload::Local(LocalInfo {
                size,
                align,
                tls: false,
                name: name.map(Into::into),
            }),
        )
    }

    /// A slot in thread-local storage; lowering requires the target's TLS
    /// index symbol to be configured.
    pub fn tls_local(&mut self, size: u32, align: u32, name: Option<&str>) -> NodeId {
        let start = self.f.start;
        self.f.node_with_inputs(
            Op::Local,
            DataType::Ptr,
            &[Some(start)],
            Payload::Local(LocalInfo {
                size,
                align,
                tls: true,
                name: name.map(Into::into),
            }),
        )
    }

    // --- arithmetic ------------------------------------------------------

    /// Integer binary operation; both operands must share one int type.
    pub fn binop(&mut self, op: Op, a: NodeId, b: NodeId) -> Result<NodeId> {
        debug_assert!(op.is_int_binop());
        let (ta, tb) = (self.f.dt(a), self.f.dt(b));
        if ta != tb {
            return Err(BuildError::OperandMismatch { op, lhs: ta, rhs: tb });
        }
        if !ta.is_int() {
            return Err(BuildError::TypeMismatch {
                op,
                slot: 1,
                want: DataType::I64,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(op, ta, &[None, Some(a), Some(b)], Payload::None))
    }

    /// Float binary operation.
    pub fn fbinop(&mut self, op: Op, a: NodeId, b: NodeId) -> Result<NodeId> {
        debug_assert!(op.is_float_binop());
        let (ta, tb) = (self.f.dt(a), self.f.dt(b));
        if ta != tb {
            return Err(BuildError::OperandMismatch { op, lhs: ta, rhs: tb });
        }
        if !ta.is_float() {
            return Err(BuildError::TypeMismatch {
                op,
                slot: 1,
                want: DataType::F64,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(op, ta, &[None, Some(a), Some(b)], Payload::None))
    }

    /// Integer negation.
    pub fn neg(&mut self, a: NodeId) -> Result<NodeId> {
        self.unary(Op::Neg, a)
    }

    /// Bitwise complement.
    pub fn not(&mut self, a: NodeId) -> Result<NodeId> {
        self.unary(Op::Not, a)
    }

    fn unary(&mut self, op: Op, a: NodeId) -> Result<NodeId> {
        let ta = self.f.dt(a);
        if !ta.is_int() {
            return Err(BuildError::TypeMismatch {
                op,
                slot: 1,
                want: DataType::I64,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(op, ta, &[None, Some(a)], Payload::None))
    }

    /// Comparison producing a boolean; the operand type rides in the
    /// payload because the result type no longer shows it.
    pub fn cmp(&mut self, op: Op, a: NodeId, b: NodeId) -> Result<NodeId> {
        debug_assert!(op.is_cmp());
        let (ta, tb) = (self.f.dt(a), self.f.dt(b));
        if ta != tb {
            return Err(BuildError::OperandMismatch { op, lhs: ta, rhs: tb });
        }
        let float_cmp = matches!(op, Op::CmpFlt | Op::CmpFle);
        let ok = if float_cmp {
            ta.is_float()
        } else {
            ta.is_int() || ta == DataType::Ptr
        };
        if !ok {
            return Err(BuildError::TypeMismatch {
                op,
                slot: 1,
                want: if float_cmp { DataType::F64 } else { DataType::I64 },
                found: ta,
            });
        }
        Ok(self.f.node_with_inputs(
            op,
            DataType::BOOL,
            &[None, Some(a), Some(b)],
            Payload::Cmp(ta),
        ))
    }

    /// `cond ? a : b` as a data operation.
    pub fn select(&mut self, cond: NodeId, a: NodeId, b: NodeId) -> Result<NodeId> {
        let tc = self.f.dt(cond);
        if !tc.is_int() {
            return Err(BuildError::TypeMismatch {
                op: Op::Select,
                slot: 1,
                want: DataType::BOOL,
                found: tc,
            });
        }
        let (ta, tb) = (self.f.dt(a), self.f.dt(b));
        if ta != tb {
            return Err(BuildError::OperandMismatch {
                op: Op::Select,
                lhs: ta,
                rhs: tb,
            });
        }
        Ok(self.f.node_with_inputs(
            Op::Select,
            ta,
            &[None, Some(cond), Some(a), Some(b)],
            Payload::None,
        ))
    }

    // --- conversions -----------------------------------------------------

    /// Sign-extends to a wider integer type.
    pub fn sign_ext(&mut self, a: NodeId, to: DataType) -> Result<NodeId> {
        self.extend(Op::SignExt, a, to)
    }

    /// Zero-extends to a wider integer type.
    pub fn zero_ext(&mut self, a: NodeId, to: DataType) -> Result<NodeId> {
        self.extend(Op::ZeroExt, a, to)
    }

    fn extend(&mut self, op: Op, a: NodeId, to: DataType) -> Result<NodeId> {
        let ta = self.f.dt(a);
        if !ta.is_int() || !to.is_int() || to.bits() < ta.bits() {
            return Err(BuildError::TypeMismatch {
                op,
                slot: 1,
                want: to,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(op, to, &[None, Some(a)], Payload::None))
    }

    /// Truncates to a narrower integer type.
    pub fn truncate(&mut self, a: NodeId, to: DataType) -> Result<NodeId> {
        let ta = self.f.dt(a);
        if !ta.is_int() || !to.is_int() || to.bits() > ta.bits() {
            return Err(BuildError::TypeMismatch {
                op: Op::Truncate,
                slot: 1,
                want: to,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(Op::Truncate, to, &[None, Some(a)], Payload::None))
    }

    /// Reinterprets a 64-bit integer as a pointer.
    pub fn int2ptr(&mut self, a: NodeId) -> Result<NodeId> {
        let ta = self.f.dt(a);
        if ta != DataType::I64 {
            return Err(BuildError::TypeMismatch {
                op: Op::Int2Ptr,
                slot: 1,
                want: DataType::I64,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(Op::Int2Ptr, DataType::Ptr, &[None, Some(a)], Payload::None))
    }

    /// Reinterprets a pointer as a 64-bit integer.
    pub fn ptr2int(&mut self, a: NodeId) -> Result<NodeId> {
        let ta = self.f.dt(a);
        if ta != DataType::Ptr {
            return Err(BuildError::TypeMismatch {
                op: Op::Ptr2Int,
                slot: 1,
                want: DataType::Ptr,
                found: ta,
            });
        }
        Ok(self.f.node_with_inputs(
            Op::Ptr2Int,
            DataType::I64,
            &[None, Some(a)],
            Payload::None,
        ))
    }

    /// Signed integer to float.
    pub fn int2float(&mut self, a: NodeId, to: DataType) -> Result<NodeId> {
        let ta = self.f.dt(a);
        if !ta.is_int() || !to.is_float() {
            return Err(BuildError::TypeMismatch {
                op: Op::Int2Float,
                slot: 1,
                want: to,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(Op::Int2Float, to, &[None, Some(a)], Payload::None))
    }

    /// Float to signed integer.
    pub fn float2int(&mut self, a: NodeId, to: DataType) -> Result<NodeId> {
        let ta = self.f.dt(a);
        if !ta.is_float() || !to.is_int() {
            return Err(BuildError::TypeMismatch {
                op: Op::Float2Int,
                slot: 1,
                want: to,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(Op::Float2Int, to, &[None, Some(a)], Payload::None))
    }

    /// Bit-pattern cast between same-width types.
    pub fn bitcast(&mut self, a: NodeId, to: DataType) -> Result<NodeId> {
        let ta = self.f.dt(a);
        if ta.bits() != to.bits() || ta.bits() == 0 {
            return Err(BuildError::TypeMismatch {
                op: Op::Bitcast,
                slot: 1,
                want: to,
                found: ta,
            });
        }
        Ok(self
            .f
            .node_with_inputs(Op::Bitcast, to, &[None, Some(a)], Payload::None))
    }

    // --- addressing ------------------------------------------------------

    /// `base + offset` for a constant byte offset.
    pub fn member(&mut self, base: NodeId, offset: i64) -> Result<NodeId> {
        let tb = self.f.dt(base);
        if tb != DataType::Ptr {
            return Err(BuildError::TypeMismatch {
                op: Op::Member,
                slot: 1,
                want: DataType::Ptr,
                found: tb,
            });
        }
        Ok(self.f.node_with_inputs(
            Op::Member,
            DataType::Ptr,
            &[None, Some(base)],
            Payload::Member(offset),
        ))
    }

    /// `base + index * stride` for an element access.
    pub fn array(&mut self, base: NodeId, index: NodeId, stride: i64) -> Result<NodeId> {
        let tb = self.f.dt(base);
        if tb != DataType::Ptr {
            return Err(BuildError::TypeMismatch {
                op: Op::Array,
                slot: 1,
                want: DataType::Ptr,
                found: tb,
            });
        }
        let ti = self.f.dt(index);
        if !ti.is_int() {
            return Err(BuildError::TypeMismatch {
                op: Op::Array,
                slot: 2,
                want: DataType::I64,
                found: ti,
            });
        }
        Ok(self.f.node_with_inputs(
            Op::Array,
            DataType::Ptr,
            &[None, Some(base), Some(index)],
            Payload::Array(stride),
        ))
    }

    // --- memory ----------------------------------------------------------

    /// Loads a value of type `dt` from `addr`.
    pub fn load(&mut self, dt: DataType, addr: NodeId, align: u32) -> Result<NodeId> {
        let ctrl = self.ctrl_for(Op::Load)?;
        let mem = self.mem_for(Op::Load)?;
        self.expect_ptr(Op::Load, 2, addr)?;
        Ok(self.f.node_with_inputs(
            Op::Load,
            dt,
            &[Some(ctrl), Some(mem), Some(addr)],
            Payload::MemAccess(align),
        ))
    }

    /// Stores `value` to `addr`; advances the memory version.
    pub fn store(&mut self, addr: NodeId, value: NodeId, align: u32) -> Result<NodeId> {
        let ctrl = self.ctrl_for(Op::Store)?;
        let mem = self.mem_for(Op::Store)?;
        self.expect_ptr(Op::Store, 2, addr)?;
        let st = self.f.node_with_inputs(
            Op::Store,
            DataType::Memory,
            &[Some(ctrl), Some(mem), Some(addr), Some(value)],
            Payload::MemAccess(align),
        );
        self.mem = Some(st);
        Ok(st)
    }

    /// `memcpy(dst, src, count)`.
    pub fn memcpy(&mut self, dst: NodeId, src: NodeId, count: NodeId, align: u32) -> Result<NodeId> {
        let ctrl = self.ctrl_for(Op::Memcpy)?;
        let mem = self.mem_for(Op::Memcpy)?;
        self.expect_ptr(Op::Memcpy, 2, dst)?;
        self.expect_ptr(Op::Memcpy, 3, src)?;
        let n = self.f.node_with_inputs(
            Op::Memcpy,
            DataType::Memory,
            &[Some(ctrl), Some(mem), Some(dst), Some(src), Some(count)],
            Payload::MemAccess(align),
        );
        self.mem = Some(n);
        Ok(n)
    }

    /// `memset(dst, byte, count)`.
    pub fn memset(&mut self, dst: NodeId, byte: NodeId, count: NodeId, align: u32) -> Result<NodeId> {
        let ctrl = self.ctrl_for(Op::Memset)?;
        let mem = self.mem_for(Op::Memset)?;
        self.expect_ptr(Op::Memset, 2, dst)?;
        let n = self.f.node_with_inputs(
            Op::Memset,
            DataType::Memory,
            &[Some(ctrl), Some(mem), Some(dst), Some(byte), Some(count)],
            Payload::MemAccess(align),
        );
        self.mem = Some(n);
        Ok(n)
    }

    fn atomic(&mut self, op: Op, dt: DataType, rest: &[NodeId], order: MemOrder) -> Result<NodeId> {
        let ctrl = self.ctrl_for(op)?;
        let mem = self.mem_for(op)?;
        let mut inputs = vec![Some(ctrl), Some(mem)];
        inputs.extend(rest.iter().copied().map(Some));
        let node = self
            .f
            .node_with_inputs(op, DataType::Tuple, &inputs, Payload::Atomic(order));
        let new_mem =
            self.f
                .node_with_inputs(Op::Proj, DataType::Memory, &[Some(node)], Payload::Proj(0));
        let value =
            self.f
                .node_with_inputs(Op::Proj, dt, &[Some(node)], Payload::Proj(1));
        self.mem = Some(new_mem);
        Ok(value)
    }

    /// Atomic load; returns the loaded value.
    pub fn atomic_load(&mut self, dt: DataType, addr: NodeId, order: MemOrder) -> Result<NodeId> {
        self.expect_ptr(Op::AtomicLoad, 2, addr)?;
        self.atomic(Op::AtomicLoad, dt, &[addr], order)
    }

    /// Atomic read-modify-write; returns the previous value.
    pub fn atomic_rmw(
        &mut self,
        op: Op,
        addr: NodeId,
        operand: NodeId,
        order: MemOrder,
    ) -> Result<NodeId> {
        debug_assert!(op.is_atomic_rmw() && op != Op::AtomicCas);
        self.expect_ptr(op, 2, addr)?;
        let dt = self.f.dt(operand);
        self.atomic(op, dt, &[addr, operand], order)
    }

    /// Atomic compare-and-swap; returns the previous value (compare it to
    /// `expected` to learn whether the swap happened).
    pub fn atomic_cas(
        &mut self,
        addr: NodeId,
        expected: NodeId,
        desired: NodeId,
        order: MemOrder,
    ) -> Result<NodeId> {
        self.expect_ptr(Op::AtomicCas, 2, addr)?;
        let (te, td) = (self.f.dt(expected), self.f.dt(desired));
        if te != td {
            return Err(BuildError::OperandMismatch {
                op: Op::AtomicCas,
                lhs: te,
                rhs: td,
            });
        }
        self.atomic(Op::AtomicCas, te, &[addr, expected, desired], order)
    }

    // --- calls -----------------------------------------------------------

    /// Calls `target` (a symbol or pointer value); returns one projection
    /// per declared return value.
    pub fn call(&mut self, target: NodeId, proto: Prototype, args: &[NodeId]) -> Result<Vec<NodeId>> {
        let ctrl = self.ctrl_for(Op::Call)?;
        let mem = self.mem_for(Op::Call)?;
        if args.len() < proto.params.len() || (!proto.varargs && args.len() != proto.params.len()) {
            return Err(BuildError::CallArity {
                want: proto.params.len(),
                got: args.len(),
            });
        }
        for (i, (&arg, &want)) in args.iter().zip(&proto.params).enumerate() {
            let found = self.f.dt(arg);
            if found != want {
                return Err(BuildError::TypeMismatch {
                    op: Op::Call,
                    slot: 3 + i,
                    want,
                    found,
                });
            }
        }
        let mut inputs = vec![Some(ctrl), Some(mem), Some(target)];
        inputs.extend(args.iter().copied().map(Some));
        let returns = proto.returns.clone();
        let call = self.f.node_with_inputs(
            Op::Call,
            DataType::Tuple,
            &inputs,
            Payload::Call(Box::new(proto)),
        );
        let new_mem =
            self.f
                .node_with_inputs(Op::Proj, DataType::Memory, &[Some(call)], Payload::Proj(0));
        self.mem = Some(new_mem);
        Ok(returns
            .iter()
            .enumerate()
            .map(|(i, &dt)| {
                self.f
                    .node_with_inputs(Op::Proj, dt, &[Some(call)], Payload::Proj(1 + i as u32))
            })
            .collect())
    }

    // --- control flow ----------------------------------------------------

    /// A new, not-yet-entered join point.
    pub fn region(&mut self) -> NodeId {
        self.f
            .new_node(Op::Region, DataType::Control, 0, Payload::None)
    }

    /// Closes the current block with an unconditional jump into `region`;
    /// returns the predecessor index the edge occupies.
    pub fn goto(&mut self, region: NodeId) -> Result<usize> {
        let ctrl = self.ctrl_for(Op::Region)?;
        let slot = self.f.add_input(region, Some(ctrl));
        self.ctrl = None;
        Ok(slot)
    }

    /// Wires an existing control edge (a branch projection) into `region`.
    pub fn add_pred(&mut self, region: NodeId, pred: NodeId) -> usize {
        self.f.add_input(region, Some(pred))
    }

    /// Moves the insertion point into `region`.
    pub fn enter_region(&mut self, region: NodeId) {
        self.ctrl = Some(region);
    }

    /// An SSA join at `region`: one value per predecessor, in predecessor
    /// order.
    pub fn phi(&mut self, region: NodeId, values: &[NodeId]) -> Result<NodeId> {
        let want = self.f.inputs(region).len();
        if values.len() != want {
            return Err(BuildError::PhiArity {
                region,
                want,
                got: values.len(),
            });
        }
        let dt = self.f.dt(values[0]);
        for (i, &v) in values.iter().enumerate() {
            let found = self.f.dt(v);
            if found != dt {
                return Err(BuildError::TypeMismatch {
                    op: Op::Phi,
                    slot: 1 + i,
                    want: dt,
                    found,
                });
            }
        }
        let mut inputs = vec![Some(region)];
        inputs.extend(values.iter().copied().map(Some));
        Ok(self.f.node_with_inputs(Op::Phi, dt, &inputs, Payload::None))
    }

    /// Multi-way branch on `key`: edge `i` fires when `key == keys[i]`,
    /// the final projection is the default edge. Returns the projections
    /// in that order; wire them with [`FunctionBuilder::add_pred`].
    pub fn branch_keys(&mut self, key: NodeId, keys: &[i64]) -> Result<Vec<NodeId>> {
        let ctrl = self.ctrl_for(Op::Branch)?;
        let tk = self.f.dt(key);
        if !tk.is_int() {
            return Err(BuildError::TypeMismatch {
                op: Op::Branch,
                slot: 1,
                want: DataType::I64,
                found: tk,
            });
        }
        let br = self.f.node_with_inputs(
            Op::Branch,
            DataType::Tuple,
            &[Some(ctrl), Some(key)],
            Payload::Branch(keys.into()),
        );
        self.ctrl = None;
        Ok((0..=keys.len())
            .map(|i| {
                self.f.node_with_inputs(
                    Op::Proj,
                    DataType::Control,
                    &[Some(br)],
                    Payload::Proj(i as u32),
                )
            })
            .collect())
    }

    /// Keyed branch straight into its targets: jumps to `cases[i].1` when
    /// `key == cases[i].0`, otherwise to `default`. Targets are regions.
    pub fn branch(
        &mut self,
        key: NodeId,
        default: NodeId,
        cases: &[(i64, NodeId)],
    ) -> Result<()> {
        let keys: Vec<i64> = cases.iter().map(|&(k, _)| k).collect();
        let projs = self.branch_keys(key, &keys)?;
        for (proj, &(_, target)) in projs.iter().zip(cases) {
            self.f.add_input(target, Some(*proj));
        }
        self.f.add_input(default, Some(projs[cases.len()]));
        Ok(())
    }

    /// Two-way conditional; returns `(taken_if_nonzero, taken_if_zero)`.
    pub fn cond_branch(&mut self, cond: NodeId) -> Result<(NodeId, NodeId)> {
        let projs = self.branch_keys(cond, &[0])?;
        Ok((projs[1], projs[0]))
    }

    /// Terminates the current block returning `values`.
    pub fn ret(&mut self, values: &[NodeId]) -> Result<NodeId> {
        let ctrl = self.ctrl_for(Op::Return)?;
        let mem = self.mem_for(Op::Return)?;
        let want = self.f.proto.returns.clone();
        if values.len() != want.len() {
            return Err(BuildError::ReturnArity {
                want: want.len(),
                got: values.len(),
            });
        }
        for (i, (&v, &dt)) in values.iter().zip(&want).enumerate() {
            let found = self.f.dt(v);
            if found != dt {
                return Err(BuildError::ReturnMismatch {
                    slot: i,
                    want: dt,
                    found,
                });
            }
        }
        let mut inputs = vec![Some(ctrl), Some(mem)];
        inputs.extend(values.iter().copied().map(Some));
        let ret = self
            .f
            .node_with_inputs(Op::Return, DataType::Void, &inputs, Payload::None);
        self.f.returns.push(ret);
        self.ctrl = None;
        Ok(ret)
    }

    /// Pins a source location into the control chain for debug info.
    pub fn safepoint(&mut self, loc: SourceLoc) -> Result<NodeId> {
        let ctrl = self.ctrl_for(Op::Safepoint)?;
        let sp = self.f.node_with_inputs(
            Op::Safepoint,
            DataType::Control,
            &[Some(ctrl)],
            Payload::Safepoint(loc),
        );
        self.ctrl = Some(sp);
        Ok(sp)
    }

    fn expect_ptr(&self, op: Op, slot: usize, n: NodeId) -> Result<()> {
        let found = self.f.dt(n);
        if found != DataType::Ptr {
            return Err(BuildError::TypeMismatch {
                op,
                slot,
                want: DataType::Ptr,
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
