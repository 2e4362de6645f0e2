//! Textual dump of a function's graph, for logs and test failures.
//!
//! The format is one node per line in id order, with the payload inlined
//! where it carries the interesting part of the node:
//!
//! ```text
//! fn square(i32) -> i32 {
//!   v0 = start tuple
//!   v1 = proj ctrl v0 [0]
//!   ...
//! }
//! ```

use core::fmt;

use crate::func::Function;
use crate::node::{NodeId, Payload};

struct DumpNode<'a> {
    f: &'a Function,
    n: NodeId,
}

impl fmt::Display for DumpNode<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.f.node(self.n);
        write!(out, "  {} = {} {}", self.n, node.op, node.dt)?;
        for input in node.inputs() {
            match input {
                Some(v) => write!(out, " {v}")?,
                None => out.write_str(" _")?,
            }
        }
        match &node.payload {
            Payload::None => {}
            Payload::Int(v) => write!(out, " #{v}")?,
            Payload::F32(bits) => write!(out, " #{}", f32::from_bits(*bits))?,
            Payload::F64(bits) => write!(out, " #{}", f64::from_bits(*bits))?,
            Payload::Symbol(s) => write!(out, " sym{}", s.0)?,
            Payload::Local(info) => {
                write!(out, " size={} align={}", info.size, info.align)?;
                if let Some(name) = &info.name {
                    write!(out, " \"{name}\"")?;
                }
            }
            Payload::Proj(i) => write!(out, " [{i}]")?,
            Payload::Cmp(dt) => write!(out, " over {dt}")?,
            Payload::Branch(keys) => write!(out, " keys={keys:?}")?,
            Payload::Member(off) => write!(out, " +{off}")?,
            Payload::Array(stride) => write!(out, " *{stride}")?,
            Payload::MemAccess(align) => write!(out, " align={align}")?,
            Payload::Atomic(order) => write!(out, " {order:?}")?,
            Payload::Call(proto) => write!(out, " args={}", proto.params.len())?,
            Payload::Safepoint(loc) => write!(out, " @{}:{}", loc.line, loc.column)?,
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(out, "fn {}(", self.name)?;
        for (i, dt) in self.proto.params.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            write!(out, "{dt}")?;
        }
        out.write_str(")")?;
        if !self.proto.returns.is_empty() {
            out.write_str(" -> ")?;
            for (i, dt) in self.proto.returns.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write!(out, "{dt}")?;
            }
        }
        out.write_str(" {\n")?;
        for n in self.live_ids() {
            writeln!(out, "{}", DumpNode { f: self, n })?;
        }
        out.write_str("}\n")
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::FunctionBuilder;
    use crate::dt::DataType;
    use crate::module::{Prototype, SymbolId};
    use crate::op::Op;

    #[test]
    fn dump_is_stable_and_complete() {
        let mut b = FunctionBuilder::new(
            "square",
            SymbolId(0),
            Prototype {
                params: vec![DataType::I32],
                returns: vec![DataType::I32],
                ..Prototype::default()
            },
        );
        let sq = b.binop(Op::Mul, b.param(0), b.param(0)).unwrap();
        b.ret(&[sq]).unwrap();
        let f = b.finish();

        let text = f.to_string();
        assert!(text.starts_with("fn square(i32) -> i32 {\n"));
        assert!(text.contains("= start tuple"));
        assert!(text.contains("= mul i32"));
        assert!(text.contains("= return void"));
        // One line per live node plus the braces.
        assert_eq!(text.lines().count(), f.live_ids().count() + 2);
    }
}
