use super::{execute_all, Op, Operation};
use crate::context::Context;
use crate::encoding::{write_refs, Decoder};
use crate::error::Result;
use crate::juice;
use crate::reference::Ref;

/// Evaluates ops in order; the result is the last one's, or nil.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Do {
    ops: Vec<Ref>,
}

impl Do {
    pub fn new(ops: Vec<Ref>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[Ref] {
        &self.ops
    }

    pub fn into_op(self) -> Op {
        Op::Do(self)
    }
}

impl Operation for Do {
    const OPCODE: u8 = 4;

    fn execute(&self, ctx: Context) -> Context {
        let ctx = ctx.consume_juice(juice::DO);
        if ctx.is_exceptional() {
            return ctx;
        }
        let ctx = ctx.with_result(Ref::nil());
        execute_all(ctx, &self.ops).0
    }

    fn ref_count(&self) -> usize {
        self.ops.len()
    }

    fn get_ref(&self, i: usize) -> Option<&Ref> {
        self.ops.get(i)
    }

    fn update_refs(&self, f: &mut dyn FnMut(&Ref) -> Result<Ref>) -> Result<Self> {
        let ops = self.ops.iter().map(|r| f(r)).collect::<Result<_>>()?;
        Ok(Self { ops })
    }

    fn write_raw(&self, out: &mut Vec<u8>) {
        write_refs(out, self.ops.iter());
    }

    fn read_raw(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self::new(dec.read_refs()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::error::ErrorCode;
    use crate::ops::{Constant, Def, Lookup};
    use crate::store::MemStore;
    use std::sync::Arc;

    fn ctx() -> Context {
        Context::new(Arc::new(MemStore::new()), 1_000)
    }

    #[test]
    fn empty_do_is_nil() {
        let ctx = ctx().execute(&Do::new(vec![]).into_op().into_ref());
        assert_eq!(ctx.result().unwrap().value().unwrap().as_ref(), &Cell::Nil);
        assert_eq!(ctx.juice_used(), juice::DO);
    }

    #[test]
    fn later_ops_see_earlier_definitions() {
        let op = Do::new(vec![
            Def::new("a", Constant::new(Cell::Long(5)).into_op())
                .into_op()
                .into_ref(),
            Lookup::new("a").into_op().into_ref(),
        ]);
        let ctx = ctx().execute(&op.into_op().into_ref());
        assert_eq!(ctx.result().unwrap().value().unwrap().as_long(), Some(5));
        assert_eq!(ctx.juice_used(), juice::DO + juice::DEF + juice::LOOKUP);
    }

    #[test]
    fn stops_after_exception() {
        let op = Do::new(vec![
            Lookup::new("missing").into_op().into_ref(),
            Def::new("b", Constant::new(Cell::Long(1)).into_op())
                .into_op()
                .into_ref(),
        ]);
        let ctx = ctx().execute(&op.into_op().into_ref());
        assert_eq!(ctx.exception().unwrap().code, ErrorCode::Undeclared);
        assert!(ctx.env().is_empty());
    }
}
