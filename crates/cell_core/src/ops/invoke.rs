use super::{execute_all, Op, Operation};
use crate::context::Context;
use crate::encoding::{write_refs, Decoder};
use crate::error::{CellError, Result};
use crate::fns;
use crate::juice;
use crate::reference::Ref;

/// Evaluates a function op and its argument ops left to right, then calls
/// the function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invoke {
    ops: Vec<Ref>,
}

impl Invoke {
    /// `ops[0]` yields the function; at least one op is required.
    pub fn new(ops: Vec<Ref>) -> Result<Self> {
        if ops.is_empty() {
            return Err(CellError::InvalidStructure(
                "invoke needs a function op".into(),
            ));
        }
        Ok(Self { ops })
    }

    pub fn ops(&self) -> &[Ref] {
        &self.ops
    }

    pub fn into_op(self) -> Op {
        Op::Invoke(self)
    }
}

impl Operation for Invoke {
    const OPCODE: u8 = 3;

    fn execute(&self, ctx: Context) -> Context {
        let ctx = ctx.consume_juice(juice::INVOKE);
        if ctx.is_exceptional() {
            return ctx;
        }
        let (ctx, values) = execute_all(ctx, &self.ops);
        if ctx.is_exceptional() {
            return ctx;
        }
        match values.split_first() {
            Some((f, args)) => fns::invoke(ctx, f, args),
            None => ctx,
        }
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
        Self::new(dec.read_refs()?).map_err(|e| CellError::format(e.to_string()))
    }
}
