use super::{Op, Operation};
use crate::context::Context;
use crate::encoding::{write_refs, Decoder};
use crate::error::Result;
use crate::juice;
use crate::reference::Ref;

/// `(cond test1 expr1 test2 expr2 ... default?)`.
///
/// Tests run in order until one is truthy; only that branch is evaluated.
/// A trailing odd op is the default. No match and no default gives nil.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cond {
    ops: Vec<Ref>,
}

impl Cond {
    pub fn new(ops: Vec<Ref>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[Ref] {
        &self.ops
    }

    pub fn into_op(self) -> Op {
        Op::Cond(self)
    }
}

impl Operation for Cond {
    const OPCODE: u8 = 5;

    fn execute(&self, ctx: Context) -> Context {
        let mut ctx = ctx.consume_juice(juice::COND);
        if ctx.is_exceptional() {
            return ctx;
        }
        let mut pairs = self.ops.chunks_exact(2);
        for pair in pairs.by_ref() {
            ctx = ctx.execute(&pair[0]);
            let Some(test) = ctx.result().cloned() else {
                return ctx;
            };
            let truthy = match ctx.resolve(&test) {
                Ok(cell) => cell.is_truthy(),
                Err(e) => return ctx.with_cell_error(e),
            };
            if truthy {
                return ctx.execute(&pair[1]);
            }
        }
        match pairs.remainder() {
            [default] => ctx.execute(default),
            _ => ctx.with_result(Ref::nil()),
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
        Ok(Self::new(dec.read_refs()?))
    }
}
