use super::{Op, Operation};
use crate::cell::Cell;
use crate::context::Context;
use crate::encoding::Decoder;
use crate::error::Result;
use crate::juice;
use crate::reference::Ref;

/// Evaluates to a fixed value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constant {
    value: Ref,
}

impl Constant {
    pub fn new(value: Cell) -> Self {
        Self::of(Ref::new(value))
    }

    pub fn of(value: Ref) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Ref {
        &self.value
    }

    pub fn into_op(self) -> Op {
        Op::Constant(self)
    }
}

impl Operation for Constant {
    const OPCODE: u8 = 0;

    fn execute(&self, ctx: Context) -> Context {
        let ctx = ctx.consume_juice(juice::CONSTANT);
        if ctx.is_exceptional() {
            return ctx;
        }
        ctx.with_result(self.value.clone())
    }

    fn ref_count(&self) -> usize {
        1
    }

    fn get_ref(&self, i: usize) -> Option<&Ref> {
        (i == 0).then_some(&self.value)
    }

    fn update_refs(&self, f: &mut dyn FnMut(&Ref) -> Result<Ref>) -> Result<Self> {
        Ok(Self::of(f(&self.value)?))
    }

    fn write_raw(&self, out: &mut Vec<u8>) {
        self.value.write(out);
    }

    fn read_raw(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self::of(dec.read_ref()?))
    }
}
