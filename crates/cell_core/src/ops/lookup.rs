use super::{Op, Operation};
use crate::context::Context;
use crate::encoding::{write_bytes, Decoder};
use crate::error::{ErrorCode, Result};
use crate::juice;
use crate::reference::Ref;

/// Reads a symbol from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lookup {
    name: String,
}

impl Lookup {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_op(self) -> Op {
        Op::Lookup(self)
    }
}

impl Operation for Lookup {
    const OPCODE: u8 = 2;

    fn execute(&self, ctx: Context) -> Context {
        let ctx = ctx.consume_juice(juice::LOOKUP);
        if ctx.is_exceptional() {
            return ctx;
        }
        match ctx.lookup(&self.name) {
            Ok(Some(value)) => ctx.with_result(value),
            Ok(None) => {
                let msg = format!("undeclared symbol: {}", self.name);
                ctx.with_error(ErrorCode::Undeclared, msg)
            }
            Err(e) => ctx.with_cell_error(e),
        }
    }

    fn ref_count(&self) -> usize {
        0
    }

    fn get_ref(&self, _i: usize) -> Option<&Ref> {
        None
    }

    fn update_refs(&self, _f: &mut dyn FnMut(&Ref) -> Result<Ref>) -> Result<Self> {
        Ok(self.clone())
    }

    fn write_raw(&self, out: &mut Vec<u8>) {
        write_bytes(out, self.name.as_bytes());
    }

    fn read_raw(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self::new(dec.read_string()?))
    }
}
