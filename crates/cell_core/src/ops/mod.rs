//! Operation nodes.
//!
//! Each op is an immutable cell (tag `0xC0 | opcode`) that turns one
//! [`Context`] into the next. Every op charges its own juice before doing
//! anything else and stops at the first exceptional sub-result.

mod cond;
mod constant;
mod def;
mod do_op;
mod invoke;
mod lookup;

pub use cond::Cond;
pub use constant::Constant;
pub use def::Def;
pub use do_op::Do;
pub use invoke::Invoke;
pub use lookup::Lookup;

use crate::context::Context;
use crate::encoding::Decoder;
use crate::error::{CellError, Result};
use crate::reference::Ref;
use std::fmt;

/// Behaviour shared by every op variant.
pub trait Operation: Sized {
    const OPCODE: u8;

    fn execute(&self, ctx: Context) -> Context;

    fn ref_count(&self) -> usize;

    fn get_ref(&self, i: usize) -> Option<&Ref>;

    fn update_refs(&self, f: &mut dyn FnMut(&Ref) -> Result<Ref>) -> Result<Self>;

    /// Body after the tag byte.
    fn write_raw(&self, out: &mut Vec<u8>);

    fn read_raw(dec: &mut Decoder<'_>) -> Result<Self>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Constant(Constant),
    Def(Def),
    Lookup(Lookup),
    Invoke(Invoke),
    Do(Do),
    Cond(Cond),
}

macro_rules! dispatch {
    ($op:expr, $inner:ident => $body:expr) => {
        match $op {
            Op::Constant($inner) => $body,
            Op::Def($inner) => $body,
            Op::Lookup($inner) => $body,
            Op::Invoke($inner) => $body,
            Op::Do($inner) => $body,
            Op::Cond($inner) => $body,
        }
    };
}

impl Op {
    pub fn opcode(&self) -> u8 {
        match self {
            Op::Constant(_) => Constant::OPCODE,
            Op::Def(_) => Def::OPCODE,
            Op::Lookup(_) => Lookup::OPCODE,
            Op::Invoke(_) => Invoke::OPCODE,
            Op::Do(_) => Do::OPCODE,
            Op::Cond(_) => Cond::OPCODE,
        }
    }

    pub fn execute(&self, ctx: Context) -> Context {
        dispatch!(self, op => op.execute(ctx))
    }

    pub fn ref_count(&self) -> usize {
        dispatch!(self, op => op.ref_count())
    }

    pub fn get_ref(&self, i: usize) -> Result<&Ref> {
        let found = dispatch!(self, op => op.get_ref(i));
        found.ok_or_else(|| CellError::bad_index(i, self.ref_count()))
    }

    pub fn update_refs(&self, f: &mut dyn FnMut(&Ref) -> Result<Ref>) -> Result<Op> {
        Ok(match self {
            Op::Constant(op) => Op::Constant(op.update_refs(f)?),
            Op::Def(op) => Op::Def(op.update_refs(f)?),
            Op::Lookup(op) => Op::Lookup(op.update_refs(f)?),
            Op::Invoke(op) => Op::Invoke(op.update_refs(f)?),
            Op::Do(op) => Op::Do(op.update_refs(f)?),
            Op::Cond(op) => Op::Cond(op.update_refs(f)?),
        })
    }

    pub fn write_raw(&self, out: &mut Vec<u8>) {
        dispatch!(self, op => op.write_raw(out))
    }

    pub fn read(opcode: u8, dec: &mut Decoder<'_>) -> Result<Op> {
        Ok(match opcode {
            Constant::OPCODE => Op::Constant(Constant::read_raw(dec)?),
            Def::OPCODE => Op::Def(Def::read_raw(dec)?),
            Lookup::OPCODE => Op::Lookup(Lookup::read_raw(dec)?),
            Invoke::OPCODE => Op::Invoke(Invoke::read_raw(dec)?),
            Do::OPCODE => Op::Do(Do::read_raw(dec)?),
            Cond::OPCODE => Op::Cond(Cond::read_raw(dec)?),
            other => return Err(CellError::format(format!("unknown opcode {other}"))),
        })
    }

    /// This op as a ref, ready to be nested in another op.
    pub fn into_ref(self) -> Ref {
        Ref::new(self.into())
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Constant(op) => write!(f, "(quote {})", op.value()),
            Op::Def(op) => write!(f, "(def {} {})", op.symbol(), op.op()),
            Op::Lookup(op) => f.write_str(op.name()),
            Op::Invoke(op) => write_form(f, None, op.ops()),
            Op::Do(op) => write_form(f, Some("do"), op.ops()),
            Op::Cond(op) => write_form(f, Some("cond"), op.ops()),
        }
    }
}

fn write_form(f: &mut fmt::Formatter<'_>, head: Option<&str>, refs: &[Ref]) -> fmt::Result {
    f.write_str("(")?;
    let mut first = true;
    if let Some(head) = head {
        f.write_str(head)?;
        first = false;
    }
    for r in refs {
        if !first {
            f.write_str(" ")?;
        }
        first = false;
        write!(f, "{r}")?;
    }
    f.write_str(")")
}

/// Run each op in turn, stopping at the first exception. On success the
/// context result is the last op's result, nil when `ops` is empty.
pub(crate) fn execute_all(mut ctx: Context, ops: &[Ref]) -> (Context, Vec<Ref>) {
    let mut results = Vec::with_capacity(ops.len());
    for op in ops {
        ctx = ctx.execute(op);
        match ctx.result() {
            Some(r) => results.push(r.clone()),
            None => break,
        }
    }
    (ctx, results)
}
