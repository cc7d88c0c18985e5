use super::{Op, Operation};
use crate::cell::{Cell, CellMap, Syntax};
use crate::context::Context;
use crate::encoding::Decoder;
use crate::error::{CellError, ErrorCode, Result};
use crate::juice;
use crate::reference::Ref;

/// Evaluates an op and binds its result to a symbol.
///
/// The symbol travels as a syntax cell so that metadata attached to the
/// definition ends up on the binding. The binding and the result appear
/// together or not at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Def {
    symbol: Ref,
    op: Ref,
}

impl Def {
    pub fn new(name: impl Into<String>, op: Op) -> Self {
        Self::with_meta(name, CellMap::new(), op)
    }

    pub fn with_meta(name: impl Into<String>, meta: CellMap, op: Op) -> Self {
        let symbol = Cell::Syntax(Syntax::new(Ref::new(Cell::Symbol(name.into())), meta));
        Self {
            symbol: Ref::new(symbol),
            op: op.into_ref(),
        }
    }

    pub fn symbol(&self) -> &Ref {
        &self.symbol
    }

    pub fn op(&self) -> &Ref {
        &self.op
    }

    pub fn into_op(self) -> Op {
        Op::Def(self)
    }

    fn target(&self, ctx: &Context) -> std::result::Result<(String, CellMap), TargetError> {
        let syntax = ctx.resolve(&self.symbol)?;
        let Cell::Syntax(syn) = syntax.as_ref() else {
            return Err(TargetError::Cast(format!(
                "def target must be syntax, got {}",
                syntax.kind()
            )));
        };
        let name = match ctx.resolve(&syn.value)?.as_ref() {
            Cell::Symbol(name) => name.clone(),
            other => {
                return Err(TargetError::Cast(format!(
                    "def target must be a symbol, got {}",
                    other.kind()
                )))
            }
        };
        let meta = match ctx.resolve(&syn.meta)?.as_ref() {
            Cell::Map(m) => m.clone(),
            Cell::Nil => CellMap::new(),
            other => {
                return Err(TargetError::Cast(format!(
                    "def metadata must be a map, got {}",
                    other.kind()
                )))
            }
        };
        Ok((name, meta))
    }
}

enum TargetError {
    Load(CellError),
    Cast(String),
}

impl From<CellError> for TargetError {
    fn from(err: CellError) -> Self {
        TargetError::Load(err)
    }
}

impl Operation for Def {
    const OPCODE: u8 = 1;

    fn execute(&self, ctx: Context) -> Context {
        let ctx = ctx.consume_juice(juice::DEF);
        if ctx.is_exceptional() {
            return ctx;
        }
        let (name, meta) = match self.target(&ctx) {
            Ok(target) => target,
            Err(TargetError::Load(err)) => return ctx.with_cell_error(err),
            Err(TargetError::Cast(msg)) => return ctx.with_error(ErrorCode::Cast, msg),
        };
        let ctx = ctx.execute(&self.op);
        let Some(value) = ctx.result().cloned() else {
            return ctx;
        };
        ctx.define(&name, value.clone(), meta).with_result(value)
    }

    fn ref_count(&self) -> usize {
        2
    }

    fn get_ref(&self, i: usize) -> Option<&Ref> {
        match i {
            0 => Some(&self.symbol),
            1 => Some(&self.op),
            _ => None,
        }
    }

    fn update_refs(&self, f: &mut dyn FnMut(&Ref) -> Result<Ref>) -> Result<Self> {
        Ok(Self {
            symbol: f(&self.symbol)?,
            op: f(&self.op)?,
        })
    }

    fn write_raw(&self, out: &mut Vec<u8>) {
        self.symbol.write(out);
        self.op.write(out);
    }

    fn read_raw(dec: &mut Decoder<'_>) -> Result<Self> {
        let symbol = dec.read_ref()?;
        let op = dec.read_ref()?;
        Ok(Self { symbol, op })
    }
}
