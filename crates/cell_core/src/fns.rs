//! Calling values as functions.
//!
//! Maps and records look up their first argument, vectors index by it. A
//! second argument is the default returned when nothing is found.

use crate::cell::Cell;
use crate::context::Context;
use crate::error::ErrorCode;
use crate::reference::Ref;

pub fn invoke(ctx: Context, f: &Ref, args: &[Ref]) -> Context {
    let callee = match ctx.resolve(f) {
        Ok(cell) => cell,
        Err(e) => return ctx.with_cell_error(e),
    };
    match callee.as_ref() {
        Cell::Map(map) => keyed_lookup(ctx, "map", args, |key| map.get(key).cloned()),
        Cell::Record(rec) => keyed_lookup(ctx, "record", args, |key| rec.get(key).cloned()),
        Cell::Vector(items) => index_lookup(ctx, items, args),
        other => {
            let msg = format!("{} is not callable", other.kind());
            ctx.with_error(ErrorCode::Cast, msg)
        }
    }
}

fn check_arity(ctx: Context, what: &str, args: &[Ref]) -> Result<Context, Context> {
    match args.len() {
        1 | 2 => Ok(ctx),
        n => {
            let msg = format!("Expected arity 1 or 2 for {what} lookup but got: {n}");
            Err(ctx.with_error(ErrorCode::Arity, msg))
        }
    }
}

fn keyed_lookup(
    ctx: Context,
    what: &str,
    args: &[Ref],
    find: impl Fn(&Cell) -> Option<Ref>,
) -> Context {
    let ctx = match check_arity(ctx, what, args) {
        Ok(ctx) => ctx,
        Err(ctx) => return ctx,
    };
    let key = match ctx.resolve(&args[0]) {
        Ok(key) => key,
        Err(e) => return ctx.with_cell_error(e),
    };
    match (find(key.as_ref()), args.get(1)) {
        (Some(found), _) => ctx.with_result(found),
        (None, Some(default)) => ctx.with_result(default.clone()),
        (None, None) => ctx.with_result(Ref::nil()),
    }
}

fn index_lookup(ctx: Context, items: &[Ref], args: &[Ref]) -> Context {
    let ctx = match check_arity(ctx, "vector", args) {
        Ok(ctx) => ctx,
        Err(ctx) => return ctx,
    };
    let index = match ctx.resolve(&args[0]) {
        Ok(cell) => match cell.as_long() {
            Some(i) => i,
            None => {
                let msg = format!("vector index must be a long, got {}", cell.kind());
                return ctx.with_error(ErrorCode::Cast, msg);
            }
        },
        Err(e) => return ctx.with_cell_error(e),
    };
    let found = usize::try_from(index).ok().and_then(|i| items.get(i));
    match (found, args.get(1)) {
        (Some(item), _) => ctx.with_result(item.clone()),
        (None, Some(default)) => ctx.with_result(default.clone()),
        (None, None) => {
            let msg = format!("index {index} out of range for length {}", items.len());
            ctx.with_error(ErrorCode::Bounds, msg)
        }
    }
}
