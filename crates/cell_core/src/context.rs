//! Threaded execution state.
//!
//! A [`Context`] is moved into every operation and a new one comes back out.
//! Failures that a transaction can recover from are carried as an
//! [`Exception`] in the returned context rather than as Rust errors.

use crate::cell::{Cell, CellMap, Syntax};
use crate::config::CoreConfig;
use crate::error::{CellError, ErrorCode};
use crate::juice::Juice;
use crate::reference::Ref;
use crate::store::DynStore;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub code: ErrorCode,
    pub message: String,
    /// The error behind a store or decoding failure.
    pub cause: Option<CellError>,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Cooperative cancellation, checked before each operation runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct Context {
    result: Result<Ref, Exception>,
    env: CellMap,
    juice: Juice,
    juice_limit: Juice,
    depth: usize,
    max_depth: usize,
    store: DynStore,
    cancel: CancelToken,
}

impl Context {
    pub fn new(store: DynStore, juice_limit: Juice) -> Self {
        Self {
            result: Ok(Ref::nil()),
            env: CellMap::new(),
            juice: juice_limit,
            juice_limit,
            depth: 0,
            max_depth: CoreConfig::default().max_depth,
            store,
            cancel: CancelToken::new(),
        }
    }

    pub fn from_config(store: DynStore, config: &CoreConfig) -> Self {
        Self::new(store, config.juice_limit).with_max_depth(config.max_depth)
    }

    pub fn with_env(mut self, env: CellMap) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn result(&self) -> Option<&Ref> {
        self.result.as_ref().ok()
    }

    pub fn exception(&self) -> Option<&Exception> {
        self.result.as_ref().err()
    }

    pub fn is_exceptional(&self) -> bool {
        self.result.is_err()
    }

    pub fn into_result(self) -> Result<Ref, Exception> {
        self.result
    }

    /// Remaining budget.
    pub fn juice(&self) -> Juice {
        self.juice
    }

    pub fn juice_used(&self) -> Juice {
        self.juice_limit - self.juice
    }

    pub fn env(&self) -> &CellMap {
        &self.env
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn with_result(mut self, value: Ref) -> Self {
        self.result = Ok(value);
        self
    }

    pub fn with_value(self, cell: Cell) -> Self {
        self.with_result(Ref::new(cell))
    }

    pub fn with_error(self, code: ErrorCode, message: impl Into<String>) -> Self {
        self.raise(code, message.into(), None)
    }

    pub fn with_cell_error(self, err: CellError) -> Self {
        self.raise(err.code(), err.to_string(), Some(err))
    }

    fn raise(mut self, code: ErrorCode, message: String, cause: Option<CellError>) -> Self {
        debug!(%code, %message, depth = self.depth, "exception");
        self.result = Err(Exception {
            code,
            message,
            cause,
        });
        self
    }

    /// Charge `amount`. When the budget cannot cover it the remaining juice is
    /// spent and the context becomes exceptional.
    pub fn consume_juice(mut self, amount: Juice) -> Self {
        if amount > self.juice {
            let wanted = amount;
            let left = self.juice;
            self.juice = 0;
            return self.with_error(
                ErrorCode::Juice,
                format!("insufficient juice: needed {wanted}, had {left}"),
            );
        }
        self.juice -= amount;
        self
    }

    /// Current binding for `name`, with any syntax wrapper removed.
    pub fn lookup(&self, name: &str) -> Result<Option<Ref>, CellError> {
        let Some(bound) = self.env.get(&Cell::symbol(name)) else {
            return Ok(None);
        };
        match self.resolve(bound)?.as_ref() {
            Cell::Syntax(syn) => Ok(Some(syn.value.clone())),
            _ => Ok(Some(bound.clone())),
        }
    }

    /// Bind `name` to `value`, decorated with `meta`.
    pub fn define(mut self, name: &str, value: Ref, meta: CellMap) -> Self {
        let syntax = Cell::Syntax(Syntax::new(value, meta));
        self.env = self.env.assoc(Cell::symbol(name), syntax);
        self
    }

    pub fn resolve(&self, reference: &Ref) -> Result<Arc<Cell>, CellError> {
        reference.resolve(self.store.as_ref())
    }

    /// Run the op behind `op_ref` one level deeper.
    pub fn execute(mut self, op_ref: &Ref) -> Context {
        if self.cancel.is_cancelled() {
            return self.with_error(ErrorCode::Cancelled, "evaluation cancelled");
        }
        if self.depth >= self.max_depth {
            let max = self.max_depth;
            return self.with_error(ErrorCode::Depth, format!("depth limit {max} reached"));
        }
        let cell = match self.resolve(op_ref) {
            Ok(cell) => cell,
            Err(e) => return self.with_cell_error(e),
        };
        let Cell::Op(op) = cell.as_ref() else {
            let kind = cell.kind();
            return self.with_error(ErrorCode::Cast, format!("cannot execute a {kind}"));
        };
        self.depth += 1;
        let mut ctx = op.execute(self);
        ctx.depth -= 1;
        ctx
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("result", &self.result)
            .field("env", &self.env.len())
            .field("juice", &self.juice)
            .field("juice_limit", &self.juice_limit)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
