//! Content-addressed cells and the juice-metered op engine.
//!
//! Values are immutable [`Cell`]s identified by the BLAKE3 hash of their
//! canonical encoding. Children are held through [`Ref`]s that may be
//! resolved lazily from a [`Store`]. Ops are cells too, evaluated by threading
//! a [`Context`] through them; [`Executor`] applies signed transactions on
//! top of that.

pub mod cell;
pub mod config;
pub mod context;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod fns;
pub mod juice;
pub mod ops;
pub mod record;
pub mod reference;
pub mod signed;
pub mod store;
pub mod transaction;

pub use cell::{Cell, CellMap, Syntax};
pub use cell_hash::Hash;
pub use config::CoreConfig;
pub use context::{CancelToken, Context, Exception};
pub use crypto::{AccountKey, KeyPair, Signature};
pub use error::{CellError, ErrorCode, Result};
pub use ops::{Cond, Constant, Def, Do, Invoke, Lookup, Op, Operation};
pub use record::{Record, RecordFormat};
pub use reference::Ref;
pub use signed::{SignedData, VerificationCache};
pub use store::{MemStore, Store, StoreError};
pub use transaction::{AccountStatus, Executor, Transaction, TxOutcome, TxReceipt};
