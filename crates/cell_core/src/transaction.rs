//! Signed transaction submission.
//!
//! A transaction is a `TRANSACTION` record (`sequence`, `command`) wrapped in
//! a [`SignedData`]. [`Executor::submit`] checks the signature, the record
//! shape and the sequence number, evaluates the command against the account
//! environment and reports the outcome as a receipt.

use crate::cell::{Cell, CellMap};
use crate::config::CoreConfig;
use crate::context::{CancelToken, Context};
use crate::crypto::KeyPair;
use crate::error::{CellError, ErrorCode, Result};
use crate::juice::Juice;
use crate::ops::Op;
use crate::record::{Record, RecordFormat, ACCOUNT_STATUS, RECEIPT, TRANSACTION};
use crate::reference::Ref;
use crate::signed::{SignedData, VerificationCache};
use crate::store::{self, DynStore, Store};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

fn expect_format(rec: &Record, format: &'static RecordFormat) -> Result<()> {
    if rec.format() != format {
        return Err(CellError::InvalidStructure(format!(
            "expected {} record, got {}",
            format.name,
            rec.format().name
        )));
    }
    Ok(())
}

fn field(rec: &Record, name: &str) -> Result<Ref> {
    rec.get_field(name)
        .cloned()
        .ok_or_else(|| CellError::InvalidStructure(format!("{} has no {name}", rec.format().name)))
}

fn long_field(rec: &Record, name: &str, store: &dyn Store) -> Result<i64> {
    let cell = field(rec, name)?.resolve(store)?;
    cell.as_long().ok_or_else(|| {
        CellError::InvalidStructure(format!("{name} must be a long, got {}", cell.kind()))
    })
}

fn juice_cell(juice: Juice) -> Cell {
    Cell::Long(i64::try_from(juice).unwrap_or(i64::MAX))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub sequence: i64,
    pub command: Ref,
}

impl Transaction {
    pub fn new(sequence: i64, command: Op) -> Self {
        Self {
            sequence,
            command: command.into_ref(),
        }
    }

    pub fn to_record(&self) -> Record {
        let values = vec![Ref::new(Cell::Long(self.sequence)), self.command.clone()];
        Record::from_values(&TRANSACTION, values)
    }

    pub fn from_record(rec: &Record, store: &dyn Store) -> Result<Self> {
        expect_format(rec, &TRANSACTION)?;
        Ok(Self {
            sequence: long_field(rec, "sequence", store)?,
            command: field(rec, "command")?,
        })
    }

    /// Sign the record form with `key`.
    pub fn sign(&self, key: &KeyPair) -> SignedData {
        key.sign_data(Ref::new(Cell::Record(self.to_record())))
    }
}

/// Per-account state threaded between transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountStatus {
    pub sequence: i64,
    pub environment: CellMap,
}

impl AccountStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_record(&self) -> Record {
        let values = vec![
            Ref::new(Cell::Long(self.sequence)),
            Ref::new(Cell::Map(self.environment.clone())),
        ];
        Record::from_values(&ACCOUNT_STATUS, values)
    }

    pub fn from_record(rec: &Record, store: &dyn Store) -> Result<Self> {
        expect_format(rec, &ACCOUNT_STATUS)?;
        let env = field(rec, "environment")?.resolve(store)?;
        let environment = match env.as_ref() {
            Cell::Map(m) => m.clone(),
            Cell::Nil => CellMap::new(),
            other => {
                return Err(CellError::InvalidStructure(format!(
                    "environment must be a map, got {}",
                    other.kind()
                )))
            }
        };
        Ok(Self {
            sequence: long_field(rec, "sequence", store)?,
            environment,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub value: Option<Ref>,
    pub error: Option<ErrorCode>,
    pub message: Option<String>,
    pub juice_used: Juice,
}

impl TxReceipt {
    pub fn success(value: Ref, juice_used: Juice) -> Self {
        Self {
            value: Some(value),
            error: None,
            message: None,
            juice_used,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>, juice_used: Juice) -> Self {
        Self {
            value: None,
            error: Some(code),
            message: Some(message.into()),
            juice_used,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_record(&self) -> Record {
        let value = self.value.clone().unwrap_or_else(Ref::nil);
        let error = match self.error {
            Some(code) => Cell::keyword(code.as_str()),
            None => Cell::Nil,
        };
        let values = vec![value, Ref::new(error), Ref::new(juice_cell(self.juice_used))];
        Record::from_values(&RECEIPT, values)
    }

    /// Messages are not part of the record form and come back as `None`.
    pub fn from_record(rec: &Record, store: &dyn Store) -> Result<Self> {
        expect_format(rec, &RECEIPT)?;
        let error = match field(rec, "error")?.resolve(store)?.as_ref() {
            Cell::Nil => None,
            Cell::Keyword(name) => Some(ErrorCode::from_name(name).ok_or_else(|| {
                CellError::InvalidStructure(format!("unknown error code {name}"))
            })?),
            other => {
                return Err(CellError::InvalidStructure(format!(
                    "error must be a keyword, got {}",
                    other.kind()
                )))
            }
        };
        let juice = long_field(rec, "juice", store)?;
        Ok(Self {
            value: error.is_none().then(|| field(rec, "value")).transpose()?,
            error,
            message: None,
            juice_used: u64::try_from(juice).unwrap_or(0),
        })
    }

    /// JSON view for billing and audit consumers.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "value": self.value.as_ref().map(|v| v.to_string()),
            "error": self.error.map(|c| c.as_str()),
            "message": self.message,
            "juice": self.juice_used,
        })
    }
}

#[derive(Clone, Debug)]
pub struct TxOutcome {
    pub account: AccountStatus,
    pub receipt: TxReceipt,
}

impl TxOutcome {
    fn rejected(account: &AccountStatus, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            account: account.clone(),
            receipt: TxReceipt::failure(code, message, 0),
        }
    }
}

/// Applies signed transactions to account states.
///
/// Executors are cheap to clone and can be shared between threads; each
/// submission evaluates in its own [`Context`].
#[derive(Clone)]
pub struct Executor {
    store: DynStore,
    cache: Arc<VerificationCache>,
    config: CoreConfig,
}

impl Executor {
    pub fn new(store: DynStore, config: CoreConfig) -> Self {
        Self {
            store,
            cache: VerificationCache::global(),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<VerificationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn submit(&self, account: &AccountStatus, signed: &SignedData) -> Result<TxOutcome> {
        self.submit_with_cancel(account, signed, CancelToken::new())
    }

    /// Recoverable failures come back as a receipt. Missing data and format
    /// errors come back as `Err` and leave the account untouched.
    pub fn submit_with_cancel(
        &self,
        account: &AccountStatus,
        signed: &SignedData,
        cancel: CancelToken,
    ) -> Result<TxOutcome> {
        if !signed.check_signature_in(&self.cache) {
            warn!(signer = %signed.key(), "rejected transaction with bad signature");
            return Ok(TxOutcome::rejected(
                account,
                ErrorCode::BadSignature,
                format!("bad signature on {}", signed.hash()),
            ));
        }

        let payload = signed.value_ref().resolve(self.store.as_ref())?;
        let tx = match payload.as_ref() {
            Cell::Record(rec) => match Transaction::from_record(rec, self.store.as_ref()) {
                Ok(tx) => tx,
                Err(e) if e.code() == ErrorCode::Structure => {
                    return Ok(TxOutcome::rejected(account, ErrorCode::Structure, e.to_string()))
                }
                Err(e) => return Err(e),
            },
            other => {
                let msg = format!("transaction payload must be a record, got {}", other.kind());
                return Ok(TxOutcome::rejected(account, ErrorCode::Structure, msg));
            }
        };

        let expected = account.sequence.saturating_add(1);
        if tx.sequence != expected {
            let msg = format!("expected sequence {expected}, got {}", tx.sequence);
            return Ok(TxOutcome::rejected(account, ErrorCode::Sequence, msg));
        }

        let ctx = Context::from_config(self.store.clone(), &self.config)
            .with_env(account.environment.clone())
            .with_cancel(cancel)
            .execute(&tx.command);
        let juice_used = ctx.juice_used();

        let next = match ctx.exception() {
            None => {
                let value = ctx.result().cloned().unwrap_or_else(Ref::nil);
                info!(signer = %signed.key(), sequence = tx.sequence, juice_used, "transaction applied");
                TxOutcome {
                    account: AccountStatus {
                        sequence: tx.sequence,
                        environment: ctx.env().clone(),
                    },
                    receipt: TxReceipt::success(value, juice_used),
                }
            }
            Some(ex) if ex.code.is_fatal() => {
                warn!(code = %ex.code, message = %ex.message, "transaction aborted");
                return Err(match (&ex.cause, ex.code) {
                    (Some(cause), _) => cause.clone(),
                    (None, ErrorCode::MissingData) => {
                        CellError::missing(tx.command.hash(), ex.message.clone())
                    }
                    (None, _) => CellError::Format(ex.message.clone()),
                });
            }
            Some(ex) => {
                info!(
                    signer = %signed.key(),
                    sequence = tx.sequence,
                    juice_used,
                    code = %ex.code,
                    "transaction failed"
                );
                TxOutcome {
                    account: AccountStatus {
                        sequence: tx.sequence,
                        environment: account.environment.clone(),
                    },
                    receipt: TxReceipt::failure(ex.code, ex.message.clone(), juice_used),
                }
            }
        };
        Ok(next)
    }

    /// Load the whole transaction from the store on a blocking worker,
    /// bounded by the configured resolve timeout, then submit it.
    pub async fn submit_async(
        &self,
        account: &AccountStatus,
        signed: &SignedData,
    ) -> Result<TxOutcome> {
        let loaded = store::preload(
            signed.value_ref().clone(),
            self.store.clone(),
            self.config.resolve_timeout(),
            store::WalkLimits::from_config(&self.config),
        )
        .await?;
        self.submit(account, &signed.with_value(loaded))
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
