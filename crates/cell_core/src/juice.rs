//! Juice costs. Each op is charged its own cost before it does anything else;
//! sub-operations are charged when they run.

pub type Juice = u64;

pub const CONSTANT: Juice = 0;
pub const DEF: Juice = 100;
pub const LOOKUP: Juice = 15;
pub const INVOKE: Juice = 20;
pub const DO: Juice = 10;
pub const COND: Juice = 20;

/// Budget for a transaction when the config does not set one.
pub const DEFAULT_LIMIT: Juice = 100_000;
