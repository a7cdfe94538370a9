//! Aliases for the integer types used as database IDs.

/// The ID of an account.
pub type AccountId = i64;
/// The ID of a transaction.
pub type TransactionId = i64;
