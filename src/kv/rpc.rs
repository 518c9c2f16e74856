//! Wire types for the versioned key-value service. `KvErr` is the error
//! kind seen by Clerk callers; `Maybe` only ever shows up client-side (see
//! `clerk.rs`), the server itself never returns it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvErr {
    Ok,
    NoKey,
    Version,
    Maybe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReply {
    pub value: String,
    pub version: u64,
    pub err: KvErr,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PutReply {
    pub err: KvErr,
}
