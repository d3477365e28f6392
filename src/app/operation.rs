//! Operations and their content hashes

use crate::common::Result;
use crate::p2p::Transaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    PrintTimestamp,
}

/// Immutable unit of application work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub op_type: OpType,
    pub value: String,
}

impl Operation {
    pub fn new(op_type: OpType, value: impl Into<String>) -> Self {
        Self {
            op_type,
            value: value.into(),
        }
    }

    pub fn print_timestamp(unix_secs: i64) -> Self {
        Self::new(OpType::PrintTimestamp, unix_secs.to_string())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Hex SHA-256 of the serialized operation; equal operations share it
    pub fn hash(&self) -> Result<String> {
        Ok(content_hash(&self.encode()?))
    }

    pub fn to_transaction(&self) -> Result<Transaction> {
        let tx_data = self.encode()?;
        Ok(Transaction {
            id: content_hash(&tx_data),
            tx_data,
        })
    }
}

pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Placeholder batch digest: member IDs joined in commit order
pub fn batch_digest(ids: &[String]) -> String {
    ids.join(",")
}

pub fn split_digest(digest: &str) -> Vec<String> {
    digest
        .split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
