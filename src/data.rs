use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// A single payset entry. The pipeline core never interprets the payload;
/// only the transaction type is read, for per-type metric labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub txn_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Transaction {
    pub fn new(txn_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            txn_type: txn_type.into(),
            payload,
        }
    }
}

/// Block contents threaded through the pipeline stages.
///
/// Opaque to the core: the round number drives the cursor and the payset is
/// only iterated for metric labels. Everything else is plugin territory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    round: u64,
    payset: Vec<Transaction>,
}

impl BlockData {
    pub fn new(round: u64, payset: Vec<Transaction>) -> Self {
        Self { round, payset }
    }

    /// Round number of the block in the source chain.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn payset(&self) -> &[Transaction] {
        &self.payset
    }
}

/// Chain identity reported by the importer at init time.
///
/// Binds a cursor file to a chain: the base64 of the hash is persisted next
/// to the cursor and verified on every startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genesis {
    hash: [u8; 32],
    network: String,
}

impl Genesis {
    pub fn new(hash: [u8; 32], network: impl Into<String>) -> Self {
        Self {
            hash,
            network: network.into(),
        }
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Standard base64 of the 32-byte hash, the encoding used in the
    /// metadata file.
    pub fn hash_base64(&self) -> String {
        BASE64_STANDARD.encode(self.hash)
    }
}
