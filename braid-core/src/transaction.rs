// src/transaction.rs

//! Transaction structure and canonical encoding.
//!
//! A transaction is identified by the BLAKE3 digest of its bincode
//! encoding. The same encoding is what appears inside a serialized block,
//! which is what makes per-transaction byte regions addressable.

use crate::errors::{CoreError, Result};
use crate::types::{SubnetworkId, TransactionId, SUBNETWORK_ID_COINBASE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reference to an output of an earlier transaction
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Outpoint {
    /// Transaction holding the output
    pub transaction_id: TransactionId,

    /// Index of the output in that transaction
    pub index: u32,
}

/// Transaction input spending a previous output
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    /// Output being spent
    pub previous_outpoint: Outpoint,

    /// Unlocking script
    pub signature_script: Vec<u8>,

    /// Relative lock sequence
    pub sequence: u64,
}

/// Versioned locking script
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScriptPublicKey {
    /// Script language version
    pub version: u16,

    /// Script bytes
    pub script: Vec<u8>,
}

impl ScriptPublicKey {
    /// Creates a script public key
    pub fn new(version: u16, script: Vec<u8>) -> Self {
        Self { version, script }
    }
}

/// Transaction output
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in base units
    pub value: u64,

    /// Locking script
    pub script_public_key: ScriptPublicKey,
}

/// Complete Braid transaction structure
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction version
    pub version: u16,

    /// Inputs being spent
    pub inputs: Vec<TxInput>,

    /// New outputs being created
    pub outputs: Vec<TxOutput>,

    /// Earliest time or blue score the transaction may be accepted at
    pub lock_time: u64,

    /// Subnetwork the transaction belongs to
    pub subnetwork_id: SubnetworkId,

    /// Gas consumed on a non-builtin subnetwork
    pub gas: u64,

    /// Subnetwork specific payload
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Creates a new transaction
    pub fn new(
        version: u16,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u64,
        subnetwork_id: SubnetworkId,
        gas: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time,
            subnetwork_id,
            gas,
            payload,
        }
    }

    /// Computes transaction ID using braid-crypto's hash
    pub fn id(&self) -> TransactionId {
        braid_crypto::hash::blake3_hash(&self.to_bytes())
    }

    /// Canonical encoding of the transaction
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Transaction serialization should never fail")
    }

    /// Decodes a transaction from its canonical encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// Length in bytes of the canonical encoding
    pub fn encoded_len(&self) -> u64 {
        bincode::serialized_size(self).expect("Transaction serialization should never fail")
    }

    /// Whether this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.subnetwork_id == SUBNETWORK_ID_COINBASE
    }

    /// Sum of all output values, `None` on overflow
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.value))
    }

    /// Validates transaction structure
    ///
    /// Coinbase transactions carry no inputs. Every other transaction needs at
    /// least one input and one output and may not spend the same outpoint
    /// twice.
    pub fn validate_structure(&self) -> bool {
        if self.total_output_value().is_none() {
            return false;
        }

        if self.is_coinbase() {
            return self.inputs.is_empty();
        }

        if self.inputs.is_empty() || self.outputs.is_empty() {
            return false;
        }

        let mut seen = HashSet::with_capacity(self.inputs.len());
        self.inputs
            .iter()
            .all(|input| seen.insert(input.previous_outpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SUBNETWORK_ID_NATIVE;

    fn create_test_tx(nonce: u8) -> Transaction {
        Transaction::new(
            0,
            vec![TxInput {
                previous_outpoint: Outpoint {
                    transaction_id: [nonce; 32],
                    index: 0,
                },
                signature_script: vec![nonce],
                sequence: 0,
            }],
            vec![TxOutput {
                value: 1_000,
                script_public_key: ScriptPublicKey::new(0, vec![0xac]),
            }],
            0,
            SUBNETWORK_ID_NATIVE,
            0,
            Vec::new(),
        )
    }

    #[test]
    fn test_id_is_content_addressed() {
        let tx = create_test_tx(1);
        assert_eq!(tx.id(), create_test_tx(1).id());
        assert_ne!(tx.id(), create_test_tx(2).id());
        assert_eq!(tx.id(), braid_crypto::hash::blake3_hash(&tx.to_bytes()));
    }

    #[test]
    fn test_encoding_length_and_decode() {
        let tx = create_test_tx(3);
        let bytes = tx.to_bytes();
        assert_eq!(bytes.len() as u64, tx.encoded_len());
        assert_eq!(Transaction::from_bytes(&bytes).unwrap(), tx);
        assert!(Transaction::from_bytes(&bytes[..4]).is_err());
    }

    #[test]
    fn test_validate_structure() {
        let tx = create_test_tx(1);
        assert!(tx.validate_structure());

        let mut no_inputs = tx.clone();
        no_inputs.inputs.clear();
        assert!(!no_inputs.validate_structure());

        let mut double_spend = tx.clone();
        double_spend.inputs.push(tx.inputs[0].clone());
        assert!(!double_spend.validate_structure());

        let mut overflow = tx;
        overflow.outputs.push(TxOutput {
            value: u64::MAX,
            script_public_key: ScriptPublicKey::default(),
        });
        assert!(!overflow.validate_structure());
    }

    #[test]
    fn test_coinbase_structure() {
        let mut coinbase = create_test_tx(1);
        coinbase.subnetwork_id = SUBNETWORK_ID_COINBASE;
        assert!(coinbase.is_coinbase());
        assert!(!coinbase.validate_structure());

        coinbase.inputs.clear();
        coinbase.outputs.clear();
        assert!(coinbase.validate_structure());
    }
}
