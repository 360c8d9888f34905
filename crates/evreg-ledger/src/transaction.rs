use evreg_crypto::{DomainHasher, Signature, SigningKey, VerifyingKey};
use evreg_types::{Address, Cid, Status, TxHash};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// A state-changing registry contract call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "camelCase")]
pub enum ContractCall {
    /// `registry(cid, validTo)`: anchor a new CID. `valid_to` is unix
    /// seconds, `0` for no expiry.
    #[serde(rename_all = "camelCase")]
    Registry { cid: Cid, valid_to: u64 },
    /// `changeStatus(cid, status)` on an existing entry.
    ChangeStatus { cid: Cid, status: Status },
}

impl ContractCall {
    /// ABI function name.
    pub fn function(&self) -> &'static str {
        match self {
            Self::Registry { .. } => "registry",
            Self::ChangeStatus { .. } => "changeStatus",
        }
    }

    pub fn cid(&self) -> &Cid {
        match self {
            Self::Registry { cid, .. } | Self::ChangeStatus { cid, .. } => cid,
        }
    }

    /// Status the entry holds after this call succeeds.
    pub fn resulting_status(&self) -> Status {
        match self {
            Self::Registry { .. } => Status::Active,
            Self::ChangeStatus { status, .. } => *status,
        }
    }
}

/// An unsigned transaction from the signer account to the registry contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub chain_id: u64,
    pub contract: Address,
    pub from: Address,
    pub nonce: u64,
    pub call: ContractCall,
}

impl Transaction {
    /// Bytes covered by the signature.
    pub fn signing_bytes(&self) -> LedgerResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Sign with `key`. The key's address must match `from`.
    pub fn sign(self, key: &SigningKey) -> LedgerResult<SignedTransaction> {
        if key.address() != self.from {
            return Err(LedgerError::Submission(format!(
                "signer {} does not match sender {}",
                key.address(),
                self.from
            )));
        }
        let message = self.signing_bytes()?;
        let signature = key.sign(&message);
        let hash = transaction_hash(&message, &signature);
        Ok(SignedTransaction {
            tx: self,
            public_key: key.verifying_key(),
            signature,
            hash,
        })
    }
}

fn transaction_hash(message: &[u8], signature: &Signature) -> TxHash {
    let mut data = message.to_vec();
    data.extend_from_slice(&signature.to_bytes());
    TxHash::from_bytes(DomainHasher::TRANSACTION.hash(&data))
}

/// A transaction with its signature and hash, ready for submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub public_key: VerifyingKey,
    pub signature: Signature,
    pub hash: TxHash,
}

impl SignedTransaction {
    /// Check the signature, the sender attribution, and the hash.
    pub fn verify(&self) -> LedgerResult<()> {
        if self.public_key.address() != self.tx.from {
            return Err(LedgerError::Submission(
                "public key does not belong to sender".into(),
            ));
        }
        let message = self.tx.signing_bytes()?;
        self.public_key
            .verify(&message, &self.signature)
            .map_err(|_| LedgerError::Submission("invalid transaction signature".into()))?;
        if transaction_hash(&message, &self.signature) != self.hash {
            return Err(LedgerError::Submission("transaction hash mismatch".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evreg_crypto::ContentHasher;

    fn tx(key: &SigningKey, nonce: u64) -> Transaction {
        Transaction {
            chain_id: 1337,
            contract: Address::from_bytes([9; 20]),
            from: key.address(),
            nonce,
            call: ContractCall::Registry {
                cid: ContentHasher::default().cid(b"doc"),
                valid_to: 0,
            },
        }
    }

    #[test]
    fn signed_transaction_verifies() {
        let key = SigningKey::generate();
        let signed = tx(&key, 0).sign(&key).unwrap();
        signed.verify().unwrap();
    }

    #[test]
    fn tampering_breaks_verification() {
        let key = SigningKey::generate();
        let mut signed = tx(&key, 0).sign(&key).unwrap();
        signed.tx.nonce = 5;
        assert!(signed.verify().is_err());
    }

    #[test]
    fn hash_differs_per_nonce() {
        let key = SigningKey::generate();
        let a = tx(&key, 0).sign(&key).unwrap();
        let b = tx(&key, 1).sign(&key).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn foreign_key_cannot_sign() {
        let owner = SigningKey::generate();
        let other = SigningKey::generate();
        assert!(matches!(
            tx(&owner, 0).sign(&other),
            Err(LedgerError::Submission(_))
        ));
    }

    #[test]
    fn call_serde_is_tagged_by_function() {
        let call = ContractCall::ChangeStatus {
            cid: ContentHasher::default().cid(b"doc"),
            status: Status::Rejected,
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["function"], "changeStatus");
        assert_eq!(json["status"], "rejected");
        assert_eq!(call.resulting_status(), Status::Rejected);
    }

    #[test]
    fn signed_serde_roundtrip_still_verifies() {
        let key = SigningKey::generate();
        let signed = tx(&key, 3).sign(&key).unwrap();
        let json = serde_json::to_string(&signed).unwrap();
        let parsed: SignedTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, signed);
        parsed.verify().unwrap();
    }
}
