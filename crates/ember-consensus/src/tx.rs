//! Transaction decoding: legacy RLP and EIP-2718 typed envelopes.
//!
//! Deliberately thin. The factory distinguishes the envelope kinds, gates
//! typed envelopes on EIP-2718 activation, and picks signed/unsigned by the
//! presence of the signature triple in the decoded fields.

use crate::header::{Address, Hash256};
use crate::rlp::{self, Item};
use crate::{ConsensusError, ConsensusResult};
use ember_chain::ChainSpec;
use num_bigint::BigUint;
use std::sync::Arc;

/// EIP-2930 access-list transaction type discriminator.
const ACCESS_LIST_TX_TYPE: u8 = 0x01;

/// `(v, r, s)` signature values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParts {
    pub v: BigUint,
    pub r: BigUint,
    pub s: BigUint,
}

/// A pre-EIP-2718 transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: BigUint,
    pub gas_price: BigUint,
    pub gas_limit: BigUint,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: BigUint,
    pub data: Vec<u8>,
    pub signature: Option<SignatureParts>,
}

/// One access-list entry: an address and its warmed storage keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessListEntry {
    pub address: Address,
    pub storage_keys: Vec<Hash256>,
}

/// An EIP-2930 typed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessListTransaction {
    pub chain_id: BigUint,
    pub nonce: BigUint,
    pub gas_price: BigUint,
    pub gas_limit: BigUint,
    pub to: Option<Address>,
    pub value: BigUint,
    pub data: Vec<u8>,
    pub access_list: Vec<AccessListEntry>,
    pub signature: Option<SignatureParts>,
}

/// Decoded transaction variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Legacy(LegacyTransaction),
    AccessList(AccessListTransaction),
}

/// Transaction classes addressable by type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxClass {
    Legacy,
    AccessList,
}

/// Dispatches raw transaction bytes to the right decoder.
#[derive(Debug, Clone)]
pub struct TransactionFactory {
    chain: Arc<ChainSpec>,
}

impl TransactionFactory {
    pub fn new(chain: Arc<ChainSpec>) -> Self {
        Self { chain }
    }

    /// Decode raw transaction bytes.
    ///
    /// A leading byte at or below 0x7F marks a typed envelope; anything
    /// else is the first byte of a legacy RLP list.
    pub fn decode(&self, raw: &[u8]) -> ConsensusResult<Transaction> {
        let first = *raw
            .first()
            .ok_or_else(|| ConsensusError::Rlp("empty transaction bytes".into()))?;

        if first <= 0x7f {
            if !self.chain.eips().contains(&2718) {
                return Err(ConsensusError::Eip2718Disabled);
            }
            return match first {
                ACCESS_LIST_TX_TYPE => {
                    decode_access_list(&raw[1..]).map(Transaction::AccessList)
                }
                other => Err(ConsensusError::UnknownTxType(other)),
            };
        }

        decode_legacy(raw).map(Transaction::Legacy)
    }

    /// Transaction class for a type discriminator.
    ///
    /// A lookup without a discriminator is ambiguous in the protocol and is
    /// rejected explicitly rather than silently dispatched.
    pub fn transaction_class(&self, tx_type: Option<u8>) -> ConsensusResult<TxClass> {
        match tx_type {
            None => Err(ConsensusError::UnsupportedRequest(
                "transaction class lookup without a type".into(),
            )),
            Some(0x00) => Ok(TxClass::Legacy),
            Some(ACCESS_LIST_TX_TYPE) => {
                if !self.chain.eips().contains(&2718) {
                    return Err(ConsensusError::Eip2718Disabled);
                }
                Ok(TxClass::AccessList)
            }
            Some(other) => Err(ConsensusError::UnknownTxType(other)),
        }
    }
}

fn decode_legacy(raw: &[u8]) -> ConsensusResult<LegacyTransaction> {
    let values = rlp::decode(raw)?.into_list("legacy transaction")?;
    let signed = match values.len() {
        6 => false,
        9 => true,
        n => {
            return Err(ConsensusError::Rlp(format!(
                "legacy transaction has {n} fields, expected 6 or 9"
            )))
        }
    };

    let mut values = values.into_iter();
    let tx = LegacyTransaction {
        nonce: numeric(&mut values, "nonce")?,
        gas_price: numeric(&mut values, "gasPrice")?,
        gas_limit: numeric(&mut values, "gasLimit")?,
        to: to_address(&mut values)?,
        value: numeric(&mut values, "value")?,
        data: bytes(&mut values, "data")?,
        signature: if signed {
            Some(SignatureParts {
                v: numeric(&mut values, "v")?,
                r: numeric(&mut values, "r")?,
                s: numeric(&mut values, "s")?,
            })
        } else {
            None
        },
    };
    Ok(tx)
}

fn decode_access_list(payload: &[u8]) -> ConsensusResult<AccessListTransaction> {
    let values = rlp::decode(payload)?.into_list("access-list transaction")?;
    let signed = match values.len() {
        8 => false,
        11 => true,
        n => {
            return Err(ConsensusError::Rlp(format!(
                "access-list transaction has {n} fields, expected 8 or 11"
            )))
        }
    };

    let mut values = values.into_iter();
    let chain_id = numeric(&mut values, "chainId")?;
    let nonce = numeric(&mut values, "nonce")?;
    let gas_price = numeric(&mut values, "gasPrice")?;
    let gas_limit = numeric(&mut values, "gasLimit")?;
    let to = to_address(&mut values)?;
    let value = numeric(&mut values, "value")?;
    let data = bytes(&mut values, "data")?;
    let access_list = access_entries(&mut values)?;
    let signature = if signed {
        Some(SignatureParts {
            v: numeric(&mut values, "v")?,
            r: numeric(&mut values, "r")?,
            s: numeric(&mut values, "s")?,
        })
    } else {
        None
    };

    Ok(AccessListTransaction {
        chain_id,
        nonce,
        gas_price,
        gas_limit,
        to,
        value,
        data,
        access_list,
        signature,
    })
}

fn numeric(
    values: &mut impl Iterator<Item = Item>,
    field: &'static str,
) -> ConsensusResult<BigUint> {
    let bytes = next(values, field)?.into_bytes(field)?;
    Ok(BigUint::from_bytes_be(&bytes))
}

fn bytes(
    values: &mut impl Iterator<Item = Item>,
    field: &'static str,
) -> ConsensusResult<Vec<u8>> {
    next(values, field)?.into_bytes(field)
}

fn to_address(values: &mut impl Iterator<Item = Item>) -> ConsensusResult<Option<Address>> {
    let bytes = next(values, "to")?.into_bytes("to")?;
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() != 20 {
        return Err(ConsensusError::InvalidFieldWidth {
            field: "to",
            expected: 20,
            got: bytes.len(),
        });
    }
    let mut address = [0u8; 20];
    address.copy_from_slice(&bytes);
    Ok(Some(address))
}

fn access_entries(
    values: &mut impl Iterator<Item = Item>,
) -> ConsensusResult<Vec<AccessListEntry>> {
    let entries = next(values, "accessList")?.into_list("accessList")?;
    entries
        .into_iter()
        .map(|entry| {
            let mut parts = entry.into_list("access entry")?.into_iter();
            let address_bytes = next(&mut parts, "access address")?.into_bytes("access address")?;
            if address_bytes.len() != 20 {
                return Err(ConsensusError::InvalidFieldWidth {
                    field: "access address",
                    expected: 20,
                    got: address_bytes.len(),
                });
            }
            let mut address = [0u8; 20];
            address.copy_from_slice(&address_bytes);

            let storage_keys = next(&mut parts, "storage keys")?
                .into_list("storage keys")?
                .into_iter()
                .map(|key| {
                    let bytes = key.into_bytes("storage key")?;
                    if bytes.len() != 32 {
                        return Err(ConsensusError::InvalidFieldWidth {
                            field: "storage key",
                            expected: 32,
                            got: bytes.len(),
                        });
                    }
                    let mut out = [0u8; 32];
                    out.copy_from_slice(&bytes);
                    Ok(out)
                })
                .collect::<ConsensusResult<Vec<_>>>()?;

            Ok(AccessListEntry {
                address,
                storage_keys,
            })
        })
        .collect()
}

fn next(values: &mut impl Iterator<Item = Item>, field: &'static str) -> ConsensusResult<Item> {
    values
        .next()
        .ok_or_else(|| ConsensusError::Rlp(format!("missing field: {field}")))
}
