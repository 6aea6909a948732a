//! Block header: construction, canonical RLP form and hashing.
//!
//! A header is frozen once built: constructors validate field widths and the
//! DAO extra-data gate, and the struct exposes read-only accessors only.

use crate::rlp;
use crate::{ConsensusError, ConsensusResult};
use ember_chain::{ChainSpec, ConsensusAlgorithm, Hardfork};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::sync::Arc;

/// 32-byte keccak256 hash.
pub type Hash256 = [u8; 32];

/// 20-byte account address.
pub type Address = [u8; 20];

/// keccak256 of the RLP of an empty list (the empty-uncles hash).
pub const KECCAK256_RLP_ARRAY: Hash256 = [
    0x1d, 0xcc, 0x4d, 0xe8, 0xde, 0xc7, 0x5d, 0x7a, 0xab, 0x85, 0xb5, 0x67, 0xb6, 0xcc, 0xd4,
    0x1a, 0xd3, 0x12, 0x45, 0x1b, 0x94, 0x8a, 0x74, 0x13, 0xf0, 0xa1, 0x42, 0xfd, 0x40, 0xd4,
    0x93, 0x47,
];

/// keccak256 of the RLP of an empty byte string (the empty-trie root).
pub const KECCAK256_RLP: Hash256 = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

/// Default gas limit assigned when a header is built without one.
pub const DEFAULT_GAS_LIMIT: u64 = 0x00ff_ffff_ffff_ffff;

/// Fixed vanity prefix length of clique extra-data.
pub const CLIQUE_EXTRA_VANITY: usize = 32;

/// Trailing seal length of clique extra-data.
pub const CLIQUE_EXTRA_SEAL: usize = 65;

/// Marker required in extra-data for the ten blocks after the DAO fork.
pub const DAO_EXTRA_DATA: &[u8] = b"dao-hard-fork";

/// Number of blocks (after the fork block itself) covered by the DAO gate.
const DAO_FORCE_EXTRA_DATA_RANGE: u64 = 9;

/// keccak256 convenience wrapper.
pub fn keccak256(data: &[u8]) -> Hash256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Construction options shared by all header constructors.
#[derive(Debug, Clone)]
pub struct HeaderOptions {
    /// Chain the header belongs to.
    pub chain: Arc<ChainSpec>,
    /// Explicit hardfork context; resolved from the block number when unset.
    pub hardfork: Option<Hardfork>,
    /// Coerce the header into the chain's genesis shape.
    pub init_with_genesis_header: bool,
}

impl HeaderOptions {
    /// Options for a chain with number-derived hardfork context.
    pub fn for_chain(chain: Arc<ChainSpec>) -> Self {
        Self {
            chain,
            hardfork: None,
            init_with_genesis_header: false,
        }
    }

    /// Pin the hardfork context.
    pub fn with_hardfork(mut self, hardfork: Hardfork) -> Self {
        self.hardfork = Some(hardfork);
        self
    }

    /// Request genesis coercion.
    pub fn genesis(mut self) -> Self {
        self.init_with_genesis_header = true;
        self
    }
}

impl Default for HeaderOptions {
    fn default() -> Self {
        Self::for_chain(Arc::new(ChainSpec::mainnet()))
    }
}

/// Named header fields; absent fields take their canonical zero.
#[derive(Debug, Clone, Default)]
pub struct HeaderFields {
    pub parent_hash: Option<Hash256>,
    pub uncle_hash: Option<Hash256>,
    pub coinbase: Option<Address>,
    pub state_root: Option<Hash256>,
    pub transactions_root: Option<Hash256>,
    pub receipts_root: Option<Hash256>,
    pub logs_bloom: Option<Box<[u8; 256]>>,
    pub difficulty: Option<BigUint>,
    pub number: Option<BigUint>,
    pub gas_limit: Option<BigUint>,
    pub gas_used: Option<BigUint>,
    pub timestamp: Option<BigUint>,
    pub extra_data: Option<Vec<u8>>,
    pub mix_hash: Option<Hash256>,
    pub nonce: Option<[u8; 8]>,
}

/// An immutable block header.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    parent_hash: Hash256,
    uncle_hash: Hash256,
    coinbase: Address,
    state_root: Hash256,
    transactions_root: Hash256,
    receipts_root: Hash256,
    logs_bloom: Box<[u8; 256]>,
    difficulty: BigUint,
    number: BigUint,
    gas_limit: BigUint,
    gas_used: BigUint,
    timestamp: BigUint,
    extra_data: Vec<u8>,
    mix_hash: Hash256,
    nonce: [u8; 8],
    chain: Arc<ChainSpec>,
    hardfork: Hardfork,
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.raw() == other.raw()
    }
}

impl Eq for BlockHeader {}

impl BlockHeader {
    /// Build a header from named fields.
    pub fn from_fields(fields: HeaderFields, opts: HeaderOptions) -> ConsensusResult<Self> {
        let genesis = opts.chain.genesis();

        let mut number = fields.number.unwrap_or_else(BigUint::zero);
        let mut difficulty = fields.difficulty.unwrap_or_else(BigUint::zero);
        let mut gas_limit = fields
            .gas_limit
            .unwrap_or_else(|| BigUint::from(DEFAULT_GAS_LIMIT));
        let mut timestamp = fields.timestamp.unwrap_or_else(BigUint::zero);
        let mut extra_data = fields.extra_data.unwrap_or_default();
        let mut nonce = fields.nonce.unwrap_or([0u8; 8]);
        let mut state_root = fields.state_root.unwrap_or([0u8; 32]);

        if opts.init_with_genesis_header {
            number = BigUint::zero();
            let context = opts
                .hardfork
                .unwrap_or_else(|| opts.chain.active_hardfork_at(0));
            if context != Hardfork::Chainstart {
                return Err(ConsensusError::InvalidGenesisOption(context.to_string()));
            }
            if gas_limit == BigUint::from(DEFAULT_GAS_LIMIT) {
                gas_limit = genesis.gas_limit.clone();
            }
            if timestamp.is_zero() {
                timestamp = genesis.timestamp.clone();
            }
            if difficulty.is_zero() {
                difficulty = genesis.difficulty.clone();
            }
            if extra_data.is_empty() {
                extra_data = genesis.extra_data.clone();
            }
            if nonce == [0u8; 8] {
                nonce = genesis.nonce;
            }
            if state_root == [0u8; 32] {
                state_root = genesis.state_root;
            }
        }

        let number_u64 = biguint_to_u64_saturating(&number);
        let hardfork = opts
            .hardfork
            .unwrap_or_else(|| opts.chain.active_hardfork_at(number_u64));

        let header = Self {
            parent_hash: fields.parent_hash.unwrap_or([0u8; 32]),
            uncle_hash: fields.uncle_hash.unwrap_or(KECCAK256_RLP_ARRAY),
            coinbase: fields.coinbase.unwrap_or([0u8; 20]),
            state_root,
            transactions_root: fields.transactions_root.unwrap_or(KECCAK256_RLP),
            receipts_root: fields.receipts_root.unwrap_or(KECCAK256_RLP),
            logs_bloom: fields.logs_bloom.unwrap_or_else(|| Box::new([0u8; 256])),
            difficulty,
            number,
            gas_limit,
            gas_used: fields.gas_used.unwrap_or_else(BigUint::zero),
            timestamp,
            extra_data,
            mix_hash: fields.mix_hash.unwrap_or([0u8; 32]),
            nonce,
            chain: opts.chain,
            hardfork,
        };

        header.check_dao_extra_data()?;
        Ok(header)
    }

    /// Decode a header from its canonical RLP encoding.
    pub fn from_rlp_bytes(bytes: &[u8], opts: HeaderOptions) -> ConsensusResult<Self> {
        let item = rlp::decode(bytes)
            .map_err(|e| ConsensusError::MalformedHeader(format!("invalid rlp: {e}")))?;
        let values = match item {
            rlp::Item::List(items) => items
                .into_iter()
                .map(|it| it.into_bytes("header field"))
                .collect::<ConsensusResult<Vec<_>>>()
                .map_err(|e| ConsensusError::MalformedHeader(e.to_string()))?,
            rlp::Item::Bytes(_) => {
                return Err(ConsensusError::MalformedHeader(
                    "top-level item is not a sequence".into(),
                ))
            }
        };
        Self::from_values(values, opts)
    }

    /// Build a header from the 15-element positional value sequence.
    pub fn from_values(values: Vec<Vec<u8>>, opts: HeaderOptions) -> ConsensusResult<Self> {
        if values.len() > 15 {
            return Err(ConsensusError::MalformedHeader(format!(
                "sequence has {} elements, at most 15 allowed",
                values.len()
            )));
        }

        let mut values = values.into_iter();
        let fields = HeaderFields {
            parent_hash: next_fixed::<32>(&mut values, "parentHash")?,
            uncle_hash: next_fixed::<32>(&mut values, "uncleHash")?,
            coinbase: next_fixed::<20>(&mut values, "coinbase")?,
            state_root: next_fixed::<32>(&mut values, "stateRoot")?,
            transactions_root: next_fixed::<32>(&mut values, "transactionsTrie")?,
            receipts_root: next_fixed::<32>(&mut values, "receiptTrie")?,
            logs_bloom: next_fixed::<256>(&mut values, "bloom")?.map(Box::new),
            difficulty: next_numeric(&mut values),
            number: next_numeric(&mut values),
            gas_limit: next_numeric(&mut values),
            gas_used: next_numeric(&mut values),
            timestamp: next_numeric(&mut values),
            extra_data: values.next(),
            mix_hash: next_fixed::<32>(&mut values, "mixHash")?,
            nonce: next_fixed::<8>(&mut values, "nonce")?,
        };
        Self::from_fields(fields, opts)
    }

    /// Parse a header from its JSON form.
    pub fn from_json(json: &HeaderJson, opts: HeaderOptions) -> ConsensusResult<Self> {
        let fields = HeaderFields {
            parent_hash: Some(parse_fixed::<32>("parentHash", &json.parent_hash)?),
            uncle_hash: Some(parse_fixed::<32>("uncleHash", &json.uncle_hash)?),
            coinbase: Some(parse_fixed::<20>("coinbase", &json.coinbase)?),
            state_root: Some(parse_fixed::<32>("stateRoot", &json.state_root)?),
            transactions_root: Some(parse_fixed::<32>("transactionsTrie", &json.transactions_trie)?),
            receipts_root: Some(parse_fixed::<32>("receiptTrie", &json.receipt_trie)?),
            logs_bloom: Some(Box::new(parse_fixed::<256>("bloom", &json.bloom)?)),
            difficulty: Some(parse_numeric("difficulty", &json.difficulty)?),
            number: Some(parse_numeric("number", &json.number)?),
            gas_limit: Some(parse_numeric("gasLimit", &json.gas_limit)?),
            gas_used: Some(parse_numeric("gasUsed", &json.gas_used)?),
            timestamp: Some(parse_numeric("timestamp", &json.timestamp)?),
            extra_data: Some(parse_hex("extraData", &json.extra_data)?),
            mix_hash: Some(parse_fixed::<32>("mixHash", &json.mix_hash)?),
            nonce: Some(parse_fixed::<8>("nonce", &json.nonce)?),
        };
        Self::from_fields(fields, opts)
    }

    /// The 15-element positional sequence with minimal big-endian numerics.
    pub fn raw(&self) -> Vec<Vec<u8>> {
        vec![
            self.parent_hash.to_vec(),
            self.uncle_hash.to_vec(),
            self.coinbase.to_vec(),
            self.state_root.to_vec(),
            self.transactions_root.to_vec(),
            self.receipts_root.to_vec(),
            self.logs_bloom.to_vec(),
            biguint_minimal_be(&self.difficulty),
            biguint_minimal_be(&self.number),
            biguint_minimal_be(&self.gas_limit),
            biguint_minimal_be(&self.gas_used),
            biguint_minimal_be(&self.timestamp),
            self.extra_data.clone(),
            self.mix_hash.to_vec(),
            self.nonce.to_vec(),
        ]
    }

    /// Canonical RLP encoding of the header.
    pub fn serialize(&self) -> Vec<u8> {
        rlp::encode_value_list(&self.raw())
    }

    /// Canonical header hash.
    ///
    /// On clique chains the trailing seal bytes of extra-data are excluded
    /// for non-genesis headers, so a signature never covers itself.
    pub fn hash(&self) -> Hash256 {
        let mut items = self.raw();
        if self.chain.consensus_algorithm() == ConsensusAlgorithm::Clique && !self.is_genesis() {
            let cut = items[12].len().saturating_sub(CLIQUE_EXTRA_SEAL);
            items[12].truncate(cut);
        }
        keccak256(&rlp::encode_value_list(&items))
    }

    /// JSON form with 0x-prefixed hex fields.
    pub fn to_json(&self) -> HeaderJson {
        HeaderJson {
            parent_hash: hex_prefixed(&self.parent_hash),
            uncle_hash: hex_prefixed(&self.uncle_hash),
            coinbase: hex_prefixed(&self.coinbase),
            state_root: hex_prefixed(&self.state_root),
            transactions_trie: hex_prefixed(&self.transactions_root),
            receipt_trie: hex_prefixed(&self.receipts_root),
            bloom: hex_prefixed(self.logs_bloom.as_slice()),
            difficulty: hex_prefixed(&biguint_minimal_be(&self.difficulty)),
            number: hex_prefixed(&biguint_minimal_be(&self.number)),
            gas_limit: hex_prefixed(&biguint_minimal_be(&self.gas_limit)),
            gas_used: hex_prefixed(&biguint_minimal_be(&self.gas_used)),
            timestamp: hex_prefixed(&biguint_minimal_be(&self.timestamp)),
            extra_data: hex_prefixed(&self.extra_data),
            mix_hash: hex_prefixed(&self.mix_hash),
            nonce: hex_prefixed(&self.nonce),
        }
    }

    /// Whether this is the genesis header.
    pub fn is_genesis(&self) -> bool {
        self.number.is_zero()
    }

    /// Short hash prefix for log lines.
    pub fn short_id(&self) -> String {
        hex::encode(&self.hash()[..4])
    }

    pub fn parent_hash(&self) -> &Hash256 {
        &self.parent_hash
    }

    pub fn uncle_hash(&self) -> &Hash256 {
        &self.uncle_hash
    }

    pub fn coinbase(&self) -> &Address {
        &self.coinbase
    }

    pub fn state_root(&self) -> &Hash256 {
        &self.state_root
    }

    pub fn transactions_root(&self) -> &Hash256 {
        &self.transactions_root
    }

    pub fn receipts_root(&self) -> &Hash256 {
        &self.receipts_root
    }

    pub fn logs_bloom(&self) -> &[u8; 256] {
        &self.logs_bloom
    }

    pub fn difficulty(&self) -> &BigUint {
        &self.difficulty
    }

    pub fn number(&self) -> &BigUint {
        &self.number
    }

    /// Block number clamped to `u64::MAX`; schedule comparisons only.
    pub fn number_u64(&self) -> u64 {
        biguint_to_u64_saturating(&self.number)
    }

    pub fn gas_limit(&self) -> &BigUint {
        &self.gas_limit
    }

    pub fn gas_used(&self) -> &BigUint {
        &self.gas_used
    }

    pub fn timestamp(&self) -> &BigUint {
        &self.timestamp
    }

    pub fn extra_data(&self) -> &[u8] {
        &self.extra_data
    }

    pub fn mix_hash(&self) -> &Hash256 {
        &self.mix_hash
    }

    pub fn nonce(&self) -> &[u8; 8] {
        &self.nonce
    }

    /// Chain this header was constructed against.
    pub fn chain(&self) -> &Arc<ChainSpec> {
        &self.chain
    }

    /// Resolved hardfork context.
    pub fn hardfork(&self) -> Hardfork {
        self.hardfork
    }

    /// The ten blocks starting at the DAO fork block must carry the fork
    /// marker in extra-data.
    fn check_dao_extra_data(&self) -> ConsensusResult<()> {
        if !self.chain.is_hardfork_active(Hardfork::Dao) {
            return Ok(());
        }
        let dao_block = match self.chain.hardfork_block(Hardfork::Dao) {
            Some(block) => block,
            None => return Ok(()),
        };
        let number = match num_traits::ToPrimitive::to_u64(&self.number) {
            Some(n) => n,
            // Far beyond any transition window.
            None => return Ok(()),
        };
        if number >= dao_block
            && number - dao_block <= DAO_FORCE_EXTRA_DATA_RANGE
            && self.extra_data != DAO_EXTRA_DATA
        {
            return Err(ConsensusError::InvalidDAOExtraData {
                number: self.number.to_string(),
            });
        }
        Ok(())
    }
}

/// JSON representation of a header, fields as 0x-prefixed hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderJson {
    pub parent_hash: String,
    pub uncle_hash: String,
    pub coinbase: String,
    pub state_root: String,
    pub transactions_trie: String,
    pub receipt_trie: String,
    pub bloom: String,
    pub difficulty: String,
    pub number: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub timestamp: String,
    pub extra_data: String,
    pub mix_hash: String,
    pub nonce: String,
}

fn next_fixed<const N: usize>(
    values: &mut impl Iterator<Item = Vec<u8>>,
    field: &'static str,
) -> ConsensusResult<Option<[u8; N]>> {
    match values.next() {
        Some(bytes) => Ok(Some(require_width::<N>(field, &bytes)?)),
        None => Ok(None),
    }
}

fn next_numeric(values: &mut impl Iterator<Item = Vec<u8>>) -> Option<BigUint> {
    values.next().map(|bytes| BigUint::from_bytes_be(&bytes))
}

fn require_width<const N: usize>(field: &'static str, bytes: &[u8]) -> ConsensusResult<[u8; N]> {
    if bytes.len() != N {
        return Err(ConsensusError::InvalidFieldWidth {
            field,
            expected: N,
            got: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn parse_hex(field: &'static str, value: &str) -> ConsensusResult<Vec<u8>> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(stripped).map_err(|e| ConsensusError::Rlp(format!("{field}: invalid hex: {e}")))
}

fn parse_fixed<const N: usize>(field: &'static str, value: &str) -> ConsensusResult<[u8; N]> {
    let bytes = parse_hex(field, value)?;
    require_width::<N>(field, &bytes)
}

fn parse_numeric(field: &'static str, value: &str) -> ConsensusResult<BigUint> {
    let bytes = parse_hex(field, value)?;
    Ok(BigUint::from_bytes_be(&bytes))
}

fn hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Minimal big-endian encoding; zero encodes as empty bytes.
pub(crate) fn biguint_minimal_be(value: &BigUint) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_bytes_be()
    }
}

pub(crate) fn biguint_to_u64_saturating(value: &BigUint) -> u64 {
    num_traits::ToPrimitive::to_u64(value).unwrap_or(u64::MAX)
}
