//! Codec for the `DocumentUploaded` event.
//!
//! ```text
//! DocumentUploaded(uint256 indexed documentId, address indexed uploader,
//!                  uint256 indexed tokenId, string ipfsHash,
//!                  bytes32 documentHash, string fileName)
//! ```
//!
//! Indexed arguments travel in `topics[1..=3]`; the rest are ABI-encoded in the
//! log data as a head of three words (offset, bytes32, offset) followed by the
//! two length-prefixed, zero-padded strings.

use serde::{Deserialize, Serialize};

use provenance_core::{digest, Digest};

use crate::error::{CacheError, CacheResult};
use crate::ledger::{address_topic, uint_topic, LedgerLog};
use crate::record::{normalize_owner, DocumentRecord};

pub const DOCUMENT_UPLOADED_SIGNATURE: &str =
    "DocumentUploaded(uint256,address,uint256,string,bytes32,string)";

const WORD: usize = 32;

/// Topic 0 of every `DocumentUploaded` log.
pub fn document_uploaded_topic() -> Digest {
    digest(DOCUMENT_UPLOADED_SIGNATURE.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUploaded {
    pub document_id: u64,
    /// Lowercase `0x` address.
    pub uploader: String,
    pub token_id: u64,
    pub content_id: String,
    pub content_digest: Digest,
    pub filename: String,
}

impl DocumentUploaded {
    /// Decodes a log. Fails on a foreign signature or malformed data.
    pub fn decode(log: &LedgerLog) -> CacheResult<Self> {
        if log.topics.len() != 4 {
            return Err(CacheError::Decode(format!(
                "expected 4 topics, got {}",
                log.topics.len()
            )));
        }
        if log.topics[0] != document_uploaded_topic() {
            return Err(CacheError::Decode(format!(
                "unexpected event signature {}",
                log.topics[0]
            )));
        }

        let document_id = word_to_u64(log.topics[1].as_bytes(), "documentId")?;
        let uploader = word_to_address(log.topics[2].as_bytes())?;
        let token_id = word_to_u64(log.topics[3].as_bytes(), "tokenId")?;

        let data = &log.data;
        let content_id = read_string(data, read_offset(data, 0)?)?;
        let content_digest = Digest::from_bytes(word_at(data, WORD)?);
        let filename = read_string(data, read_offset(data, 2 * WORD)?)?;

        Ok(Self {
            document_id,
            uploader,
            token_id,
            content_id,
            content_digest,
            filename,
        })
    }

    /// Encodes the event as it would be emitted by `contract`.
    pub fn encode(&self, contract: &str) -> CacheResult<LedgerLog> {
        let topics = vec![
            document_uploaded_topic(),
            uint_topic(self.document_id),
            address_topic(&self.uploader)?,
            uint_topic(self.token_id),
        ];

        let content_id = encode_string(&self.content_id);
        let head_len = 3 * WORD;

        let mut data = Vec::with_capacity(head_len + content_id.len() + 2 * WORD + self.filename.len());
        data.extend_from_slice(&usize_word(head_len));
        data.extend_from_slice(self.content_digest.as_bytes());
        data.extend_from_slice(&usize_word(head_len + content_id.len()));
        data.extend_from_slice(&content_id);
        data.extend_from_slice(&encode_string(&self.filename));

        Ok(LedgerLog {
            address: contract.to_string(),
            topics,
            data,
        })
    }

    pub fn into_record(self, tx_ref: &str, block_height: u64, timestamp: u64) -> DocumentRecord {
        DocumentRecord {
            owner: normalize_owner(&self.uploader),
            record_id: self.document_id,
            filename: self.filename,
            content_id: self.content_id,
            content_digest: self.content_digest,
            token_id: self.token_id,
            timestamp,
            tx_ref: tx_ref.to_string(),
            block_height,
        }
    }
}

fn word_at(data: &[u8], at: usize) -> CacheResult<[u8; WORD]> {
    let end = at
        .checked_add(WORD)
        .ok_or_else(|| CacheError::Decode("offset overflow".to_string()))?;
    data.get(at..end)
        .and_then(|w| w.try_into().ok())
        .ok_or_else(|| CacheError::Decode(format!("data too short for word at {}", at)))
}

fn word_to_u64(word: &[u8; WORD], field: &str) -> CacheResult<u64> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(CacheError::Decode(format!("{} does not fit in 64 bits", field)));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(tail))
}

fn word_to_address(word: &[u8; WORD]) -> CacheResult<String> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(CacheError::Decode("address topic is not left-padded".to_string()));
    }
    Ok(format!("0x{}", hex::encode(&word[12..])))
}

fn read_offset(data: &[u8], at: usize) -> CacheResult<usize> {
    let offset = word_to_u64(&word_at(data, at)?, "offset")?;
    usize::try_from(offset).map_err(|_| CacheError::Decode(format!("offset {} too large", offset)))
}

fn read_string(data: &[u8], offset: usize) -> CacheResult<String> {
    let len = word_to_u64(&word_at(data, offset)?, "string length")?;
    let len = usize::try_from(len).map_err(|_| CacheError::Decode("string too long".to_string()))?;
    let start = offset + WORD;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| CacheError::Decode(format!("string at {} runs past data", offset)))?;
    String::from_utf8(bytes.to_vec()).map_err(|e| CacheError::Decode(format!("string is not UTF-8: {}", e)))
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

fn encode_string(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(WORD + padded);
    out.extend_from_slice(&usize_word(bytes.len()));
    out.extend_from_slice(bytes);
    out.resize(WORD + padded, 0);
    out
}
