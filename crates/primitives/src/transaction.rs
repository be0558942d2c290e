//! Transaction types and serialization.

use dagd_consensus::{Amount, CoinId, Hash256};

use crate::encoding::{varint_len, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::{OutPoint, OUTPOINT_SIZE};

pub const TX_VERSION: u32 = 1;

/// Transaction kinds recognised by the chain.
///
/// Token governance transactions manage the lifecycle of non-native coins;
/// `TokenMint`/`TokenUnmint` move supply in and out of circulation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TxType {
    Regular,
    Coinbase,
    TokenNew,
    TokenRenew,
    TokenValidate,
    TokenInvalidate,
    TokenMint,
    TokenUnmint,
}

impl TxType {
    pub fn as_u16(self) -> u16 {
        match self {
            TxType::Regular => 0x0000,
            TxType::Coinbase => 0x0001,
            TxType::TokenNew => 0x0100,
            TxType::TokenRenew => 0x0101,
            TxType::TokenValidate => 0x0102,
            TxType::TokenInvalidate => 0x0103,
            TxType::TokenMint => 0x0104,
            TxType::TokenUnmint => 0x0105,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0000 => TxType::Regular,
            0x0001 => TxType::Coinbase,
            0x0100 => TxType::TokenNew,
            0x0101 => TxType::TokenRenew,
            0x0102 => TxType::TokenValidate,
            0x0103 => TxType::TokenInvalidate,
            0x0104 => TxType::TokenMint,
            0x0105 => TxType::TokenUnmint,
            _ => return None,
        })
    }

    pub fn is_token(self) -> bool {
        self.as_u16() & 0xff00 == 0x0100
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxType::Regular => "regular",
            TxType::Coinbase => "coinbase",
            TxType::TokenNew => "token-new",
            TxType::TokenRenew => "token-renew",
            TxType::TokenValidate => "token-validate",
            TxType::TokenInvalidate => "token-invalidate",
            TxType::TokenMint => "token-mint",
            TxType::TokenUnmint => "token-unmint",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn serialized_size(&self) -> usize {
        OUTPOINT_SIZE + varint_len(self.script_sig.len() as u64) + self.script_sig.len() + 4
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxOut {
    pub value: Amount,
    pub coin_id: CoinId,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    /// Value, coin id, and length-prefixed script.
    pub fn serialized_size(&self) -> usize {
        8 + 2 + varint_len(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_u16_le(self.coin_id);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let coin_id = decoder.read_u16_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            coin_id,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub version: u32,
    pub tx_type: TxType,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
    /// Height at which the transaction stops being minable; zero means never.
    pub expire: u64,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(self.serialized_size());
        Encodable::consensus_encode(self, &mut encoder);
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }

    pub fn serialized_size(&self) -> usize {
        let inputs: usize = self.vin.iter().map(TxIn::serialized_size).sum();
        let outputs: usize = self.vout.iter().map(TxOut::serialized_size).sum();
        4 + 2
            + varint_len(self.vin.len() as u64)
            + inputs
            + varint_len(self.vout.len() as u64)
            + outputs
            + 4
            + 8
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_type == TxType::Coinbase && self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    /// The coinbase extra nonce is carried in its only signature script.
    pub fn extra_nonce(&self) -> Option<&[u8]> {
        if !self.is_coinbase() {
            return None;
        }
        Some(self.vin[0].script_sig.as_slice())
    }

    pub fn set_extra_nonce(&mut self, script: Vec<u8>) -> bool {
        if !self.is_coinbase() {
            return false;
        }
        self.vin[0].script_sig = script;
        true
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.version);
        encoder.write_u16_le(self.tx_type.as_u16());
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
        encoder.write_u64_le(self.expire);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_u32_le()?;
        let tx_type = TxType::from_u16(decoder.read_u16_le()?)
            .ok_or(DecodeError::InvalidData("unknown transaction type"))?;
        let input_count = decoder.read_count(OUTPOINT_SIZE + 5)?;
        let mut vin = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            vin.push(TxIn::consensus_decode(decoder)?);
        }
        let output_count = decoder.read_count(11)?;
        let mut vout = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        let expire = decoder.read_u64_le()?;
        Ok(Self {
            version,
            tx_type,
            vin,
            vout,
            lock_time,
            expire,
        })
    }
}
