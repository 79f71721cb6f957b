//! Common Types Module
//!
//! 파이프라인 전반에서 사용되는 공통 타입 정의
//!
//! - `Bytes32`: 32바이트 digest (model hash, commitment, claims hash)
//! - `FieldElement`: proof public signal 하나 (BN254 scalar field, big-endian)
//! - `ModelId`: 등록된 모델 식별자

use std::fmt;
use std::str::FromStr;

use ethers::types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// BN254 scalar field modulus (big-endian)
///
/// r = 21888242871839275222246405745257275088548364400416034343698204186575808495617
pub const BN254_SCALAR_MODULUS: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

/// 32바이트 digest
///
/// 직렬화 형식: `0x` + 64자리 lowercase hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bytes32(pub [u8; 32]);

impl Bytes32 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("expected 32 bytes, got {}", bytes.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Bytes32 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        if raw.len() != 64 {
            return Err(format!("expected 64 hex characters, got {}", raw.len()));
        }
        let bytes = hex::decode(raw).map_err(|e| format!("invalid hex: {}", e))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Public signal 하나
///
/// # Design Decision
///
/// 파싱 단계에서는 256비트 범위만 확인하고 field 범위는 확인하지 않음
/// → "field 밖의 값"은 verifier가 `MalformedProof`로 구분해서 거절해야 하기 때문
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldElement(pub [u8; 32]);

impl FieldElement {
    pub fn from_u64(value: u64) -> Self {
        Self::from_u256(U256::from(value))
    }

    pub fn from_u256(value: U256) -> Self {
        let mut bytes = [0u8; 32];
        value.to_big_endian(&mut bytes);
        Self(bytes)
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// 값이 BN254 scalar field 안에 있는지 (< r)
    pub fn is_canonical(&self) -> bool {
        self.0 < BN254_SCALAR_MODULUS
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_u256())
    }
}

impl FromStr for FieldElement {
    type Err = String;

    /// 10진수 또는 `0x` hex 문자열
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = match s.strip_prefix("0x") {
            Some(raw) => {
                U256::from_str_radix(raw, 16).map_err(|_| format!("Invalid hex number: {}", s))?
            }
            None => U256::from_dec_str(s).map_err(|_| format!("Invalid number: {}", s))?,
        };
        Ok(Self::from_u256(value))
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 모델 식별자
///
/// 허용 문자: ASCII 영숫자, `.`, `_`, `-` (1~64자)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    pub const MAX_LEN: usize = 64;

    pub fn new(id: &str) -> Result<Self, String> {
        if id.is_empty() || id.len() > Self::MAX_LEN {
            return Err(format!("model id must be 1..={} characters", Self::MAX_LEN));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(format!("model id contains invalid characters: {}", id));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModelId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.0
    }
}

/// 18 decimals 고정소수점 단위 (1.0 = 10^18)
pub fn wad(whole: u64) -> U256 {
    U256::from(whole) * U256::exp10(18)
}

/// `Vec<u8>` <-> `0x` hex 문자열 serde helper
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}
