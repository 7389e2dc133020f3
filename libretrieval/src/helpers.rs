use cid::Cid;
use libp2p::PeerId;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Multicodec for raw binary blocks.
pub const RAW_CODEC: u64 = 0x55;

/// The CIDv1 of a raw block, hashed with blake2b-256.
pub fn raw_cid(data: &[u8]) -> Cid {
    Cid::new_v1(RAW_CODEC, Code::Blake2b256.digest(data))
}

pub fn to_hex<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    hex::encode(bytes).serialize(s)
}

pub fn from_hex<'de, D>(de: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let hex_str = String::deserialize(de)?;
    hex::decode(hex_str).map_err(|e| serde::de::Error::custom(format!("Invalid hex string: {e}")))
}

/// Serialize a CID using its canonical string form.
pub fn serialize_cid<S>(cid: &Cid, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&cid.to_string())
}

pub fn deserialize_cid<'de, D>(de: D) -> Result<Cid, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(de)?;
    Cid::from_str(&s).map_err(|e| serde::de::Error::custom(format!("Invalid CID {s}: {e}")))
}

pub fn serialize_opt_cid<S>(cid: &Option<Cid>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    cid.as_ref().map(|c| c.to_string()).serialize(s)
}

pub fn deserialize_opt_cid<'de, D>(de: D) -> Result<Option<Cid>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(de)?;
    s.map(|s| Cid::from_str(&s).map_err(|e| serde::de::Error::custom(format!("Invalid CID {s}: {e}"))))
        .transpose()
}

pub fn serialize_peer<S>(id: &PeerId, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&hex::encode(id.to_bytes()))
}

pub fn deserialize_peer<'de, D>(d: D) -> Result<PeerId, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(d)?;
    let bytes = hex::decode(encoded).map_err(serde::de::Error::custom)?;
    PeerId::from_bytes(&bytes).map_err(serde::de::Error::custom)
}
