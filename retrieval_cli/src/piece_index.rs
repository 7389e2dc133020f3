use crate::error::SettingsError;
use cid::Cid;
use libretrieval::node::{PieceInfo, PieceLookup, PieceLookupError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// The payloads a node serves and the pieces they live in. Stored in the settings file keyed by payload CID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, PieceInfo>", into = "BTreeMap<String, PieceInfo>")]
pub struct PieceIndex {
    pieces: BTreeMap<Cid, PieceInfo>,
}

impl PieceIndex {
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn get(&self, payload: &Cid) -> Option<&PieceInfo> {
        self.pieces.get(payload)
    }

    pub fn insert(&mut self, payload: Cid, piece: PieceInfo) -> Option<PieceInfo> {
        self.pieces.insert(payload, piece)
    }

    pub fn remove(&mut self, payload: &Cid) -> Option<PieceInfo> {
        self.pieces.remove(payload)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Cid, &PieceInfo)> {
        self.pieces.iter()
    }
}

impl TryFrom<BTreeMap<String, PieceInfo>> for PieceIndex {
    type Error = SettingsError;

    fn try_from(value: BTreeMap<String, PieceInfo>) -> Result<Self, Self::Error> {
        let pieces = value
            .into_iter()
            .map(|(payload, piece)| {
                let payload = Cid::from_str(&payload).map_err(|_| SettingsError::InvalidCid(payload))?;
                Ok((payload, piece))
            })
            .collect::<Result<_, SettingsError>>()?;
        Ok(PieceIndex { pieces })
    }
}

impl From<PieceIndex> for BTreeMap<String, PieceInfo> {
    fn from(index: PieceIndex) -> Self {
        index.pieces.into_iter().map(|(payload, piece)| (payload.to_string(), piece)).collect()
    }
}

impl PieceLookup for PieceIndex {
    async fn get_piece_info(&self, payload: &Cid, piece: Option<&Cid>) -> Result<PieceInfo, PieceLookupError> {
        match (self.pieces.get(payload), piece) {
            (Some(info), Some(wanted)) if &info.piece_cid != wanted => Err(PieceLookupError::NotFound),
            (Some(info), _) => Ok(info.clone()),
            (None, _) => Err(PieceLookupError::NotFound),
        }
    }
}
