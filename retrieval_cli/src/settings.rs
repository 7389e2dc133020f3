use crate::error::SettingsError;
use crate::piece_index::PieceIndex;
use libretrieval::payment::Address;
use libretrieval::policy::Ask;
use retrieval_p2p::PeerIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Everything a node keeps between runs: who it is, what it charges and what it can serve.
#[derive(Debug, Deserialize, Serialize)]
pub struct LocalSettings {
    #[serde(default)]
    pub identities: HashMap<String, PeerIdentity>,
    #[serde(default)]
    pub ask: Ask,
    #[serde(default = "default_payment_address")]
    pub payment_address: Address,
    #[serde(default)]
    pub pieces: PieceIndex,
}

impl Default for LocalSettings {
    fn default() -> Self {
        LocalSettings {
            identities: HashMap::new(),
            ask: Ask::default(),
            payment_address: default_payment_address(),
            pieces: PieceIndex::default(),
        }
    }
}

fn default_payment_address() -> Address {
    Address::new("t0100")
}

impl LocalSettings {
    pub fn try_load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, SettingsError> {
        let settings = load_config_file(path)?;
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        save_config_file(path, self)
    }

    pub fn has_identities(&self) -> bool {
        !self.identities.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.identities.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&PeerIdentity> {
        self.identities.get(id)
    }

    pub fn insert(&mut self, identity: PeerIdentity) -> Option<PeerIdentity> {
        self.identities.insert(identity.name().to_string(), identity)
    }

    pub fn remove<S: AsRef<str>>(&mut self, id: S) -> Option<PeerIdentity> {
        self.identities.remove(id.as_ref())
    }

    /// The named identity, or when no name is given, the first alphabetically.
    pub fn select_identity(&self, name: Option<&str>) -> Option<&PeerIdentity> {
        match name {
            Some(name) => self.get(name),
            None => self.identities.keys().min().and_then(|k| self.identities.get(k)),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".retrieval");
    home.push("config.yml");
    home
}

pub fn load_config_file<P: AsRef<Path>>(path: Option<P>) -> Result<LocalSettings, SettingsError> {
    let path = path.map(|p| p.as_ref().to_path_buf()).unwrap_or_else(default_config_path);
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let settings = serde_yml::from_reader(reader)?;
    Ok(settings)
}

pub fn save_config_file<P: AsRef<Path>>(path: P, settings: &LocalSettings) -> Result<(), SettingsError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    serde_yml::to_writer(writer, settings)?;
    Ok(())
}
