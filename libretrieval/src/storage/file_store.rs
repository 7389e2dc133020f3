use crate::storage::traits::{DealRecord, DealStore};
use log::*;
use ron::ser::PrettyConfig;
use std::fs;
use std::path::PathBuf;

/// A file-based store for deal records.
///
/// Each deal is saved in its own file named after the record, e.g. `client-42.ron`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates a new file store, creating the directory at `path` if needed.
    pub fn new(path: PathBuf) -> Result<Self, std::io::Error> {
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl<S: DealRecord> DealStore<S> for FileStore {
    fn write_deal(&self, state: &S) -> Result<(), anyhow::Error> {
        let file_path = self.path.join(format!("{}.ron", state.store_name()));
        let config = PrettyConfig::new().compact_arrays(true).compact_maps(true);
        let val = ron::ser::to_string_pretty(state, config)?;
        fs::write(&file_path, &val)?;
        Ok(())
    }

    fn load_deal(&self, name: &str) -> Result<S, anyhow::Error> {
        let file_path = self.path.join(format!("{name}.ron"));
        let val = fs::read_to_string(&file_path)?;
        let state: S = ron::de::from_str(&val)?;
        Ok(state)
    }

    fn load_all(&self) -> Result<Vec<S>, anyhow::Error> {
        let mut deals = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ron") {
                continue;
            }
            match fs::read_to_string(&path).map_err(anyhow::Error::from).and_then(|s| Ok(ron::de::from_str::<S>(&s)?)) {
                Ok(deal) => deals.push(deal),
                Err(e) => info!("Skipping {}, which is not a valid deal record: {e}", path.display()),
            }
        }
        Ok(deals)
    }

    fn delete_deal(&self, name: &str) -> Result<(), anyhow::Error> {
        let file_path = self.path.join(format!("{name}.ron"));
        match fs::remove_file(&file_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
