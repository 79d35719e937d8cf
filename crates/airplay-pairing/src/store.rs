//! Persistent pairing records.
//!
//! One JSON document holds our controller identity and the long-term keys of
//! every receiver we completed Pair-Setup with. Keys are hex encoded.

use crate::controller::ControllerIdentity;
use airplay_core::error::{FormatError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroize;

/// A receiver's long-term identity, learned in Pair-Setup M6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedReceiver {
    pub identifier: String,
    pub ltpk: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct StoredController {
    id: String,
    seed: String,
}

#[derive(Serialize, Deserialize)]
struct StoredReceiver {
    identifier: String,
    ltpk: String,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    controller: StoredController,
    #[serde(default)]
    receivers: BTreeMap<String, StoredReceiver>,
}

/// Controller identity plus paired receivers, optionally backed by a file.
pub struct PairingStore {
    path: Option<PathBuf>,
    controller: ControllerIdentity,
    receivers: BTreeMap<String, PairedReceiver>,
}

impl PairingStore {
    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            controller: ControllerIdentity::generate(),
            receivers: BTreeMap::new(),
        }
    }

    /// Load `path`, or create it with a fresh controller identity.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            Self::load(&path)
        } else {
            let store = Self {
                path: Some(path),
                controller: ControllerIdentity::generate(),
                receivers: BTreeMap::new(),
            };
            store.save()?;
            info!(
                "Created pairing store for controller {}",
                store.controller.id()
            );
            Ok(store)
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: StoreFile = serde_json::from_str(&contents)
            .map_err(|e| FormatError::InvalidFormat(format!("pairing store: {}", e)))?;

        let mut seed = decode_key(&file.controller.seed, "controller seed")?;
        let controller = ControllerIdentity::from_seed(file.controller.id, &seed);
        seed.zeroize();

        let mut receivers = BTreeMap::new();
        for (key, stored) in file.receivers {
            let ltpk = decode_key(&stored.ltpk, "receiver ltpk")?;
            receivers.insert(
                key,
                PairedReceiver {
                    identifier: stored.identifier,
                    ltpk,
                },
            );
        }

        debug!(
            "Loaded pairing store {} ({} receivers)",
            path.display(),
            receivers.len()
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            controller,
            receivers,
        })
    }

    /// Write the store back to its file. No-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = StoreFile {
            controller: StoredController {
                id: self.controller.id().to_string(),
                seed: hex::encode(self.controller.seed()),
            },
            receivers: self
                .receivers
                .iter()
                .map(|(key, receiver)| {
                    (
                        key.clone(),
                        StoredReceiver {
                            identifier: receiver.identifier.clone(),
                            ltpk: hex::encode(receiver.ltpk),
                        },
                    )
                })
                .collect(),
        };

        let json = serde_json::to_string_pretty(&file);
        file.controller.seed.zeroize();
        let mut json =
            json.map_err(|e| FormatError::InvalidFormat(format!("pairing store: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &json)?;
        json.zeroize();
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn controller(&self) -> &ControllerIdentity {
        &self.controller
    }

    pub fn get(&self, receiver: &str) -> Option<&PairedReceiver> {
        self.receivers.get(receiver)
    }

    pub fn is_paired(&self, receiver: &str) -> bool {
        self.receivers.contains_key(receiver)
    }

    /// Record a successful Pair-Setup and persist it.
    pub fn insert(&mut self, receiver: impl Into<String>, paired: PairedReceiver) -> Result<()> {
        let receiver = receiver.into();
        info!("Stored pairing for {} ({})", receiver, paired.identifier);
        self.receivers.insert(receiver, paired);
        self.save()
    }

    /// Forget a receiver. Returns whether it was known.
    pub fn remove(&mut self, receiver: &str) -> Result<bool> {
        let removed = self.receivers.remove(receiver).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn receivers(&self) -> impl Iterator<Item = (&str, &PairedReceiver)> {
        self.receivers.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn decode_key(hex_str: &str, what: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str).map_err(|_| FormatError::InvalidHex(what.to_string()))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        FormatError::InvalidValue(format!("{} must be 32 bytes, got {}", what, bytes.len())).into()
    })
}
