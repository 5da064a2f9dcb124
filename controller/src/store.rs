use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use irrigation_common::{
    error::{FlashError, StoreError},
    hal::{FlashWriter, KeyValueStore},
    RuntimeConfig,
};
use tracing::{info, warn};

const STATE_FILE: &str = "state.json";
const RUNTIME_FILE: &str = "runtime.json";
const IMAGE_FILE: &str = "firmware.bin";
const PARTIAL_IMAGE_FILE: &str = "firmware.bin.part";

/// Size of the inactive image slot on the reference board.
pub const IMAGE_SLOT_BYTES: u64 = 1_966_080;

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

pub fn data_dir() -> PathBuf {
    std::env::var("IRRIGATION_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.irrigation"))
}

pub fn load_runtime_config(data_dir: &Path) -> anyhow::Result<RuntimeConfig> {
    let path = data_dir.join(RUNTIME_FILE);
    match fs::read(&path) {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

/// Namespaced key-value pairs kept in one JSON document. Clones share the
/// same file lock, so the portal and the device loop can both hold one.
#[derive(Clone)]
pub struct JsonFileStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: Arc::new(data_dir.join(STATE_FILE)),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn read_all(&self) -> Result<Namespaces, StoreError> {
        match fs::read(self.path.as_ref()) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt {
                key: STATE_FILE.to_string(),
                reason: err.to_string(),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Namespaces::new()),
            Err(err) => Err(StoreError::Unavailable(err.to_string())),
        }
    }

    fn write_all(&self, namespaces: &Namespaces) -> Result<(), StoreError> {
        let unavailable = |err: std::io::Error| StoreError::Unavailable(err.to_string());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(unavailable)?;
        }
        let payload = serde_json::to_vec_pretty(namespaces)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, payload).map_err(unavailable)?;
        fs::rename(&staging, self.path.as_ref()).map_err(unavailable)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        let namespaces = self.read_all()?;
        Ok(namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn set(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        let mut namespaces = self.read_all()?;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.write_all(&namespaces)
    }
}

struct StagedImage {
    file: File,
    expected: u64,
    written: u64,
}

/// Image slot backed by a file in the data directory. The partial image is
/// renamed into place only once every declared byte has arrived.
pub struct FileFlash {
    dir: PathBuf,
    capacity: u64,
    staged: Option<StagedImage>,
}

impl FileFlash {
    pub fn new(dir: &Path, capacity: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            capacity,
            staged: None,
        }
    }

    fn partial_path(&self) -> PathBuf {
        self.dir.join(PARTIAL_IMAGE_FILE)
    }
}

impl FlashWriter for FileFlash {
    fn free_space(&self) -> u64 {
        self.capacity
    }

    fn begin(&mut self, size: u64) -> Result<(), FlashError> {
        if size > self.capacity {
            return Err(FlashError::NoMemory(size));
        }
        self.abort();
        fs::create_dir_all(&self.dir).map_err(|err| FlashError::Write(err.to_string()))?;
        let file =
            File::create(self.partial_path()).map_err(|err| FlashError::Write(err.to_string()))?;
        self.staged = Some(StagedImage {
            file,
            expected: size,
            written: 0,
        });
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize, FlashError> {
        let staged = self
            .staged
            .as_mut()
            .ok_or_else(|| FlashError::Write("no image staged".to_string()))?;
        let room = staged.expected.saturating_sub(staged.written);
        let accepted = chunk.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        staged
            .file
            .write_all(&chunk[..accepted])
            .map_err(|err| FlashError::Write(err.to_string()))?;
        staged.written += accepted as u64;
        Ok(accepted)
    }

    fn abort(&mut self) {
        if self.staged.take().is_some() {
            if let Err(err) = fs::remove_file(self.partial_path()) {
                warn!("failed to discard partial image: {err}");
            }
        }
    }

    fn finish(&mut self) -> Result<bool, FlashError> {
        let Some(mut staged) = self.staged.take() else {
            return Err(FlashError::Finalize("no image staged".to_string()));
        };
        staged
            .file
            .flush()
            .map_err(|err| FlashError::Finalize(err.to_string()))?;
        if staged.written != staged.expected {
            let _ = fs::remove_file(self.partial_path());
            return Ok(false);
        }
        fs::rename(self.partial_path(), self.dir.join(IMAGE_FILE))
            .map_err(|err| FlashError::Finalize(err.to_string()))?;
        info!("staged firmware image ({} bytes)", staged.written);
        Ok(true)
    }
}
