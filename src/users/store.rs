//! The durable user store: an append-only, encrypted write-ahead log layered
//! over a compressed, AES-GCM-sealed snapshot.
//!
//! Snapshot layout: magic `AMFTPDBUS`, one version byte, a 32-byte copy of
//! the salt, 16 reserved bytes, then `nonce || ciphertext || tag` over the
//! LZ4-compressed JSON record sequence. The WAL is a sequence of
//! `(type, len, nonce || ciphertext || tag)` entries; replaying snapshot
//! plus WAL in order always reproduces the authoritative map. Compaction
//! writes a fresh snapshot to a temp file, fsyncs, renames it into place and
//! only then truncates the WAL.

use super::crypto::{self, CryptoError};
use super::Account;
use notify::{RecursiveMode, Watcher};
use slog::Logger;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;

const MAGIC: &[u8; 9] = b"AMFTPDBUS";
const VERSION: u8 = 1;
const RESERVED_LEN: usize = 16;
/// Default WAL size that triggers compaction.
pub const DEFAULT_WAL_COMPACT_BYTES: u64 = 5 * 1024 * 1024;

const ENTRY_ADD: u8 = 1;
const ENTRY_UPDATE: u8 = 2;
const ENTRY_DELETE: u8 = 3;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying file I/O failed.
    #[error("user store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot or WAL contents could not be decrypted or parsed.
    #[error("user store is corrupt: {0}")]
    Corrupt(String),
    /// Crypto layer failure.
    #[error("user store crypto error: {0}")]
    Crypto(#[from] CryptoError),
    /// `try_add` for a name that already exists.
    #[error("user '{0}' already exists")]
    AlreadyExists(String),
    /// `try_update`/`try_delete` for an unknown name.
    #[error("no such user '{0}'")]
    NoSuchUser(String),
}

/// Errors produced by [`UserStore::try_authenticate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown user name.
    #[error("unknown user")]
    UnknownUser,
    /// Password did not verify.
    #[error("bad password")]
    BadPassword,
    /// The account is at its concurrent-login limit.
    #[error("too many concurrent logins")]
    ExceedsConcurrentLimit,
}

/// Tunables for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Snapshot path; `<path>.wal` and `<path>.salt` live alongside.
    pub path: PathBuf,
    /// Secret the snapshot key is derived from.
    pub secret: String,
    /// WAL size that triggers compaction.
    pub wal_compact_bytes: u64,
}

// Everything serialized under the single write mutex.
struct WriteState {
    wal: File,
    wal_len: u64,
}

/// The user store. Reads are lock-free clones of an `Arc`'d map; all writes
/// serialize under one mutex, appending to the WAL before touching the map.
pub struct UserStore {
    config: StoreConfig,
    key: [u8; crypto::KEY_LEN],
    salt: [u8; crypto::SALT_LEN],
    current: RwLock<Arc<HashMap<String, Account>>>,
    write: Mutex<WriteState>,
    active_logins: StdMutex<HashMap<String, u32>>,
    logger: Logger,
    // Keeps the filesystem watcher alive for the lifetime of the store.
    watcher: StdMutex<Option<notify::RecommendedWatcher>>,
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore").field("path", &self.config.path).finish()
    }
}

impl UserStore {
    /// Open (or initialize) the store. A missing snapshot is synthesized as
    /// a single `admin:admin` administrator and persisted immediately; an
    /// existing WAL is replayed in order on top of the snapshot.
    pub fn open(config: StoreConfig, logger: Logger) -> Result<Arc<UserStore>, StoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let salt = load_or_create_salt(&salt_path(&config.path))?;
        let key = crypto::derive_store_key(&config.secret, &salt);

        let map = match load_snapshot(&config.path, &key, &salt)? {
            Some(map) => map,
            None => {
                let admin = Account::default_admin();
                let mut map = HashMap::new();
                map.insert(admin.key(), admin);
                write_snapshot(&config.path, &key, &salt, &map)?;
                map
            }
        };

        let wal_file = OpenOptions::new().create(true).append(true).read(true).open(wal_path(&config.path))?;
        let wal_len = wal_file.metadata()?.len();
        let mut map = map;
        let replayed = replay_wal(&wal_path(&config.path), &key, &mut map, &logger)?;
        if replayed > 0 {
            slog::info!(logger, "replayed {} WAL entries", replayed);
        }

        Ok(Arc::new(UserStore {
            config,
            key,
            salt,
            current: RwLock::new(Arc::new(map)),
            write: Mutex::new(WriteState { wal: wal_file, wal_len }),
            active_logins: StdMutex::new(HashMap::new()),
            logger,
            watcher: StdMutex::new(None),
        }))
    }

    /// Lock-free snapshot of the whole map.
    fn snapshot(&self) -> Arc<HashMap<String, Account>> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn install(&self, map: HashMap<String, Account>) {
        let map = Arc::new(map);
        match self.current.write() {
            Ok(mut guard) => *guard = map,
            Err(poisoned) => *poisoned.into_inner() = map,
        }
    }

    /// Look up an account by name (case-insensitive).
    pub fn find(&self, name: &str) -> Option<Account> {
        self.snapshot().get(&name.to_lowercase()).cloned()
    }

    /// All accounts, sorted by name.
    pub fn all(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.snapshot().values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        accounts
    }

    /// Verify credentials and, on success, atomically claim a login slot.
    /// The caller must pair this with [`UserStore::on_logout`].
    pub fn try_authenticate(&self, name: &str, password: &str) -> Result<Account, AuthError> {
        let account = self.find(name).ok_or(AuthError::UnknownUser)?;
        if !crypto::verify_password(password, &account.password) {
            return Err(AuthError::BadPassword);
        }
        let mut logins = lock_unpoisoned(&self.active_logins);
        let count = logins.entry(account.key()).or_insert(0);
        if account.max_logins > 0 && *count >= account.max_logins {
            return Err(AuthError::ExceedsConcurrentLimit);
        }
        *count += 1;
        Ok(account)
    }

    /// Release a login slot; saturates at zero.
    pub fn on_logout(&self, name: &str) {
        let mut logins = lock_unpoisoned(&self.active_logins);
        if let Some(count) = logins.get_mut(&name.to_lowercase()) {
            *count = count.saturating_sub(1);
        }
    }

    /// Current login count for a user.
    pub fn active_logins(&self, name: &str) -> u32 {
        lock_unpoisoned(&self.active_logins).get(&name.to_lowercase()).copied().unwrap_or(0)
    }

    /// Add a new account. Fails if the name is taken.
    pub async fn try_add(&self, account: Account) -> Result<(), StoreError> {
        let mut write = self.write.lock().await;
        let map = self.snapshot();
        if map.contains_key(&account.key()) {
            return Err(StoreError::AlreadyExists(account.name));
        }
        self.append_entry(&mut write, ENTRY_ADD, &serde_json::to_vec(&account).map_err(corrupt)?)?;
        let mut next = (*map).clone();
        next.insert(account.key(), account);
        self.install(next);
        self.maybe_compact(&mut write)
    }

    /// Replace an existing account.
    pub async fn try_update(&self, account: Account) -> Result<(), StoreError> {
        let mut write = self.write.lock().await;
        let map = self.snapshot();
        if !map.contains_key(&account.key()) {
            return Err(StoreError::NoSuchUser(account.name));
        }
        self.append_entry(&mut write, ENTRY_UPDATE, &serde_json::to_vec(&account).map_err(corrupt)?)?;
        let mut next = (*map).clone();
        next.insert(account.key(), account);
        self.install(next);
        self.maybe_compact(&mut write)
    }

    /// Delete an account by name.
    pub async fn try_delete(&self, name: &str) -> Result<(), StoreError> {
        let mut write = self.write.lock().await;
        let map = self.snapshot();
        let key = name.to_lowercase();
        if !map.contains_key(&key) {
            return Err(StoreError::NoSuchUser(name.to_string()));
        }
        self.append_entry(&mut write, ENTRY_DELETE, key.as_bytes())?;
        let mut next = (*map).clone();
        next.remove(&key);
        self.install(next);
        self.maybe_compact(&mut write)
    }

    fn append_entry(&self, write: &mut WriteState, entry_type: u8, payload: &[u8]) -> Result<(), StoreError> {
        let sealed = crypto::seal(&self.key, payload, &[entry_type])?;
        let mut buf = Vec::with_capacity(5 + sealed.len());
        buf.push(entry_type);
        buf.extend_from_slice(&(sealed.len() as u32).to_le_bytes());
        buf.extend_from_slice(&sealed);
        write.wal.write_all(&buf)?;
        write.wal.sync_data()?;
        write.wal_len += buf.len() as u64;
        Ok(())
    }

    fn maybe_compact(&self, write: &mut WriteState) -> Result<(), StoreError> {
        if write.wal_len <= self.config.wal_compact_bytes {
            return Ok(());
        }
        self.compact_locked(write)
    }

    fn compact_locked(&self, write: &mut WriteState) -> Result<(), StoreError> {
        let map = self.snapshot();
        write_snapshot(&self.config.path, &self.key, &self.salt, &map)?;
        write.wal.set_len(0)?;
        write.wal.seek(SeekFrom::Start(0))?;
        write.wal.sync_data()?;
        write.wal_len = 0;
        slog::info!(self.logger, "user store compacted"; "users" => map.len());
        Ok(())
    }

    /// Rewrite the snapshot and truncate the WAL if the WAL has grown past
    /// the configured threshold. Returns whether compaction ran.
    pub async fn compact_if_needed(&self) -> Result<bool, StoreError> {
        let mut write = self.write.lock().await;
        if write.wal_len <= self.config.wal_compact_bytes {
            return Ok(false);
        }
        self.compact_locked(&mut write)?;
        Ok(true)
    }

    /// Reload snapshot + WAL from disk, replacing the in-memory map. Any
    /// parse or decryption failure leaves the previous map untouched.
    pub async fn reload(&self) {
        let _write = self.write.lock().await;
        match load_snapshot(&self.config.path, &self.key, &self.salt) {
            Ok(Some(mut map)) => {
                if let Err(err) = replay_wal(&wal_path(&self.config.path), &self.key, &mut map, &self.logger) {
                    slog::warn!(self.logger, "user store reload: WAL replay failed, keeping previous state"; "error" => %err);
                    return;
                }
                let users = map.len();
                self.install(map);
                slog::info!(self.logger, "user store reloaded from disk"; "users" => users);
            }
            Ok(None) => {
                slog::warn!(self.logger, "user store reload: snapshot vanished, keeping previous state");
            }
            Err(err) => {
                slog::warn!(self.logger, "user store reload failed, keeping previous state"; "error" => %err);
            }
        }
    }

    /// Start watching the snapshot file for external modification and hot
    /// reload on change.
    pub fn watch(self: &Arc<UserStore>) -> Result<(), StoreError> {
        let store = Arc::downgrade(self);
        let handle = tokio::runtime::Handle::current();
        let logger = self.logger.clone();
        let snapshot_path = self.config.path.clone();
        let mut watcher = notify::recommended_watcher(move |event: Result<notify::Event, notify::Error>| {
            let relevant = match &event {
                Ok(ev) => ev.paths.iter().any(|p| p == &snapshot_path || p.file_name() == snapshot_path.file_name()),
                Err(_) => false,
            };
            if !relevant {
                return;
            }
            if let Some(store) = store.upgrade() {
                slog::debug!(logger, "user store snapshot changed on disk");
                handle.spawn(async move { store.reload().await });
            }
        })
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let dir = self.config.path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        *lock_unpoisoned(&self.watcher) = Some(watcher);
        Ok(())
    }

    /// Current WAL length in bytes, for SITE diagnostics.
    pub async fn wal_len(&self) -> u64 {
        self.write.lock().await.wal_len
    }
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn corrupt<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn wal_path(snapshot: &Path) -> PathBuf {
    let mut os = snapshot.as_os_str().to_os_string();
    os.push(".wal");
    PathBuf::from(os)
}

fn salt_path(snapshot: &Path) -> PathBuf {
    let mut os = snapshot.as_os_str().to_os_string();
    os.push(".salt");
    PathBuf::from(os)
}

fn load_or_create_salt(path: &Path) -> Result<[u8; crypto::SALT_LEN], StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let salt: [u8; crypto::SALT_LEN] = bytes
                .try_into()
                .map_err(|_| StoreError::Corrupt("salt file has wrong length".to_string()))?;
            Ok(salt)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let mut salt = [0u8; crypto::SALT_LEN];
            crypto::random_bytes(&mut salt)?;
            let mut file = File::create(path)?;
            file.write_all(&salt)?;
            file.sync_all()?;
            Ok(salt)
        }
        Err(err) => Err(err.into()),
    }
}

fn load_snapshot(
    path: &Path,
    key: &[u8; crypto::KEY_LEN],
    salt: &[u8; crypto::SALT_LEN],
) -> Result<Option<HashMap<String, Account>>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut header = [0u8; 9 + 1 + crypto::SALT_LEN + RESERVED_LEN];
    file.read_exact(&mut header).map_err(|_| StoreError::Corrupt("snapshot header truncated".to_string()))?;
    if &header[..9] != MAGIC {
        return Err(StoreError::Corrupt("bad snapshot magic".to_string()));
    }
    if header[9] != VERSION {
        return Err(StoreError::Corrupt(format!("unsupported snapshot version {}", header[9])));
    }
    if &header[10..10 + crypto::SALT_LEN] != salt {
        return Err(StoreError::Corrupt("snapshot salt does not match salt file".to_string()));
    }
    let mut sealed = Vec::new();
    file.read_to_end(&mut sealed)?;
    let compressed = crypto::open(key, &sealed, MAGIC)?;
    let json = lz4_flex::decompress_size_prepended(&compressed).map_err(corrupt)?;
    let accounts: Vec<Account> = serde_json::from_slice(&json).map_err(corrupt)?;
    Ok(Some(accounts.into_iter().map(|a| (a.key(), a)).collect()))
}

fn write_snapshot(
    path: &Path,
    key: &[u8; crypto::KEY_LEN],
    salt: &[u8; crypto::SALT_LEN],
    map: &HashMap<String, Account>,
) -> Result<(), StoreError> {
    let mut accounts: Vec<&Account> = map.values().collect();
    accounts.sort_by(|a, b| a.name.cmp(&b.name));
    let json = serde_json::to_vec(&accounts).map_err(corrupt)?;
    let compressed = lz4_flex::compress_prepend_size(&json);
    let sealed = crypto::seal(key, &compressed, MAGIC)?;

    let tmp_path = path.with_extension("tmp");
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(MAGIC)?;
    tmp.write_all(&[VERSION])?;
    tmp.write_all(salt)?;
    tmp.write_all(&[0u8; RESERVED_LEN])?;
    tmp.write_all(&sealed)?;
    tmp.sync_all()?;
    drop(tmp);
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

// Replays WAL entries onto `map`. A truncated or unreadable tail ends the
// replay at the last complete entry, which is exactly the crash-consistent
// prefix.
fn replay_wal(
    path: &Path,
    key: &[u8; crypto::KEY_LEN],
    map: &mut HashMap<String, Account>,
    logger: &Logger,
) -> Result<usize, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let mut offset = 0usize;
    let mut applied = 0usize;
    while offset < bytes.len() {
        if bytes.len() - offset < 5 {
            slog::warn!(logger, "WAL has a truncated entry header, ignoring tail"; "offset" => offset);
            break;
        }
        let entry_type = bytes[offset];
        let len = u32::from_le_bytes([bytes[offset + 1], bytes[offset + 2], bytes[offset + 3], bytes[offset + 4]]) as usize;
        let start = offset + 5;
        if bytes.len() - start < len {
            slog::warn!(logger, "WAL has a truncated entry payload, ignoring tail"; "offset" => offset);
            break;
        }
        let sealed = &bytes[start..start + len];
        let payload = match crypto::open(key, sealed, &[entry_type]) {
            Ok(payload) => payload,
            Err(err) => {
                slog::warn!(logger, "WAL entry failed to decrypt, ignoring tail"; "offset" => offset, "error" => %err);
                break;
            }
        };
        match entry_type {
            ENTRY_ADD | ENTRY_UPDATE => {
                let account: Account = serde_json::from_slice(&payload).map_err(corrupt)?;
                map.insert(account.key(), account);
            }
            ENTRY_DELETE => {
                let name = String::from_utf8(payload).map_err(corrupt)?;
                map.remove(&name);
            }
            other => {
                slog::warn!(logger, "unknown WAL entry type, ignoring tail"; "type" => other);
                break;
            }
        }
        applied += 1;
        offset = start + len;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::crypto::hash_password;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn test_config(dir: &Path) -> StoreConfig {
        StoreConfig {
            path: dir.join("users.db"),
            secret: "test-secret".to_string(),
            wal_compact_bytes: DEFAULT_WAL_COMPACT_BYTES,
        }
    }

    #[tokio::test]
    async fn fresh_store_has_default_admin() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(test_config(dir.path()), test_logger()).unwrap();
        let admin = store.find("ADMIN").unwrap();
        assert_eq!(admin.name, "admin");
        assert!(admin.is_admin());
    }

    #[tokio::test]
    async fn crud_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(test_config(dir.path()), test_logger()).unwrap();

        let alice = Account::new("Alice", &hash_password("pw")).with_credits(1024);
        store.try_add(alice.clone()).await.unwrap();
        assert_eq!(store.find("alice").unwrap(), alice);

        let alice2 = alice.clone().with_credits(2048);
        store.try_update(alice2.clone()).await.unwrap();
        assert_eq!(store.find("alice").unwrap().credits_kb, 2048);

        store.try_delete("ALICE").await.unwrap();
        assert!(store.find("alice").is_none());

        assert!(matches!(store.try_delete("alice").await, Err(StoreError::NoSuchUser(_))));
        store.try_add(alice.clone()).await.unwrap();
        assert!(matches!(store.try_add(alice).await, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn wal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let store = UserStore::open(config.clone(), test_logger()).unwrap();
            store.try_add(Account::new("bob", &hash_password("pw"))).await.unwrap();
            store.try_delete("admin").await.unwrap();
            // No compaction happened; the changes only live in the WAL.
            assert!(store.wal_len().await > 0);
        }
        let store = UserStore::open(config, test_logger()).unwrap();
        assert!(store.find("bob").is_some());
        assert!(store.find("admin").is_none());
    }

    #[tokio::test]
    async fn truncated_wal_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let store = UserStore::open(config.clone(), test_logger()).unwrap();
            store.try_add(Account::new("bob", &hash_password("pw"))).await.unwrap();
            store.try_add(Account::new("carol", &hash_password("pw"))).await.unwrap();
        }
        // Chop bytes off the second entry to simulate a crash mid-append.
        let wal = wal_path(&config.path);
        let bytes = std::fs::read(&wal).unwrap();
        std::fs::write(&wal, &bytes[..bytes.len() - 7]).unwrap();

        let store = UserStore::open(config, test_logger()).unwrap();
        assert!(store.find("bob").is_some());
        assert!(store.find("carol").is_none());
    }

    #[tokio::test]
    async fn compaction_truncates_wal_and_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.wal_compact_bytes = 64; // force compaction on every write
        let store = UserStore::open(config.clone(), test_logger()).unwrap();
        store.try_add(Account::new("bob", &hash_password("pw"))).await.unwrap();
        assert_eq!(store.wal_len().await, 0);

        let store = UserStore::open(config, test_logger()).unwrap();
        assert!(store.find("bob").is_some());
        assert!(store.find("admin").is_some());
    }

    #[tokio::test]
    async fn authenticate_enforces_concurrency_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(test_config(dir.path()), test_logger()).unwrap();
        let mut bob = Account::new("bob", &hash_password("pw"));
        bob.max_logins = 1;
        store.try_add(bob).await.unwrap();

        assert!(store.try_authenticate("bob", "pw").is_ok());
        assert_eq!(store.try_authenticate("bob", "pw"), Err(AuthError::ExceedsConcurrentLimit));
        store.on_logout("bob");
        assert!(store.try_authenticate("bob", "pw").is_ok());

        assert_eq!(store.try_authenticate("bob", "nope"), Err(AuthError::BadPassword));
        assert_eq!(store.try_authenticate("nobody", "pw"), Err(AuthError::UnknownUser));
    }

    #[tokio::test]
    async fn wrong_secret_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        drop(UserStore::open(config.clone(), test_logger()).unwrap());
        let bad = StoreConfig { secret: "other".to_string(), ..config };
        assert!(UserStore::open(bad, test_logger()).is_err());
    }
}
