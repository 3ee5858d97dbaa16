//! Cookie-like session storage shared by the coordinator and its transport.
//!
//! The store holds the persisted `is_authenticated` flag and the raw cookies
//! the identity backend hands out (`id_token`, `access_token`,
//! `refresh_token`). It is either memory only or mirrored to a JSON file so
//! that separate processes of the same session observe the same state. Every
//! change is published on a `watch` channel tagged with where it came from.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::watch;
use tracing::{debug, error, instrument};

pub const AUTH_FLAG_COOKIE: &str = "is_authenticated";
pub const ID_TOKEN_COOKIE: &str = "id_token";

/// Origin of the latest change to a [`SessionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Loaded when the store was opened.
    Hydrate,
    /// Written by the coordinator or its refresh transport.
    Coordinator,
    /// Observed from outside: another process, an expiry signal, a reload.
    External,
}

#[derive(Clone)]
pub struct SessionRecord {
    pub authenticated: bool,
    pub cookies: BTreeMap<String, SecretString>,
    pub source: ChangeSource,
}

impl SessionRecord {
    fn empty(source: ChangeSource) -> Self {
        Self {
            authenticated: false,
            cookies: BTreeMap::new(),
            source,
        }
    }

    fn same_contents(&self, other: &Self) -> bool {
        self.authenticated == other.authenticated
            && self.cookies.len() == other.cookies.len()
            && self.cookies.iter().zip(other.cookies.iter()).all(
                |((name_a, value_a), (name_b, value_b))| {
                    name_a == name_b && value_a.expose_secret() == value_b.expose_secret()
                },
            )
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("authenticated", &self.authenticated)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("source", &self.source)
            .finish()
    }
}

/// On-disk layout of a file-backed session.
#[derive(Serialize, Deserialize, Default)]
struct SessionFile {
    #[serde(rename = "is_authenticated", default)]
    authenticated: bool,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
}

impl SessionFile {
    fn into_record(self, source: ChangeSource) -> SessionRecord {
        SessionRecord {
            authenticated: self.authenticated,
            cookies: self
                .cookies
                .into_iter()
                .map(|(name, value)| (name, SecretString::from(value)))
                .collect(),
            source,
        }
    }

    fn from_record(record: &SessionRecord) -> Self {
        Self {
            authenticated: record.authenticated,
            cookies: record
                .cookies
                .iter()
                .map(|(name, value)| (name.clone(), value.expose_secret().to_string()))
                .collect(),
        }
    }
}

/// Shared session state.
///
/// For a file-backed store every change is written through synchronously,
/// on the caller's thread, before the change returns. The file is a few
/// hundred bytes, so this runs inline even on async tasks. Writes and
/// reloads are serialized by one lock, so the file always holds the latest
/// in-memory record and a reload never overwrites a newer write.
pub struct SessionStore {
    path: Option<PathBuf>,
    state: watch::Sender<SessionRecord>,
    file_lock: Mutex<()>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("path", &self.path)
            .field("record", &*self.state.borrow())
            .finish()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SessionStore {
    /// A store that lives only as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        let (state, _) = watch::channel(SessionRecord::empty(ChangeSource::Hydrate));
        Self {
            path: None,
            state,
            file_lock: Mutex::new(()),
        }
    }

    /// Open a file-backed store, hydrating from `path` when it exists.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    #[instrument]
    pub fn open(path: &Path) -> Result<Self> {
        let record = if path.exists() {
            read_file(path)?.into_record(ChangeSource::Hydrate)
        } else {
            debug!("session file {} not found, starting empty", path.display());
            SessionRecord::empty(ChangeSource::Hydrate)
        };

        let (state, _) = watch::channel(record);

        Ok(Self {
            path: Some(path.to_path_buf()),
            state,
            file_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionRecord {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionRecord> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().authenticated
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<SecretString> {
        self.state.borrow().cookies.get(name).cloned()
    }

    #[must_use]
    pub fn id_token(&self) -> Option<SecretString> {
        self.cookie(ID_TOKEN_COOKIE)
    }

    /// Render the stored cookies as a `Cookie` request header value.
    #[must_use]
    pub fn cookie_header(&self) -> Option<SecretString> {
        let record = self.state.borrow();
        if record.cookies.is_empty() {
            return None;
        }

        let header = record
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={}", value.expose_secret()))
            .collect::<Vec<_>>()
            .join("; ");

        Some(SecretString::from(header))
    }

    pub fn set_authenticated(&self, authenticated: bool, source: ChangeSource) {
        self.update(source, |record| record.authenticated = authenticated);
    }

    pub fn set_cookie(&self, name: &str, value: SecretString, source: ChangeSource) {
        self.update(source, |record| {
            if name == AUTH_FLAG_COOKIE {
                record.authenticated = value.expose_secret() == "true";
            } else {
                record.cookies.insert(name.to_string(), value);
            }
        });
    }

    pub fn remove_cookie(&self, name: &str, source: ChangeSource) {
        self.update(source, |record| {
            if name == AUTH_FLAG_COOKIE {
                record.authenticated = false;
            } else {
                record.cookies.remove(name);
            }
        });
    }

    /// Apply a batch of `Set-Cookie` header values in one change.
    pub fn apply_set_cookies<'a, I>(&self, headers: I, source: ChangeSource)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let changes: Vec<CookieChange> =
            headers.into_iter().filter_map(parse_set_cookie).collect();
        if changes.is_empty() {
            return;
        }

        self.update(source, |record| {
            for change in changes {
                match change {
                    CookieChange::Set(name, value) if name == AUTH_FLAG_COOKIE => {
                        record.authenticated = value.expose_secret() == "true";
                    }
                    CookieChange::Set(name, value) => {
                        record.cookies.insert(name, value);
                    }
                    CookieChange::Remove(name) if name == AUTH_FLAG_COOKIE => {
                        record.authenticated = false;
                    }
                    CookieChange::Remove(name) => {
                        record.cookies.remove(&name);
                    }
                }
            }
        });
    }

    /// Forget the flag and every cookie.
    pub fn clear(&self, source: ChangeSource) {
        self.update(source, |record| {
            record.authenticated = false;
            record.cookies.clear();
        });
    }

    /// Re-read a file-backed store and publish the file contents as an
    /// external change when they differ from memory.
    ///
    /// Returns whether anything changed. Memory-only stores never change.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        // held until the record is replaced so no write lands in between
        let _file = self.lock_file();

        let on_disk = if path.exists() {
            read_file(path)?.into_record(ChangeSource::External)
        } else {
            SessionRecord::empty(ChangeSource::External)
        };

        Ok(self.state.send_if_modified(|record| {
            if record.same_contents(&on_disk) {
                false
            } else {
                *record = on_disk;
                true
            }
        }))
    }

    fn update<F>(&self, source: ChangeSource, f: F)
    where
        F: FnOnce(&mut SessionRecord),
    {
        let _file = self.lock_file();

        let mut file = None;
        self.state.send_modify(|record| {
            f(record);
            record.source = source;
            if self.path.is_some() {
                file = Some(SessionFile::from_record(record));
            }
        });

        if let (Some(path), Some(file)) = (&self.path, file) {
            if let Err(e) = write_file(path, &file) {
                // memory stays authoritative for this process
                error!("Failed to persist session to {}: {:#}", path.display(), e);
            }
        }
    }

    fn lock_file(&self) -> MutexGuard<'_, ()> {
        self.file_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_file(path: &Path) -> Result<SessionFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file {}", path.display()))?;

    if contents.trim().is_empty() {
        return Ok(SessionFile::default());
    }

    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse session file {}", path.display()))
}

/// Replace the file atomically through a uniquely named sibling, so writers
/// in other processes never share a temporary file.
fn write_file(path: &Path, file: &SessionFile) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&serde_json::to_vec_pretty(file)?)?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace session file {}", path.display()))?;

    Ok(())
}

enum CookieChange {
    Set(String, SecretString),
    Remove(String),
}

/// Parse the `name=value` pair of a `Set-Cookie` header. An empty value or
/// `Max-Age=0` means the cookie is being deleted.
fn parse_set_cookie(header: &str) -> Option<CookieChange> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');

    let expired = parts.any(|attr| {
        attr.split_once('=').map_or(false, |(key, val)| {
            key.trim().eq_ignore_ascii_case("max-age")
                && val.trim().parse::<i64>().map_or(false, |age| age <= 0)
        })
    });

    if expired || value.is_empty() {
        Some(CookieChange::Remove(name.to_string()))
    } else {
        Some(CookieChange::Set(
            name.to_string(),
            SecretString::from(value.to_string()),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_defaults() {
        let store = SessionStore::in_memory();
        assert!(!store.is_authenticated());
        assert!(store.id_token().is_none());
        assert!(store.cookie_header().is_none());
        assert_eq!(store.snapshot().source, ChangeSource::Hydrate);
    }

    #[test]
    fn test_set_cookie_flag_maps_to_authenticated() {
        let store = SessionStore::in_memory();
        store.set_cookie(
            AUTH_FLAG_COOKIE,
            SecretString::from("true".to_string()),
            ChangeSource::External,
        );
        assert!(store.is_authenticated());
        assert!(store.cookie(AUTH_FLAG_COOKIE).is_none());

        store.remove_cookie(AUTH_FLAG_COOKIE, ChangeSource::External);
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_cookie_header() {
        let store = SessionStore::in_memory();
        store.set_cookie(
            "refresh_token",
            SecretString::from("r1".to_string()),
            ChangeSource::Coordinator,
        );
        store.set_cookie(
            "access_token",
            SecretString::from("a1".to_string()),
            ChangeSource::Coordinator,
        );

        let header = store.cookie_header().unwrap();
        assert_eq!(header.expose_secret(), "access_token=a1; refresh_token=r1");
    }

    #[test]
    fn test_apply_set_cookies() {
        let store = SessionStore::in_memory();
        store.set_cookie(
            "stale",
            SecretString::from("x".to_string()),
            ChangeSource::Coordinator,
        );

        store.apply_set_cookies(
            [
                "id_token=eyJ.eyJ.sig; Path=/; Secure; SameSite=Lax",
                "is_authenticated=true; Max-Age=3600",
                "stale=; Max-Age=0",
                "garbage",
            ],
            ChangeSource::Coordinator,
        );

        assert!(store.is_authenticated());
        assert_eq!(store.id_token().unwrap().expose_secret(), "eyJ.eyJ.sig");
        assert!(store.cookie("stale").is_none());
        assert_eq!(store.snapshot().source, ChangeSource::Coordinator);
    }

    #[test]
    fn test_parse_set_cookie_max_age_zero() {
        assert!(matches!(
            parse_set_cookie("id_token=abc; Max-Age=0"),
            Some(CookieChange::Remove(name)) if name == "id_token"
        ));
        assert!(matches!(
            parse_set_cookie("id_token=\"abc\"; HttpOnly"),
            Some(CookieChange::Set(name, value))
                if name == "id_token" && value.expose_secret() == "abc"
        ));
        assert!(parse_set_cookie("=abc").is_none());
    }

    #[test]
    fn test_debug_redacts_cookie_values() {
        let store = SessionStore::in_memory();
        store.set_cookie(
            "id_token",
            SecretString::from("super-secret".to_string()),
            ChangeSource::Coordinator,
        );
        let debug = format!("{store:?}");
        assert!(debug.contains("id_token"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_file_round_trip_and_reload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");

        let store = SessionStore::open(&path)?;
        assert!(!store.is_authenticated());

        store.set_authenticated(true, ChangeSource::Coordinator);
        store.set_cookie(
            "id_token",
            SecretString::from("t1".to_string()),
            ChangeSource::Coordinator,
        );

        let reopened = SessionStore::open(&path)?;
        assert!(reopened.is_authenticated());
        assert_eq!(reopened.id_token().unwrap().expose_secret(), "t1");

        // nothing changed on disk
        assert!(!store.reload()?);

        // another process signs the session out
        fs::write(&path, r#"{"is_authenticated": false, "cookies": {}}"#)?;
        assert!(store.reload()?);
        assert!(!store.is_authenticated());
        assert!(store.id_token().is_none());
        assert_eq!(store.snapshot().source, ChangeSource::External);

        Ok(())
    }

    #[test]
    fn test_open_rejects_invalid_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json")?;

        assert!(SessionStore::open(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_subscribe_sees_changes() {
        let store = SessionStore::in_memory();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.set_authenticated(true, ChangeSource::External);
        assert!(rx.has_changed().unwrap());
        let record = rx.borrow_and_update().clone();
        assert!(record.authenticated);
        assert_eq!(record.source, ChangeSource::External);
    }

    #[test]
    fn test_concurrent_writers_leave_latest_record_on_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");

        for round in 0..50 {
            let store = SessionStore::open(&path)?;
            std::thread::scope(|scope| {
                for writer in 0..4 {
                    let store = &store;
                    scope.spawn(move || {
                        for n in 0..10 {
                            store.set_cookie(
                                &format!("c{writer}"),
                                SecretString::from(format!("{round}-{n}")),
                                ChangeSource::Coordinator,
                            );
                        }
                    });
                }
            });

            let on_disk = SessionStore::open(&path)?;
            assert!(
                on_disk.snapshot().same_contents(&store.snapshot()),
                "round {round}: file behind memory"
            );
        }

        // no temporary files left behind
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_reload_never_reverts_in_process_writes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path)?;

        std::thread::scope(|scope| {
            let reloader = scope.spawn(|| {
                let mut reverted = 0;
                for _ in 0..200 {
                    if store.reload().unwrap() {
                        reverted += 1;
                    }
                }
                reverted
            });

            for n in 0..200 {
                store.set_authenticated(n % 2 == 0, ChangeSource::Coordinator);
            }

            assert_eq!(reloader.join().unwrap(), 0);
        });

        assert_eq!(store.snapshot().source, ChangeSource::Coordinator);
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_from_async_tasks_persist() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        let store = std::sync::Arc::new(SessionStore::open(&path)?);

        let task = tokio::spawn({
            let store = std::sync::Arc::clone(&store);
            async move { store.set_authenticated(true, ChangeSource::Coordinator) }
        });
        task.await?;

        assert!(SessionStore::open(&path)?.is_authenticated());
        Ok(())
    }
}
