//! services/api/src/adapters/local_identity.rs
//!
//! A file-backed stand-in for the hosted identity provider, used by the
//! `local` mode. It mirrors browser storage: a JSON object of string keys,
//! holding the signed-in user under `edulab_user` and an authentication flag
//! under `edulab_auth`. Any login is accepted.

use async_trait::async_trait;
use edulab_core::domain::{Role, SessionIdentity};
use edulab_core::ports::{IdentityProvider, PortError, PortResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub const USER_KEY: &str = "edulab_user";
pub const AUTH_KEY: &str = "edulab_auth";

/// Name stored when a login arrives for an unknown email.
pub const DEFAULT_LOCAL_NAME: &str = "Học sinh EduLab";
pub const MIN_PASSWORD_LEN: usize = 6;

/// The fixed account behind the mock Google sign-in.
pub const GOOGLE_DEMO_NAME: &str = "Nguyễn Văn A";
pub const GOOGLE_DEMO_EMAIL: &str = "nguyenvana@gmail.com";

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalUserRecord {
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl LocalUserRecord {
    /// Stable id derived from the email, so repeated logins map to one profile.
    pub fn user_id(&self) -> Uuid {
        let key = format!("mailto:{}", self.email.trim().to_lowercase());
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }

    fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            user_id: self.user_id(),
            email: self.email.clone(),
            display_name: Some(self.name.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// The result of a successful local sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSession {
    /// Presented back as the session cookie.
    pub token: String,
    pub identity: SessionIdentity,
    pub user: LocalUserRecord,
}

pub struct LocalIdentityStore {
    path: PathBuf,
    email_pattern: Regex,
    // Serializes read-modify-write cycles on the file.
    write_lock: Mutex<()>,
}

impl LocalIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> PortResult<Self> {
        let email_pattern =
            Regex::new(EMAIL_PATTERN).map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            path: path.into(),
            email_pattern,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored user, if the authentication flag is set.
    pub async fn current_user(&self) -> PortResult<Option<LocalUserRecord>> {
        let entries = self.read_entries().await?;
        if entries.get(AUTH_KEY).map(String::as_str) != Some("true") {
            return Ok(None);
        }
        stored_user(&entries)
    }

    pub async fn register(&self, registration: Registration) -> PortResult<LocalSession> {
        let name = registration.name.trim();
        let email = registration.email.trim();
        if name.is_empty() || email.is_empty() || registration.password.is_empty() {
            return Err(PortError::Validation(
                "Vui lòng nhập đầy đủ thông tin.".to_string(),
            ));
        }
        if registration.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(PortError::Validation(format!(
                "Mật khẩu phải có ít nhất {} ký tự.",
                MIN_PASSWORD_LEN
            )));
        }
        if !self.email_pattern.is_match(email) {
            return Err(PortError::Validation("Email không hợp lệ.".to_string()));
        }

        let user = LocalUserRecord {
            name: name.to_string(),
            email: email.to_string(),
            role: registration.role,
        };
        self.sign_in(user).await
    }

    /// Accepts any credentials. Reuses the stored record when the email
    /// matches, otherwise stores a default student record.
    pub async fn login(&self, email: &str, password: &str) -> PortResult<LocalSession> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(PortError::Validation(
                "Vui lòng nhập đầy đủ email và mật khẩu.".to_string(),
            ));
        }

        let entries = self.read_entries().await?;
        let user = match stored_user(&entries)? {
            Some(user) if user.email == email => user,
            _ => LocalUserRecord {
                name: DEFAULT_LOCAL_NAME.to_string(),
                email: email.to_string(),
                role: Role::Student,
            },
        };
        self.sign_in(user).await
    }

    /// Mock Google sign-in: always signs in the same demo student.
    pub async fn google_sign_in(&self) -> PortResult<LocalSession> {
        self.sign_in(LocalUserRecord {
            name: GOOGLE_DEMO_NAME.to_string(),
            email: GOOGLE_DEMO_EMAIL.to_string(),
            role: Role::Student,
        })
        .await
    }

    pub async fn logout(&self) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.remove(USER_KEY);
        entries.remove(AUTH_KEY);
        self.write_entries(&entries).await?;
        info!("Local user signed out.");
        Ok(())
    }

    async fn sign_in(&self, user: LocalUserRecord) -> PortResult<LocalSession> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let serialized =
            serde_json::to_string(&user).map_err(|e| PortError::Unexpected(e.to_string()))?;
        entries.insert(USER_KEY.to_string(), serialized);
        entries.insert(AUTH_KEY.to_string(), "true".to_string());
        self.write_entries(&entries).await?;
        info!("Local user {} signed in.", user.email);

        let identity = user.identity();
        Ok(LocalSession {
            token: identity.user_id.to_string(),
            identity,
            user,
        })
    }

    async fn read_entries(&self) -> PortResult<BTreeMap<String, String>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(PortError::Unexpected(e.to_string())),
        };
        serde_json::from_str(&raw).map_err(|e| {
            warn!("Local store {} is malformed: {}", self.path.display(), e);
            PortError::Unexpected(format!("Malformed local store: {}", e))
        })
    }

    async fn write_entries(&self, entries: &BTreeMap<String, String>) -> PortResult<()> {
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

fn stored_user(entries: &BTreeMap<String, String>) -> PortResult<Option<LocalUserRecord>> {
    match entries.get(USER_KEY) {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| PortError::Unexpected(format!("Malformed {}: {}", USER_KEY, e))),
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityStore {
    /// The token is the id handed out at sign-in; it only resolves while the
    /// stored user is still signed in.
    async fn current_session(&self, token: &str) -> PortResult<Option<SessionIdentity>> {
        Ok(self
            .current_user()
            .await?
            .map(|user| user.identity())
            .filter(|identity| identity.user_id.to_string() == token))
    }
}
