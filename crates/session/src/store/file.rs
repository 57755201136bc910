//! JSON file backend
//!
//! One map keyed by identity id, held in memory and persisted on every
//! mutation with an atomic temp-file + rename. A tokio Mutex serializes all
//! operations, which makes upsert and promotion atomic.
//!
//! Mutations are applied to a copy of the map and only swapped in after the
//! write succeeds, so a failed write leaves memory and disk in agreement.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use provider::{BoxFuture, Profile};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CredentialStore, new_token, reject_empty};
use crate::error::{Error, Result};
use crate::record::{CredentialRecord, IssuedTokens, TokenRotation, UpdateOutcome};

type Records = HashMap<String, CredentialRecord>;

pub struct FileStore {
    path: PathBuf,
    state: Mutex<Records>,
}

impl FileStore {
    /// Load records from `path`, creating an empty `{}` file on cold start.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::StorageFailure(format!("checking credential file: {e}")))?;
        let state = if exists {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::StorageFailure(format!("reading credential file: {e}")))?;
            let records: Records = serde_json::from_str(&contents)
                .map_err(|e| Error::StorageFailure(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), records = records.len(), "loaded credential records");
            records
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let records = Records::new();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn find_by<F>(&self, matches: F) -> Option<CredentialRecord>
    where
        F: Fn(&CredentialRecord) -> bool,
    {
        let state = self.state.lock().await;
        state.values().find(|r| matches(r)).cloned()
    }
}

fn holds(slot: &Option<String>, token: &str) -> bool {
    slot.as_deref() == Some(token)
}

impl CredentialStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn upsert<'a>(
        &'a self,
        profile: &'a Profile,
        tokens: IssuedTokens,
    ) -> BoxFuture<'a, Result<CredentialRecord>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;

            if let Some(temp) = tokens.temporary_token.as_deref() {
                let taken = state
                    .values()
                    .any(|r| r.identity_id != profile.id && holds(&r.temporary_token, temp));
                if taken {
                    return Err(Error::StorageFailure("temporary token already in use".into()));
                }
            }

            let mut next = state.clone();
            let record = match next.get_mut(&profile.id) {
                Some(existing) => {
                    existing.reauthorize(profile, tokens);
                    debug!(identity_id = %profile.id, "updated credential record");
                    existing.clone()
                }
                None => {
                    let record = CredentialRecord::new(profile, tokens);
                    next.insert(profile.id.clone(), record.clone());
                    debug!(identity_id = %profile.id, "created credential record");
                    record
                }
            };

            write_atomic(&self.path, &next).await?;
            *state = next;
            Ok(record)
        })
    }

    fn find_by_public_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<CredentialRecord>> {
        Box::pin(async move {
            reject_empty(token, "public")?;
            self.find_by(|r| holds(&r.public_token, token))
                .await
                .ok_or_else(|| Error::RecordNotFound("unknown public token".into()))
        })
    }

    fn find_by_temporary_token<'a>(
        &'a self,
        token: &'a str,
    ) -> BoxFuture<'a, Result<CredentialRecord>> {
        Box::pin(async move {
            reject_empty(token, "temporary")?;
            self.find_by(|r| holds(&r.temporary_token, token))
                .await
                .ok_or_else(|| Error::RecordNotFound("unknown temporary token".into()))
        })
    }

    fn promote_temporary_to_public<'a>(
        &'a self,
        temporary_token: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            reject_empty(temporary_token, "temporary")?;
            let mut state = self.state.lock().await;

            let identity_id = state
                .values()
                .find(|r| holds(&r.temporary_token, temporary_token))
                .map(|r| r.identity_id.clone())
                .ok_or_else(|| Error::RecordNotFound("unknown or used temporary token".into()))?;

            let mut public_token = new_token();
            while state.values().any(|r| holds(&r.public_token, &public_token)) {
                public_token = new_token();
            }

            let mut next = state.clone();
            if let Some(record) = next.get_mut(&identity_id) {
                record.public_token = Some(public_token.clone());
                record.temporary_token = None;
                record.updated_at = crate::record::now_millis();
            }

            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(%identity_id, "promoted temporary token");
            Ok(public_token)
        })
    }

    fn update_tokens<'a>(
        &'a self,
        public_token: &'a str,
        rotation: &'a TokenRotation,
    ) -> BoxFuture<'a, Result<UpdateOutcome>> {
        Box::pin(async move {
            reject_empty(public_token, "public")?;
            let mut state = self.state.lock().await;

            let current = state
                .values()
                .find(|r| holds(&r.public_token, public_token))
                .ok_or_else(|| Error::RecordNotFound("unknown public token".into()))?;
            if current.refresh_token != rotation.previous_refresh {
                debug!(identity_id = %current.identity_id, "token update skipped, record already rotated");
                return Ok(UpdateOutcome::Stale);
            }
            let identity_id = current.identity_id.clone();

            let mut next = state.clone();
            if let Some(record) = next.get_mut(&identity_id) {
                record.rotate(&rotation.tokens);
            }

            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(%identity_id, "stored refreshed tokens");
            Ok(UpdateOutcome::Updated)
        })
    }
}

/// Write records to `path` atomically with 0600 permissions.
async fn write_atomic(path: &Path, data: &Records) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::StorageFailure(format!("serializing credential records: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::StorageFailure("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".authdata.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::StorageFailure(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::StorageFailure(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::StorageFailure(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential records");
    Ok(())
}
