//! Config patcher
//!
//! Every write follows the same path: read the target, decide what changes,
//! copy the untouched original to `<path>.backup.<unix-millis>`, mutate in
//! memory, then replace the file atomically. Nothing is written when nothing
//! would change, and nothing is written without a backup taken first.
//!
//! Unreadable or unparseable targets are errors (`PatchError`) raised before
//! any backup. Failures after that point are recorded on the patch itself so
//! the run can continue and the report can show partial progress.

use crate::config::ServerSettings;
use crate::env::Environment;
use crate::script::{self, Lookup};
use crate::util::{self, write_atomic};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Placeholder written for secrets the environment does not provide
const PLACEHOLDER_SUFFIX: &str = "_here";
const REDACTED: &str = "<set>";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not valid JSON: {source}", path.display())]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{} has no field '{field}'", path.display())]
    FieldNotFound { path: PathBuf, field: String },
}

/// Lifecycle of one patch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchState {
    NotAttempted,
    BackedUp,
    MutatedInMemory,
    Written,
    PatternNotFound,
    WriteFailed,
}

impl PatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PatchState::Written | PatchState::PatternNotFound | PatchState::WriteFailed
        )
    }

    pub fn can_transition_to(&self, next: PatchState) -> bool {
        use PatchState::*;
        match (self, next) {
            (NotAttempted, BackedUp) => true,
            (BackedUp, MutatedInMemory) | (BackedUp, PatternNotFound) => true,
            (MutatedInMemory, Written) => true,
            (state, WriteFailed) => !state.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks one attempt through its states; refuses illegal moves.
#[derive(Debug)]
struct Attempt {
    target: PathBuf,
    state: PatchState,
}

impl Attempt {
    fn new(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            state: PatchState::NotAttempted,
        }
    }

    fn advance(&mut self, next: PatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal patch transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(target = %self.target.display(), from = ?self.state, to = ?next, "patch state");
        self.state = next;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub timestamp_iso: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(rename = "type")]
    pub kind: String,
    pub target_file: PathBuf,
    pub field_path: String,
    pub old_value: Value,
    pub new_value: Value,
    pub success: bool,
    pub outcome: PatchState,
    /// Backup taken for this write, if one was taken
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A file the doctor created from nothing (no original to back up).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Dotted key path into a JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        Self(path.split('.').map(str::to_string).collect())
    }

    /// Build from explicit keys, for keys that themselves contain dots.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(doc, |node, key| node.get(key))
    }

    /// Set the leaf, creating it when the parent object exists.
    fn set(&self, doc: &mut Value, value: Value) -> bool {
        let Some((leaf, parents)) = self.0.split_last() else {
            return false;
        };
        let mut node = doc;
        for key in parents {
            match node.get_mut(key) {
                Some(next) => node = next,
                None => return false,
            }
        }
        match node.as_object_mut() {
            Some(map) => {
                map.insert(leaf.clone(), value);
                true
            }
            None => false,
        }
    }

    fn parent_exists(&self, doc: &Value) -> bool {
        match self.0.split_last() {
            Some((_, parents)) => FieldPath(parents.to_vec())
                .get(doc)
                .is_some_and(Value::is_object),
            None => false,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// One intended field mutation in a JSON file.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonEdit {
    pub kind: String,
    pub field: FieldPath,
    pub new_value: Value,
}

impl JsonEdit {
    pub fn new(kind: impl Into<String>, field: FieldPath, new_value: Value) -> Self {
        Self {
            kind: kind.into(),
            field,
            new_value,
        }
    }
}

/// What happened to a script assignment patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptPatchStatus {
    Applied { old_value: String },
    /// Already pointing at the requested value
    Unchanged,
    /// Statement not present; nothing written
    Skipped,
    Failed(String),
}

/// Accumulates backups and patches for one run.
#[derive(Debug, Default)]
pub struct Patcher {
    backups: Vec<BackupRecord>,
    patches: Vec<ConfigPatch>,
    created: Vec<CreatedFile>,
}

impl Patcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backups(&self) -> &[BackupRecord] {
        &self.backups
    }

    pub fn patches(&self) -> &[ConfigPatch] {
        &self.patches
    }

    pub fn created_files(&self) -> &[CreatedFile] {
        &self.created
    }

    pub fn into_parts(self) -> (Vec<BackupRecord>, Vec<ConfigPatch>, Vec<CreatedFile>) {
        (self.backups, self.patches, self.created)
    }

    /// Copy `original` (already read) next to `path` as a timestamped backup.
    fn backup(&mut self, path: &Path, original: &str) -> std::io::Result<BackupRecord> {
        let now = Utc::now();
        let mut millis = now.timestamp_millis();
        loop {
            let backup_path = backup_path_for(path, millis);
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&backup_path);
            match file {
                Ok(mut file) => {
                    file.write_all(original.as_bytes())?;
                    file.sync_all()?;
                    let record = BackupRecord {
                        original_path: path.to_path_buf(),
                        backup_path,
                        timestamp_iso: util::iso(now),
                    };
                    debug!(backup = %record.backup_path.display(), "backup created");
                    self.backups.push(record.clone());
                    return Ok(record);
                }
                // Two backups of one file within the same millisecond.
                Err(err) if err.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(err) => return Err(err),
            }
        }
    }

    /// Apply `edits` to a JSON file as one backed-up write.
    ///
    /// Returns the number of fields changed. Edits whose field already holds
    /// the new value are dropped; if none remain the file is left alone and
    /// no backup is taken.
    pub fn patch_json(&mut self, path: &Path, edits: &[JsonEdit]) -> Result<usize, PatchError> {
        let original = fs::read_to_string(path).map_err(|source| PatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut doc: Value =
            serde_json::from_str(&original).map_err(|source| PatchError::InvalidJson {
                path: path.to_path_buf(),
                source,
            })?;

        let mut planned = Vec::new();
        for edit in edits {
            let current = edit.field.get(&doc);
            if current == Some(&edit.new_value) {
                debug!(field = %edit.field, "field already up to date");
                continue;
            }
            if current.is_none() && !edit.field.parent_exists(&doc) {
                return Err(PatchError::FieldNotFound {
                    path: path.to_path_buf(),
                    field: edit.field.to_string(),
                });
            }
            planned.push((edit, current.cloned().unwrap_or(Value::Null)));
        }
        if planned.is_empty() {
            return Ok(0);
        }

        let mut attempt = Attempt::new(path);
        let backup = match self.backup(path, &original) {
            Ok(record) => record,
            Err(err) => {
                attempt.advance(PatchState::WriteFailed);
                let message = format!("backup failed: {}", err);
                warn!(path = %path.display(), "{}", message);
                for (edit, old) in planned {
                    self.record_json(path, edit, old, PatchState::WriteFailed, None, Some(message.clone()));
                }
                return Ok(0);
            }
        };
        attempt.advance(PatchState::BackedUp);

        for (edit, _) in &planned {
            edit.field.set(&mut doc, edit.new_value.clone());
        }
        attempt.advance(PatchState::MutatedInMemory);

        let written = serde_json::to_string_pretty(&doc)
            .map_err(|e| e.to_string())
            .and_then(|text| write_atomic(path, &format!("{}\n", text)).map_err(|e| e.to_string()));

        let (state, error) = match written {
            Ok(()) => (PatchState::Written, None),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config write failed");
                (PatchState::WriteFailed, Some(err))
            }
        };
        attempt.advance(state);

        let changed = if state == PatchState::Written { planned.len() } else { 0 };
        for (edit, old) in planned {
            self.record_json(
                path,
                edit,
                old,
                state,
                Some(backup.backup_path.clone()),
                error.clone(),
            );
        }
        Ok(changed)
    }

    fn record_json(
        &mut self,
        path: &Path,
        edit: &JsonEdit,
        old_value: Value,
        outcome: PatchState,
        backup_path: Option<PathBuf>,
        error: Option<String>,
    ) {
        self.patches.push(ConfigPatch {
            kind: edit.kind.clone(),
            target_file: path.to_path_buf(),
            field_path: edit.field.to_string(),
            old_value,
            new_value: edit.new_value.clone(),
            success: outcome == PatchState::Written,
            outcome,
            backup_path,
            error,
        });
    }

    /// Point a `ident = '...'` assignment in a script at `new_value`.
    ///
    /// A missing statement is a soft failure: it is recorded as
    /// `pattern_not_found`, returns `Skipped`, and leaves the file untouched.
    pub fn patch_script_assignment(
        &mut self,
        path: &Path,
        ident: &str,
        new_value: &str,
    ) -> Result<ScriptPatchStatus, PatchError> {
        let original = fs::read_to_string(path).map_err(|source| PatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let assignment = match script::find_assignment(&original, ident) {
            Lookup::Found(a) => a,
            Lookup::NotFound => {
                warn!(path = %path.display(), ident, "assignment not found");
                self.patches.push(ConfigPatch {
                    kind: "webhook_url_fix".to_string(),
                    target_file: path.to_path_buf(),
                    field_path: ident.to_string(),
                    old_value: Value::Null,
                    new_value: Value::String(new_value.to_string()),
                    success: false,
                    outcome: PatchState::PatternNotFound,
                    backup_path: None,
                    error: None,
                });
                return Ok(ScriptPatchStatus::Skipped);
            }
        };
        if assignment.value == new_value {
            return Ok(ScriptPatchStatus::Unchanged);
        }

        let mut attempt = Attempt::new(path);
        let mut record = ConfigPatch {
            kind: "webhook_url_fix".to_string(),
            target_file: path.to_path_buf(),
            field_path: ident.to_string(),
            old_value: Value::String(assignment.value.clone()),
            new_value: Value::String(new_value.to_string()),
            success: false,
            outcome: PatchState::NotAttempted,
            backup_path: None,
            error: None,
        };

        match self.backup(path, &original) {
            Ok(backup) => {
                attempt.advance(PatchState::BackedUp);
                record.backup_path = Some(backup.backup_path);
            }
            Err(err) => {
                attempt.advance(PatchState::WriteFailed);
                let message = format!("backup failed: {}", err);
                record.outcome = PatchState::WriteFailed;
                record.error = Some(message.clone());
                self.patches.push(record);
                return Ok(ScriptPatchStatus::Failed(message));
            }
        }

        let updated = script::replace_value(&original, &assignment, new_value);
        attempt.advance(PatchState::MutatedInMemory);

        let status = match write_atomic(path, &updated) {
            Ok(()) => {
                attempt.advance(PatchState::Written);
                record.success = true;
                ScriptPatchStatus::Applied {
                    old_value: assignment.value,
                }
            }
            Err(err) => {
                attempt.advance(PatchState::WriteFailed);
                record.error = Some(err.to_string());
                ScriptPatchStatus::Failed(err.to_string())
            }
        };
        record.outcome = attempt.state;
        self.patches.push(record);
        Ok(status)
    }

    /// Make sure `.env` defines every variable the doctor depends on.
    ///
    /// Missing variables are appended (real values from the environment,
    /// placeholders otherwise). A fresh `.env.example` lists the names.
    pub fn ensure_env_file(
        &mut self,
        env_path: &Path,
        example_path: &Path,
        env: &Environment,
    ) -> Result<usize, PatchError> {
        let existing = match fs::read_to_string(env_path) {
            Ok(content) => Some(content),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(source) => {
                return Err(PatchError::Read {
                    path: env_path.to_path_buf(),
                    source,
                })
            }
        };
        let current = existing.clone().unwrap_or_default();

        let required = required_env_vars(env);
        let missing: Vec<&RequiredVar> = required
            .iter()
            .filter(|var| !defines_var(&current, var.name))
            .collect();

        let mut added = 0;
        if !missing.is_empty() {
            let mut updated = current.trim_end().to_string();
            for var in &missing {
                if !updated.is_empty() {
                    updated.push('\n');
                }
                updated.push_str(&format!("{}={}", var.name, var.value));
            }
            updated.push('\n');

            added = match existing {
                Some(original) => self.write_env_with_backup(env_path, &original, &updated, &missing),
                None => match write_atomic(env_path, &updated) {
                    Ok(()) => {
                        self.created.push(CreatedFile {
                            path: env_path.to_path_buf(),
                            reason: format!(
                                "defines {}",
                                missing.iter().map(|v| v.name).collect::<Vec<_>>().join(", ")
                            ),
                        });
                        missing.len()
                    }
                    Err(source) => {
                        return Err(PatchError::Write {
                            path: env_path.to_path_buf(),
                            source,
                        })
                    }
                },
            };
        }

        let example: String = required.iter().map(|v| format!("{}=\n", v.name)).collect();
        self.write_example(example_path, &example)?;
        Ok(added)
    }

    fn write_env_with_backup(
        &mut self,
        path: &Path,
        original: &str,
        updated: &str,
        missing: &[&RequiredVar],
    ) -> usize {
        let mut attempt = Attempt::new(path);
        let (state, backup_path, error) = match self.backup(path, original) {
            Ok(backup) => {
                attempt.advance(PatchState::BackedUp);
                attempt.advance(PatchState::MutatedInMemory);
                match write_atomic(path, updated) {
                    Ok(()) => (PatchState::Written, Some(backup.backup_path), None),
                    Err(err) => (PatchState::WriteFailed, Some(backup.backup_path), Some(err.to_string())),
                }
            }
            Err(err) => (PatchState::WriteFailed, None, Some(format!("backup failed: {}", err))),
        };
        attempt.advance(state);

        for var in missing {
            self.patches.push(ConfigPatch {
                kind: "environment_variables".to_string(),
                target_file: path.to_path_buf(),
                field_path: var.name.to_string(),
                old_value: Value::Null,
                new_value: Value::String(var.report_value().to_string()),
                success: state == PatchState::Written,
                outcome: state,
                backup_path: backup_path.clone(),
                error: error.clone(),
            });
        }
        if state == PatchState::Written {
            missing.len()
        } else {
            0
        }
    }

    fn write_example(&mut self, path: &Path, content: &str) -> Result<(), PatchError> {
        match fs::read_to_string(path) {
            Ok(existing) if existing == content => {}
            Ok(existing) => {
                let mut attempt = Attempt::new(path);
                let outcome = self.backup(path, &existing).map(|b| {
                    attempt.advance(PatchState::BackedUp);
                    attempt.advance(PatchState::MutatedInMemory);
                    (b.backup_path, write_atomic(path, content))
                });
                let (state, backup_path, error) = match outcome {
                    Ok((backup, Ok(()))) => (PatchState::Written, Some(backup), None),
                    Ok((backup, Err(err))) => (PatchState::WriteFailed, Some(backup), Some(err.to_string())),
                    Err(err) => (PatchState::WriteFailed, None, Some(format!("backup failed: {}", err))),
                };
                attempt.advance(state);
                self.patches.push(ConfigPatch {
                    kind: "environment_example".to_string(),
                    target_file: path.to_path_buf(),
                    field_path: "*".to_string(),
                    old_value: Value::String(existing),
                    new_value: Value::String(content.to_string()),
                    success: state == PatchState::Written,
                    outcome: state,
                    backup_path,
                    error,
                });
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                write_atomic(path, content).map_err(|source| PatchError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;
                self.created.push(CreatedFile {
                    path: path.to_path_buf(),
                    reason: "variable name template".to_string(),
                });
            }
            Err(source) => {
                return Err(PatchError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
        Ok(())
    }
}

pub fn backup_path_for(path: &Path, unix_millis: i64) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".backup.{}", unix_millis));
    PathBuf::from(name)
}

struct RequiredVar {
    name: &'static str,
    value: String,
    secret_from_env: bool,
}

impl RequiredVar {
    fn report_value(&self) -> &str {
        if self.secret_from_env {
            REDACTED
        } else {
            &self.value
        }
    }
}

fn required_env_vars(env: &Environment) -> Vec<RequiredVar> {
    let secret = |name: &'static str, value: &Option<String>| RequiredVar {
        name,
        value: value
            .clone()
            .unwrap_or_else(|| format!("your_{}{}", name.to_lowercase(), PLACEHOLDER_SUFFIX)),
        secret_from_env: value.is_some(),
    };
    vec![
        RequiredVar {
            name: "N8N_BASE_URL",
            value: env.n8n_base_url.clone(),
            secret_from_env: false,
        },
        secret("N8N_API_KEY", &env.n8n_api_key),
        secret("YOUTUBE_API_KEY", &env.youtube_api_key),
    ]
}

fn defines_var(content: &str, name: &str) -> bool {
    Regex::new(&format!(r"(?m)^{}=", regex::escape(name)))
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

/// Align the MCP server entry in the JSON config with the environment:
/// its `N8N_BASE_URL` and an `npx` launcher replaced by the local script.
pub fn apply_mcp_config_fixes(
    patcher: &mut Patcher,
    config_path: &Path,
    env: &Environment,
    server: &ServerSettings,
) -> Result<usize, PatchError> {
    let content = fs::read_to_string(config_path).map_err(|source| PatchError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    let doc: Value = serde_json::from_str(&content).map_err(|source| PatchError::InvalidJson {
        path: config_path.to_path_buf(),
        source,
    })?;

    let entry = ["mcpServers", server.name.as_str()];
    let base_url_field = FieldPath::from_segments(entry.iter().copied().chain(["env", "N8N_BASE_URL"]));
    let command_field = FieldPath::from_segments(entry.iter().copied().chain(["command"]));
    let args_field = FieldPath::from_segments(entry.iter().copied().chain(["args"]));

    let mut edits = Vec::new();
    if base_url_field.get(&doc).and_then(Value::as_str).is_some() {
        edits.push(JsonEdit::new(
            "base_url_config_fix",
            base_url_field,
            Value::String(env.n8n_base_url.clone()),
        ));
    }
    if command_field.get(&doc).and_then(Value::as_str) == Some("npx") {
        edits.push(JsonEdit::new(
            "command_fix",
            command_field,
            Value::String("node".to_string()),
        ));
        edits.push(JsonEdit::new(
            "command_fix",
            args_field,
            Value::from(server.local_args.clone()),
        ));
    }

    if edits.is_empty() {
        return Ok(0);
    }
    patcher.patch_json(config_path, &edits)
}
