//! 1Password adapter built on the official `op` command-line tool.
//!
//! Resolution goes through `op read`; write-back fetches the item, stages
//! the previous value into a `<field>_previous` field (or a `.bak` file
//! field for document items), and applies the new value. Authentication is
//! owned entirely by `op` (desktop-app integration or a service account);
//! an account can be pinned with the `OP_ACCOUNT` selector.

use crate::error::StoreError;
use crate::reference::{parse_reference, SecretReference};
use crate::SecretStore;
use serde::Deserialize;
use std::io::Write;
use std::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

/// Item shape returned by `op item get --format json`, reduced to the
/// pieces write-back needs.
#[derive(Debug, Deserialize)]
struct Item {
    id: String,
    category: String,
    #[serde(default)]
    fields: Vec<ItemField>,
}

#[derive(Debug, Deserialize)]
struct ItemField {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

impl Item {
    fn field(&self, name: &str) -> Option<&ItemField> {
        self.fields
            .iter()
            .find(|f| f.id == name || f.label.as_deref() == Some(name))
    }
}

/// [`SecretStore`] implementation shelling out to the `op` CLI.
pub struct OnePasswordCli {
    account: Option<String>,
    references: Vec<String>,
}

impl OnePasswordCli {
    /// Create an adapter for the given references, probing that the `op`
    /// binary is runnable. `account` selects a specific 1Password account
    /// (normally taken from `OP_ACCOUNT`).
    pub fn new(references: Vec<String>, account: Option<String>) -> Result<Self, StoreError> {
        let store = Self {
            account,
            references,
        };
        run(store.op().arg("--version"), "op --version")?;
        Ok(store)
    }

    fn op(&self) -> Command {
        let mut cmd = Command::new("op");
        if let Some(account) = &self.account {
            cmd.arg("--account").arg(account);
        }
        cmd
    }

    fn get_item(&self, secret: &SecretReference) -> Result<Item, StoreError> {
        let raw = run(
            self.op()
                .arg("item")
                .arg("get")
                .arg(&secret.item)
                .arg("--vault")
                .arg(&secret.vault)
                .arg("--format")
                .arg("json")
                .arg("--reveal"),
            "op item get",
        )?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Field write: stage the current value into `<field>_previous`, then
    /// set the new value, in a single `op item edit` invocation.
    fn write_field(
        &self,
        secret: &SecretReference,
        item: &Item,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let field = item
            .field(&secret.field)
            .ok_or_else(|| StoreError::FieldNotFound {
                field: secret.field.clone(),
                item: item.id.clone(),
            })?;
        let old = field.value.clone().unwrap_or_default();
        let previous = format!("{}_previous", secret.field);

        run(
            self.op()
                .arg("item")
                .arg("edit")
                .arg(&item.id)
                .arg("--vault")
                .arg(&secret.vault)
                .arg(format!("{previous}={old}"))
                .arg(format!(
                    "{}={}",
                    secret.field,
                    String::from_utf8_lossy(value)
                )),
            "op item edit",
        )?;
        Ok(())
    }

    /// Document write: keep the current bytes as a `.bak` file field, then
    /// replace the document content.
    fn write_document(
        &self,
        secret: &SecretReference,
        item: &Item,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let old = run(
            self.op()
                .arg("document")
                .arg("get")
                .arg(&item.id)
                .arg("--vault")
                .arg(&secret.vault),
            "op document get",
        )?;

        let mut backup = tempfile::Builder::new()
            .prefix(&format!("{}.bak", secret.field))
            .tempfile()?;
        backup.write_all(&old)?;
        backup.flush()?;

        run(
            self.op()
                .arg("item")
                .arg("edit")
                .arg(&item.id)
                .arg("--vault")
                .arg(&secret.vault)
                .arg(format!(
                    "backup_{}[file]={}",
                    secret.field,
                    backup.path().display()
                )),
            "op item edit",
        )?;

        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(value)?;
        staged.flush()?;

        run(
            self.op()
                .arg("document")
                .arg("edit")
                .arg(&item.id)
                .arg("--vault")
                .arg(&secret.vault)
                .arg(staged.path()),
            "op document edit",
        )?;
        Ok(())
    }
}

impl SecretStore for OnePasswordCli {
    fn resolve(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let value = run(
            self.op().arg("read").arg("--no-newline").arg(reference),
            "op read",
        )?;
        Ok(Zeroizing::new(value))
    }

    fn write(&self, reference: &str, value: &[u8]) -> Result<(), StoreError> {
        let secret = parse_reference(reference)?;
        let item = self.get_item(&secret)?;
        debug!(
            item = %item.id,
            category = %item.category,
            "writing secret back"
        );

        if item.category == "DOCUMENT" {
            self.write_document(&secret, &item, value)
        } else {
            self.write_field(&secret, &item, value)
        }
    }

    fn list(&self) -> Vec<String> {
        self.references.clone()
    }

    fn name(&self) -> &'static str {
        "1password"
    }
}

fn run(cmd: &mut Command, command: &'static str) -> Result<Vec<u8>, StoreError> {
    let output = cmd
        .output()
        .map_err(|source| StoreError::Spawn { command, source })?;
    if !output.status.success() {
        return Err(StoreError::Command {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_field_lookup_by_id_and_label() {
        let item: Item = serde_json::from_str(
            r#"{
                "id": "abc123",
                "category": "LOGIN",
                "fields": [
                    {"id": "password", "label": "password", "value": "s3cret"},
                    {"id": "f0", "label": "token", "value": "tok"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(item.field("password").unwrap().value.as_deref(), Some("s3cret"));
        assert_eq!(item.field("token").unwrap().id, "f0");
        assert!(item.field("missing").is_none());
    }

    #[test]
    fn item_parse_tolerates_extra_keys() {
        let item: Item = serde_json::from_str(
            r#"{
                "id": "abc123",
                "title": "GitHub",
                "category": "LOGIN",
                "vault": {"id": "v1"},
                "fields": []
            }"#,
        )
        .unwrap();
        assert_eq!(item.id, "abc123");
    }
}
