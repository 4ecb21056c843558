use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Small JSON object file used as a durable key/value table.
///
/// Every read goes to disk, and every write merges the touched key into the
/// current on-disk content, so two handles on the same file never drop each
/// other's keys.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.load()?.get(key).cloned())
    }

    pub fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut on_disk = self.load()?;
        if on_disk.get(key) == Some(&value) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), value);
        write_json_object(&self.path, &on_disk)
    }

    pub fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut on_disk = self.load()?;
        if on_disk.remove(key).is_none() {
            return Ok(());
        }
        write_json_object(&self.path, &on_disk)
    }

    /// A missing file is an empty table; an unreadable one is an error.
    fn load(&self) -> anyhow::Result<Map<String, Value>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        let parsed: Value = serde_json::from_str(&raw)?;
        match parsed {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("{} does not hold a JSON object", self.path.display()),
        }
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let staging = path.with_extension("json.tmp");
    std::fs::write(
        &staging,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::StateFile;

    #[test]
    fn missing_file_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("state.json");
        let state = StateFile::new(&path);
        assert_eq!(state.get("42")?, None);
        state.remove("42")?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn set_merges_with_concurrent_writer() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let state_a = StateFile::new(&path);
        let state_b = StateFile::new(&path);

        state_a.set("a", json!(true))?;
        state_b.set("b", json!(false))?;
        state_a.set("c", json!(true))?;

        let reloaded = StateFile::new(path);
        assert_eq!(reloaded.get("a")?, Some(json!(true)));
        assert_eq!(reloaded.get("b")?, Some(json!(false)));
        assert_eq!(reloaded.get("c")?, Some(json!(true)));
        Ok(())
    }

    #[test]
    fn get_sees_other_handles_writes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let state_a = StateFile::new(&path);
        let state_b = StateFile::new(&path);

        state_a.set("key", json!(1))?;
        assert_eq!(state_b.get("key")?, Some(json!(1)));

        state_b.set("key", json!(2))?;
        assert_eq!(state_a.get("key")?, Some(json!(2)));

        state_a.remove("key")?;
        assert_eq!(state_b.get("key")?, None);
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        std::fs::write(&path, "[1, 2]")?;
        assert!(StateFile::new(path).get("key").is_err());
        Ok(())
    }
}
