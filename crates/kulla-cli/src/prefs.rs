use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const REPLAY_FILE: &str = "replay.txt";
const STARTUP_FILE: &str = "startup.txt";
/// Separates replay entries, which may themselves span lines.
const RECORD_SEPARATOR: &str = "\u{241E}";

/// Tool state kept between sessions under the preferences directory.
#[derive(Debug, Clone)]
pub(crate) struct Prefs {
    dir: PathBuf,
}

impl Prefs {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Replayable history saved by the last `/exit`.
    pub(crate) fn replay(&self) -> Result<Option<Vec<String>>> {
        Ok(self.read(REPLAY_FILE)?.map(|raw| {
            raw.split(RECORD_SEPARATOR)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect()
        }))
    }

    pub(crate) fn save_replay(&self, entries: &[String]) -> Result<()> {
        self.write(REPLAY_FILE, &entries.join(RECORD_SEPARATOR))
    }

    /// Startup script set with `/setstart`.
    pub(crate) fn startup(&self) -> Result<Option<String>> {
        self.read(STARTUP_FILE)
    }

    pub(crate) fn save_startup(&self, text: &str) -> Result<()> {
        self.write(STARTUP_FILE, text)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.path(name);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    fn write(&self, name: &str, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed creating {}", self.dir.display()))?;
        let path = self.path(name);
        fs::write(&path, contents).with_context(|| format!("failed writing {}", path.display()))
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::Prefs;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_files_read_as_none() {
        let dir = tempdir().expect("tempdir should work");
        let prefs = Prefs::new(dir.path().join("absent"));
        assert_eq!(prefs.replay().expect("read should work"), None);
        assert_eq!(prefs.startup().expect("read should work"), None);
    }

    #[test]
    fn multi_line_replay_entries_survive() {
        let dir = tempdir().expect("tempdir should work");
        let prefs = Prefs::new(dir.path().join("prefs"));
        let entries = vec![
            "int x = 1;".to_string(),
            "int f() {\n  return x;\n}".to_string(),
            "/drop x".to_string(),
        ];
        prefs.save_replay(&entries).expect("save should work");
        assert_eq!(prefs.replay().expect("read should work"), Some(entries));
        assert!(prefs.dir().join("replay.txt").exists());
    }

    #[test]
    fn startup_is_stored_verbatim() {
        let dir = tempdir().expect("tempdir should work");
        let prefs = Prefs::new(dir.path().to_path_buf());
        prefs
            .save_startup("import java.util.*;\n")
            .expect("save should work");
        assert_eq!(
            fs::read_to_string(dir.path().join("startup.txt")).expect("file should exist"),
            "import java.util.*;\n"
        );
        assert_eq!(
            prefs.startup().expect("read should work").as_deref(),
            Some("import java.util.*;\n")
        );
    }
}
