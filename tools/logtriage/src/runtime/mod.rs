use crate::errors::TriageError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, TriageError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TriageError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), TriageError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), TriageError>;
    fn remove_file(&self, path: &Path) -> Result<(), TriageError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), TriageError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, TriageError> {
        std::fs::read_to_string(path)
            .map_err(|e| TriageError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TriageError> {
        std::fs::write(path, contents)
            .map_err(|e| TriageError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), TriageError> {
        std::fs::create_dir_all(path)
            .map_err(|e| TriageError::Io(format!("{}: {e}", path.display())))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), TriageError> {
        std::fs::rename(from, to).map_err(|e| {
            TriageError::Io(format!("{} -> {}: {e}", from.display(), to.display()))
        })
    }

    fn remove_file(&self, path: &Path) -> Result<(), TriageError> {
        std::fs::remove_file(path)
            .map_err(|e| TriageError::Io(format!("{}: {e}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), TriageError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| TriageError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: SystemTime) {
        *self.now.lock().expect("clock lock") = now;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<TriageError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: TriageError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .expect("files lock")
            .get(path.as_ref())
            .cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.lock().expect("files lock").keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().expect("dirs lock").clone()
    }

    fn maybe_fail(&self) -> Result<(), TriageError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, TriageError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| TriageError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TriageError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), TriageError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), TriageError> {
        self.maybe_fail()?;
        let mut files = self.files.lock().expect("files lock");
        let contents = files
            .remove(from)
            .ok_or_else(|| TriageError::Io(format!("missing file {}", from.display())))?;
        files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), TriageError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| TriageError::Io(format!("missing file {}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), TriageError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}
