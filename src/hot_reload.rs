// Shader hot-reload
//
// Watches the directories holding the compiled shaders and reports when one
// of them changes. Directories rather than files are watched because most
// editors and glslc replace files instead of writing them in place, which
// drops a per-file watch.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

pub struct ShaderWatcher {
    _watcher: RecommendedWatcher, // Dropping the watcher closes the channel
    events: Receiver<notify::Result<Event>>,
    file_names: HashSet<OsString>,
}

impl ShaderWatcher {
    pub fn new(files: &[&Path]) -> Result<Self> {
        let (tx, events) = channel();
        let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;

        let mut directories: HashSet<PathBuf> = HashSet::new();
        let mut file_names = HashSet::new();
        for file in files {
            let name = file
                .file_name()
                .with_context(|| format!("Shader path has no file name: {:?}", file))?;
            file_names.insert(name.to_os_string());

            let directory = match file.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if directories.insert(directory.clone()) {
                watcher
                    .watch(&directory, RecursiveMode::NonRecursive)
                    .with_context(|| format!("Failed to watch {:?}", directory))?;
                log::info!("Watching {:?} for shader changes", directory);
            }
        }

        Ok(Self {
            _watcher: watcher,
            events,
            file_names,
        })
    }

    /// Drain pending events; true if any watched shader changed since the
    /// last call. Several events for one save collapse into one `true`.
    pub fn poll_changed(&self) -> bool {
        let mut changed = false;
        for result in self.events.try_iter() {
            match result {
                Ok(event) => changed |= touches_shader(&event, &self.file_names),
                Err(e) => log::warn!("File watch error: {}", e),
            }
        }
        changed
    }
}

fn touches_shader(event: &Event, file_names: &HashSet<OsString>) -> bool {
    let writes = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    writes
        && event
            .paths
            .iter()
            .filter_map(|path| path.file_name())
            .any(|name| file_names.contains(name))
}
