//! Ordered list of performance files with a play cursor.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// `true` when the path carries a `.mid` extension, ignoring case.
pub fn is_midi_file_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mid"))
        .unwrap_or(false)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Files to play plus the index of the next one.
///
/// `current` may equal `len()` between the end of one file and the loop
/// decision; [`Playlist::resolve`] settles it.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    entries: Vec<PathBuf>,
    current: usize,
    looping: bool,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BridgeError::file(path, "not a file"));
        }
        if !is_midi_file_name(path) {
            return Err(BridgeError::file(path, "not a .mid file"));
        }
        self.entries.push(path.to_path_buf());
        Ok(())
    }

    /// Append every `.mid` file in `dir`, sorted by file name. Returns how
    /// many were added.
    pub fn add_directory<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(BridgeError::file(dir, "not a directory"));
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| BridgeError::file(dir, e))? {
            let path = entry.map_err(|e| BridgeError::file(dir, e))?.path();
            if path.is_file() && is_midi_file_name(&path) {
                found.push(path);
            }
        }
        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        let added = found.len();
        self.entries.extend(found);
        Ok(added)
    }

    /// Drop intake: keep paths named `*.mid`, reject the rest.
    pub fn add_paths<I, P>(&mut self, paths: I) -> (Vec<PathBuf>, Vec<PathBuf>)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut added = Vec::new();
        let mut rejected = Vec::new();
        for path in paths.into_iter().map(Into::into) {
            if is_midi_file_name(&path) {
                self.entries.push(path.clone());
                added.push(path);
            } else {
                rejected.push(path);
            }
        }
        (added, rejected)
    }

    /// Remove one entry. The cursor keeps pointing at the same file, or at
    /// the one that followed the removed entry.
    pub fn remove(&mut self, index: usize) -> Option<PathBuf> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index);
        if index < self.current {
            self.current -= 1;
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = 0;
    }

    /// Move the cursor by `delta`, wrapping both ways. No-op when empty.
    pub fn step(&mut self, delta: isize) -> Option<usize> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        let next = (self.current.min(len) as isize + delta).rem_euclid(len as isize);
        self.current = next as usize;
        Some(self.current)
    }

    /// Past the file just played.
    pub fn advance(&mut self) {
        self.current = self.current.saturating_add(1);
    }

    /// The file at the cursor, applying the loop decision when the cursor has
    /// run off the end. `None` means the playlist is exhausted.
    pub fn resolve(&mut self) -> Option<PathBuf> {
        if self.current >= self.entries.len() {
            if self.looping && !self.entries.is_empty() {
                self.current = 0;
            } else {
                return None;
            }
        }
        self.entries.get(self.current).cloned()
    }

    pub fn reset_index(&mut self) {
        self.current = 0;
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn first(&self) -> Option<&Path> {
        self.entries.first().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Numbered listing of base names.
    pub fn describe(&self) -> String {
        if self.entries.is_empty() {
            return "No playlist loaded.".to_string();
        }
        let mut text = String::from("Playlist:\n");
        for (idx, path) in self.entries.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", idx + 1, display_name(path)));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap();
        path
    }

    fn playlist_of(n: usize) -> Playlist {
        let mut playlist = Playlist::new();
        playlist.add_paths((0..n).map(|i| format!("song{}.mid", i)));
        playlist
    }

    #[test]
    fn add_file_checks_existence_and_extension() {
        let dir = TempDir::new().unwrap();
        let song = touch(&dir, "Song.MID");
        let text = touch(&dir, "notes.txt");

        let mut playlist = Playlist::new();
        playlist.add_file(&song).unwrap();
        assert!(playlist.add_file(&text).is_err());
        assert!(playlist.add_file(dir.path().join("missing.mid")).is_err());
        assert_eq!(playlist.entries(), &[song]);
    }

    #[test]
    fn add_directory_sorts_by_name() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "b.mid");
        touch(&dir, "a.mid");
        touch(&dir, "c.MID");
        touch(&dir, "readme.txt");
        fs::create_dir(dir.path().join("nested.mid")).unwrap();

        let mut playlist = Playlist::new();
        assert_eq!(playlist.add_directory(dir.path()).unwrap(), 3);
        let names: Vec<String> = playlist.entries().iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["a.mid", "b.mid", "c.MID"]);
    }

    #[test]
    fn add_paths_reports_rejections() {
        let mut playlist = Playlist::new();
        let (added, rejected) = playlist.add_paths(["x.mid", "y.wav", "z.Mid"]);
        assert_eq!(added.len(), 2);
        assert_eq!(rejected, vec![PathBuf::from("y.wav")]);
        assert_eq!(playlist.len(), 2);
    }

    #[test]
    fn step_wraps_both_ways() {
        let mut playlist = playlist_of(3);
        assert_eq!(playlist.step(-1), Some(2));
        assert_eq!(playlist.step(1), Some(0));
        assert_eq!(Playlist::new().step(1), None);
    }

    #[test]
    fn resolve_applies_loop_decision() {
        let mut playlist = playlist_of(2);
        playlist.advance();
        playlist.advance();
        assert_eq!(playlist.resolve(), None);

        playlist.set_looping(true);
        assert_eq!(playlist.resolve(), Some(PathBuf::from("song0.mid")));
        assert_eq!(playlist.current_index(), 0);
    }

    #[test]
    fn remove_keeps_cursor_on_same_file() {
        let mut playlist = playlist_of(4);
        playlist.step(2);
        playlist.remove(0);
        assert_eq!(playlist.resolve(), Some(PathBuf::from("song2.mid")));
        playlist.remove(1);
        assert_eq!(playlist.resolve(), Some(PathBuf::from("song3.mid")));
        assert!(playlist.remove(10).is_none());
    }

    #[test]
    fn describe_lists_base_names() {
        assert_eq!(Playlist::new().describe(), "No playlist loaded.");
        let mut playlist = Playlist::new();
        playlist.add_paths(["/music/one.mid", "/music/two.mid"]);
        assert_eq!(playlist.describe(), "Playlist:\n1. one.mid\n2. two.mid\n");
    }
}
