// files.rs — game file lookup over directories and pack archives

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::common::com_dprintf;

const IDPAKHEADER: &[u8; 4] = b"PACK";
const PAK_ENTRY_SIZE: usize = 64; // 56 byte name, position, length
const MAX_FILES_IN_PACK: usize = 4096;

/// A file found on the search path.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFile {
    pub data: Vec<u8>,
    /// True when the file came out of a pack archive rather than a loose
    /// file. Such files are never offered for download.
    pub from_pak: bool,
}

/// Where the server finds files it may hand to clients.
pub trait FileSource {
    fn load_file(&self, name: &str) -> Option<LoadedFile>;
}

/// A pack archive held in memory, indexed by lowercase name.
#[derive(Debug, Default)]
pub struct Pack {
    pub filename: String,
    files: HashMap<String, Vec<u8>>,
}

impl Pack {
    pub fn new(filename: &str) -> Self {
        Self { filename: filename.to_string(), files: HashMap::new() }
    }

    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.files.insert(name.to_lowercase(), data);
    }

    pub fn find_file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(&name.to_lowercase()).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Parses a `.pak` archive image. Returns `None` for anything that is
    /// not a well formed pack.
    pub fn from_bytes(filename: &str, bytes: &[u8]) -> Option<Self> {
        let le32 = |at: usize| -> Option<usize> {
            let b = bytes.get(at..at + 4)?;
            let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            usize::try_from(v).ok()
        };

        if bytes.get(0..4)? != IDPAKHEADER {
            return None;
        }
        let dirofs = le32(4)?;
        let dirlen = le32(8)?;
        let numfiles = dirlen / PAK_ENTRY_SIZE;
        if numfiles > MAX_FILES_IN_PACK {
            tracing::warn!(filename, numfiles, "pack has too many files");
            return None;
        }

        let mut pack = Pack::new(filename);
        for i in 0..numfiles {
            let entry = dirofs + i * PAK_ENTRY_SIZE;
            let raw_name = bytes.get(entry..entry + 56)?;
            let end = raw_name.iter().position(|&b| b == 0).unwrap_or(56);
            let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();
            let filepos = le32(entry + 56)?;
            let filelen = le32(entry + 60)?;
            let data = bytes.get(filepos..filepos + filelen)?;
            pack.insert(&name, data.to_vec());
        }

        com_dprintf(&format!("Added packfile {} ({} files)\n", filename, numfiles));
        Some(pack)
    }
}

#[derive(Debug)]
pub enum SearchPath {
    Directory(PathBuf),
    Pack(Pack),
}

/// Ordered search path; earlier entries win.
#[derive(Debug, Default)]
pub struct FsContext {
    pub search_paths: Vec<SearchPath>,
}

impl FsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory, then any `pakN.pak` files inside it ahead of it, the
    /// way a game directory is mounted.
    pub fn add_game_directory(&mut self, dir: &Path) {
        let mut paks = Vec::new();
        for i in 0..10 {
            let pakfile = dir.join(format!("pak{}.pak", i));
            let Ok(bytes) = std::fs::read(&pakfile) else {
                continue;
            };
            match Pack::from_bytes(&pakfile.to_string_lossy(), &bytes) {
                Some(pack) => paks.push(SearchPath::Pack(pack)),
                None => tracing::warn!(path = %pakfile.display(), "not a packfile"),
            }
        }

        // newest pak first, then the loose directory
        let mut front: Vec<SearchPath> = paks.into_iter().rev().collect();
        front.push(SearchPath::Directory(dir.to_path_buf()));
        front.append(&mut self.search_paths);
        self.search_paths = front;
    }

    pub fn add_pack(&mut self, pack: Pack) {
        self.search_paths.insert(0, SearchPath::Pack(pack));
    }
}

impl FileSource for FsContext {
    fn load_file(&self, name: &str) -> Option<LoadedFile> {
        for sp in &self.search_paths {
            match sp {
                SearchPath::Pack(pack) => {
                    if let Some(data) = pack.find_file(name) {
                        com_dprintf(&format!("PackFile: {} : {}\n", pack.filename, name));
                        return Some(LoadedFile { data: data.to_vec(), from_pak: true });
                    }
                }
                SearchPath::Directory(dir) => {
                    let netpath = dir.join(name);
                    if let Ok(data) = std::fs::read(&netpath) {
                        com_dprintf(&format!("FindFile: {}\n", netpath.display()));
                        return Some(LoadedFile { data, from_pak: false });
                    }
                }
            }
        }

        com_dprintf(&format!("FindFile: can't find {}\n", name));
        None
    }
}

/// A purely in-memory file source.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: HashMap<String, LoadedFile>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, name: &str, data: &[u8], from_pak: bool) {
        self.files.insert(name.to_string(), LoadedFile { data: data.to_vec(), from_pak });
    }
}

impl FileSource for MemoryFileSystem {
    fn load_file(&self, name: &str) -> Option<LoadedFile> {
        self.files.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pak(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        let mut dir = Vec::new();
        for (name, data) in entries {
            let pos = 12 + body.len();
            body.extend_from_slice(data);
            let mut raw = [0u8; 56];
            raw[..name.len()].copy_from_slice(name.as_bytes());
            dir.extend_from_slice(&raw);
            dir.extend_from_slice(&(pos as i32).to_le_bytes());
            dir.extend_from_slice(&(data.len() as i32).to_le_bytes());
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"PACK");
        out.extend_from_slice(&((12 + body.len()) as i32).to_le_bytes());
        out.extend_from_slice(&(dir.len() as i32).to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&dir);
        out
    }

    #[test]
    fn test_pack_from_bytes() {
        let bytes = build_pak(&[("maps/base1.bsp", b"bsp"), ("Sound/A.wav", b"wav!")]);
        let pack = Pack::from_bytes("pak0.pak", &bytes).unwrap();
        assert_eq!(pack.len(), 2);
        assert_eq!(pack.find_file("maps/base1.bsp"), Some(&b"bsp"[..]));
        assert_eq!(pack.find_file("sound/a.wav"), Some(&b"wav!"[..]));
    }

    #[test]
    fn test_pack_rejects_garbage() {
        assert!(Pack::from_bytes("x", b"NOPE").is_none());
        let mut bytes = build_pak(&[("a", b"1234")]);
        bytes.truncate(bytes.len() - 10);
        assert!(Pack::from_bytes("x", &bytes).is_none());
    }

    #[test]
    fn test_search_order_and_pak_flag() {
        let dir = std::env::temp_dir().join(format!("q2sync-files-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("maps")).unwrap();
        std::fs::write(dir.join("maps/loose.bsp"), b"loose").unwrap();
        std::fs::write(dir.join("maps/both.bsp"), b"dir").unwrap();
        std::fs::write(dir.join("pak0.pak"), build_pak(&[("maps/both.bsp", b"pak")])).unwrap();

        let mut fs = FsContext::new();
        fs.add_game_directory(&dir);

        let loose = fs.load_file("maps/loose.bsp").unwrap();
        assert_eq!(loose.data, b"loose");
        assert!(!loose.from_pak);

        let both = fs.load_file("maps/both.bsp").unwrap();
        assert_eq!(both.data, b"pak");
        assert!(both.from_pak);

        assert!(fs.load_file("maps/missing.bsp").is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_file_system() {
        let mut fs = MemoryFileSystem::new();
        fs.add_file("players/male/tris.md2", b"md2", false);
        let f = fs.load_file("players/male/tris.md2").unwrap();
        assert_eq!(f.data, b"md2");
        assert!(fs.load_file("nothing").is_none());
    }
}
