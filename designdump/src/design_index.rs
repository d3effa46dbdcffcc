use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::DecodeError;
use crate::hash::stable_hash;
use crate::reader::BinaryReader;

const INDEX_PREFIX: &str = "DesignV_";

/// One sub-chunk of a container file: a byte range holding a single
/// logical record, addressed by its 32-bit name hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkEntry {
    pub hash: i32,
    pub size: u64,
    pub offset: u64,
}

/// A directory row of the bundle: one chunk file plus its sub-chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub hash: i32,
    pub filename: String,
    pub size: u64,
    pub chunks: Vec<ChunkEntry>,
}

impl FileEntry {
    fn from_reader(reader: &mut BinaryReader) -> Result<Self, DecodeError> {
        let hash = reader.read_i32_be()?;
        let filename = bytes_to_hex(&reader.read_bytes(16)?) + ".bytes";
        let size = reader.read_u64_be()?;
        let chunk_count = reader.read_u32_be()?;
        let mut chunks = Vec::with_capacity(chunk_count as usize);
        for _ in 0..chunk_count {
            chunks.push(ChunkEntry {
                hash: reader.read_i32_be()?,
                size: reader.read_u64_be()?,
                offset: reader.read_u64_be()?,
            });
        }
        reader.skip(1);
        Ok(Self {
            hash,
            filename,
            size,
            chunks,
        })
    }
}

/// Directory of the design data bundle. Maps chunk hashes to byte
/// ranges of the sibling chunk files; immutable once loaded.
pub struct DesignIndex {
    dir_path: PathBuf,
    files: Vec<FileEntry>,
    entries: HashMap<i32, (usize, usize)>,
}

impl DesignIndex {
    /// Accepts either the design data folder (the first `DesignV_*`
    /// child is used) or a specific index file.
    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        if path.is_dir() {
            let dir = std::fs::read_dir(path)
                .map_err(|e| DecodeError::File(format!("{}: {}", path.display(), e)))?;
            for entry in dir {
                let entry = entry.map_err(|e| DecodeError::File(e.to_string()))?;
                if entry.file_name().to_string_lossy().starts_with(INDEX_PREFIX) {
                    return Self::load_file(&entry.path(), path);
                }
            }
            log::error!(
                "{}* file not found. Make sure the path points at the design data folder, \
                 or pass a specific index file instead.",
                INDEX_PREFIX
            );
            Err(DecodeError::IndexNotFound(path.display().to_string()))
        } else if path.is_file() {
            let basename = path.file_name().unwrap_or_default().to_string_lossy();
            if !basename.starts_with(INDEX_PREFIX) {
                log::warn!(
                    "{} does not carry the {} prefix; parsing it anyway",
                    basename,
                    INDEX_PREFIX
                );
            }
            let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
            Self::load_file(path, &dir)
        } else {
            Err(DecodeError::IndexNotFound(format!(
                "{} is neither a file nor a directory",
                path.display()
            )))
        }
    }

    fn load_file(path: &Path, dir: &Path) -> Result<Self, DecodeError> {
        log::info!("Loading design index from {}", path.display());
        let mut reader = BinaryReader::from_file(path)?;
        let file_count = reader.read_u32_be()?;
        let mut files = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            files.push(FileEntry::from_reader(&mut reader)?);
        }
        // on duplicate hashes the last chunk wins
        let mut entries = HashMap::new();
        for (file_idx, file) in files.iter().enumerate() {
            for (chunk_idx, chunk) in file.chunks.iter().enumerate() {
                entries.insert(chunk.hash, (file_idx, chunk_idx));
            }
        }
        log::info!("Loaded {} files", files.len());
        log::info!("Loaded {} entries", entries.len());
        Ok(Self {
            dir_path: dir.to_path_buf(),
            files,
            entries,
        })
    }

    pub fn entry(&self, hash: i32) -> Option<(&FileEntry, &ChunkEntry)> {
        let &(file_idx, chunk_idx) = self.entries.get(&hash)?;
        let file = &self.files[file_idx];
        Some((file, &file.chunks[chunk_idx]))
    }

    pub fn entry_by_name(&self, name: &str) -> Option<(&FileEntry, &ChunkEntry)> {
        let hash = stable_hash(name);
        let entry = self.entry(hash);
        if entry.is_none() {
            log::warn!("Can't find entry for hash {} ({})", hash, name);
        }
        entry
    }

    /// Materializes the chunk's byte range as an owned reader. `None`
    /// when the name is not in the directory; the caller decides
    /// whether that is an error.
    pub fn reader_by_name(&self, name: &str) -> Result<Option<BinaryReader>, DecodeError> {
        match self.entry_by_name(name) {
            Some((file, chunk)) => self.open_chunk(file, chunk).map(Some),
            None => Ok(None),
        }
    }

    /// Writes one chunk's raw bytes to disk, addressed by hash or by
    /// name (exactly one of the two). A missing entry is a no-op; the
    /// lookup already warned about it.
    pub fn dump(
        &self,
        path: &Path,
        hash: Option<i32>,
        name: Option<&str>,
    ) -> Result<(), DecodeError> {
        let entry = match (hash, name) {
            (Some(hash), None) => self.entry(hash),
            (None, Some(name)) => self.entry_by_name(name),
            _ => {
                return Err(DecodeError::Lookup(
                    "exactly one of hash and name must be provided".to_string(),
                ))
            }
        };
        let (file, chunk) = match entry {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let mut reader = self.open_chunk(file, chunk)?;
        std::fs::write(path, reader.read_all())
            .map_err(|e| DecodeError::File(format!("{}: {}", path.display(), e)))
    }

    fn open_chunk(
        &self,
        file: &FileEntry,
        chunk: &ChunkEntry,
    ) -> Result<BinaryReader, DecodeError> {
        let path = self.dir_path.join(&file.filename);
        let buffer = std::fs::read(&path)
            .map_err(|e| DecodeError::File(format!("{}: {}", path.display(), e)))?;
        let start = chunk.offset as usize;
        let end = start.checked_add(chunk.size as usize).filter(|&end| end <= buffer.len());
        match end {
            Some(end) => Ok(BinaryReader::from_vec(buffer[start..end].to_vec())),
            None => Err(DecodeError::BufferNotEnough(format!(
                "chunk 0x{:x}+0x{:x} exceeds {} ({} bytes)",
                chunk.offset,
                chunk.size,
                file.filename,
                buffer.len()
            ))),
        }
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const CHUNK_NAME: &str = "BakedConfig/ConfigManifest.json";

    fn push_file_entry(out: &mut Vec<u8>, name16: &[u8; 16], chunks: &[(i32, &[u8], u64)]) {
        out.extend_from_slice(&0x1234i32.to_be_bytes());
        out.extend_from_slice(name16);
        let total: u64 = chunks.iter().map(|(_, data, _)| data.len() as u64).sum();
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&(chunks.len() as u32).to_be_bytes());
        for (hash, data, offset) in chunks {
            out.extend_from_slice(&hash.to_be_bytes());
            out.extend_from_slice(&(data.len() as u64).to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
        }
        out.push(0);
    }

    fn build_bundle(dir: &Path) -> Result<()> {
        let name16 = [0xabu8; 16];
        // chunk file holds two records back to back
        let first = br#"{"ItemConfig": []}"#;
        let second = b"\x01\x02";
        let mut blob = Vec::new();
        blob.extend_from_slice(first);
        blob.extend_from_slice(second);
        std::fs::write(dir.join(bytes_to_hex(&name16) + ".bytes"), &blob)?;

        let mut index = Vec::new();
        index.extend_from_slice(&1u32.to_be_bytes());
        push_file_entry(
            &mut index,
            &name16,
            &[
                (stable_hash(CHUNK_NAME), first.as_slice(), 0),
                (stable_hash("BakedConfig/Other.bytes"), second.as_slice(), first.len() as u64),
            ],
        );
        std::fs::write(dir.join("DesignV_0123.bytes"), &index)?;
        Ok(())
    }

    #[test]
    fn test_load_from_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        build_bundle(dir.path())?;
        let index = DesignIndex::load(dir.path())?;
        assert_eq!(index.files().len(), 1);
        assert_eq!(index.files()[0].filename, format!("{}.bytes", "ab".repeat(16)));
        assert_eq!(index.files()[0].chunks.len(), 2);

        let mut reader = index.reader_by_name(CHUNK_NAME)?.unwrap();
        assert_eq!(reader.read_all(), br#"{"ItemConfig": []}"#);

        let mut reader = index.reader_by_name("BakedConfig/Other.bytes")?.unwrap();
        assert_eq!(reader.read_byte()?, 1);
        assert_eq!(reader.read_byte()?, 2);

        assert!(index.reader_by_name("BakedConfig/Missing.bytes")?.is_none());
        Ok(())
    }

    #[test]
    fn test_load_single_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        build_bundle(dir.path())?;
        let index = DesignIndex::load(&dir.path().join("DesignV_0123.bytes"))?;
        assert!(index.reader_by_name(CHUNK_NAME)?.is_some());
        Ok(())
    }

    #[test]
    fn test_dump_writes_raw_chunk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        build_bundle(dir.path())?;
        let index = DesignIndex::load(dir.path())?;

        let by_name = dir.path().join("manifest.raw");
        index.dump(&by_name, None, Some(CHUNK_NAME))?;
        assert_eq!(std::fs::read(&by_name)?, br#"{"ItemConfig": []}"#);

        let by_hash = dir.path().join("other.raw");
        index.dump(&by_hash, Some(stable_hash("BakedConfig/Other.bytes")), None)?;
        assert_eq!(std::fs::read(&by_hash)?, [0x01, 0x02]);

        // a missing entry is a silent no-op
        let missing = dir.path().join("missing.raw");
        index.dump(&missing, None, Some("BakedConfig/Missing.bytes"))?;
        assert!(!missing.exists());

        assert!(matches!(
            index.dump(&missing, Some(1), Some(CHUNK_NAME)),
            Err(DecodeError::Lookup(_))
        ));
        assert!(matches!(
            index.dump(&missing, None, None),
            Err(DecodeError::Lookup(_))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_index_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(
            DesignIndex::load(dir.path()),
            Err(DecodeError::IndexNotFound(_))
        ));
        Ok(())
    }
}
