//! Files a transcode run leaves behind in its working directory.

use std::io;
use std::path::{Path, PathBuf};

/// Name the downloaded source is stored under inside a working directory.
pub const SOURCE_FILE_NAME: &str = "source.mp4";

/// Name of the top-level HLS manifest the encoder must produce.
pub const MASTER_PLAYLIST: &str = "master.m3u8";

pub const HLS_MANIFEST_MIME: &str = "application/vnd.apple.mpegurl";
pub const HLS_SEGMENT_MIME: &str = "video/MP2T";

/// Content type for an uploaded artifact, decided by its suffix.
pub fn content_type_for(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "m3u8" => HLS_MANIFEST_MIME.to_string(),
        Some(ext) if ext == "ts" => HLS_SEGMENT_MIME.to_string(),
        Some(_) => mime_guess::from_path(path).first_or_octet_stream().to_string(),
        None => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

/// The output files of one executor run, source excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub files: Vec<PathBuf>,
}

impl ArtifactSet {
    /// Collects every regular file directly under `dir` except the source upload.
    pub async fn scan(dir: &Path) -> io::Result<Self> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                continue;
            }
            if entry.file_name() == SOURCE_FILE_NAME {
                continue;
            }
            files.push(entry.path());
        }

        files.sort();
        Ok(Self { files })
    }

    /// Whether the encoder wrote the top-level playlist the public URL points at.
    pub fn has_master_playlist(&self) -> bool {
        self.files
            .iter()
            .any(|f| f.file_name().is_some_and(|n| n == MASTER_PLAYLIST))
    }

    /// File name of `path`, used as the object key suffix.
    pub fn relative_name(path: &Path) -> Option<String> {
        path.file_name().and_then(|n| n.to_str()).map(str::to_string)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_follow_suffix() {
        assert_eq!(content_type_for(Path::new("master.m3u8")), HLS_MANIFEST_MIME);
        assert_eq!(content_type_for(Path::new("v0/seg_001.TS")), HLS_SEGMENT_MIME);
        assert_eq!(content_type_for(Path::new("blob.unknownext")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn scan_skips_source_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(SOURCE_FILE_NAME), b"raw").await.unwrap();
        tokio::fs::write(dir.path().join("master.m3u8"), b"#EXTM3U").await.unwrap();
        tokio::fs::write(dir.path().join("seg_000.ts"), b"ts").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let set = ArtifactSet::scan(dir.path()).await.unwrap();

        let names: Vec<_> = set.files.iter().filter_map(|f| ArtifactSet::relative_name(f)).collect();
        assert_eq!(names, vec!["master.m3u8", "seg_000.ts"]);
        assert!(set.has_master_playlist());
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn scan_of_source_only_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(SOURCE_FILE_NAME), b"raw").await.unwrap();

        let set = ArtifactSet::scan(dir.path()).await.unwrap();
        assert!(set.is_empty());
        assert!(!set.has_master_playlist());
    }
}
