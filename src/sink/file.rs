use super::Sink;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

const TEMP_SUFFIX: &str = ".tmp";
const READY_SUFFIX: &str = ".ready";

/// Writes artifacts into a local directory.
///
/// Each artifact is written under a temporary name and renamed into place,
/// so a reader never sees a partial file under the final name. A zero-byte
/// `<name>.ready` marker follows the rename for processes that poll.
#[derive(Debug, Clone)]
pub struct FileSink {
    base_path: PathBuf,
}

impl FileSink {
    /// Creates the directory when it does not exist.
    pub async fn create(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    async fn write_atomic(&self, name: &str, contents: &[u8]) -> Result<()> {
        let target = self.path_of(name);
        let temp = self.path_of(&format!("{}{}", name, TEMP_SUFFIX));

        if let Err(e) = fs::write(&temp, contents).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        fs::rename(&temp, &target).await?;
        fs::write(self.path_of(&format!("{}{}", name, READY_SUFFIX)), b"").await?;

        debug!("wrote {} ({} bytes)", target.display(), contents.len());
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn write_chunk(&self, name: &str, data: Bytes) -> Result<()> {
        self.write_atomic(name, &data).await
    }

    async fn write_manifest(&self, name: &str, text: &str) -> Result<()> {
        self.write_atomic(name, text.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_writes_artifact_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::create(dir.path().join("results")).await.unwrap();

        sink.write_chunk("chunk_00000.ts", Bytes::from_static(&[0x47; 376]))
            .await
            .unwrap();
        sink.write_manifest("chunklist.m3u8", "#EXTM3U\n").await.unwrap();

        let base = dir.path().join("results");
        assert_eq!(std::fs::read(base.join("chunk_00000.ts")).unwrap().len(), 376);
        assert_eq!(std::fs::read(base.join("chunk_00000.ts.ready")).unwrap().len(), 0);
        assert_eq!(
            std::fs::read_to_string(base.join("chunklist.m3u8")).unwrap(),
            "#EXTM3U\n"
        );
        assert!(!base.join("chunk_00000.ts.tmp").exists());
        assert!(!base.join("chunklist.m3u8.tmp").exists());
    }

    #[test]
    fn test_manifest_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sink = tokio_test::block_on(async {
            let sink = FileSink::create(dir.path()).await.unwrap();
            tokio_test::assert_ok!(sink.write_manifest("chunklist.m3u8", "first").await);
            tokio_test::assert_ok!(sink.write_manifest("chunklist.m3u8", "second").await);
            sink
        });
        assert_eq!(
            std::fs::read_to_string(sink.path_of("chunklist.m3u8")).unwrap(),
            "second"
        );
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::create(dir.path().join("gone")).await.unwrap();
        std::fs::remove_dir(sink.base_path()).unwrap();
        assert!(sink
            .write_chunk("chunk_00000.ts", Bytes::from_static(b"x"))
            .await
            .is_err());
    }
}
