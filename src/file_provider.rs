use std::io;
use std::io::SeekFrom;
use std::path::Path;
use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use mockall::automock;

#[automock]
#[async_trait]
pub trait FileProvider: Send {
    async fn read(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>>;
    async fn write(&mut self, offset: u64, data: Vec<u8>) -> io::Result<()>;
}

pub struct TokioFileProvider {
    file: File,
}

impl TokioFileProvider {
    pub fn new(file: File) -> Self {
        return TokioFileProvider { file };
    }

    /// Opens an existing, complete copy of the shared file without write access.
    pub async fn open_read_only(path: &Path, expected_length: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path).await?;
        let actual_length = file.metadata().await?.len();
        if actual_length < expected_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} holds {} bytes, expected {}", path.display(), actual_length, expected_length),
            ));
        }
        return Ok(TokioFileProvider::new(file));
    }

    /// Creates (or truncates) the target file and sizes it to `length`.
    pub async fn create(path: &Path, length: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.set_len(length).await?;
        return Ok(TokioFileProvider::new(file));
    }
}

#[async_trait]
impl FileProvider for TokioFileProvider {
    async fn read(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut buffer).await?;
        return Ok(buffer);
    }

    async fn write(&mut self, offset: u64, data: Vec<u8>) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(&data).await?;
        self.file.flush().await?;
        return self.file.sync_data().await;
    }
}

#[cfg(test)]
mod tests {
    use tempfile::{tempdir, tempfile};
    use super::*;

    #[tokio::test]
    async fn test_read_and_write() {
        let temp_file = tempfile().unwrap();
        let mut file_provider = TokioFileProvider {
            file: File::from_std(temp_file),
        };

        let block_data = vec![1, 2, 3, 4];
        file_provider.write(4, block_data.clone()).await.unwrap();
        let read_data = file_provider.read(4, block_data.len()).await.unwrap();
        assert_eq!(block_data, read_data);
    }

    #[tokio::test]
    async fn test_create_sizes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1001").join("shared.dat");
        let mut file_provider = TokioFileProvider::create(&path, 10).await.unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 10);
        assert_eq!(file_provider.read(8, 2).await.unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_open_read_only_rejects_short_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.dat");
        std::fs::write(&path, vec![1u8; 4]).unwrap();

        assert!(TokioFileProvider::open_read_only(&path, 10).await.is_err());
        let mut file_provider = TokioFileProvider::open_read_only(&path, 4).await.unwrap();
        assert_eq!(file_provider.read(0, 4).await.unwrap(), vec![1, 1, 1, 1]);
        assert!(file_provider.write(0, vec![2]).await.is_err());
    }

    #[tokio::test]
    async fn test_open_read_only_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.dat");
        assert!(TokioFileProvider::open_read_only(&path, 1).await.is_err());
    }
}
