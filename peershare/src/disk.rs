use std::{
    fs::{self, File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use bytes::Bytes;
use tokio::{sync::mpsc, task::{self, JoinHandle}};
use tracing::Instrument;
use crate::store::StoreInfo;

#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("{} has {actual} bytes, expected {expected}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

}

pub type Result<T> = std::result::Result<T, DiskError>;
pub type DiskTx = mpsc::UnboundedSender<CommandToDisk>;
type DiskRx = mpsc::UnboundedReceiver<CommandToDisk>;

#[derive(Debug)]
pub enum CommandToDisk {

    // Persist a validated piece at its offset in the file.
    WritePiece {
        idx: usize,
        data: Bytes,
    },

    // Flush and stop, after every queued write.
    Shutdown,

}

// Owns the shared file of one peer.
pub struct Disk {

    file: File,

    info: StoreInfo,

    disk_rx: DiskRx,

}

impl Disk {

    // Seeders reopen their complete file, everyone else starts from a
    // zero-filled file of the final size.
    pub fn new(path: &Path, info: StoreInfo, has_file: bool) -> Result<(Self, DiskTx)> {
        let file = if has_file {
            OpenOptions::new().write(true).open(path)?
        } else {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            file.set_len(info.file_len)?;
            file
        };
        let (disk_tx, disk_rx) = mpsc::unbounded_channel();
        Ok((Disk { file, info, disk_rx }, disk_tx))
    }

    pub async fn run(&mut self) -> Result<()> {
        while let Some(cmd) = self.disk_rx.recv().await {
            match cmd {

                CommandToDisk::WritePiece { idx, data } => {
                    // A failed write loses this piece on disk only, the swarm carries on.
                    if let Err(e) = self.write_piece(idx, &data) {
                        tracing::error!("failed to write piece {}: {}", idx, e);
                    }
                },

                CommandToDisk::Shutdown => break,

            }
        }
        self.file.sync_all()?;
        tracing::info!("disk shutdown");
        Ok(())
    }

    fn write_piece(&mut self, idx: usize, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.info.piece_length(idx), "unvalidated piece");
        self.file.seek(SeekFrom::Start(self.info.piece_byte_offset(idx)))?;
        self.file.write_all(data)?;
        tracing::trace!("wrote piece {}", idx);
        Ok(())
    }

}

pub fn spawn_disk(path: &Path, info: StoreInfo, has_file: bool) -> Result<(JoinHandle<Result<()>>, DiskTx)> {
    let (mut disk, disk_tx) = Disk::new(path, info, has_file)?;
    let handle = task::spawn(async move {
        disk.run().await
    }.instrument(tracing::info_span!("disk")));
    Ok((handle, disk_tx))
}

// Reads a seeder's file, which must be exactly the configured size.
pub async fn load_file(path: &Path, info: &StoreInfo) -> Result<Bytes> {
    let data = tokio::fs::read(path).await?;
    if data.len() as u64 != info.file_len {
        return Err(DiskError::SizeMismatch {
            path: path.to_path_buf(),
            expected: info.file_len,
            actual: data.len() as u64,
        });
    }
    Ok(Bytes::from(data))
}
