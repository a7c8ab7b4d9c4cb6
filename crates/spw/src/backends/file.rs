//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. A batch arrived, and the file sink did what file sinks do:
//! it wrote every record down, one line each, and flushed before anyone could ask.
//!
//! 🚰 Batch → BufWriter → `flush()` → disk, once per batch.
//! 💀 Disk full → the batch fails as a unit, the buffer logs it, the next batch tries again.
//! 🦆 (mandatory, no notes)
//!
//! ⚠️ Append mode. Restarting the process adds to yesterday's file instead of erasing it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::adapters::BulkWriter;

// 🚰 FileSinkConfig lives next to FileSink. One backend = one config = one file.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileSinkConfig {
    pub file_name: String,
}

/// 📝 Appends each record as one NDJSON line.
///
/// The `BufWriter` sits behind a tokio `Mutex` because writes await and batches from
/// several workers must not interleave their lines.
#[derive(Debug)]
pub struct FileSink {
    file_name: String,
    file_buf: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// 🚀 Open (or create) the file for appending.
    pub async fn new(config: FileSinkConfig) -> Result<Self> {
        let file_handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_name)
            .await
            .with_context(|| {
                format!(
                    "💀 The sink file '{}' could not be opened for appending. \
                    We stared at the path. The path stared back. \
                    One of us was wrong about whether the parent directory existed.",
                    config.file_name
                )
            })?;
        Ok(Self {
            file_name: config.file_name,
            file_buf: Mutex::new(BufWriter::new(file_handle)),
        })
    }
}

#[async_trait]
impl BulkWriter<String> for FileSink {
    async fn write_bulk(&self, records: &[String]) -> Result<()> {
        trace!("📬 {} record(s) walked into '{}'. writing them all down.", records.len(), self.file_name);
        let mut file_buf = self.file_buf.lock().await;
        append_lines(&mut *file_buf, records)
            .await
            .with_context(|| format!("💀 Writing to '{}' failed. The bytes could see the disk. They did not make it.", self.file_name))
    }

    async fn close(&self) -> Result<()> {
        trace!("🎬 final flush for '{}'", self.file_name);
        self.file_buf.lock().await.flush().await.context(
            "💀 Error flushing file on close. The buffer held its data to the very end, \
            and then the disk said no.",
        )
    }
}

/// ✍️ One batch, one `write_all`, then a flush.
///
/// If the write breaks partway, a lone newline is pushed after it so whatever half-line
/// made it out is terminated, and the next batch starts on a fresh line.
async fn append_lines<W>(out: &mut W, records: &[String]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut rendered = String::with_capacity(records.iter().map(|r| r.len() + 1).sum());
    for record in records {
        rendered.push_str(record.trim_end_matches('\n'));
        rendered.push('\n');
    }
    if let Err(err) = out.write_all(rendered.as_bytes()).await {
        if let Err(recovery) = out.write_all(b"\n").await {
            warn!("🩹 Could not terminate the torn line either: {}", recovery);
        }
        return Err(err);
    }
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_every_record_gets_its_own_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.ndjson");
        let sink = FileSink::new(FileSinkConfig {
            file_name: path.display().to_string(),
        })
        .await?;

        sink.write_bulk(&[r#"{"a":1}"#.to_string(), "{\"b\":2}\n".to_string()]).await?;
        sink.close().await?;

        let written = tokio::fs::read_to_string(&path).await?;
        assert_eq!(written, "{\"a\":1}\n{\"b\":2}\n");
        Ok(())
    }

    /// 💾 Takes `budget` bytes, fails once, then takes everything.
    struct FlakyDisk {
        written: Vec<u8>,
        budget: usize,
        tripped: bool,
    }

    impl AsyncWrite for FlakyDisk {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            if !self.tripped {
                if self.budget == 0 {
                    self.tripped = true;
                    return std::task::Poll::Ready(Err(std::io::Error::other("disk full, briefly")));
                }
                let n = self.budget.min(buf.len());
                self.budget -= n;
                self.written.extend_from_slice(&buf[..n]);
                return std::task::Poll::Ready(Ok(n));
            }
            self.written.extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn the_one_where_a_torn_write_does_not_glue_two_batches_together() -> Result<()> {
        let mut disk = FlakyDisk {
            written: Vec::new(),
            budget: 7,
            tripped: false,
        };

        let first = append_lines(&mut disk, &["aaaa".to_string(), "bbbb".to_string()]).await;
        assert!(first.is_err(), "the disk ran out of budget mid-batch");
        append_lines(&mut disk, &["cccc".to_string()]).await?;

        let written = String::from_utf8(disk.written)?;
        assert_eq!(written, "aaaa\nbb\ncccc\n");
        assert!(written.lines().all(|line| !line.contains("bbcccc")));
        assert_eq!(written.lines().last(), Some("cccc"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_yesterdays_lines_survive_a_restart() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.ndjson");
        tokio::fs::write(&path, "old\n").await?;

        let sink = FileSink::new(FileSinkConfig {
            file_name: path.display().to_string(),
        })
        .await?;
        sink.write_bulk(&["new".to_string()]).await?;

        assert_eq!(tokio::fs::read_to_string(&path).await?, "old\nnew\n");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_directory_does_not_exist() {
        let result = FileSink::new(FileSinkConfig {
            file_name: "/definitely/not/a/real/dir/out.ndjson".to_string(),
        })
        .await;
        assert!(result.is_err());
    }
}
