use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
    time::{Duration, Instant},
};

use anyhow::Context;
use reqwest::{blocking::Client, StatusCode};

use crate::core::{
    error::{HubError, HubResult},
    events::{emit_download, ProgressSink},
    settings::HubSettings,
};

const CHUNK_SIZE: usize = 1024 * 1024;

/// Single-GET archive downloader with connect/read timeouts and time-gated
/// progress reporting.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    connect_timeout: Duration,
    read_timeout: Duration,
    progress_interval: Duration,
}

impl RemoteFetcher {
    pub fn new(settings: &HubSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            read_timeout: settings.read_timeout(),
            progress_interval: settings.progress_interval(),
        }
    }

    /// Downloads `url` into `dst` and returns the number of body bytes written.
    ///
    /// Anything other than `200 OK` fails with [`HubError::Http`]. The
    /// connection is released when the response drops, on every exit path.
    pub fn download_to(
        &self,
        key: &str,
        url: &str,
        dst: &Path,
        sink: &dyn ProgressSink,
    ) -> HubResult<u64> {
        emit_download(sink, key, 0, 0, 0.0, Some("starting download"));

        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .build()?;
        let mut response = client.get(url).send()?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(HubError::Http {
                status: status.as_u16(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        let file = File::create(dst).with_context(|| format!("create {}", dst.display()))?;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;
        let mut last_emit: Option<Instant> = None;

        loop {
            let read = response.read(&mut buffer).context("read download chunk")?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .context("write download chunk")?;
            downloaded += read as u64;

            let now = Instant::now();
            let due = last_emit.map_or(true, |at| now.duration_since(at) > self.progress_interval);
            if due {
                let fraction = progress_fraction(downloaded, total);
                emit_download(sink, key, downloaded, total, fraction, None);
                last_emit = Some(now);
            }
        }
        writer.flush().context("flush download")?;

        emit_download(sink, key, downloaded, total, 1.0, Some("download complete"));
        Ok(downloaded)
    }
}

/// Fraction of `total` received; 0 when the server sent no length.
fn progress_fraction(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (downloaded as f64 / total as f64).clamp(0.0, 1.0)
}
