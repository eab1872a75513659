use anyhow::{Context, Result};
use inbox_wire::Envelope;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::clock::Now;
use crate::view::MessagingView;

/// Read the next line-delimited JSON envelope. `None` at end of input;
/// blank lines are skipped.
pub async fn read_envelope<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Envelope>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        let env = serde_json::from_str(line.trim()).context("invalid envelope line")?;
        return Ok(Some(env));
    }
}

/// Write a value as one line of JSON.
pub async fn write_json_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let s = serde_json::to_string(value)?;
    writer.write_all(s.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Counts from a replay run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub frames: usize,
    pub unreadable: usize,
    pub calls: usize,
}

/// Feed every envelope from `reader` into `view`. Lines that are not valid
/// JSON are skipped; the calls the view asks for are logged, not performed.
pub async fn replay<R: AsyncBufRead + Unpin>(
    view: &mut MessagingView,
    reader: &mut R,
) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();
    loop {
        let envelope = match read_envelope(reader).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(err) => {
                if err.downcast_ref::<std::io::Error>().is_some() {
                    return Err(err);
                }
                warn!(error = %err, "skipping unreadable line");
                report.unreadable += 1;
                continue;
            }
        };
        report.frames += 1;
        for call in view.handle_envelope(&envelope, Now::system()) {
            info!(call = call.name(), ?call, "collaborator call requested");
            report.calls += 1;
        }
    }
    Ok(report)
}
