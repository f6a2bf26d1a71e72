//! Child process output pumping.
//!
//! Suite programs and isolated workers run with piped stdout/stderr. Their
//! output is copied line by line into the current `OutputSinks`, so an active
//! capture scope sees it exactly as if it had been written in-process.

use crate::capture::OutputSinks;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Copies both streams into `sinks` until each reaches EOF.
///
/// Lines are forwarded as raw bytes with their newline, one write per line,
/// so the capture tee classifies whole lines.
pub(crate) async fn pump_output<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    sinks: &mut OutputSinks,
) -> io::Result<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_lines = stdout.map(|s| BufReader::new(s).split(b'\n'));
    let mut err_lines = stderr.map(|s| BufReader::new(s).split(b'\n'));
    let mut out_done = out_lines.is_none();
    let mut err_done = err_lines.is_none();

    while !(out_done && err_done) {
        tokio::select! {
            segment = next_segment(&mut out_lines), if !out_done => match segment? {
                Some(line) => write_line(sinks.stdout(), line)?,
                None => out_done = true,
            },
            segment = next_segment(&mut err_lines), if !err_done => match segment? {
                Some(line) => write_line(sinks.stderr(), line)?,
                None => err_done = true,
            },
        }
    }

    sinks.flush()
}

async fn next_segment<R>(
    lines: &mut Option<tokio::io::Split<BufReader<R>>>,
) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_segment().await,
        None => Ok(None),
    }
}

fn write_line(sink: &mut (dyn Write + Send), mut line: Vec<u8>) -> io::Result<()> {
    line.push(b'\n');
    sink.write_all(&line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySink;

    #[tokio::test]
    async fn test_pumps_both_streams() {
        let out = MemorySink::new();
        let err = MemorySink::new();
        let mut sinks = OutputSinks::new(Box::new(out.clone()), Box::new(err.clone()));

        pump_output(
            Some(&b"test: a\nsuccessful: a"[..]),
            Some(&b"warning\n"[..]),
            &mut sinks,
        )
        .await
        .unwrap();

        assert_eq!(out.contents(), "test: a\nsuccessful: a\n");
        assert_eq!(err.contents(), "warning\n");
    }

    #[tokio::test]
    async fn test_missing_streams_finish_immediately() {
        let mut sinks = OutputSinks::new(Box::new(MemorySink::new()), Box::new(MemorySink::new()));
        pump_output::<&[u8], &[u8]>(None, None, &mut sinks)
            .await
            .unwrap();
    }
}
