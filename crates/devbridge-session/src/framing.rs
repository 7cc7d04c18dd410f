//! Wire framing for process-facing streams.
//! - read_frame/write_frame: `Content-Length` framed payloads (language server)
//! - read_line/write_json_line: newline-delimited messages (debugger, program output)
//! - drain_lines: lossy line drain for pipes that only feed the log

use std::io::{self, BufRead, BufReader, Read, Write};

use serde_json::Value;

const CONTENT_LENGTH: &str = "Content-Length";

/// Upper bound for a single framed payload.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Reads one framed payload. `Ok(None)` on clean EOF before a header.
pub fn read_frame<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut content_length = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed inside frame header",
                ));
            }
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if !saw_header {
                continue;
            }
            break;
        }
        saw_header = true;
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length value")
                })?;
                content_length = Some(length);
            }
        }
    }

    let length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;
    if length > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {length} bytes exceeds limit"),
        ));
    }

    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer)?;
    Ok(Some(buffer))
}

/// Writes header and body with a single `write_all` so frames never interleave.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()
}

/// Reads one line including its terminator. `Ok(None)` on EOF.
pub fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let bytes = reader.read_until(b'\n', &mut line)?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Feeds every line of `pipe` to `each` until EOF, decoding lossily so
/// binary output never ends the drain early.
pub fn drain_lines<R: Read>(pipe: R, mut each: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(pipe);
    while let Some(line) = read_line(&mut reader)? {
        each(String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']));
    }
    Ok(())
}

pub fn write_json_line<W: Write>(writer: &mut W, value: &Value) -> io::Result<()> {
    let mut line = serde_json::to_vec(value).map_err(io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}
