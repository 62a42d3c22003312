//! Incremental transcript reader.
//!
//! Reads only the bytes appended since a caller-supplied offset and returns
//! the newly complete records. A trailing line without its `\n` delimiter is
//! a partial write in progress and is left unconsumed; the returned offset
//! never includes it. Newline-terminated lines that fail to parse are
//! skipped with a warning — the offset advances past them, so the warning
//! fires once per bad line, never repeatedly.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use fs_err as fs;
use tracing::warn;

use crate::record::{parse_line, LogRecord};

/// Result of one incremental read pass.
#[derive(Debug)]
pub struct ReadBatch {
    /// Newly complete records, in file order.
    pub records: Vec<LogRecord>,
    /// Offset to resume from; one past the last consumed delimiter.
    pub offset: u64,
    /// Newline-terminated lines skipped as malformed.
    pub skipped: usize,
}

/// Reads records appended to `path` since `offset`.
///
/// Returns `Ok(None)` when the file no longer exists — the caller treats
/// that as "skip", not as an error, since transcripts are deleted when
/// sessions end.
pub fn read_new_records(path: &Path, offset: u64) -> std::io::Result<Option<ReadBatch>> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    file.seek(SeekFrom::Start(offset))?;
    let mut buffer = Vec::new();
    match file.read_to_end(&mut buffer) {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut consumed = 0usize;
    let mut cursor = 0usize;

    while let Some(rel) = buffer[cursor..].iter().position(|b| *b == b'\n') {
        let line_end = cursor + rel;
        let line = &buffer[cursor..line_end];
        cursor = line_end + 1;
        consumed = cursor;

        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_line(trimmed) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(err) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    offset = offset + line_end as u64,
                    error = %err,
                    "Skipping malformed transcript line"
                );
            }
        }
    }

    Ok(Some(ReadBatch {
        records,
        offset: offset + consumed as u64,
        skipped,
    }))
}
