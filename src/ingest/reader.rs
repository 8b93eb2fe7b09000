//! Bounded access-log reader.
//!
//! Files at or below the tail window are parsed in full. Larger files are read
//! from `size - window` onward: the first line after the seek is discarded
//! because it is almost always a fragment. Entries older than the window are
//! dropped. Memory and I/O stay proportional to the window, not the file.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info};

use super::{IngestError, LogRecord, DEFAULT_TAIL_WINDOW_BYTES};

#[derive(Debug, Clone, Copy)]
pub struct LogReader {
    window_bytes: u64,
}

impl Default for LogReader {
    fn default() -> Self {
        Self {
            window_bytes: DEFAULT_TAIL_WINDOW_BYTES,
        }
    }
}

impl LogReader {
    pub fn new(window_bytes: u64) -> Self {
        Self {
            window_bytes: window_bytes.max(1),
        }
    }

    pub fn window_bytes(&self) -> u64 {
        self.window_bytes
    }

    /// Read a file whose size is not already known.
    pub fn read_path(&self, path: &Path) -> Result<Vec<LogRecord>, IngestError> {
        let size = std::fs::metadata(path)
            .map_err(|source| IngestError::Open {
                path: path.display().to_string(),
                source,
            })?
            .len();
        self.read(path, size)
    }

    /// Parse `path` (of `size` bytes) into records ordered newest-first.
    pub fn read(&self, path: &Path, size: u64) -> Result<Vec<LogRecord>, IngestError> {
        let shown = path.display().to_string();
        let file = File::open(path).map_err(|source| IngestError::Open {
            path: shown.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let read_err = |source| IngestError::Read {
            path: shown.clone(),
            source,
        };

        let mut buf = Vec::with_capacity(512);

        if size > self.window_bytes {
            info!(
                path = %shown,
                size_mib = format!("{:.2}", size as f64 / (1024.0 * 1024.0)),
                window_bytes = self.window_bytes,
                "File exceeds read window, tailing"
            );
            reader
                .seek(SeekFrom::Start(size - self.window_bytes))
                .map_err(read_err)?;
            reader.read_until(b'\n', &mut buf).map_err(read_err)?;
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf).map_err(read_err)?;
            if n == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            match LogRecord::parse(line) {
                Some(rec) => records.push(rec),
                None => skipped += 1,
            }
        }

        debug!(path = %shown, parsed = records.len(), skipped, "Log file parsed");

        records.reverse();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn line(ip: &str, path: &str, status: u16, size: u64) -> String {
        format!(
            "{} - - [17/Oct/2026:10:00:00 +0000] \"GET {} HTTP/1.1\" {} {}\n",
            ip, path, status, size
        )
    }

    fn write_log(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".log").tempfile().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_reads_all_lines_newest_first() {
        let content = [
            line("10.0.0.1", "/a", 200, 10),
            line("10.0.0.2", "/b", 200, 20),
            line("10.0.0.3", "/c", 404, 30),
        ]
        .concat();
        let f = write_log(content.as_bytes());

        let records = LogReader::default().read_path(f.path()).unwrap();
        let ips: Vec<_> = records.iter().map(|r| r.source_address.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.3", "10.0.0.2", "10.0.0.1"]);
    }

    #[test]
    fn test_invalid_lines_do_not_shift_parsing() {
        let content = [
            line("10.0.0.1", "/a", 200, 10),
            "garbage that is not a log line\n".to_string(),
            "\n".to_string(),
            line("10.0.0.2", "/b", 500, 20),
        ]
        .concat();
        let f = write_log(content.as_bytes());

        let records = LogReader::default().read_path(f.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status_code, 500);
        assert_eq!(records[1].request_line, "GET /a HTTP/1.1");
    }

    #[test]
    fn test_crlf_and_missing_trailing_newline() {
        let content = format!(
            "{}\r\n{}",
            line("10.0.0.1", "/a", 200, 10).trim_end(),
            line("10.0.0.2", "/b", 200, 11).trim_end()
        );
        let f = write_log(content.as_bytes());

        let records = LogReader::default().read_path(f.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].response_size, 11);
    }

    #[test]
    fn test_invalid_utf8_is_tolerated() {
        let mut content = Vec::new();
        content.extend_from_slice(b"10.0.0.1 - - [x] \"GET /caf\xff\xfe HTTP/1.1\" 200 5\n");
        content.extend_from_slice(line("10.0.0.2", "/ok", 200, 6).as_bytes());
        let f = write_log(&content);

        let records = LogReader::default().read_path(f.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].request_line.starts_with("GET /caf"));
    }

    #[test]
    fn test_tail_window_drops_older_entries_and_partial_line() {
        let old = line("10.0.0.1", "/old", 200, 1);
        let recent_a = line("10.0.0.2", "/recent-a", 200, 2);
        let recent_b = line("10.0.0.3", "/recent-b", 200, 3);
        let content = [old.clone(), recent_a.clone(), recent_b.clone()].concat();
        let f = write_log(content.as_bytes());

        // Window starts a few bytes before the end of `old`, so the seek lands
        // mid-line and the fragment is discarded.
        let window = (recent_a.len() + recent_b.len() + 5) as u64;
        let reader = LogReader::new(window);
        let records = reader.read(f.path(), content.len() as u64).unwrap();

        let paths: Vec<_> = records.iter().map(|r| r.request_line.as_str()).collect();
        assert_eq!(paths, vec!["GET /recent-b HTTP/1.1", "GET /recent-a HTTP/1.1"]);
    }

    #[test]
    fn test_tail_window_on_line_boundary_discards_one_full_line() {
        let a = line("10.0.0.1", "/a", 200, 1);
        let b = line("10.0.0.2", "/b", 200, 2);
        let c = line("10.0.0.3", "/c", 200, 3);
        let content = [a, b.clone(), c.clone()].concat();
        let f = write_log(content.as_bytes());

        let window = (b.len() + c.len()) as u64;
        let records = LogReader::new(window)
            .read(f.path(), content.len() as u64)
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_address, "10.0.0.3");
    }

    #[test]
    fn test_empty_file_yields_no_records() {
        let f = write_log(b"");
        assert!(LogReader::default().read_path(f.path()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LogReader::default()
            .read_path(&dir.path().join("gone.log"))
            .unwrap_err();
        assert!(matches!(err, IngestError::Open { .. }));
    }
}
