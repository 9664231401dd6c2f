use crate::collection::Document;
use crate::common::{Value, CONTENT_KEY, PATH_KEY, STAT_CTIME, STAT_MTIME, STAT_SIZE};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::Path;
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// Reads one file into a raw document `{path, content, <stats>}`.
///
/// Content is a string when the file is valid UTF-8 and bytes otherwise.
/// Returns `None` when the file does not exist.
pub(crate) fn read_raw(root: &Path, relative: &str, stats: &[String]) -> QuarryResult<Option<Document>> {
    let full = root.join(relative);
    let bytes = match fs::read(&full) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
        Err(e) => {
            log::error!("Failed to read {}: {}", full.display(), e);
            return Err(QuarryError::new_with_cause(
                &format!("Failed to read {}", full.display()),
                ErrorKind::IOFailure,
                QuarryError::from(e),
            ));
        }
    };

    let mut raw = Document::new();
    raw.insert(PATH_KEY, relative);
    match String::from_utf8(bytes) {
        Ok(text) => raw.insert(CONTENT_KEY, text),
        Err(e) => raw.insert(CONTENT_KEY, Value::Bytes(e.into_bytes())),
    };

    if !stats.is_empty() {
        let metadata = match fs::metadata(&full) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(QuarryError::from(e)),
        };
        for stat in stats {
            match stat.as_str() {
                STAT_SIZE => {
                    raw.insert(STAT_SIZE, metadata.len());
                }
                STAT_MTIME => {
                    raw.insert(STAT_MTIME, rfc3339(metadata.modified().ok()));
                }
                STAT_CTIME => {
                    let created = metadata.created().or_else(|_| metadata.modified()).ok();
                    raw.insert(STAT_CTIME, rfc3339(created));
                }
                _ => {}
            }
        }
    }
    Ok(Some(raw))
}

fn rfc3339(time: Option<SystemTime>) -> Value {
    match time {
        Some(time) => Value::from(DateTime::<Utc>::from(time).to_rfc3339()),
        None => Value::Null,
    }
}

/// Writes a raw document `{path, content}` atomically.
///
/// The content goes to a temporary file in the target directory which is
/// then renamed over the target, so readers see the old or the new file.
pub(crate) fn write_raw(root: &Path, raw: &Document) -> QuarryResult<()> {
    let relative = match raw.get(PATH_KEY).and_then(|p| p.as_str()) {
        Some(path) if !path.is_empty() => path,
        _ => {
            log::error!("Raw document {} has no path", raw);
            return Err(QuarryError::new(
                "Output document has no 'path'",
                ErrorKind::EncodingError,
            ));
        }
    };
    let bytes: &[u8] = match raw.get(CONTENT_KEY) {
        Some(Value::String(text)) => text.as_bytes(),
        Some(Value::Bytes(bytes)) => bytes,
        None | Some(Value::Null) => &[],
        Some(other) => {
            log::error!("Cannot write {} content to {}", other.type_name(), relative);
            return Err(QuarryError::new(
                &format!(
                    "Output content for {} must be a string or bytes, found {}",
                    relative,
                    other.type_name()
                ),
                ErrorKind::EncodingError,
            ));
        }
    };

    let full = root.join(relative);
    let parent = full.parent().unwrap_or(root);
    fs::create_dir_all(parent)?;

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(&full).map_err(|e| {
        log::error!("Failed to persist {}: {}", full.display(), e);
        QuarryError::new_with_cause(
            &format!("Failed to write {}", full.display()),
            ErrorKind::IOFailure,
            QuarryError::from(e.error),
        )
    })?;
    log::debug!("Wrote {}", full.display());
    Ok(())
}

/// Removes one file, returning whether it existed.
pub(crate) fn remove_raw(root: &Path, relative: &str) -> QuarryResult<bool> {
    let full = root.join(relative);
    match fs::remove_file(&full) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => {
            log::error!("Failed to remove {}: {}", full.display(), e);
            Err(QuarryError::from(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), &doc! { path: "db/c/a.json", content: "{}" }).unwrap();

        let raw = read_raw(dir.path(), "db/c/a.json", &[]).unwrap().unwrap();
        assert_eq!(raw, doc! { path: "db/c/a.json", content: "{}" });
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_raw(dir.path(), "nope.json", &[]).unwrap().is_none());
        assert!(!remove_raw(dir.path(), "nope.json").unwrap());
    }

    #[test]
    fn test_binary_content_reads_as_bytes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();
        let raw = read_raw(dir.path(), "blob.bin", &[]).unwrap().unwrap();
        assert_eq!(raw.get(CONTENT_KEY), Some(&Value::Bytes(vec![0xff, 0xfe, 0x00])));
    }

    #[test]
    fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let stats = vec![STAT_SIZE.to_string(), STAT_MTIME.to_string(), STAT_CTIME.to_string()];
        let raw = read_raw(dir.path(), "a.txt", &stats).unwrap().unwrap();
        assert_eq!(raw.get(STAT_SIZE), Some(&Value::from(5)));
        let mtime = raw.get(STAT_MTIME).and_then(|v| v.as_str()).unwrap();
        assert!(DateTime::parse_from_rfc3339(mtime).is_ok());
        assert!(raw.get(STAT_CTIME).and_then(|v| v.as_str()).is_some());
    }

    #[test]
    fn test_rejects_structured_content() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_raw(dir.path(), &doc! { path: "a.json", content: { a: 1 } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::EncodingError);
        let err = write_raw(dir.path(), &doc! { content: "x" }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::EncodingError);
    }

    #[test]
    fn test_null_content_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), &doc! { path: "empty.txt", content: null }).unwrap();
        assert_eq!(fs::read(dir.path().join("empty.txt")).unwrap(), Vec::<u8>::new());
    }
}
