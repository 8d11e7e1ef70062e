//! JSON record and JSONL log helpers shared by the file-backed stores.
//!
//! Records are replaced atomically (temp file + rename) so lock-free readers
//! always observe a complete document. Callers serialize writers with a
//! [`FileLock`](crate::io::lock::FileLock).

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).map_err(|err| Error::storage("read", path, err))?;
    serde_json::from_str(&contents).map_err(|err| Error::json(path, err))
}

/// Like [`read_json`], but a missing file yields `None`.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| Error::json(path, err)),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::storage("read", path, err)),
    }
}

/// Atomically write pretty JSON with a trailing newline.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).map_err(|err| Error::json(path, err))?;
    buf.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::storage("create dir", parent, err))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).map_err(|err| Error::storage("write temp", &tmp_path, err))?;
    fs::rename(&tmp_path, path).map_err(|err| Error::storage("replace", path, err))
}

/// Append one compact JSON line. The whole line goes out in a single write.
pub fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_string(value).map_err(|err| Error::json(path, err))?;
    line.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::storage("create dir", parent, err))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| Error::storage("open for append", path, err))?;
    file.write_all(line.as_bytes())
        .map_err(|err| Error::storage("append", path, err))
}

/// Read a JSONL file; missing file yields an empty string.
pub fn read_lines(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(Error::storage("read", path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        id: u64,
    }

    #[test]
    fn missing_file_reads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let got: Option<Record> = read_json_opt(&temp.path().join("nope.json")).expect("read");
        assert!(got.is_none());
        assert_eq!(read_lines(&temp.path().join("nope.jsonl")).expect("lines"), "");
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/record.json");
        write_json_atomic(&path, &Record { id: 7 }).expect("write");

        assert_eq!(read_json::<Record>(&path).expect("read"), Record { id: 7 });
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn decode_errors_are_storage_kind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.json");
        fs::write(&path, "{not json").expect("write");
        let err = read_json::<Record>(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
    }
}
