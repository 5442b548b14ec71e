// Data sink that appends records as JSON lines to files in a date-keyed directory tree:
//
//   <data-dir>/<yyyy>/<mm>/<dd>/<target>.jsonl
//
// The date is the UTC date at the time of the flush.  A batch is written with one write call on a
// file opened for append, so a batch is either there in its entirety or, if the write fails partway,
// reported as failed (and possibly partially present).

use crate::datasink::DataSink;
use crate::document::Document;
use crate::time;
use crate::util;

use std::io::Write;
use std::path::{Path, PathBuf};

pub struct DirectorySink {
    data_dir: PathBuf,
    target: String,
    now: fn() -> u64,
}

impl DirectorySink {
    // Fails if the data directory does not exist, this is the "could not connect" case.
    pub fn open(data_dir: &str, target: &str) -> Result<DirectorySink, String> {
        let data_dir = PathBuf::from(data_dir);
        if !data_dir.is_dir() {
            return Err(format!("{} is not a directory", data_dir.display()));
        }
        Ok(DirectorySink {
            data_dir,
            target: util::path_safe(target),
            now: time::unix_now,
        })
    }

    #[cfg(test)]
    fn with_clock(self, now: fn() -> u64) -> DirectorySink {
        DirectorySink { now, ..self }
    }

    fn file_for(&self, timestamp: u64) -> (PathBuf, PathBuf) {
        let directory = self.data_dir.join(time::date_path(timestamp));
        let filename = directory.join(format!("{}.jsonl", self.target));
        (directory, filename)
    }
}

fn append(directory: &Path, filename: &Path, text: &[u8]) -> Result<(), String> {
    let mut db = std::fs::DirBuilder::new();
    db.recursive(true);
    db.create(directory)
        .map_err(|e| format!("Can't create directory {}: {e}", directory.display()))?;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(filename)
        .map_err(|e| format!("Can't open {} for append: {e}", filename.display()))?;
    file.write_all(text)
        .map_err(|e| format!("Can't write to {}: {e}", filename.display()))
}

impl DataSink<Document> for DirectorySink {
    fn name(&self) -> String {
        format!("directory:{}", self.data_dir.join(&self.target).display())
    }

    fn flush(&mut self, batch: Vec<Document>) -> Result<(), String> {
        let (directory, filename) = self.file_for((self.now)());
        let mut text = String::new();
        for d in &batch {
            text += &d.to_json();
            text += "\n";
        }
        append(&directory, &filename, text.as_bytes())
    }
}

#[cfg(test)]
fn scratch_dir(tag: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!("burstwriter-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&p);
    std::fs::create_dir_all(&p).unwrap();
    p
}

#[test]
pub fn test_directory_sink() {
    let dir = scratch_dir("dirsink");
    let mut sink = DirectorySink::open(dir.to_str().unwrap(), "ev/1")
        .unwrap()
        .with_clock(|| 1740568588);
    let mut a = Document::new();
    a.push_u("seq", 1);
    let mut b = Document::new();
    b.push_u("seq", 2);
    assert!(sink.flush(vec![a]).is_ok());
    assert!(sink.flush(vec![b]).is_ok());
    let text = std::fs::read_to_string(dir.join("2025/02/26/ev_1.jsonl")).unwrap();
    assert!(text == "{\"seq\":1}\n{\"seq\":2}\n");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
pub fn test_directory_sink_missing_dir() {
    assert!(DirectorySink::open("/dev/null/your/data/here", "ev").is_err());
}
