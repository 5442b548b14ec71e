// Trivial data sink.  This dumps every record as one line of JSON on stdout, tagged with the target:
//
//   {"target":"events","value":{...}}

use crate::datasink::DataSink;
use crate::document::Document;
use crate::util;

use std::io::{self, Write};

pub struct StdioSink {
    target: String,
    output: Box<dyn Write + Send>,
}

impl StdioSink {
    pub fn new(target: &str) -> StdioSink {
        StdioSink::with_output(target, Box::new(io::stdout()))
    }

    pub fn with_output(target: &str, output: Box<dyn Write + Send>) -> StdioSink {
        StdioSink {
            target: target.to_string(),
            output,
        }
    }
}

impl DataSink<Document> for StdioSink {
    fn name(&self) -> String {
        format!("stdio:{}", self.target)
    }

    fn flush(&mut self, batch: Vec<Document>) -> Result<(), String> {
        let mut text = String::new();
        for d in &batch {
            text += &format!(
                "{{\"target\":\"{}\",\"value\":{}}}\n",
                util::json_quote(&self.target),
                d.to_json()
            );
        }
        self.output
            .write_all(text.as_bytes())
            .and_then(|_| self.output.flush())
            .map_err(|e| format!("Can't write to stdout: {e}"))
    }
}

#[cfg(test)]
struct SharedBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
pub fn test_stdio_sink() {
    let buf = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
    let mut sink = StdioSink::with_output("ev", Box::new(SharedBuffer(buf.clone())));
    let mut a = Document::new();
    a.push_u("seq", 1);
    let mut b = Document::new();
    b.push_u("seq", 2);
    assert!(sink.flush(vec![a, b]).is_ok());
    let got = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(got == "{\"target\":\"ev\",\"value\":{\"seq\":1}}\n{\"target\":\"ev\",\"value\":{\"seq\":2}}\n");
    assert!(sink.name() == "stdio:ev");
}
