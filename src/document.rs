// Documents are the records the bundled sinks know how to store: a nested structure of objects,
// arrays and scalars, serialized as one line of JSON.  Field order is preserved and duplicate
// field names are not checked for.
//
// The writer itself does not care what a record is; this is only what the stdio, directory and
// kafka sinks (and the daemon) write.

use crate::util;

use std::io;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    A(Array),
    O(Document),
    S(String),
    U(u64),
    I(i64),
    F(f64),
    B(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    tag: String,
    value: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Document {
        Document { fields: vec![] }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.tag == key).map(|f| &f.value)
    }

    pub fn get_s(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::S(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_u(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(Value::U(u)) => Some(*u),
            _ => None,
        }
    }

    pub fn push(&mut self, tag: &str, value: Value) {
        self.fields.push(Field {
            tag: tag.to_string(),
            value,
        })
    }

    pub fn push_o(&mut self, tag: &str, o: Document) {
        self.push(tag, Value::O(o));
    }

    pub fn push_a(&mut self, tag: &str, a: Array) {
        self.push(tag, Value::A(a));
    }

    pub fn push_s(&mut self, tag: &str, s: String) {
        self.push(tag, Value::S(s));
    }

    pub fn push_u(&mut self, tag: &str, u: u64) {
        self.push(tag, Value::U(u));
    }

    pub fn push_i(&mut self, tag: &str, i: i64) {
        self.push(tag, Value::I(i));
    }

    pub fn push_f(&mut self, tag: &str, f: f64) {
        self.push(tag, Value::F(f));
    }

    pub fn push_b(&mut self, tag: &str, b: bool) {
        self.push(tag, Value::B(b));
    }

    pub fn push_null(&mut self, tag: &str) {
        self.push(tag, Value::Null);
    }

    // One line of JSON, no trailing newline.
    pub fn to_json(&self) -> String {
        let mut out = Vec::new();
        write_json_document(&mut out, self);
        String::from_utf8_lossy(&out).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Array {
    elements: Vec<Value>,
}

impl Array {
    pub fn new() -> Array {
        Array { elements: vec![] }
    }

    pub fn push(&mut self, value: Value) {
        self.elements.push(value)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn push_o(&mut self, o: Document) {
        self.push(Value::O(o));
    }

    pub fn push_s(&mut self, s: String) {
        self.push(Value::S(s));
    }

    pub fn push_u(&mut self, u: u64) {
        self.push(Value::U(u));
    }
}

// Write some data and ignore errors, this only ever writes to memory.

fn write_chars(writer: &mut dyn io::Write, s: &str) {
    let _ = writer.write_all(s.as_bytes());
}

pub fn write_json(writer: &mut dyn io::Write, v: &Value) {
    match v {
        Value::A(a) => write_json_array(writer, a),
        Value::O(o) => write_json_document(writer, o),
        Value::S(s) => write_json_string(writer, s),
        Value::U(u) => write_chars(writer, &format!("{u}")),
        Value::I(i) => write_chars(writer, &format!("{i}")),
        // JSON has no representation for these.
        Value::F(f) if !f.is_finite() => write_chars(writer, "null"),
        Value::F(f) => write_chars(writer, &format!("{f}")),
        Value::B(b) => write_chars(writer, &format!("{b}")),
        Value::Null => write_chars(writer, "null"),
    }
}

fn write_json_array(writer: &mut dyn io::Write, a: &Array) {
    write_chars(writer, "[");
    let mut first = true;
    for elt in &a.elements {
        if !first {
            write_chars(writer, ",");
        }
        write_json(writer, elt);
        first = false;
    }
    write_chars(writer, "]");
}

fn write_json_document(writer: &mut dyn io::Write, o: &Document) {
    write_chars(writer, "{");
    let mut first = true;
    for fld in &o.fields {
        if !first {
            write_chars(writer, ",");
        }
        write_json_string(writer, &fld.tag);
        write_chars(writer, ":");
        write_json(writer, &fld.value);
        first = false;
    }
    write_chars(writer, "}");
}

fn write_json_string(writer: &mut dyn io::Write, s: &str) {
    write_chars(writer, "\"");
    write_chars(writer, &util::json_quote(s));
    write_chars(writer, "\"");
}

#[test]
pub fn test_json() {
    let mut a = Array::new();
    let mut o = Document::new();
    o.push_o("o", Document::new());
    o.push_a("a", Array::new());
    o.push_s("s", r#"hello, "sir""#.to_string());
    o.push_u("u", 123);
    o.push_i("i", -12);
    o.push_f("f", 12.5);
    o.push_f("nan", f64::NAN);
    o.push_b("b", true);
    o.push_null("n");
    a.push_o(o);
    a.push_s(r#"stri\ng"#.to_string());
    let mut doc = Document::new();
    doc.push_a("xs", a);
    let expect = concat!(
        r#"{"xs":[{"o":{},"a":[],"s":"hello, \"sir\"","u":123,"i":-12,"f":12.5,"nan":null,"#,
        r#""b":true,"n":null},"stri\\ng"]}"#
    );
    assert!(doc.to_json() == expect);
}

#[test]
pub fn test_get() {
    let mut o = Document::new();
    o.push_s("line", "hi".to_string());
    o.push_u("seq", 7);
    assert!(o.len() == 2);
    assert!(o.get_s("line") == Some("hi"));
    assert!(o.get_u("seq") == Some(7));
    assert!(o.get_u("line").is_none());
    assert!(o.get("nope").is_none());
}
