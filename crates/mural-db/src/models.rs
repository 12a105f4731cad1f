/// Row types — these map directly to SQLite rows.

pub struct RecordRow {
    pub key: String,
    pub value: Vec<u8>,
}
