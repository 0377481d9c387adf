//! Chunk-fed pull parser for one table of a SQL-style bulk dump.

use std::collections::VecDeque;
use std::sync::Arc;

use regex_lite::Regex;

/// Buffer size above which idle content is trimmed while waiting for the
/// next bulk-insert statement.
const MAX_IDLE_BUFFER: usize = 8192;

/// Tail kept when trimming, large enough to hold a partially received
/// statement prefix.
const IDLE_TAIL: usize = 256;

/// A single typed value from a dump row.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DumpValue {
    /// Returns the value as an integer if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DumpValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as text if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DumpValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One parsed row, with values bound to the discovered column names.
///
/// Malformed rows (value count differing from the column count) are still
/// emitted so the caller can detect and reject them; see
/// [`DumpRecord::is_well_formed`].
#[derive(Debug, Clone)]
pub struct DumpRecord {
    columns: Arc<[String]>,
    pub values: Vec<DumpValue>,
}

impl DumpRecord {
    /// Look up a value by column name. Returns `None` for unknown columns
    /// and for malformed rows.
    pub fn get(&self, column: &str) -> Option<&DumpValue> {
        if !self.is_well_formed() {
            return None;
        }
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Whether the value count matches the discovered column count.
    pub fn is_well_formed(&self) -> bool {
        self.columns.len() == self.values.len()
    }

    /// The column names this record's values are bound to.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Streaming parser for a single table of a bulk dump.
///
/// Feed the stream in with [`feed`](Self::feed) and drain parsed rows with
/// [`next_record`](Self::next_record). The sequence is lazy, forward-only
/// and not restartable; if the target table never appears the parser never
/// yields, so callers must bound stream consumption externally.
///
/// The parser first scans for the table-definition header and extracts the
/// column names in declaration order, then tracks quote and backslash
/// escape state character by character through the table's bulk-insert
/// statements to recognize row boundaries even when values contain escaped
/// quotes, backslashes or commas.
pub struct DumpStreamParser {
    table: String,
    header_re: Regex,
    insert_marker: String,

    buffer: String,
    columns: Option<Arc<[String]>>,

    reading_schema: bool,
    in_insert: bool,
    in_quote: bool,
    escaped: bool,
    in_row: bool,
    row_buf: String,

    pending: VecDeque<DumpRecord>,
    rows_emitted: u64,
}

impl DumpStreamParser {
    /// Create a parser targeting the named table.
    pub fn new(table: &str) -> Self {
        // Table names are plain identifiers; quoting around them is optional
        // in the dump.
        let header_re = Regex::new(&format!(r"(?i)CREATE TABLE\s+[`'\x22]?{table}[`'\x22]?\s*\("))
            .unwrap_or_else(|_| Regex::new("$^").unwrap());
        Self {
            table: table.to_string(),
            header_re,
            insert_marker: format!("INSERT INTO `{table}` VALUES"),
            buffer: String::new(),
            columns: None,
            reading_schema: false,
            in_insert: false,
            in_quote: false,
            escaped: false,
            in_row: false,
            row_buf: String::new(),
            pending: VecDeque::new(),
            rows_emitted: 0,
        }
    }

    /// Append the next chunk of the dump stream and parse as far as possible.
    pub fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        if self.columns.is_none() {
            self.try_parse_schema();
        }
        self.process_buffer();
    }

    /// Pop the next parsed row, if any.
    pub fn next_record(&mut self) -> Option<DumpRecord> {
        self.pending.pop_front()
    }

    /// The column names discovered from the table definition, once seen.
    pub fn schema(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Total rows emitted so far.
    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    fn try_parse_schema(&mut self) {
        if !self.reading_schema {
            if let Some(m) = self.header_re.find(&self.buffer) {
                let start = m.start();
                self.reading_schema = true;
                self.buffer.drain(..start);
            }
        }
        // The header may span several chunks; the buffer is left to grow
        // until the statement's closing delimiter arrives.
        if self.reading_schema {
            if let Some(end) = self.buffer.find(';') {
                let statement: String = self.buffer[..end].to_string();
                self.columns = Some(extract_columns(&statement).into());
                self.reading_schema = false;
                self.buffer.drain(..=end);
            }
        }
    }

    fn process_buffer(&mut self) {
        loop {
            if !self.in_insert {
                if let Some(idx) = self.buffer.find(&self.insert_marker) {
                    self.in_insert = true;
                    let end = idx + self.insert_marker.len();
                    self.buffer.drain(..end);
                } else {
                    self.trim_idle_buffer();
                    return;
                }
            }

            let mut consumed = 0;
            let mut statement_ended = false;
            let char_indices: Vec<(usize, char)> = self.buffer.char_indices().collect();
            for (i, ch) in char_indices {
                consumed = i + ch.len_utf8();

                if self.escaped {
                    self.escaped = false;
                    if self.in_row {
                        self.row_buf.push(ch);
                    }
                    continue;
                }

                match ch {
                    '\\' => {
                        self.escaped = true;
                        if self.in_row {
                            self.row_buf.push(ch);
                        }
                    }
                    '\'' => {
                        self.in_quote = !self.in_quote;
                        if self.in_row {
                            self.row_buf.push(ch);
                        }
                    }
                    '(' if !self.in_row && !self.in_quote => {
                        self.in_row = true;
                        self.row_buf.clear();
                    }
                    ')' if self.in_row && !self.in_quote => {
                        self.in_row = false;
                        self.emit_row();
                    }
                    ';' if !self.in_quote => {
                        self.in_insert = false;
                        statement_ended = true;
                        break;
                    }
                    _ => {
                        if self.in_row {
                            self.row_buf.push(ch);
                        }
                    }
                }
            }
            self.buffer.drain(..consumed);

            if !statement_ended {
                return;
            }
            // Statement terminated; the table may have further insert
            // statements later in the stream.
        }
    }

    /// Cap memory use while scanning large irrelevant sections between
    /// statements. Disabled until the schema has been discovered so a
    /// partially received header is never lost.
    fn trim_idle_buffer(&mut self) {
        if self.columns.is_none() || self.reading_schema {
            return;
        }
        if self.buffer.len() > MAX_IDLE_BUFFER {
            let mut keep_from = self.buffer.len() - IDLE_TAIL;
            while !self.buffer.is_char_boundary(keep_from) {
                keep_from -= 1;
            }
            self.buffer.drain(..keep_from);
        }
    }

    fn emit_row(&mut self) {
        let values = parse_row_values(&self.row_buf);
        self.row_buf.clear();
        let columns = self
            .columns
            .clone()
            .unwrap_or_else(|| Vec::new().into());
        self.rows_emitted += 1;
        self.pending.push_back(DumpRecord { columns, values });
    }
}

/// Extract column names in declaration order from a table-definition
/// statement, skipping key/constraint/comment lines.
fn extract_columns(statement: &str) -> Vec<String> {
    let col_re = Regex::new(r"^[`'\x22]([^`'\x22]+)[`'\x22]").unwrap();
    let mut columns = Vec::new();
    for line in statement.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("CREATE TABLE")
            || trimmed.starts_with("PRIMARY KEY")
            || trimmed.starts_with("KEY")
            || trimmed.starts_with("UNIQUE KEY")
            || trimmed.starts_with("CONSTRAINT")
            || trimmed.starts_with(')')
            || trimmed.starts_with("/*")
        {
            continue;
        }
        if let Some(caps) = col_re.captures(trimmed) {
            columns.push(caps[1].to_string());
        }
    }
    columns
}

/// Split accumulated row text on top-level commas, honoring quote and
/// escape state, and coerce each value.
fn parse_row_values(raw: &str) -> Vec<DumpValue> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;

    for ch in raw.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                values.push(clean_value(&current));
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    values.push(clean_value(&current));
    values
}

fn clean_value(raw: &str) -> DumpValue {
    let val = raw.trim();
    if val == "NULL" {
        return DumpValue::Null;
    }
    if looks_numeric(val) {
        if let Ok(n) = val.parse::<i64>() {
            return DumpValue::Integer(n);
        }
        if let Ok(f) = val.parse::<f64>() {
            return DumpValue::Float(f);
        }
    }
    DumpValue::Text(val.to_string())
}

fn looks_numeric(val: &str) -> bool {
    if val.is_empty() {
        return false;
    }
    let mut has_digit = false;
    for (i, ch) in val.chars().enumerate() {
        match ch {
            '0'..='9' => has_digit = true,
            '+' | '-' if i == 0 => {}
            '.' => {}
            _ => return false,
        }
    }
    has_digit
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "CREATE TABLE `T` (\n  `id` bigint NOT NULL,\n  `x` varchar(255) DEFAULT NULL,\n  `y` varchar(255) DEFAULT NULL,\n  PRIMARY KEY (`id`),\n  KEY `idx_x` (`x`)\n);\n";

    fn drain(parser: &mut DumpStreamParser) -> Vec<DumpRecord> {
        let mut out = Vec::new();
        while let Some(rec) = parser.next_record() {
            out.push(rec);
        }
        out
    }

    #[test]
    fn test_round_trip() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed(SCHEMA);
        parser.feed("INSERT INTO `T` VALUES (1,'A','B'),(2,'C\\'D','E');\n");

        let rows = drain(&mut parser);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].get("id"), Some(&DumpValue::Integer(1)));
        assert_eq!(rows[0].get("x"), Some(&DumpValue::Text("A".into())));
        assert_eq!(rows[0].get("y"), Some(&DumpValue::Text("B".into())));

        assert_eq!(rows[1].get("id"), Some(&DumpValue::Integer(2)));
        assert_eq!(rows[1].get("x"), Some(&DumpValue::Text("C'D".into())));
        assert_eq!(rows[1].get("y"), Some(&DumpValue::Text("E".into())));
    }

    #[test]
    fn test_schema_extraction() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed(SCHEMA);
        assert_eq!(
            parser.schema(),
            Some(&["id".to_string(), "x".to_string(), "y".to_string()][..])
        );
    }

    #[test]
    fn test_null_and_number_coercion() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed(SCHEMA);
        parser.feed("INSERT INTO `T` VALUES (-5,NULL,'007'),(6,3.25,'x');");

        let rows = drain(&mut parser);
        assert_eq!(rows[0].get("id"), Some(&DumpValue::Integer(-5)));
        assert_eq!(rows[0].get("x"), Some(&DumpValue::Null));
        // Digit-only tokens become numbers even when they carry leading zeros.
        assert_eq!(rows[0].get("y"), Some(&DumpValue::Integer(7)));
        assert_eq!(rows[1].get("x"), Some(&DumpValue::Float(3.25)));
        assert_eq!(rows[1].get("y"), Some(&DumpValue::Text("x".into())));
    }

    #[test]
    fn test_values_with_escaped_commas_and_parens() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed(SCHEMA);
        parser.feed("INSERT INTO `T` VALUES (1,'a,b','c)d'),(2,'\\\\','e');");

        let rows = drain(&mut parser);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("x"), Some(&DumpValue::Text("a,b".into())));
        assert_eq!(rows[0].get("y"), Some(&DumpValue::Text("c)d".into())));
        assert_eq!(rows[1].get("x"), Some(&DumpValue::Text("\\".into())));
    }

    #[test]
    fn test_chunk_boundaries() {
        let input = format!(
            "{}INSERT INTO `T` VALUES (1,'hello','world'),(2,'foo','bar');",
            SCHEMA
        );
        // Feed one byte at a time to exercise every split point.
        let mut parser = DumpStreamParser::new("T");
        let mut rows = Vec::new();
        for ch in input.chars() {
            parser.feed(&ch.to_string());
            rows.extend(drain(&mut parser));
        }
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("x"), Some(&DumpValue::Text("foo".into())));
    }

    #[test]
    fn test_multiple_insert_statements() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed(SCHEMA);
        parser.feed("INSERT INTO `T` VALUES (1,'a','b');\nINSERT INTO `T` VALUES (2,'c','d');");
        let rows = drain(&mut parser);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("id"), Some(&DumpValue::Integer(2)));
    }

    #[test]
    fn test_malformed_row_still_emitted() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed(SCHEMA);
        parser.feed("INSERT INTO `T` VALUES (1,'only-two');");
        let rows = drain(&mut parser);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_well_formed());
        assert_eq!(rows[0].values.len(), 2);
        assert_eq!(rows[0].get("id"), None);
    }

    #[test]
    fn test_other_tables_skipped_and_buffer_bounded() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed(SCHEMA);
        // A large irrelevant section between statements.
        let filler = "INSERT INTO `other` VALUES (1,'x');\n".repeat(1000);
        parser.feed(&filler);
        assert!(parser.buffer.len() <= MAX_IDLE_BUFFER);
        parser.feed("INSERT INTO `T` VALUES (9,'a','b');");
        let rows = drain(&mut parser);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&DumpValue::Integer(9)));
    }

    #[test]
    fn test_no_rows_before_schema() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed("something unrelated\n");
        assert!(parser.next_record().is_none());
        assert!(parser.schema().is_none());
    }

    #[test]
    fn test_schema_header_split_across_chunks() {
        let mut parser = DumpStreamParser::new("T");
        parser.feed("CREATE TABLE `T` (\n  `id` bigint");
        parser.feed(" NOT NULL,\n  `x` text,\n  `y` text\n);");
        assert_eq!(parser.schema().map(|c| c.len()), Some(3));
    }
}
