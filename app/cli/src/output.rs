//! FILENAME: app/cli/src/output.rs
//! Row sinks writing pivoted rows to a byte stream.

use std::io::{self, Write};

use clap::ValueEnum;
use engine::{Row, RowSink, ScalarValue, Schema};
use serde_json::{Map, Number, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Header line with the output column names, then one record per row.
    Csv,
    /// One JSON object per line, keyed by output column name.
    Json,
}

// ============================================================================
// CSV
// ============================================================================

pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    /// Writes the header immediately, so an empty result still names its columns.
    pub fn new(inner: W, schema: &Schema) -> Result<Self, csv::Error> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(schema.columns().iter().map(|c| c.name.as_str()))?;
        Ok(CsvSink { writer })
    }

    pub fn finish(mut self) -> Result<(), csv::Error> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    type Error = csv::Error;

    fn put(&mut self, row: Row) -> Result<(), csv::Error> {
        self.writer
            .write_record(row.values().iter().map(ScalarValue::display_value))
    }
}

// ============================================================================
// JSON LINES
// ============================================================================

pub struct JsonLinesSink<W: Write> {
    writer: W,
    names: Vec<String>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W, schema: &Schema) -> Self {
        JsonLinesSink {
            writer,
            names: schema.columns().iter().map(|c| c.name.clone()).collect(),
        }
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write> RowSink for JsonLinesSink<W> {
    type Error = io::Error;

    fn put(&mut self, row: Row) -> io::Result<()> {
        let object: Map<String, Value> = self
            .names
            .iter()
            .cloned()
            .zip(row.values().iter().map(json_value))
            .collect();
        serde_json::to_writer(&mut self.writer, &Value::Object(object))?;
        self.writer.write_all(b"\n")
    }
}

/// JSON form of a cell: numbers and booleans stay typed, everything else is
/// its display text.
pub fn json_value(value: &ScalarValue) -> Value {
    match value {
        ScalarValue::Null => Value::Null,
        ScalarValue::SmallInt(v) => Value::from(*v),
        ScalarValue::Int(v) => Value::from(*v),
        ScalarValue::BigInt(v) => Value::from(*v),
        ScalarValue::Float4(v) => Number::from_f64(f64::from(*v)).map_or(Value::Null, Value::Number),
        ScalarValue::Float8(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
        ScalarValue::Boolean(b) => Value::Bool(*b),
        other => Value::String(other.display_value()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{ColumnDesc, ScalarType};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDesc::varchar("store", 16),
            ColumnDesc::new("Q1", ScalarType::Int),
            ColumnDesc::new("Q2", ScalarType::Int),
        ])
    }

    fn row() -> Row {
        Row::new(vec![ScalarValue::text("store, A"), ScalarValue::Int(100), ScalarValue::Null])
    }

    #[test]
    fn test_csv_output() {
        let mut buf = Vec::new();
        let mut sink = CsvSink::new(&mut buf, &schema()).unwrap();
        sink.put(row()).unwrap();
        sink.finish().unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "store,Q1,Q2\n\"store, A\",100,\n");
    }

    #[test]
    fn test_csv_header_without_rows() {
        let mut buf = Vec::new();
        CsvSink::new(&mut buf, &schema()).unwrap().finish().unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "store,Q1,Q2\n");
    }

    #[test]
    fn test_json_lines_output() {
        let mut buf = Vec::new();
        let mut sink = JsonLinesSink::new(&mut buf, &schema());
        sink.put(row()).unwrap();
        sink.finish().unwrap();
        let line: Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(line["store"], "store, A");
        assert_eq!(line["Q1"], 100);
        assert!(line["Q2"].is_null());
    }

    #[test]
    fn test_json_values() {
        assert_eq!(json_value(&ScalarValue::Float8(f64::NAN)), Value::Null);
        assert_eq!(json_value(&ScalarValue::Boolean(true)), Value::Bool(true));
        assert_eq!(
            json_value(&ScalarValue::Numeric { unscaled: 150, scale: 2 }),
            Value::String("1.50".to_string())
        );
    }
}
