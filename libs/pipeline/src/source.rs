use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use relay_api::Field;

use crate::config::SchemaConfig;
use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  LineSchema — строка файла → позиционные поля
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct LineSchema {
    columns: Vec<String>,
    delimiter: String,
    key_index: usize,
    skip_header: bool,
}

impl LineSchema {
    pub fn new(config: &SchemaConfig) -> Result<Self, PipelineError> {
        if config.columns.is_empty() {
            return Err(PipelineError::Config("schema has no columns".into()));
        }
        if config.delimiter.is_empty() {
            return Err(PipelineError::Config("empty delimiter".into()));
        }
        let key_index = config
            .columns
            .iter()
            .position(|c| *c == config.key_column)
            .ok_or_else(|| {
                PipelineError::Config(format!("key column '{}' is not in the schema", config.key_column))
            })?;
        Ok(Self {
            columns: config.columns.clone(),
            delimiter: config.delimiter.clone(),
            key_index,
            skip_header: config.skip_header,
        })
    }

    pub fn skip_header(&self) -> bool {
        self.skip_header
    }

    /// Разбить строку на поля. Число полей должно совпасть с числом
    /// колонок; значения не парсятся и не обрезаются.
    pub fn parse(&self, line_no: usize, line: &str) -> Result<Vec<Field>, PipelineError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Err(PipelineError::Malformed { line: line_no, expected: self.columns.len(), found: 0 });
        }

        let values: Vec<&str> = line.split(self.delimiter.as_str()).collect();
        if values.len() != self.columns.len() {
            return Err(PipelineError::Malformed {
                line: line_no,
                expected: self.columns.len(),
                found: values.len(),
            });
        }

        Ok(self
            .columns
            .iter()
            .zip(values)
            .map(|(name, value)| Field::new(name.as_str(), value))
            .collect())
    }

    /// Partition key записи (значение key-колонки).
    pub fn key<'a>(&self, fields: &'a [Field]) -> &'a str {
        fields.get(self.key_index).map(|f| f.value.as_str()).unwrap_or_default()
    }
}

/// Построчное чтение файла.
pub fn read_lines(path: &Path) -> Result<impl Iterator<Item = std::io::Result<String>>, PipelineError> {
    let file = File::open(path).map_err(|source| PipelineError::Source {
        path: path.display().to_string(),
        source,
    })?;
    Ok(BufReader::new(file).lines())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> LineSchema {
        LineSchema::new(&SchemaConfig::default()).unwrap()
    }

    const ROW: &str = "1,xkcd,Ada,Lovelace,10/12/1815,F,ada@example.com,1 Main St,CA,Fresno,93650,4111,01/01/2020,36.7,-119.7,$12.50";

    #[test]
    fn fields_map_positionally() {
        let fields = schema().parse(2, ROW).unwrap();
        assert_eq!(fields.len(), 16);
        assert_eq!(fields[0], Field::new("seq", "1"));
        assert_eq!(fields[2], Field::new("first", "Ada"));
        assert_eq!(fields[15], Field::new("dollar", "$12.50"));
        assert_eq!(schema().key(&fields), "CA");
    }

    #[test]
    fn crlf_is_tolerated() {
        let line = format!("{ROW}\r");
        assert_eq!(schema().parse(2, &line).unwrap()[15].value, "$12.50");
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        let err = schema().parse(7, "1,2,3").unwrap_err();
        assert!(matches!(err, PipelineError::Malformed { line: 7, expected: 16, found: 3 }));

        let err = schema().parse(8, "").unwrap_err();
        assert!(matches!(err, PipelineError::Malformed { found: 0, .. }));
    }

    #[test]
    fn key_column_must_exist() {
        let cfg = SchemaConfig { key_column: "planet".into(), ..SchemaConfig::default() };
        assert!(LineSchema::new(&cfg).unwrap_err().is_config());
    }

    #[test]
    fn reads_file_lines() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "header").unwrap();
        writeln!(f, "{ROW}").unwrap();
        let lines: Vec<String> = read_lines(f.path()).unwrap().map(Result::unwrap).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], ROW);
    }
}
