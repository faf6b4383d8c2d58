//! Бинарная схема записи, версия 1.
//!
//! ```text
//! magic "RL" | version u8 | id | destination | provenance | note
//!            | field_count u16 | (name | value) * field_count
//! ```
//!
//! Каждая строка: длина u32 big-endian + UTF-8 байты.

use crate::error::RelayError;
use crate::types::{Field, Provenance, Record};

pub const MAGIC: &[u8; 2] = b"RL";
pub const VERSION: u8 = 1;

/// Сериализовать запись. Ошибка только если поле не помещается в
/// формат (строка > u32::MAX байт или больше u16::MAX полей).
pub fn encode(record: &Record) -> Result<Vec<u8>, RelayError> {
    let field_count = u16::try_from(record.fields.len())
        .map_err(|_| RelayError::format_err(format!("too many fields: {}", record.fields.len())))?;

    let body: usize = [&record.id, &record.destination, &record.note]
        .iter()
        .map(|s| s.len())
        .sum::<usize>()
        + record.provenance.as_str().len()
        + record.fields.iter().map(|f| f.name.len() + f.value.len() + 8).sum::<usize>();
    let mut buf = Vec::with_capacity(2 + 1 + 2 + 16 + body);

    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    put_str(&mut buf, &record.id)?;
    put_str(&mut buf, &record.destination)?;
    put_str(&mut buf, record.provenance.as_str())?;
    put_str(&mut buf, &record.note)?;
    buf.extend_from_slice(&field_count.to_be_bytes());
    for field in &record.fields {
        put_str(&mut buf, &field.name)?;
        put_str(&mut buf, &field.value)?;
    }
    Ok(buf)
}

/// Десериализовать запись. Любое нарушение схемы — `Format` ошибка.
pub fn decode(bytes: &[u8]) -> Result<Record, RelayError> {
    let mut r = Reader { buf: bytes, pos: 0 };

    if r.take(2)? != MAGIC {
        return Err(RelayError::format_err("bad magic"));
    }
    let version = r.take(1)?[0];
    if version != VERSION {
        return Err(RelayError::format_err(format!("unsupported schema version {version}")));
    }

    let id = r.string()?;
    let destination = r.string()?;
    let provenance = Provenance::from_trail(r.string()?);
    let note = r.string()?;

    let count = u16::from_be_bytes([r.byte()?, r.byte()?]) as usize;
    let mut fields = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let name = r.string()?;
        let value = r.string()?;
        fields.push(Field { name, value });
    }

    if r.pos != bytes.len() {
        return Err(RelayError::format_err(format!(
            "{} trailing bytes after {} fields",
            bytes.len() - r.pos,
            count
        )));
    }

    Ok(Record { id, destination, provenance, fields, note })
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<(), RelayError> {
    let len = u32::try_from(s.len())
        .map_err(|_| RelayError::format_err("string longer than u32::MAX"))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RelayError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len()).ok_or_else(|| {
            RelayError::format_err(format!(
                "truncated record: need {n} bytes at offset {}, have {}",
                self.pos,
                self.buf.len() - self.pos
            ))
        })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, RelayError> {
        Ok(self.take(1)?[0])
    }

    fn string(&mut self) -> Result<String, RelayError> {
        let len = self.take(4)?;
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let raw = self.take(len)?;
        let at = self.pos - len;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| RelayError::format_err(format!("string at offset {at} is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::Hop;

    fn sample() -> Record {
        let mut r = Record::new(
            "postgres",
            vec![
                Field::new("seq", "1"),
                Field::new("first", "Jörg"),
                Field::new("state", "CA"),
                Field::new("dollar", "$1,234.50"),
                Field::new("email", ""),
            ],
        );
        r.provenance.append(&Hop::new("publish", "h1", "01-05-2021 - 10:00:00.000"));
        r
    }

    #[test]
    fn decode_restores_every_field() {
        let r = sample();
        let bytes = encode(&r).unwrap();
        assert_eq!(&bytes[..2], b"RL");
        assert_eq!(bytes[2], VERSION);
        assert_eq!(decode(&bytes).unwrap(), r);
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = encode(&sample()).unwrap();
        for cut in [0, 1, 3, 10, bytes.len() - 1] {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format, "cut at {cut}");
        }
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(decode(&bytes).unwrap_err().message().contains("magic"));

        let mut bytes = encode(&sample()).unwrap();
        bytes[2] = 9;
        assert!(decode(&bytes).unwrap_err().message().contains("version"));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert!(decode(&bytes).unwrap_err().message().contains("trailing"));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut r = sample();
        r.id = "ab".into();
        let mut bytes = encode(&r).unwrap();
        // id payload starts after magic(2) + version(1) + len(4)
        bytes[7] = 0xff;
        assert_eq!(decode(&bytes).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn rejects_field_count_larger_than_payload() {
        let r = Record { fields: vec![], ..sample() };
        let mut bytes = encode(&r).unwrap();
        let n = bytes.len();
        bytes[n - 1] = 3;
        assert_eq!(decode(&bytes).unwrap_err().kind(), ErrorKind::Format);
    }
}
