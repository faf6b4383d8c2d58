use serde::{Deserialize, Serialize};

use crate::util::hop_timestamp;

// ════════════════════════════════════════════════════════════════
//  Stages
// ════════════════════════════════════════════════════════════════

/// Имена стадий по умолчанию, под которыми стадии пишут себя в provenance.
pub mod stage {
    pub const PUBLISH: &str = "publish";
    pub const RELAY: &str = "relay";
    pub const SINK: &str = "sink";
}

/// Статус, который sink возвращает в каждом acknowledgement.
pub const ACK_NOTE: &str = "Processed";

// ════════════════════════════════════════════════════════════════
//  Provenance
// ════════════════════════════════════════════════════════════════

/// Один hop в audit trail: `<stage>:[<host>,<timestamp>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub stage: String,
    pub host: String,
    pub at: String,
}

/// Символы разметки trail'а. В stage/host/времени заменяются на `_`,
/// иначе `hops()` не восстановит границы hop'ов.
const TRAIL_DELIMITERS: [char; 3] = ['[', ']', ','];

fn trail_safe(part: String) -> String {
    if part.contains(TRAIL_DELIMITERS) {
        part.replace(TRAIL_DELIMITERS, "_")
    } else {
        part
    }
}

impl Hop {
    pub fn new(stage: impl Into<String>, host: impl Into<String>, at: impl Into<String>) -> Self {
        Self {
            stage: trail_safe(stage.into()),
            host: trail_safe(host.into()),
            at: trail_safe(at.into()),
        }
    }

    /// Hop с текущим временем локальных часов.
    pub fn now(stage: &str, host: &str) -> Self {
        Self::new(stage, host, hop_timestamp())
    }

    fn parse(segment: &str) -> Option<Self> {
        let (stage, rest) = segment.split_once(":[")?;
        let inner = rest.strip_suffix(']')?;
        let (host, at) = inner.rsplit_once(',')?;
        Some(Self::new(stage, host, at))
    }
}

impl std::fmt::Display for Hop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:[{},{}]", self.stage, self.host, self.at)
    }
}

/// Append-only audit trail стадий, через которые прошла запись.
///
/// Единственный мутатор — `append`: hop дописывается в конец,
/// предыдущие hop'ы никогда не переписываются.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provenance(String);

impl Provenance {
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Восстановить trail из wire-строки (codec decode).
    pub fn from_trail(trail: impl Into<String>) -> Self {
        Self(trail.into())
    }

    pub fn append(&mut self, hop: &Hop) {
        if !self.0.is_empty() {
            self.0.push(',');
        }
        self.0.push_str(&hop.to_string());
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Разобрать trail обратно в hop'ы (в порядке прохождения).
    /// Сегменты, не похожие на hop, пропускаются.
    pub fn hops(&self) -> Vec<Hop> {
        let mut hops = Vec::new();
        let mut rest = self.0.as_str();
        while !rest.is_empty() {
            let end = match rest.find(']') {
                Some(i) => i + 1,
                None => break,
            };
            if let Some(hop) = Hop::parse(&rest[..end]) {
                hops.push(hop);
            }
            rest = rest[end..].trim_start_matches(',');
        }
        hops
    }

    pub fn len(&self) -> usize {
        self.hops().len()
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// Именованное строковое поле. Значения никогда не парсятся
/// и не валидируются численно.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Единица работы пайплайна.
///
/// Создаётся один раз при чтении файла (тогда же получает `id`),
/// дальше передаётся по значению: каждая стадия может владеть своей
/// копией, но `id` и накопленный `provenance` сохраняются.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub destination: String,
    pub provenance: Provenance,
    /// Поля в порядке колонок исходного файла.
    pub fields: Vec<Field>,
    #[serde(default)]
    pub note: String,
}

impl Record {
    /// Новая запись со свежим UUID v4 и пустым provenance.
    pub fn new(destination: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            destination: destination.into(),
            provenance: Provenance::new(),
            fields,
            note: String::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Дописать hop текущей стадии в provenance.
    pub fn stamp(&mut self, stage: &str, host: &str) {
        self.provenance.append(&Hop::now(stage, host));
    }

    /// Плоское JSON-представление: служебные колонки + поля по имени.
    pub fn to_document(&self) -> serde_json::Value {
        let mut doc = serde_json::Map::with_capacity(self.fields.len() + 4);
        doc.insert("uuid".into(), self.id.clone().into());
        doc.insert("dest".into(), self.destination.clone().into());
        doc.insert("path".into(), self.provenance.as_str().into());
        for field in &self.fields {
            doc.insert(field.name.clone(), field.value.clone().into());
        }
        doc.insert("note".into(), self.note.clone().into());
        serde_json::Value::Object(doc)
    }
}

// ════════════════════════════════════════════════════════════════
//  Acknowledgement
// ════════════════════════════════════════════════════════════════

/// Тело ответа `PostData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub id: String,
    pub provenance: String,
    pub note: String,
}

impl Acknowledgement {
    pub fn processed(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            provenance: record.provenance.as_str().to_string(),
            note: ACK_NOTE.to_string(),
        }
    }
}
