use crate::service::{SqlDialect, WriteShape};

/// Backend, выбранный полем `destination` записи.
///
/// Закрытое множество известных тегов плюс явный `Unrecognized` —
/// роутер обязан обработать его отдельно, а не молча пропустить.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Postgres,
    MariaDb,
    Redis,
    MongoDb,
    Unrecognized(String),
}

impl Destination {
    /// Все известные destinations, в порядке меню.
    pub const KNOWN: [Destination; 4] =
        [Destination::Postgres, Destination::Redis, Destination::MongoDb, Destination::MariaDb];

    /// Регистронезависимый разбор тега. Пустой или неизвестный тег →
    /// `Unrecognized` с исходной строкой.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Destination::Postgres,
            "mariadb" | "mysql" => Destination::MariaDb,
            "redis" => Destination::Redis,
            "mongodb" | "mongo" => Destination::MongoDb,
            _ => Destination::Unrecognized(tag.to_string()),
        }
    }

    /// Пункт интерактивного меню: 1 postgres, 2 redis, 3 mongodb, 4 mariadb.
    pub fn from_menu_choice(choice: u8) -> Option<Self> {
        match choice {
            1 => Some(Destination::Postgres),
            2 => Some(Destination::Redis),
            3 => Some(Destination::MongoDb),
            4 => Some(Destination::MariaDb),
            _ => None,
        }
    }

    /// Тег или номер пункта меню.
    pub fn from_selection(selection: &str) -> Self {
        match selection.trim().parse::<u8>() {
            Ok(n) => Self::from_menu_choice(n)
                .unwrap_or_else(|| Destination::Unrecognized(selection.to_string())),
            Err(_) => Self::parse(selection),
        }
    }

    /// Канонический тег, который пишется в запись.
    pub fn tag(&self) -> &str {
        match self {
            Destination::Postgres => "postgres",
            Destination::MariaDb => "mariadb",
            Destination::Redis => "redis",
            Destination::MongoDb => "mongodb",
            Destination::Unrecognized(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Destination::Unrecognized(_))
    }

    /// Форма записи, которую роутер строит для этого destination.
    pub fn shape(&self) -> Option<WriteShape> {
        match self {
            Destination::Postgres => Some(WriteShape::Sql(SqlDialect::Postgres)),
            Destination::MariaDb => Some(WriteShape::Sql(SqlDialect::MySql)),
            Destination::Redis | Destination::MongoDb => Some(WriteShape::Document),
            Destination::Unrecognized(_) => None,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Unrecognized(tag) if tag.is_empty() => f.write_str("<empty>"),
            other => f.write_str(other.tag()),
        }
    }
}
