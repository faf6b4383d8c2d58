use chrono::Local;

/// Формат timestamp'а в hop'е provenance: `DD-MM-YYYY - HH:MM:SS.mmm`.
pub const HOP_TIME_FORMAT: &str = "%d-%m-%Y - %H:%M:%S%.3f";

/// Текущее время локальных часов в формате hop'а.
pub fn hop_timestamp() -> String {
    Local::now().format(HOP_TIME_FORMAT).to_string()
}

/// Текущее Unix-время в миллисекундах.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Конвертировать unix ms в строку даты `YYYY-MM-DD` (UTC).
pub fn date_from_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Имя хоста для provenance: явный override, иначе `hostname::get()`,
/// иначе `"unknown"`.
pub fn host_identity(configured: Option<&str>) -> String {
    match configured {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_timestamp_shape() {
        let ts = hop_timestamp();
        // 01-05-2021 - 10:00:00.000
        assert_eq!(ts.len(), 25);
        assert_eq!(&ts[10..13], " - ");
        assert_eq!(&ts[2..3], "-");
        assert_eq!(&ts[21..22], ".");
    }

    #[test]
    fn date_from_epoch_ms() {
        assert_eq!(date_from_ms(0), "1970-01-01");
        assert_eq!(date_from_ms(1_700_000_000_000), "2023-11-14");
    }

    #[test]
    fn configured_host_wins() {
        assert_eq!(host_identity(Some("edge-1")), "edge-1");
        assert!(!host_identity(None).is_empty());
        assert!(!host_identity(Some("")).is_empty());
    }
}
