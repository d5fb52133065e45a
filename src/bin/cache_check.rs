use std::sync::Arc;

use wick::cache::Cache;
use wick::cache::store::FileStore;
use wick::config::WickConfig;

/// Journal logger that lets wick's own records through at info (debug when
/// toggled) and everything else at warn.
struct FilteredJournal {
    inner: systemd_journal_logger::JournalLog,
}

impl log::Log for FilteredJournal {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if metadata.target().starts_with("wick") || metadata.target().starts_with("cache_check") {
            let max = if wick::debug_logging() {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            };
            metadata.level() <= max
        } else {
            metadata.level() <= log::LevelFilter::Warn
        }
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn format_age(age_ms: i64) -> String {
    let secs = age_ms.max(0) / 1000;
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d", s / 86_400),
    }
}

/// Prefix to clear from the command line. `--clear` needs a non-empty prefix;
/// wiping every entry takes `--clear-all`.
fn clear_prefix(args: &[String]) -> Result<Option<String>, String> {
    if args.iter().any(|a| a == "--clear-all") {
        return Ok(Some(String::new()));
    }
    let Some(i) = args.iter().position(|a| a == "--clear") else {
        return Ok(None);
    };
    match args.get(i + 1) {
        Some(prefix) if !prefix.is_empty() && !prefix.starts_with("--") => {
            Ok(Some(prefix.clone()))
        }
        _ => Err("--clear needs a key prefix (use --clear-all to drop everything)".to_string()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = WickConfig::load(&WickConfig::default_path());

    let journal = systemd_journal_logger::JournalLog::new()?
        .with_syslog_identifier("wick-cache-check".to_string());
    wick::set_debug_logging(config.debug_logging);
    log::set_boxed_logger(Box::new(FilteredJournal { inner: journal }))?;
    log::set_max_level(log::LevelFilter::Debug);

    let args: Vec<String> = std::env::args().collect();
    let clear_prefix = clear_prefix(&args)?;

    println!("=== Cache: {} ===\n", config.cache_path.display());

    let store = FileStore::open(&config.cache_path)?;
    let cache = Cache::new(Arc::new(store));

    if let Some(prefix) = clear_prefix {
        let removed = cache.clear_by_prefix(&prefix);
        log::info!("Cleared {} entries under '{}'", removed, prefix);
        println!("Cleared {} entries under '{}'\n", removed, prefix);
    }

    let entries = cache.entries();
    if entries.is_empty() {
        println!("(empty)");
    }
    for entry in &entries {
        println!(
            "  [{}] {:<40} age {:>7}  ttl {}",
            if entry.is_fresh { "fresh" } else { "stale" },
            entry.key,
            format_age(entry.age_ms),
            format_age(entry.ttl_ms as i64)
        );
    }

    let stats = cache.stats();
    println!(
        "\n{} entries: {} fresh, {} stale",
        stats.total_entries, stats.active_entries, stats.expired_entries
    );
    Ok(())
}
