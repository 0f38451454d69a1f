use std::time::Instant;

use crate::config::LogSettings;

/// Collects per-query statistics and emits one log record when the query
/// finishes, at the configured level (or the slow-statement level when the
/// elapsed time crosses the threshold).
pub(crate) struct QueryLogger<'q> {
    sql: &'q str,
    rows_returned: u64,
    rows_affected: u64,
    start: Instant,
    settings: LogSettings,
}

impl<'q> QueryLogger<'q> {
    pub(crate) fn new(sql: &'q str, settings: LogSettings) -> Self {
        Self {
            sql,
            rows_returned: 0,
            rows_affected: 0,
            start: Instant::now(),
            settings,
        }
    }

    pub(crate) fn sql(&self) -> &'q str {
        self.sql
    }

    pub(crate) fn increment_rows_returned(&mut self) {
        self.rows_returned += 1;
    }

    pub(crate) fn increase_rows_affected(&mut self, n: u64) {
        self.rows_affected += n;
    }

    pub(crate) fn finish(&self) {
        let elapsed = self.start.elapsed();

        let filter = if elapsed >= self.settings.slow_statements_duration {
            self.settings.slow_statements_level
        } else {
            self.settings.statements_level
        };

        let Some(level) = filter.to_level() else {
            return;
        };

        if log::log_enabled!(target: "quarry::query", level) {
            log::log!(
                target: "quarry::query",
                level,
                "{}; rows affected: {}, rows returned: {}, elapsed: {:.3?}",
                query_summary(self.sql),
                self.rows_affected,
                self.rows_returned,
                elapsed,
            );
        }
    }
}

impl Drop for QueryLogger<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// First line of the query, truncated on a character boundary.
fn query_summary(sql: &str) -> &str {
    let line = sql.lines().next().unwrap_or_default();
    match line.char_indices().nth(100) {
        Some((index, _)) => &line[..index],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::query_summary;

    #[test]
    fn summary_takes_the_first_line() {
        assert_eq!(query_summary("SELECT 1\nFROM t"), "SELECT 1");
    }

    #[test]
    fn summary_truncates_on_char_boundaries() {
        let long = "é".repeat(200);
        assert_eq!(query_summary(&long).chars().count(), 100);
    }
}
