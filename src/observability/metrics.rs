//! Metrics collection.
//!
//! # Metrics
//! - `config_sections_loaded` (gauge): sections in the current snapshot
//! - `config_section_decodes_total` (counter): decodes by section
//! - `config_change_events_total` (counter): pushed documents by data id
//! - `config_change_failures_total` (counter): dropped notifications by section

pub fn record_sections_loaded(count: usize) {
    ::metrics::gauge!("config_sections_loaded").set(count as f64);
}

pub fn record_section_decode(section: &str) {
    ::metrics::counter!("config_section_decodes_total", "section" => section.to_string())
        .increment(1);
}

pub fn record_change_event(data_id: &str) {
    ::metrics::counter!("config_change_events_total", "data_id" => data_id.to_string())
        .increment(1);
}

pub fn record_change_failure(section: &str) {
    ::metrics::counter!("config_change_failures_total", "section" => section.to_string())
        .increment(1);
}
