//! Change extraction.
//!
//! The design treats page parsing as a source-specific concern; this
//! extractor is the "representative, fully working" implementation the
//! expansion supplies — it treats a fetched page body as one candidate
//! change per non-empty line (`title[::url]`), which is enough to drive
//! the dedup/persistence pipeline that is the actual subject of this
//! component.

use crate::regulatory::models::{CandidateChange, RegulatorySource, Severity};

pub fn extract_candidates(source: &RegulatorySource, body: &str) -> Vec<CandidateChange> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (title, url) = match line.split_once("::") {
                Some((t, u)) => (t.trim().to_string(), u.trim().to_string()),
                None => (
                    line.to_string(),
                    format!("{}/{}", source.base_url.trim_end_matches('/'), slugify(line)),
                ),
            };

            CandidateChange {
                severity: Severity::classify(&title),
                change_type: "regulatory_update".to_string(),
                body: title.clone(),
                title,
                url,
            }
        })
        .collect()
}

fn slugify(text: &str) -> String {
    text.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> RegulatorySource {
        RegulatorySource {
            id: "sec_edgar".to_string(),
            name: "SEC EDGAR".to_string(),
            base_url: "https://example.test/sec".to_string(),
            source_type: "generic".to_string(),
            check_interval_minutes: 60,
            active: true,
            consecutive_failures: 0,
            quarantined: false,
            quarantined_until: None,
        }
    }

    #[test]
    fn extracts_one_candidate_per_line() {
        let body = "New filing requirement\nEmergency rule, immediate effect\n";
        let candidates = extract_candidates(&source(), body);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].severity, Severity::Critical);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let body = "A\n\n\nB\n";
        let candidates = extract_candidates(&source(), body);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn explicit_url_segment_is_used_when_present() {
        let body = "Title Text :: https://example.test/doc/1";
        let candidates = extract_candidates(&source(), body);
        assert_eq!(candidates[0].url, "https://example.test/doc/1");
        assert_eq!(candidates[0].title, "Title Text");
    }
}
