use std::fs;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::Path;

use common::IndicatorType;
use ipnet::Ipv4Net;
use regex::Regex;

use crate::extract::ExtractedMember;

/// Indicator values longer than this are discarded (column width guard).
const MAX_VALUE_LEN: usize = 255;

/// One mined indicator with its provenance inside the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndicatorHit {
    pub indicator_type: IndicatorType,
    pub value: String,
    pub relative_path: String,
    /// 1-based line number.
    pub line: u32,
}

/// Aggregate result of scanning one archive's members.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub hits: Vec<IndicatorHit>,
    pub files_scanned: u64,
    pub lines_truncated: u64,
}

impl ScanOutcome {
    pub fn count_of(&self, kind: IndicatorType) -> usize {
        self.hits.iter().filter(|h| h.indicator_type == kind).count()
    }
}

/// Line-oriented indicator matcher. Patterns are compiled once at boot from
/// configuration; scanning performs no I/O beyond reading the members and
/// never persists anything.
pub struct IocScanner {
    /// One pattern per configured domain suffix, paired with the suffix.
    domain_patterns: Vec<(String, Regex)>,
    email_pattern: Regex,
    email_suffixes: Vec<String>,
    ipv4_pattern: Regex,
    cidrs: Vec<Ipv4Net>,
    max_line_bytes: usize,
}

impl IocScanner {
    pub fn new(
        domain_suffixes: &[String],
        email_suffixes: &[String],
        cidrs: Vec<Ipv4Net>,
        max_line_bytes: usize,
    ) -> Result<Self, regex::Error> {
        let domain_patterns = domain_suffixes
            .iter()
            .map(|suffix| {
                let escaped = regex::escape(suffix);
                // The suffix plus any subdomain labels in front of it.
                Regex::new(&format!(
                    r"(?i)\b((?:[a-z0-9][a-z0-9-]*\.)*{escaped})\b"
                ))
                .map(|re| (suffix.clone(), re))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let email_pattern = Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")?;
        let ipv4_pattern = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b")?;

        Ok(Self {
            domain_patterns,
            email_pattern,
            email_suffixes: email_suffixes.to_vec(),
            ipv4_pattern,
            cidrs,
            max_line_bytes,
        })
    }

    /// Scan the text-bearing members of an extracted archive. Only members
    /// named `*.txt` (case-insensitive) are read. Blocking.
    pub fn scan_members(&self, members: &[ExtractedMember]) -> std::io::Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        for member in members {
            if !member.relative_path.to_ascii_lowercase().ends_with(".txt") {
                continue;
            }
            self.scan_file(&member.relative_path, &member.disk_path, &mut outcome)?;
            outcome.files_scanned += 1;
        }

        Ok(outcome)
    }

    /// Scan a single file line by line to bound memory. Overlong lines are
    /// truncated and counted; invalid UTF-8 is replaced, never fatal.
    fn scan_file(
        &self,
        relative_path: &str,
        disk_path: &Path,
        outcome: &mut ScanOutcome,
    ) -> std::io::Result<()> {
        let mut reader = BufReader::new(fs::File::open(disk_path)?);
        let mut raw = Vec::new();
        let mut line_no: u32 = 0;

        loop {
            raw.clear();
            let n = reader.read_until(b'\n', &mut raw)?;
            if n == 0 {
                break;
            }
            line_no += 1;

            while raw.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                raw.pop();
            }
            if raw.len() > self.max_line_bytes {
                raw.truncate(self.max_line_bytes);
                outcome.lines_truncated += 1;
            }

            let line = String::from_utf8_lossy(&raw);
            self.scan_line(&line, relative_path, line_no, &mut outcome.hits);
        }

        Ok(())
    }

    fn scan_line(&self, line: &str, relative_path: &str, line_no: u32, out: &mut Vec<IndicatorHit>) {
        for (_, pattern) in &self.domain_patterns {
            for capture in pattern.captures_iter(line) {
                let value = capture[1].to_ascii_lowercase();
                let value = value.trim_end_matches('.').to_string();
                if !value.is_empty() && value.len() <= MAX_VALUE_LEN && is_valid_hostname(&value) {
                    out.push(IndicatorHit {
                        indicator_type: IndicatorType::Domain,
                        value,
                        relative_path: relative_path.to_string(),
                        line: line_no,
                    });
                }
            }
        }

        if !self.email_suffixes.is_empty() {
            for m in self.email_pattern.find_iter(line) {
                let email = m.as_str().to_ascii_lowercase();
                if email.len() <= MAX_VALUE_LEN
                    && self.email_suffixes.iter().any(|s| email.ends_with(s))
                {
                    out.push(IndicatorHit {
                        indicator_type: IndicatorType::Email,
                        value: email,
                        relative_path: relative_path.to_string(),
                        line: line_no,
                    });
                }
            }
        }

        if !self.cidrs.is_empty() {
            for m in self.ipv4_pattern.find_iter(line) {
                // Strict dotted-quad parse rejects out-of-range octets and
                // leading zeros; a hit counts only inside a configured range.
                let Ok(addr) = m.as_str().parse::<Ipv4Addr>() else {
                    continue;
                };
                if self.cidrs.iter().any(|net| net.contains(&addr)) {
                    out.push(IndicatorHit {
                        indicator_type: IndicatorType::Ipv4,
                        value: addr.to_string(),
                        relative_path: relative_path.to_string(),
                        line: line_no,
                    });
                }
            }
        }
    }
}

/// RFC-style hostname shape: dot-separated labels of at most 63 chars,
/// alphanumeric with interior hyphens.
fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
