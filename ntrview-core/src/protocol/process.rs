//! Bulk responses from the control port.
//!
//! The device answers `PidList` with a text table, one process per line:
//!
//! ```text
//! pid: 0x00000000, pname:       fs, tid: 0004013000001102, kpobj: fff7a0a0
//! ```
//!
//! Any other bulk payload is treated as a free-form message.

use bytes::Bytes;
use serde::Serialize;

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    /// The raw line, kept for substring lookups.
    #[serde(skip)]
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProcessList {
    pub entries: Vec<ProcessEntry>,
}

impl ProcessList {
    /// Parse a process table. Lines that do not look like process rows
    /// are skipped.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let line = line.trim_end_matches(['\r', '\0']);
                let pid = field(line, "pid:")?;
                let pid = u32::from_str_radix(pid.trim_start_matches("0x"), 16).ok()?;
                let name = field(line, "pname:").unwrap_or_default().to_string();
                Some(ProcessEntry {
                    pid,
                    name,
                    line: line.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    /// Pid of the first process whose row mentions `name`.
    pub fn find_pid(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.line.contains(name))
            .map(|e| e.pid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Value of `key` in a `key: value, key: value` row.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let end = rest.find(',').unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Classified bulk payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkResponse {
    ProcessList(ProcessList),
    Message(String),
}

impl BulkResponse {
    pub fn classify(data: &Bytes) -> Self {
        let text = String::from_utf8_lossy(data);
        if text.starts_with("pid") {
            BulkResponse::ProcessList(ProcessList::parse(&text))
        } else {
            BulkResponse::Message(text.trim_end_matches('\0').to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "pid: 0x00000000, pname:       fs, tid: 0004013000001102, kpobj: fff7a0a0\n\
                         pid: 0x0000001a, pname:     niji_loc, tid: 0004000000164800, kpobj: fff77a30\n\
                         end of process list.\n";

    #[test]
    fn parses_rows_and_skips_footer() {
        let list = ProcessList::parse(TABLE);
        assert_eq!(list.len(), 2);
        assert_eq!(list.entries[0].pid, 0);
        assert_eq!(list.entries[0].name, "fs");
        assert_eq!(list.entries[1].pid, 0x1a);
        assert_eq!(list.entries[1].name, "niji_loc");
    }

    #[test]
    fn find_pid_by_substring() {
        let list = ProcessList::parse(TABLE);
        assert_eq!(list.find_pid("niji"), Some(0x1a));
        assert_eq!(list.find_pid("menu"), None);
    }

    #[test]
    fn classify_bulk() {
        let bulk = Bytes::from(TABLE);
        assert!(matches!(BulkResponse::classify(&bulk), BulkResponse::ProcessList(l) if l.len() == 2));

        let msg = Bytes::from_static(b"hello from ntr\0\0");
        assert_eq!(
            BulkResponse::classify(&msg),
            BulkResponse::Message("hello from ntr".into())
        );
    }
}
