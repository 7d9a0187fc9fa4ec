//! Emission protocol: the generator announces each finished artifact with a
//! log line `* EMITTED TEST CASE: <Wrapper>_<id>, <status>`.

use regex::Regex;

use crate::error::GenerationError;

/// Incremental scanner over a growing log.
///
/// Input may arrive in arbitrary chunks; only complete lines are matched,
/// and a trailing partial line is kept until the rest of it arrives (or
/// [`finish`](Self::finish) is called at end of input).
#[derive(Debug)]
pub struct EmissionScanner {
    pattern: Regex,
    partial: String,
}

impl EmissionScanner {
    pub fn new(wrapper_prefix: &str) -> Result<Self, GenerationError> {
        let pattern = Regex::new(&format!(
            r"^.*\* EMITTED TEST CASE: {}_(\d+), \w+$",
            regex::escape(wrapper_prefix)
        ))?;
        Ok(Self {
            pattern,
            partial: String::new(),
        })
    }

    /// Match one complete line.
    pub fn match_line(&self, line: &str) -> Option<u64> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        self.pattern
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Feed a chunk of log text; returns ids announced by lines it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<u64> {
        self.partial.push_str(chunk);
        let Some(last_newline) = self.partial.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete.lines().filter_map(|l| self.match_line(l)).collect()
    }

    /// Flush a final unterminated line.
    pub fn finish(&mut self) -> Option<u64> {
        let line = std::mem::take(&mut self.partial);
        if line.is_empty() {
            None
        } else {
            self.match_line(&line)
        }
    }
}
