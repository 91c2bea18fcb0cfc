use super::command::{parse_line, CacheOp, ProtocolLine};
use crate::locker::{CacheFiles, LockerError};
use std::collections::BTreeMap;

/// Applies stdout lines of one run to that run's cache files, in order.
#[derive(Debug)]
pub struct Interpreter<'a> {
    cache: &'a mut CacheFiles,
    exports: BTreeMap<String, String>,
    applied: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(cache: &'a mut CacheFiles) -> Self {
        Self {
            cache,
            exports: BTreeMap::new(),
            applied: 0,
        }
    }

    pub fn apply(&mut self, line: &str) -> Result<ProtocolLine, LockerError> {
        let parsed = parse_line(line);
        match &parsed {
            ProtocolLine::Cache {
                channel,
                op: CacheOp::Trunc,
                payload,
            } => {
                self.cache.truncate(*channel, payload)?;
                self.applied += 1;
            }
            ProtocolLine::Cache {
                channel,
                op: CacheOp::Append,
                payload,
            } => {
                self.cache.append(*channel, payload)?;
                self.applied += 1;
            }
            ProtocolLine::Export { key, value } => {
                self.exports.insert(key.clone(), value.clone());
            }
            ProtocolLine::Text(_) => {}
        }
        Ok(parsed)
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn into_exports(self) -> BTreeMap<String, String> {
        self.exports
    }
}
