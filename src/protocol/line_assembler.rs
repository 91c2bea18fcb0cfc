use std::io::{ErrorKind, Read};

const READ_CHUNK: usize = 8 * 1024;

/// Splits a byte stream into lines. Bytes are buffered until a `\n` arrives,
/// so a multi-byte character split across reads is decoded whole.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;
        while let Some(idx) = rest.iter().position(|byte| *byte == b'\n') {
            self.pending.extend_from_slice(&rest[..idx]);
            lines.push(decode(&std::mem::take(&mut self.pending)));
            rest = &rest[idx + 1..];
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Trailing text that never saw a newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(decode(&std::mem::take(&mut self.pending)))
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Reads `reader` to EOF, handing each complete line to `on_line`. Stops early
/// when `on_line` returns `false`.
pub fn read_lines<R, F>(mut reader: R, mut on_line: F) -> std::io::Result<()>
where
    R: Read,
    F: FnMut(String) -> bool,
{
    let mut assembler = LineAssembler::default();
    let mut buf = [0_u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        for line in assembler.push(&buf[..read]) {
            if !on_line(line) {
                return Ok(());
            }
        }
    }
    if let Some(line) = assembler.finish() {
        on_line(line);
    }
    Ok(())
}
