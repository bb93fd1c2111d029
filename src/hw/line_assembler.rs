use super::radio::RawRead;
use crate::utils::format_hex;

/// Longest line accepted before the pending bytes are discarded.
const MAX_LINE_BYTES: usize = 512;

/// Reassembles notification fragments into reader lines.
#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    pending: Vec<u8>,
    /// Set after an overlong line; bytes are dropped until the next terminator.
    discarding: bool,
}

impl LineAssembler {
    /// Feeds one notification payload and returns every line it completed.
    pub(crate) fn push(&mut self, fragment: &[u8]) -> Vec<RawRead> {
        let mut completed = Vec::new();

        for &byte in fragment {
            if byte == b'\r' || byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else if !self.pending.is_empty() {
                    completed.push(self.flush());
                }
                continue;
            }
            if self.discarding {
                continue;
            }

            if self.pending.len() >= MAX_LINE_BYTES {
                completed.push(RawRead::Error(format!(
                    "line exceeded {MAX_LINE_BYTES} bytes and was discarded"
                )));
                self.pending.clear();
                self.discarding = true;
                continue;
            }
            self.pending.push(byte);
        }

        completed
    }

    fn flush(&mut self) -> RawRead {
        let bytes = std::mem::take(&mut self.pending);
        match String::from_utf8(bytes) {
            Ok(line) => RawRead::Line(line),
            Err(error) => RawRead::Error(format!(
                "line is not valid UTF-8: {}",
                format_hex(error.as_bytes())
            )),
        }
    }
}
