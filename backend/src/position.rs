//! Conversion between flat offsets and line-based coordinates.
//!
//! Offsets are UTF-16 code units. The sidecar exchanges zero-based
//! line/character, tsserver one-based line/offset; both count characters in
//! UTF-16 units too, so only the line split differs.

use crate::protocol::LspPosition;

#[derive(Debug, Clone)]
pub(crate) struct LineIndex {
    /// Offset of the first unit of each line.
    starts: Vec<u32>,
    /// Offset just past each line's content, before `\n` / `\r\n`.
    ends: Vec<u32>,
    len: u32,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        let mut ends = Vec::new();
        let mut offset = 0u32;
        let mut prev_cr = false;

        for ch in text.chars() {
            if ch == '\n' {
                ends.push(if prev_cr { offset - 1 } else { offset });
                offset += 1;
                starts.push(offset);
                prev_cr = false;
                continue;
            }
            prev_cr = ch == '\r';
            offset += ch.len_utf16() as u32;
        }
        ends.push(offset);

        Self {
            starts,
            ends,
            len: offset,
        }
    }

    /// Length of the text in UTF-16 units.
    #[cfg(test)]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Zero-based position of `offset`, clamped to the text.
    pub fn position(&self, offset: u32) -> LspPosition {
        let offset = offset.min(self.len);
        let line = self.starts.partition_point(|start| *start <= offset) - 1;
        let column = offset.min(self.ends[line]) - self.starts[line];
        LspPosition {
            line: line as u32,
            character: column,
        }
    }

    /// Offset of a zero-based position. Lines past the end map to the end of
    /// the text; characters past the line end clamp to the line end.
    pub fn offset(&self, position: LspPosition) -> u32 {
        let line = position.line as usize;
        if line >= self.starts.len() {
            return self.len;
        }
        (self.starts[line] + position.character).min(self.ends[line])
    }

    /// One-based `(line, offset)` as tsserver expects.
    pub fn ts_location(&self, offset: u32) -> (u32, u32) {
        let position = self.position(offset);
        (position.line + 1, position.character + 1)
    }

    pub fn offset_at_ts_location(&self, line: u32, offset: u32) -> u32 {
        self.offset(LspPosition {
            line: line.saturating_sub(1),
            character: offset.saturating_sub(1),
        })
    }
}
