//! `;`-terminated command framing.
//!
//! The relay forwards every completed read as one opaque message.  TCP is a
//! stream protocol, so a read may carry several commands (`FA;MD;`) or only
//! part of one (`FA0001`, then `4074000;`).  Interpreters that want whole
//! commands feed each message into a [`CommandAssembler`], one per peer:
//!
//! ```text
//! read 1: "FA;MD"      → ["FA"]         pending: "MD"
//! read 2: ";IF;\r\n"   → ["MD", "IF"]   pending: ""
//! ```
//!
//! Carriage returns and line feeds are discarded before assembly; the `;`
//! terminator is stripped from every command and empty commands are
//! skipped.
//!
//! # Example
//!
//! ```rust
//! use cat_relay_core::protocol::CommandAssembler;
//!
//! let mut assembler = CommandAssembler::new();
//! assert_eq!(assembler.push("FA;MD").unwrap(), vec!["FA".to_string()]);
//! assert_eq!(assembler.push(";").unwrap(), vec!["MD".to_string()]);
//! ```

use thiserror::Error;
use tracing::warn;

/// Pending (unterminated) text allowed before the assembler gives up.
pub const DEFAULT_MAX_PENDING: usize = 4096;

/// Command terminator of the CAT protocol.
pub const TERMINATOR: char = ';';

/// Error returned by [`CommandAssembler::push`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// More than `limit` bytes arrived without a terminator.  The pending
    /// text was discarded.
    #[error("{pending} bytes pending without a ';' terminator (limit {limit}); discarded")]
    Overflow { pending: usize, limit: usize },
}

/// Accumulates received text and cuts it into complete commands.
#[derive(Debug, Clone)]
pub struct CommandAssembler {
    pending: String,
    max_pending: usize,
}

impl CommandAssembler {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_PENDING)
    }

    /// Creates an assembler that tolerates `max_pending` unterminated bytes.
    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            pending: String::new(),
            max_pending,
        }
    }

    /// Text received so far that has not been terminated yet.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Appends `chunk` and returns every command it completes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Overflow`] when the unterminated remainder
    /// exceeds the limit.  Commands completed by this chunk are lost along
    /// with the remainder; the assembler is empty and usable afterwards.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<String>, FramingError> {
        self.pending
            .extend(chunk.chars().filter(|c| *c != '\r' && *c != '\n'));

        let mut commands = Vec::new();
        let mut consumed = 0;
        for (end, _) in self.pending.match_indices(TERMINATOR) {
            let command = &self.pending[consumed..end];
            if !command.is_empty() {
                commands.push(command.to_string());
            }
            consumed = end + TERMINATOR.len_utf8();
        }
        self.pending.replace_range(..consumed, "");

        if self.pending.len() > self.max_pending {
            let pending = self.pending.len();
            self.pending.clear();
            warn!("discarding {pending} unterminated bytes");
            return Err(FramingError::Overflow {
                pending,
                limit: self.max_pending,
            });
        }

        Ok(commands)
    }

    /// Drops any pending text.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

impl Default for CommandAssembler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_command() {
        let mut assembler = CommandAssembler::new();
        assert_eq!(assembler.push("ZZFAon1;").unwrap(), vec!["ZZFAon1"]);
        assert_eq!(assembler.pending(), "");
    }

    #[test]
    fn test_several_commands_in_one_read() {
        let mut assembler = CommandAssembler::new();
        assert_eq!(
            assembler.push("FA;MD;IF;").unwrap(),
            vec!["FA", "MD", "IF"]
        );
    }

    #[test]
    fn test_command_split_across_reads() {
        // Arrange
        let mut assembler = CommandAssembler::new();

        // Act
        let first = assembler.push("FA0001").unwrap();
        let second = assembler.push("4074000;").unwrap();

        // Assert
        assert!(first.is_empty());
        assert_eq!(second, vec!["FA00014074000"]);
    }

    #[test]
    fn test_line_endings_are_stripped() {
        let mut assembler = CommandAssembler::new();
        assert_eq!(assembler.push("FA;\r\nMD;\n").unwrap(), vec!["FA", "MD"]);
    }

    #[test]
    fn test_line_ending_inside_a_command_is_removed() {
        let mut assembler = CommandAssembler::new();
        assert_eq!(assembler.push("F\r\nA;").unwrap(), vec!["FA"]);
    }

    #[test]
    fn test_empty_commands_are_skipped() {
        let mut assembler = CommandAssembler::new();
        assert_eq!(assembler.push(";;FA;;").unwrap(), vec!["FA"]);
    }

    #[test]
    fn test_overflow_discards_pending_text() {
        // Arrange
        let mut assembler = CommandAssembler::with_limit(8);

        // Act
        let result = assembler.push("0123456789");

        // Assert
        assert_eq!(
            result,
            Err(FramingError::Overflow {
                pending: 10,
                limit: 8
            })
        );
        assert_eq!(assembler.pending(), "");
    }

    #[test]
    fn test_assembler_is_usable_after_overflow() {
        let mut assembler = CommandAssembler::with_limit(4);
        let _ = assembler.push("XXXXXXXX");
        assert_eq!(assembler.push("FA;").unwrap(), vec!["FA"]);
    }

    #[test]
    fn test_terminated_commands_do_not_count_towards_limit() {
        let mut assembler = CommandAssembler::with_limit(4);
        assert_eq!(
            assembler.push("FA00014074000;").unwrap(),
            vec!["FA00014074000"]
        );
    }

    #[test]
    fn test_reset_clears_pending() {
        let mut assembler = CommandAssembler::new();
        assembler.push("FA00").unwrap();
        assembler.reset();
        assert_eq!(assembler.push("MD;").unwrap(), vec!["MD"]);
    }
}
