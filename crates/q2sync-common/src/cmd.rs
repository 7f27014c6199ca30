// cmd.rs — command line tokenizing and the deferred command buffer

use crate::common::com_printf;

pub const MAX_STRING_TOKENS: usize = 80;

const CMD_BUFFER_SIZE: usize = 8192;

/// A tokenized command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmdArgs {
    argv: Vec<String>,
    args: String,
}

impl CmdArgs {
    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    /// Token `i`, or an empty string past the end.
    pub fn argv(&self, i: usize) -> &str {
        self.argv.get(i).map(String::as_str).unwrap_or("")
    }

    /// Everything after the command name, untokenized.
    pub fn args(&self) -> &str {
        &self.args
    }
}

/// Splits `text` into whitespace separated tokens; double quotes group.
/// Parsing stops at the first newline.
pub fn cmd_tokenize_string(text: &str) -> CmdArgs {
    let mut out = CmdArgs::default();
    let bytes = text.as_bytes();
    let mut pos = 0;

    loop {
        // skip whitespace up to a \n
        while pos < bytes.len() && bytes[pos] <= b' ' && bytes[pos] != b'\n' {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] == b'\n' {
            return out;
        }

        // set args to everything after the first arg
        if out.argv.len() == 1 {
            let rest = &text[pos..];
            let line = rest.split('\n').next().unwrap_or(rest);
            out.args = line.trim_end().to_string();
        }

        let (token, next) = com_parse(bytes, pos);
        pos = next;
        if out.argv.len() < MAX_STRING_TOKENS {
            out.argv.push(token);
        }
    }
}

fn com_parse(data: &[u8], mut pos: usize) -> (String, usize) {
    let mut token = Vec::new();

    if data[pos] == b'"' {
        pos += 1;
        while pos < data.len() && data[pos] != b'"' && data[pos] != b'\n' {
            token.push(data[pos]);
            pos += 1;
        }
        if pos < data.len() && data[pos] == b'"' {
            pos += 1;
        }
    } else {
        while pos < data.len() && data[pos] > b' ' {
            token.push(data[pos]);
            pos += 1;
        }
    }

    (String::from_utf8_lossy(&token).into_owned(), pos)
}

/// Console text queued for execution after the current frame.
#[derive(Debug, Clone, Default)]
pub struct CmdBuffer {
    text: String,
}

impl CmdBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds command text at the end of the buffer.
    pub fn cbuf_add_text(&mut self, text: &str) {
        if self.text.len() + text.len() >= CMD_BUFFER_SIZE {
            com_printf("Cbuf_AddText: overflow\n");
            return;
        }
        self.text.push_str(text);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hands the queued text to the caller and empties the buffer.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain_and_quoted() {
        let args = cmd_tokenize_string("download \"maps/base 1.bsp\" 100\n");
        assert_eq!(args.argc(), 3);
        assert_eq!(args.argv(0), "download");
        assert_eq!(args.argv(1), "maps/base 1.bsp");
        assert_eq!(args.argv(2), "100");
        assert_eq!(args.argv(3), "");
        assert_eq!(args.args(), "\"maps/base 1.bsp\" 100");
    }

    #[test]
    fn test_tokenize_stops_at_newline() {
        let args = cmd_tokenize_string("  begin 7\nkill");
        assert_eq!(args.argc(), 2);
        assert_eq!(args.argv(1), "7");
        assert_eq!(args.args(), "7");

        assert_eq!(cmd_tokenize_string("").argc(), 0);
        assert_eq!(cmd_tokenize_string("\n").argc(), 0);
    }

    #[test]
    fn test_cbuf_accumulates_and_overflows() {
        let mut cbuf = CmdBuffer::new();
        cbuf.cbuf_add_text("map base1");
        cbuf.cbuf_add_text("\n");
        assert_eq!(cbuf.text(), "map base1\n");

        cbuf.cbuf_add_text(&"x".repeat(CMD_BUFFER_SIZE));
        assert_eq!(cbuf.take(), "map base1\n");
        assert_eq!(cbuf.text(), "");
    }
}
