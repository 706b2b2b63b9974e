//! The serial command shell.

use core::fmt::{self, Write};

use crate::devicetree::{DeviceTree, Node};

/// Bytes a command line can hold, including room for the terminator.
pub const LINE_CAPACITY: usize = 256;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7F;

/// A parsed command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'l> {
    Hello,
    Exit,
    Panic,
    Paging,
    FdtNode(&'l str),
    FdtProp(&'l str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError<'l> {
    UndefinedCommand(&'l str),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedCommand(token) => write!(f, "undefined command '{}'", token),
        }
    }
}

impl<'l> Command<'l> {
    /// Parses a line into a command. A blank line parses to `None`.
    ///
    /// Tokens are separated by runs of spaces or control characters. Anything after the
    /// arguments a command takes is ignored.
    pub fn parse(line: &'l str) -> Result<Option<Self>, ParseError<'l>> {
        let mut tokens = line.split(|c: char| c <= ' ').filter(|t| !t.is_empty());
        let Some(command) = tokens.next() else {
            return Ok(None);
        };

        let command = match command {
            "hello" => Self::Hello,
            "exit" => Self::Exit,
            "panic" => Self::Panic,
            "paging" => Self::Paging,
            "fdt" => {
                let sub = tokens.next().unwrap_or("");
                let argument = tokens.next().unwrap_or("");
                match sub {
                    "node" => Self::FdtNode(argument),
                    "prop" => Self::FdtProp(argument),
                    _ => return Err(ParseError::UndefinedCommand(sub)),
                }
            }
            _ => return Err(ParseError::UndefinedCommand(command)),
        };
        Ok(Some(command))
    }
}

/// What the editor did with an input byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    /// The byte was appended and should be echoed.
    Echo(u8),
    /// The last byte was removed.
    Erase,
    /// The line is complete.
    Submit,
    Ignore,
}

/// Accumulates one line of terminal input.
pub struct LineEditor {
    buffer: [u8; LINE_CAPACITY],
    len: usize,
}

impl LineEditor {
    pub const fn new() -> Self {
        Self {
            buffer: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    /// Feeds one byte from the terminal. Only printable ASCII is kept, so the line is
    /// always valid UTF-8.
    pub fn feed(&mut self, byte: u8) -> Edit {
        match byte {
            0 | b'\r' | b'\n' => Edit::Submit,
            BACKSPACE | DELETE => {
                if self.len == 0 {
                    return Edit::Ignore;
                }
                self.len -= 1;
                Edit::Erase
            }
            0x20..=0x7E if self.len < LINE_CAPACITY - 1 => {
                self.buffer[self.len] = byte;
                self.len += 1;
                Edit::Echo(byte)
            }
            _ => Edit::Ignore,
        }
    }

    pub fn line(&self) -> &str {
        core::str::from_utf8(&self.buffer[..self.len]).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

/// What the caller must do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Exit,
    Paging,
    Panic,
}

/// Command interpreter state: the device tree and the node `fdt node` last selected.
pub struct Shell<'t> {
    tree: Option<&'t DeviceTree<'t>>,
    selected: Option<Node<'t, 't>>,
}

impl<'t> Shell<'t> {
    pub fn new(tree: Option<&'t DeviceTree<'t>>) -> Self {
        Self {
            tree,
            selected: None,
        }
    }

    pub fn selected(&self) -> Option<&Node<'t, 't>> {
        self.selected.as_ref()
    }

    /// Runs `line`, writing any response to `out`.
    pub fn execute(&mut self, line: &str, out: &mut impl Write) -> Result<Action, fmt::Error> {
        let command = match Command::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(Action::Continue),
            Err(err) => {
                write!(out, "{}\r\n", err)?;
                return Ok(Action::Continue);
            }
        };

        match command {
            Command::Hello => out.write_str("Hello world!\r\n")?,
            Command::Exit => {
                out.write_str("Stopping kernel...\r\n")?;
                return Ok(Action::Exit);
            }
            Command::Panic => return Ok(Action::Panic),
            Command::Paging => return Ok(Action::Paging),
            Command::FdtNode(path) => self.select_node(path, out)?,
            Command::FdtProp(name) => self.show_property(name, out)?,
        }
        Ok(Action::Continue)
    }

    fn select_node(&mut self, path: &str, out: &mut impl Write) -> fmt::Result {
        let Some(tree) = self.tree else {
            return out.write_str("no device tree available\r\n");
        };

        match tree.find_node(path) {
            Some(node) => {
                let name = node.name();
                let offset = node.offset();
                self.selected = Some(node);
                match offset {
                    Some(offset) => {
                        write!(out, "selected node '{}' (offset {:#x})\r\n", name, offset)
                    }
                    None => write!(out, "selected node '{}'\r\n", name),
                }
            }
            None => write!(out, "failed to select node '{}'\r\n", path),
        }
    }

    fn show_property(&self, name: &str, out: &mut impl Write) -> fmt::Result {
        let Some(node) = &self.selected else {
            return out.write_str("no node selected\r\n");
        };
        let Some(property) = node.property(name) else {
            return write!(out, "failed to select prop '{}'\r\n", name);
        };

        if property.value.is_empty() {
            write!(out, "{}.{}\r\n", node.name(), property.name)
        } else {
            write!(
                out,
                "{}.{} = {}\r\n",
                node.name(),
                property.name,
                property.display_value()
            )
        }
    }
}
