// VGA text terminals: one visible screen, per-terminal shadow pages and line input
use crate::keyboard::Key;
use core::fmt;
use volatile::Volatile;
use x86_64::PhysAddr;

pub const BUFFER_HEIGHT: usize = 25;
pub const BUFFER_WIDTH: usize = 80;
pub const TERMINALS: usize = 3;
/// Line buffer size, newline included
pub const LINE_CAPACITY: usize = 128;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ColorCode(u8);

impl ColorCode {
    pub const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode((background as u8) << 4 | (foreground as u8))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

/// One screen worth of text cells, laid out like the VGA text buffer.
#[repr(transparent)]
pub struct Buffer {
    chars: [[Volatile<ScreenChar>; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

const DEFAULT_COLOR: ColorCode = ColorCode::new(Color::LightGray, Color::Black);

const BLANK: ScreenChar = ScreenChar {
    ascii_character: b' ',
    color_code: DEFAULT_COLOR,
};

impl Buffer {
    pub fn blank() -> Self {
        Buffer {
            chars: core::array::from_fn(|_| core::array::from_fn(|_| Volatile::new(BLANK))),
        }
    }

    pub fn clear(&mut self) {
        for row in self.chars.iter_mut() {
            for cell in row.iter_mut() {
                cell.write(BLANK);
            }
        }
    }

    fn copy_from(&mut self, other: &Buffer) {
        for (dst, src) in self.chars.iter_mut().zip(other.chars.iter()) {
            for (cell, value) in dst.iter_mut().zip(src.iter()) {
                cell.write(value.read());
            }
        }
    }

    pub fn char_at(&self, row: usize, col: usize) -> u8 {
        self.chars[row][col].read().ascii_character
    }
}

/// The real VGA text buffer.
///
/// # Safety
/// Must only be called once per owner; the buffer is identity mapped by the
/// bootloader.
pub unsafe fn vga_buffer() -> &'static mut Buffer {
    &mut *(crate::memory::VGA_PHYS as *mut Buffer)
}

/// Where the next character lands on a screen.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    row: usize,
    column: usize,
    color_code: ColorCode,
}

impl Cursor {
    pub const fn new(color_code: ColorCode) -> Self {
        Cursor {
            row: 0,
            column: 0,
            color_code,
        }
    }

    pub fn position(&self) -> (usize, usize) {
        (self.row, self.column)
    }

    pub fn write_byte(&mut self, buffer: &mut Buffer, byte: u8) {
        match byte {
            b'\n' => self.new_line(buffer),
            0x08 => self.erase(buffer),
            byte => {
                if self.column >= BUFFER_WIDTH {
                    self.new_line(buffer);
                }
                let ascii_character = match byte {
                    0x20..=0x7e => byte,
                    _ => 0xfe,
                };
                buffer.chars[self.row][self.column].write(ScreenChar {
                    ascii_character,
                    color_code: self.color_code,
                });
                self.column += 1;
            }
        }
    }

    pub fn write_bytes(&mut self, buffer: &mut Buffer, bytes: &[u8]) {
        for &byte in bytes {
            self.write_byte(buffer, byte);
        }
    }

    fn erase(&mut self, buffer: &mut Buffer) {
        if self.column > 0 {
            self.column -= 1;
        } else if self.row > 0 {
            self.row -= 1;
            self.column = BUFFER_WIDTH - 1;
        } else {
            return;
        }
        buffer.chars[self.row][self.column].write(BLANK);
    }

    fn new_line(&mut self, buffer: &mut Buffer) {
        self.column = 0;
        if self.row < BUFFER_HEIGHT - 1 {
            self.row += 1;
            return;
        }
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                let character = buffer.chars[row][col].read();
                buffer.chars[row - 1][col].write(character);
            }
        }
        for col in 0..BUFFER_WIDTH {
            buffer.chars[BUFFER_HEIGHT - 1][col].write(BLANK);
        }
    }
}

/// `fmt::Write` adapter over a cursor and the buffer it draws into.
pub struct ScreenWriter<'a> {
    cursor: &'a mut Cursor,
    buffer: &'a mut Buffer,
}

impl<'a> ScreenWriter<'a> {
    pub fn new(cursor: &'a mut Cursor, buffer: &'a mut Buffer) -> Self {
        ScreenWriter { cursor, buffer }
    }
}

impl fmt::Write for ScreenWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.cursor.write_bytes(self.buffer, s.as_bytes());
        Ok(())
    }
}

/// Keyboard input collected until Enter completes the line.
pub struct LineBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
    complete: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        LineBuffer {
            bytes: [0; LINE_CAPACITY],
            len: 0,
            complete: false,
        }
    }

    /// Append a character, keeping the last slot for the newline.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.complete || self.len >= LINE_CAPACITY - 1 {
            return false;
        }
        self.bytes[self.len] = byte;
        self.len += 1;
        true
    }

    pub fn pop(&mut self) -> bool {
        if self.complete || self.len == 0 {
            return false;
        }
        self.len -= 1;
        true
    }

    pub fn finish(&mut self) -> bool {
        if self.complete {
            return false;
        }
        self.bytes[self.len] = b'\n';
        self.len += 1;
        self.complete = true;
        true
    }

    /// Hand out the completed line. Bytes beyond `buf` are dropped; an empty
    /// `buf` leaves the line in place.
    pub fn take(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.complete {
            return None;
        }
        if buf.is_empty() {
            return Some(0);
        }
        let count = self.len.min(buf.len());
        buf[..count].copy_from_slice(&self.bytes[..count]);
        self.len = 0;
        self.complete = false;
        Some(count)
    }
}

pub struct Terminal {
    shadow: &'static mut Buffer,
    shadow_phys: PhysAddr,
    cursor: Cursor,
    line: LineBuffer,
}

impl Terminal {
    fn new(shadow: &'static mut Buffer, shadow_phys: PhysAddr) -> Self {
        Terminal {
            shadow,
            shadow_phys,
            cursor: Cursor::new(DEFAULT_COLOR),
            line: LineBuffer::new(),
        }
    }
}

/// All terminals plus the real screen showing the foreground one.
pub struct Terminals {
    real: &'static mut Buffer,
    terminals: [Terminal; TERMINALS],
    foreground: usize,
}

impl Terminals {
    /// `shadows` pairs each terminal's off-screen page with its physical address.
    pub fn new(real: &'static mut Buffer, shadows: [(&'static mut Buffer, PhysAddr); TERMINALS]) -> Self {
        Terminals {
            real,
            terminals: shadows.map(|(buffer, phys)| Terminal::new(buffer, phys)),
            foreground: 0,
        }
    }

    pub fn foreground(&self) -> usize {
        self.foreground
    }

    /// Physical page a process on `terminal` should see at its video window.
    pub fn video_source(&self, terminal: usize) -> PhysAddr {
        if terminal == self.foreground {
            PhysAddr::new(crate::memory::VGA_PHYS)
        } else {
            self.terminals[terminal].shadow_phys
        }
    }

    /// The buffer currently holding `terminal`'s text.
    pub fn screen(&self, terminal: usize) -> &Buffer {
        if terminal == self.foreground {
            &*self.real
        } else {
            &*self.terminals[terminal].shadow
        }
    }

    pub fn writer(&mut self, terminal: usize) -> ScreenWriter<'_> {
        let Terminals {
            real,
            terminals,
            foreground,
        } = self;
        let term = &mut terminals[terminal];
        let buffer: &mut Buffer = if terminal == *foreground {
            &mut **real
        } else {
            &mut *term.shadow
        };
        ScreenWriter::new(&mut term.cursor, buffer)
    }

    pub fn write(&mut self, terminal: usize, bytes: &[u8]) {
        let ScreenWriter { cursor, buffer } = self.writer(terminal);
        cursor.write_bytes(buffer, bytes);
    }

    /// Feed one decoded key to the foreground terminal, echoing it.
    pub fn input(&mut self, key: Key) {
        let fg = self.foreground;
        let line = &mut self.terminals[fg].line;
        let echo = match key {
            Key::Char(byte) => line.push(byte).then_some(byte),
            Key::Backspace => line.pop().then_some(0x08),
            Key::Enter => line.finish().then_some(b'\n'),
            Key::SwitchTerminal(_) => None,
        };
        if let Some(byte) = echo {
            self.write(fg, &[byte]);
        }
    }

    /// Completed input line of `terminal`, if the user has pressed Enter.
    pub fn read_line(&mut self, terminal: usize, buf: &mut [u8]) -> Option<usize> {
        self.terminals[terminal].line.take(buf)
    }

    /// Bring `terminal` to the screen. Returns false if nothing changed.
    pub fn set_foreground(&mut self, terminal: usize) -> bool {
        if terminal >= TERMINALS || terminal == self.foreground {
            return false;
        }
        let old = self.foreground;
        self.terminals[old].shadow.copy_from(&*self.real);
        self.real.copy_from(&*self.terminals[terminal].shadow);
        self.foreground = terminal;
        true
    }
}

#[cfg(test)]
pub fn test_terminals() -> Terminals {
    let leak = || -> &'static mut Buffer { Box::leak(Box::new(Buffer::blank())) };
    Terminals::new(
        leak(),
        [
            (leak(), PhysAddr::new(0x20_0000)),
            (leak(), PhysAddr::new(0x20_1000)),
            (leak(), PhysAddr::new(0x20_2000)),
        ],
    )
}

#[cfg(test)]
pub fn row_text(buffer: &Buffer, row: usize) -> String {
    let text: String = (0..BUFFER_WIDTH)
        .map(|col| buffer.char_at(row, col) as char)
        .collect();
    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_land_on_the_visible_screen_only_for_the_foreground() {
        let mut terminals = test_terminals();
        terminals.write(0, b"front");
        terminals.write(2, b"back");

        assert_eq!(row_text(terminals.screen(0), 0), "front");
        assert_eq!(row_text(terminals.screen(2), 0), "back");
        assert_eq!(terminals.video_source(0).as_u64(), 0xb8000);
        assert_eq!(terminals.video_source(2).as_u64(), 0x20_2000);
    }

    #[test]
    fn switching_swaps_screen_contents() {
        let mut terminals = test_terminals();
        terminals.write(0, b"zero");
        terminals.write(1, b"one");

        assert!(terminals.set_foreground(1));
        assert_eq!(row_text(terminals.screen(1), 0), "one");
        assert_eq!(row_text(terminals.screen(0), 0), "zero");
        assert_eq!(terminals.video_source(0).as_u64(), 0x20_0000);

        assert!(!terminals.set_foreground(1));
        assert!(!terminals.set_foreground(TERMINALS));
    }

    #[test]
    fn lines_complete_on_enter_and_support_backspace() {
        let mut terminals = test_terminals();
        for &b in b"lx" {
            terminals.input(Key::Char(b));
        }
        terminals.input(Key::Backspace);
        terminals.input(Key::Char(b's'));

        let mut buf = [0u8; 16];
        assert_eq!(terminals.read_line(0, &mut buf), None);

        terminals.input(Key::Enter);
        assert_eq!(row_text(terminals.screen(0), 0), "ls");
        assert_eq!(terminals.read_line(0, &mut buf), Some(3));
        assert_eq!(&buf[..3], b"ls\n");
        assert_eq!(terminals.read_line(0, &mut buf), None);
    }

    #[test]
    fn line_buffer_keeps_room_for_the_newline() {
        let mut line = LineBuffer::new();
        for _ in 0..LINE_CAPACITY - 1 {
            assert!(line.push(b'a'));
        }
        assert!(!line.push(b'a'));
        assert!(line.finish());

        let mut buf = [0u8; LINE_CAPACITY];
        assert_eq!(line.take(&mut buf), Some(LINE_CAPACITY));
        assert_eq!(buf[LINE_CAPACITY - 1], b'\n');
    }

    #[test]
    fn short_reads_drop_the_rest_of_the_line() {
        let mut line = LineBuffer::new();
        for &b in b"hello" {
            line.push(b);
        }
        line.finish();
        let mut buf = [0u8; 2];
        assert_eq!(line.take(&mut buf), Some(2));
        assert_eq!(line.take(&mut buf), None);
    }

    #[test]
    fn an_empty_read_leaves_the_line_pending() {
        let mut terminals = test_terminals();
        for key in [Key::Char(b'l'), Key::Char(b's'), Key::Enter] {
            terminals.input(key);
        }
        assert_eq!(terminals.read_line(0, &mut []), Some(0));

        let mut buf = [0u8; 8];
        assert_eq!(terminals.read_line(0, &mut buf), Some(3));
        assert_eq!(&buf[..3], b"ls\n");
    }

    #[test]
    fn screen_scrolls_at_the_bottom() {
        let mut buffer = Buffer::blank();
        let mut cursor = Cursor::new(DEFAULT_COLOR);
        for row in 0..BUFFER_HEIGHT {
            cursor.write_bytes(&mut buffer, format!("line {}\n", row).as_bytes());
        }
        assert_eq!(row_text(&buffer, 0), "line 1");
        assert_eq!(row_text(&buffer, BUFFER_HEIGHT - 2), "line 24");
        assert_eq!(cursor.position(), (BUFFER_HEIGHT - 1, 0));
    }

    #[test]
    fn clearing_blanks_every_cell() {
        let mut buffer = Buffer::blank();
        let mut cursor = Cursor::new(DEFAULT_COLOR);
        cursor.write_bytes(&mut buffer, b"junk");
        buffer.clear();
        assert_eq!(row_text(&buffer, 0), "");
    }

    #[test]
    fn backspace_erases_the_previous_cell() {
        let mut buffer = Buffer::blank();
        let mut cursor = Cursor::new(DEFAULT_COLOR);
        cursor.write_bytes(&mut buffer, b"ab\x08");
        assert_eq!(row_text(&buffer, 0), "a");
        assert_eq!(cursor.position(), (0, 1));
    }
}
