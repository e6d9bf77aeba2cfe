// PS/2 keyboard decoding into the keys terminals understand
use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, KeyState, Keyboard, ScancodeSet1};

/// A key press the kernel acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(u8),
    Enter,
    Backspace,
    /// Alt+F1..F3
    SwitchTerminal(usize),
}

pub struct KeyboardDecoder {
    keyboard: Keyboard<layouts::Us104Key, ScancodeSet1>,
    alt_held: bool,
}

impl KeyboardDecoder {
    pub fn new() -> Self {
        KeyboardDecoder {
            keyboard: Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore),
            alt_held: false,
        }
    }

    /// Feed one raw scancode byte.
    pub fn add_scancode(&mut self, scancode: u8) -> Option<Key> {
        let event = self.keyboard.add_byte(scancode).ok()??;

        match (event.code, event.state) {
            (KeyCode::LAlt | KeyCode::RAltGr, KeyState::Down) => self.alt_held = true,
            (KeyCode::LAlt | KeyCode::RAltGr, KeyState::Up) => self.alt_held = false,
            (KeyCode::F1, KeyState::Down) if self.alt_held => return Some(Key::SwitchTerminal(0)),
            (KeyCode::F2, KeyState::Down) if self.alt_held => return Some(Key::SwitchTerminal(1)),
            (KeyCode::F3, KeyState::Down) if self.alt_held => return Some(Key::SwitchTerminal(2)),
            _ => {}
        }

        match self.keyboard.process_keyevent(event)? {
            DecodedKey::Unicode('\n') => Some(Key::Enter),
            DecodedKey::Unicode('\u{8}') => Some(Key::Backspace),
            DecodedKey::Unicode(character) if character.is_ascii() && !character.is_ascii_control() => {
                Some(Key::Char(character as u8))
            }
            _ => None,
        }
    }
}

impl Default for KeyboardDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut KeyboardDecoder, codes: &[u8]) -> Vec<Key> {
        codes.iter().filter_map(|&c| decoder.add_scancode(c)).collect()
    }

    #[test]
    fn decodes_printable_keys_and_line_editing() {
        let mut decoder = KeyboardDecoder::new();
        // 'a' down/up, Backspace down/up, Enter down/up
        let keys = feed(&mut decoder, &[0x1E, 0x9E, 0x0E, 0x8E, 0x1C, 0x9C]);
        assert_eq!(keys, vec![Key::Char(b'a'), Key::Backspace, Key::Enter]);
    }

    #[test]
    fn alt_function_keys_switch_terminals() {
        let mut decoder = KeyboardDecoder::new();
        // LAlt down, F2 down/up, F3 down/up, LAlt up, F1 down/up
        let keys = feed(
            &mut decoder,
            &[0x38, 0x3C, 0xBC, 0x3D, 0xBD, 0xB8, 0x3B, 0xBB],
        );
        assert_eq!(keys, vec![Key::SwitchTerminal(1), Key::SwitchTerminal(2)]);
    }
}
