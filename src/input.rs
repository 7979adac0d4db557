use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    ShellLive,
    ShellEnded,
    Logs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Forward(Vec<u8>),
    TogglePause,
    Up,
    Down,
    PageUp,
    PageDown,
    Top,
    Bottom,
    Export,
    Reopen,
    NextContainer,
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    match mode {
        InputMode::ShellLive => map_shell_key(key),
        InputMode::ShellEnded => map_ended_shell_key(key),
        InputMode::Logs => map_logs_key(key),
    }
}

fn is_detach_key(key: KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
}

fn map_shell_key(key: KeyEvent) -> Option<Action> {
    if is_detach_key(key) {
        return Some(Action::Quit);
    }
    if key.modifiers.contains(KeyModifiers::SHIFT) {
        match key.code {
            KeyCode::PageUp => return Some(Action::PageUp),
            KeyCode::PageDown => return Some(Action::PageDown),
            _ => {}
        }
    }
    key_event_to_bytes(key).map(Action::Forward)
}

fn map_ended_shell_key(key: KeyEvent) -> Option<Action> {
    if is_detach_key(key) {
        return Some(Action::Quit);
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => Some(Action::Quit),
        KeyCode::Char('r') => Some(Action::Reopen),
        KeyCode::Char('c') => Some(Action::NextContainer),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::PageDown => Some(Action::PageDown),
        _ => None,
    }
}

fn map_logs_key(key: KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Action::Quit),
            KeyCode::Char('d') => Some(Action::PageDown),
            KeyCode::Char('u') => Some(Action::PageUp),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char(' ') | KeyCode::Char('p') => Some(Action::TogglePause),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::PageDown => Some(Action::PageDown),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Top),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Char('e') => Some(Action::Export),
        KeyCode::Char('r') => Some(Action::Reopen),
        KeyCode::Char('c') => Some(Action::NextContainer),
        _ => None,
    }
}

/// Encodes a key the way an xterm would send it to the remote tty.
pub fn key_event_to_bytes(key: KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Char(ch) => {
            let bytes = if key.modifiers.contains(KeyModifiers::CONTROL) {
                control_byte(ch).map_or_else(|| utf8_bytes(ch), |code| vec![code])
            } else {
                utf8_bytes(ch)
            };
            Some(with_alt_prefix(key.modifiers, bytes))
        }
        KeyCode::Enter => Some(with_alt_prefix(key.modifiers, vec![b'\r'])),
        KeyCode::Tab if key.modifiers.contains(KeyModifiers::SHIFT) => Some(b"\x1b[Z".to_vec()),
        KeyCode::Tab => Some(with_alt_prefix(key.modifiers, vec![b'\t'])),
        KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
        KeyCode::Backspace => Some(with_alt_prefix(key.modifiers, vec![0x7f])),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => Some(csi_key(key.modifiers, 'A')),
        KeyCode::Down => Some(csi_key(key.modifiers, 'B')),
        KeyCode::Right => Some(csi_key(key.modifiers, 'C')),
        KeyCode::Left => Some(csi_key(key.modifiers, 'D')),
        KeyCode::Home => Some(csi_key(key.modifiers, 'H')),
        KeyCode::End => Some(csi_key(key.modifiers, 'F')),
        KeyCode::Insert => Some(tilde_key(key.modifiers, 2)),
        KeyCode::Delete => Some(tilde_key(key.modifiers, 3)),
        KeyCode::PageUp => Some(tilde_key(key.modifiers, 5)),
        KeyCode::PageDown => Some(tilde_key(key.modifiers, 6)),
        KeyCode::F(n @ 1..=4) => Some(format!("\x1bO{}", (b'P' + n - 1) as char).into_bytes()),
        KeyCode::F(n @ 5..=12) => {
            let code = [15, 17, 18, 19, 20, 21, 23, 24][(n - 5) as usize];
            Some(tilde_key(key.modifiers, code))
        }
        _ => None,
    }
}

fn control_byte(ch: char) -> Option<u8> {
    match ch.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        ' ' | '@' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '/' => Some(0x1f),
        _ => None,
    }
}

fn utf8_bytes(ch: char) -> Vec<u8> {
    let mut buffer = [0_u8; 4];
    ch.encode_utf8(&mut buffer).as_bytes().to_vec()
}

fn with_alt_prefix(modifiers: KeyModifiers, bytes: Vec<u8>) -> Vec<u8> {
    if !modifiers.contains(KeyModifiers::ALT) {
        return bytes;
    }
    let mut prefixed = Vec::with_capacity(bytes.len() + 1);
    prefixed.push(0x1b);
    prefixed.extend(bytes);
    prefixed
}

fn modifier_param(modifiers: KeyModifiers) -> Option<u8> {
    let mut value = 1;
    if modifiers.contains(KeyModifiers::SHIFT) {
        value += 1;
    }
    if modifiers.contains(KeyModifiers::ALT) {
        value += 2;
    }
    if modifiers.contains(KeyModifiers::CONTROL) {
        value += 4;
    }
    (value > 1).then_some(value)
}

fn csi_key(modifiers: KeyModifiers, final_byte: char) -> Vec<u8> {
    match modifier_param(modifiers) {
        Some(param) => format!("\x1b[1;{param}{final_byte}").into_bytes(),
        None => format!("\x1b[{final_byte}").into_bytes(),
    }
}

fn tilde_key(modifiers: KeyModifiers, code: u8) -> Vec<u8> {
    match modifier_param(modifiers) {
        Some(param) => format!("\x1b[{code};{param}~").into_bytes(),
        None => format!("\x1b[{code}~").into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, InputMode, key_event_to_bytes, map_key};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn shell_forwards_plain_characters() {
        let action = map_key(
            InputMode::ShellLive,
            key(KeyCode::Char('q'), KeyModifiers::NONE),
        );
        assert_eq!(action, Some(Action::Forward(b"q".to_vec())));
    }

    #[test]
    fn shell_detaches_on_ctrl_bracket() {
        let action = map_key(
            InputMode::ShellLive,
            key(KeyCode::Char(']'), KeyModifiers::CONTROL),
        );
        assert_eq!(action, Some(Action::Quit));
    }

    #[test]
    fn ctrl_c_is_sent_as_interrupt() {
        let bytes = key_event_to_bytes(key(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert_eq!(bytes, Some(vec![0x03]));
    }

    #[test]
    fn alt_prefixes_escape() {
        let bytes = key_event_to_bytes(key(KeyCode::Char('b'), KeyModifiers::ALT));
        assert_eq!(bytes, Some(vec![0x1b, b'b']));
    }

    #[test]
    fn arrows_carry_modifier_params() {
        assert_eq!(
            key_event_to_bytes(key(KeyCode::Up, KeyModifiers::NONE)),
            Some(b"\x1b[A".to_vec())
        );
        assert_eq!(
            key_event_to_bytes(key(KeyCode::Left, KeyModifiers::CONTROL)),
            Some(b"\x1b[1;5D".to_vec())
        );
        assert_eq!(
            key_event_to_bytes(key(KeyCode::Delete, KeyModifiers::NONE)),
            Some(b"\x1b[3~".to_vec())
        );
    }

    #[test]
    fn function_keys_are_encoded() {
        assert_eq!(
            key_event_to_bytes(key(KeyCode::F(1), KeyModifiers::NONE)),
            Some(b"\x1bOP".to_vec())
        );
        assert_eq!(
            key_event_to_bytes(key(KeyCode::F(5), KeyModifiers::NONE)),
            Some(b"\x1b[15~".to_vec())
        );
    }

    #[test]
    fn shift_page_keys_scroll_instead_of_forwarding() {
        assert_eq!(
            map_key(
                InputMode::ShellLive,
                key(KeyCode::PageUp, KeyModifiers::SHIFT)
            ),
            Some(Action::PageUp)
        );
        assert_eq!(
            map_key(
                InputMode::ShellLive,
                key(KeyCode::PageUp, KeyModifiers::NONE)
            ),
            Some(Action::Forward(b"\x1b[5~".to_vec()))
        );
    }

    #[test]
    fn ended_shell_offers_reopen() {
        assert_eq!(
            map_key(
                InputMode::ShellEnded,
                key(KeyCode::Char('r'), KeyModifiers::NONE)
            ),
            Some(Action::Reopen)
        );
        assert_eq!(
            map_key(InputMode::ShellEnded, key(KeyCode::Enter, KeyModifiers::NONE)),
            Some(Action::Quit)
        );
    }

    #[test]
    fn logs_keys_map_to_view_actions() {
        let cases = [
            (KeyCode::Char(' '), Action::TogglePause),
            (KeyCode::Char('e'), Action::Export),
            (KeyCode::Char('G'), Action::Bottom),
            (KeyCode::Char('c'), Action::NextContainer),
            (KeyCode::Esc, Action::Quit),
        ];
        for (code, expected) in cases {
            assert_eq!(
                map_key(InputMode::Logs, key(code, KeyModifiers::NONE)),
                Some(expected)
            );
        }
    }
}
