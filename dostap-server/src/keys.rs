//! Key identifiers, the name table, and display-name canonicalization.

/// Internal key ids submitted to the emulator's keyboard bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyCode {
    Esc,
    Tab,
    Backspace,
    Enter,
    Space,
    LeftAlt,
    RightAlt,
    LeftCtrl,
    RightCtrl,
    LeftShift,
    RightShift,
    LeftGui,
    RightGui,
    CapsLock,
    NumLock,
    ScrollLock,
    Grave,
    Minus,
    Equals,
    Backslash,
    LeftBracket,
    RightBracket,
    Semicolon,
    Quote,
    Oem102,
    Period,
    Comma,
    Slash,
    Abnt1,
    PrintScreen,
    Pause,
    Insert,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Left,
    Up,
    Down,
    Right,
    Kp0,
    Kp1,
    Kp2,
    Kp3,
    Kp4,
    Kp5,
    Kp6,
    Kp7,
    Kp8,
    Kp9,
    KpDivide,
    KpMultiply,
    KpMinus,
    KpPlus,
    KpEnter,
    KpPeriod,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
}

/// Named key aliases. Tokens are matched case-sensitively; several aliases
/// can map onto the same key id.
const NAMED_KEYS: &[(&str, KeyCode)] = &[
    ("Esc", KeyCode::Esc),
    ("Escape", KeyCode::Esc),
    ("Tab", KeyCode::Tab),
    ("Backspace", KeyCode::Backspace),
    ("Bksp", KeyCode::Backspace),
    ("Enter", KeyCode::Enter),
    ("Return", KeyCode::Enter),
    ("Space", KeyCode::Space),
    ("Spacebar", KeyCode::Space),
    ("LeftAlt", KeyCode::LeftAlt),
    ("Alt", KeyCode::LeftAlt),
    ("RightAlt", KeyCode::RightAlt),
    ("LeftCtrl", KeyCode::LeftCtrl),
    ("Ctrl", KeyCode::LeftCtrl),
    ("Control", KeyCode::LeftCtrl),
    ("RightCtrl", KeyCode::RightCtrl),
    ("LeftShift", KeyCode::LeftShift),
    ("Shift", KeyCode::LeftShift),
    ("RightShift", KeyCode::RightShift),
    ("LeftGui", KeyCode::LeftGui),
    ("Gui", KeyCode::LeftGui),
    ("Win", KeyCode::LeftGui),
    ("Windows", KeyCode::LeftGui),
    ("RightGui", KeyCode::RightGui),
    ("CapsLock", KeyCode::CapsLock),
    ("NumLock", KeyCode::NumLock),
    ("ScrollLock", KeyCode::ScrollLock),
    ("Grave", KeyCode::Grave),
    ("Backquote", KeyCode::Grave),
    ("Backtick", KeyCode::Grave),
    ("Minus", KeyCode::Minus),
    ("Hyphen", KeyCode::Minus),
    ("Equals", KeyCode::Equals),
    ("Plus", KeyCode::Equals),
    ("Backslash", KeyCode::Backslash),
    ("LeftBracket", KeyCode::LeftBracket),
    ("LBracket", KeyCode::LeftBracket),
    ("OpenBracket", KeyCode::LeftBracket),
    ("RightBracket", KeyCode::RightBracket),
    ("RBracket", KeyCode::RightBracket),
    ("CloseBracket", KeyCode::RightBracket),
    ("Semicolon", KeyCode::Semicolon),
    ("Colon", KeyCode::Semicolon),
    ("Apostrophe", KeyCode::Quote),
    ("Quote", KeyCode::Quote),
    ("Oem102", KeyCode::Oem102),
    ("LessGreater", KeyCode::Oem102),
    ("Period", KeyCode::Period),
    ("Dot", KeyCode::Period),
    ("Comma", KeyCode::Comma),
    ("Slash", KeyCode::Slash),
    ("ForwardSlash", KeyCode::Slash),
    ("Abnt1", KeyCode::Abnt1),
    ("PrintScreen", KeyCode::PrintScreen),
    ("PrtSc", KeyCode::PrintScreen),
    ("SysRq", KeyCode::PrintScreen),
    ("Pause", KeyCode::Pause),
    ("Break", KeyCode::Pause),
    ("Insert", KeyCode::Insert),
    ("Ins", KeyCode::Insert),
    ("Delete", KeyCode::Delete),
    ("Del", KeyCode::Delete),
    ("Home", KeyCode::Home),
    ("End", KeyCode::End),
    ("PageUp", KeyCode::PageUp),
    ("PgUp", KeyCode::PageUp),
    ("PageDown", KeyCode::PageDown),
    ("PgDn", KeyCode::PageDown),
    ("Left", KeyCode::Left),
    ("LeftArrow", KeyCode::Left),
    ("Up", KeyCode::Up),
    ("UpArrow", KeyCode::Up),
    ("Down", KeyCode::Down),
    ("DownArrow", KeyCode::Down),
    ("Right", KeyCode::Right),
    ("RightArrow", KeyCode::Right),
    ("Numpad0", KeyCode::Kp0),
    ("Numpad1", KeyCode::Kp1),
    ("Numpad2", KeyCode::Kp2),
    ("Numpad3", KeyCode::Kp3),
    ("Numpad4", KeyCode::Kp4),
    ("Numpad5", KeyCode::Kp5),
    ("Numpad6", KeyCode::Kp6),
    ("Numpad7", KeyCode::Kp7),
    ("Numpad8", KeyCode::Kp8),
    ("Numpad9", KeyCode::Kp9),
    ("NumpadDivide", KeyCode::KpDivide),
    ("NumpadMultiply", KeyCode::KpMultiply),
    ("NumpadMinus", KeyCode::KpMinus),
    ("NumpadPlus", KeyCode::KpPlus),
    ("NumpadEnter", KeyCode::KpEnter),
    ("NumpadPeriod", KeyCode::KpPeriod),
    ("NumpadDecimal", KeyCode::KpPeriod),
];

const LETTERS: [KeyCode; 26] = [
    KeyCode::A,
    KeyCode::B,
    KeyCode::C,
    KeyCode::D,
    KeyCode::E,
    KeyCode::F,
    KeyCode::G,
    KeyCode::H,
    KeyCode::I,
    KeyCode::J,
    KeyCode::K,
    KeyCode::L,
    KeyCode::M,
    KeyCode::N,
    KeyCode::O,
    KeyCode::P,
    KeyCode::Q,
    KeyCode::R,
    KeyCode::S,
    KeyCode::T,
    KeyCode::U,
    KeyCode::V,
    KeyCode::W,
    KeyCode::X,
    KeyCode::Y,
    KeyCode::Z,
];

const DIGITS: [KeyCode; 10] = [
    KeyCode::Digit0,
    KeyCode::Digit1,
    KeyCode::Digit2,
    KeyCode::Digit3,
    KeyCode::Digit4,
    KeyCode::Digit5,
    KeyCode::Digit6,
    KeyCode::Digit7,
    KeyCode::Digit8,
    KeyCode::Digit9,
];

const FUNCTION_KEYS: [KeyCode; 12] = [
    KeyCode::F1,
    KeyCode::F2,
    KeyCode::F3,
    KeyCode::F4,
    KeyCode::F5,
    KeyCode::F6,
    KeyCode::F7,
    KeyCode::F8,
    KeyCode::F9,
    KeyCode::F10,
    KeyCode::F11,
    KeyCode::F12,
];

fn parse_single_char(ch: char) -> Option<KeyCode> {
    match ch {
        'A'..='Z' => Some(LETTERS[(ch as u8 - b'A') as usize]),
        '0'..='9' => Some(DIGITS[(ch as u8 - b'0') as usize]),
        _ => None,
    }
}

fn parse_function_key(name: &str) -> Option<KeyCode> {
    let digits = name.strip_prefix('F')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: usize = digits.parse().ok()?;
    if (1..=12).contains(&value) {
        Some(FUNCTION_KEYS[value - 1])
    } else {
        None
    }
}

/// Resolve a key token to its internal id. Matching is case-sensitive.
pub fn parse_key_name(name: &str) -> Option<KeyCode> {
    if name.is_empty() {
        return None;
    }
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return parse_single_char(ch);
    }
    if let Some(key) = parse_function_key(name) {
        return Some(key);
    }
    NAMED_KEYS
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, key)| *key)
}

/// Find the canonical spelling for a token that only matches the key table
/// under case folding, used to phrase "did you mean" warnings.
pub fn canonical_spelling(name: &str) -> Option<&'static str> {
    NAMED_KEYS
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(alias, _)| *alias)
}

/// Canonical display name for a held key, as reported in `keys_down`.
/// Left/right modifier variants collapse onto the bare modifier name and
/// everything else is title-cased.
pub fn display_name(token: &str) -> String {
    let upper = token.to_ascii_uppercase();
    match upper.as_str() {
        "SHIFT" | "LSHIFT" | "RSHIFT" | "LEFTSHIFT" | "RIGHTSHIFT" => {
            return "Shift".to_string();
        },
        "CTRL" | "LCTRL" | "RCTRL" | "CONTROL" | "LEFTCTRL" | "RIGHTCTRL" => {
            return "Ctrl".to_string();
        },
        "ALT" | "LALT" | "RALT" | "LEFTALT" | "RIGHTALT" => {
            return "Alt".to_string();
        },
        "CAPS" | "CAPSLOCK" => return "CapsLock".to_string(),
        _ => {},
    }
    if let Some(rest) = upper.strip_prefix("NUMPAD") {
        return format!("NumPad{}", rest.to_ascii_lowercase());
    }
    if let Some(rest) = upper.strip_prefix("KP") {
        return format!("NumPad{}", rest.to_ascii_lowercase());
    }
    if upper.len() > 1 {
        if let Some(digits) = upper.strip_prefix('F') {
            if digits.bytes().all(|b| b.is_ascii_digit()) {
                return format!("F{digits}");
            }
        }
    }
    if upper.len() == 1 {
        return upper;
    }

    title_case(&upper)
}

fn title_case(upper: &str) -> String {
    let mut result = String::with_capacity(upper.len());
    let mut new_word = true;
    for ch in upper.chars() {
        if !ch.is_ascii_alphanumeric() {
            result.push(ch);
            new_word = true;
            continue;
        }
        if new_word {
            result.push(ch.to_ascii_uppercase());
            new_word = false;
        } else {
            result.push(ch.to_ascii_lowercase());
        }
        if ch.is_ascii_digit() {
            new_word = true;
        }
    }
    result
}

/// How one printable character types: the key token to press, plus whether
/// the press is wrapped in Shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharKey {
    pub key: &'static str,
    pub shifted: bool,
}

const LETTER_NAMES: [&str; 26] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N",
    "O", "P", "Q", "R", "S", "T", "U", "V", "W", "X", "Y", "Z",
];

const DIGIT_NAMES: [&str; 10] =
    ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

/// Map a printable character to the key that produces it on a US layout.
pub fn char_to_key(ch: char) -> Option<CharKey> {
    let (key, shifted) = match ch {
        'a'..='z' => (LETTER_NAMES[(ch as u8 - b'a') as usize], false),
        'A'..='Z' => (LETTER_NAMES[(ch as u8 - b'A') as usize], true),
        '0'..='9' => (DIGIT_NAMES[(ch as u8 - b'0') as usize], false),
        ' ' => ("Space", false),
        '\n' => ("Enter", false),
        '\t' => ("Tab", false),
        '!' => ("1", true),
        '@' => ("2", true),
        '#' => ("3", true),
        '$' => ("4", true),
        '%' => ("5", true),
        '^' => ("6", true),
        '&' => ("7", true),
        '*' => ("8", true),
        '(' => ("9", true),
        ')' => ("0", true),
        '-' => ("Minus", false),
        '_' => ("Minus", true),
        '=' => ("Equals", false),
        '+' => ("Equals", true),
        '[' => ("LeftBracket", false),
        '{' => ("LeftBracket", true),
        ']' => ("RightBracket", false),
        '}' => ("RightBracket", true),
        '\\' => ("Backslash", false),
        '|' => ("Backslash", true),
        ';' => ("Semicolon", false),
        ':' => ("Semicolon", true),
        '\'' => ("Quote", false),
        '"' => ("Quote", true),
        ',' => ("Comma", false),
        '<' => ("Comma", true),
        '.' => ("Period", false),
        '>' => ("Period", true),
        '/' => ("Slash", false),
        '?' => ("Slash", true),
        '`' => ("Grave", false),
        '~' => ("Grave", true),
        _ => return None,
    };
    Some(CharKey { key, shifted })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_aliases_share_ids() {
        assert_eq!(parse_key_name("Shift"), Some(KeyCode::LeftShift));
        assert_eq!(parse_key_name("LeftShift"), Some(KeyCode::LeftShift));
        assert_eq!(parse_key_name("Return"), Some(KeyCode::Enter));
        assert_eq!(parse_key_name("Enter"), Some(KeyCode::Enter));
        assert_eq!(parse_key_name("NumpadDecimal"), Some(KeyCode::KpPeriod));
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert_eq!(parse_key_name("shift"), None);
        assert_eq!(parse_key_name("SHIFT"), None);
        assert_eq!(parse_key_name("a"), None);
        assert_eq!(parse_key_name("A"), Some(KeyCode::A));
    }

    #[test]
    fn single_characters_parse() {
        assert_eq!(parse_key_name("Z"), Some(KeyCode::Z));
        assert_eq!(parse_key_name("0"), Some(KeyCode::Digit0));
        assert_eq!(parse_key_name("7"), Some(KeyCode::Digit7));
        assert_eq!(parse_key_name("?"), None);
    }

    #[test]
    fn function_keys_have_bounds() {
        assert_eq!(parse_key_name("F1"), Some(KeyCode::F1));
        assert_eq!(parse_key_name("F12"), Some(KeyCode::F12));
        assert_eq!(parse_key_name("F0"), None);
        assert_eq!(parse_key_name("F13"), None);
        assert_eq!(parse_key_name("Fx"), None);
    }

    #[test]
    fn canonical_spelling_recovers_aliases() {
        assert_eq!(canonical_spelling("shift"), Some("Shift"));
        assert_eq!(canonical_spelling("PAGEUP"), Some("PageUp"));
        assert_eq!(canonical_spelling("bogus"), None);
    }

    #[test]
    fn display_names_canonicalize_modifiers() {
        assert_eq!(display_name("LeftCtrl"), "Ctrl");
        assert_eq!(display_name("LSHIFT"), "Shift");
        assert_eq!(display_name("RightAlt"), "Alt");
        assert_eq!(display_name("capslock"), "CapsLock");
    }

    #[test]
    fn display_names_normalize_numpad_and_function_keys() {
        assert_eq!(display_name("Numpad7"), "NumPad7");
        assert_eq!(display_name("KP7"), "NumPad7");
        assert_eq!(display_name("NumpadEnter"), "NumPadenter");
        assert_eq!(display_name("f3"), "F3");
    }

    #[test]
    fn display_names_title_case_everything_else() {
        assert_eq!(display_name("PageUp"), "Pageup");
        assert_eq!(display_name("a"), "A");
        assert_eq!(display_name("enter"), "Enter");
    }

    #[test]
    fn characters_map_to_keys_with_shift_pairing() {
        assert_eq!(
            char_to_key('p'),
            Some(CharKey { key: "P", shifted: false })
        );
        assert_eq!(
            char_to_key('P'),
            Some(CharKey { key: "P", shifted: true })
        );
        assert_eq!(
            char_to_key('!'),
            Some(CharKey { key: "1", shifted: true })
        );
        assert_eq!(
            char_to_key(':'),
            Some(CharKey { key: "Semicolon", shifted: true })
        );
        assert_eq!(
            char_to_key('5'),
            Some(CharKey { key: "5", shifted: false })
        );
        assert_eq!(char_to_key('é'), None);
    }
}
