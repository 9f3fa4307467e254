//! CP437 to Unicode translation.

/// Code page 437 mapped to Unicode, with the control range 0x00-0x1F and
/// 0x7F rendered as their graphic forms the way DOS text mode displays
/// them.
const CP437_TABLE: [char; 256] = [
    ' ', '☺', '☻', '♥', '♦', '♣', '♠', '•', // 0x00
    '◘', '○', '◙', '♂', '♀', '♪', '♫', '☼', // 0x08
    '►', '◄', '↕', '‼', '¶', '§', '▬', '↨', // 0x10
    '↑', '↓', '→', '←', '∟', '↔', '▲', '▼', // 0x18
    ' ', '!', '"', '#', '$', '%', '&', '\'', // 0x20
    '(', ')', '*', '+', ',', '-', '.', '/', // 0x28
    '0', '1', '2', '3', '4', '5', '6', '7', // 0x30
    '8', '9', ':', ';', '<', '=', '>', '?', // 0x38
    '@', 'A', 'B', 'C', 'D', 'E', 'F', 'G', // 0x40
    'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', // 0x48
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', // 0x50
    'X', 'Y', 'Z', '[', '\\', ']', '^', '_', // 0x58
    '`', 'a', 'b', 'c', 'd', 'e', 'f', 'g', // 0x60
    'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', // 0x68
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', // 0x70
    'x', 'y', 'z', '{', '|', '}', '~', '⌂', // 0x78
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', // 0x80
    'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', // 0x88
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', // 0x90
    'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', // 0x98
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', // 0xA0
    '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', // 0xA8
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', // 0xB0
    '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', // 0xB8
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', // 0xC0
    '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', // 0xC8
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', // 0xD0
    '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', // 0xD8
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', // 0xE0
    'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', // 0xE8
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', // 0xF0
    '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00A0}', // 0xF8
];

/// Translate a raw glyph byte from the text plane into its Unicode form.
pub fn glyph_to_char(glyph: u8) -> char {
    CP437_TABLE[glyph as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_range_is_identity() {
        for byte in 0x20..0x7f_u8 {
            assert_eq!(glyph_to_char(byte), byte as char);
        }
    }

    #[test]
    fn control_bytes_use_graphic_forms() {
        assert_eq!(glyph_to_char(0x12), '↕');
        assert_eq!(glyph_to_char(0x1e), '▲');
        assert_eq!(glyph_to_char(0x7f), '⌂');
    }

    #[test]
    fn high_half_follows_the_code_page() {
        assert_eq!(glyph_to_char(0xb0), '░');
        assert_eq!(glyph_to_char(0xcd), '═');
        assert_eq!(glyph_to_char(0xe1), 'ß');
        assert_eq!(glyph_to_char(0xff), '\u{00A0}');
    }
}
