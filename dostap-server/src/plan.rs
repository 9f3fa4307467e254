//! The TYPE macro planner: lexes the argument string and emits an ordered
//! plan of key events and delays.

use crate::keys::{canonical_spelling, char_to_key, parse_key_name};

/// One step of a TYPE macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAction {
    /// Tap a key: down followed by up.
    Press(String),
    /// Hold a key down.
    Down(String),
    /// Release a held key.
    Up(String),
    /// Pause for a wall-clock duration in milliseconds.
    DelayMs(u64),
    /// Pause for a number of presentation frames.
    DelayFrames(u32),
}

impl TypeAction {
    pub fn is_delay(&self) -> bool {
        matches!(self, TypeAction::DelayMs(_) | TypeAction::DelayFrames(_))
    }
}

/// An ordered plan produced from one TYPE argument string.
///
/// `request_frame` asks for a frame snapshot to be sent once the plan has
/// finished executing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeCommandPlan {
    pub actions: Vec<TypeAction>,
    pub request_frame: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum TokenKind {
    Word,
    Quoted,
}

struct Token {
    kind: TokenKind,
    text: String,
}

/// Split the argument string on whitespace, treating double-quoted spans as
/// single tokens. Inside quotes `\"`, `\\` and `\n` unescape.
fn tokenize(argument: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = argument.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch == '"' {
            chars.next();
            let mut text = String::new();
            let mut terminated = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        terminated = true;
                        break;
                    },
                    '\\' => match chars.next() {
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        Some('n') => text.push('\n'),
                        Some(other) => {
                            text.push('\\');
                            text.push(other);
                        },
                        None => text.push('\\'),
                    },
                    other => text.push(other),
                }
            }
            if !terminated {
                log::warn!("unterminated string in TYPE arguments");
            }
            tokens.push(Token {
                kind: TokenKind::Quoted,
                text,
            });
            continue;
        }

        let mut text = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            text.push(c);
            chars.next();
        }
        tokens.push(Token {
            kind: TokenKind::Word,
            text,
        });
    }

    tokens
}

/// Try to consume a word as a delay token (`<digits>ms`,
/// `<digits>frame[s]`). Returns true when the word was delay-shaped, even
/// if it only warned.
fn plan_delay(word: &str, actions: &mut Vec<TypeAction>) -> bool {
    if let Some(prefix) = word.strip_suffix("ms") {
        if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
            match prefix.parse::<u64>() {
                Ok(0) | Err(_) => {
                    log::warn!("ignoring TYPE delay {word:?}, expected <digits>ms");
                },
                Ok(value) => actions.push(TypeAction::DelayMs(value)),
            }
            return true;
        }
    }

    if let Some(prefix) = word
        .strip_suffix("frames")
        .or_else(|| word.strip_suffix("frame"))
    {
        if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
            match prefix.parse::<u32>() {
                Ok(value) => actions.push(TypeAction::DelayFrames(value)),
                Err(_) => {
                    log::warn!(
                        "ignoring TYPE delay {word:?}, expected <digits>frames"
                    );
                },
            }
            return true;
        }
    }

    // Delay-shaped under case folding only: warn with the expected spelling.
    let lower = word.to_ascii_lowercase();
    if lower != word {
        if let Some(prefix) = lower.strip_suffix("ms") {
            if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
                log::warn!("TYPE delays are case-sensitive; {word:?} ignored (use {prefix}ms)");
                return true;
            }
        }
        if let Some(prefix) = lower
            .strip_suffix("frames")
            .or_else(|| lower.strip_suffix("frame"))
        {
            if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
                log::warn!(
                    "TYPE delays are case-sensitive; {word:?} ignored (use {prefix}frames)"
                );
                return true;
            }
        }
    }

    false
}

fn plan_word(word: &str, plan: &mut TypeCommandPlan) {
    if word == "GET" || word == "VIEW" {
        plan.request_frame = true;
        return;
    }
    let upper = word.to_ascii_uppercase();
    if word != upper && (upper == "GET" || upper == "VIEW") {
        log::warn!("TYPE tokens are case-sensitive; {word:?} ignored (use {upper})");
        return;
    }

    if plan_delay(word, &mut plan.actions) {
        return;
    }

    if parse_key_name(word).is_some() {
        plan.actions.push(TypeAction::Press(word.to_string()));
        return;
    }

    if let Some(base) = word.strip_suffix("Down") {
        if parse_key_name(base).is_some() {
            plan.actions.push(TypeAction::Down(base.to_string()));
            return;
        }
    }
    if let Some(base) = word.strip_suffix("Up") {
        if parse_key_name(base).is_some() {
            plan.actions.push(TypeAction::Up(base.to_string()));
            return;
        }
    }

    if let Some(canonical) = canonical_spelling(word) {
        log::warn!("TYPE keys are case-sensitive; {word:?} ignored (use {canonical})");
        return;
    }

    log::warn!("unknown TYPE token {word:?} ignored");
}

/// Expand a quoted string character by character into key presses, with
/// Shift wrapped around characters that need it and an inter-character
/// frame pause when configured.
fn expand_string(text: &str, interkey_frames: u32, actions: &mut Vec<TypeAction>) {
    let mut first = true;
    for ch in text.chars() {
        let Some(binding) = char_to_key(ch) else {
            log::warn!("no key mapping for character {ch:?} in TYPE string");
            continue;
        };

        if !first && interkey_frames > 0 {
            actions.push(TypeAction::DelayFrames(interkey_frames));
        }
        first = false;

        if binding.shifted {
            actions.push(TypeAction::Down("Shift".to_string()));
            actions.push(TypeAction::Press(binding.key.to_string()));
            actions.push(TypeAction::Up("Shift".to_string()));
        } else {
            actions.push(TypeAction::Press(binding.key.to_string()));
        }
    }
}

/// Lex a TYPE argument string into an executable plan.
pub fn plan_type_command(argument: &str, interkey_frames: u32) -> TypeCommandPlan {
    let mut plan = TypeCommandPlan::default();

    for token in tokenize(argument) {
        match token.kind {
            TokenKind::Quoted => {
                expand_string(&token.text, interkey_frames, &mut plan.actions)
            },
            TokenKind::Word => plan_word(&token.text, &mut plan),
        }
    }

    // Take the final snapshot on a fresh frame after input settles.
    if plan.request_frame {
        let ends_with_delay =
            plan.actions.last().map(TypeAction::is_delay).unwrap_or(true);
        if !ends_with_delay {
            plan.actions
                .push(TypeAction::DelayFrames(interkey_frames.max(1)));
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(key: &str) -> TypeAction {
        TypeAction::Press(key.to_string())
    }

    fn down(key: &str) -> TypeAction {
        TypeAction::Down(key.to_string())
    }

    fn up(key: &str) -> TypeAction {
        TypeAction::Up(key.to_string())
    }

    #[test]
    fn capital_letters_are_wrapped_in_shift() {
        let plan = plan_type_command("\"Peter\"", 0);

        assert!(!plan.request_frame);
        assert_eq!(
            plan.actions,
            vec![
                down("Shift"),
                press("P"),
                up("Shift"),
                press("E"),
                press("T"),
                press("E"),
                press("R"),
            ]
        );
    }

    #[test]
    fn interkey_frames_pad_between_characters() {
        let plan = plan_type_command("\"AB\"", 2);

        assert_eq!(
            plan.actions,
            vec![
                down("Shift"),
                press("A"),
                up("Shift"),
                TypeAction::DelayFrames(2),
                down("Shift"),
                press("B"),
                up("Shift"),
            ]
        );
    }

    #[test]
    fn view_requests_a_frame_and_keeps_the_trailing_delay() {
        let plan = plan_type_command("A 3frames VIEW", 1);

        assert!(plan.request_frame);
        assert_eq!(plan.actions, vec![press("A"), TypeAction::DelayFrames(3)]);
    }

    #[test]
    fn frame_request_appends_a_settle_delay_after_keys() {
        let plan = plan_type_command("A GET", 2);

        assert!(plan.request_frame);
        assert_eq!(plan.actions, vec![press("A"), TypeAction::DelayFrames(2)]);

        let plan = plan_type_command("A GET", 0);
        assert_eq!(plan.actions, vec![press("A"), TypeAction::DelayFrames(1)]);
    }

    #[test]
    fn delays_only_plans_get_no_settle_delay() {
        let plan = plan_type_command("100ms 2frames GET", 1);

        assert!(plan.request_frame);
        assert_eq!(
            plan.actions,
            vec![TypeAction::DelayMs(100), TypeAction::DelayFrames(2)]
        );
    }

    #[test]
    fn empty_frame_request_stays_empty() {
        let plan = plan_type_command("GET", 1);

        assert!(plan.request_frame);
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn millisecond_delays_parse_and_zero_is_dropped() {
        let plan = plan_type_command("10ms 0ms 250ms", 0);

        assert_eq!(
            plan.actions,
            vec![TypeAction::DelayMs(10), TypeAction::DelayMs(250)]
        );
    }

    #[test]
    fn frame_delays_accept_both_suffixes() {
        let plan = plan_type_command("1frame 0frames 3frames", 0);

        assert_eq!(
            plan.actions,
            vec![
                TypeAction::DelayFrames(1),
                TypeAction::DelayFrames(0),
                TypeAction::DelayFrames(3),
            ]
        );
    }

    #[test]
    fn down_and_up_suffixes_target_the_base_key() {
        let plan = plan_type_command("ShiftDown A ShiftUp", 0);

        assert_eq!(plan.actions, vec![down("Shift"), press("A"), up("Shift")]);
    }

    #[test]
    fn arrow_keys_win_over_the_suffix_rule() {
        let plan = plan_type_command("Down PageDown Up", 0);

        assert_eq!(
            plan.actions,
            vec![press("Down"), press("PageDown"), press("Up")]
        );
    }

    #[test]
    fn unknown_and_miscased_tokens_are_skipped() {
        let plan = plan_type_command("shift Bogus A get", 0);

        assert!(!plan.request_frame);
        assert_eq!(plan.actions, vec![press("A")]);
    }

    #[test]
    fn quoted_strings_unescape() {
        let plan = plan_type_command(r#""a\"b""#, 0);

        assert_eq!(
            plan.actions,
            vec![
                press("A"),
                down("Shift"),
                press("Quote"),
                up("Shift"),
                press("B"),
            ]
        );

        let plan = plan_type_command(r#""\\""#, 0);
        assert_eq!(plan.actions, vec![press("Backslash")]);

        let plan = plan_type_command(r#""\n""#, 0);
        assert_eq!(plan.actions, vec![press("Enter")]);
    }

    #[test]
    fn punctuation_uses_the_shift_table() {
        let plan = plan_type_command("\"!:\"", 0);

        assert_eq!(
            plan.actions,
            vec![
                down("Shift"),
                press("1"),
                up("Shift"),
                down("Shift"),
                press("Semicolon"),
                up("Shift"),
            ]
        );
    }

    #[test]
    fn unmappable_characters_are_skipped_without_padding() {
        let plan = plan_type_command("\"aéb\"", 3);

        assert_eq!(
            plan.actions,
            vec![press("A"), TypeAction::DelayFrames(3), press("B")]
        );
    }

    #[test]
    fn bare_key_tokens_round_trip() {
        let plan = plan_type_command("A Enter F5 Numpad7", 0);

        assert_eq!(
            plan.actions,
            vec![press("A"), press("Enter"), press("F5"), press("Numpad7")]
        );
    }
}
