use crate::cp437::glyph_to_char;
use crate::palette::DOS_PALETTE;
use crate::snapshot::Snapshot;

/// Sentinel used when the configured one is empty: U+1F5F5 as UTF-8.
pub const DEFAULT_SENTINEL: &str = "\u{1F5F5}";

/// Options controlling how a snapshot is rendered to a frame.
#[derive(Debug, Clone, Default)]
pub struct EncodingOptions {
    pub show_attributes: bool,
    /// Prefix for metadata lines and the payload marker; the default glyph
    /// is substituted when empty.
    pub sentinel: String,
    /// Display names of currently held keys, ordered by name.
    pub keys_down: Vec<String>,
}

/// Render one SGR run for an attribute byte: reset, optional blink, then
/// 24-bit foreground and background from the DOS palette.
fn build_sgr(attribute: u8) -> String {
    let fg = DOS_PALETTE[(attribute & 0x0f) as usize];
    let bg = DOS_PALETTE[((attribute >> 4) & 0x07) as usize];
    let blink = if attribute & 0x80 != 0 { ";5" } else { "" };
    format!(
        "\x1b[0{blink};38;2;{};{};{};48;2;{};{};{}m",
        fg.r, fg.g, fg.b, bg.r, bg.g, bg.b
    )
}

/// Encode a snapshot as a metadata-prefixed ANSI frame.
///
/// The header carries five `META` lines and a `PAYLOAD` marker, each
/// introduced by the sentinel. The payload is CP437 translated to UTF-8,
/// with SGR color runs when attributes are shown. The output is byte-exact;
/// callers compare frames for equality.
pub fn build_ansi_frame(snapshot: &Snapshot, options: &EncodingOptions) -> String {
    let sentinel = if options.sentinel.is_empty() {
        DEFAULT_SENTINEL
    } else {
        options.sentinel.as_str()
    };

    let cols = snapshot.columns;
    let rows = snapshot.rows;

    let mut out = String::with_capacity(usize::from(cols) * usize::from(rows) * 4 + 128);

    out.push_str(&format!("{sentinel}META cols={cols}\n"));
    out.push_str(&format!("{sentinel}META rows={rows}\n"));
    if snapshot.cursor.enabled {
        out.push_str(&format!(
            "{sentinel}META cursor={},{} visible={}\n",
            snapshot.cursor.row,
            snapshot.cursor.column,
            u8::from(snapshot.cursor.visible)
        ));
    } else {
        out.push_str(&format!("{sentinel}META cursor=disabled\n"));
    }
    out.push_str(&format!(
        "{sentinel}META attributes={}\n",
        if options.show_attributes { "show" } else { "hide" }
    ));
    out.push_str(&format!(
        "{sentinel}META keys_down={}\n",
        options.keys_down.join(",")
    ));
    out.push_str(&format!("{sentinel}PAYLOAD\n"));

    if options.show_attributes {
        out.push_str("\x1b[0m");
    }

    let mut previous_attribute = 0u8;
    let mut has_previous_attr = false;

    for row in 0..rows {
        for col in 0..cols {
            let cell = snapshot.cells[usize::from(row) * usize::from(cols) + usize::from(col)];
            if options.show_attributes
                && (!has_previous_attr || cell.attribute != previous_attribute)
            {
                out.push_str(&build_sgr(cell.attribute));
                previous_attribute = cell.attribute;
                has_previous_attr = true;
            }
            out.push(glyph_to_char(cell.glyph));
        }
        if options.show_attributes {
            out.push_str("\x1b[0m");
        }
        out.push('\n');
        if options.show_attributes && row + 1 < rows {
            // Start the next line from a clean slate.
            has_previous_attr = false;
            out.push_str("\x1b[0m");
        }
    }

    out
}
