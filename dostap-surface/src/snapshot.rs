use thiserror::Error;

use crate::cell::{CursorState, TextCell};
use crate::video::{VideoMode, VideoTextState};

/// Reasons a text-plane capture can fail.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("video adapter not in text mode")]
    NotInTextMode,
    #[error("no video memory mapped")]
    NoMemory,
    #[error("unable to capture text snapshot")]
    EmptyGeometry,
}

/// An immutable capture of the visible text plane.
///
/// `cells` holds `columns * rows` entries in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub columns: u16,
    pub rows: u16,
    pub cells: Vec<TextCell>,
    pub cursor: CursorState,
}

fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

fn determine_memory_size(state: &VideoTextState<'_>) -> u32 {
    if state.vmem_wrap != 0 {
        return state.vmem_wrap;
    }
    if state.linear_mask != 0 {
        return state.linear_mask + 1;
    }
    0
}

/// Wrap an address into the video memory aperture. Addresses are closed
/// under this operation for any non-zero memory size.
fn wrap_address(address: u32, memory_size: u32) -> u32 {
    if memory_size == 0 {
        return address;
    }
    if is_power_of_two(memory_size) {
        return address & (memory_size - 1);
    }
    address % memory_size
}

/// Modular subtraction used to turn the cursor byte address into an offset
/// relative to the display start.
fn subtract_mod(minuend: u32, subtrahend: u32, modulus: u32) -> u32 {
    if modulus == 0 {
        return minuend.saturating_sub(subtrahend);
    }
    let diff = (u64::from(minuend) + u64::from(modulus)) - u64::from(subtrahend % modulus);
    (diff % u64::from(modulus)) as u32
}

fn read_byte(memory: &[u8], address: u32) -> u8 {
    memory.get(address as usize).copied().unwrap_or(0)
}

/// Capture the visible text plane from the video controller state.
pub fn capture_snapshot(state: &VideoTextState<'_>) -> Result<Snapshot, SnapshotError> {
    if state.mode != VideoMode::Text {
        return Err(SnapshotError::NotInTextMode);
    }

    let memory = state.memory.ok_or(SnapshotError::NoMemory)?;

    let columns = state.columns as u16;
    if columns == 0 {
        return Err(SnapshotError::EmptyGeometry);
    }

    let char_height = if state.char_height != 0 {
        state.char_height
    } else {
        16
    };
    let rows = if state.scan_lines_total >= char_height {
        (state.scan_lines_total / char_height) as u16
    } else {
        25
    };
    if rows == 0 {
        return Err(SnapshotError::EmptyGeometry);
    }

    let memory_size = determine_memory_size(state);

    let byte_panning_shift = if state.byte_panning_shift != 0 {
        state.byte_panning_shift
    } else {
        2
    };
    let start_byte = wrap_address(
        state.display_start_word.wrapping_mul(byte_panning_shift),
        memory_size,
    );

    let row_stride = if state.row_stride != 0 {
        state.row_stride
    } else {
        u32::from(columns) * 2
    };

    let mut cells = Vec::with_capacity(usize::from(columns) * usize::from(rows));
    for row in 0..u32::from(rows) {
        let row_base = wrap_address(start_byte.wrapping_add(row * row_stride), memory_size);
        for col in 0..u32::from(columns) {
            let glyph_addr = wrap_address(row_base.wrapping_add(col * 2), memory_size);
            let attr_addr = wrap_address(glyph_addr.wrapping_add(1), memory_size);
            cells.push(TextCell::new(
                read_byte(memory, glyph_addr),
                read_byte(memory, attr_addr),
            ));
        }
    }

    let mut cursor = CursorState {
        enabled: state.cursor.enabled,
        ..CursorState::default()
    };

    if cursor.enabled {
        let cursor_byte = wrap_address(state.cursor.address, memory_size);
        let difference = subtract_mod(cursor_byte, start_byte, memory_size);
        let char_offset = difference / 2;

        if (char_offset as usize) < cells.len() {
            cursor.row = (char_offset / u32::from(columns)) as u16;
            cursor.column = (char_offset % u32::from(columns)) as u16;
            cursor.visible = !state.cursor.blink_enabled || state.cursor.blink_phase_on;
        } else {
            cursor.visible = false;
        }
    }

    Ok(Snapshot {
        columns,
        rows,
        cells,
        cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::CursorRegisters;

    fn text_state(memory: &[u8], columns: u32, rows: u32) -> VideoTextState<'_> {
        VideoTextState {
            mode: VideoMode::Text,
            memory: Some(memory),
            vmem_wrap: memory.len() as u32,
            linear_mask: (memory.len() as u32).saturating_sub(1),
            columns,
            scan_lines_total: rows * 16,
            char_height: 16,
            row_stride: columns * 2,
            display_start_word: 0,
            byte_panning_shift: 2,
            cursor: CursorRegisters::default(),
        }
    }

    #[test]
    fn captures_basic_grid() {
        let columns = 4u32;
        let rows = 3u32;
        let mut vram = vec![0u8; 4096];
        for cell_index in 0..(columns * rows) {
            vram[(cell_index * 2) as usize] = b'A' + cell_index as u8;
            vram[(cell_index * 2 + 1) as usize] = 0x10 + cell_index as u8;
        }

        let mut state = text_state(&vram, columns, rows);
        state.cursor = CursorRegisters {
            enabled: true,
            // row 1, column 2
            address: columns * 2 + 2 * 2,
            blink_enabled: true,
            blink_phase_on: true,
        };

        let snapshot = capture_snapshot(&state).unwrap();

        assert_eq!(snapshot.columns, 4);
        assert_eq!(snapshot.rows, 3);
        assert_eq!(snapshot.cells.len(), 12);
        for (cell_index, cell) in snapshot.cells.iter().enumerate() {
            assert_eq!(cell.glyph, b'A' + cell_index as u8);
            assert_eq!(cell.attribute, 0x10 + cell_index as u8);
        }

        assert!(snapshot.cursor.enabled);
        assert!(snapshot.cursor.visible);
        assert_eq!(snapshot.cursor.row, 1);
        assert_eq!(snapshot.cursor.column, 2);
    }

    #[test]
    fn wraps_rows_across_the_memory_boundary() {
        let buffer_size = 32u32;
        let mut vram = vec![0u8; buffer_size as usize];
        let start_byte = buffer_size - 2;
        vram[start_byte as usize] = b'X';
        vram[(start_byte + 1) as usize % 32] = 0xAA;
        vram[(start_byte + 2) as usize % 32] = b'Y';
        vram[(start_byte + 3) as usize % 32] = 0xBB;

        let mut state = text_state(&vram, 2, 1);
        state.display_start_word = start_byte / 2;

        let snapshot = capture_snapshot(&state).unwrap();
        assert_eq!(snapshot.cells.len(), 2);
        assert_eq!(snapshot.cells[0].glyph, b'X');
        assert_eq!(snapshot.cells[0].attribute, 0xAA);
        assert_eq!(snapshot.cells[1].glyph, b'Y');
        assert_eq!(snapshot.cells[1].attribute, 0xBB);
    }

    #[test]
    fn rejects_graphics_mode() {
        let vram = vec![0u8; 64];
        let mut state = text_state(&vram, 2, 1);
        state.mode = VideoMode::Graphics;

        assert_eq!(
            capture_snapshot(&state),
            Err(SnapshotError::NotInTextMode)
        );
    }

    #[test]
    fn rejects_unmapped_memory() {
        let vram = vec![0u8; 64];
        let mut state = text_state(&vram, 2, 1);
        state.memory = None;

        assert_eq!(capture_snapshot(&state), Err(SnapshotError::NoMemory));
    }

    #[test]
    fn defaults_to_25_rows_when_scan_lines_are_unset() {
        let vram = vec![0u8; 8192];
        let mut state = text_state(&vram, 80, 1);
        state.scan_lines_total = 0;

        let snapshot = capture_snapshot(&state).unwrap();
        assert_eq!(snapshot.rows, 25);
        assert_eq!(snapshot.cells.len(), 80 * 25);
    }

    #[test]
    fn cursor_outside_the_grid_is_enabled_but_not_visible() {
        let vram = vec![0u8; 4096];
        let mut state = text_state(&vram, 2, 1);
        state.cursor = CursorRegisters {
            enabled: true,
            address: 2000,
            blink_enabled: false,
            blink_phase_on: false,
        };

        let snapshot = capture_snapshot(&state).unwrap();
        assert!(snapshot.cursor.enabled);
        assert!(!snapshot.cursor.visible);
    }

    #[test]
    fn blink_gate_hides_the_cursor_in_the_off_phase() {
        let vram = vec![0u8; 4096];
        let mut state = text_state(&vram, 2, 2);
        state.cursor = CursorRegisters {
            enabled: true,
            address: 0,
            blink_enabled: true,
            blink_phase_on: false,
        };

        let snapshot = capture_snapshot(&state).unwrap();
        assert!(snapshot.cursor.enabled);
        assert!(!snapshot.cursor.visible);
    }
}
