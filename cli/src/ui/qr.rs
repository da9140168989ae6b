//! Terminal QR rendering.

use qrcode::{Color, QrCode};

const QUIET_ZONE: usize = 2;

/// Render a QR code into the terminal.
///
/// Half-height block glyphs pack two module rows into every text row, so the
/// code stays roughly square in a monospace cell grid.
pub fn print_qr_code(data: &str) {
    let code = match QrCode::new(data.as_bytes()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Failed to generate QR code: {}", e);
            return;
        }
    };

    let width = code.width();
    let modules = code.to_colors();
    let dark = |x: usize, y: usize| modules.get(y * width + x) == Some(&Color::Dark);

    let blank_row = " ".repeat(width + 2 * QUIET_ZONE);
    println!("{}", blank_row);

    let mut top = 0;
    while top < width {
        let bottom = top + 1;
        let mut line = String::with_capacity(width + 2 * QUIET_ZONE);
        line.push_str(&" ".repeat(QUIET_ZONE));
        for x in 0..width {
            line.push(glyph(dark(x, top), bottom < width && dark(x, bottom)));
        }
        line.push_str(&" ".repeat(QUIET_ZONE));
        println!("{}", line);
        top += 2;
    }

    println!("{}", blank_row);
}

fn glyph(top_dark: bool, bottom_dark: bool) -> char {
    match (top_dark, bottom_dark) {
        (true, true) => '█',
        (true, false) => '▀',
        (false, true) => '▄',
        (false, false) => ' ',
    }
}
