//! Hexdump command implementation.
//!
//! ```text
//! 0x000: 48 65 6C 6C 6F 20 57 6F  72 6C 64 00 00 00 00 00  |Hello World.....|
//! ```

use anyhow::Result;
use memanchor_core::ReadMemory;

use super::hex_utils::parse_hex_address;
use super::open_target;
use crate::TargetArgs;

pub fn run(target: &TargetArgs, address: &str, size: usize, ascii: bool) -> Result<()> {
    let address = parse_hex_address(address)?;
    let process = open_target(target)?;
    let bytes = process.read_bytes(address, size)?;

    println!("Hexdump at 0x{:X} ({} bytes):", address, size);
    println!();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        println!("{}", format_line(i * 16, chunk, ascii));
    }
    Ok(())
}

fn format_line(offset: usize, chunk: &[u8], ascii: bool) -> String {
    let mut line = format!("0x{:03X}: ", offset);
    for j in 0..16 {
        if j == 8 {
            line.push(' ');
        }
        match chunk.get(j) {
            Some(byte) => line.push_str(&format!("{:02X} ", byte)),
            None => line.push_str("   "),
        }
    }
    if ascii {
        line.push_str(" |");
        for j in 0..16 {
            line.push(match chunk.get(j) {
                Some(&b) if (0x20..0x7F).contains(&b) => b as char,
                Some(_) => '.',
                None => ' ',
            });
        }
        line.push('|');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_full_line() {
        let line = format_line(0x10, b"Hello World\0\0\0\0\0", true);
        assert_eq!(
            line,
            "0x010: 48 65 6C 6C 6F 20 57 6F  72 6C 64 00 00 00 00 00  |Hello World.....|"
        );
    }

    #[test]
    fn test_format_short_line_is_padded() {
        let line = format_line(0, &[0x1F, 0x01], false);
        assert!(line.starts_with("0x000: 1F 01 "));
        assert_eq!(line.len(), "0x000: ".len() + 16 * 3 + 1);
    }
}
