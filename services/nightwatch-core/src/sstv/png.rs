//! PNG encoding (spec §4.7 step 8): RGB8, non-interlaced, DEFLATE level 6.
//!
//! No PNG-writing crate appears anywhere in the example pack, so rather than
//! pull in a dependency none of the grounding repos use, this follows the
//! same "know the wire format, write it directly" approach the ADS-B
//! decoder pack uses for Mode S frames (`adsb/parser.rs`): hand-rolled
//! chunk/CRC framing over `flate2`, which the workspace already depends on
//! for DEFLATE.

use std::io::Write;
use std::sync::OnceLock;

use flate2::write::ZlibEncoder;
use flate2::Compression;

const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

fn crc_table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (n, entry) in table.iter_mut().enumerate() {
            let mut c = n as u32;
            for _ in 0..8 {
                c = if c & 1 != 0 {
                    0xEDB88320 ^ (c >> 1)
                } else {
                    c >> 1
                };
            }
            *entry = c;
        }
        table
    })
}

fn crc32(data: &[u8]) -> u32 {
    let table = crc_table();
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = table[idx] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

fn write_chunk(out: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    let mut type_and_data = Vec::with_capacity(4 + data.len());
    type_and_data.extend_from_slice(chunk_type);
    type_and_data.extend_from_slice(data);
    out.extend_from_slice(&type_and_data);
    out.extend_from_slice(&crc32(&type_and_data).to_be_bytes());
}

/// Encodes an RGB8 image (row-major, `width * height` triples) as a
/// non-interlaced PNG.
pub fn encode_rgb8(width: usize, height: usize, rgb: &[[u8; 3]]) -> Vec<u8> {
    assert_eq!(rgb.len(), width * height);

    let mut out = Vec::with_capacity(width * height * 3 + 64);
    out.extend_from_slice(&SIGNATURE);

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr.extend_from_slice(&(height as u32).to_be_bytes());
    ihdr.push(8); // bit depth
    ihdr.push(2); // color type 2: truecolor
    ihdr.push(0); // compression method
    ihdr.push(0); // filter method
    ihdr.push(0); // interlace method: none
    write_chunk(&mut out, b"IHDR", &ihdr);

    let mut raw = Vec::with_capacity(height * (1 + width * 3));
    for row in rgb.chunks_exact(width) {
        raw.push(0u8); // filter type 0 (none) per row
        for pixel in row {
            raw.extend_from_slice(pixel);
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(6));
    encoder.write_all(&raw).expect("in-memory zlib write cannot fail");
    let idat = encoder.finish().expect("in-memory zlib finish cannot fail");
    write_chunk(&mut out, b"IDAT", &idat);

    write_chunk(&mut out, b"IEND", &[]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_known_vector() {
        // CRC-32/ISO-HDLC of the ASCII string "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn encoded_png_has_signature_and_chunk_markers() {
        let rgb = vec![[10u8, 20, 30]; 4];
        let png = encode_rgb8(2, 2, &rgb);
        assert_eq!(&png[..8], &SIGNATURE);
        assert!(png.windows(4).any(|w| w == b"IHDR"));
        assert!(png.windows(4).any(|w| w == b"IDAT"));
        assert!(png.ends_with(&crc32(b"IEND").to_be_bytes()));
    }

    #[test]
    #[should_panic]
    fn mismatched_buffer_length_panics() {
        encode_rgb8(2, 2, &[[0, 0, 0]; 3]);
    }
}
