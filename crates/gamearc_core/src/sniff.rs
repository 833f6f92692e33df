//! Minimal content sniffing for entries whose format stores no names or extensions.

/// A leading-bytes signature and the extension it implies
#[derive(Debug, Clone, Copy)]
pub struct ContentSignature {
    pub magic: &'static [u8],
    pub offset: usize,
    pub extension: &'static str,
}

/// Known signatures, checked in order
pub const SIGNATURES: &[ContentSignature] = &[
    ContentSignature { magic: b"\x89PNG\r\n\x1a\n", offset: 0, extension: "png" },
    ContentSignature { magic: b"DDS ", offset: 0, extension: "dds" },
    ContentSignature { magic: b"OggS", offset: 0, extension: "ogg" },
    ContentSignature { magic: b"WAVE", offset: 8, extension: "wav" },
    ContentSignature { magic: b"AVI ", offset: 8, extension: "avi" },
    ContentSignature { magic: b"BM", offset: 0, extension: "bmp" },
    ContentSignature { magic: b"\xFF\xD8\xFF", offset: 0, extension: "jpg" },
    ContentSignature { magic: b"GIF8", offset: 0, extension: "gif" },
    ContentSignature { magic: b"PK\x03\x04", offset: 0, extension: "zip" },
    ContentSignature { magic: b"<?xml", offset: 0, extension: "xml" },
];

/// Bytes to read from an entry to be able to test every signature
pub const SNIFF_LENGTH: usize = 12;

/// Guess an extension from an entry's leading bytes
pub fn sniff_extension(header: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|s| {
            header
                .get(s.offset..s.offset + s.magic.len())
                .is_some_and(|window| window == s.magic)
        })
        .map(|s| s.extension)
}
