//! Format plugins for the game archive formats gamearc understands.
//!
//! Each module describes one byte layout in terms of the helpers in [`gamearc_core`]. The
//! formats are small on purpose: together they cover every directory pattern the core supports.
//!
//! | Format | Directory                                                         | Writable |
//! |--------|-------------------------------------------------------------------|----------|
//! | [`xarc`] | flat record table, names in a separate blob                     | yes      |
//! | [`ofs`]  | headerless offset list, lengths from offset deltas              | yes      |
//! | [`dtre`] | folder tree linked by offsets                                   | no       |
//! | [`tre`]  | zlib packed record and name blocks, MD5 digests                 | yes      |
//! | [`rpak`] | RC4 encrypted directory, per-entry zlib and XOR                 | no       |
//! | [`spk`]  | directory file with numbered part files, hashed names           | no       |
//! | [`sprb`] | offsets only, sizes read from each sprite header, palettes      | no       |
//! | [`lump`] | no entry count, sentinel terminated                             | no       |
//!
//! ```no_run
//! # fn doit() -> gamearc_core::error::Result<()> {
//! use gamearc_core::{DecodeOptions, Identification};
//!
//! match gamearc_formats::registry().open("music.xarc".as_ref(), DecodeOptions::default())? {
//!     Identification::Recognized(archive) => {
//!         for name in archive.file_names() {
//!             println!("{name}");
//!         }
//!     }
//!     Identification::Unrecognized => println!("unknown format"),
//!     Identification::Corrupt { format, error } => println!("broken {format} archive: {error}"),
//! }
//! # Ok(())
//! # }
//! ```

use gamearc_core::{FormatRegistry, RegistryOptions};

pub mod dtre;
pub mod lump;
pub mod ofs;
pub mod rpak;
pub mod spk;
pub mod sprb;
pub mod tre;
pub mod xarc;

/// A registry holding every format of this crate, in identification priority order
pub fn registry() -> FormatRegistry {
    registry_with(RegistryOptions::default())
}

/// [`registry`] with custom options
pub fn registry_with(options: RegistryOptions) -> FormatRegistry {
    FormatRegistry::new(options)
        .with(xarc::Xarc)
        .with(ofs::Ofs)
        .with(dtre::Dtre)
        .with(tre::Tre)
        .with(rpak::Rpak)
        .with(spk::Spk)
        .with(sprb::Sprb)
        .with(lump::Lump)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::registry;

    #[test]
    fn registry_order() {
        let ids = registry().decoders().map(|d| d.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["xarc", "ofs", "dtre", "tre", "rpak", "spk", "sprb", "lump"]);
    }
}
