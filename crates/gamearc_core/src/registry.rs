//! Format plugins and the registry that picks one for a stream.
//!
//! A format is a [`FormatDecoder`] trait object. The registry rates a stream with every decoder,
//! tries the ones that reach the match threshold from the highest score down (ties keep
//! registration order), and reports the outcome as an [`Identification`].

use std::{fmt, path::Path};

use bon::Builder;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    archive::Archive,
    context::{DecodeContext, DecodeOptions},
    cursor::ByteCursor,
    encode::EditedEntry,
    entry::{EntryDescriptor, SourceLocation},
    error::{Error, Result},
    normalize::sort_and_validate,
    signature::{score, Confidence, ScoreCard, MATCH_THRESHOLD},
};

/// A format plugin that can recognise and decode one archive format
pub trait FormatDecoder: Send + Sync {
    /// Short, unique, lower-case id
    fn id(&self) -> &'static str;

    /// Human readable name of the format
    fn description(&self) -> &'static str;

    /// File extensions the format is usually found with, lower-case and without a dot
    fn extensions(&self) -> &'static [&'static str];

    /// Tick off identification checks. Read errors are allowed and mean "not this format".
    fn rate(
        &self,
        cursor: &mut ByteCursor,
        card: &mut ScoreCard,
        source: &SourceLocation,
    ) -> Result<()>;

    /// Walk the directory and describe every entry
    fn decode(
        &self,
        cursor: &mut ByteCursor,
        source: &SourceLocation,
        ctx: &mut DecodeContext,
    ) -> Result<Vec<EntryDescriptor>>;

    /// The encoder for this format, if it can be written
    fn encoder(&self) -> Option<&dyn FormatEncoder> {
        None
    }

    /// Rate the stream without moving the cursor. Never fails.
    fn score(&self, cursor: &mut ByteCursor, source: &SourceLocation) -> Confidence {
        score(cursor, |c, card| self.rate(c, card, source))
    }

    /// Decode the directory, then sort and bounds-check the result
    #[instrument(skip_all, fields(format = self.id()), err)]
    fn read_directory(
        &self,
        cursor: &mut ByteCursor,
        source: &SourceLocation,
        ctx: &mut DecodeContext,
    ) -> Result<Vec<EntryDescriptor>> {
        ctx.begin(self.id());
        cursor.seek(0)?;
        let mut entries = self
            .decode(cursor, source, ctx)
            .and_then(|mut entries| {
                sort_and_validate(&mut entries, ctx.options().sort_by_offset)?;
                Ok(entries)
            })
            .inspect_err(|e| error!(format = self.id(), error = %e, "decoding failed"))?;
        entries.shrink_to_fit();
        debug!(format = self.id(), entries = entries.len(), "directory decoded");
        Ok(entries)
    }
}

/// Writes a new archive of a format from edited entries
pub trait FormatEncoder: Send + Sync {
    /// Produce the bytes of a new archive.
    ///
    /// `original` is the archive the entries were decoded from; fields the encoder does not
    /// understand are copied from it.
    fn encode(&self, original: &mut ByteCursor, entries: &[EditedEntry]) -> Result<Vec<u8>>;
}

/// Settings for format selection
#[derive(Debug, Copy, Clone, Builder)]
pub struct RegistryOptions {
    /// Score a decoder must reach to be tried
    #[builder(default = MATCH_THRESHOLD)]
    pub threshold: u8,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        RegistryOptions::builder().build()
    }
}

/// A decoder together with the score it gave a stream
#[derive(Clone, Copy)]
pub struct Candidate<'a> {
    pub decoder: &'a dyn FormatDecoder,
    pub confidence: Confidence,
}

impl fmt::Debug for Candidate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("format", &self.decoder.id())
            .field("confidence", &self.confidence)
            .finish()
    }
}

/// The result of opening a stream
#[derive(Debug)]
pub enum Identification {
    /// A decoder matched and read the directory
    Recognized(Archive),
    /// No decoder reached the match threshold
    Unrecognized,
    /// Decoders matched but every one of them failed; `error` comes from the best match
    Corrupt { format: &'static str, error: Error },
}

/// Ordered collection of format plugins
#[derive(Default)]
pub struct FormatRegistry {
    decoders: Vec<Box<dyn FormatDecoder>>,
    options: RegistryOptions,
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("decoders", &self.decoders.iter().map(|d| d.id()).collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

impl FormatRegistry {
    pub fn new(options: RegistryOptions) -> FormatRegistry {
        FormatRegistry {
            decoders: Vec::new(),
            options,
        }
    }

    /// Add a decoder after the ones already registered
    pub fn register(&mut self, decoder: Box<dyn FormatDecoder>) {
        self.decoders.push(decoder);
    }

    /// Builder-style [`FormatRegistry::register`]
    pub fn with(mut self, decoder: impl FormatDecoder + 'static) -> FormatRegistry {
        self.register(Box::new(decoder));
        self
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Registered decoders in priority order
    pub fn decoders(&self) -> impl Iterator<Item = &dyn FormatDecoder> {
        self.decoders.iter().map(|d| d.as_ref())
    }

    /// Look a decoder up by id
    pub fn get(&self, id: &str) -> Option<&dyn FormatDecoder> {
        self.decoders()
            .find(|d| d.id().eq_ignore_ascii_case(id))
    }

    /// Score the stream with every decoder, best first.
    ///
    /// Candidates below the threshold are included so callers can show them.
    #[instrument(skip(self, cursor))]
    pub fn identify(&self, cursor: &mut ByteCursor, source: &SourceLocation) -> Vec<Candidate<'_>> {
        let mut candidates = self
            .decoders()
            .map(|decoder| Candidate {
                decoder,
                confidence: decoder.score(cursor, source),
            })
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        candidates
    }

    /// Open and decode the archive at `path`.
    ///
    /// Only failing to open the file is an error; everything else is an [`Identification`].
    pub fn open(&self, path: &Path, options: DecodeOptions) -> Result<Identification> {
        let cursor = ByteCursor::open(path)?;
        let source = SourceLocation::file(path, cursor.len());
        Ok(self.open_cursor(cursor, source, options))
    }

    /// Identify and decode an already opened stream
    #[instrument(skip(self, cursor, options))]
    pub fn open_cursor(
        &self,
        mut cursor: ByteCursor,
        source: SourceLocation,
        options: DecodeOptions,
    ) -> Identification {
        let mut ctx = DecodeContext::new(options);
        let candidates = self
            .identify(&mut cursor, &source)
            .into_iter()
            .filter(|c| c.confidence.reaches(self.options.threshold))
            .collect::<Vec<_>>();

        let mut first_failure = None;
        for candidate in candidates {
            let format = candidate.decoder.id();
            match candidate.decoder.read_directory(&mut cursor, &source, &mut ctx) {
                Ok(entries) => {
                    info!(format, confidence = %candidate.confidence, entries = entries.len(), "archive recognized");
                    return Identification::Recognized(Archive::new(format, cursor, entries));
                }
                Err(error) => {
                    warn!(format, confidence = %candidate.confidence, "matched format failed to decode, trying next");
                    first_failure.get_or_insert((format, error));
                }
            }
        }

        match first_failure {
            Some((format, error)) => Identification::Corrupt { format, error },
            None => Identification::Unrecognized,
        }
    }

    /// Decode with a named format, skipping identification
    pub fn open_as(
        &self,
        id: &str,
        mut cursor: ByteCursor,
        source: SourceLocation,
        options: DecodeOptions,
    ) -> Result<Archive> {
        let decoder = self
            .get(id)
            .ok_or_else(|| Error::CustomError(format!("unknown format {id}")))?;
        let mut ctx = DecodeContext::new(options);
        let entries = decoder.read_directory(&mut cursor, &source, &mut ctx)?;
        Ok(Archive::new(decoder.id(), cursor, entries))
    }

    /// Encode edited entries back into the format `archive` was decoded with
    pub fn encode(&self, archive: &mut Archive, entries: &[EditedEntry]) -> Result<Vec<u8>> {
        let format = archive.format();
        let encoder = self
            .get(format)
            .and_then(|d| d.encoder())
            .ok_or(Error::ReadOnlyFormat(format))?;
        encoder.encode(archive.cursor(), entries)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::context::{DecodeContext, DecodeOptions};
    use crate::cursor::ByteCursor;
    use crate::entry::{EntryDescriptor, SourceLocation};
    use crate::error::{Error, Result};
    use crate::registry::{FormatDecoder, FormatRegistry, Identification, RegistryOptions};
    use crate::signature::{leading_bytes, Confidence, ScoreCard};

    /// Four byte magic followed by one entry covering the rest of the stream
    struct Magic {
        id: &'static str,
        magic: &'static [u8; 4],
        entry_length: Option<u64>,
    }

    impl FormatDecoder for Magic {
        fn id(&self) -> &'static str {
            self.id
        }

        fn description(&self) -> &'static str {
            "test format"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["mag"]
        }

        fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
            card.magic(&leading_bytes(cursor, 4)?, self.magic);
            card.extension(source, self.extensions());
            Ok(())
        }

        fn decode(&self, cursor: &mut ByteCursor, source: &SourceLocation, _ctx: &mut DecodeContext) -> Result<Vec<EntryDescriptor>> {
            Ok(vec![EntryDescriptor::builder()
                .source(source.clone())
                .name("only")
                .data_offset(4)
                .stored_length(self.entry_length.unwrap_or(cursor.len() - 4))
                .build()])
        }
    }

    fn registry() -> FormatRegistry {
        FormatRegistry::new(RegistryOptions::default())
            .with(Magic { id: "first", magic: b"AAAA", entry_length: None })
            .with(Magic { id: "second", magic: b"AAAA", entry_length: None })
            .with(Magic { id: "broken", magic: b"BBBB", entry_length: Some(1000) })
    }

    #[test]
    fn scoring_is_idempotent_and_restores_position() -> Result<()> {
        let registry = registry();
        let mut cursor = ByteCursor::from_bytes(b"AAAAdata".to_vec());
        let source = SourceLocation::memory(8);
        cursor.seek(3)?;

        let first = registry.identify(&mut cursor, &source);
        let second = registry.identify(&mut cursor, &source);

        assert_eq!(cursor.offset()?, 3);
        assert_eq!(
            first.iter().map(|c| c.confidence).collect::<Vec<_>>(),
            second.iter().map(|c| c.confidence).collect::<Vec<_>>()
        );
        assert_eq!(first[0].confidence, Confidence::new(50));

        Ok(())
    }

    #[test]
    fn ties_keep_registration_order() {
        let registry = registry();
        let cursor = ByteCursor::from_bytes(b"AAAAdata".to_vec());

        let Identification::Recognized(archive) =
            registry.open_cursor(cursor, SourceLocation::memory(8), DecodeOptions::default())
        else {
            panic!("expected a recognized archive");
        };
        assert_eq!(archive.format(), "first");
    }

    #[traced_test]
    #[test]
    fn out_of_bounds_entries_make_the_archive_corrupt() {
        let registry = registry();
        let cursor = ByteCursor::from_bytes(b"BBBBdata".to_vec());

        let outcome = registry.open_cursor(cursor, SourceLocation::memory(8), DecodeOptions::default());
        assert!(matches!(
            outcome,
            Identification::Corrupt { format: "broken", error: Error::StructuralViolation { .. } }
        ));
        assert!(logs_contain("decoding failed"));
    }

    #[test]
    fn unknown_streams_are_unrecognized() {
        let registry = registry();
        let cursor = ByteCursor::from_bytes(b"CCCCdata".to_vec());

        let outcome = registry.open_cursor(cursor, SourceLocation::memory(8), DecodeOptions::default());
        assert!(matches!(outcome, Identification::Unrecognized));
    }

    #[test]
    fn extension_alone_does_not_reach_threshold() {
        let registry = registry();
        let mut cursor = ByteCursor::from_bytes(b"CCCCdata".to_vec());
        let source = SourceLocation::file("archive.mag", 8);

        let best = registry.identify(&mut cursor, &source)[0];
        assert_eq!(best.confidence, Confidence::new(25));
        assert!(!best.confidence.reaches(registry.options().threshold));
    }

    #[test]
    fn read_only_formats_refuse_to_encode() -> Result<()> {
        let registry = registry();
        let cursor = ByteCursor::from_bytes(b"AAAAdata".to_vec());
        let mut archive = registry.open_as("second", cursor, SourceLocation::memory(8), DecodeOptions::default())?;

        assert!(matches!(registry.encode(&mut archive, &[]), Err(Error::ReadOnlyFormat("second"))));

        Ok(())
    }
}
