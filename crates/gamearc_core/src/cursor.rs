//! Random access reading and writing of archive bytes.
//!
//! [`ByteCursor`] is the reader every decoder is handed. It wraps either a buffered file or an
//! in-memory block behind the same type, which is what lets a decoder decrypt or inflate a
//! directory block and keep parsing it with the same record code ([`ByteCursor::from_bytes`]).
//!
//! All offsets are absolute within the wrapped stream. Seeks and length-prefixed reads are
//! checked against the stream length up front, so a corrupt length field fails with
//! [`Error::StructuralViolation`] instead of attempting a huge allocation.

use std::{
    fs::File,
    io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinRead, Endian};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Default read buffer used when opening files
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

/// Anything a [`ByteCursor`] can wrap
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// A seekable reader over an archive or a block decoded from one
pub struct ByteCursor {
    inner: Box<dyn ReadSeek>,
    len: u64,
    endian: Endian,
}

impl std::fmt::Debug for ByteCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteCursor")
            .field("len", &self.len)
            .field("endian", &self.endian)
            .finish_non_exhaustive()
    }
}

impl ByteCursor {
    /// Wrap a reader, measuring its length and rewinding it to the start
    pub fn new<R: Read + Seek + 'static>(mut reader: R) -> Result<ByteCursor> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.rewind()?;
        Ok(ByteCursor {
            inner: Box::new(reader),
            len,
            endian: Endian::Little,
        })
    }

    /// Open a file with the default read buffer
    pub fn open(path: impl AsRef<Path>) -> Result<ByteCursor> {
        Self::open_with_capacity(path, DEFAULT_BUFFER_CAPACITY)
    }

    /// Open a file with an explicit read buffer size.
    ///
    /// Directories made of many small records benefit from a larger buffer, formats that jump
    /// around the file from a smaller one.
    pub fn open_with_capacity(path: impl AsRef<Path>, capacity: usize) -> Result<ByteCursor> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::ResourceFailure {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(BufReader::with_capacity(capacity, file))
    }

    /// Wrap an in-memory block, such as a decrypted or decompressed directory
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> ByteCursor {
        let data = data.into();
        ByteCursor {
            len: data.len() as u64,
            inner: Box::new(Cursor::new(data)),
            endian: Endian::Little,
        }
    }

    /// Use the given byte order for the unqualified integer reads
    pub fn with_endian(mut self, endian: Endian) -> ByteCursor {
        self.endian = endian;
        self
    }

    /// Change the byte order for the unqualified integer reads
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// The byte order used by the unqualified integer reads
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Total length of the underlying stream
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Current absolute position
    pub fn offset(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Bytes left between the current position and the end of the stream
    pub fn remaining(&mut self) -> Result<u64> {
        Ok(self.len.saturating_sub(self.offset()?))
    }

    /// Move to an absolute position
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.len {
            return Err(Error::structural("seek offset", offset, self.len));
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Move relative to the current position
    pub fn relative_seek(&mut self, delta: i64) -> Result<()> {
        let current = self.offset()?;
        let target = current
            .checked_add_signed(delta)
            .ok_or(Error::structural("relative seek", current, self.len))?;
        self.seek(target)
    }

    /// Skip forward over `count` bytes
    pub fn skip(&mut self, count: u64) -> Result<()> {
        let current = self.offset()?;
        self.seek(current.saturating_add(count))
    }

    /// Fail unless `[offset, offset + length)` lies inside the stream
    pub fn check_range(&self, what: &'static str, offset: u64, length: u64) -> Result<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::structural(what, offset.saturating_add(length), self.len)),
        }
    }

    /// Run `f` and put the cursor back where it was, whether or not `f` succeeded
    pub fn restoring<T>(&mut self, f: impl FnOnce(&mut ByteCursor) -> Result<T>) -> Result<T> {
        let start = self.offset()?;
        let result = f(self);
        self.inner.seek(SeekFrom::Start(start))?;
        result
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_u16_in(self.endian)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_u32_in(self.endian)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_u64_in(self.endian)
    }

    /// Read a u16 in an explicit byte order
    pub fn read_u16_in(&mut self, endian: Endian) -> Result<u16> {
        Ok(match endian {
            Endian::Little => self.inner.read_u16::<LittleEndian>()?,
            Endian::Big => self.inner.read_u16::<BigEndian>()?,
        })
    }

    /// Read a u32 in an explicit byte order
    pub fn read_u32_in(&mut self, endian: Endian) -> Result<u32> {
        Ok(match endian {
            Endian::Little => self.inner.read_u32::<LittleEndian>()?,
            Endian::Big => self.inner.read_u32::<BigEndian>()?,
        })
    }

    /// Read a u64 in an explicit byte order
    pub fn read_u64_in(&mut self, endian: Endian) -> Result<u64> {
        Ok(match endian {
            Endian::Little => self.inner.read_u64::<LittleEndian>()?,
            Endian::Big => self.inner.read_u64::<BigEndian>()?,
        })
    }

    /// Read an unsigned integer `width` bytes wide (1, 2, 4 or 8)
    pub fn read_uint(&mut self, width: u8, endian: Endian) -> Result<u64> {
        match width {
            1 => Ok(self.read_u8()? as u64),
            2 => Ok(self.read_u16_in(endian)? as u64),
            4 => Ok(self.read_u32_in(endian)? as u64),
            8 => self.read_u64_in(endian),
            other => Err(Error::variant(format!("{other} byte integer field"))),
        }
    }

    /// Read exactly `count` bytes.
    ///
    /// The count is checked against what is left in the stream before anything is allocated.
    pub fn read_bytes(&mut self, count: u64) -> Result<Vec<u8>> {
        let remaining = self.remaining()?;
        if count > remaining {
            return Err(Error::structural("read length", count, remaining));
        }
        let mut buffer = vec![0u8; count as usize];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Read a fixed-width string field, cut at the first NUL
    pub fn read_fixed_string(&mut self, width: usize) -> Result<String> {
        let raw = self.read_bytes(width as u64)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Read a NUL terminated string, giving up after `max_len` bytes when a limit is set.
    ///
    /// The terminator is consumed. Hitting the limit is not an error; the string is returned as
    /// read so far.
    pub fn read_null_terminated_string(&mut self, max_len: Option<usize>) -> Result<String> {
        let raw = self.read_null_terminated_bytes(max_len)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Raw form of [`ByteCursor::read_null_terminated_string`]
    pub fn read_null_terminated_bytes(&mut self, max_len: Option<usize>) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        loop {
            if max_len.is_some_and(|max| raw.len() >= max) {
                break;
            }
            let byte = self.inner.read_u8()?;
            if byte == b'\0' {
                break;
            }
            raw.push(byte);
        }
        Ok(raw)
    }

    /// Read a record described with `binrw`
    pub fn read_struct<T>(&mut self) -> Result<T>
    where
        T: for<'a> BinRead<Args<'a> = ()>,
    {
        let endian = self.endian;
        Ok(T::read_options(&mut self.inner, endian, ())?)
    }

    /// Copy `length` bytes starting at `offset` into a new in-memory cursor
    pub fn sub_cursor(&mut self, offset: u64, length: u64) -> Result<ByteCursor> {
        self.check_range("block range", offset, length)?;
        self.seek(offset)?;
        Ok(ByteCursor::from_bytes(self.read_bytes(length)?).with_endian(self.endian))
    }
}

impl Read for ByteCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for ByteCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// The write mirror of [`ByteCursor`], used by directory encoders
#[derive(Debug)]
pub struct ByteWriter<W: Write + Seek> {
    inner: W,
    endian: Endian,
}

impl ByteWriter<Cursor<Vec<u8>>> {
    /// A writer collecting into memory
    pub fn in_memory() -> Self {
        ByteWriter::new(Cursor::new(Vec::new()))
    }

    /// Finish writing and return the collected bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl<W: Write + Seek> ByteWriter<W> {
    pub fn new(inner: W) -> Self {
        ByteWriter {
            inner,
            endian: Endian::Little,
        }
    }

    /// Use the given byte order for the unqualified integer writes
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Current absolute position
    pub fn offset(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        Ok(self.inner.write_u8(value)?)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        Ok(match self.endian {
            Endian::Little => self.inner.write_u16::<LittleEndian>(value)?,
            Endian::Big => self.inner.write_u16::<BigEndian>(value)?,
        })
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        Ok(match self.endian {
            Endian::Little => self.inner.write_u32::<LittleEndian>(value)?,
            Endian::Big => self.inner.write_u32::<BigEndian>(value)?,
        })
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        Ok(match self.endian {
            Endian::Little => self.inner.write_u64::<LittleEndian>(value)?,
            Endian::Big => self.inner.write_u64::<BigEndian>(value)?,
        })
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        Ok(self.inner.write_all(data)?)
    }

    pub fn write_null_terminated_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())?;
        self.write_u8(0)
    }

    /// Write `value` into a field exactly `width` bytes wide, padding with NULs.
    ///
    /// Values that do not fit are rejected rather than truncated.
    pub fn write_fixed_string(&mut self, value: &str, width: usize) -> Result<()> {
        if value.len() > width {
            return Err(Error::structural("name length", value.len() as u64, width as u64));
        }
        self.write_bytes(value.as_bytes())?;
        self.write_bytes(&vec![0u8; width - value.len()])
    }

    /// Pad with `fill` until the position is a multiple of `alignment`
    pub fn pad_to(&mut self, alignment: u64, fill: u8) -> Result<()> {
        if alignment <= 1 {
            return Ok(());
        }
        let offset = self.offset()?;
        let padding = offset.next_multiple_of(alignment) - offset;
        self.write_bytes(&vec![fill; padding as usize])
    }

    /// Copy a byte range of the original archive verbatim
    pub fn copy_from(&mut self, source: &mut ByteCursor, offset: u64, length: u64) -> Result<()> {
        source.check_range("preserved range", offset, length)?;
        source.seek(offset)?;
        let copied = io::copy(&mut source.by_ref().take(length), &mut self.inner)?;
        if copied != length {
            return Err(Error::structural("preserved range", copied, length));
        }
        Ok(())
    }

    /// Overwrite a u32 that was written earlier, keeping the current position
    pub fn patch_u32(&mut self, at: u64, value: u32) -> Result<()> {
        let resume = self.offset()?;
        self.inner.seek(SeekFrom::Start(at))?;
        self.write_u32(value)?;
        self.inner.seek(SeekFrom::Start(resume))?;
        Ok(())
    }

    /// Unwrap and return the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}
