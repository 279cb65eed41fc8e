// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Common function for reading a structure from a reader.
pub trait FromReader<R: Read>: Sized {
    type Error;

    fn from_reader(reader: R) -> Result<Self, Self::Error>;
}

/// Common function for writing a structure to a writer.
pub trait ToWriter<W: Write>: Sized {
    type Error;

    fn to_writer(&self, writer: W) -> Result<(), Self::Error>;
}

/// Extensions for readers to read fixed-size buffers.
pub trait ReadFixedSizeExt {
    /// Read up to `size` bytes, stopping early only at EOF. Callers decide
    /// whether a short result is an error.
    fn read_vec_up_to(&mut self, size: usize) -> io::Result<Vec<u8>>;
}

impl<R: Read> ReadFixedSizeExt for R {
    fn read_vec_up_to(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(size);
        self.take(size as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Extensions for file-like types to query the file size. No guarantees are
/// made about the state of the underlying file position after performing any
/// operation.
pub trait FileLen {
    fn file_len(&self) -> io::Result<u64>;
}

macro_rules! file_len_blanket_impl {
    ($type:ty) => {
        impl<F: ?Sized + FileLen> FileLen for $type {
            fn file_len(&self) -> io::Result<u64> {
                (**self).file_len()
            }
        }
    };
}

file_len_blanket_impl!(&F);
file_len_blanket_impl!(Arc<F>);
file_len_blanket_impl!(Box<F>);

/// Extensions for file-like types that support multi-threaded reads at specific
/// offsets. No guarantees are made about the state of underlying file position
/// after performing any operation.
pub trait ReadAt: FileLen {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        let total = buf.len();

        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "Expected to read {total} bytes at {}, but reached EOF after {} bytes",
                            offset - (total - buf.len()) as u64,
                            total - buf.len(),
                        ),
                    ));
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

macro_rules! read_at_blanket_impl {
    ($type:ty) => {
        impl<R: ?Sized + ReadAt> ReadAt for $type {
            fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
                (**self).read_at(buf, offset)
            }

            fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
                (**self).read_exact_at(buf, offset)
            }
        }
    };
}

read_at_blanket_impl!(&R);
read_at_blanket_impl!(Arc<R>);
read_at_blanket_impl!(Box<R>);

/// Regular files support parallel reads.
impl ReadAt for File {
    /// Read data from offset. The kernel's file position *will* be changed.
    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        FileExt::seek_read(self, buf, offset)
    }

    /// Read data from offset. The kernel's file position will *not* be changed.
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        FileExt::read_at(self, buf, offset)
    }
}

impl FileLen for File {
    fn file_len(&self) -> io::Result<u64> {
        (&*self).seek(SeekFrom::End(0))
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(data) = self.get(start..) else {
            return Ok(0);
        };

        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);

        Ok(n)
    }
}

impl FileLen for [u8] {
    fn file_len(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl FileLen for Vec<u8> {
    fn file_len(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

/// A byte range within a backing source. This is only a descriptor. No data is
/// read until [`Self::read`] or [`Self::copy_to`] is called.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ByteRegion {
    pub offset: u64,
    pub length: u64,
}

impl ByteRegion {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Half-open byte range. Returns [`None`] if the end overflows.
    pub fn range(&self) -> Option<Range<u64>> {
        self.offset
            .checked_add(self.length)
            .map(|end| self.offset..end)
    }

    /// Whether the region lies entirely within a source of `size` bytes.
    pub fn fits_within(&self, size: u64) -> bool {
        self.range().is_some_and(|r| r.end <= size)
    }

    /// Materialize the region with a single bounded read. Fails with
    /// [`io::ErrorKind::UnexpectedEof`] if the source is too short.
    pub fn read(&self, source: impl ReadAt) -> io::Result<Vec<u8>> {
        let size = usize::try_from(self.length).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Region too large for memory: {}", self.length),
            )
        })?;

        let mut buf = vec![0u8; size];
        source.read_exact_at(&mut buf, self.offset)?;

        Ok(buf)
    }

    /// Stream the region into `writer`.
    pub fn copy_to(
        &self,
        source: impl ReadAt,
        writer: impl Write,
        cancel_signal: &AtomicBool,
    ) -> io::Result<()> {
        let reader = SectionReaderAt::new(source, self.offset, self.length);

        copy_n(UserPosFile::new(reader), writer, self.length, cancel_signal)
    }
}

/// A reader wrapper that only allows reading a specific section of a file.
pub struct SectionReaderAt<R> {
    inner: R,
    start: u64,
    size: u64,
}

impl<R: ReadAt> SectionReaderAt<R> {
    pub fn new(inner: R, start: u64, size: u64) -> Self {
        Self { inner, start, size }
    }
}

impl<R> FileLen for SectionReaderAt<R> {
    fn file_len(&self) -> io::Result<u64> {
        Ok(self.size)
    }
}

impl<R: ReadAt> ReadAt for SectionReaderAt<R> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let to_read = self.size.saturating_sub(offset).min(buf.len() as u64) as usize;
        if to_read == 0 {
            return Ok(0);
        }

        let raw_offset = self.start.checked_add(offset).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Section offset overflow")
        })?;

        self.inner.read_at(&mut buf[..to_read], raw_offset)
    }
}

/// A file wrapper than implements the standard [`Read`] trait on top of
/// [`ReadAt`]. The file position is unique for every instance, even if the
/// underlying file is shared.
pub struct UserPosFile<F> {
    file: F,
    offset: u64,
}

impl<F> UserPosFile<F> {
    pub fn new(file: F) -> Self {
        Self { file, offset: 0 }
    }
}

impl<F: ReadAt> Read for UserPosFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read_at(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Returns an I/O error with the [`io::ErrorKind::Interrupted`] type if
/// `cancel_signal` is true. This should be called frequently in I/O loops for
/// cancellation to be responsive.
#[inline]
pub fn check_cancel(cancel_signal: &AtomicBool) -> io::Result<()> {
    if cancel_signal.load(Ordering::SeqCst) {
        return Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "Received cancel signal",
        ));
    }

    Ok(())
}

/// Copy exactly `size` bytes from `reader` to `writer`. If either `reader` or
/// `writer` reaches EOF before `size` bytes are copied, an error is returned.
/// The operation is cancelled on the next loop iteration if `cancel_signal` is
/// set to `true`.
pub fn copy_n(
    mut reader: impl Read,
    mut writer: impl Write,
    mut size: u64,
    cancel_signal: &AtomicBool,
) -> io::Result<()> {
    let mut buf = [0u8; 16384];

    while size > 0 {
        check_cancel(cancel_signal)?;

        let to_read = size.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..to_read])?;

        writer.write_all(&buf[..to_read])?;

        size -= to_read as u64;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom, Write};

    use super::*;

    #[test]
    fn read_vec_up_to() {
        let mut reader = Cursor::new(b"foobar");
        assert_eq!(reader.read_vec_up_to(3).unwrap(), b"foo");
        assert_eq!(reader.read_vec_up_to(10).unwrap(), b"bar");
        assert_eq!(reader.read_vec_up_to(10).unwrap(), b"");
    }

    #[test]
    fn slice_read_at() {
        let data = b"fooinnerbar".as_slice();
        let mut buf = [0u8; 5];

        data.read_exact_at(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"inner");

        assert_eq!(data.read_at(&mut buf, 9).unwrap(), 2);
        assert_eq!(data.read_at(&mut buf, 100).unwrap(), 0);

        let err = data.read_exact_at(&mut buf, 8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn section_reader_at() {
        let reader = SectionReaderAt::new(b"fooinnerbar".to_vec(), 3, 5);

        let mut buf = [0u8; 5];
        reader.read_exact_at(&mut buf[3..5], 3).unwrap();
        reader.read_exact_at(&mut buf[..3], 0).unwrap();
        assert_eq!(&buf, b"inner");

        let n = reader.read_at(&mut buf, 5).unwrap();
        assert_eq!(n, 0);
        assert_eq!(reader.file_len().unwrap(), 5);
    }

    #[test]
    fn user_pos_file() {
        let mut raw_file = tempfile::tempfile().unwrap();
        raw_file.write_all(b"foobar").unwrap();
        raw_file.seek(SeekFrom::Start(0)).unwrap();

        let mut file = UserPosFile::new(&raw_file);
        let mut buf = [0u8; 3];

        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"foo");
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"bar");
        assert_eq!(file.read(&mut buf).unwrap(), 0);
        assert_eq!(raw_file.file_len().unwrap(), 6);
    }

    #[test]
    fn byte_region() {
        let data = b"fooinnerbar".to_vec();

        let region = ByteRegion::new(3, 5);
        assert_eq!(region.range(), Some(3..8));
        assert!(region.fits_within(11));
        assert_eq!(region.read(&data).unwrap(), b"inner");

        let region = ByteRegion::new(8, 5);
        assert!(!region.fits_within(11));
        let err = region.read(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        assert_eq!(ByteRegion::new(u64::MAX, 1).range(), None);
    }

    #[test]
    fn byte_region_copy() {
        let cancel_signal = AtomicBool::new(false);
        let data = b"fooinnerbar".to_vec();
        let mut writer = Cursor::new(Vec::new());

        ByteRegion::new(3, 5)
            .copy_to(&data, &mut writer, &cancel_signal)
            .unwrap();
        assert_eq!(writer.get_ref(), b"inner");

        let err = ByteRegion::new(8, 5)
            .copy_to(&data, &mut writer, &cancel_signal)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        cancel_signal.store(true, Ordering::SeqCst);
        let err = ByteRegion::new(0, 3)
            .copy_to(&data, &mut writer, &cancel_signal)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn copy_n_functions() {
        let cancel_signal = AtomicBool::new(false);
        let mut reader = Cursor::new(b"foobar");
        let mut writer = Cursor::new([0u8; 6]);

        copy_n(&mut reader, &mut writer, 6, &cancel_signal).unwrap();
        assert_eq!(writer.get_ref(), b"foobar");

        // Reader early EOF.
        reader.seek(SeekFrom::Start(3)).unwrap();
        writer.rewind().unwrap();
        let err = copy_n(&mut reader, &mut writer, 6, &cancel_signal).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        // Writer early EOF.
        reader.rewind().unwrap();
        writer.seek(SeekFrom::Start(3)).unwrap();
        let err = copy_n(&mut reader, &mut writer, 6, &cancel_signal).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
