//! Copying to and from simulated user memory.
//!
//! A userspace buffer may be unmapped, in which case copies fail with
//! [`Error::Fault`], like `copy_to_user` and `copy_from_user` do.
use crate::error::{Error, Result};

/// Destination for a read, `char __user *buf` plus its length.
#[derive(Debug)]
pub struct UserSliceWriter<'a> {
    dst: Option<&'a mut [u8]>,
    len: usize,
}

impl<'a> UserSliceWriter<'a> {
    pub fn new(dst: &'a mut [u8]) -> Self {
        Self {
            len: dst.len(),
            dst: Some(dst),
        }
    }

    /// A buffer of `len` bytes that isn't mapped, every copy faults.
    pub fn unmapped(len: usize) -> Self {
        Self { dst: None, len }
    }

    /// Bytes still writable
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy all of `data` out.
    ///
    /// # Errors
    ///
    /// - [`Error::Fault`] if the buffer is unmapped or shorter than `data`.
    ///   Nothing is copied in that case.
    pub fn write_slice(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.len {
            return Err(Error::Fault);
        }
        let dst = self.dst.take().ok_or(Error::Fault)?;
        let (head, tail) = dst.split_at_mut(data.len());
        head.copy_from_slice(data);
        self.len = tail.len();
        self.dst = Some(tail);
        Ok(())
    }
}

/// Source of a write, `const char __user *buf` plus its length.
#[derive(Debug)]
pub struct UserSliceReader<'a> {
    src: Option<&'a [u8]>,
    len: usize,
}

impl<'a> UserSliceReader<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self {
            len: src.len(),
            src: Some(src),
        }
    }

    /// A buffer of `len` bytes that isn't mapped, every copy faults.
    pub fn unmapped(len: usize) -> Self {
        Self { src: None, len }
    }

    /// Bytes still readable
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fill all of `out`.
    ///
    /// # Errors
    ///
    /// - [`Error::Fault`] if the buffer is unmapped or shorter than `out`.
    pub fn read_slice(&mut self, out: &mut [u8]) -> Result<()> {
        if out.len() > self.len {
            return Err(Error::Fault);
        }
        let src = self.src.ok_or(Error::Fault)?;
        let (head, tail) = src.split_at(out.len());
        out.copy_from_slice(head);
        self.len = tail.len();
        self.src = Some(tail);
        Ok(())
    }
}

/// A fixed size, NUL terminated, text buffer on the stack.
///
/// Holds at most `N - 1` bytes of payload. Input that doesn't fit is refused
/// before anything is copied, it is never truncated.
#[derive(Debug, Clone)]
pub struct BoundedBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedBuf<N> {
    /// Most payload bytes the buffer takes.
    pub const CAPACITY: usize = N - 1;

    /// Copy everything left in `reader` into a new buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `reader` holds more than
    ///   [`Self::CAPACITY`] bytes
    /// - [`Error::Fault`] if `reader` is unmapped
    pub fn copy_from(reader: &mut UserSliceReader<'_>) -> Result<Self> {
        let len = reader.len();
        if len > Self::CAPACITY {
            return Err(Error::InvalidArgument);
        }
        let mut buf = [0u8; N];
        reader.read_slice(&mut buf[..len])?;
        buf[len] = 0;
        Ok(Self { buf, len })
    }

    /// The payload, without the terminator
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The payload and its terminator
    #[cfg(test)]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf[..=self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_advances() {
        let mut buf = [0u8; 8];
        let mut w = UserSliceWriter::new(&mut buf);
        w.write_slice(b"abc").unwrap();
        w.write_slice(b"de").unwrap();
        assert_eq!(w.len(), 3);
        assert_eq!(w.write_slice(b"wxyz"), Err(Error::Fault));
        assert_eq!(&buf[..5], b"abcde");
    }

    #[test]
    fn unmapped_faults() {
        let mut w = UserSliceWriter::unmapped(16);
        assert_eq!(w.write_slice(b"x"), Err(Error::Fault));
        let mut r = UserSliceReader::unmapped(4);
        let mut out = [0u8; 4];
        assert_eq!(r.read_slice(&mut out), Err(Error::Fault));
    }

    #[test]
    fn bounded_exact_fit() {
        let mut r = UserSliceReader::new(b"123456789012345");
        let b = BoundedBuf::<16>::copy_from(&mut r).unwrap();
        assert_eq!(b.len(), 15);
        assert_eq!(b.as_bytes_with_nul().last(), Some(&0));
        assert!(r.is_empty());
    }

    #[test]
    fn bounded_rejects_before_copy() {
        let mut r = UserSliceReader::new(b"1234567890123456");
        assert_eq!(
            BoundedBuf::<16>::copy_from(&mut r).unwrap_err(),
            Error::InvalidArgument
        );
        // Nothing was consumed.
        assert_eq!(r.len(), 16);
    }

    #[test]
    fn bounded_oversize_unmapped_is_invalid_not_fault() {
        let mut r = UserSliceReader::unmapped(100);
        assert_eq!(
            BoundedBuf::<16>::copy_from(&mut r).unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn bounded_empty() {
        let mut r = UserSliceReader::new(b"");
        let b = BoundedBuf::<16>::copy_from(&mut r).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.as_bytes_with_nul(), &[0]);
    }
}
