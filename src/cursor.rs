use nom::error::ParseError;

/// Bounds-checked absolute read used for table-of-contents directed jumps.
/// Fails as a regular nom error so a bad offset aborts only the operation,
/// never the process.
#[inline]
pub fn slice_at<'a, E: ParseError<&'a [u8]>>(
    data: &'a [u8],
    offset: usize,
    len: usize,
) -> nom::IResult<&'a [u8], &'a [u8], E> {
    let end = offset.checked_add(len).ok_or_else(|| crate::too_large(data))?;
    match data.get(offset..end) {
        Some(s) => Ok((&data[end..], s)),
        None => Err(crate::too_large(data)),
    }
}

/// Position of a placeholder written by [`Writer::mark_u32`], to be patched
/// once the real value is known.
#[derive(Clone, Copy, Debug)]
pub struct Mark(usize);

/// Big-endian append writer over an owned buffer, with write-then-backpatch
/// support for lengths and offsets that are only known after their payload
/// has been produced.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
    #[inline]
    pub fn pos(&self) -> usize {
        self.buf.len()
    }
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
    #[inline]
    pub fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
    #[inline]
    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    #[inline]
    pub fn i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }
    #[inline]
    pub fn u16(&mut self, v: u16) {
        self.bytes(&v.to_be_bytes());
    }
    #[inline]
    pub fn u32(&mut self, v: u32) {
        self.bytes(&v.to_be_bytes());
    }
    #[inline]
    pub fn i16(&mut self, v: i16) {
        self.bytes(&v.to_be_bytes());
    }
    /// Fixed 16-byte space-padded name field.
    pub fn name16(&mut self, name: &[u8]) {
        let n = name.len().min(16);
        self.bytes(&name[..n]);
        for _ in n..16 {
            self.buf.push(b' ');
        }
    }
    /// Writes a placeholder u32 and remembers its position.
    #[inline]
    pub fn mark_u32(&mut self) -> Mark {
        let mark = Mark(self.buf.len());
        self.u32(0);
        mark
    }
    /// Overwrites a placeholder written by [`Self::mark_u32`]. A mark always
    /// points inside the buffer; anything else is a bug in the encoder.
    #[inline]
    pub fn patch_u32(&mut self, mark: Mark, v: u32) {
        debug_assert!(mark.0 + 4 <= self.buf.len());
        self.buf[mark.0..mark.0 + 4].copy_from_slice(&v.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::VerboseError;

    #[test]
    fn backpatch_after_payload() {
        let mut w = Writer::new();
        w.bytes(b"TOC1");
        let len = w.mark_u32();
        let start = w.pos();
        w.u16(0x1234);
        w.name16(b"piano");
        w.patch_u32(len, (w.pos() - start) as u32);
        let buf = w.into_inner();
        assert_eq!(&buf[..4], b"TOC1");
        assert_eq!(buf[4..8], 18u32.to_be_bytes());
        assert_eq!(buf[8..10], [0x12, 0x34]);
        assert_eq!(&buf[10..15], b"piano");
        assert_eq!(&buf[15..26], b"           ");
    }

    #[test]
    fn name16_truncates_long_names() {
        let mut w = Writer::new();
        w.name16(b"a name longer than sixteen bytes");
        assert_eq!(w.into_inner(), b"a name longer th");
    }

    #[test]
    fn slice_at_bounds() {
        let data = [0u8; 8];
        assert!(slice_at::<VerboseError<_>>(&data, 2, 6).is_ok());
        assert!(slice_at::<VerboseError<_>>(&data, 2, 7).is_err());
        assert!(slice_at::<VerboseError<_>>(&data, 9, 0).is_err());
        assert!(slice_at::<VerboseError<_>>(&data, usize::MAX, 2).is_err());
    }
}
