/// A cursor writing native-endian fields into a byte slice.
///
/// Writes past the end of the slice are dropped and mark the writer as
/// overflowed, so a record or header that does not fit is detected once at
/// the end instead of after every field.
#[derive(Debug)]
pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
    overflowed: bool,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            overflowed: false,
        }
    }

    /// Start writing at `pos`.
    pub(crate) fn at(buf: &'a mut [u8], pos: usize) -> Self {
        let overflowed = pos > buf.len();
        Self {
            buf,
            pos,
            overflowed,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub(crate) fn bytes(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            self.overflowed = true;
            self.pos = end;
            return;
        }

        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    pub(crate) fn u8(&mut self, value: u8) {
        self.bytes(&[value])
    }

    pub(crate) fn u32(&mut self, value: u32) {
        self.bytes(&value.to_ne_bytes())
    }

    pub(crate) fn u64(&mut self, value: u64) {
        self.bytes(&value.to_ne_bytes())
    }

    pub(crate) fn usize(&mut self, value: usize) {
        self.bytes(&value.to_ne_bytes())
    }

    pub(crate) fn f64(&mut self, value: f64) {
        self.bytes(&value.to_ne_bytes())
    }

    /// The next `n` bytes, for the caller to fill. Empty on overflow.
    pub(crate) fn slice(&mut self, n: usize) -> &mut [u8] {
        let start = self.pos;
        let end = start + n;
        self.pos = end;

        if end > self.buf.len() {
            self.overflowed = true;
            return &mut [];
        }
        &mut self.buf[start..end]
    }

    /// Write `n` zero bytes.
    pub(crate) fn zero(&mut self, n: usize) {
        let end = self.pos + n;
        if end > self.buf.len() {
            self.overflowed = true;
        } else {
            self.buf[self.pos..end].iter_mut().for_each(|b| *b = 0);
        }
        self.pos = end;
    }

    /// Zero fill up to the next multiple of `align`.
    pub(crate) fn align(&mut self, align: usize) {
        let n = align_up(self.pos, align) - self.pos;
        self.zero(n);
    }
}

/// Round `n` up to a multiple of `align`, a power of two.
#[inline]
pub(crate) const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_packed() {
        let mut buf = [0xffu8; 16];
        let mut w = Writer::new(&mut buf);
        w.u8(1);
        w.u32(0x0203_0405);
        w.u64(6);
        assert_eq!(w.position(), 13);
        assert!(!w.is_overflowed());

        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..5], &0x0203_0405u32.to_ne_bytes());
        assert_eq!(&buf[5..13], &6u64.to_ne_bytes());
        assert_eq!(buf[13], 0xff);
    }

    #[test]
    fn test_align() {
        let mut buf = [0xffu8; 16];
        let mut w = Writer::at(&mut buf, 3);
        w.align(8);
        assert_eq!(w.position(), 8);
        w.align(8);
        assert_eq!(w.position(), 8);
        assert_eq!(&buf[..8], &[0xff, 0xff, 0xff, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_overflow_is_sticky() {
        let mut buf = [0u8; 6];
        let mut w = Writer::new(&mut buf);
        w.u32(1);
        w.u32(2);
        assert!(w.is_overflowed());
        assert_eq!(w.position(), 8);

        // The partial write never lands
        assert_eq!(&buf[4..], &[0, 0]);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(92, 8), 96);
    }
}
