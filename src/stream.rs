use crate::elf::Width;
use crate::error::{Error, Result};

/// Cursored little-endian reader over a borrowed byte range.
///
/// Every section parser in this crate consumes bytes through this one
/// surface, so the cannot-read-past-the-end invariant lives in a single
/// place. The cursor never moves beyond the end of the range; a read that
/// would need more bytes than remain fails with `Error::OutOfBounds`.
pub struct ByteStream<'a> {
    bytes: &'a [u8],
    cur: usize,
}

impl<'a> ByteStream<'a> {
    pub fn new(bytes: &'a [u8]) -> ByteStream<'a> {
        ByteStream { bytes, cur: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.cur
    }

    pub fn reached_end(&self) -> bool {
        self.cur == self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.bytes.len() - self.cur;
        if n > available {
            return Err(Error::OutOfBounds { needed: n, available });
        }
        let slice = &self.bytes[self.cur..self.cur + n];
        self.cur += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reads a target address: 4 bytes under ELF32, 8 under ELF64.
    pub fn read_address(&mut self, width: Width) -> Result<u64> {
        match width {
            Width::Elf32 => Ok(u64::from(self.read_u32()?)),
            Width::Elf64 => self.read_u64(),
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Reads a NUL-terminated string, consuming the terminator.
    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let start = self.cur;
        let rest = &self.bytes[self.cur..];
        let nul = rest.iter().position(|&b| b == 0).ok_or(Error::OutOfBounds {
            needed: rest.len() + 1,
            available: rest.len(),
        })?;
        self.cur += nul + 1;
        std::str::from_utf8(&rest[..nul]).map_err(|_| {
            Error::Structural(format!("invalid UTF-8 in string at offset {:#x}", start))
        })
    }

    /// Reads strings until an empty one; the empty terminator is consumed
    /// and discarded.
    pub fn read_string_table(&mut self) -> Result<Vec<&'a str>> {
        let mut table = Vec::new();
        loop {
            let entry = self.read_cstr()?;
            if entry.is_empty() {
                break;
            }
            table.push(entry);
        }
        Ok(table)
    }

    /// Decodes a LEB128 integer of at most `max_bits` significant bits.
    ///
    /// The result is returned as the raw 64-bit word; a signed value is
    /// sign-extended into it and can be recovered with an `as i64` cast.
    /// Once the encoding carries more bits than `max_bits`, the excess bits
    /// must be padding: zeros for an unsigned or positive value, ones below
    /// the sign bit for a negative one. Anything else is `MalformedLeb128`.
    pub fn read_leb128(&mut self, signed: bool, max_bits: u32) -> Result<u64> {
        debug_assert!(max_bits <= 64, "max_bits longer than 64 bits");
        let mut result: u64 = 0;
        let mut bits_written: u32 = 0;
        let mut byte: u8 = 0x80;
        while byte & 0x80 != 0 {
            byte = self.read_u8()?;
            let low = u64::from(byte & 0x7f);
            if bits_written < 64 {
                result |= low << bits_written;
            }
            bits_written += 7;
            if bits_written > max_bits {
                let excess = bits_written - max_bits;
                if excess >= 7 {
                    // The whole payload lies past the boundary.
                    let negative_fill = signed && byte & 0x7f == 0x7f;
                    if byte & 0x7f != 0 && !negative_fill {
                        return Err(Error::MalformedLeb128);
                    }
                } else {
                    // The top `excess` payload bits are padding; the bit just
                    // below them is the highest value bit and doubles as the
                    // sign for a negative encoding.
                    let sign_bit = 1u8 << (6 - excess);
                    let pad_mask = (0xffu8 << (6 - excess + 1)) & 0x7f;
                    if signed && byte & sign_bit != 0 {
                        if byte & pad_mask != pad_mask {
                            return Err(Error::MalformedLeb128);
                        }
                    } else if byte & pad_mask != 0 {
                        return Err(Error::MalformedLeb128);
                    }
                }
            }
        }
        if signed && byte & 0x40 != 0 && bits_written < 64 {
            // Sign extend; a value that filled the whole word already
            // carries its sign.
            result |= !0u64 << bits_written;
        }
        Ok(result)
    }
}

/// Test-only inverse of `read_leb128`: encodes an unsigned value the way
/// a DWARF producer would. The crate's test suites build abbreviation
/// codes, operands, and file-table fields with it.
#[cfg(test)]
pub(crate) fn uleb(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Signed companion of [`uleb`], for `DW_OP_fbreg` offsets and
/// `DW_LNS_advance_line` operands.
#[cfg(test)]
pub(crate) fn sleb(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let sign_clear = byte & 0x40 == 0;
        if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_reads_are_little_endian() {
        let mut stream = ByteStream::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(stream.read_u8(), Ok(0x01));
        assert_eq!(stream.read_u16(), Ok(0x0302));
        assert_eq!(stream.read_u32(), Ok(0x07060504));
        assert!(stream.reached_end());
    }

    #[test]
    fn read_past_end_fails() {
        let mut stream = ByteStream::new(&[0x01, 0x02]);
        assert_eq!(stream.read_u8(), Ok(0x01));
        assert_eq!(
            stream.read_u32(),
            Err(Error::OutOfBounds { needed: 4, available: 1 })
        );
        // The failed read must not have moved the cursor.
        assert_eq!(stream.offset(), 1);
    }

    #[test]
    fn address_width_follows_the_elf_class() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x00, 0x00];
        let mut stream = ByteStream::new(&bytes);
        assert_eq!(stream.read_address(Width::Elf32), Ok(0x12345678));
        let mut stream = ByteStream::new(&bytes);
        assert_eq!(stream.read_address(Width::Elf64), Ok(0x12345678));
        let mut stream = ByteStream::new(&bytes[..4]);
        assert!(stream.read_address(Width::Elf64).is_err());
    }

    #[test]
    fn cstr_consumes_the_terminator() {
        let mut stream = ByteStream::new(b"main\0x\0");
        assert_eq!(stream.read_cstr(), Ok("main"));
        assert_eq!(stream.offset(), 5);
        assert_eq!(stream.read_cstr(), Ok("x"));
        assert!(stream.reached_end());
    }

    #[test]
    fn cstr_on_a_lone_nul_is_empty() {
        let mut stream = ByteStream::new(&[0x00]);
        assert_eq!(stream.read_cstr(), Ok(""));
        assert!(stream.reached_end());
    }

    #[test]
    fn cstr_without_terminator_fails() {
        let mut stream = ByteStream::new(b"abc");
        assert_eq!(
            stream.read_cstr(),
            Err(Error::OutOfBounds { needed: 4, available: 3 })
        );
    }

    #[test]
    fn string_table_stops_at_the_empty_entry() {
        let mut stream = ByteStream::new(b"/usr/include\0src\0\0trailing");
        assert_eq!(stream.read_string_table(), Ok(vec!["/usr/include", "src"]));
        // The empty terminator itself was consumed.
        assert_eq!(stream.read_bytes(8), Ok(&b"trailing"[..]));
    }

    #[test]
    fn uleb128_boundary_value() {
        // 624485 encodes as e5 8e 26.
        let mut stream = ByteStream::new(&[0xe5, 0x8e, 0x26]);
        assert_eq!(stream.read_leb128(false, 64), Ok(624485));
        assert!(stream.reached_end());
    }

    #[test]
    fn sleb128_negative_value() {
        // -123456 encodes as c0 bb 78.
        let mut stream = ByteStream::new(&[0xc0, 0xbb, 0x78]);
        let value = stream.read_leb128(true, 64).unwrap();
        assert_eq!(value as i64, -123456);
        assert!(stream.reached_end());
    }

    #[test]
    fn uleb_encoder_emits_known_dwarf_bytes() {
        assert_eq!(uleb(0), [0x00]);
        assert_eq!(uleb(0x49), [0x49]); // DW_AT_type in an abbreviation pair
        assert_eq!(uleb(300), [0xac, 0x02]); // a two-byte abbreviation code
        assert_eq!(uleb(624485), [0xe5, 0x8e, 0x26]);
        assert_eq!(uleb(u64::MAX).len(), 10);
    }

    #[test]
    fn sleb_encoder_emits_known_dwarf_bytes() {
        assert_eq!(sleb(2), [0x02]);
        assert_eq!(sleb(-2), [0x7e]);
        assert_eq!(sleb(-4), [0x7c]); // a typical DW_OP_fbreg operand
        assert_eq!(sleb(127), [0xff, 0x00]);
        assert_eq!(sleb(-128), [0x80, 0x7f]);
        assert_eq!(sleb(-123456), [0xc0, 0xbb, 0x78]);
    }

    #[test]
    fn leb128_round_trips() {
        for value in [0u64, 1, 127, 128, 624485, u64::from(u32::MAX), u64::MAX] {
            let encoded = uleb(value);
            let mut stream = ByteStream::new(&encoded);
            assert_eq!(stream.read_leb128(false, 64), Ok(value), "value {}", value);
            assert!(stream.reached_end());
        }
        for value in [0i64, 2, -2, 127, -127, 128, -128, -123456, i64::MAX, i64::MIN] {
            let encoded = sleb(value);
            let mut stream = ByteStream::new(&encoded);
            let decoded = stream.read_leb128(true, 64).unwrap();
            assert_eq!(decoded as i64, value, "value {}", value);
            assert!(stream.reached_end());
        }
    }

    #[test]
    fn uleb128_valid_padding_within_max_bits() {
        // 128 in two bytes carries 14 encoded bits but only 8 significant
        // ones; the rest must be zero padding.
        let mut stream = ByteStream::new(&[0x80, 0x01]);
        assert_eq!(stream.read_leb128(false, 8), Ok(128));
    }

    #[test]
    fn uleb128_nonzero_padding_fails() {
        // Second byte sets a bit above the 8-bit boundary.
        let mut stream = ByteStream::new(&[0x80, 0x03]);
        assert_eq!(stream.read_leb128(false, 8), Err(Error::MalformedLeb128));
    }

    #[test]
    fn sleb128_ones_padding_is_accepted_for_negative() {
        // -1 padded out to two bytes: ff 7f.
        let mut stream = ByteStream::new(&[0xff, 0x7f]);
        let value = stream.read_leb128(true, 8).unwrap();
        assert_eq!(value as i64, -1);
    }

    #[test]
    fn uleb128_ones_padding_fails_for_unsigned() {
        let mut stream = ByteStream::new(&[0xff, 0x7f]);
        assert_eq!(stream.read_leb128(false, 8), Err(Error::MalformedLeb128));
    }

    #[test]
    fn uleb128_ten_byte_u64_boundary() {
        let mut stream = ByteStream::new(&[
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01,
        ]);
        assert_eq!(stream.read_leb128(false, 64), Ok(u64::MAX));

        // Bit 64 set in the tenth byte is past the boundary.
        let mut stream = ByteStream::new(&[
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x03,
        ]);
        assert_eq!(stream.read_leb128(false, 64), Err(Error::MalformedLeb128));
    }

    #[test]
    fn sleb128_full_width_value_is_not_resignextended() {
        // i64::MIN fills all 64 bits; the sign-extension branch must not
        // shift by a full word.
        let mut stream = ByteStream::new(&[
            0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f,
        ]);
        let value = stream.read_leb128(true, 64).unwrap();
        assert_eq!(value as i64, i64::MIN);
    }

    #[test]
    fn leb128_truncated_encoding_fails() {
        // Continue bit set on the final byte.
        let mut stream = ByteStream::new(&[0x80]);
        assert_eq!(
            stream.read_leb128(false, 64),
            Err(Error::OutOfBounds { needed: 1, available: 0 })
        );
    }

    #[test]
    fn skip_advances_or_fails() {
        let mut stream = ByteStream::new(&[0u8; 4]);
        assert_eq!(stream.skip(3), Ok(()));
        assert_eq!(stream.offset(), 3);
        assert_eq!(stream.skip(2), Err(Error::OutOfBounds { needed: 2, available: 1 }));
    }
}
