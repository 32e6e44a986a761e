//! Bit packing between raw row bytes and per-sample slots.
//!
//! Rows with a depth below 8 store several samples per byte, most
//! significant group first. A packed row keeps one raw byte per slot; an
//! unpacked row keeps one sample per slot. The transforms work both in
//! place and between distinct buffers.

use crate::info::ImageInfo;

/// Element type of a row buffer: `u8` or `u16`.
pub trait Sample: Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// Widest value the type stores.
    const MAX: u16;

    /// Narrows a value, keeping the low bits.
    fn from_u16(value: u16) -> Self;

    /// Widens to `u16`.
    fn to_u16(self) -> u16;

    /// Builds a sample from a big-endian 16-bit pair.
    fn from_be_pair(msb: u8, lsb: u8) -> Self;

    /// Splits into a big-endian 16-bit pair.
    fn to_be_pair(self) -> [u8; 2];
}

impl Sample for u8 {
    const MAX: u16 = u8::MAX as u16;

    #[inline]
    fn from_u16(value: u16) -> Self {
        value as u8
    }

    #[inline]
    fn to_u16(self) -> u16 {
        self as u16
    }

    // Byte rows of 16-bit images keep only the high byte.
    #[inline]
    fn from_be_pair(msb: u8, _lsb: u8) -> Self {
        msb
    }

    #[inline]
    fn to_be_pair(self) -> [u8; 2] {
        [self, 0]
    }
}

impl Sample for u16 {
    const MAX: u16 = u16::MAX;

    #[inline]
    fn from_u16(value: u16) -> Self {
        value
    }

    #[inline]
    fn to_u16(self) -> u16 {
        self
    }

    #[inline]
    fn from_be_pair(msb: u8, lsb: u8) -> Self {
        u16::from_be_bytes([msb, lsb])
    }

    #[inline]
    fn to_be_pair(self) -> [u8; 2] {
        self.to_be_bytes()
    }
}

#[inline]
fn layout(info: &ImageInfo) -> (usize, u16, u32) {
    let bits = info.bit_depth() as usize;
    let mask = (1u16 << bits) - 1;
    (bits, mask, 8 - bits as u32)
}

/// Expands the packed bytes in `src` into `dst`, one sample per slot.
///
/// Writes exactly `info.samples_per_row()` samples. With `scale` set each
/// sample is shifted up to fill the 8-bit range. Rows of depth 8 or more
/// are copied unchanged.
pub fn unpack_row<S: Sample>(info: &ImageInfo, src: &[S], dst: &mut [S], scale: bool) {
    let samples = info.samples_per_row();
    if !info.packed() {
        dst[..samples].copy_from_slice(&src[..samples]);
        return;
    }
    let (bits, mask, shift_up) = layout(info);
    for (i, out) in dst[..samples].iter_mut().enumerate() {
        let bit = i * bits;
        let byte = src[bit / 8].to_u16();
        let value = (byte >> (8 - bits - bit % 8)) & mask;
        *out = S::from_u16(if scale { value << shift_up } else { value });
    }
}

/// Same as [`unpack_row`] with source and destination sharing `buf`.
///
/// `buf` holds `bytes_per_row` packed bytes on entry and must have room
/// for `samples_per_row` slots.
pub fn unpack_in_place<S: Sample>(info: &ImageInfo, buf: &mut [S], scale: bool) {
    if !info.packed() {
        return;
    }
    let (bits, mask, shift_up) = layout(info);
    // Walk backwards: slot i is never read again once sample i is written.
    for i in (0..info.samples_per_row()).rev() {
        let bit = i * bits;
        let byte = buf[bit / 8].to_u16();
        let value = (byte >> (8 - bits - bit % 8)) & mask;
        buf[i] = S::from_u16(if scale { value << shift_up } else { value });
    }
}

/// Groups the samples in `src` into packed bytes in `dst`.
///
/// Writes `info.bytes_per_row()` slots. Unused low bits of the last byte
/// are zero. With `scale` set samples are shifted down from the 8-bit range.
pub fn pack_row<S: Sample>(info: &ImageInfo, src: &[S], dst: &mut [S], scale: bool) {
    let samples = info.samples_per_row();
    if !info.packed() {
        dst[..samples].copy_from_slice(&src[..samples]);
        return;
    }
    let mut packer = Packer::new(info, scale);
    for &sample in &src[..samples] {
        if let Some((pos, byte)) = packer.push(sample.to_u16()) {
            dst[pos] = S::from_u16(byte);
        }
    }
    if let Some((pos, byte)) = packer.flush() {
        dst[pos] = S::from_u16(byte);
    }
}

/// Same as [`pack_row`] with source and destination sharing `buf`.
pub fn pack_in_place<S: Sample>(info: &ImageInfo, buf: &mut [S], scale: bool) {
    if !info.packed() {
        return;
    }
    let mut packer = Packer::new(info, scale);
    // Forward order: byte j is written only after samples 0..=j have been read.
    for i in 0..info.samples_per_row() {
        if let Some((pos, byte)) = packer.push(buf[i].to_u16()) {
            buf[pos] = S::from_u16(byte);
        }
    }
    if let Some((pos, byte)) = packer.flush() {
        buf[pos] = S::from_u16(byte);
    }
}

/// MSB-first accumulator shared by the packing entry points.
struct Packer {
    bits: usize,
    mask: u16,
    shift_down: u32,
    acc: u16,
    acc_bits: usize,
    pos: usize,
}

impl Packer {
    fn new(info: &ImageInfo, scale: bool) -> Self {
        let (bits, mask, shift) = layout(info);
        Self {
            bits,
            mask,
            shift_down: if scale { shift } else { 0 },
            acc: 0,
            acc_bits: 0,
            pos: 0,
        }
    }

    #[inline]
    fn push(&mut self, sample: u16) -> Option<(usize, u16)> {
        let value = (sample >> self.shift_down) & self.mask;
        self.acc = (self.acc << self.bits) | value;
        self.acc_bits += self.bits;
        if self.acc_bits == 8 {
            let out = (self.pos, self.acc);
            self.pos += 1;
            self.acc = 0;
            self.acc_bits = 0;
            Some(out)
        } else {
            None
        }
    }

    fn flush(&mut self) -> Option<(usize, u16)> {
        if self.acc_bits == 0 {
            return None;
        }
        let byte = (self.acc << (8 - self.acc_bits)) & 0xFF;
        self.acc_bits = 0;
        Some((self.pos, byte))
    }
}

/// Converts unfiltered row bytes into row slots.
///
/// 16-bit rows become one slot per sample (high byte only for `u8`
/// slots). Rows below 8 bits stay packed unless `unpack` is set.
pub fn bytes_to_row<S: Sample>(info: &ImageInfo, raw: &[u8], dst: &mut [S], unpack: bool) {
    if info.bit_depth() == 16 {
        for (out, pair) in dst.iter_mut().zip(raw.chunks_exact(2)) {
            *out = S::from_be_pair(pair[0], pair[1]);
        }
        return;
    }
    let bytes = info.bytes_per_row();
    for (out, &b) in dst[..bytes].iter_mut().zip(raw) {
        *out = S::from_u16(b as u16);
    }
    if unpack {
        unpack_in_place(info, dst, false);
    }
}

/// Converts row slots into raw row bytes ready for filtering.
///
/// `packed` tells whether `src` already holds packed bytes. Otherwise
/// samples below 8 bits are packed on the way out.
pub fn row_to_bytes<S: Sample>(info: &ImageInfo, src: &[S], raw: &mut [u8], packed: bool) {
    if info.bit_depth() == 16 {
        for (pair, &sample) in raw.chunks_exact_mut(2).zip(src) {
            pair.copy_from_slice(&sample.to_be_pair());
        }
        return;
    }
    if info.packed() && !packed {
        let mut packer = Packer::new(info, false);
        for &sample in &src[..info.samples_per_row()] {
            if let Some((pos, byte)) = packer.push(sample.to_u16()) {
                raw[pos] = byte as u8;
            }
        }
        if let Some((pos, byte)) = packer.flush() {
            raw[pos] = byte as u8;
        }
        return;
    }
    for (out, &sample) in raw[..info.bytes_per_row()].iter_mut().zip(src) {
        *out = sample.to_u16() as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(cols: u32, depth: u8) -> ImageInfo {
        ImageInfo::gray(cols, 1, depth, false).unwrap()
    }

    #[test]
    fn test_pack_bits() {
        // 1-bit packing: [1,0,1,0,1,0,1,0] -> 0b10101010
        let mut dst = [0u8; 1];
        pack_row(&gray(8, 1), &[1u8, 0, 1, 0, 1, 0, 1, 0], &mut dst, false);
        assert_eq!(dst, [0b10101010]);

        // 2-bit packing: [0,1,2,3] -> 00 01 10 11 = 0x1B
        pack_row(&gray(4, 2), &[0u8, 1, 2, 3], &mut dst, false);
        assert_eq!(dst, [0b00011011]);

        // 4-bit packing: [0xA, 0xB] -> 0xAB
        pack_row(&gray(2, 4), &[0xAu8, 0xB], &mut dst, false);
        assert_eq!(dst, [0xAB]);
    }

    #[test]
    fn test_pack_bits_partial_byte() {
        let mut dst = [0xFFu8; 1];
        pack_row(&gray(3, 1), &[1u8, 0, 1], &mut dst, false);
        assert_eq!(dst, [0b10100000]);

        pack_row(&gray(2, 2), &[1u8, 2], &mut dst, false);
        assert_eq!(dst, [0b01100000]);
    }

    #[test]
    fn test_unpack_ten_pixel_one_bit_row() {
        let info = gray(10, 1);
        let packed = [0b1011_0010u8, 0b1100_0000];
        let mut out = [0u8; 10];
        unpack_row(&info, &packed, &mut out, false);
        assert_eq!(out, [1, 0, 1, 1, 0, 0, 1, 0, 1, 1]);
    }

    #[test]
    fn test_unpack_in_place_matches_copy() {
        let info = ImageInfo::palette(7, 1, 2).unwrap();
        let packed = [0b11_10_01_00u8, 0b01_10_11_00];
        let mut copy = [0u16; 7];
        unpack_row(&info, &[packed[0] as u16, packed[1] as u16], &mut copy, false);
        let mut buf = [0u16; 7];
        buf[0] = packed[0] as u16;
        buf[1] = packed[1] as u16;
        unpack_in_place(&info, &mut buf, false);
        assert_eq!(buf, copy);
        assert_eq!(buf, [3, 2, 1, 0, 1, 2, 3]);
    }

    #[test]
    fn test_pack_in_place_roundtrip() {
        let info = gray(11, 4);
        let samples: Vec<u8> = (0..11).map(|v| (v * 3 % 16) as u8).collect();
        let mut buf = samples.clone();
        pack_in_place(&info, &mut buf, false);
        assert_eq!(buf[5] & 0x0F, 0);
        unpack_in_place(&info, &mut buf, false);
        assert_eq!(buf, samples);
    }

    #[test]
    fn test_scale_mode() {
        let info = gray(4, 2);
        let mut out = [0u8; 4];
        unpack_row(&info, &[0b00_01_10_11u8], &mut out, true);
        assert_eq!(out, [0, 64, 128, 192]);

        let mut packed = [0u8; 1];
        pack_row(&info, &out, &mut packed, true);
        assert_eq!(packed, [0b00_01_10_11]);
    }

    #[test]
    fn test_sixteen_bit_byte_mode_keeps_msb() {
        let info = ImageInfo::gray(2, 1, 16, false).unwrap();
        let raw = [0x12, 0x34, 0xAB, 0xCD];
        let mut bytes = [0u8; 2];
        bytes_to_row(&info, &raw, &mut bytes, false);
        assert_eq!(bytes, [0x12, 0xAB]);

        let mut wide = [0u16; 2];
        bytes_to_row(&info, &raw, &mut wide, false);
        assert_eq!(wide, [0x1234, 0xABCD]);

        let mut back = [0u8; 4];
        row_to_bytes(&info, &bytes, &mut back, false);
        assert_eq!(back, [0x12, 0, 0xAB, 0]);
    }

    #[test]
    fn test_row_to_bytes_packs_unpacked_samples() {
        let info = gray(5, 1);
        let mut raw = [0u8; 1];
        row_to_bytes(&info, &[1u16, 1, 0, 1, 1], &mut raw, false);
        assert_eq!(raw, [0b1101_1000]);
    }
}
