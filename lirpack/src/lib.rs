//! The compact value stream format used by the LIR backend's side tables.
//!
//! Every auxiliary per-instruction record the backend produces (scope values, oop
//! maps, pc descriptors) is serialized with this variable-length encoding, so a
//! reader in the runtime can decode the tables without knowing how they were laid
//! out in memory at compile time. The format is the Pack200-derived UNSIGNED5
//! scheme:
//!
//!  * Unsigned 32-bit values in `[0, 191]` occupy one byte equal to the value (a
//!    "low code").
//!  * Larger values repeatedly subtract 192, emit `192 + (remainder % 64)` (a
//!    "high code" in `[192, 255]`), and shift the remainder right by 6 bits. The
//!    final remainder is emitted as a low code, except that the 5th byte is
//!    always terminal regardless of magnitude: no encoding exceeds 5 bytes.
//!  * Signed values are zig-zag transformed (`(v << 1) ^ (v >> 31)`) first, so
//!    small magnitudes of either sign stay short.
//!  * Floats and doubles are bit-reversed before encoding: common "round"
//!    values have long runs of trailing zeroes in their mantissa, and reversal
//!    turns those into leading zeroes, which UNSIGNED5 compresses well. Doubles
//!    are encoded as two independently reversed 32-bit halves.
//!
//! Round-trip exactness (write then read reproduces every bit) is a hard
//! invariant; see the `stress` test below.

/// One-byte values are `< L`; "high code" bytes are `>= L`.
const L: u32 = 192;
/// Each high code carries `lg_H` bits of payload.
const LG_H: u32 = 6;
const H: u32 = 1 << LG_H;
/// Index of the final (5th) byte of a maximal encoding.
const MAX_I: usize = 4;

/// Maximum number of bytes a single 32-bit value can occupy.
pub const MAX_BYTES_PER_INT: usize = MAX_I + 1;

/// A growable byte buffer that values are appended to in compressed form.
#[derive(Debug, Default)]
pub struct CompressedWriteStream {
    buf: Vec<u8>,
}

impl CompressedWriteStream {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// The current write position, i.e. the number of bytes written so far.
    /// Positions returned from here are valid arguments to
    /// [CompressedReadStream::set_position].
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn store(&mut self, b: u8) {
        self.buf.push(b);
    }

    /// Write a raw byte with no compression. Used for one-byte tags.
    pub fn write_byte(&mut self, b: u8) {
        self.store(b);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.store(v as u8);
    }

    /// Write an unsigned 32-bit value in 1..=5 bytes.
    pub fn write_int(&mut self, value: u32) {
        let mut sum = value;
        for i in 0.. {
            if sum < L || i == MAX_I {
                // Remainder is either a low code or the forced 5th byte.
                self.store(sum as u8);
                return;
            }
            sum -= L;
            self.store((L + (sum % H)) as u8);
            sum >>= LG_H;
        }
        unreachable!();
    }

    /// Write a signed 32-bit value via the zig-zag transform.
    pub fn write_signed_int(&mut self, value: i32) {
        self.write_int(encode_sign(value));
    }

    /// Write a 64-bit value as two signed 32-bit halves, low half first.
    pub fn write_long(&mut self, value: i64) {
        self.write_signed_int(value as i32);
        self.write_signed_int((value >> 32) as i32);
    }

    /// Write a float, bit-reversed so round values encode short.
    pub fn write_float(&mut self, value: f32) {
        self.write_int(value.to_bits().reverse_bits());
    }

    /// Write a double as two independently bit-reversed 32-bit halves, high
    /// half first.
    pub fn write_double(&mut self, value: f64) {
        let bits = value.to_bits();
        self.write_int(((bits >> 32) as u32).reverse_bits());
        self.write_int((bits as u32).reverse_bits());
    }
}

/// A read cursor over a compressed byte stream.
///
/// Reads past the end of the data are a fatal error (panic): the stream lengths
/// are produced and consumed by the same serializer pair, so a short read means
/// the writer and reader have diverged.
#[derive(Debug)]
pub struct CompressedReadStream<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CompressedReadStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        assert!(pos <= self.data.len());
        self.pos = pos;
    }

    fn fetch(&mut self) -> u32 {
        let b = self.data[self.pos];
        self.pos += 1;
        u32::from(b)
    }

    /// Read a raw byte written by [CompressedWriteStream::write_byte].
    pub fn read_byte(&mut self) -> u8 {
        self.fetch() as u8
    }

    pub fn read_bool(&mut self) -> bool {
        self.fetch() != 0
    }

    /// Read an unsigned 32-bit value.
    pub fn read_int(&mut self) -> u32 {
        let b0 = self.fetch();
        if b0 < L {
            return b0;
        }
        let mut sum = b0;
        let mut lg_h_i = LG_H;
        for i in 1.. {
            let b_i = self.fetch();
            sum = sum.wrapping_add(b_i << lg_h_i);
            if b_i < L || i == MAX_I {
                return sum;
            }
            lg_h_i += LG_H;
        }
        unreachable!();
    }

    pub fn read_signed_int(&mut self) -> i32 {
        decode_sign(self.read_int())
    }

    /// Read a 64-bit value written by [CompressedWriteStream::write_long].
    ///
    /// The halves are recombined with a genuine 64-bit shift: the low half is
    /// masked to 32 bits so its sign extension cannot leak into the high half.
    pub fn read_long(&mut self) -> i64 {
        let low = self.read_signed_int();
        let high = self.read_signed_int();
        ((i64::from(high)) << 32) | (i64::from(low) & 0xffff_ffff)
    }

    pub fn read_float(&mut self) -> f32 {
        f32::from_bits(self.read_int().reverse_bits())
    }

    pub fn read_double(&mut self) -> f64 {
        let high = self.read_int().reverse_bits();
        let low = self.read_int().reverse_bits();
        f64::from_bits((u64::from(high) << 32) | u64::from(low))
    }
}

/// Zig-zag transform: interleave negative values with positive ones so small
/// magnitudes of either sign produce small unsigned values.
fn encode_sign(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

fn decode_sign(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn roundtrip_int(v: u32) -> (u32, usize) {
        let mut w = CompressedWriteStream::new();
        w.write_int(v);
        let len = w.position();
        let bytes = w.into_bytes();
        let mut r = CompressedReadStream::new(&bytes);
        let got = r.read_int();
        assert_eq!(r.position(), len);
        (got, len)
    }

    fn roundtrip_signed(v: i32) -> i32 {
        let mut w = CompressedWriteStream::new();
        w.write_signed_int(v);
        let bytes = w.into_bytes();
        let mut r = CompressedReadStream::new(&bytes);
        r.read_signed_int()
    }

    #[test]
    fn low_codes_are_one_byte() {
        for v in 0..=191u32 {
            let (got, len) = roundtrip_int(v);
            assert_eq!(got, v);
            assert_eq!(len, 1, "{v} should be a one-byte low code");
        }
    }

    #[test]
    fn boundary_values() {
        for v in [
            0u32,
            191,
            192,
            255,
            256,
            12_479,
            12_480,
            u32::from(u16::MAX),
            1 << 24,
            u32::MAX - 1,
            u32::MAX,
        ] {
            let (got, len) = roundtrip_int(v);
            assert_eq!(got, v);
            assert!(len <= MAX_BYTES_PER_INT);
        }
    }

    #[test]
    fn size_grows_monotonically_with_magnitude() {
        let mut last_len = 0;
        for v in (0..32).map(|i| 1u32 << i) {
            let (got, len) = roundtrip_int(v);
            assert_eq!(got, v);
            assert!(len >= last_len, "encoding shrank at {v}");
            assert!(len <= MAX_BYTES_PER_INT);
            last_len = len;
        }
    }

    #[test]
    fn exhaustive_small_unsigned() {
        for v in 0..=(1u32 << 17) {
            let (got, _) = roundtrip_int(v);
            assert_eq!(got, v);
        }
    }

    #[test]
    fn sampled_unsigned() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..100_000 {
            let v: u32 = rng.gen();
            let (got, _) = roundtrip_int(v);
            assert_eq!(got, v);
        }
    }

    #[test]
    fn signed_roundtrip() {
        for v in -70_000i32..=70_000 {
            assert_eq!(roundtrip_signed(v), v);
        }
        for v in [i32::MIN, i32::MIN + 1, i32::MAX - 1, i32::MAX] {
            assert_eq!(roundtrip_signed(v), v);
        }
        let mut rng = StdRng::seed_from_u64(0xface);
        for _ in 0..100_000 {
            let v: i32 = rng.gen();
            assert_eq!(roundtrip_signed(v), v);
        }
    }

    #[test]
    fn small_signed_values_stay_short() {
        // Zig-zag means -96..=95 fit in a single byte.
        for v in -96i32..=95 {
            let mut w = CompressedWriteStream::new();
            w.write_signed_int(v);
            assert_eq!(w.position(), 1, "{v}");
        }
    }

    #[test]
    fn long_roundtrip() {
        for v in [
            0i64,
            1,
            -1,
            i64::from(i32::MIN),
            i64::from(i32::MAX),
            i64::from(u32::MAX),
            // Values whose high half matters: a 32-bit reconstruction of the
            // halves would silently drop these.
            1 << 32,
            -1 << 32,
            0x1234_5678_9abc_def0,
            i64::MIN,
            i64::MAX,
        ] {
            let mut w = CompressedWriteStream::new();
            w.write_long(v);
            let bytes = w.into_bytes();
            let mut r = CompressedReadStream::new(&bytes);
            assert_eq!(r.read_long(), v);
        }
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100_000 {
            let v: i64 = rng.gen();
            let mut w = CompressedWriteStream::new();
            w.write_long(v);
            let bytes = w.into_bytes();
            let mut r = CompressedReadStream::new(&bytes);
            assert_eq!(r.read_long(), v);
        }
    }

    #[test]
    fn float_bit_patterns() {
        let mut patterns: Vec<u32> = vec![
            0,
            1,
            f32::to_bits(0.0),
            f32::to_bits(-0.0),
            f32::to_bits(1.0),
            f32::to_bits(2.5),
            f32::to_bits(f32::INFINITY),
            f32::to_bits(f32::NEG_INFINITY),
            f32::to_bits(f32::NAN),
            u32::MAX,
        ];
        let mut rng = StdRng::seed_from_u64(11);
        patterns.extend((0..100_000).map(|_| rng.gen::<u32>()));
        for bits in patterns {
            let v = f32::from_bits(bits);
            let mut w = CompressedWriteStream::new();
            w.write_float(v);
            let bytes = w.into_bytes();
            let mut r = CompressedReadStream::new(&bytes);
            assert_eq!(r.read_float().to_bits(), bits);
        }
    }

    #[test]
    fn double_bit_patterns() {
        let mut patterns: Vec<u64> = vec![
            0,
            1,
            f64::to_bits(0.0),
            f64::to_bits(-0.0),
            f64::to_bits(1.0),
            f64::to_bits(-1.0),
            f64::to_bits(std::f64::consts::PI),
            f64::to_bits(f64::INFINITY),
            f64::to_bits(f64::NAN),
            u64::MAX,
        ];
        let mut rng = StdRng::seed_from_u64(13);
        patterns.extend((0..100_000).map(|_| rng.gen::<u64>()));
        for bits in patterns {
            let v = f64::from_bits(bits);
            let mut w = CompressedWriteStream::new();
            w.write_double(v);
            let bytes = w.into_bytes();
            let mut r = CompressedReadStream::new(&bytes);
            assert_eq!(r.read_double().to_bits(), bits);
        }
    }

    #[test]
    fn round_values_encode_short() {
        // The raison d'etre of the bit reversal: 1.0f64 is 2 bytes, not 10.
        let mut w = CompressedWriteStream::new();
        w.write_double(1.0);
        assert!(w.position() <= 3, "1.0 took {} bytes", w.position());
    }

    /// Mixed-stream stress test: interleave every value kind, then re-read the
    /// whole stream and require byte-exact agreement at every step. A mismatch
    /// reports the failing step and both values.
    #[test]
    fn stress() {
        #[derive(Clone, Copy, Debug, PartialEq)]
        enum Val {
            U(u32),
            S(i32),
            L(i64),
            F(u32),
            D(u64),
            B(bool),
        }

        let mut rng = StdRng::seed_from_u64(0xc0dec);
        let mut w = CompressedWriteStream::new();
        let mut written = Vec::new();
        let mut positions = Vec::new();
        for step in 0..50_000 {
            positions.push(w.position());
            let v = match step % 6 {
                0 => Val::U(rng.gen()),
                1 => Val::S(rng.gen()),
                2 => Val::L(rng.gen()),
                3 => Val::F(rng.gen()),
                4 => Val::D(rng.gen()),
                _ => Val::B(rng.gen()),
            };
            match v {
                Val::U(x) => w.write_int(x),
                Val::S(x) => w.write_signed_int(x),
                Val::L(x) => w.write_long(x),
                Val::F(x) => w.write_float(f32::from_bits(x)),
                Val::D(x) => w.write_double(f64::from_bits(x)),
                Val::B(x) => w.write_bool(x),
            }
            written.push(v);
        }
        let final_len = w.position();
        let bytes = w.into_bytes();
        let mut r = CompressedReadStream::new(&bytes);
        for (step, v) in written.iter().enumerate() {
            assert_eq!(
                r.position(),
                positions[step],
                "step {step}: reader out of sync"
            );
            let got = match v {
                Val::U(_) => Val::U(r.read_int()),
                Val::S(_) => Val::S(r.read_signed_int()),
                Val::L(_) => Val::L(r.read_long()),
                Val::F(_) => Val::F(r.read_float().to_bits()),
                Val::D(_) => Val::D(r.read_double().to_bits()),
                Val::B(_) => Val::B(r.read_bool()),
            };
            assert_eq!(got, *v, "step {step}: wrote {v:?}, read back {got:?}");
        }
        assert_eq!(r.position(), final_len, "final lengths differ");
    }
}
