//! Lossy one-byte encoding of document length.
//!
//! Lengths below 24 are stored exactly. Larger lengths keep the top four
//! significant bits (a hidden leading one plus three mantissa bits) and a
//! five-bit exponent, so decoding is within 1/8 of the true value and
//! never larger than it.

const NUM_FREE_VALUES: u32 = 24;

pub const MAX_FIELD_NORM: u32 = 2_013_265_944;

static FIELD_NORMS_TABLE: [u32; 256] = build_table();

const fn long_to_int4(i: u32) -> u32 {
    let num_bits = u32::BITS - i.leading_zeros();
    if num_bits < 4 {
        i
    } else {
        let shift = num_bits - 4;
        let encoded = (i >> shift) & 0x07;
        encoded | ((shift + 1) << 3)
    }
}

const fn int4_to_long(i: u32) -> u32 {
    let bits = i & 0x07;
    let shift = i >> 3;
    if shift == 0 {
        bits
    } else {
        (bits | 0x08) << (shift - 1)
    }
}

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut id = 0;
    while id < 256 {
        table[id] = if (id as u32) < NUM_FREE_VALUES {
            id as u32
        } else {
            NUM_FREE_VALUES + int4_to_long(id as u32 - NUM_FREE_VALUES)
        };
        id += 1;
    }
    table
}

#[inline]
pub fn fieldnorm_to_id(len: u32) -> u8 {
    if len < NUM_FREE_VALUES {
        return len as u8;
    }
    let encoded = NUM_FREE_VALUES + long_to_int4(len - NUM_FREE_VALUES);
    encoded.min(u8::MAX as u32) as u8
}

#[inline]
pub fn id_to_fieldnorm(id: u8) -> u32 {
    FIELD_NORMS_TABLE[id as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_are_exact() {
        for len in 0..NUM_FREE_VALUES {
            assert_eq!(id_to_fieldnorm(fieldnorm_to_id(len)), len);
        }
    }

    #[test]
    fn test_table_matches_packing_rule() {
        for id in 0..=255u8 {
            assert_eq!(fieldnorm_to_id(id_to_fieldnorm(id)), id);
        }
        assert_eq!(id_to_fieldnorm(255), MAX_FIELD_NORM);
        assert_eq!(fieldnorm_to_id(u32::MAX), 255);
    }

    #[test]
    fn test_monotonic_and_bounded() {
        let mut last = 0;
        for len in 0..200_000u32 {
            let decoded = id_to_fieldnorm(fieldnorm_to_id(len));
            assert!(decoded >= last, "len {len} decoded {decoded} < {last}");
            assert!(decoded <= len);
            if len >= 24 {
                let err = (len - decoded) as f64 / len as f64;
                assert!(err <= 0.125, "len {len} decoded {decoded}");
            }
            last = decoded;
        }
    }

    #[test]
    fn test_typical_lengths_within_few_percent() {
        for len in [30u32, 100, 250, 1000] {
            let decoded = id_to_fieldnorm(fieldnorm_to_id(len));
            let err = (len - decoded) as f64 / len as f64;
            assert!(err < 0.1, "len {len} decoded {decoded}");
        }
    }
}
