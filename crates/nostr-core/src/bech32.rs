//! 5-bit segwit-style address encoding with a human-readable prefix.
//!
//! Implements both the original Bech32 checksum (BIP-173) and its Bech32m
//! variant (BIP-350), distinguished only by the constant XOR'd into the
//! checksum polynomial. Used here for `npub`/`nsec` key encodings, but the
//! codec itself carries no Nostr-specific knowledge.

use crate::error::{NostrError, Result};

const CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const BECH32_CONST: u32 = 1;
const BECH32M_CONST: u32 = 0x2bc8_30a3;
const MAX_LENGTH: usize = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Bech32,
    Bech32m,
}

impl Variant {
    fn const_value(self) -> u32 {
        match self {
            Variant::Bech32 => BECH32_CONST,
            Variant::Bech32m => BECH32M_CONST,
        }
    }

    fn from_checksum_const(value: u32) -> Option<Self> {
        if value == BECH32_CONST {
            Some(Variant::Bech32)
        } else if value == BECH32M_CONST {
            Some(Variant::Bech32m)
        } else {
            None
        }
    }
}

fn polymod(values: &[u8]) -> u32 {
    const GEN: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];
    let mut chk: u32 = 1;
    for &v in values {
        let top = chk >> 25;
        chk = ((chk & 0x01ff_ffff) << 5) ^ (v as u32);
        for (i, g) in GEN.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(hrp.len() * 2 + 1);
    v.extend(hrp.bytes().map(|b| b >> 5));
    v.push(0);
    v.extend(hrp.bytes().map(|b| b & 31));
    v
}

fn create_checksum(hrp: &str, data: &[u8], variant: Variant) -> Vec<u8> {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0u8; 6]);
    let polymod_value = polymod(&values) ^ variant.const_value();
    (0..6)
        .map(|i| ((polymod_value >> (5 * (5 - i))) & 31) as u8)
        .collect()
}

fn verify_checksum(hrp: &str, data: &[u8]) -> Option<Variant> {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    Variant::from_checksum_const(polymod(&values))
}

/// Regroups bits between an 8-bit and a 5-bit alphabet (or vice versa).
///
/// `pad` controls whether an incomplete trailing group is zero-padded
/// (required when going 8→5) or must be all-zero and dropped (8→5 inverse).
pub fn convert_bits(data: &[u8], from_bits: u32, to_bits: u32, pad: bool) -> Result<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let maxv: u32 = (1 << to_bits) - 1;
    let max_acc: u32 = (1 << (from_bits + to_bits - 1)) - 1;
    let mut ret = Vec::new();

    for &value in data {
        let value = value as u32;
        if (value >> from_bits) != 0 {
            return Err(NostrError::MalformedAddress(
                "input value exceeds from_bits width".into(),
            ));
        }
        acc = ((acc << from_bits) | value) & max_acc;
        bits += from_bits;
        while bits >= to_bits {
            bits -= to_bits;
            ret.push(((acc >> bits) & maxv) as u8);
        }
    }

    if pad {
        if bits > 0 {
            ret.push(((acc << (to_bits - bits)) & maxv) as u8);
        }
    } else if bits >= from_bits || ((acc << (to_bits - bits)) & maxv) != 0 {
        return Err(NostrError::MalformedAddress(
            "non-zero padding in bit regroup".into(),
        ));
    }

    Ok(ret)
}

/// Encodes `data` (already regrouped into 5-bit values by the caller is NOT
/// required — pass raw 8-bit bytes and this function performs the 8→5
/// regroup itself) under `hrp` with the requested checksum variant.
pub fn encode(hrp: &str, data: &[u8], variant: Variant) -> Result<String> {
    let five_bit = convert_bits(data, 8, 5, true)?;
    encode_5bit(hrp, &five_bit, variant, false)
}

/// Encodes already 5-bit-grouped data. Set `allow_long` to bypass the 90
/// character length cap for payloads the caller knows are oversized on
/// purpose (e.g. `nevent`/`naddr` TLV records), matching §4.1's waiver.
pub fn encode_5bit(hrp: &str, data_5bit: &[u8], variant: Variant, allow_long: bool) -> Result<String> {
    if hrp.is_empty() {
        return Err(NostrError::MalformedAddress("empty human-readable part".into()));
    }
    if hrp.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(NostrError::MalformedAddress("hrp must be lowercase".into()));
    }
    let checksum = create_checksum(hrp, data_5bit, variant);
    let mut combined = data_5bit.to_vec();
    combined.extend_from_slice(&checksum);

    let mut out = String::with_capacity(hrp.len() + 1 + combined.len());
    out.push_str(hrp);
    out.push('1');
    for &b in &combined {
        out.push(CHARSET[b as usize] as char);
    }

    if !allow_long && out.len() > MAX_LENGTH {
        return Err(NostrError::MalformedAddress(format!(
            "encoded length {} exceeds {} character limit",
            out.len(),
            MAX_LENGTH
        )));
    }

    Ok(out)
}

/// Decodes a bech32/bech32m string into `(hrp, raw_bytes, variant)`, undoing
/// the 5→8 bit regroup. Set `allow_long` to waive the 90 character cap.
pub fn decode(s: &str, allow_long: bool) -> Result<(String, Vec<u8>, Variant)> {
    if !allow_long && s.len() > MAX_LENGTH {
        return Err(NostrError::MalformedAddress(format!(
            "length {} exceeds {} character limit",
            s.len(),
            MAX_LENGTH
        )));
    }

    let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(NostrError::MalformedAddress("mixed case".into()));
    }

    let s_lower = s.to_ascii_lowercase();
    let sep_pos = s_lower
        .rfind('1')
        .ok_or_else(|| NostrError::MalformedAddress("missing separator '1'".into()))?;
    if sep_pos == 0 || sep_pos + 7 > s_lower.len() {
        return Err(NostrError::MalformedAddress(
            "separator position leaves no room for hrp/checksum".into(),
        ));
    }

    let hrp = &s_lower[..sep_pos];
    let data_part = &s_lower[sep_pos + 1..];

    let mut data = Vec::with_capacity(data_part.len());
    for c in data_part.chars() {
        let pos = CHARSET
            .iter()
            .position(|&x| x as char == c)
            .ok_or_else(|| NostrError::MalformedAddress(format!("character '{c}' outside alphabet")))?;
        data.push(pos as u8);
    }

    let variant = verify_checksum(hrp, &data)
        .ok_or_else(|| NostrError::MalformedAddress("checksum verification failed".into()))?;

    let payload = &data[..data.len() - 6];
    let raw = convert_bits(payload, 5, 8, false)?;

    Ok((hrp.to_string(), raw, variant))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npub_round_trip() {
        let npub = "npub1mg2nzunrsk9df94zr3uudhzltnu6lzq2muax09xmhu5gxxrvnkqsvpjg3p";
        let (hrp, raw, variant) = decode(npub, false).unwrap();
        assert_eq!(hrp, "npub");
        assert_eq!(raw.len(), 32);
        assert_eq!(variant, Variant::Bech32);
        let re_encoded = encode(&hrp, &raw, variant).unwrap();
        assert_eq!(re_encoded, npub);
    }

    #[test]
    fn test_encode_decode_arbitrary_payload() {
        let raw = [0u8; 32];
        let encoded = encode("nsec", &raw, Variant::Bech32).unwrap();
        assert!(encoded.starts_with("nsec1"));
        let (hrp, decoded, variant) = decode(&encoded, false).unwrap();
        assert_eq!(hrp, "nsec");
        assert_eq!(decoded, raw);
        assert_eq!(variant, Variant::Bech32);
    }

    #[test]
    fn test_mixed_case_rejected() {
        let npub = "npub1mg2nzunrsk9df94zr3uudhzltnu6lzq2muax09xmhu5gxxrvnkqsvpjg3p";
        let mut chars: Vec<char> = npub.chars().collect();
        // Flip one data character to uppercase without touching the separator.
        let idx = chars.iter().position(|c| c.is_ascii_alphabetic()).unwrap();
        chars[idx] = chars[idx].to_ascii_uppercase();
        let mixed: String = chars.into_iter().collect();
        assert!(matches!(decode(&mixed, false), Err(NostrError::MalformedAddress(_))));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut npub = "npub1mg2nzunrsk9df94zr3uudhzltnu6lzq2muax09xmhu5gxxrvnkqsvpjg3p".to_string();
        npub.pop();
        npub.push(if npub.ends_with('p') { 'q' } else { 'p' });
        assert!(decode(&npub, false).is_err());
    }

    #[test]
    fn test_invalid_character_rejected() {
        let bad = "npub1mg2nzunrsk9df94zr3uudhzltnu6lzq2muax09xmhu5gxxrvnkqsvpjgbb";
        // 'b' is outside the bech32 charset.
        assert!(matches!(decode(bad, false), Err(NostrError::MalformedAddress(_))));
    }

    #[test]
    fn test_over_length_rejected_without_waiver() {
        let long_hrp = "n";
        let long_data = vec![1u8; 200];
        let err = encode(long_hrp, &long_data, Variant::Bech32).unwrap_err();
        assert!(matches!(err, NostrError::MalformedAddress(_)));
    }

    #[test]
    fn test_bech32m_variant_distinguished() {
        let raw = [7u8; 32];
        let a = encode("test", &raw, Variant::Bech32).unwrap();
        let b = encode("test", &raw, Variant::Bech32m).unwrap();
        assert_ne!(a, b);
        let (_, _, va) = decode(&a, false).unwrap();
        let (_, _, vb) = decode(&b, false).unwrap();
        assert_eq!(va, Variant::Bech32);
        assert_eq!(vb, Variant::Bech32m);
    }
}
