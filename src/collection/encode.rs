//! Byte-level encodings used inside a `collection-contigs` / `collection-details`
//! batch, kept separate from the batch bookkeeping in [`super`].

use crate::varint::{zigzag_decode, zigzag_encode};
use std::io::{self, Read, Write};

/// Field marker: this field is byte-identical to the same field of the
/// previous contig's name. No payload follows.
const SAME_FIELD: u8 = 0x00;
/// Field marker: the field differs; a `<varint len>` followed by that many
/// bytes of run tokens follows.
const DIFFERENT_FIELD: u8 = 0x01;
/// Introduces a literal run within a differing field: `LITERAL_RUN, <varint len>, <bytes>`.
const LITERAL_RUN: u8 = 0x02;
/// Introduces a copy run within a differing field: `COPY_RUN, <varint n>`
/// meaning "copy n bytes from the same offset of the previous field".
const COPY_RUN: u8 = 0x03;

/// Splits a contig name into space-delimited fields, matching the reference
/// tokenization used for name delta-compression.
fn split_fields(name: &str) -> Vec<&str> {
    name.split(' ').collect()
}

/// Encodes `name` against `prev` (the previous contig's name in the same
/// sample, or `""` for the first contig), writing the delta-coded bytes to
/// `out`.
pub fn encode_contig_name<W: Write>(out: &mut W, name: &str, prev: &str) -> io::Result<()> {
    let fields = split_fields(name);
    let prev_fields = split_fields(prev);

    crate::varint::write_varint(out, fields.len() as u64)?;
    for (i, field) in fields.iter().enumerate() {
        let prev_field = prev_fields.get(i).copied().unwrap_or("");
        if *field == prev_field && !field.is_empty() {
            out.write_all(&[SAME_FIELD])?;
            continue;
        }
        out.write_all(&[DIFFERENT_FIELD])?;
        encode_field(out, field.as_bytes(), prev_field.as_bytes())?;
    }
    Ok(())
}

/// Encodes one differing field as a length-prefixed run-token stream: a
/// mix of literal runs and copy-from-previous runs. Uses a simple greedy
/// longest-common-run-at-offset scheme: while bytes at the current offset
/// match `prev`, extend a copy run; otherwise extend a literal run until
/// they match again.
fn encode_field<W: Write>(out: &mut W, field: &[u8], prev: &[u8]) -> io::Result<()> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < field.len() {
        if i < prev.len() && field[i] == prev[i] {
            let start = i;
            while i < field.len() && i < prev.len() && field[i] == prev[i] {
                i += 1;
            }
            tokens.push(COPY_RUN);
            crate::varint::write_varint(&mut tokens, (i - start) as u64)?;
        } else {
            let start = i;
            while i < field.len() && !(i < prev.len() && field[i] == prev[i]) {
                i += 1;
            }
            tokens.push(LITERAL_RUN);
            crate::varint::write_varint(&mut tokens, (i - start) as u64)?;
            tokens.extend_from_slice(&field[start..i]);
        }
    }

    crate::varint::write_varint(out, field.len() as u64)?;
    crate::varint::write_varint(out, tokens.len() as u64)?;
    out.write_all(&tokens)?;
    Ok(())
}

/// Inverse of [`encode_contig_name`].
pub fn decode_contig_name<R: Read>(r: &mut R, prev: &str) -> io::Result<String> {
    let prev_fields = split_fields(prev);
    let field_count = crate::varint::read_varint(r)?;

    let mut fields = Vec::with_capacity(field_count as usize);
    for i in 0..field_count {
        let prev_field = prev_fields.get(i as usize).copied().unwrap_or("");

        let mut marker = [0u8; 1];
        r.read_exact(&mut marker)?;
        if marker[0] == SAME_FIELD {
            fields.push(prev_field.to_owned());
            continue;
        }
        if marker[0] != DIFFERENT_FIELD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected contig-name field marker {}", marker[0]),
            ));
        }

        let field_len = crate::varint::read_varint(r)? as usize;
        let token_len = crate::varint::read_varint(r)? as usize;
        let mut token_buf = vec![0u8; token_len];
        r.read_exact(&mut token_buf)?;
        let mut tokens = &token_buf[..];

        let mut buf = vec![0u8; field_len];
        let mut written = 0usize;
        while written < buf.len() {
            let mut tok = [0u8; 1];
            (&mut tokens).read_exact(&mut tok)?;
            match tok[0] {
                COPY_RUN => {
                    let n = crate::varint::read_varint(&mut tokens)? as usize;
                    let src = prev_field.as_bytes();
                    buf[written..written + n].copy_from_slice(&src[written..written + n]);
                    written += n;
                }
                LITERAL_RUN => {
                    let n = crate::varint::read_varint(&mut tokens)? as usize;
                    (&mut tokens).read_exact(&mut buf[written..written + n])?;
                    written += n;
                }
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unexpected contig-name token byte {other}"),
                    ))
                }
            }
        }
        fields.push(String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?);
    }

    Ok(fields.join(" "))
}

/// Escape-coded delta of `in_group_id` against `predecessor` (the last
/// `in_group_id` seen for the same `group_id`, or `None` for the first
/// segment placed in that group): `0` = zero, `1` = predecessor+1, else
/// `zigzag(value - (predecessor+1)) + 1` shifted by one more escape slot.
pub fn encode_in_group_delta(value: u64, predecessor: Option<u64>) -> u64 {
    if value == 0 {
        return 0;
    }
    if let Some(pred) = predecessor {
        if value == pred + 1 {
            return 1;
        }
        let diff = value as i64 - (pred as i64 + 1);
        return zigzag_encode(diff) + 1;
    }
    zigzag_encode(value as i64) + 1
}

/// Inverse of [`encode_in_group_delta`].
pub fn decode_in_group_delta(code: u64, predecessor: Option<u64>) -> u64 {
    if code == 0 {
        return 0;
    }
    if code == 1 {
        return predecessor.map(|p| p + 1).unwrap_or(1);
    }
    let diff = zigzag_decode(code - 1);
    match predecessor {
        Some(pred) => (pred as i64 + 1 + diff) as u64,
        None => diff as u64,
    }
}

/// Zigzag-against-predictor encoding for `raw_length`, predictor is
/// `segment_size + k`.
pub fn encode_raw_length(raw_length: u64, predictor: u64) -> u64 {
    zigzag_encode(raw_length as i64 - predictor as i64)
}

/// Inverse of [`encode_raw_length`].
pub fn decode_raw_length(code: u64, predictor: u64) -> u64 {
    (predictor as i64 + zigzag_decode(code)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contig_name_round_trip_identical_prefix() {
        let prev = "chr1 len=1000 note=foo";
        let name = "chr1 len=1000 note=bar";
        let mut buf = Vec::new();
        encode_contig_name(&mut buf, name, prev).unwrap();
        let mut cursor = &buf[..];
        let decoded = decode_contig_name(&mut cursor, prev).unwrap();
        assert_eq!(decoded, name);
    }

    #[test]
    fn contig_name_round_trip_no_previous() {
        let name = "scaffold_0001 length=500";
        let mut buf = Vec::new();
        encode_contig_name(&mut buf, name, "").unwrap();
        let mut cursor = &buf[..];
        let decoded = decode_contig_name(&mut cursor, "").unwrap();
        assert_eq!(decoded, name);
    }

    #[test]
    fn contig_name_round_trip_totally_different() {
        let prev = "abc";
        let name = "xyz123";
        let mut buf = Vec::new();
        encode_contig_name(&mut buf, name, prev).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(decode_contig_name(&mut cursor, prev).unwrap(), name);
    }

    #[test]
    fn in_group_delta_round_trip() {
        let cases: &[(u64, Option<u64>)] = &[(0, None), (5, Some(4)), (3, Some(10)), (100, None)];
        for &(value, pred) in cases {
            let code = encode_in_group_delta(value, pred);
            assert_eq!(decode_in_group_delta(code, pred), value);
        }
    }

    #[test]
    fn raw_length_round_trip() {
        let predictor = 1017;
        for raw in [0u64, 1, 1017, 1018, 5000] {
            let code = encode_raw_length(raw, predictor);
            assert_eq!(decode_raw_length(code, predictor), raw);
        }
    }
}
