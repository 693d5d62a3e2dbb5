use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom};

use super::header::{decode_text, expect_tag, read_bytes, read_uint, skip, ByteOrder, Layout};
use super::DtaError;

/// GSO type byte for NUL-terminated text; 129 marks binary content.
const GSO_ASCII: u64 = 130;

/// Looks up the long strings referenced by `wanted` in the `<strls>` section.
pub(super) fn read_strls<R: Read + Seek>(
    input: &mut R,
    layout: &Layout,
    wanted: &HashSet<(u64, u64)>,
) -> Result<HashMap<(u64, u64), String>, DtaError> {
    let mut found = HashMap::new();
    let offset = match layout.strls_offset {
        Some(offset) if !wanted.is_empty() => offset,
        _ => return Ok(found),
    };

    input.seek(SeekFrom::Start(offset))?;
    expect_tag(input, "<strls>")?;
    let order = layout.order;
    let o_len = if layout.release == 117 { 4 } else { 8 };

    while read_bytes(input, 3)? == b"GSO" {
        let v = read_uint(input, order, 4)?;
        let o = read_uint(input, order, o_len)?;
        let kind = read_uint(input, order, 1)?;
        let len = read_uint(input, order, 4)?;

        if !wanted.contains(&(v, o)) {
            skip(input, len)?;
            continue;
        }
        let bytes = read_bytes(input, len as usize)?;
        let text = if kind == GSO_ASCII {
            decode_text(&bytes, layout.release)
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };
        found.insert((v, o), text);
        if found.len() == wanted.len() {
            break;
        }
    }

    Ok(found)
}

pub(super) type LabelTable = HashMap<i32, String>;

/// Reads the value label tables named in `wanted`; others are skipped.
pub(super) fn read_value_labels<R: Read + Seek>(
    input: &mut R,
    layout: &Layout,
    wanted: &HashSet<&str>,
) -> Result<HashMap<String, LabelTable>, DtaError> {
    let mut tables = HashMap::new();
    if wanted.is_empty() {
        return Ok(tables);
    }

    let end = input.seek(SeekFrom::End(0))?;
    input.seek(SeekFrom::Start(layout.value_labels_offset))?;
    let tagged = layout.release >= 117;
    if tagged {
        expect_tag(input, "<value_labels>")?;
    }

    loop {
        if tagged {
            if read_bytes(input, 5)? != b"<lbl>" {
                break;
            }
        } else if input.stream_position()? >= end {
            break;
        }

        let len = read_uint(input, layout.order, 4)?;
        let name = decode_text(&read_bytes(input, layout.name_len())?, layout.release);
        skip(input, 3)?;
        if wanted.contains(name.as_str()) {
            let table = read_bytes(input, len as usize)?;
            tables.insert(name, parse_table(&table, layout.order, layout.release)?);
        } else {
            skip(input, len)?;
        }
        if tagged {
            expect_tag(input, "</lbl>")?;
        }
    }

    Ok(tables)
}

/// Layout: count, text length, `count` text offsets, `count` values, text.
fn parse_table(table: &[u8], order: ByteOrder, release: u8) -> Result<LabelTable, DtaError> {
    let field = |at: usize| {
        table
            .get(at..at + 4)
            .map(|bytes| order.uint(bytes))
            .ok_or_else(|| DtaError::Malformed("truncated value label table".to_string()))
    };

    let count = field(0)? as usize;
    let text_len = field(4)? as usize;
    let text_start = 8 + 8 * count;
    let text = table
        .get(text_start..text_start + text_len)
        .ok_or_else(|| DtaError::Malformed("truncated value label text".to_string()))?;

    let mut labels = HashMap::with_capacity(count);
    for i in 0..count {
        let offset = field(8 + 4 * i)? as usize;
        let value = field(8 + 4 * count + 4 * i)? as u32 as i32;
        let label = text
            .get(offset..)
            .map(|rest| decode_text(rest, release))
            .unwrap_or_default();
        labels.insert(value, label);
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_label_table() {
        let mut table = Vec::new();
        table.extend_from_slice(&2i32.to_le_bytes());
        table.extend_from_slice(&8i32.to_le_bytes());
        table.extend_from_slice(&0i32.to_le_bytes());
        table.extend_from_slice(&4i32.to_le_bytes());
        table.extend_from_slice(&1i32.to_le_bytes());
        table.extend_from_slice(&(-2i32).to_le_bytes());
        table.extend_from_slice(b"yes\0no\0\0");

        let labels = parse_table(&table, ByteOrder::Little, 118).unwrap();

        assert_eq!(labels.get(&1).map(String::as_str), Some("yes"));
        assert_eq!(labels.get(&-2).map(String::as_str), Some("no"));
    }

    #[test]
    fn truncated_table_is_malformed() {
        let table = 5i32.to_le_bytes();
        assert!(parse_table(&table, ByteOrder::Little, 118).is_err());
    }
}
