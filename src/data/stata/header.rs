use std::io::{Read, Seek, SeekFrom};

use super::DtaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// Reads an unsigned integer of `bytes.len()` bytes (at most 8).
    pub(super) fn uint(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::Big => bytes.iter().fold(0, |acc, &b| (acc << 8) | u64::from(b)),
            ByteOrder::Little => bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | u64::from(b)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum VarType {
    Str(usize),
    StrL,
    Byte,
    Int,
    Long,
    Float,
    Double,
}

impl VarType {
    /// Bytes the variable takes in each data row.
    pub(super) fn width(self) -> usize {
        match self {
            VarType::Str(len) => len,
            VarType::StrL | VarType::Double => 8,
            VarType::Long | VarType::Float => 4,
            VarType::Int => 2,
            VarType::Byte => 1,
        }
    }

    fn from_tagged(code: u64) -> Result<Self, DtaError> {
        match code {
            1..=2045 => Ok(VarType::Str(code as usize)),
            32768 => Ok(VarType::StrL),
            65526 => Ok(VarType::Double),
            65527 => Ok(VarType::Float),
            65528 => Ok(VarType::Long),
            65529 => Ok(VarType::Int),
            65530 => Ok(VarType::Byte),
            other => Err(DtaError::Malformed(format!("unknown variable type {other}"))),
        }
    }

    fn from_legacy(code: u8) -> Result<Self, DtaError> {
        match code {
            1..=244 => Ok(VarType::Str(usize::from(code))),
            251 => Ok(VarType::Byte),
            252 => Ok(VarType::Int),
            253 => Ok(VarType::Long),
            254 => Ok(VarType::Float),
            255 => Ok(VarType::Double),
            other => Err(DtaError::Malformed(format!("unknown variable type {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Variable {
    pub name: String,
    pub kind: VarType,
    pub format: String,
    /// Name of the value label table, empty when none is attached.
    pub value_label: String,
}

/// Everything needed to walk the data rows and the sections after them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Layout {
    pub release: u8,
    pub order: ByteOrder,
    pub nobs: u64,
    pub variables: Vec<Variable>,
    pub data_offset: u64,
    pub strls_offset: Option<u64>,
    pub value_labels_offset: u64,
}

impl Layout {
    pub(super) fn read<R: Read + Seek>(input: &mut R) -> Result<Self, DtaError> {
        let mut first = [0u8; 1];
        input.read_exact(&mut first)?;
        input.seek(SeekFrom::Start(0))?;
        let layout = if first[0] == b'<' {
            Self::read_tagged(input)?
        } else {
            Self::read_legacy(input)?
        };

        // Zero-width rows would otherwise be scanned one by one.
        if layout.variables.is_empty() && layout.nobs > 0 {
            return Err(DtaError::Malformed(format!(
                "{} observations but no variables",
                layout.nobs
            )));
        }
        Ok(layout)
    }

    pub(super) fn row_len(&self) -> usize {
        self.variables.iter().map(|var| var.kind.width()).sum()
    }

    pub(super) fn names(&self) -> Vec<String> {
        self.variables.iter().map(|var| var.name.clone()).collect()
    }

    /// Width of variable and value label names.
    pub(super) fn name_len(&self) -> usize {
        if self.release >= 118 {
            129
        } else {
            33
        }
    }

    /// Releases 117 and later, with `<tag>` delimited sections.
    fn read_tagged<R: Read + Seek>(input: &mut R) -> Result<Self, DtaError> {
        expect_tag(input, "<stata_dta><header><release>")?;
        let release = match read_bytes(input, 3)?.as_slice() {
            b"117" => 117,
            b"118" => 118,
            b"119" => 119,
            other => {
                return Err(DtaError::Malformed(format!(
                    "unsupported release {}",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        expect_tag(input, "</release><byteorder>")?;
        let order = match read_bytes(input, 3)?.as_slice() {
            b"MSF" => ByteOrder::Big,
            b"LSF" => ByteOrder::Little,
            _ => return Err(DtaError::Malformed("unknown byte order".to_string())),
        };

        expect_tag(input, "</byteorder><K>")?;
        let nvar = read_uint(input, order, if release == 119 { 4 } else { 2 })? as usize;
        expect_tag(input, "</K><N>")?;
        let nobs = read_uint(input, order, if release == 117 { 4 } else { 8 })?;
        expect_tag(input, "</N><label>")?;
        let label_len = read_uint(input, order, if release == 117 { 1 } else { 2 })?;
        skip(input, label_len)?;
        expect_tag(input, "</label><timestamp>")?;
        let stamp_len = read_uint(input, order, 1)?;
        skip(input, stamp_len)?;
        expect_tag(input, "</timestamp></header><map>")?;

        let mut map = [0u64; 14];
        for slot in map.iter_mut() {
            *slot = read_uint(input, order, 8)?;
        }

        let (name_len, format_len) = if release == 117 { (33, 49) } else { (129, 57) };

        input.seek(SeekFrom::Start(map[2]))?;
        expect_tag(input, "<variable_types>")?;
        let mut kinds = Vec::with_capacity(nvar);
        for _ in 0..nvar {
            kinds.push(VarType::from_tagged(read_uint(input, order, 2)?)?);
        }

        input.seek(SeekFrom::Start(map[3]))?;
        expect_tag(input, "<varnames>")?;
        let names = read_texts(input, nvar, name_len, release)?;

        input.seek(SeekFrom::Start(map[5]))?;
        expect_tag(input, "<formats>")?;
        let formats = read_texts(input, nvar, format_len, release)?;

        input.seek(SeekFrom::Start(map[6]))?;
        expect_tag(input, "<value_label_names>")?;
        let value_labels = read_texts(input, nvar, name_len, release)?;

        input.seek(SeekFrom::Start(map[9]))?;
        expect_tag(input, "<data>")?;
        let data_offset = input.stream_position()?;

        Ok(Layout {
            release,
            order,
            nobs,
            variables: zip_variables(names, kinds, formats, value_labels),
            data_offset,
            strls_offset: Some(map[10]),
            value_labels_offset: map[11],
        })
    }

    /// Releases 113 to 115, with a fixed binary header.
    fn read_legacy<R: Read + Seek>(input: &mut R) -> Result<Self, DtaError> {
        let head = read_bytes(input, 4)?;
        let release = head[0];
        if !(113..=115).contains(&release) {
            return Err(DtaError::Malformed(format!("unsupported release {release}")));
        }
        let order = match head[1] {
            1 => ByteOrder::Big,
            2 => ByteOrder::Little,
            other => return Err(DtaError::Malformed(format!("unknown byte order {other}"))),
        };

        let nvar = read_uint(input, order, 2)? as usize;
        let nobs = read_uint(input, order, 4)?;
        // Data label and timestamp.
        skip(input, 81 + 18)?;

        let mut kinds = Vec::with_capacity(nvar);
        for code in read_bytes(input, nvar)? {
            kinds.push(VarType::from_legacy(code)?);
        }
        let names = read_texts(input, nvar, 33, release)?;
        // Sort list.
        skip(input, 2 * (nvar as u64 + 1))?;
        let format_len = if release == 113 { 12 } else { 49 };
        let formats = read_texts(input, nvar, format_len, release)?;
        let value_labels = read_texts(input, nvar, 33, release)?;
        // Variable labels.
        skip(input, 81 * nvar as u64)?;

        // Expansion fields, terminated by a zero type and zero length.
        loop {
            let kind = read_uint(input, order, 1)?;
            let len = read_uint(input, order, 4)?;
            if kind == 0 && len == 0 {
                break;
            }
            skip(input, len)?;
        }

        let data_offset = input.stream_position()?;
        let variables = zip_variables(names, kinds, formats, value_labels);
        let row_len: u64 = variables.iter().map(|var| var.kind.width() as u64).sum();

        Ok(Layout {
            release,
            order,
            nobs,
            variables,
            data_offset,
            strls_offset: None,
            value_labels_offset: data_offset + nobs * row_len,
        })
    }
}

fn zip_variables(
    names: Vec<String>,
    kinds: Vec<VarType>,
    formats: Vec<String>,
    value_labels: Vec<String>,
) -> Vec<Variable> {
    names
        .into_iter()
        .zip(kinds)
        .zip(formats.into_iter().zip(value_labels))
        .map(|((name, kind), (format, value_label))| Variable {
            name,
            kind,
            format,
            value_label,
        })
        .collect()
}

/// Decodes a NUL-terminated string field. Release 118 onward is UTF-8;
/// earlier releases are Latin-1.
pub(super) fn decode_text(bytes: &[u8], release: u8) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end];
    if release >= 118 {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        bytes.iter().map(|&b| char::from(b)).collect()
    }
}

pub(super) fn read_bytes<R: Read>(input: &mut R, len: usize) -> Result<Vec<u8>, DtaError> {
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

pub(super) fn read_uint<R: Read>(
    input: &mut R,
    order: ByteOrder,
    len: usize,
) -> Result<u64, DtaError> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf[..len])?;
    Ok(order.uint(&buf[..len]))
}

pub(super) fn expect_tag<R: Read>(input: &mut R, tag: &str) -> Result<(), DtaError> {
    if read_bytes(input, tag.len())? != tag.as_bytes() {
        return Err(DtaError::Malformed(format!("expected {tag}")));
    }
    Ok(())
}

pub(super) fn skip<R: Seek>(input: &mut R, len: u64) -> Result<(), DtaError> {
    input.seek(SeekFrom::Current(len as i64))?;
    Ok(())
}

fn read_texts<R: Read>(
    input: &mut R,
    count: usize,
    width: usize,
    release: u8,
) -> Result<Vec<String>, DtaError> {
    let mut texts = Vec::with_capacity(count);
    for _ in 0..count {
        texts.push(decode_text(&read_bytes(input, width)?, release));
    }
    Ok(texts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_both_byte_orders() {
        assert_eq!(ByteOrder::Little.uint(&[0x01, 0x02]), 0x0201);
        assert_eq!(ByteOrder::Big.uint(&[0x01, 0x02]), 0x0102);
        assert_eq!(ByteOrder::Little.uint(&[0, 0, 0, 0, 0, 1]), 1 << 40);
    }

    #[test]
    fn decodes_text_up_to_nul() {
        assert_eq!(decode_text(b"abc\0junk", 118), "abc");
        assert_eq!(decode_text(b"caf\xe9\0", 114), "caf\u{e9}");
        assert_eq!(decode_text("café".as_bytes(), 118), "café");
    }

    #[test]
    fn empty_variable_list_needs_empty_data() {
        let header = |nobs: u32| {
            let mut out = vec![115u8, 2, 1, 0];
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&nobs.to_le_bytes());
            out.extend_from_slice(&[0u8; 81 + 18 + 2 + 5]);
            std::io::Cursor::new(out)
        };

        let layout = Layout::read(&mut header(0)).unwrap();
        assert_eq!(layout.row_len(), 0);
        assert!(matches!(
            Layout::read(&mut header(1_000_000)),
            Err(DtaError::Malformed(_))
        ));
    }

    #[test]
    fn maps_type_codes() {
        assert_eq!(VarType::from_tagged(65530).unwrap(), VarType::Byte);
        assert_eq!(VarType::from_tagged(12).unwrap(), VarType::Str(12));
        assert_eq!(VarType::from_legacy(254).unwrap(), VarType::Float);
        assert!(VarType::from_legacy(250).is_err());
        assert_eq!(VarType::StrL.width(), 8);
    }
}
