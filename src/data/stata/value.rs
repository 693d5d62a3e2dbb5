use chrono::{Duration, NaiveDate};

use super::header::{decode_text, Layout, VarType};

/// Largest non-missing values per storage type.
const BYTE_MAX: i8 = 100;
const INT_MAX: i16 = 32_740;
const LONG_MAX: i32 = 2_147_483_620;
/// `.` for floats is 2^127 and for doubles 2^1023; the lettered missing
/// values sit above it.
const FLOAT_MISSING_BITS: u32 = 0x7f00_0000;
const DOUBLE_MISSING_BITS: u64 = 0x7fe0_0000_0000_0000;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum RawValue {
    Missing,
    Integer(i32),
    Float(f32),
    Double(f64),
    Text(String),
    /// `(variable, observation)` key into the long string section.
    StrL(u64, u64),
}

impl RawValue {
    /// Renders the value on its own, applying `%td`/`%tc` date formats.
    pub(super) fn render(&self, format: &str) -> String {
        match self {
            RawValue::Missing | RawValue::StrL(..) => String::new(),
            RawValue::Integer(v) => {
                format_date(f64::from(*v), format).unwrap_or_else(|| v.to_string())
            }
            RawValue::Float(v) => format_date(f64::from(*v), format).unwrap_or_else(|| v.to_string()),
            RawValue::Double(v) => format_date(*v, format).unwrap_or_else(|| v.to_string()),
            RawValue::Text(s) => s.clone(),
        }
    }
}

pub(super) fn decode_row(layout: &Layout, row: &[u8]) -> Vec<RawValue> {
    let mut offset = 0;
    layout
        .variables
        .iter()
        .map(|var| {
            let width = var.kind.width();
            let value = decode(var.kind, &row[offset..offset + width], layout);
            offset += width;
            value
        })
        .collect()
}

fn decode(kind: VarType, bytes: &[u8], layout: &Layout) -> RawValue {
    let order = layout.order;
    match kind {
        VarType::Str(_) => RawValue::Text(decode_text(bytes, layout.release)),
        VarType::StrL => {
            let split = match layout.release {
                117 => 4,
                118 => 2,
                _ => 3,
            };
            RawValue::StrL(order.uint(&bytes[..split]), order.uint(&bytes[split..]))
        }
        VarType::Byte => {
            let v = bytes[0] as i8;
            if v > BYTE_MAX {
                RawValue::Missing
            } else {
                RawValue::Integer(i32::from(v))
            }
        }
        VarType::Int => {
            let v = order.uint(bytes) as u16 as i16;
            if v > INT_MAX {
                RawValue::Missing
            } else {
                RawValue::Integer(i32::from(v))
            }
        }
        VarType::Long => {
            let v = order.uint(bytes) as u32 as i32;
            if v > LONG_MAX {
                RawValue::Missing
            } else {
                RawValue::Integer(v)
            }
        }
        VarType::Float => {
            let v = f32::from_bits(order.uint(bytes) as u32);
            if v.is_nan() || v >= f32::from_bits(FLOAT_MISSING_BITS) {
                RawValue::Missing
            } else {
                RawValue::Float(v)
            }
        }
        VarType::Double => {
            let v = f64::from_bits(order.uint(bytes));
            if v.is_nan() || v >= f64::from_bits(DOUBLE_MISSING_BITS) {
                RawValue::Missing
            } else {
                RawValue::Double(v)
            }
        }
    }
}

/// `%td` counts days and `%tc` milliseconds from 1960-01-01.
fn format_date(value: f64, format: &str) -> Option<String> {
    let epoch = NaiveDate::from_ymd_opt(1960, 1, 1)?;
    if format.starts_with("%td") || format.starts_with("%d") {
        if value.abs() > 1e7 {
            return None;
        }
        let date = epoch.checked_add_signed(Duration::days(value.floor() as i64))?;
        Some(date.format("%Y-%m-%d").to_string())
    } else if format.starts_with("%tc") || format.starts_with("%tC") {
        if value.abs() > 1e15 {
            return None;
        }
        let stamp = epoch
            .and_hms_opt(0, 0, 0)?
            .checked_add_signed(Duration::milliseconds(value as i64))?;
        Some(stamp.format("%Y-%m-%d %H:%M:%S").to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn layout(release: u8, kinds: &[VarType]) -> Layout {
        use super::super::header::{ByteOrder, Variable};
        Layout {
            release,
            order: ByteOrder::Little,
            nobs: 1,
            variables: kinds
                .iter()
                .map(|&kind| Variable {
                    name: String::new(),
                    kind,
                    format: String::new(),
                    value_label: String::new(),
                })
                .collect(),
            data_offset: 0,
            strls_offset: None,
            value_labels_offset: 0,
        }
    }

    #[test]
    fn decodes_numeric_row() {
        let layout = layout(118, &[VarType::Byte, VarType::Int, VarType::Long, VarType::Double]);
        let mut row = vec![0xfb_u8];
        row.extend_from_slice(&300i16.to_le_bytes());
        row.extend_from_slice(&(-7i32).to_le_bytes());
        row.extend_from_slice(&2.5f64.to_le_bytes());

        assert_eq!(
            decode_row(&layout, &row),
            vec![
                RawValue::Integer(-5),
                RawValue::Integer(300),
                RawValue::Integer(-7),
                RawValue::Double(2.5)
            ]
        );
    }

    #[test]
    fn detects_missing_values() {
        let layout = layout(118, &[VarType::Byte, VarType::Int, VarType::Float, VarType::Double]);
        let mut row = vec![101u8];
        row.extend_from_slice(&32_741i16.to_le_bytes());
        row.extend_from_slice(&FLOAT_MISSING_BITS.to_le_bytes());
        row.extend_from_slice(&(DOUBLE_MISSING_BITS + 1).to_le_bytes());

        assert_eq!(decode_row(&layout, &row), vec![RawValue::Missing; 4]);
    }

    #[test]
    fn splits_strl_keys_by_release() {
        let mut bytes = 3u16.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[9, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode_row(&layout(118, &[VarType::StrL]), &bytes),
            vec![RawValue::StrL(3, 9)]
        );

        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&9u32.to_le_bytes());
        assert_eq!(
            decode_row(&layout(117, &[VarType::StrL]), &bytes),
            vec![RawValue::StrL(3, 9)]
        );
    }

    #[test]
    fn renders_dates_and_numbers() {
        assert_eq!(RawValue::Integer(0).render("%td"), "1960-01-01");
        assert_eq!(RawValue::Integer(-1).render("%tdDD/NN/CCYY"), "1959-12-31");
        assert_eq!(RawValue::Double(86_400_000.0).render("%tc"), "1960-01-02 00:00:00");
        assert_eq!(RawValue::Integer(42).render("%8.0g"), "42");
        assert_eq!(RawValue::Double(1.5).render("%9.0g"), "1.5");
        assert_eq!(RawValue::Float(0.25).render("%9.0g"), "0.25");
        assert_eq!(RawValue::Missing.render("%td"), "");
    }
}
