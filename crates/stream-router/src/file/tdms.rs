//! NI TDMS encoding
//!
//! Every frame becomes one self-describing segment: a 28-byte lead-in, the
//! object list (file, group, one object per channel) and the channels' raw
//! values, non-interleaved. All integers are little-endian.

use super::Columns;

const TOC_META_DATA: u32 = 1 << 1;
const TOC_NEW_OBJ_LIST: u32 = 1 << 2;
const TOC_RAW_DATA: u32 = 1 << 3;
const TDMS_VERSION: u32 = 4713;
const NO_RAW_DATA: u32 = 0xFFFF_FFFF;
const RAW_INDEX_LEN: u32 = 20;

const TYPE_I8: u32 = 0x01;
const TYPE_I16: u32 = 0x02;
const TYPE_SINGLE: u32 = 0x09;
const TYPE_STRING: u32 = 0x20;

/// Lead-in length in bytes
pub const LEAD_IN_LEN: usize = 28;

#[derive(Debug)]
pub struct TdmsEncoder {
    group: String,
    names: Vec<&'static str>,
    code_bits: u16,
}

impl TdmsEncoder {
    pub fn new(group: impl Into<String>, names: Vec<&'static str>, code_bits: u16) -> Self {
        Self {
            group: group.into(),
            names,
            code_bits,
        }
    }

    /// TDMS files have no file header beyond their segments
    pub fn header(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Append one segment holding `columns`
    pub fn encode(&self, columns: &Columns, out: &mut Vec<u8>) {
        let rows = columns.rows() as u64;
        let data_type = match columns {
            Columns::Volts(_) => TYPE_SINGLE,
            Columns::Codes(_) if self.code_bits == 8 => TYPE_I8,
            Columns::Codes(_) => TYPE_I16,
        };

        let mut meta = Vec::new();
        put_u32(&mut meta, 2 + self.names.len() as u32);

        put_string(&mut meta, "/");
        put_u32(&mut meta, NO_RAW_DATA);
        put_u32(&mut meta, 0);

        put_string(&mut meta, &format!("/'{}'", self.group));
        put_u32(&mut meta, NO_RAW_DATA);
        put_u32(&mut meta, 1);
        put_string(&mut meta, "source");
        put_u32(&mut meta, TYPE_STRING);
        put_string(&mut meta, "streaming");

        for name in &self.names {
            put_string(&mut meta, &format!("/'{}'/'{}'", self.group, name));
            put_u32(&mut meta, RAW_INDEX_LEN);
            put_u32(&mut meta, data_type);
            put_u32(&mut meta, 1);
            meta.extend_from_slice(&rows.to_le_bytes());
            put_u32(&mut meta, 0);
        }

        let mut raw = Vec::new();
        match columns {
            Columns::Codes(cols) => {
                for col in cols {
                    for row in 0..columns.rows() {
                        let code = col.get(row).copied().unwrap_or(0);
                        if self.code_bits == 8 {
                            raw.push(code as i8 as u8);
                        } else {
                            raw.extend_from_slice(&(code as i16).to_le_bytes());
                        }
                    }
                }
            }
            Columns::Volts(cols) => {
                for col in cols {
                    for row in 0..columns.rows() {
                        raw.extend_from_slice(&col.get(row).copied().unwrap_or(0.0).to_le_bytes());
                    }
                }
            }
        }

        out.extend_from_slice(b"TDSm");
        put_u32(out, TOC_META_DATA | TOC_NEW_OBJ_LIST | TOC_RAW_DATA);
        put_u32(out, TDMS_VERSION);
        out.extend_from_slice(&((meta.len() + raw.len()) as u64).to_le_bytes());
        out.extend_from_slice(&(meta.len() as u64).to_le_bytes());
        out.extend_from_slice(&meta);
        out.extend_from_slice(&raw);
    }

    /// Segments are complete when written
    pub fn finish(&self, _data_size: u64) -> Vec<(u64, Vec<u8>)> {
        Vec::new()
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(b: &[u8], i: usize) -> u32 {
        u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]])
    }

    fn u64_at(b: &[u8], i: usize) -> u64 {
        let mut a = [0u8; 8];
        a.copy_from_slice(&b[i..i + 8]);
        u64::from_le_bytes(a)
    }

    #[test]
    fn test_lead_in_offsets_are_consistent() {
        let enc = TdmsEncoder::new("stream", vec!["ch1", "ch2"], 16);
        let mut out = Vec::new();
        enc.encode(&Columns::Codes(vec![vec![1, 2, 3], vec![4, 5, 6]]), &mut out);

        assert_eq!(&out[0..4], b"TDSm");
        assert_eq!(u32_at(&out, 4), 0x0E);
        assert_eq!(u32_at(&out, 8), 4713);

        let next_segment = u64_at(&out, 12) as usize;
        let raw_offset = u64_at(&out, 20) as usize;
        assert_eq!(LEAD_IN_LEN + next_segment, out.len());

        // non-interleaved i16: ch1 values then ch2 values
        let raw = &out[LEAD_IN_LEN + raw_offset..];
        assert_eq!(raw.len(), 12);
        assert_eq!(&raw[0..2], &1i16.to_le_bytes());
        assert_eq!(&raw[6..8], &4i16.to_le_bytes());

        // object count: file, group, two channels
        assert_eq!(u32_at(&out, LEAD_IN_LEN), 4);
    }

    #[test]
    fn test_segments_append() {
        let enc = TdmsEncoder::new("stream", vec!["ch1"], 8);
        let mut out = Vec::new();
        enc.encode(&Columns::Codes(vec![vec![-1]]), &mut out);
        let first = out.len();
        enc.encode(&Columns::Codes(vec![vec![-2]]), &mut out);
        assert_eq!(out.len(), first * 2);
        assert_eq!(&out[first..first + 4], b"TDSm");
        assert_eq!(out[first - 1], 0xFF);
    }

    #[test]
    fn test_volts_are_single_precision() {
        let enc = TdmsEncoder::new("stream", vec!["ch1"], 16);
        let mut out = Vec::new();
        enc.encode(&Columns::Volts(vec![vec![0.5]]), &mut out);
        assert_eq!(&out[out.len() - 4..], &0.5f32.to_le_bytes());
    }
}
