//! Comma separated text encoding: one row per sample, one column per channel

use std::fmt::Write;

use super::Columns;

#[derive(Debug)]
pub struct CsvEncoder {
    names: Vec<&'static str>,
}

impl CsvEncoder {
    pub fn new(names: Vec<&'static str>) -> Self {
        Self { names }
    }

    pub fn header(&self) -> Vec<u8> {
        let mut line = self.names.join(",");
        line.push('\n');
        line.into_bytes()
    }

    pub fn encode(&self, columns: &Columns, out: &mut Vec<u8>) {
        let mut text = String::new();
        for row in 0..columns.rows() {
            match columns {
                Columns::Codes(cols) => {
                    for (i, col) in cols.iter().enumerate() {
                        if i > 0 {
                            text.push(',');
                        }
                        let _ = write!(text, "{}", col.get(row).copied().unwrap_or(0));
                    }
                }
                Columns::Volts(cols) => {
                    for (i, col) in cols.iter().enumerate() {
                        if i > 0 {
                            text.push(',');
                        }
                        let _ = write!(text, "{:.6}", col.get(row).copied().unwrap_or(0.0));
                    }
                }
            }
            text.push('\n');
        }
        out.extend_from_slice(text.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_rows() {
        let enc = CsvEncoder::new(vec!["ch1", "ch2"]);
        assert_eq!(enc.header(), b"ch1,ch2\n");

        let mut out = Vec::new();
        enc.encode(&Columns::Codes(vec![vec![1, 2], vec![-3, -4]]), &mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "1,-3\n2,-4\n");
    }

    #[test]
    fn test_volt_rows() {
        let enc = CsvEncoder::new(vec!["ch2"]);
        let mut out = Vec::new();
        enc.encode(&Columns::Volts(vec![vec![0.5, -0.25]]), &mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "0.500000\n-0.250000\n");
    }
}
