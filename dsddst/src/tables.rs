//! Filter-set and probability tables, plus the channel-to-element maps.
//!
//! Both table families share one shape: a short length field, then either
//! raw coefficients or a prediction method followed by Rice-coded
//! residuals against a fixed polynomial predictor.

use crate::bitreader::BitReader;
use crate::DstError;

/// Fixed residual predictors for filter coefficients, one row per
/// prediction method (order 1, 2, 3).
const FILTER_PREDICTOR: [[i32; 3]; 3] = [[1, 0, 0], [2, -1, 0], [3, -3, 1]];

/// Fixed residual predictors for probability values. Order 0 leaves the
/// residuals unpredicted.
const PROBABILITY_PREDICTOR: [[i32; 3]; 3] = [[0, 0, 0], [1, 0, 0], [2, -1, 0]];

/// One linear prediction filter: up to 128 signed 9-bit taps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTable {
    pub coefficients: Vec<i16>,
}

/// One probability table: up to 64 values in 1..=128.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbabilityTable {
    pub values: Vec<u32>,
}

/// Number of bits needed to index `count + 1` alternatives.
fn code_width(count: usize) -> u32 {
    usize::BITS - count.leading_zeros()
}

/// Read a channel-to-element map.
///
/// Channel 0 always maps to element 0; each further channel either reuses
/// an element seen so far or opens the next one, coded in just enough bits
/// for the alternatives live at that point.
pub fn read_element_map(
    reader: &mut BitReader<'_>,
    channels: usize,
    max_elements: usize,
) -> Result<Vec<usize>, DstError> {
    let mut map = vec![0usize; channels];
    let mut count = 1usize;
    for entry in map.iter_mut().take(channels).skip(1) {
        let value = reader.read_bits(code_width(count))? as usize;
        if value > count {
            return Err(DstError::InvalidData("element map entry out of range"));
        }
        if value == count {
            count += 1;
            if count > max_elements {
                return Err(DstError::InvalidData("too many elements for channel count"));
            }
        }
        *entry = value;
    }
    Ok(map)
}

fn predict(method: usize, matrix: &[[i32; 3]; 3], history: &[i32]) -> i32 {
    let mut sum = 0i32;
    for (j, &weight) in matrix[method].iter().enumerate() {
        if weight != 0 {
            sum += weight * history[history.len() - 1 - j];
        }
    }
    sum
}

/// Read `count` filter tables: 7-bit length, then raw 9-bit signed taps or
/// `method + 1` raw taps followed by Rice-coded residuals.
pub fn read_filter_tables(
    reader: &mut BitReader<'_>,
    count: usize,
) -> Result<Vec<FilterTable>, DstError> {
    let mut tables = Vec::with_capacity(count);
    for _ in 0..count {
        let length = reader.read_bits(7)? as usize + 1;
        let coded = reader.read_bit()? == 1;
        let mut coefficients: Vec<i32> = Vec::with_capacity(length);
        if !coded {
            for _ in 0..length {
                coefficients.push(reader.read_signed(9)?);
            }
        } else {
            let method = reader.read_bits(2)? as usize;
            if method >= FILTER_PREDICTOR.len() {
                return Err(DstError::InvalidData("unknown filter prediction method"));
            }
            let rice_k = reader.read_bits(3)?;
            for _ in 0..(method + 1).min(length) {
                coefficients.push(reader.read_signed(9)?);
            }
            while coefficients.len() < length {
                let residual = reader.read_rice_signed(rice_k)?;
                let value = predict(method, &FILTER_PREDICTOR, &coefficients) + residual;
                if !(-256..=255).contains(&value) {
                    return Err(DstError::InvalidData(
                        "filter coefficient out of 9-bit range",
                    ));
                }
                coefficients.push(value);
            }
        }
        tables.push(FilterTable {
            coefficients: coefficients.into_iter().map(|c| c as i16).collect(),
        });
    }
    Ok(tables)
}

/// Read `count` probability tables: 6-bit length, 7-bit values biased by
/// one, or a predicted form like the filter tables.
pub fn read_probability_tables(
    reader: &mut BitReader<'_>,
    count: usize,
) -> Result<Vec<ProbabilityTable>, DstError> {
    let mut tables = Vec::with_capacity(count);
    for _ in 0..count {
        let length = reader.read_bits(6)? as usize + 1;
        let coded = reader.read_bit()? == 1;
        let mut values: Vec<i32> = Vec::with_capacity(length);
        if !coded {
            for _ in 0..length {
                values.push(reader.read_bits(7)? as i32 + 1);
            }
        } else {
            let method = reader.read_bits(2)? as usize;
            if method >= PROBABILITY_PREDICTOR.len() {
                return Err(DstError::InvalidData(
                    "unknown probability prediction method",
                ));
            }
            let rice_k = reader.read_bits(3)?;
            for _ in 0..(method + 1).min(length) {
                values.push(reader.read_bits(7)? as i32 + 1);
            }
            while values.len() < length {
                let residual = reader.read_rice_signed(rice_k)?;
                let value = predict(method, &PROBABILITY_PREDICTOR, &values) + residual;
                if !(1..=128).contains(&value) {
                    return Err(DstError::InvalidData("probability value out of range"));
                }
                values.push(value);
            }
        }
        tables.push(ProbabilityTable {
            values: values.into_iter().map(|v| v as u32).collect(),
        });
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testbits::BitWriter;

    #[test]
    fn code_width_grows_with_the_alternatives() {
        assert_eq!(code_width(1), 1);
        assert_eq!(code_width(2), 2);
        assert_eq!(code_width(3), 2);
        assert_eq!(code_width(4), 3);
    }

    #[test]
    fn element_map_opens_new_elements_in_order() {
        // Channels: 0 (implicit), reuse 0, open 1, open 2, reuse 1.
        let mut writer = BitWriter::new();
        writer.push_bits(0, 1); // ch1 -> 0
        writer.push_bits(1, 1); // ch2 -> open element 1
        writer.push_bits(2, 2); // ch3 -> open element 2
        writer.push_bits(1, 2); // ch4 -> element 1
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let map = read_element_map(&mut reader, 5, 10).unwrap();
        assert_eq!(map, vec![0, 0, 1, 2, 1]);
    }

    #[test]
    fn element_map_enforces_the_cap() {
        let mut writer = BitWriter::new();
        writer.push_bits(1, 1); // open element 1
        writer.push_bits(2, 2); // open element 2, above the cap
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            read_element_map(&mut reader, 3, 2),
            Err(DstError::InvalidData("too many elements for channel count"))
        );
    }

    #[test]
    fn raw_filter_table_reads_signed_taps() {
        let mut writer = BitWriter::new();
        writer.push_bits(3, 7); // length 4
        writer.push_bit(0); // raw
        for c in [-256i32, 255, -1, 0] {
            writer.push_signed(c, 9);
        }
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let tables = read_filter_tables(&mut reader, 1).unwrap();
        assert_eq!(tables[0].coefficients, vec![-256, 255, -1, 0]);
    }

    #[test]
    fn coded_filter_table_applies_the_predictor() {
        // Method 0 predicts each tap from the previous one.
        let mut writer = BitWriter::new();
        writer.push_bits(2, 7); // length 3
        writer.push_bit(1); // coded
        writer.push_bits(0, 2); // method 0
        writer.push_bits(0, 3); // rice k = 0
        writer.push_signed(10, 9); // first tap raw
        // residual +1 -> zigzag value 2 -> unary 00 1
        writer.push_bit(0);
        writer.push_bit(0);
        writer.push_bit(1);
        // residual -1 -> zigzag value 1 -> unary 0 1
        writer.push_bit(0);
        writer.push_bit(1);
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let tables = read_filter_tables(&mut reader, 1).unwrap();
        assert_eq!(tables[0].coefficients, vec![10, 11, 10]);
    }

    #[test]
    fn out_of_range_residual_is_invalid_data() {
        let mut writer = BitWriter::new();
        writer.push_bits(1, 7); // length 2
        writer.push_bit(1); // coded
        writer.push_bits(0, 2); // method 0
        writer.push_bits(7, 3); // rice k = 7
        writer.push_signed(255, 9);
        // residual +64 -> zigzag 128 -> quotient 1, remainder 0
        writer.push_bit(0);
        writer.push_bit(1);
        writer.push_bits(0, 7);
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        assert!(matches!(
            read_filter_tables(&mut reader, 1),
            Err(DstError::InvalidData(_))
        ));
    }

    #[test]
    fn probability_values_carry_the_plus_one_bias() {
        let mut writer = BitWriter::new();
        writer.push_bits(1, 6); // length 2
        writer.push_bit(0); // raw
        writer.push_bits(0, 7); // -> 1
        writer.push_bits(127, 7); // -> 128
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let tables = read_probability_tables(&mut reader, 1).unwrap();
        assert_eq!(tables[0].values, vec![1, 128]);
    }
}
