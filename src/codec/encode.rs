//! XDR encoding of dataset data.

use crate::array::DapArray;
use crate::codec::{padding, END_OF_SEQUENCE, START_OF_SEQUENCE};
use crate::element::{dispatch, Element, NumVisitor};
use crate::error::DapError;
use crate::model::{BaseType, Container, DapNode, Dataset, Record, Sequence, Value};
use crate::models::DType;
use crate::responses::dds::render_dds;
use crate::types::{DValue, TryFromDValue};

use bytes::{BufMut, Bytes, BytesMut};

/// Encode the visible variables of `dataset`, in DDS order.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub fn encode(dataset: &Dataset) -> Result<Bytes, DapError> {
    let mut buf = BytesMut::new();
    for child in dataset.children() {
        encode_node(child, &mut buf)?;
    }
    Ok(buf.freeze())
}

/// Build a complete `.dods` response: DDS text, separator and XDR payload.
pub fn dods_response(dataset: &Dataset) -> Result<Bytes, DapError> {
    let payload = encode(dataset)?;
    let dds = render_dds(dataset);
    let mut buf = BytesMut::with_capacity(dds.len() + payload.len() + 6);
    buf.put_slice(dds.as_bytes());
    buf.put_slice(b"Data:\n");
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

fn encode_node(node: &DapNode, buf: &mut BytesMut) -> Result<(), DapError> {
    match node {
        DapNode::Base(var) => encode_base(var, buf),
        DapNode::Sequence(seq) => encode_sequence(seq, buf),
        node => {
            if let Some(container) = node.container() {
                for child in container.children() {
                    encode_node(child, buf)?;
                }
            }
            Ok(())
        }
    }
}

fn encode_base(var: &BaseType, buf: &mut BytesMut) -> Result<(), DapError> {
    let array = var.array()?;
    let expected = var.element_count()?;
    if array.len() != expected {
        return Err(DapError::ShapeMismatch {
            id: var.id().to_string(),
            expected,
            found: array.len(),
        });
    }
    let scalar = var.shape.is_empty();
    match array.strings() {
        Some(strings) => {
            if !scalar {
                buf.put_u32(u32::try_from(strings.len())?);
            }
            for string in strings {
                put_string(string, buf)?;
            }
            Ok(())
        }
        None => dispatch(
            var.dtype,
            PutArray {
                array: &array,
                scalar,
                buf,
            },
        ),
    }
}

/// Writes a numeric array: the length twice, then the elements.
///
/// Scalars have no length prefix. Byte blocks are padded to four bytes.
struct PutArray<'a> {
    array: &'a DapArray,
    scalar: bool,
    buf: &'a mut BytesMut,
}

impl NumVisitor for PutArray<'_> {
    type Output = ();

    fn visit<T: Element>(self) -> Result<(), DapError> {
        let typed = T::unwrap(self.array).ok_or_else(|| DapError::DTypeMismatch {
            id: String::new(),
            declared: T::DTYPE,
            found: format!("{:?}", self.array.element_type()),
        })?;
        if !self.scalar {
            let length = u32::try_from(typed.len())?;
            self.buf.put_u32(length);
            self.buf.put_u32(length);
        }
        self.buf.reserve(typed.len() * T::XDR_SIZE + 3);
        for value in typed.iter() {
            value.put_xdr(self.buf);
        }
        if T::XDR_SIZE == 1 {
            self.buf.put_bytes(0, padding(typed.len()));
        }
        Ok(())
    }
}

fn put_string(value: &str, buf: &mut BytesMut) -> Result<(), DapError> {
    buf.put_u32(u32::try_from(value.len())?);
    buf.put_slice(value.as_bytes());
    buf.put_bytes(0, padding(value.len()));
    Ok(())
}

fn encode_sequence(seq: &Sequence, buf: &mut BytesMut) -> Result<(), DapError> {
    let records = seq.records()?;
    match PackedLayout::new(&seq.container) {
        Some(layout) => layout.encode(&records, buf)?,
        None => encode_records(&seq.container, &records, buf)?,
    }
    buf.put_slice(&END_OF_SEQUENCE);
    Ok(())
}

/// Encode records field by field, without the end marker.
fn encode_records(
    container: &Container,
    records: &[Record],
    buf: &mut BytesMut,
) -> Result<(), DapError> {
    for record in records {
        buf.put_slice(&START_OF_SEQUENCE);
        encode_record(container, record, buf)?;
    }
    Ok(())
}

fn encode_record(
    container: &Container,
    record: &[Value],
    buf: &mut BytesMut,
) -> Result<(), DapError> {
    for child in container.children() {
        let value = container
            .member_index(child.key())
            .and_then(|index| record.get(index))
            .ok_or_else(|| DapError::ShapeMismatch {
                id: container.id().to_string(),
                expected: container.len(),
                found: record.len(),
            })?;
        encode_value(child, value, buf)?;
    }
    Ok(())
}

fn encode_value(node: &DapNode, value: &Value, buf: &mut BytesMut) -> Result<(), DapError> {
    match (node, value) {
        (DapNode::Base(var), Value::Atom(atom)) if var.shape.is_empty() => {
            if var.dtype.is_string() {
                put_string(&String::try_from_dvalue(atom)?, buf)
            } else {
                dispatch(var.dtype, PutAtom { value: atom, buf })
            }
        }
        (DapNode::Structure(c) | DapNode::Grid(c), Value::Struct(values)) => {
            encode_record(c, values, buf)
        }
        (DapNode::Sequence(seq), Value::Seq(records)) => {
            encode_records(&seq.container, records, buf)?;
            buf.put_slice(&END_OF_SEQUENCE);
            Ok(())
        }
        (node, _) => Err(DapError::UnsupportedOperation {
            operation: "record encoding",
            kind: node.kind(),
            id: node.id().to_string(),
        }),
    }
}

/// Writes one numeric field of a record.
struct PutAtom<'a> {
    value: &'a DValue,
    buf: &'a mut BytesMut,
}

impl NumVisitor for PutAtom<'_> {
    type Output = ();

    fn visit<T: Element>(self) -> Result<(), DapError> {
        T::try_from_dvalue(self.value)?.put_xdr(self.buf);
        if T::XDR_SIZE == 1 {
            self.buf.put_bytes(0, 3);
        }
        Ok(())
    }
}

/// Precomputed layout of a sequence whose visible fields are all numeric scalars.
///
/// Every record then has the same encoded size, so the output is reserved up front and each
/// field is written without per-field dispatch.
#[derive(Debug)]
struct PackedLayout {
    /// Member index and type of each visible field
    fields: Vec<(usize, DType)>,
    /// Encoded size of one record, including its start marker
    record_size: usize,
}

impl PackedLayout {
    fn new(container: &Container) -> Option<Self> {
        let mut fields = vec![];
        let mut record_size = START_OF_SEQUENCE.len();
        for child in container.children() {
            match child {
                DapNode::Base(var) if var.shape.is_empty() && !var.dtype.is_string() => {
                    fields.push((container.member_index(var.key())?, var.dtype));
                    record_size += var.dtype.wire_size()?.max(4);
                }
                _ => return None,
            }
        }
        Some(PackedLayout { fields, record_size })
    }

    fn encode(&self, records: &[Record], buf: &mut BytesMut) -> Result<(), DapError> {
        buf.reserve(records.len() * self.record_size + END_OF_SEQUENCE.len());
        for record in records {
            buf.put_slice(&START_OF_SEQUENCE);
            for (index, dtype) in &self.fields {
                let value = record
                    .get(*index)
                    .and_then(Value::as_atom)
                    .ok_or_else(|| DapError::ShapeMismatch {
                        id: dtype.to_string(),
                        expected: self.fields.len(),
                        found: record.len(),
                    })?;
                put_number(*dtype, value, buf)?;
            }
        }
        Ok(())
    }
}

fn put_number(dtype: DType, value: &DValue, buf: &mut BytesMut) -> Result<(), DapError> {
    match dtype {
        DType::Byte => {
            buf.put_u8(u8::try_from_dvalue(value)?);
            buf.put_bytes(0, 3);
        }
        DType::Int8 => {
            buf.put_i8(i8::try_from_dvalue(value)?);
            buf.put_bytes(0, 3);
        }
        DType::Int16 => buf.put_i32(i16::try_from_dvalue(value)?.into()),
        DType::UInt16 => buf.put_u32(u16::try_from_dvalue(value)?.into()),
        DType::Int32 => buf.put_i32(i32::try_from_dvalue(value)?),
        DType::UInt32 => buf.put_u32(u32::try_from_dvalue(value)?),
        DType::Int64 => buf.put_i64(i64::try_from_dvalue(value)?),
        DType::UInt64 => buf.put_u64(u64::try_from_dvalue(value)?),
        DType::Float32 => buf.put_f32(f32::try_from_dvalue(value)?),
        DType::Float64 => buf.put_f64(f64::try_from_dvalue(value)?),
        DType::String | DType::Url => {
            return Err(DapError::UnsupportedOperation {
                operation: "packed encoding",
                kind: "String",
                id: dtype.to_string(),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, float, int};
    use proptest::prelude::*;

    fn encode_var(var: BaseType) -> Vec<u8> {
        encode(&Dataset::new("d").with(var)).unwrap().to_vec()
    }

    #[test]
    fn scalar_int32() {
        let var = BaseType::new("x", DType::Int32, vec![])
            .with_data(DapArray::from_vec(&[], vec![-2_i32]).unwrap());
        assert_eq!(vec![0xff, 0xff, 0xff, 0xfe], encode_var(var));
    }

    #[test]
    fn scalar_byte_padded() {
        let var = BaseType::new("x", DType::Byte, vec![])
            .with_data(DapArray::from_vec(&[], vec![7_u8]).unwrap());
        assert_eq!(vec![7, 0, 0, 0], encode_var(var));
    }

    #[test]
    fn byte_array_padded() {
        let var = BaseType::new("x", DType::Byte, vec![5])
            .with_data(DapArray::from_vec(&[5], vec![1_u8, 2, 3, 4, 5]).unwrap());
        assert_eq!(
            vec![0, 0, 0, 5, 0, 0, 0, 5, 1, 2, 3, 4, 5, 0, 0, 0],
            encode_var(var)
        );
    }

    #[test]
    fn int16_array_promoted() {
        let var = BaseType::new("x", DType::Int16, vec![2])
            .with_data(DapArray::from_vec(&[2], vec![-1_i16, 2]).unwrap());
        assert_eq!(
            vec![0, 0, 0, 2, 0, 0, 0, 2, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 2],
            encode_var(var)
        );
    }

    #[test]
    fn string_array_single_length() {
        let var = BaseType::new("x", DType::String, vec![2]).with_data(
            DapArray::from_strings(&[2], vec!["ab".to_string(), "cdefg".to_string()]).unwrap(),
        );
        assert_eq!(
            vec![
                0, 0, 0, 2, //
                0, 0, 0, 2, b'a', b'b', 0, 0, //
                0, 0, 0, 5, b'c', b'd', b'e', b'f', b'g', 0, 0, 0,
            ],
            encode_var(var)
        );
    }

    #[test]
    fn sliced_view_encodes_logical_order() {
        let var = BaseType::new("x", DType::Int32, vec![2, 3])
            .with_data(DapArray::from_vec(&[2, 3], vec![1_i32, 2, 3, 4, 5, 6]).unwrap());
        let sliced = var
            .slice(&[crate::models::Slice::full(), crate::models::Slice::new(0, None, 2)])
            .unwrap();
        assert_eq!(
            vec![0, 0, 0, 4, 0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0, 6],
            encode_var(sliced)
        );
    }

    #[test]
    fn sequence_markers() {
        let bytes = encode(&test_utils::sequence_dataset()).unwrap();
        let mut expected = vec![];
        for (n, label) in [(10_u8, b'x'), (20, b'y'), (5, b'z')] {
            expected.extend_from_slice(&START_OF_SEQUENCE);
            expected.extend_from_slice(&[0, 0, 0, n]);
            expected.extend_from_slice(&[0, 0, 0, 1, label, 0, 0, 0]);
        }
        expected.extend_from_slice(&END_OF_SEQUENCE);
        assert_eq!(expected, bytes.to_vec());
    }

    #[test]
    fn empty_sequence_is_end_marker() {
        let seq = Sequence::new("s")
            .with(BaseType::new("n", DType::Int32, vec![]))
            .with_records(vec![]);
        let bytes = encode(&Dataset::new("d").with(seq)).unwrap();
        assert_eq!(END_OF_SEQUENCE.to_vec(), bytes.to_vec());
    }

    #[test]
    fn nested_sequence_markers() {
        let bytes = encode(&test_utils::nested_sequence_dataset()).unwrap();
        let starts = bytes
            .chunks(4)
            .filter(|word| *word == START_OF_SEQUENCE)
            .count();
        let ends = bytes.chunks(4).filter(|word| *word == END_OF_SEQUENCE).count();
        // two stations and three observations
        assert_eq!(5, starts);
        // one end per observation list and one for the stations
        assert_eq!(3, ends);
    }

    #[test]
    fn missing_data() {
        let dataset = Dataset::new("d").with(BaseType::new("x", DType::Int32, vec![3]));
        match encode(&dataset).unwrap_err() {
            DapError::MissingData(id) => assert_eq!("x", id),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn dtype_mismatch() {
        let var = BaseType::new("x", DType::Float64, vec![])
            .with_data(DapArray::from_vec(&[], vec![1_i32]).unwrap());
        assert!(matches!(
            encode(&Dataset::new("d").with(var)).unwrap_err(),
            DapError::DTypeMismatch { .. }
        ));
    }

    #[test]
    fn shape_mismatch() {
        let mut var = BaseType::new("x", DType::Int32, vec![])
            .with_data(DapArray::from_vec(&[2], vec![1_i32, 2]).unwrap());
        var.shape = vec![3];
        match encode(&Dataset::new("d").with(var)).unwrap_err() {
            DapError::ShapeMismatch { expected, found, .. } => {
                assert_eq!(3, expected);
                assert_eq!(2, found);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn hidden_children_skipped() {
        let mut dataset = test_utils::simple_dataset();
        dataset
            .set_visible_keys(vec!["b".to_string()])
            .unwrap();
        assert_eq!(1.5_f64.to_be_bytes().to_vec(), encode(&dataset).unwrap().to_vec());
    }

    #[test]
    fn dods_response_layout() {
        let dataset = Dataset::new("d").with(
            BaseType::new("x", DType::Int32, vec![])
                .with_data(DapArray::from_vec(&[], vec![1_i32]).unwrap()),
        );
        let bytes = dods_response(&dataset).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("Dataset {\n    Int32 x;\n} d;\nData:\n"));
        assert_eq!(&[0, 0, 0, 1], &bytes[bytes.len() - 4..]);
    }

    fn packed_container() -> Container {
        Sequence::new("s")
            .with(BaseType::new("a", DType::Byte, vec![]))
            .with(BaseType::new("b", DType::Int16, vec![]))
            .with(BaseType::new("c", DType::UInt32, vec![]))
            .with(BaseType::new("d", DType::Float32, vec![]))
            .with(BaseType::new("e", DType::Float64, vec![]))
            .with(BaseType::new("f", DType::Int64, vec![]))
            .container
    }

    #[test]
    fn packed_layout_only_for_numeric_scalars() {
        let layout = PackedLayout::new(&packed_container()).unwrap();
        assert_eq!(4 + 4 + 4 + 4 + 4 + 8 + 8, layout.record_size);
        let columns = test_utils::columns_dataset();
        assert!(PackedLayout::new(columns.get("seq").unwrap().container().unwrap()).is_none());
    }

    proptest! {
        #[test]
        fn packed_layout_matches_field_encoding(
            rows in prop::collection::vec(
                (any::<u8>(), any::<i16>(), any::<u32>(), any::<f32>(), any::<f64>(), any::<i64>()),
                0..20,
            )
        ) {
            let container = packed_container();
            let records: Vec<Record> = rows
                .iter()
                .map(|(a, b, c, d, e, f)| vec![
                    int(i64::from(*a)),
                    int(i64::from(*b)),
                    int(i64::from(*c)),
                    float(f64::from(*d)),
                    float(*e),
                    int(*f),
                ])
                .collect();
            let mut packed = BytesMut::new();
            PackedLayout::new(&container).unwrap().encode(&records, &mut packed).unwrap();
            let mut generic = BytesMut::new();
            encode_records(&container, &records, &mut generic).unwrap();
            prop_assert_eq!(generic, packed);
        }
    }
}
