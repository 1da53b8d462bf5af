//! XDR decoding of data responses against a dataset descriptor.

use crate::array::DapArray;
use crate::codec::stream::StreamReader;
use crate::codec::{padding, DATA_MARKER, END_OF_SEQUENCE, START_OF_SEQUENCE};
use crate::element::{dispatch, Element, NumVisitor};
use crate::error::DapError;
use crate::model::{BaseType, Container, DapNode, Dataset, Group, Record, Sequence, Value};
use crate::parsers::parse_dds;

use bytes::Buf;

/// Decode the payload of a data response.
///
/// # Arguments
///
/// * `reader`: Stream positioned at the start of the XDR payload
/// * `descriptor`: Dataless dataset describing the payload, e.g. a parsed DDS
#[tracing::instrument(level = "DEBUG", skip_all, fields(dataset = descriptor.name()))]
pub fn decode(reader: &mut StreamReader, descriptor: &Dataset) -> Result<Dataset, DapError> {
    let container = decode_container(reader, &descriptor.container)?;
    Ok(Dataset {
        container,
        dimensions: descriptor.dimensions.clone(),
    })
}

/// Decode a complete `.dods` response: the DDS, the separator and the payload.
pub fn decode_dods(reader: &mut StreamReader) -> Result<Dataset, DapError> {
    let dds = reader.read_until(DATA_MARKER)?;
    let text = String::from_utf8(dds.to_vec())?;
    let descriptor = parse_dds(&text)?;
    decode(reader, &descriptor)
}

/// Decode the visible children of `container` into a new container of the same name.
fn decode_container(
    reader: &mut StreamReader,
    container: &Container,
) -> Result<Container, DapError> {
    let mut out = container.empty_like();
    for child in container.children() {
        out.insert(decode_node(reader, child)?);
    }
    Ok(out)
}

fn decode_node(reader: &mut StreamReader, node: &DapNode) -> Result<DapNode, DapError> {
    let decoded = match node {
        DapNode::Base(var) => {
            let array = decode_array(reader, var)?;
            DapNode::Base(var.clone().with_data(array))
        }
        DapNode::Structure(c) => DapNode::Structure(decode_container(reader, c)?),
        DapNode::Grid(c) => DapNode::Grid(decode_container(reader, c)?),
        DapNode::Group(group) => DapNode::Group(Group {
            container: decode_container(reader, &group.container)?,
            dimensions: group.dimensions.clone(),
        }),
        DapNode::Sequence(seq) => {
            let container = wire_layout(&seq.container);
            let records = read_records(reader, &container)?;
            DapNode::Sequence(Sequence {
                container,
                data: Default::default(),
            }
            .with_records(records))
        }
    };
    Ok(decoded)
}

fn shape_mismatch(var: &BaseType, expected: usize, found: usize) -> DapError {
    DapError::ShapeMismatch {
        id: var.id().to_string(),
        expected,
        found,
    }
}

fn decode_array(reader: &mut StreamReader, var: &BaseType) -> Result<DapArray, DapError> {
    let count = var.element_count()?;
    let scalar = var.shape.is_empty();
    if var.dtype.is_string() {
        if !scalar {
            let length = reader.read_u32()? as usize;
            if length != count {
                return Err(shape_mismatch(var, count, length));
            }
        }
        let strings = (0..count)
            .map(|_| read_string(reader))
            .collect::<Result<Vec<String>, DapError>>()?;
        return DapArray::from_strings(&var.shape, strings);
    }
    if !scalar {
        let length = reader.read_u32()? as usize;
        let repeated = reader.read_u32()? as usize;
        if length != count || repeated != count {
            return Err(shape_mismatch(var, count, length));
        }
    }
    dispatch(
        var.dtype,
        GetArray {
            reader,
            shape: &var.shape,
            count,
        },
    )
}

/// Reads `count` elements as one block, then the block padding.
struct GetArray<'a> {
    reader: &'a mut StreamReader,
    shape: &'a [usize],
    count: usize,
}

impl NumVisitor for GetArray<'_> {
    type Output = DapArray;

    fn visit<T: Element>(self) -> Result<DapArray, DapError> {
        let size = self
            .count
            .checked_mul(T::XDR_SIZE)
            .ok_or_else(|| DapError::Framing(format!("{} elements overflow a block", self.count)))?;
        let mut block = self.reader.read(size)?;
        let values: Vec<T> = (0..self.count).map(|_| T::get_xdr(&mut block)).collect();
        if T::XDR_SIZE == 1 {
            self.reader.read(padding(self.count))?;
        }
        DapArray::from_vec(self.shape, values)
    }
}

/// Reads one numeric field of a record. Byte fields occupy four bytes.
struct GetAtom<'a> {
    reader: &'a mut StreamReader,
}

impl NumVisitor for GetAtom<'_> {
    type Output = Value;

    fn visit<T: Element>(self) -> Result<Value, DapError> {
        let mut word = self.reader.read(T::XDR_SIZE.max(4))?;
        Ok(Value::Atom(T::get_xdr(&mut word).into()))
    }
}

fn read_string(reader: &mut StreamReader) -> Result<String, DapError> {
    let length = reader.read_u32()? as usize;
    let bytes = reader.read(length)?;
    reader.read(padding(length))?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// A copy of `container` whose members are exactly its visible children, recursively.
///
/// Decoded records follow the wire order, which is the visible order, so the decoded
/// sequence must use this layout for member order to match.
fn wire_layout(container: &Container) -> Container {
    let mut out = container.empty_like();
    for child in container.children() {
        let child = match child {
            DapNode::Base(_) => child.clone(),
            DapNode::Structure(c) => DapNode::Structure(wire_layout(c)),
            DapNode::Grid(c) => DapNode::Grid(wire_layout(c)),
            DapNode::Sequence(seq) => DapNode::Sequence(Sequence {
                container: wire_layout(&seq.container),
                data: Default::default(),
            }),
            DapNode::Group(group) => DapNode::Group(Group {
                container: wire_layout(&group.container),
                dimensions: group.dimensions.clone(),
            }),
        };
        out.insert(child);
    }
    out
}

/// States of the sequence framing protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SequenceState {
    /// The next word is a start or end marker
    ExpectMarker,
    /// A start marker was read; the next bytes are a record
    DecodeRecord,
    /// The end marker was read
    Done,
}

/// Incremental decoder for the records of one sequence.
#[derive(Debug)]
struct SequenceDecoder {
    state: SequenceState,
}

impl SequenceDecoder {
    fn new() -> Self {
        SequenceDecoder {
            state: SequenceState::ExpectMarker,
        }
    }

    /// Decode the next record, or `None` after the end marker.
    fn next_record(
        &mut self,
        reader: &mut StreamReader,
        container: &Container,
    ) -> Result<Option<Record>, DapError> {
        loop {
            match self.state {
                SequenceState::ExpectMarker => {
                    let marker = reader.read(4).map_err(|err| {
                        self.state = SequenceState::Done;
                        err
                    })?;
                    if marker[..] == START_OF_SEQUENCE {
                        self.state = SequenceState::DecodeRecord;
                    } else if marker[..] == END_OF_SEQUENCE {
                        self.state = SequenceState::Done;
                    } else {
                        self.state = SequenceState::Done;
                        return Err(DapError::Framing(format!(
                            "expected a sequence marker for {}, found {:02x?} at byte {}",
                            container.id(),
                            &marker[..],
                            reader.position() - 4
                        )));
                    }
                }
                SequenceState::DecodeRecord => {
                    let record = read_record(reader, container);
                    self.state = match record {
                        Ok(_) => SequenceState::ExpectMarker,
                        Err(_) => SequenceState::Done,
                    };
                    return record.map(Some);
                }
                SequenceState::Done => return Ok(None),
            }
        }
    }
}

/// Read every record of a sequence, through its end marker.
fn read_records(
    reader: &mut StreamReader,
    container: &Container,
) -> Result<Vec<Record>, DapError> {
    let mut decoder = SequenceDecoder::new();
    let mut records = vec![];
    while let Some(record) = decoder.next_record(reader, container)? {
        records.push(record);
    }
    Ok(records)
}

fn read_record(reader: &mut StreamReader, container: &Container) -> Result<Record, DapError> {
    container
        .members()
        .iter()
        .map(|member| read_value(reader, member))
        .collect()
}

fn read_value(reader: &mut StreamReader, node: &DapNode) -> Result<Value, DapError> {
    match node {
        DapNode::Base(var) if var.shape.is_empty() => {
            if var.dtype.is_string() {
                Ok(Value::Atom(read_string(reader)?.into()))
            } else {
                dispatch(var.dtype, GetAtom { reader })
            }
        }
        DapNode::Structure(c) | DapNode::Grid(c) => Ok(Value::Struct(read_record(reader, c)?)),
        DapNode::Sequence(seq) => Ok(Value::Seq(read_records(reader, &seq.container)?)),
        node => Err(DapError::UnsupportedOperation {
            operation: "record decoding",
            kind: node.kind(),
            id: node.id().to_string(),
        }),
    }
}

/// Lazily decoded records of a sequence at the start of a payload.
///
/// Records are decoded one at a time as the iterator advances, so a consumer that stops early
/// never reads the rest of the stream. After an error the iterator is exhausted.
#[derive(Debug)]
pub struct RecordStream {
    reader: StreamReader,
    container: Container,
    decoder: SequenceDecoder,
}

impl RecordStream {
    /// Return a new RecordStream.
    ///
    /// # Arguments
    ///
    /// * `reader`: Stream positioned at the first marker of the sequence
    /// * `container`: Members of the sequence, as declared by the response DDS
    pub fn new(reader: StreamReader, container: &Container) -> Self {
        RecordStream {
            reader,
            container: wire_layout(container),
            decoder: SequenceDecoder::new(),
        }
    }

    /// Layout of the records produced by this stream.
    pub fn container(&self) -> &Container {
        &self.container
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record, DapError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder
            .next_record(&mut self.reader, &self.container)
            .transpose()
    }
}
