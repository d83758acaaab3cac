//! The Ember+ tree grammar over BER
//!
//! Maps every element variant to its application-tagged wire form and back.
//! Decode dispatch is by outer application tag; contents are a SET of
//! context-tagged fields, children a context-wrapped element collection.
//! Optional fields are omitted when unset, and any tag outside the grammar
//! fails with `UnimplementedType` - the protocol is strict, not
//! forward-compatible.

use emberplus_types::{
    Access, Addressing, Command, CommandNumber, ConnectOperation, Disposition, Element, ElementId,
    EmberError, EmberPath, EmberResult, FieldFlags, Function, FunctionContents, Invocation,
    InvocationResult, Label, Matrix, MatrixContents, MatrixMode, MatrixType, Node, NodeContents,
    Parameter, ParameterContents, ParameterType, StreamDescription, Tree, TupleItem, Value,
};

use crate::ber::{self, BerReader, BerWriter};

// Application tags of the Ember+ grammar
const TAG_ROOT: u8 = ber::application(0);
const TAG_PARAMETER: u8 = ber::application(1);
const TAG_COMMAND: u8 = ber::application(2);
const TAG_NODE: u8 = ber::application(3);
const TAG_ELEMENT_COLLECTION: u8 = ber::application(4);
const TAG_STREAM_ENTRY: u8 = ber::application(5);
const TAG_STREAM_COLLECTION: u8 = ber::application(6);
const TAG_STRING_INTEGER_PAIR: u8 = ber::application(7);
const TAG_STRING_INTEGER_COLLECTION: u8 = ber::application(8);
const TAG_QUALIFIED_PARAMETER: u8 = ber::application(9);
const TAG_QUALIFIED_NODE: u8 = ber::application(10);
const TAG_ROOT_ELEMENT_COLLECTION: u8 = ber::application(11);
const TAG_STREAM_DESCRIPTION: u8 = ber::application(12);
const TAG_MATRIX: u8 = ber::application(13);
const TAG_TARGET: u8 = ber::application(14);
const TAG_SOURCE: u8 = ber::application(15);
const TAG_CONNECTION: u8 = ber::application(16);
const TAG_QUALIFIED_MATRIX: u8 = ber::application(17);
const TAG_LABEL: u8 = ber::application(18);
const TAG_FUNCTION: u8 = ber::application(19);
const TAG_QUALIFIED_FUNCTION: u8 = ber::application(20);
const TAG_TUPLE_ITEM: u8 = ber::application(21);
const TAG_INVOCATION: u8 = ber::application(22);
const TAG_INVOCATION_RESULT: u8 = ber::application(23);

/// One entry of a stream collection push
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub identifier: i32,
    pub value: Value,
}

/// Everything a Root wrapper can carry
#[derive(Debug, Clone)]
pub enum DecodedRoot {
    /// A tree fragment of elements
    Elements(Tree),
    /// The answer to a function invocation
    InvocationResult(InvocationResult),
    /// A push of stream-element values
    Streams(Vec<StreamEntry>),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a whole tree fragment under the Root wrapper
pub fn encode_tree(tree: &Tree) -> EmberResult<Vec<u8>> {
    let mut writer = BerWriter::new();
    writer.start_sequence(TAG_ROOT);
    writer.start_sequence(TAG_ROOT_ELEMENT_COLLECTION);
    for child in tree.children(tree.root()) {
        writer.start_sequence(ber::context(0));
        encode_element(tree, *child, &mut writer)?;
        writer.end_sequence()?;
    }
    writer.end_sequence()?;
    writer.end_sequence()?;
    writer.finish()
}

/// Encode an invocation result under the Root wrapper
pub fn encode_invocation_result(result: &InvocationResult) -> EmberResult<Vec<u8>> {
    let mut writer = BerWriter::new();
    writer.start_sequence(TAG_ROOT);
    writer.start_sequence(TAG_INVOCATION_RESULT);
    context_int(&mut writer, 0, result.invocation_id)?;
    writer.start_sequence(ber::context(1));
    writer.write_boolean(result.success);
    writer.end_sequence()?;
    if !result.result.is_empty() {
        writer.start_sequence(ber::context(2));
        writer.start_sequence(ber::SEQUENCE);
        for value in &result.result {
            writer.start_sequence(ber::context(0));
            writer.write_value(value);
            writer.end_sequence()?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    writer.end_sequence()?;
    writer.end_sequence()?;
    writer.finish()
}

/// Encode a stream-value push under the Root wrapper
pub fn encode_stream_collection(entries: &[StreamEntry]) -> EmberResult<Vec<u8>> {
    let mut writer = BerWriter::new();
    writer.start_sequence(TAG_ROOT);
    writer.start_sequence(TAG_STREAM_COLLECTION);
    for entry in entries {
        writer.start_sequence(ber::context(0));
        writer.start_sequence(TAG_STREAM_ENTRY);
        context_int(&mut writer, 0, entry.identifier as i64)?;
        writer.start_sequence(ber::context(1));
        writer.write_value(&entry.value);
        writer.end_sequence()?;
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    writer.end_sequence()?;
    writer.end_sequence()?;
    writer.finish()
}

fn context_int(writer: &mut BerWriter, number: u8, value: i64) -> EmberResult<()> {
    writer.start_sequence(ber::context(number));
    writer.write_int(value);
    writer.end_sequence()
}

fn context_string(writer: &mut BerWriter, number: u8, value: &str) -> EmberResult<()> {
    writer.start_sequence(ber::context(number));
    writer.write_string(value);
    writer.end_sequence()
}

fn context_bool(writer: &mut BerWriter, number: u8, value: bool) -> EmberResult<()> {
    writer.start_sequence(ber::context(number));
    writer.write_boolean(value);
    writer.end_sequence()
}

fn context_value(writer: &mut BerWriter, number: u8, value: &Value) -> EmberResult<()> {
    writer.start_sequence(ber::context(number));
    writer.write_value(value);
    writer.end_sequence()
}

fn encode_addressing(writer: &mut BerWriter, addressing: &Addressing) -> EmberResult<()> {
    writer.start_sequence(ber::context(0));
    match addressing {
        Addressing::Number(number) => writer.write_int(*number as i64),
        Addressing::Path(path) => writer.write_relative_oid(path.numbers()),
    }
    writer.end_sequence()
}

fn encode_children(tree: &Tree, id: ElementId, writer: &mut BerWriter) -> EmberResult<()> {
    let children = tree.children(id);
    if children.is_empty() {
        return Ok(());
    }
    writer.start_sequence(ber::context(2));
    writer.start_sequence(TAG_ELEMENT_COLLECTION);
    for child in children {
        writer.start_sequence(ber::context(0));
        encode_element(tree, *child, writer)?;
        writer.end_sequence()?;
    }
    writer.end_sequence()?;
    writer.end_sequence()
}

fn encode_element(tree: &Tree, id: ElementId, writer: &mut BerWriter) -> EmberResult<()> {
    let element = tree
        .element(id)
        .ok_or_else(|| EmberError::InvalidEmberNode("stale element handle".into()))?;
    match element {
        Element::Root => Err(EmberError::InvalidEmberNode(
            "Root cannot be nested inside a tree".into(),
        )),
        Element::Node(node) => encode_node(tree, id, node, writer),
        Element::Parameter(parameter) => encode_parameter(tree, id, parameter, writer),
        Element::Matrix(matrix) => encode_matrix(tree, id, matrix, writer),
        Element::Function(function) => encode_function(tree, id, function, writer),
        Element::Command(command) => encode_command(command, writer),
    }
}

fn encode_node(tree: &Tree, id: ElementId, node: &Node, writer: &mut BerWriter) -> EmberResult<()> {
    let tag = if node.addressing.is_qualified() {
        TAG_QUALIFIED_NODE
    } else {
        TAG_NODE
    };
    writer.start_sequence(tag);
    encode_addressing(writer, &node.addressing)?;
    if let Some(contents) = &node.contents {
        writer.start_sequence(ber::context(1));
        writer.start_sequence(ber::SET);
        if let Some(v) = &contents.identifier {
            context_string(writer, 0, v)?;
        }
        if let Some(v) = &contents.description {
            context_string(writer, 1, v)?;
        }
        if let Some(v) = contents.is_root {
            context_bool(writer, 2, v)?;
        }
        if let Some(v) = contents.is_online {
            context_bool(writer, 3, v)?;
        }
        if let Some(v) = &contents.schema_identifiers {
            context_string(writer, 4, v)?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    encode_children(tree, id, writer)?;
    writer.end_sequence()
}

fn encode_parameter(
    tree: &Tree,
    id: ElementId,
    parameter: &Parameter,
    writer: &mut BerWriter,
) -> EmberResult<()> {
    let tag = if parameter.addressing.is_qualified() {
        TAG_QUALIFIED_PARAMETER
    } else {
        TAG_PARAMETER
    };
    writer.start_sequence(tag);
    encode_addressing(writer, &parameter.addressing)?;
    if let Some(contents) = &parameter.contents {
        writer.start_sequence(ber::context(1));
        writer.start_sequence(ber::SET);
        if let Some(v) = &contents.identifier {
            context_string(writer, 0, v)?;
        }
        if let Some(v) = &contents.description {
            context_string(writer, 1, v)?;
        }
        if let Some(v) = &contents.value {
            context_value(writer, 2, v)?;
        }
        if let Some(v) = &contents.minimum {
            context_value(writer, 3, v)?;
        }
        if let Some(v) = &contents.maximum {
            context_value(writer, 4, v)?;
        }
        if let Some(v) = contents.access {
            context_int(writer, 5, i32::from(v) as i64)?;
        }
        if let Some(v) = &contents.format {
            context_string(writer, 6, v)?;
        }
        if let Some(v) = &contents.enumeration {
            context_string(writer, 7, v)?;
        }
        if let Some(v) = contents.factor {
            context_int(writer, 8, v as i64)?;
        }
        if let Some(v) = contents.is_online {
            context_bool(writer, 9, v)?;
        }
        if let Some(v) = &contents.formula {
            context_string(writer, 10, v)?;
        }
        if let Some(v) = contents.step {
            context_int(writer, 11, v as i64)?;
        }
        if let Some(v) = &contents.default {
            context_value(writer, 12, v)?;
        }
        if let Some(v) = contents.parameter_type {
            context_int(writer, 13, i32::from(v) as i64)?;
        }
        if let Some(v) = contents.stream_identifier {
            context_int(writer, 14, v as i64)?;
        }
        if let Some(entries) = &contents.enum_map {
            writer.start_sequence(ber::context(15));
            writer.start_sequence(TAG_STRING_INTEGER_COLLECTION);
            for (name, value) in entries {
                writer.start_sequence(ber::context(0));
                writer.start_sequence(TAG_STRING_INTEGER_PAIR);
                context_string(writer, 0, name)?;
                context_int(writer, 1, *value)?;
                writer.end_sequence()?;
                writer.end_sequence()?;
            }
            writer.end_sequence()?;
            writer.end_sequence()?;
        }
        if let Some(v) = contents.stream_descriptor {
            writer.start_sequence(ber::context(16));
            writer.start_sequence(TAG_STREAM_DESCRIPTION);
            context_int(writer, 0, v.format as i64)?;
            context_int(writer, 1, v.offset as i64)?;
            writer.end_sequence()?;
            writer.end_sequence()?;
        }
        if let Some(v) = &contents.schema_identifiers {
            context_string(writer, 17, v)?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    encode_children(tree, id, writer)?;
    writer.end_sequence()
}

fn encode_command(command: &Command, writer: &mut BerWriter) -> EmberResult<()> {
    writer.start_sequence(TAG_COMMAND);
    context_int(writer, 0, i32::from(command.number) as i64)?;
    if let Some(flags) = command.field_flags {
        context_int(writer, 1, i32::from(flags) as i64)?;
    }
    if let Some(invocation) = &command.invocation {
        writer.start_sequence(ber::context(2));
        writer.start_sequence(TAG_INVOCATION);
        context_int(writer, 0, invocation.id)?;
        if !invocation.arguments.is_empty() {
            writer.start_sequence(ber::context(1));
            writer.start_sequence(ber::SEQUENCE);
            for value in &invocation.arguments {
                writer.start_sequence(ber::context(0));
                writer.write_value(value);
                writer.end_sequence()?;
            }
            writer.end_sequence()?;
            writer.end_sequence()?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    writer.end_sequence()
}

fn encode_tuple_items(writer: &mut BerWriter, number: u8, items: &[TupleItem]) -> EmberResult<()> {
    writer.start_sequence(ber::context(number));
    writer.start_sequence(ber::SEQUENCE);
    for item in items {
        writer.start_sequence(ber::context(0));
        writer.start_sequence(TAG_TUPLE_ITEM);
        if let Some(t) = item.item_type {
            context_int(writer, 0, i32::from(t) as i64)?;
        }
        if let Some(name) = &item.name {
            context_string(writer, 1, name)?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    writer.end_sequence()?;
    writer.end_sequence()
}

fn encode_function(
    tree: &Tree,
    id: ElementId,
    function: &Function,
    writer: &mut BerWriter,
) -> EmberResult<()> {
    let tag = if function.addressing.is_qualified() {
        TAG_QUALIFIED_FUNCTION
    } else {
        TAG_FUNCTION
    };
    writer.start_sequence(tag);
    encode_addressing(writer, &function.addressing)?;
    if let Some(contents) = &function.contents {
        writer.start_sequence(ber::context(1));
        writer.start_sequence(ber::SET);
        if let Some(v) = &contents.identifier {
            context_string(writer, 0, v)?;
        }
        if let Some(v) = &contents.description {
            context_string(writer, 1, v)?;
        }
        if let Some(items) = &contents.arguments {
            encode_tuple_items(writer, 2, items)?;
        }
        if let Some(items) = &contents.result {
            encode_tuple_items(writer, 3, items)?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    encode_children(tree, id, writer)?;
    writer.end_sequence()
}

fn encode_matrix(
    tree: &Tree,
    id: ElementId,
    matrix: &Matrix,
    writer: &mut BerWriter,
) -> EmberResult<()> {
    let tag = if matrix.addressing.is_qualified() {
        TAG_QUALIFIED_MATRIX
    } else {
        TAG_MATRIX
    };
    writer.start_sequence(tag);
    encode_addressing(writer, &matrix.addressing)?;
    if let Some(contents) = &matrix.contents {
        writer.start_sequence(ber::context(1));
        writer.start_sequence(ber::SET);
        if let Some(v) = &contents.identifier {
            context_string(writer, 0, v)?;
        }
        if let Some(v) = &contents.description {
            context_string(writer, 1, v)?;
        }
        if let Some(v) = contents.matrix_type {
            context_int(writer, 2, i32::from(v) as i64)?;
        }
        if let Some(v) = contents.mode {
            context_int(writer, 3, i32::from(v) as i64)?;
        }
        if let Some(v) = contents.target_count {
            context_int(writer, 4, v as i64)?;
        }
        if let Some(v) = contents.source_count {
            context_int(writer, 5, v as i64)?;
        }
        if let Some(v) = contents.maximum_total_connects {
            context_int(writer, 6, v as i64)?;
        }
        if let Some(v) = contents.maximum_connects_per_target {
            context_int(writer, 7, v as i64)?;
        }
        if let Some(v) = &contents.parameters_location {
            writer.start_sequence(ber::context(8));
            writer.write_relative_oid(v.numbers());
            writer.end_sequence()?;
        }
        if let Some(v) = contents.gain_parameter_number {
            context_int(writer, 9, v as i64)?;
        }
        if let Some(labels) = &contents.labels {
            writer.start_sequence(ber::context(10));
            writer.start_sequence(ber::SEQUENCE);
            for label in labels {
                writer.start_sequence(ber::context(0));
                writer.start_sequence(TAG_LABEL);
                writer.start_sequence(ber::context(0));
                writer.write_relative_oid(label.base_path.numbers());
                writer.end_sequence()?;
                if let Some(description) = &label.description {
                    context_string(writer, 1, description)?;
                }
                writer.end_sequence()?;
                writer.end_sequence()?;
            }
            writer.end_sequence()?;
            writer.end_sequence()?;
        }
        if let Some(v) = &contents.schema_identifiers {
            context_string(writer, 11, v)?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    encode_children(tree, id, writer)?;
    if let Some(targets) = &matrix.targets {
        writer.start_sequence(ber::context(3));
        writer.start_sequence(ber::SEQUENCE);
        for target in targets {
            writer.start_sequence(ber::context(0));
            writer.start_sequence(TAG_TARGET);
            context_int(writer, 0, *target as i64)?;
            writer.end_sequence()?;
            writer.end_sequence()?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    if let Some(sources) = &matrix.sources {
        writer.start_sequence(ber::context(4));
        writer.start_sequence(ber::SEQUENCE);
        for source in sources {
            writer.start_sequence(ber::context(0));
            writer.start_sequence(TAG_SOURCE);
            context_int(writer, 0, *source as i64)?;
            writer.end_sequence()?;
            writer.end_sequence()?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    if !matrix.connections().is_empty() {
        writer.start_sequence(ber::context(5));
        writer.start_sequence(ber::SEQUENCE);
        for connection in matrix.connections().values() {
            writer.start_sequence(ber::context(0));
            writer.start_sequence(TAG_CONNECTION);
            context_int(writer, 0, connection.target as i64)?;
            if !connection.sources().is_empty() {
                writer.start_sequence(ber::context(1));
                writer.write_relative_oid(connection.sources());
                writer.end_sequence()?;
            }
            if let Some(operation) = connection.operation {
                context_int(writer, 2, i32::from(operation) as i64)?;
            }
            if let Some(disposition) = connection.disposition {
                context_int(writer, 3, i32::from(disposition) as i64)?;
            }
            writer.end_sequence()?;
            writer.end_sequence()?;
        }
        writer.end_sequence()?;
        writer.end_sequence()?;
    }
    writer.end_sequence()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a Root wrapper into its payload
pub fn decode_root(data: &[u8]) -> EmberResult<DecodedRoot> {
    let mut reader = BerReader::new(data);
    let mut root = reader.get_sequence(TAG_ROOT)?;
    match root.peek() {
        None => Ok(DecodedRoot::Elements(Tree::new())),
        Some(TAG_ROOT_ELEMENT_COLLECTION) => {
            let mut elements = root.get_sequence(TAG_ROOT_ELEMENT_COLLECTION)?;
            let mut tree = Tree::new();
            let parent = tree.root();
            while elements.remain() > 0 {
                let mut item = elements.get_sequence(ber::context(0))?;
                decode_element(&mut item, &mut tree, parent)?;
            }
            Ok(DecodedRoot::Elements(tree))
        }
        Some(TAG_INVOCATION_RESULT) => {
            let mut body = root.get_sequence(TAG_INVOCATION_RESULT)?;
            Ok(DecodedRoot::InvocationResult(decode_invocation_result(
                &mut body,
            )?))
        }
        Some(TAG_STREAM_COLLECTION) => {
            let mut body = root.get_sequence(TAG_STREAM_COLLECTION)?;
            let mut entries = Vec::new();
            while body.remain() > 0 {
                let mut item = body.get_sequence(ber::context(0))?;
                let mut entry = item.get_sequence(TAG_STREAM_ENTRY)?;
                let identifier = entry.get_sequence(ber::context(0))?.read_int()? as i32;
                let value = entry.get_sequence(ber::context(1))?.read_value()?;
                entries.push(StreamEntry { identifier, value });
            }
            Ok(DecodedRoot::Streams(entries))
        }
        Some(tag) => Err(EmberError::UnimplementedType { tag }),
    }
}

fn decode_element(
    reader: &mut BerReader<'_>,
    tree: &mut Tree,
    parent: ElementId,
) -> EmberResult<ElementId> {
    let tag = reader
        .peek()
        .ok_or_else(|| EmberError::InvalidEmberNode("empty element wrapper".into()))?;
    let mut content = reader.get_sequence(tag)?;
    match tag {
        TAG_NODE => decode_node(&mut content, tree, parent, false),
        TAG_QUALIFIED_NODE => decode_node(&mut content, tree, parent, true),
        TAG_PARAMETER => decode_parameter(&mut content, tree, parent, false),
        TAG_QUALIFIED_PARAMETER => decode_parameter(&mut content, tree, parent, true),
        TAG_MATRIX => decode_matrix(&mut content, tree, parent, false),
        TAG_QUALIFIED_MATRIX => decode_matrix(&mut content, tree, parent, true),
        TAG_FUNCTION => decode_function(&mut content, tree, parent, false),
        TAG_QUALIFIED_FUNCTION => decode_function(&mut content, tree, parent, true),
        TAG_COMMAND => decode_command(&mut content, tree, parent),
        other => Err(EmberError::UnimplementedType { tag: other }),
    }
}

fn decode_addressing(reader: &mut BerReader<'_>, qualified: bool) -> EmberResult<Addressing> {
    let mut scope = reader.get_sequence(ber::context(0))?;
    if qualified {
        let numbers = scope.read_relative_oid()?;
        Ok(Addressing::Path(EmberPath::new(numbers)))
    } else {
        let number = scope.read_int()?;
        if number < 0 {
            return Err(EmberError::InvalidEmberNode(format!(
                "negative element number {number}"
            )));
        }
        Ok(Addressing::Number(number as u32))
    }
}

fn decode_children(
    reader: &mut BerReader<'_>,
    tree: &mut Tree,
    parent: ElementId,
) -> EmberResult<()> {
    let mut wrapper = reader.get_sequence(ber::context(2))?;
    let mut collection = wrapper.get_sequence(TAG_ELEMENT_COLLECTION)?;
    while collection.remain() > 0 {
        let mut item = collection.get_sequence(ber::context(0))?;
        decode_element(&mut item, tree, parent)?;
    }
    Ok(())
}

fn decode_node(
    reader: &mut BerReader<'_>,
    tree: &mut Tree,
    parent: ElementId,
    qualified: bool,
) -> EmberResult<ElementId> {
    let addressing = decode_addressing(reader, qualified)?;
    let mut contents: Option<NodeContents> = None;

    if reader.peek() == Some(ber::context(1)) {
        let mut wrapper = reader.get_sequence(ber::context(1))?;
        let mut set = wrapper.get_sequence(ber::SET)?;
        let mut decoded = NodeContents::default();
        while let Some(tag) = set.peek() {
            let mut field = set.get_sequence(tag)?;
            match ber::context_number(tag) {
                Some(0) => decoded.identifier = Some(field.read_string()?),
                Some(1) => decoded.description = Some(field.read_string()?),
                Some(2) => decoded.is_root = Some(field.read_boolean()?),
                Some(3) => decoded.is_online = Some(field.read_boolean()?),
                Some(4) => decoded.schema_identifiers = Some(field.read_string()?),
                _ => return Err(EmberError::UnimplementedType { tag }),
            }
        }
        contents = Some(decoded);
    }

    let id = tree.insert(parent, Element::Node(Node { addressing, contents }))?;
    if reader.peek() == Some(ber::context(2)) {
        decode_children(reader, tree, id)?;
    }
    Ok(id)
}

fn decode_parameter(
    reader: &mut BerReader<'_>,
    tree: &mut Tree,
    parent: ElementId,
    qualified: bool,
) -> EmberResult<ElementId> {
    let addressing = decode_addressing(reader, qualified)?;
    let mut contents: Option<ParameterContents> = None;

    if reader.peek() == Some(ber::context(1)) {
        let mut wrapper = reader.get_sequence(ber::context(1))?;
        let mut set = wrapper.get_sequence(ber::SET)?;
        let mut decoded = ParameterContents::default();
        while let Some(tag) = set.peek() {
            let mut field = set.get_sequence(tag)?;
            match ber::context_number(tag) {
                Some(0) => decoded.identifier = Some(field.read_string()?),
                Some(1) => decoded.description = Some(field.read_string()?),
                Some(2) => decoded.value = Some(field.read_value()?),
                Some(3) => decoded.minimum = Some(field.read_value()?),
                Some(4) => decoded.maximum = Some(field.read_value()?),
                Some(5) => {
                    let code = field.read_int()? as i32;
                    decoded.access = Some(Access::try_from(code).map_err(|_| {
                        EmberError::InvalidEmberNode(format!("bad access code {code}"))
                    })?);
                }
                Some(6) => decoded.format = Some(field.read_string()?),
                Some(7) => decoded.enumeration = Some(field.read_string()?),
                Some(8) => decoded.factor = Some(field.read_int()? as i32),
                Some(9) => decoded.is_online = Some(field.read_boolean()?),
                Some(10) => decoded.formula = Some(field.read_string()?),
                Some(11) => decoded.step = Some(field.read_int()? as i32),
                Some(12) => decoded.default = Some(field.read_value()?),
                Some(13) => {
                    let code = field.read_int()? as i32;
                    decoded.parameter_type = Some(ParameterType::try_from(code).map_err(|_| {
                        EmberError::InvalidEmberNode(format!("bad parameter type {code}"))
                    })?);
                }
                Some(14) => decoded.stream_identifier = Some(field.read_int()? as i32),
                Some(15) => {
                    let mut collection = field.get_sequence(TAG_STRING_INTEGER_COLLECTION)?;
                    let mut entries = Vec::new();
                    while collection.remain() > 0 {
                        let mut item = collection.get_sequence(ber::context(0))?;
                        let mut pair = item.get_sequence(TAG_STRING_INTEGER_PAIR)?;
                        let name = pair.get_sequence(ber::context(0))?.read_string()?;
                        let value = pair.get_sequence(ber::context(1))?.read_int()?;
                        entries.push((name, value));
                    }
                    decoded.enum_map = Some(entries);
                }
                Some(16) => {
                    let mut description = field.get_sequence(TAG_STREAM_DESCRIPTION)?;
                    let format = description.get_sequence(ber::context(0))?.read_int()? as i32;
                    let offset = description.get_sequence(ber::context(1))?.read_int()? as i32;
                    decoded.stream_descriptor = Some(StreamDescription { format, offset });
                }
                Some(17) => decoded.schema_identifiers = Some(field.read_string()?),
                _ => return Err(EmberError::UnimplementedType { tag }),
            }
        }
        contents = Some(decoded);
    }

    let id = tree.insert(parent, Element::Parameter(Parameter { addressing, contents }))?;
    if reader.peek() == Some(ber::context(2)) {
        decode_children(reader, tree, id)?;
    }
    Ok(id)
}

fn decode_command(
    reader: &mut BerReader<'_>,
    tree: &mut Tree,
    parent: ElementId,
) -> EmberResult<ElementId> {
    let code = reader.get_sequence(ber::context(0))?.read_int()? as i32;
    let number = CommandNumber::try_from(code)
        .map_err(|_| EmberError::InvalidEmberNode(format!("unknown command number {code}")))?;
    let mut command = Command {
        number,
        field_flags: None,
        invocation: None,
    };
    while let Some(tag) = reader.peek() {
        let mut field = reader.get_sequence(tag)?;
        match ber::context_number(tag) {
            Some(1) => {
                let flags = field.read_int()? as i32;
                command.field_flags = Some(FieldFlags::try_from(flags).map_err(|_| {
                    EmberError::InvalidEmberNode(format!("bad field flags {flags}"))
                })?);
            }
            Some(2) => {
                let mut invocation = field.get_sequence(TAG_INVOCATION)?;
                let id = invocation.get_sequence(ber::context(0))?.read_int()?;
                let mut arguments = Vec::new();
                if invocation.peek() == Some(ber::context(1)) {
                    let mut wrapper = invocation.get_sequence(ber::context(1))?;
                    let mut tuple = wrapper.get_sequence(ber::SEQUENCE)?;
                    while tuple.remain() > 0 {
                        let mut item = tuple.get_sequence(ber::context(0))?;
                        arguments.push(item.read_value()?);
                    }
                }
                command.invocation = Some(Invocation::new(id, arguments));
            }
            _ => return Err(EmberError::UnimplementedType { tag }),
        }
    }
    tree.insert(parent, Element::Command(command))
}

fn decode_tuple_items(reader: &mut BerReader<'_>) -> EmberResult<Vec<TupleItem>> {
    let mut sequence = reader.get_sequence(ber::SEQUENCE)?;
    let mut items = Vec::new();
    while sequence.remain() > 0 {
        let mut wrapper = sequence.get_sequence(ber::context(0))?;
        let mut body = wrapper.get_sequence(TAG_TUPLE_ITEM)?;
        let mut item = TupleItem::default();
        while let Some(tag) = body.peek() {
            let mut field = body.get_sequence(tag)?;
            match ber::context_number(tag) {
                Some(0) => {
                    let code = field.read_int()? as i32;
                    item.item_type = Some(ParameterType::try_from(code).map_err(|_| {
                        EmberError::InvalidEmberNode(format!("bad tuple item type {code}"))
                    })?);
                }
                Some(1) => item.name = Some(field.read_string()?),
                _ => return Err(EmberError::UnimplementedType { tag }),
            }
        }
        items.push(item);
    }
    Ok(items)
}

fn decode_function(
    reader: &mut BerReader<'_>,
    tree: &mut Tree,
    parent: ElementId,
    qualified: bool,
) -> EmberResult<ElementId> {
    let addressing = decode_addressing(reader, qualified)?;
    let mut contents: Option<FunctionContents> = None;

    if reader.peek() == Some(ber::context(1)) {
        let mut wrapper = reader.get_sequence(ber::context(1))?;
        let mut set = wrapper.get_sequence(ber::SET)?;
        let mut decoded = FunctionContents::default();
        while let Some(tag) = set.peek() {
            let mut field = set.get_sequence(tag)?;
            match ber::context_number(tag) {
                Some(0) => decoded.identifier = Some(field.read_string()?),
                Some(1) => decoded.description = Some(field.read_string()?),
                Some(2) => decoded.arguments = Some(decode_tuple_items(&mut field)?),
                Some(3) => decoded.result = Some(decode_tuple_items(&mut field)?),
                _ => return Err(EmberError::UnimplementedType { tag }),
            }
        }
        contents = Some(decoded);
    }

    let id = tree.insert(parent, Element::Function(Function { addressing, contents }))?;
    if reader.peek() == Some(ber::context(2)) {
        decode_children(reader, tree, id)?;
    }
    Ok(id)
}

fn decode_matrix(
    reader: &mut BerReader<'_>,
    tree: &mut Tree,
    parent: ElementId,
    qualified: bool,
) -> EmberResult<ElementId> {
    let addressing = decode_addressing(reader, qualified)?;
    let mut matrix = Matrix::minimal(addressing);

    if reader.peek() == Some(ber::context(1)) {
        let mut wrapper = reader.get_sequence(ber::context(1))?;
        let mut set = wrapper.get_sequence(ber::SET)?;
        let mut decoded = MatrixContents::default();
        while let Some(tag) = set.peek() {
            let mut field = set.get_sequence(tag)?;
            match ber::context_number(tag) {
                Some(0) => decoded.identifier = Some(field.read_string()?),
                Some(1) => decoded.description = Some(field.read_string()?),
                Some(2) => {
                    let code = field.read_int()? as i32;
                    decoded.matrix_type = Some(MatrixType::try_from(code).map_err(|_| {
                        EmberError::InvalidEmberNode(format!("bad matrix type {code}"))
                    })?);
                }
                Some(3) => {
                    let code = field.read_int()? as i32;
                    decoded.mode = Some(MatrixMode::try_from(code).map_err(|_| {
                        EmberError::InvalidEmberNode(format!("bad matrix mode {code}"))
                    })?);
                }
                Some(4) => decoded.target_count = Some(field.read_int()? as i32),
                Some(5) => decoded.source_count = Some(field.read_int()? as i32),
                Some(6) => decoded.maximum_total_connects = Some(field.read_int()? as i32),
                Some(7) => decoded.maximum_connects_per_target = Some(field.read_int()? as i32),
                Some(8) => {
                    decoded.parameters_location =
                        Some(EmberPath::new(field.read_relative_oid()?));
                }
                Some(9) => decoded.gain_parameter_number = Some(field.read_int()? as i32),
                Some(10) => {
                    let mut sequence = field.get_sequence(ber::SEQUENCE)?;
                    let mut labels = Vec::new();
                    while sequence.remain() > 0 {
                        let mut item = sequence.get_sequence(ber::context(0))?;
                        let mut body = item.get_sequence(TAG_LABEL)?;
                        let base_path =
                            EmberPath::new(body.get_sequence(ber::context(0))?.read_relative_oid()?);
                        let description = if body.peek() == Some(ber::context(1)) {
                            Some(body.get_sequence(ber::context(1))?.read_string()?)
                        } else {
                            None
                        };
                        labels.push(Label {
                            base_path,
                            description,
                        });
                    }
                    decoded.labels = Some(labels);
                }
                Some(11) => decoded.schema_identifiers = Some(field.read_string()?),
                _ => return Err(EmberError::UnimplementedType { tag }),
            }
        }
        matrix.contents = Some(decoded);
    }

    // Insert before children so they have a parent id; the signal lists
    // follow the children in the encoded order and are applied afterwards.
    let id = tree.insert(parent, Element::Matrix(matrix))?;
    if reader.peek() == Some(ber::context(2)) {
        decode_children(reader, tree, id)?;
    }

    let mut tail = Matrix::default();
    decode_matrix_tail(reader, &mut tail)?;
    if let Some(Element::Matrix(stored)) = tree.element_mut(id) {
        for connection in tail.connections().values() {
            stored.set_sources(connection.target, connection.sources().to_vec());
            let entry = stored.connection_mut(connection.target);
            entry.operation = connection.operation;
            entry.disposition = connection.disposition;
        }
        stored.targets = tail.targets;
        stored.sources = tail.sources;
    }
    Ok(id)
}

fn decode_matrix_tail(reader: &mut BerReader<'_>, matrix: &mut Matrix) -> EmberResult<()> {
    while let Some(tag) = reader.peek() {
        let mut field = reader.get_sequence(tag)?;
        match ber::context_number(tag) {
            Some(3) => {
                let mut sequence = field.get_sequence(ber::SEQUENCE)?;
                let mut targets = Vec::new();
                while sequence.remain() > 0 {
                    let mut item = sequence.get_sequence(ber::context(0))?;
                    let mut body = item.get_sequence(TAG_TARGET)?;
                    targets.push(body.get_sequence(ber::context(0))?.read_int()? as u32);
                }
                matrix.targets = Some(targets);
            }
            Some(4) => {
                let mut sequence = field.get_sequence(ber::SEQUENCE)?;
                let mut sources = Vec::new();
                while sequence.remain() > 0 {
                    let mut item = sequence.get_sequence(ber::context(0))?;
                    let mut body = item.get_sequence(TAG_SOURCE)?;
                    sources.push(body.get_sequence(ber::context(0))?.read_int()? as u32);
                }
                matrix.sources = Some(sources);
            }
            Some(5) => {
                let mut sequence = field.get_sequence(ber::SEQUENCE)?;
                while sequence.remain() > 0 {
                    let mut item = sequence.get_sequence(ber::context(0))?;
                    let mut body = item.get_sequence(TAG_CONNECTION)?;
                    let target = body.get_sequence(ber::context(0))?.read_int()? as u32;
                    let mut sources = Vec::new();
                    let mut operation = None;
                    let mut disposition = None;
                    while let Some(inner) = body.peek() {
                        let mut value = body.get_sequence(inner)?;
                        match ber::context_number(inner) {
                            Some(1) => sources = value.read_relative_oid()?,
                            Some(2) => {
                                let code = value.read_int()? as i32;
                                operation =
                                    Some(ConnectOperation::try_from(code).map_err(|_| {
                                        EmberError::InvalidEmberNode(format!(
                                            "bad connect operation {code}"
                                        ))
                                    })?);
                            }
                            Some(3) => {
                                let code = value.read_int()? as i32;
                                disposition = Some(Disposition::try_from(code).map_err(|_| {
                                    EmberError::InvalidEmberNode(format!(
                                        "bad disposition {code}"
                                    ))
                                })?);
                            }
                            _ => return Err(EmberError::UnimplementedType { tag: inner }),
                        }
                    }
                    matrix.set_sources(target, sources);
                    let entry = matrix.connection_mut(target);
                    entry.operation = operation;
                    entry.disposition = disposition;
                }
            }
            _ => return Err(EmberError::UnimplementedType { tag }),
        }
    }
    Ok(())
}

fn decode_invocation_result(reader: &mut BerReader<'_>) -> EmberResult<InvocationResult> {
    let invocation_id = reader.get_sequence(ber::context(0))?.read_int()?;
    let mut success = true;
    let mut result = Vec::new();
    while let Some(tag) = reader.peek() {
        let mut field = reader.get_sequence(tag)?;
        match ber::context_number(tag) {
            Some(1) => success = field.read_boolean()?,
            Some(2) => {
                let mut tuple = field.get_sequence(ber::SEQUENCE)?;
                while tuple.remain() > 0 {
                    let mut item = tuple.get_sequence(ber::context(0))?;
                    result.push(item.read_value()?);
                }
            }
            _ => return Err(EmberError::UnimplementedType { tag }),
        }
    }
    Ok(InvocationResult {
        invocation_id,
        success,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(tree: &Tree) -> Tree {
        let bytes = encode_tree(tree).unwrap();
        match decode_root(&bytes).unwrap() {
            DecodedRoot::Elements(decoded) => decoded,
            other => panic!("expected elements, got {other:?}"),
        }
    }

    #[test]
    fn test_node_round_trip() {
        let mut tree = Tree::new();
        let root = tree.root();
        let node = tree
            .insert(
                root,
                Element::Node(Node::numbered(
                    0,
                    NodeContents {
                        identifier: Some("identity".into()),
                        description: Some("device info".into()),
                        is_online: Some(true),
                        ..Default::default()
                    },
                )),
            )
            .unwrap();
        tree.insert(
            node,
            Element::Parameter(Parameter::numbered(
                1,
                ParameterContents::with_value("product", Value::String("router".into())),
            )),
        )
        .unwrap();

        let decoded = round_trip(&tree);
        let top = decoded.children(decoded.root());
        assert_eq!(top.len(), 1);
        let element = decoded.element(top[0]).unwrap();
        assert_eq!(element.identifier(), Some("identity"));
        assert_eq!(element.number(), Some(0));

        let child = decoded.lookup(&"0.1".parse().unwrap()).unwrap();
        match decoded.element(child).unwrap() {
            Element::Parameter(p) => {
                let contents = p.contents.as_ref().unwrap();
                assert_eq!(contents.value, Some(Value::String("router".into())));
            }
            other => panic!("expected parameter, got {}", other.kind()),
        }
    }

    #[test]
    fn test_parameter_full_contents_round_trip() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.insert(
            root,
            Element::Parameter(Parameter::numbered(
                4,
                ParameterContents {
                    identifier: Some("gain".into()),
                    value: Some(Value::Real(-3.5)),
                    minimum: Some(Value::Real(-64.0)),
                    maximum: Some(Value::Real(12.0)),
                    access: Some(Access::ReadWrite),
                    factor: Some(10),
                    parameter_type: Some(ParameterType::Real),
                    stream_identifier: Some(9),
                    stream_descriptor: Some(StreamDescription { format: 1, offset: 4 }),
                    enum_map: Some(vec![("off".into(), 0), ("on".into(), 1)]),
                    ..Default::default()
                },
            )),
        )
        .unwrap();

        let decoded = round_trip(&tree);
        let id = decoded.lookup(&"4".parse().unwrap()).unwrap();
        match decoded.element(id).unwrap() {
            Element::Parameter(p) => {
                let contents = p.contents.as_ref().unwrap();
                assert_eq!(contents.value, Some(Value::Real(-3.5)));
                assert_eq!(contents.access, Some(Access::ReadWrite));
                assert_eq!(contents.stream_identifier, Some(9));
                assert_eq!(
                    contents.stream_descriptor,
                    Some(StreamDescription { format: 1, offset: 4 })
                );
                assert_eq!(
                    contents.enum_map,
                    Some(vec![("off".into(), 0), ("on".into(), 1)])
                );
                assert!(p.contents.as_ref().unwrap().is_stream());
            }
            other => panic!("expected parameter, got {}", other.kind()),
        }
    }

    #[test]
    fn test_qualified_parameter_round_trip() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.insert(
            root,
            Element::Parameter(Parameter {
                addressing: Addressing::Path("1.5.2".parse().unwrap()),
                contents: Some(ParameterContents {
                    value: Some(Value::Integer(100)),
                    ..Default::default()
                }),
            }),
        )
        .unwrap();

        let decoded = round_trip(&tree);
        let id = decoded.lookup(&"1.5.2".parse().unwrap()).unwrap();
        let element = decoded.element(id).unwrap();
        assert!(element.is_qualified());
        assert_eq!(element.qualified_path().unwrap().to_string(), "1.5.2");
    }

    #[test]
    fn test_command_with_invocation_round_trip() {
        let mut tree = Tree::new();
        let root = tree.root();
        let node = tree
            .insert(root, Element::Node(Node::numbered(2, NodeContents::default())))
            .unwrap();
        tree.insert(
            node,
            Element::Command(Command::invoke(Invocation::new(
                7,
                vec![Value::Integer(1), Value::Integer(7)],
            ))),
        )
        .unwrap();

        let decoded = round_trip(&tree);
        let top = decoded.children(decoded.root())[0];
        let command_id = decoded.children(top)[0];
        match decoded.element(command_id).unwrap() {
            Element::Command(c) => {
                assert_eq!(c.number, CommandNumber::Invoke);
                let invocation = c.invocation.as_ref().unwrap();
                assert_eq!(invocation.id, 7);
                assert_eq!(
                    invocation.arguments,
                    vec![Value::Integer(1), Value::Integer(7)]
                );
            }
            other => panic!("expected command, got {}", other.kind()),
        }
    }

    #[test]
    fn test_function_round_trip() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.insert(
            root,
            Element::Function(Function::numbered(
                3,
                FunctionContents {
                    identifier: Some("add".into()),
                    arguments: Some(vec![
                        TupleItem::new(ParameterType::Integer, "lhs"),
                        TupleItem::new(ParameterType::Integer, "rhs"),
                    ]),
                    result: Some(vec![TupleItem::new(ParameterType::Integer, "sum")]),
                    ..Default::default()
                },
            )),
        )
        .unwrap();

        let decoded = round_trip(&tree);
        let id = decoded.lookup(&"3".parse().unwrap()).unwrap();
        match decoded.element(id).unwrap() {
            Element::Function(f) => {
                let contents = f.contents.as_ref().unwrap();
                assert_eq!(contents.arguments.as_ref().unwrap().len(), 2);
                assert_eq!(
                    contents.result.as_ref().unwrap()[0].name.as_deref(),
                    Some("sum")
                );
            }
            other => panic!("expected function, got {}", other.kind()),
        }
    }

    #[test]
    fn test_matrix_round_trip_with_connections() {
        let mut tree = Tree::new();
        let root = tree.root();
        let mut matrix = Matrix::numbered(
            0,
            MatrixContents {
                identifier: Some("router".into()),
                matrix_type: Some(MatrixType::OneToN),
                mode: Some(MatrixMode::NonLinear),
                target_count: Some(3),
                source_count: Some(3),
                parameters_location: Some("1.0.2".parse().unwrap()),
                gain_parameter_number: Some(4),
                labels: Some(vec![Label {
                    base_path: "1.0.1".parse().unwrap(),
                    description: Some("primary".into()),
                }]),
                ..Default::default()
            },
        );
        matrix.targets = Some(vec![0, 2, 4]);
        matrix.sources = Some(vec![1, 3]);
        matrix.set_sources(0, vec![1]);
        matrix.set_sources(2, vec![3]);
        matrix.connection_mut(2).operation = Some(ConnectOperation::Connect);
        matrix.connection_mut(2).disposition = Some(Disposition::Modified);
        tree.insert(root, Element::Matrix(matrix)).unwrap();

        let decoded = round_trip(&tree);
        let id = decoded.lookup(&"0".parse().unwrap()).unwrap();
        match decoded.element(id).unwrap() {
            Element::Matrix(m) => {
                let contents = m.contents.as_ref().unwrap();
                assert_eq!(contents.matrix_type, Some(MatrixType::OneToN));
                assert_eq!(
                    contents.parameters_location.as_ref().unwrap().to_string(),
                    "1.0.2"
                );
                assert_eq!(contents.labels.as_ref().unwrap().len(), 1);
                assert_eq!(m.targets, Some(vec![0, 2, 4]));
                assert_eq!(m.sources, Some(vec![1, 3]));
                assert_eq!(m.sources_of(0), &[1]);
                assert_eq!(m.sources_of(2), &[3]);
                assert_eq!(
                    m.connection(2).unwrap().disposition,
                    Some(Disposition::Modified)
                );
                // Derived index is rebuilt during decode
                assert_eq!(m.targets_of_source(3), vec![2]);
            }
            other => panic!("expected matrix, got {}", other.kind()),
        }
    }

    #[test]
    fn test_invocation_result_round_trip() {
        let result = InvocationResult::success(12, vec![Value::Integer(8)]);
        let bytes = encode_invocation_result(&result).unwrap();
        match decode_root(&bytes).unwrap() {
            DecodedRoot::InvocationResult(decoded) => assert_eq!(decoded, result),
            other => panic!("expected invocation result, got {other:?}"),
        }

        let failure = InvocationResult::failure(13);
        let bytes = encode_invocation_result(&failure).unwrap();
        match decode_root(&bytes).unwrap() {
            DecodedRoot::InvocationResult(decoded) => {
                assert!(!decoded.success);
                assert!(decoded.result.is_empty());
            }
            other => panic!("expected invocation result, got {other:?}"),
        }
    }

    #[test]
    fn test_stream_collection_round_trip() {
        let entries = vec![
            StreamEntry {
                identifier: 4,
                value: Value::Real(0.25),
            },
            StreamEntry {
                identifier: 9,
                value: Value::Integer(-60),
            },
        ];
        let bytes = encode_stream_collection(&entries).unwrap();
        match decode_root(&bytes).unwrap() {
            DecodedRoot::Streams(decoded) => assert_eq!(decoded, entries),
            other => panic!("expected streams, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_application_tag_fails_strictly() {
        // Root containing a Template (APPLICATION 24), which the grammar
        // does not implement
        let mut writer = BerWriter::new();
        writer.start_sequence(TAG_ROOT);
        writer.start_sequence(TAG_ROOT_ELEMENT_COLLECTION);
        writer.start_sequence(ber::context(0));
        writer.start_sequence(ber::application(24));
        writer.start_sequence(ber::context(0));
        writer.write_int(1);
        writer.end_sequence().unwrap();
        writer.end_sequence().unwrap();
        writer.end_sequence().unwrap();
        writer.end_sequence().unwrap();
        writer.end_sequence().unwrap();
        let bytes = writer.finish().unwrap();

        let err = decode_root(&bytes).unwrap_err();
        assert_eq!(err, EmberError::UnimplementedType { tag: ber::application(24) });
    }

    #[test]
    fn test_get_directory_wire_encoding() {
        // Known-good frame payload for a top-level GetDirectory request
        let mut tree = Tree::new();
        let root = tree.root();
        tree.insert(root, Element::Command(Command::get_directory()))
            .unwrap();
        let bytes = encode_tree(&tree).unwrap();
        assert_eq!(hex::encode(&bytes), "60106b0ea00c620aa003020120a1030201ff");
    }

    #[test]
    fn test_empty_root_decodes_to_empty_tree() {
        let tree = Tree::new();
        let decoded = round_trip(&tree);
        assert!(decoded.children(decoded.root()).is_empty());
    }
}
