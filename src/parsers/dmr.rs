//! Parser for the DAP4 Dataset Metadata Response, an XML document.
//!
//! Dimension references are resolved to fully qualified names such as `/time` or `/g/n`.
//! Relative references are looked up from the nearest enclosing group towards the root.

use crate::error::DapError;
use crate::model::{structure, BaseType, Container, DapNode, Dataset, Group, Sequence};
use crate::models::{element_count, DType};
use crate::parsers::parse_attribute_value;
use crate::types::{AttrValue, Attributes, DValue};

use roxmltree::{Document, Node};
use std::collections::HashMap;

/// Parse a DMR into a dataless [Dataset].
#[tracing::instrument(level = "DEBUG", skip(text))]
pub fn parse_dmr(text: &str) -> Result<Dataset, DapError> {
    let document = Document::parse(text)?;
    let root = document.root_element();
    let mut parser = DmrParser {
        text,
        dimensions: HashMap::new(),
    };
    if root.tag_name().name() != "Dataset" {
        return Err(parser.error(root, "expected a Dataset element"));
    }

    let mut dataset = Dataset::new(root.attribute("name").unwrap_or_default());
    let dimensions = parser.members(root, "", &mut dataset.container)?;
    dataset.dimensions = dimensions;
    Ok(dataset)
}

struct DmrParser<'t> {
    text: &'t str,
    /// Sizes of declared dimensions, by fully qualified name
    dimensions: HashMap<String, usize>,
}

impl<'t> DmrParser<'t> {
    fn error(&self, node: Node, message: impl Into<String>) -> DapError {
        DapError::parse("DMR", message, &self.text[node.range()])
    }

    fn required(&self, node: Node, attribute: &str) -> Result<String, DapError> {
        node.attribute(attribute)
            .map(str::to_string)
            .ok_or_else(|| self.error(node, format!("missing {} attribute", attribute)))
    }

    fn size(&self, node: Node) -> Result<usize, DapError> {
        let size = self.required(node, "size")?;
        size.trim()
            .parse()
            .map_err(|_| self.error(node, format!("invalid dimension size {}", size)))
    }

    /// Parse the children of a Dataset, Group, Structure or Sequence element into `container`.
    ///
    /// Returns the dimensions declared at this level, which only groups may hold.
    fn members(
        &mut self,
        node: Node,
        group: &str,
        container: &mut Container,
    ) -> Result<Vec<(String, usize)>, DapError> {
        let mut declared = vec![];
        for child in node.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "Dimension" => {
                    let name = self.required(child, "name")?;
                    let size = self.size(child)?;
                    self.dimensions.insert(format!("{}/{}", group, name), size);
                    declared.push((name, size));
                }
                "Attribute" => {
                    let (name, value) = self.attribute(child)?;
                    container.attributes.insert(name, value);
                }
                "Structure" => {
                    let inner = self.constructor(child, group)?;
                    container.insert(structure(inner));
                }
                "Sequence" => {
                    let inner = self.constructor(child, group)?;
                    container.insert(DapNode::Sequence(Sequence {
                        container: inner,
                        data: Default::default(),
                    }));
                }
                "Group" => {
                    let name = self.required(child, "name")?;
                    let path = format!("{}/{}", group, name);
                    let mut inner = Container::new(&name);
                    let dimensions = self.members(child, &path, &mut inner)?;
                    container.insert(DapNode::Group(Group {
                        container: inner,
                        dimensions,
                    }));
                }
                tag => match DType::from_name(tag) {
                    Some(dtype) => container.insert(self.variable(child, dtype, group)?.into()),
                    None => return Err(self.error(child, format!("unknown element {}", tag))),
                },
            }
        }
        Ok(declared)
    }

    fn constructor(&mut self, node: Node, group: &str) -> Result<Container, DapError> {
        let mut container = Container::new(&self.required(node, "name")?);
        if !self.members(node, group, &mut container)?.is_empty() {
            return Err(self.error(node, "dimensions may only be declared in groups"));
        }
        Ok(container)
    }

    fn variable(&self, node: Node, dtype: DType, group: &str) -> Result<BaseType, DapError> {
        let name = self.required(node, "name")?;
        let mut shape = vec![];
        let mut dims = vec![];
        let mut maps = vec![];
        let mut attributes = Attributes::new();
        for child in node.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "Dim" => {
                    let (dim, size) = match child.attribute("name") {
                        Some(reference) => self.resolve(reference, group).ok_or_else(|| {
                            self.error(child, format!("unknown dimension {}", reference))
                        })?,
                        None => (String::new(), self.size(child)?),
                    };
                    shape.push(size);
                    dims.push(dim);
                }
                "Map" => maps.push(DValue::Str(self.required(child, "name")?)),
                "Attribute" => {
                    let (name, value) = self.attribute(child)?;
                    attributes.insert(name, value);
                }
                tag => return Err(self.error(child, format!("unknown element {}", tag))),
            }
        }
        if element_count(&shape).is_none() {
            return Err(self.error(node, format!("too many elements in {}", name)));
        }
        if dims.iter().all(String::is_empty) {
            dims.clear();
        }
        if !maps.is_empty() {
            attributes.insert("maps", AttrValue::List(maps));
        }

        let mut var = BaseType::new(&name, dtype, shape).with_dims(dims);
        var.attributes = attributes;
        Ok(var)
    }

    /// Resolve a dimension reference to its fully qualified name and size.
    fn resolve(&self, reference: &str, group: &str) -> Option<(String, usize)> {
        if reference.starts_with('/') {
            return self
                .dimensions
                .get(reference)
                .map(|size| (reference.to_string(), *size));
        }
        let mut scope = group.to_string();
        loop {
            let fqn = format!("{}/{}", scope, reference);
            if let Some(size) = self.dimensions.get(&fqn) {
                return Some((fqn, *size));
            }
            let parent = scope.rfind('/')?;
            scope.truncate(parent);
        }
    }

    fn attribute(&self, node: Node) -> Result<(String, AttrValue), DapError> {
        let name = self.required(node, "name")?;
        let type_name = self.required(node, "type")?;
        if type_name.eq_ignore_ascii_case("container") {
            let mut inner = Attributes::new();
            for child in node.children().filter(Node::is_element) {
                if child.tag_name().name() != "Attribute" {
                    return Err(self.error(child, "expected an Attribute element"));
                }
                let (name, value) = self.attribute(child)?;
                inner.insert(name, value);
            }
            return Ok((name, AttrValue::Container(inner)));
        }

        let dtype = DType::from_name(&type_name)
            .ok_or_else(|| self.error(node, format!("unknown type {}", type_name)))?;
        let mut tokens: Vec<&str> = node
            .children()
            .filter(|child| child.is_element() && child.tag_name().name() == "Value")
            .map(|child| child.text().unwrap_or_default())
            .collect();
        if let Some(value) = node.attribute("value") {
            tokens.push(value);
        }
        let values = tokens
            .into_iter()
            .map(|token| {
                parse_attribute_value(dtype, token)
                    .map_err(|err| self.error(node, format!("invalid {} value: {}", dtype, err)))
            })
            .collect::<Result<Vec<DValue>, DapError>>()?;
        Ok((name, values.into()))
    }
}
