// SPDX-License-Identifier: GPL-3.0-only

//! Persisted document model
//!
//! A [`Document`] is three flat, ordered segments of [`Record`]s. Records never
//! nest; objects reached through fields are stored once and pointed at with
//! reference fields.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{DocumentError, Result};
use crate::identity::ObjectId;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Top-level entities handed to export
    Primary,
    /// Sub-objects of shared types, such as formats
    Shared,
    /// Anything else reached only through fields
    Auxiliary,
}

impl Segment {
    pub const ALL: [Segment; 3] = [Segment::Primary, Segment::Shared, Segment::Auxiliary];

    pub fn element_name(self) -> &'static str {
        match self {
            Segment::Primary => "Devices",
            Segment::Shared => "Formats",
            Segment::Auxiliary => "InternalDevices",
        }
    }

    pub fn from_element_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|segment| segment.element_name() == name)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

/// Declared value category of a persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredType {
    None,
    Str,
    Int,
    Float,
    Bool,
    Size,
    List,
    Map,
    Reference,
    Unsupported,
    Failed,
}

impl DeclaredType {
    pub fn tag(self) -> &'static str {
        match self {
            DeclaredType::None => "none",
            DeclaredType::Str => "str",
            DeclaredType::Int => "int",
            DeclaredType::Float => "float",
            DeclaredType::Bool => "bool",
            DeclaredType::Size => "Size",
            DeclaredType::List => "list",
            DeclaredType::Map => "dict",
            DeclaredType::Reference => "ObjectID",
            DeclaredType::Unsupported => "unsupported",
            DeclaredType::Failed => "failed",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let declared = match tag {
            "none" => DeclaredType::None,
            "str" => DeclaredType::Str,
            "int" => DeclaredType::Int,
            "float" => DeclaredType::Float,
            "bool" => DeclaredType::Bool,
            "Size" => DeclaredType::Size,
            "list" => DeclaredType::List,
            "dict" => DeclaredType::Map,
            "ObjectID" => DeclaredType::Reference,
            "unsupported" => DeclaredType::Unsupported,
            "failed" => DeclaredType::Failed,
            _ => return None,
        };
        Some(declared)
    }

    pub fn is_composite(self) -> bool {
        matches!(self, DeclaredType::List | DeclaredType::Map)
    }
}

/// One persisted value: a record field, a list item or a mapping entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name; `None` for list items and mapping entries
    pub name: Option<String>,
    /// Mapping key for mapping entries
    pub key: Option<String>,
    pub declared_type: DeclaredType,
    pub text: Option<String>,
    /// Informational rendering, e.g. "10.00 GiB" for sizes
    pub display: Option<String>,
    pub children: Vec<Field>,
}

impl Field {
    pub fn new(declared_type: DeclaredType) -> Self {
        Self {
            name: None,
            key: None,
            declared_type,
            text: None,
            display: None,
            children: Vec::new(),
        }
    }

    pub fn with_text(declared_type: DeclaredType, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(declared_type)
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Ids referenced by this field and its children, in document order.
    pub fn references(&self) -> Vec<ObjectId> {
        let mut found = Vec::new();
        let mut stack = vec![self];
        while let Some(field) = stack.pop() {
            if field.declared_type == DeclaredType::Reference {
                if let Ok(id) = field.text().parse() {
                    found.push(id);
                }
            }
            stack.extend(field.children.iter().rev());
        }
        found
    }
}

/// Persisted representation of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub type_name: String,
    pub object_id: ObjectId,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(type_name: impl Into<String>, object_id: ObjectId) -> Self {
        Self {
            type_name: type_name.into(),
            object_id,
            fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name.as_deref() == Some(name))
    }

    /// Last path component of the type name, used as the element tag
    pub fn short_type_name(&self) -> &str {
        self.type_name
            .rsplit('.')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("Record")
    }

    pub fn references(&self) -> Vec<ObjectId> {
        self.fields.iter().flat_map(Field::references).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub version: u32,
    primary: Vec<Record>,
    shared: Vec<Record>,
    auxiliary: Vec<Record>,
    /// Segment and position of every record, by id
    index: HashMap<ObjectId, (Segment, usize)>,
    /// Counts read from the persisted document, if it carried them
    declared_counts: HashMap<Segment, usize>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            primary: Vec::new(),
            shared: Vec::new(),
            auxiliary: Vec::new(),
            index: HashMap::new(),
            declared_counts: HashMap::new(),
        }
    }

    pub fn segment(&self, segment: Segment) -> &[Record] {
        match segment {
            Segment::Primary => &self.primary,
            Segment::Shared => &self.shared,
            Segment::Auxiliary => &self.auxiliary,
        }
    }

    fn segment_mut(&mut self, segment: Segment) -> &mut Vec<Record> {
        match segment {
            Segment::Primary => &mut self.primary,
            Segment::Shared => &mut self.shared,
            Segment::Auxiliary => &mut self.auxiliary,
        }
    }

    /// Append a record. Fails if its id is already used in any segment.
    pub fn push(&mut self, segment: Segment, record: Record) -> Result<()> {
        if self.index.contains_key(&record.object_id) {
            return Err(DocumentError::DuplicateObjectId(record.object_id));
        }
        let records = self.segment_mut(segment);
        let position = records.len();
        let id = record.object_id;
        records.push(record);
        self.index.insert(id, (segment, position));
        Ok(())
    }

    /// All records with their segment, segment by segment
    pub fn records(&self) -> impl Iterator<Item = (Segment, &Record)> {
        Segment::ALL.into_iter().flat_map(move |segment| {
            self.segment(segment)
                .iter()
                .map(move |record| (segment, record))
        })
    }

    pub fn find(&self, id: ObjectId) -> Option<(Segment, &Record)> {
        let &(segment, position) = self.index.get(&id)?;
        self.segment(segment)
            .get(position)
            .map(|record| (segment, record))
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.shared.len() + self.auxiliary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, segment: Segment) -> usize {
        self.segment(segment).len()
    }

    pub fn declared_count(&self, segment: Segment) -> Option<usize> {
        self.declared_counts.get(&segment).copied()
    }

    pub(crate) fn set_declared_count(&mut self, segment: Segment, count: usize) {
        self.declared_counts.insert(segment, count);
    }

    /// Segments whose declared count disagrees with their content
    pub fn count_mismatches(&self) -> Vec<(Segment, usize, usize)> {
        Segment::ALL
            .into_iter()
            .filter_map(|segment| {
                let declared = self.declared_count(segment)?;
                let actual = self.count(segment);
                (declared != actual).then_some((segment, declared, actual))
            })
            .collect()
    }

    /// Serialize and write the document with one scoped write.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_with_indent(path, crate::config::DEFAULT_INDENT)
    }

    pub fn write_with_indent(&self, path: impl AsRef<Path>, indent: usize) -> Result<()> {
        let path = path.as_ref();
        let content = crate::xml::to_string(self, indent)?;
        std::fs::write(path, content).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read and parse a document with one scoped read.
    pub fn read(path: impl AsRef<Path>) -> Result<Document> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_xml_str(&raw)
    }

    pub fn to_xml_string(&self) -> Result<String> {
        self.to_xml_string_with_indent(crate::config::DEFAULT_INDENT)
    }

    /// Serialize with `indent` spaces per level; 0 writes one line.
    pub fn to_xml_string_with_indent(&self, indent: usize) -> Result<String> {
        crate::xml::to_string(self, indent)
    }

    pub fn from_xml_str(xml: &str) -> Result<Document> {
        crate::xml::from_str(xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(id: u32) -> Field {
        Field::with_text(DeclaredType::Reference, id.to_string())
    }

    #[test]
    fn rejects_ids_reused_across_segments() {
        let mut document = Document::new();
        document
            .push(Segment::Primary, Record::new("a.B", ObjectId::new(1)))
            .unwrap();
        let err = document
            .push(Segment::Shared, Record::new("a.C", ObjectId::new(1)))
            .unwrap_err();
        assert!(matches!(err, DocumentError::DuplicateObjectId(id) if id == ObjectId::new(1)));
        assert_eq!(document.len(), 1);
    }

    #[test]
    fn finds_records_in_any_segment_by_id() {
        let mut document = Document::new();
        for raw in 1..=300u32 {
            let segment = Segment::ALL[(raw % 3) as usize];
            document
                .push(segment, Record::new("a.B", ObjectId::new(raw)))
                .unwrap();
        }

        let (segment, record) = document.find(ObjectId::new(200)).unwrap();
        assert_eq!(segment, Segment::ALL[2]);
        assert_eq!(record.object_id, ObjectId::new(200));
        assert!(document.find(ObjectId::new(301)).is_none());
        assert!(document.push(Segment::Primary, Record::new("a.C", ObjectId::new(299))).is_err());
        assert_eq!(document.len(), 300);
    }

    #[test]
    fn collects_nested_references_in_order() {
        let mut list = Field::new(DeclaredType::List).named("members");
        list.children = vec![reference(2), Field::with_text(DeclaredType::Int, "5"), reference(3)];

        let mut record = Record::new("storage.devices.VolumeGroup", ObjectId::new(1));
        record.fields = vec![reference(4).named("format"), list];

        assert_eq!(
            record.references(),
            vec![ObjectId::new(4), ObjectId::new(2), ObjectId::new(3)]
        );
        assert_eq!(record.short_type_name(), "VolumeGroup");
    }

    #[test]
    fn reports_declared_count_mismatches() {
        let mut document = Document::new();
        document
            .push(Segment::Shared, Record::new("a.B", ObjectId::new(1)))
            .unwrap();
        document.set_declared_count(Segment::Shared, 2);
        document.set_declared_count(Segment::Primary, 0);

        assert_eq!(document.count_mismatches(), vec![(Segment::Shared, 2, 1)]);
    }

    #[test]
    fn declared_type_tags_are_stable() {
        for declared in [
            DeclaredType::None,
            DeclaredType::Size,
            DeclaredType::Map,
            DeclaredType::Reference,
            DeclaredType::Failed,
        ] {
            assert_eq!(DeclaredType::from_tag(declared.tag()), Some(declared));
        }
        assert_eq!(DeclaredType::from_tag("NoneType"), None);
    }
}
