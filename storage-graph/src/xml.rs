// SPDX-License-Identifier: GPL-3.0-only

//! XML wire format
//!
//! ```text
//! <StorageGraph version="1">
//!   <Devices Count="1">
//!     <VolumeGroup type="storage.devices.VolumeGroup" ObjectID="1">
//!       <prop attr="name" type="str">vg0</prop>
//!       <prop attr="members" type="list">
//!         <item type="ObjectID">2</item>
//!       </prop>
//!     </VolumeGroup>
//!   </Devices>
//!   <Formats Count="1">...</Formats>
//!   <InternalDevices Count="0"/>
//! </StorageGraph>
//! ```

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::document::{DeclaredType, Document, FORMAT_VERSION, Field, Record, Segment};
use crate::error::{DocumentError, Result};
use crate::identity::ObjectId;

const ROOT: &str = "StorageGraph";
const FIELD: &str = "prop";
const ITEM: &str = "item";
const FALLBACK_RECORD_TAG: &str = "Record";

const ATTR_VERSION: &str = "version";
const ATTR_COUNT: &str = "Count";
const ATTR_TYPE: &str = "type";
const ATTR_OBJECT_ID: &str = "ObjectID";
const ATTR_NAME: &str = "attr";
const ATTR_KEY: &str = "key";
const ATTR_DISPLAY: &str = "Size";

fn xml_error(error: impl std::fmt::Display) -> DocumentError {
    DocumentError::Xml(error.to_string())
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

type XmlWriter = Writer<Vec<u8>>;

fn emit(writer: &mut XmlWriter, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(xml_error)
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn record_tag(record: &Record) -> &str {
    let short = record.short_type_name();
    if is_xml_name(short) {
        short
    } else {
        FALLBACK_RECORD_TAG
    }
}

pub(crate) fn to_string(document: &Document, indent: usize) -> Result<String> {
    let mut writer = if indent == 0 {
        Writer::new(Vec::new())
    } else {
        Writer::new_with_indent(Vec::new(), b' ', indent)
    };

    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut root = BytesStart::new(ROOT);
    root.push_attribute((ATTR_VERSION, document.version.to_string().as_str()));
    emit(&mut writer, Event::Start(root))?;

    for segment in Segment::ALL {
        let records = document.segment(segment);
        let mut start = BytesStart::new(segment.element_name());
        start.push_attribute((ATTR_COUNT, records.len().to_string().as_str()));

        if records.is_empty() {
            emit(&mut writer, Event::Empty(start))?;
            continue;
        }

        emit(&mut writer, Event::Start(start))?;
        for record in records {
            write_record(&mut writer, record)?;
        }
        emit(
            &mut writer,
            Event::End(BytesEnd::new(segment.element_name())),
        )?;
    }

    emit(&mut writer, Event::End(BytesEnd::new(ROOT)))?;

    let mut output = String::from_utf8(writer.into_inner()).map_err(xml_error)?;
    output.push('\n');
    Ok(output)
}

fn write_record(writer: &mut XmlWriter, record: &Record) -> Result<()> {
    let tag = record_tag(record);
    let mut start = BytesStart::new(tag);
    start.push_attribute((ATTR_TYPE, record.type_name.as_str()));
    start.push_attribute((ATTR_OBJECT_ID, record.object_id.to_string().as_str()));

    if record.fields.is_empty() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    for field in &record.fields {
        write_field(writer, field, FIELD)?;
    }
    emit(writer, Event::End(BytesEnd::new(tag)))
}

fn write_field(writer: &mut XmlWriter, field: &Field, tag: &str) -> Result<()> {
    let mut start = BytesStart::new(tag);
    if let Some(name) = &field.name {
        start.push_attribute((ATTR_NAME, name.as_str()));
    }
    if let Some(key) = &field.key {
        start.push_attribute((ATTR_KEY, key.as_str()));
    }
    start.push_attribute((ATTR_TYPE, field.declared_type.tag()));
    if let Some(display) = &field.display {
        start.push_attribute((ATTR_DISPLAY, display.as_str()));
    }

    if !field.children.is_empty() {
        emit(writer, Event::Start(start))?;
        for child in &field.children {
            write_field(writer, child, ITEM)?;
        }
        return emit(writer, Event::End(BytesEnd::new(tag)));
    }

    match field.text.as_deref() {
        None | Some("") => emit(writer, Event::Empty(start)),
        Some(text) => {
            emit(writer, Event::Start(start))?;
            emit(writer, Event::Text(BytesText::new(text)))?;
            emit(writer, Event::End(BytesEnd::new(tag)))
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(xml_error)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.attribute(name)
            .ok_or_else(|| DocumentError::MissingAttribute {
                element: self.name.clone(),
                attribute: name.to_string(),
            })
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(DocumentError::Xml(format!(
            "unexpected second root element <{}>",
            element.name
        )));
    }
    *root = Some(element);
    Ok(())
}

fn parse_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DocumentError::Xml("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(DocumentError::Xml(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| DocumentError::Xml("document has no root element".to_string()))
}

pub(crate) fn from_str(xml: &str) -> Result<Document> {
    let root = parse_tree(xml)?;
    if root.name != ROOT {
        return Err(DocumentError::UnexpectedElement {
            found: root.name,
            expected: ROOT.to_string(),
        });
    }

    let version = parse_number::<u32>(&root, ATTR_VERSION)?;
    if version != FORMAT_VERSION {
        return Err(DocumentError::UnsupportedVersion(version));
    }

    let mut document = Document::new();
    for segment_element in &root.children {
        let segment = Segment::from_element_name(&segment_element.name).ok_or_else(|| {
            DocumentError::UnexpectedElement {
                found: segment_element.name.clone(),
                expected: "Devices, Formats or InternalDevices".to_string(),
            }
        })?;

        if segment_element.attribute(ATTR_COUNT).is_some() {
            let count = parse_number::<usize>(segment_element, ATTR_COUNT)?;
            document.set_declared_count(segment, count);
        }

        for record_element in &segment_element.children {
            document.push(segment, parse_record(record_element)?)?;
        }
    }

    Ok(document)
}

fn parse_number<T: std::str::FromStr>(element: &Element, attribute: &str) -> Result<T> {
    let raw = element.required(attribute)?;
    raw.trim()
        .parse()
        .map_err(|_| DocumentError::InvalidAttribute {
            attribute: attribute.to_string(),
            value: raw.to_string(),
        })
}

fn parse_record(element: &Element) -> Result<Record> {
    let type_name = element.required(ATTR_TYPE)?.to_string();
    let object_id: ObjectId = parse_number(element, ATTR_OBJECT_ID)?;

    let mut record = Record::new(type_name, object_id);
    for child in &element.children {
        if child.name != FIELD {
            return Err(DocumentError::UnexpectedElement {
                found: child.name.clone(),
                expected: FIELD.to_string(),
            });
        }
        record.fields.push(parse_field(child)?);
    }
    Ok(record)
}

fn parse_field(element: &Element) -> Result<Field> {
    let tag = element.required(ATTR_TYPE)?;
    let declared_type =
        DeclaredType::from_tag(tag).ok_or_else(|| DocumentError::InvalidAttribute {
            attribute: ATTR_TYPE.to_string(),
            value: tag.to_string(),
        })?;

    let mut field = Field::new(declared_type);
    field.name = element.attribute(ATTR_NAME).map(str::to_string);
    field.key = element.attribute(ATTR_KEY).map(str::to_string);
    field.display = element.attribute(ATTR_DISPLAY).map(str::to_string);

    if declared_type.is_composite() {
        for child in &element.children {
            if child.name != ITEM {
                return Err(DocumentError::UnexpectedElement {
                    found: child.name.clone(),
                    expected: ITEM.to_string(),
                });
            }
            field.children.push(parse_field(child)?);
        }
    } else if declared_type != DeclaredType::None {
        field.text = Some(element.text.clone());
    }

    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        let mut record = Record::new("storage.devices.VolumeGroup", ObjectId::new(1));
        let mut size = Field::with_text(DeclaredType::Size, "10737418240").named("size");
        size.display = Some("10.00 GiB".to_string());
        let mut members = Field::new(DeclaredType::List).named("members");
        members.children = vec![
            Field::with_text(DeclaredType::Reference, "2"),
            Field::with_text(DeclaredType::Reference, "3"),
        ];
        let mut tags = Field::new(DeclaredType::Map).named("tags");
        tags.children = vec![Field::with_text(DeclaredType::Str, "a<b & c").keyed("note")];
        record.fields = vec![
            Field::with_text(DeclaredType::Str, "vg0").named("name"),
            size,
            members,
            tags,
            Field::new(DeclaredType::List).named("spares"),
            Field::new(DeclaredType::None).named("uuid"),
            Field::with_text(DeclaredType::Str, "").named("label"),
            Field::with_text(DeclaredType::Str, "  padded ").named("comment"),
        ];

        let mut document = Document::new();
        document.push(Segment::Primary, record).unwrap();
        for id in [2, 3] {
            let mut pv = Record::new("storage.formats.LvmPhysicalVolume", ObjectId::new(id));
            pv.fields = vec![Field::with_text(DeclaredType::Str, "vg0").named("vg_name")];
            document.push(Segment::Shared, pv).unwrap();
        }
        for segment in Segment::ALL {
            document.set_declared_count(segment, document.count(segment));
        }
        document
    }

    #[test]
    fn writes_the_documented_layout() {
        let xml = to_string(&sample_document(), 2).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Devices Count=\"1\">"));
        assert!(xml.contains(
            "<VolumeGroup type=\"storage.devices.VolumeGroup\" ObjectID=\"1\">"
        ));
        assert!(xml.contains(
            "<prop attr=\"size\" type=\"Size\" Size=\"10.00 GiB\">10737418240</prop>"
        ));
        assert!(xml.contains("<item type=\"ObjectID\">2</item>"));
        assert!(xml.contains("<item key=\"note\" type=\"str\">a&lt;b &amp; c</item>"));
        assert!(xml.contains("<prop attr=\"spares\" type=\"list\"/>"));
        assert!(xml.contains("<Formats Count=\"2\">"));
        assert!(xml.contains("<InternalDevices Count=\"0\"/>"));
    }

    #[test]
    fn parses_back_to_an_equal_document() {
        let document = sample_document();
        let xml = to_string(&document, 2).unwrap();
        let parsed = from_str(&xml).unwrap();
        assert_eq!(parsed, document);

        let compact = to_string(&document, 0).unwrap();
        assert_eq!(from_str(&compact).unwrap(), document);
    }

    #[test]
    fn rejects_duplicate_ids_and_bad_tags() {
        let duplicate = r#"<StorageGraph version="1">
            <Devices><A type="x.A" ObjectID="1"/></Devices>
            <Formats><B type="x.B" ObjectID="1"/></Formats>
        </StorageGraph>"#;
        assert!(matches!(
            from_str(duplicate),
            Err(DocumentError::DuplicateObjectId(_))
        ));

        let bad_type = r#"<StorageGraph version="1"><Devices>
            <A type="x.A" ObjectID="1"><prop attr="n" type="complex">1</prop></A>
        </Devices></StorageGraph>"#;
        assert!(matches!(
            from_str(bad_type),
            Err(DocumentError::InvalidAttribute { .. })
        ));

        let missing_id = r#"<StorageGraph version="1"><Devices><A type="x.A"/></Devices></StorageGraph>"#;
        assert!(matches!(
            from_str(missing_id),
            Err(DocumentError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn rejects_unknown_versions_and_roots() {
        assert!(matches!(
            from_str(r#"<StorageGraph version="9"/>"#),
            Err(DocumentError::UnsupportedVersion(9))
        ));
        assert!(matches!(
            from_str(r#"<Blivet-XML-Tools/>"#),
            Err(DocumentError::UnexpectedElement { .. })
        ));
        assert!(from_str("<StorageGraph version=\"1\">").is_err());
    }

    #[test]
    fn segments_without_counts_are_accepted() {
        let document = from_str(r#"<StorageGraph version="1"><Devices/></StorageGraph>"#).unwrap();
        assert!(document.is_empty());
        assert_eq!(document.declared_count(Segment::Primary), None);
    }
}
