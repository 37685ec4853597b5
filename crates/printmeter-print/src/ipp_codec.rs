// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP/1.1 binary message encoding and decoding (RFC 8010 §3).
//
// The same framing carries requests and responses; only the meaning of the
// 16-bit code differs (operation-id vs status-code).  The client builds
// Print-Job requests with `IppMessageBuilder` and decodes the printer's reply
// with `IppMessage::parse`.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// IPP version major number (1.1).
pub const IPP_VERSION_MAJOR: u8 = 0x01;

/// IPP version minor number.
pub const IPP_VERSION_MINOR: u8 = 0x01;

/// Delimiter tag: start of the operation attributes group.
pub const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;

/// Delimiter tag: start of the job attributes group.
pub const TAG_JOB_ATTRIBUTES: u8 = 0x02;

/// Delimiter tag: end of all attribute groups.
pub const TAG_END_OF_ATTRIBUTES: u8 = 0x03;

pub const VALUE_TAG_INTEGER: u8 = 0x21;
pub const VALUE_TAG_BOOLEAN: u8 = 0x22;
pub const VALUE_TAG_ENUM: u8 = 0x23;
pub const VALUE_TAG_NAME: u8 = 0x42;
pub const VALUE_TAG_KEYWORD: u8 = 0x44;
pub const VALUE_TAG_URI: u8 = 0x45;
pub const VALUE_TAG_CHARSET: u8 = 0x47;
pub const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;
pub const VALUE_TAG_MIME_MEDIA_TYPE: u8 = 0x49;

/// Operation: Print-Job.
pub const OP_PRINT_JOB: u16 = 0x0002;

/// Status: successful-ok.
pub const STATUS_OK: u16 = 0x0000;

/// MIME type of IPP messages carried over HTTP.
pub const IPP_CONTENT_TYPE: &str = "application/ipp";

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single IPP attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppAttribute {
    /// The value tag that describes the type of this attribute.
    pub value_tag: u8,
    /// Attribute name (empty for additional values in a 1setOf).
    pub name: String,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

impl IppAttribute {
    /// Render the value as text: integers and enums in decimal, booleans as
    /// `true`/`false`, everything else as (lossy) UTF-8.
    pub fn value_string(&self) -> String {
        match self.value_tag {
            VALUE_TAG_INTEGER | VALUE_TAG_ENUM if self.value.len() == 4 => {
                i32::from_be_bytes([self.value[0], self.value[1], self.value[2], self.value[3]])
                    .to_string()
            }
            VALUE_TAG_BOOLEAN if self.value.len() == 1 => (self.value[0] != 0).to_string(),
            _ => String::from_utf8_lossy(&self.value).into_owned(),
        }
    }
}

/// A group of attributes delimited by a group tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppAttributeGroup {
    /// The delimiter tag for this group (0x01, 0x02, 0x04, etc.)
    pub delimiter: u8,
    /// Ordered list of attributes within the group.
    pub attributes: Vec<IppAttribute>,
}

impl IppAttributeGroup {
    /// Find the first attribute with the given name.
    pub fn get(&self, name: &str) -> Option<&IppAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A decoded IPP message (request or response).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppMessage {
    pub version_major: u8,
    pub version_minor: u8,
    /// Operation-id in a request, status-code in a response.
    pub code: u16,
    pub request_id: u32,
    /// All attribute groups in order.
    pub groups: Vec<IppAttributeGroup>,
    /// Document data (everything after the end-of-attributes tag).
    pub data: Vec<u8>,
}

impl IppMessage {
    /// Attribute groups with the given delimiter, in order.
    pub fn groups_with(&self, delimiter: u8) -> impl Iterator<Item = &IppAttributeGroup> {
        self.groups.iter().filter(move |g| g.delimiter == delimiter)
    }

    /// Parse a raw IPP message body.
    ///
    /// ```text
    /// version-number:  2 bytes (major, minor)
    /// code:            2 bytes (big-endian u16)
    /// request-id:      4 bytes (big-endian u32)
    /// attribute-groups: variable
    ///   delimiter-tag: 1 byte
    ///   attributes:    variable
    ///     value-tag:    1 byte
    ///     name-length:  2 bytes (big-endian u16)
    ///     name:         name-length bytes
    ///     value-length: 2 bytes (big-endian u16)
    ///     value:        value-length bytes
    /// end-of-attributes-tag: 1 byte (0x03)
    /// data: remainder
    /// ```
    pub fn parse(data: &[u8]) -> std::result::Result<Self, String> {
        if data.len() < 8 {
            return Err(format!("IPP message too short: {} bytes (minimum 8)", data.len()));
        }

        let version_major = data[0];
        let version_minor = data[1];
        let code = u16::from_be_bytes([data[2], data[3]]);
        let request_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

        let mut pos = 8;
        let mut groups: Vec<IppAttributeGroup> = Vec::new();
        let mut current: Option<IppAttributeGroup> = None;
        let mut terminated = false;

        while pos < data.len() {
            let tag = data[pos];
            pos += 1;

            // Delimiter tags are in the range 0x00..=0x0F.
            if tag <= 0x0F {
                if let Some(group) = current.take() {
                    groups.push(group);
                }
                if tag == TAG_END_OF_ATTRIBUTES {
                    terminated = true;
                    break;
                }
                current = Some(IppAttributeGroup {
                    delimiter: tag,
                    attributes: Vec::new(),
                });
                continue;
            }

            let name = read_field(data, &mut pos, "attribute name")?;
            let value = read_field(data, &mut pos, "attribute value")?;

            let group = current
                .as_mut()
                .ok_or_else(|| "attribute outside of any group".to_string())?;
            // A nameless attribute is an additional value of the previous one.
            let name = if name.is_empty() {
                group
                    .attributes
                    .last()
                    .map(|prev| prev.name.clone())
                    .unwrap_or_default()
            } else {
                String::from_utf8_lossy(name).into_owned()
            };
            group.attributes.push(IppAttribute {
                value_tag: tag,
                name,
                value: value.to_vec(),
            });
        }

        if !terminated {
            return Err("missing end-of-attributes tag".into());
        }

        Ok(Self {
            version_major,
            version_minor,
            code,
            request_id,
            groups,
            data: data[pos..].to_vec(),
        })
    }
}

/// Read a 2-byte length followed by that many bytes.
fn read_field<'a>(data: &'a [u8], pos: &mut usize, what: &str) -> Result<&'a [u8], String> {
    if *pos + 2 > data.len() {
        return Err(format!("truncated {what} length"));
    }
    let len = u16::from_be_bytes([data[*pos], data[*pos + 1]]) as usize;
    *pos += 2;
    if *pos + len > data.len() {
        return Err(format!("truncated {what}"));
    }
    let field = &data[*pos..*pos + len];
    *pos += len;
    Ok(field)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for IPP messages in the binary encoding of RFC 8010 §3.
pub struct IppMessageBuilder {
    /// Accumulated message bytes.
    buf: Vec<u8>,
}

impl IppMessageBuilder {
    /// Start a message with the given operation-id or status-code.
    pub fn new(code: u16, request_id: u32) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(IPP_VERSION_MAJOR);
        buf.push(IPP_VERSION_MINOR);
        buf.extend_from_slice(&code.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        Self { buf }
    }

    /// Start a new attribute group.
    pub fn begin_group(&mut self, delimiter: u8) -> &mut Self {
        self.buf.push(delimiter);
        self
    }

    pub fn charset(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_CHARSET, name, value.as_bytes())
    }

    pub fn natural_language(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NATURAL_LANGUAGE, name, value.as_bytes())
    }

    pub fn uri(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_URI, name, value.as_bytes())
    }

    /// Write a nameWithoutLanguage attribute.
    pub fn name_attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NAME, name, value.as_bytes())
    }

    pub fn mime_type(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_MIME_MEDIA_TYPE, name, value.as_bytes())
    }

    pub fn keyword(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_KEYWORD, name, value.as_bytes())
    }

    pub fn integer(&mut self, name: &str, value: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_INTEGER, name, &value.to_be_bytes())
    }

    /// Write a raw attribute (value-tag, name, value bytes).
    ///
    /// Names and values longer than 65535 bytes are truncated to fit the
    /// 16-bit length fields.
    pub fn write_attr(&mut self, value_tag: u8, name: &str, value: &[u8]) -> &mut Self {
        let name = &name.as_bytes()[..name.len().min(u16::MAX as usize)];
        let value = &value[..value.len().min(u16::MAX as usize)];
        self.buf.push(value_tag);
        self.buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(name);
        self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    /// Finalise: write the end-of-attributes tag and return the bytes.
    pub fn build(mut self) -> Vec<u8> {
        self.buf.push(TAG_END_OF_ATTRIBUTES);
        self.buf
    }

    /// Finalise and append document data.
    pub fn build_with_data(self, data: &[u8]) -> Vec<u8> {
        let mut buf = self.build();
        buf.extend_from_slice(data);
        buf
    }
}

// ---------------------------------------------------------------------------
// Print-Job
// ---------------------------------------------------------------------------

/// Operation attributes of a Print-Job request.
#[derive(Debug, Clone, Default)]
pub struct PrintJobAttributes<'a> {
    pub printer_uri: &'a str,
    pub user_name: Option<&'a str>,
    pub job_name: Option<&'a str>,
    /// Defaults to `application/octet-stream` when `None` or empty.
    pub document_format: Option<&'a str>,
}

/// Encode the header of a Print-Job request (request-id 1), without the
/// document bytes that follow it on the wire.
pub fn encode_print_job(attrs: &PrintJobAttributes<'_>) -> Vec<u8> {
    let mut builder = IppMessageBuilder::new(OP_PRINT_JOB, 1);
    builder
        .begin_group(TAG_OPERATION_ATTRIBUTES)
        .charset("attributes-charset", "utf-8")
        .natural_language("attributes-natural-language", "en-US")
        .uri("printer-uri", attrs.printer_uri);
    if let Some(user) = attrs.user_name.filter(|u| !u.is_empty()) {
        builder.name_attr("requesting-user-name", user);
    }
    if let Some(job) = attrs.job_name.filter(|j| !j.is_empty()) {
        builder.name_attr("job-name", job);
    }
    let format = attrs
        .document_format
        .filter(|f| !f.is_empty())
        .unwrap_or("application/octet-stream");
    builder.mime_type("document-format", format);
    builder.build()
}

/// Registered keyword for a status code, or its hex form when unknown.
pub fn status_name(status: u16) -> String {
    let name = match status {
        0x0000 => "successful-ok",
        0x0001 => "successful-ok-ignored-or-substituted-attributes",
        0x0002 => "successful-ok-conflicting-attributes",
        0x0400 => "client-error-bad-request",
        0x0401 => "client-error-forbidden",
        0x0402 => "client-error-not-authenticated",
        0x0403 => "client-error-not-authorized",
        0x0404 => "client-error-not-possible",
        0x0405 => "client-error-timeout",
        0x0406 => "client-error-not-found",
        0x0407 => "client-error-gone",
        0x0408 => "client-error-request-entity-too-large",
        0x0409 => "client-error-request-value-too-long",
        0x040A => "client-error-document-format-not-supported",
        0x040B => "client-error-attributes-or-values-not-supported",
        0x040C => "client-error-uri-scheme-not-supported",
        0x040D => "client-error-charset-not-supported",
        0x040E => "client-error-conflicting-attributes",
        0x040F => "client-error-compression-not-supported",
        0x0410 => "client-error-compression-error",
        0x0411 => "client-error-document-format-error",
        0x0412 => "client-error-document-access-error",
        0x0500 => "server-error-internal-error",
        0x0501 => "server-error-operation-not-supported",
        0x0502 => "server-error-service-unavailable",
        0x0503 => "server-error-version-not-supported",
        0x0504 => "server-error-device-error",
        0x0505 => "server-error-temporary-error",
        0x0506 => "server-error-not-accepting-jobs",
        0x0507 => "server-error-busy",
        0x0508 => "server-error-job-canceled",
        0x0509 => "server-error-multiple-document-jobs-not-supported",
        _ => return format!("0x{status:04x}"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_job_header_layout() {
        let bytes = encode_print_job(&PrintJobAttributes {
            printer_uri: "ipp://printer.local:631/printers/lab",
            user_name: Some("alice"),
            job_name: None,
            document_format: Some("application/pdf"),
        });

        assert_eq!(&bytes[..8], &[0x01, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(bytes[8], TAG_OPERATION_ATTRIBUTES);
        assert_eq!(*bytes.last().expect("non-empty"), TAG_END_OF_ATTRIBUTES);

        let msg = IppMessage::parse(&bytes).expect("parse");
        assert_eq!(msg.code, OP_PRINT_JOB);
        assert_eq!(msg.request_id, 1);
        let ops = msg.groups_with(TAG_OPERATION_ATTRIBUTES).next().expect("op group");
        let names: Vec<&str> = ops.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "attributes-charset",
                "attributes-natural-language",
                "printer-uri",
                "requesting-user-name",
                "document-format",
            ]
        );
        let format = ops.get("document-format").expect("format");
        assert_eq!(format.value_tag, VALUE_TAG_MIME_MEDIA_TYPE);
        assert_eq!(format.value_string(), "application/pdf");
        assert_eq!(ops.get("attributes-natural-language").expect("lang").value_string(), "en-US");
        assert!(msg.data.is_empty());
    }

    #[test]
    fn document_format_defaults_to_octet_stream() {
        let bytes = encode_print_job(&PrintJobAttributes {
            printer_uri: "ipp://p/printers/x",
            document_format: Some(""),
            ..Default::default()
        });
        let msg = IppMessage::parse(&bytes).expect("parse");
        let ops = msg.groups_with(TAG_OPERATION_ATTRIBUTES).next().expect("op group");
        assert_eq!(
            ops.get("document-format").expect("format").value_string(),
            "application/octet-stream"
        );
        assert!(ops.get("requesting-user-name").is_none());
        assert!(ops.get("job-name").is_none());
    }

    #[test]
    fn response_with_job_group_and_data_round_trips() {
        let mut builder = IppMessageBuilder::new(STATUS_OK, 1);
        builder
            .begin_group(TAG_OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .begin_group(TAG_JOB_ATTRIBUTES)
            .integer("job-id", 42)
            .keyword("job-state-reasons", "none")
            .write_attr(VALUE_TAG_KEYWORD, "", b"job-incoming");
        let bytes = builder.build_with_data(b"trailing");

        let msg = IppMessage::parse(&bytes).expect("parse");
        let job = msg.groups_with(TAG_JOB_ATTRIBUTES).next().expect("job group");
        assert_eq!(job.get("job-id").expect("job-id").value_string(), "42");
        // The nameless value inherits the previous attribute's name.
        assert_eq!(job.attributes[2].name, "job-state-reasons");
        assert_eq!(msg.data, b"trailing");
    }

    #[test]
    fn truncated_messages_are_rejected() {
        assert!(IppMessage::parse(&[0x01, 0x01, 0x00]).is_err());

        let mut bytes = encode_print_job(&PrintJobAttributes {
            printer_uri: "ipp://p/printers/x",
            ..Default::default()
        });
        bytes.pop(); // drop end-of-attributes
        bytes.pop(); // and part of the last value
        assert!(IppMessage::parse(&bytes).is_err());
    }

    #[test]
    fn status_names() {
        assert_eq!(status_name(0x0406), "client-error-not-found");
        assert_eq!(status_name(0x0507), "server-error-busy");
        assert_eq!(status_name(0x0777), "0x0777");
    }
}
