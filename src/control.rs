// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RFC822-style field block parsing.

Upload manifests and embedded source descriptions are *field blocks*: ordered
`Name: value` fields where a line beginning with whitespace continues the
previous field's value. Field names are case-insensitive on read and case
preserving on set. A paragraph holds at most one occurrence of a field; when
input repeats a name, the last occurrence wins. Callers wanting stricter
duplicate handling must enforce it above this layer.

Values retain their internal newlines. Whether a value is interpreted as a
single logical line (word lists such as `Architecture`) or as significant
multi-line text (file lists, changelog entries) is decided by the accessor
used, not by the parser.
*/

use {
    crate::error::{IngestError, Result},
    std::io::BufRead,
};

/// A single field in a paragraph.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Field {
    name: String,
    value: String,
}

impl Field {
    /// Construct an instance from a name and raw value.
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value, including embedded newlines and leading whitespace.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Iterate over whitespace-separated words in the value.
    pub fn iter_words(&self) -> impl Iterator<Item = &str> {
        self.value.split_ascii_whitespace()
    }

    /// Iterate over lines in the value, each stripped of leading whitespace.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.value.lines().map(|line| line.trim_start())
    }
}

/// An ordered series of fields.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Paragraph {
    fields: Vec<Field>,
}

impl Paragraph {
    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing any existing field of the same name
    /// (case-insensitive compare).
    pub fn set_field(&mut self, field: Field) {
        self.fields
            .retain(|f| !f.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Iterate fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Obtain the field with the given name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Whether a named field is present.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value())
    }

    /// Obtain the value of a mandatory field or error if it is absent.
    pub fn required_field_str(&self, name: &str) -> Result<&str> {
        self.field_str(name)
            .ok_or_else(|| IngestError::ControlRequiredFieldMissing(name.to_string()))
    }

    /// Obtain the named field's value parsed as a [u64].
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| v.trim().parse::<u64>().map_err(IngestError::ParseInt))
    }

    /// Iterate words in the named field, if present.
    pub fn iter_field_words(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field(name).map(|f| f.iter_words())
    }

    /// Iterate non-empty lines in the named field, if present.
    pub fn iter_field_lines(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field(name)
            .map(|f| f.iter_lines().filter(|line| !line.is_empty()))
    }

    /// Iterate comma-delimited entries in the named field, if present.
    pub fn iter_field_comma_delimited(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field(name).map(|f| {
            f.value()
                .split(',')
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        })
    }
}

/// Incremental parser fed lines of text, emitting paragraphs as they complete.
#[derive(Clone, Debug, Default)]
pub struct ParagraphParser {
    paragraph: Paragraph,
    field: Option<String>,
}

impl ParagraphParser {
    /// Write a line to the parser.
    ///
    /// If the line completes an in-progress paragraph, that paragraph is
    /// returned. `Err` is returned if the input is structurally invalid.
    pub fn write_line(&mut self, line: &str) -> Result<Option<Paragraph>> {
        let is_empty_line = line.trim().is_empty();
        let is_continuation = (line.starts_with(' ') || line.starts_with('\t')) && line.len() > 1;

        let current_field = self.field.take();

        // An empty line terminates the paragraph. Flush pending state.
        if is_empty_line {
            if let Some(field) = current_field {
                self.flush_field(field)?;
            }

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        match (current_field, is_continuation) {
            // Unindented line while a field is pending: the pending field is
            // complete and a new one begins.
            (Some(pending), false) => {
                self.flush_field(pending)?;
                self.field = Some(line.to_string());
                Ok(None)
            }
            // First line of a new field.
            (None, _) => {
                self.field = Some(line.to_string());
                Ok(None)
            }
            // Indented line continues the pending field's value.
            (Some(pending), true) => {
                self.field = Some(pending + line);
                Ok(None)
            }
        }
    }

    /// Finish parsing, consuming self and returning any unemitted paragraph.
    pub fn finish(mut self) -> Result<Option<Paragraph>> {
        if let Some(field) = self.field.take() {
            self.flush_field(field)?;
        }

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self, raw: String) -> Result<()> {
        let (name, value) = raw.split_once(':').ok_or_else(|| {
            IngestError::ControlParse(format!("field line lacks a colon: {}", raw.trim_end()))
        })?;

        if name.trim().is_empty() || name.contains(char::is_whitespace) {
            return Err(IngestError::ControlParse(format!(
                "malformed field name: {}",
                raw.trim_end()
            )));
        }

        self.paragraph
            .set_field(Field::new(name, value.trim().trim_end_matches('\n')));

        Ok(())
    }
}

/// Streaming reader yielding [Paragraph]s from a [BufRead] source.
pub struct ParagraphReader<R: BufRead> {
    reader: R,
    parser: Option<ParagraphParser>,
}

impl<R: BufRead> ParagraphReader<R> {
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ParagraphParser::default()),
        }
    }

    /// Consumes the instance, returning the original reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_next(&mut self) -> Result<Option<Paragraph>> {
        let mut parser = match self.parser.take() {
            Some(parser) => parser,
            None => return Ok(None),
        };

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line)?;

            if bytes_read == 0 {
                return parser.finish();
            }

            if let Some(paragraph) = parser.write_line(&line)? {
                self.parser.replace(parser);
                return Ok(Some(paragraph));
            }
        }
    }
}

impl<R: BufRead> Iterator for ParagraphReader<R> {
    type Item = Result<Paragraph>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// Parse a source that must consist of exactly one paragraph.
pub fn parse_single_paragraph<R: BufRead>(reader: R) -> Result<Paragraph> {
    let paragraphs = ParagraphReader::new(reader).collect::<Result<Vec<_>>>()?;

    match paragraphs.len() {
        0 => Err(IngestError::ControlFileNoParagraph),
        1 => Ok(paragraphs.into_iter().next().expect("length checked")),
        n => Err(IngestError::ControlParagraphMismatch(n)),
    }
}
