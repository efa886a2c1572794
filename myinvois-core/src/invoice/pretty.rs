//! Human-readable rendering of a transmitted invoice for attachments.
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, Event},
};

use crate::invoice::canonical::XmlError;

/// Re-indent `xml` with two spaces per level behind an XML declaration.
///
/// Only used for the stored copy. The transmitted bytes and their hashes are
/// never derived from this output.
pub fn pretty_print(xml: &str) -> Result<String, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| XmlError::Format(e.to_string()))?;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            // The declaration is always rewritten above.
            Ok(Event::Decl(_)) => {}
            Ok(event) => writer
                .write_event(event)
                .map_err(|e| XmlError::Format(e.to_string()))?,
            Err(e) => {
                return Err(XmlError::Format(format!(
                    "error at position {}: {e}",
                    reader.error_position()
                )));
            }
        }
    }

    String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Format(e.to_string()))
}
