//! Sample input documents for local testing and load generation.

use std::fmt::Write;

/// A `<logs>` document with `records` entries of the form
/// `<log><id>i</id><level>INFO</level><msg>Message i</msg></log>`.
pub fn log_document(records: usize) -> String {
    let mut doc = String::from("<logs>\n");
    for i in 0..records {
        // Writing into a String cannot fail.
        let _ = writeln!(
            doc,
            "  <log><id>{i}</id><level>INFO</level><msg>Message {i}</msg></log>"
        );
    }
    doc.push_str("</logs>\n");
    doc
}
