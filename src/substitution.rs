//! `{{name}}` placeholder substitution.
//!
//! A single left-to-right scan: substituted values are never re-scanned, and
//! the result does not depend on the iteration order of the mapping. Unknown
//! keys are left in place verbatim.

use crate::model::Variables;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

pub fn substitute(text: &str, variables: &Variables) -> String {
    if text.is_empty() || variables.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];

        let resolved = candidate[OPEN.len()..].find(CLOSE).and_then(|end| {
            let key = &candidate[OPEN.len()..OPEN.len() + end];
            variables
                .get(key)
                .map(|value| (value, OPEN.len() + end + CLOSE.len()))
        });

        match resolved {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &candidate[consumed..];
            }
            None => {
                // Keep one brace and rescan; `{{{a}}}` still resolves `{{a}}`.
                out.push('{');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

pub fn substitute_opt(text: Option<&str>, variables: &Variables) -> Option<String> {
    text.map(|text| substitute(text, variables))
}
