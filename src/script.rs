//! Test script stage.
//!
//! Scripts are never executed. A script that looks like a Postman-style test
//! (mentions both `pm.test` and `pm.response`) is accepted optimistically;
//! anything else is rejected. The outcome says so explicitly through
//! [`ScriptOutcome::executed`].

use tracing::warn;

use crate::model::ScriptOutcome;

const TEST_MARKER: &str = "pm.test";
const RESPONSE_MARKER: &str = "pm.response";

pub fn check(script: &str) -> ScriptOutcome {
    if script.contains(TEST_MARKER) && script.contains(RESPONSE_MARKER) {
        warn!("test script accepted without being executed");
        ScriptOutcome {
            passed: true,
            executed: false,
            message: "Script accepted without execution (scripts are not evaluated)".into(),
        }
    } else {
        ScriptOutcome {
            passed: false,
            executed: false,
            message: "Invalid test script format".into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn postman_shaped_script_is_accepted_not_run() {
        let outcome = check(
            r#"pm.test("ok", function () { pm.response.to.have.status(200); });"#,
        );

        assert!(outcome.passed);
        assert!(!outcome.executed);
    }

    #[test]
    fn other_scripts_are_rejected() {
        let outcome = check("assert status == 200");

        assert!(!outcome.passed);
        assert_eq!(outcome.message, "Invalid test script format");
    }
}
