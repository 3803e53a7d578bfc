//! Classification of backend stderr lines

/// What a stderr line means for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StderrClass {
    /// Part of a Java stack trace, only logged
    StackTrace,
    /// Something the user can fix, shown as a one-line hint
    Hint(String),
    /// The backend failed internally; the run is inconclusive
    InternalError(String),
    /// Known noise
    Ignored,
    /// Anything else, logged
    Other,
}

/// Classify one line of backend stderr
pub fn classify_stderr(line: &str) -> StderrClass {
    let line = line.trim();
    if line.is_empty() {
        return StderrClass::Ignored;
    }
    if line.starts_with("at ") {
        return StderrClass::StackTrace;
    }
    if line.starts_with("NailGun v") {
        return StderrClass::Hint(
            "The peer-server client rejected its arguments, check the stage's custom arguments"
                .to_string(),
        );
    }
    if line.starts_with("connect: No error") {
        return StderrClass::Hint("No verification server is running".to_string());
    }
    if line.starts_with("java.lang.NullPointerException") {
        return StderrClass::InternalError("The backend hit a null pointer".to_string());
    }
    if let Some(class) = line.strip_prefix("java.lang.ClassNotFoundException:") {
        return StderrClass::Hint(format!(
            "Entry point {} is unknown to the backend, check the stage's main method",
            class.trim()
        ));
    }
    if line.starts_with("java.io.IOException: Stream closed") {
        return StderrClass::InternalError(
            "The backend stream was closed, possibly by a concurrent verification".to_string(),
        );
    }
    if line.starts_with("java.lang.StackOverflowError") {
        return StderrClass::InternalError(
            "The backend overflowed its stack, try a larger -Xss setting".to_string(),
        );
    }
    if line.starts_with("SLF4J: Class path contains multiple SLF4J bindings") {
        return StderrClass::Hint(
            "The backend class path contains more than one logging binding".to_string(),
        );
    }
    if line.starts_with("SLF4J:") {
        return StderrClass::Ignored;
    }
    StderrClass::Other
}
