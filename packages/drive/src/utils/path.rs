use std::fmt;

use crate::error::DriveError;

/// Longest accepted path, in bytes.
pub const MAX_PATH_LEN: usize = 1024;
/// Longest accepted single name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Validates a single directory or file name.
pub fn validate_name(name: &str) -> Result<&str, DriveError> {
    if name.is_empty() {
        return Err(DriveError::BadRequest("Name cannot be empty".into()));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(DriveError::BadRequest(format!(
            "Name exceeds maximum length of {MAX_NAME_LEN} bytes"
        )));
    }

    if name.contains('/') {
        return Err(DriveError::BadRequest(
            "Name must not contain '/'".into(),
        ));
    }

    if name == "." || name == ".." {
        return Err(DriveError::BadRequest(format!(
            "'{name}' is not a valid name"
        )));
    }

    // Control characters would end up in Content-Disposition headers.
    if name.chars().any(|c| c.is_control()) {
        return Err(DriveError::BadRequest(
            "Name must not contain control characters".into(),
        ));
    }

    Ok(name)
}

/// An absolute, slash-delimited path inside one user's tree.
///
/// `/` is the root. Every other path is a sequence of non-empty names:
/// `/docs/2024/report.pdf`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DrivePath {
    segments: Vec<String>,
}

impl DrivePath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a request path.
    pub fn parse(raw: &str) -> Result<Self, DriveError> {
        if raw.len() > MAX_PATH_LEN {
            return Err(DriveError::BadRequest(format!(
                "Path exceeds maximum length of {MAX_PATH_LEN} bytes"
            )));
        }

        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| DriveError::BadRequest("Path must start with '/'".into()))?;

        if rest.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(DriveError::BadRequest(format!(
                    "Path '{raw}' contains an empty segment"
                )));
            }
            segments.push(validate_name(segment)?.to_string());
        }

        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final component; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Containing directory; `None` for the root.
    pub fn parent(&self) -> Option<DrivePath> {
        self.split_last().map(|(parent, _)| parent)
    }

    /// Split into the containing directory and final name.
    pub fn split_last(&self) -> Option<(DrivePath, &str)> {
        let (last, init) = self.segments.split_last()?;
        Some((
            DrivePath {
                segments: init.to_vec(),
            },
            last.as_str(),
        ))
    }

    /// Append a validated name.
    pub fn join(&self, name: &str) -> Result<DrivePath, DriveError> {
        let mut segments = self.segments.clone();
        segments.push(validate_name(name)?.to_string());
        Ok(DrivePath { segments })
    }

    /// True when `self` equals `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &DrivePath) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }
}

impl fmt::Display for DrivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for DrivePath {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
