// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Segment naming convention of the capture process:
//! `part__<ordinal>_<stream-id>__<YYYYMMDD>T<HHMMSS>.<ext>`.

use std::fmt;
use std::path::Path;

use regex::Regex;

/// Created in the source directory by the capture process when it exits.
pub const SENTINEL_FILE_NAME: &str = "TCPDUMPW_EXITED";

pub const SEGMENT_PREFIX: &str = "part";

/// Identity of one capture stream: every segment it rotates through shares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RotationKey {
    pub ordinal: u64,
    pub stream_id: String,
    pub ext: String,
}

impl RotationKey {
    pub fn new(ordinal: u64, stream_id: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            ordinal,
            stream_id: stream_id.into(),
            ext: ext.into(),
        }
    }

    /// Interface identifier as logged: `<ordinal>:<stream-id>`.
    pub fn iface(&self) -> String {
        format!("{}:{}", self.ordinal, self.stream_id)
    }
}

impl fmt::Display for RotationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.ordinal, self.stream_id, self.ext)
    }
}

#[derive(Debug, Clone)]
pub struct SegmentPattern {
    regex: Regex,
}

impl SegmentPattern {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Result<Self, regex::Error> {
        let alternatives = extensions
            .iter()
            .map(|ext| regex::escape(ext.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&format!(
            r"^{SEGMENT_PREFIX}__(\d+?)_(.+?)__\d{{8}}T\d{{6}}\.({alternatives})$"
        ))?;
        Ok(Self { regex })
    }

    /// Decodes the rotation key from the file name of `path`, or `None` when
    /// the file is not a segment.
    pub fn rotation_key(&self, path: &Path) -> Option<RotationKey> {
        let name = path.file_name()?.to_str()?;
        let captures = self.regex.captures(name)?;
        let ordinal = captures.get(1)?.as_str().parse().ok()?;
        Some(RotationKey {
            ordinal,
            stream_id: captures.get(2)?.as_str().to_string(),
            ext: captures.get(3)?.as_str().to_string(),
        })
    }

    pub fn is_segment(&self, path: &Path) -> bool {
        self.rotation_key(path).is_some()
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

pub fn is_sentinel(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name == SENTINEL_FILE_NAME)
}
