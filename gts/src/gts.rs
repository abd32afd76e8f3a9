use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

pub const GTS_PREFIX: &str = "gts.";
/// URI form of the prefix as it appears in JSON Schema `$schema` fields (e.g. `gts://gts.x.y...`).
pub const GTS_URI_PREFIX: &str = "gts://";

/// Identifiers longer than this are rejected outright.
const MAX_ID_LEN: usize = 1024;

static GTS_NS: LazyLock<Uuid> = LazyLock::new(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, b"gts"));

#[derive(Debug, Error)]
pub enum GtsError {
    #[error("Invalid GTS segment #{num} @ offset {offset}: '{segment}': {cause}")]
    InvalidSegment {
        num: usize,
        offset: usize,
        segment: String,
        cause: String,
    },

    #[error("Invalid GTS identifier: {id}: {cause}")]
    InvalidId { id: String, cause: String },

    #[error("Invalid GTS wildcard pattern: {pattern}: {cause}")]
    InvalidWildcard { pattern: String, cause: String },
}

/// One parsed `vendor.package.namespace.type.vMAJOR.MINOR` tuple of a GTS identifier.
///
/// The original text of the segment (including a trailing `~` for type
/// segments) is kept in `segment`, so joining all segment texts and
/// prefixing `gts.` reproduces the canonical identifier exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GtsIdSegment {
    pub num: usize,
    pub offset: usize,
    pub segment: String,
    pub vendor: String,
    pub package: String,
    pub namespace: String,
    pub type_name: String,
    pub ver_major: u32,
    pub ver_minor: Option<u32>,
    pub is_type: bool,
    pub is_wildcard: bool,
}

impl GtsIdSegment {
    /// Parses a single segment string.
    ///
    /// # Errors
    /// Returns `GtsError::InvalidSegment` when the segment has too many
    /// tokens or a malformed version token.
    pub fn new(num: usize, offset: usize, segment: &str) -> Result<Self, GtsError> {
        let text = segment.trim().to_owned();
        let mut seg = GtsIdSegment {
            num,
            offset,
            segment: text.clone(),
            vendor: String::new(),
            package: String::new(),
            namespace: String::new(),
            type_name: String::new(),
            ver_major: 0,
            ver_minor: None,
            is_type: false,
            is_wildcard: false,
        };
        seg.bind_tokens(&text)?;
        Ok(seg)
    }

    fn bind_tokens(&mut self, text: &str) -> Result<(), GtsError> {
        let body = if let Some(stripped) = text.strip_suffix('~') {
            self.is_type = true;
            stripped
        } else {
            text
        };

        let tokens: Vec<&str> = body.split('.').collect();
        if tokens.len() > 6 {
            return Err(self.invalid("Too many tokens"));
        }

        for (pos, token) in tokens.iter().enumerate() {
            if *token == "*" {
                // Wildcard swallows the rest of the segment.
                self.is_wildcard = true;
                return Ok(());
            }
            match pos {
                0 => (*token).clone_into(&mut self.vendor),
                1 => (*token).clone_into(&mut self.package),
                2 => (*token).clone_into(&mut self.namespace),
                3 => (*token).clone_into(&mut self.type_name),
                4 => {
                    let Some(major) = token.strip_prefix('v') else {
                        return Err(self.invalid("Major version must start with 'v'"));
                    };
                    self.ver_major = major
                        .parse()
                        .map_err(|_| self.invalid("Major version must be an integer"))?;
                }
                5 => {
                    let minor: u32 = token
                        .parse()
                        .map_err(|_| self.invalid("Minor version must be an integer"))?;
                    self.ver_minor = Some(minor);
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn invalid(&self, cause: &str) -> GtsError {
        GtsError::InvalidSegment {
            num: self.num,
            offset: self.offset,
            segment: self.segment.clone(),
            cause: cause.to_owned(),
        }
    }
}

/// GTS ID - a validated Global Type System identifier.
///
/// GTS IDs follow the format `gts.<vendor>.<package>.<namespace>.<type>.<version>[~]`
/// where segments are chained with `~` and a trailing `~` marks a type/schema
/// identifier rather than an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GtsID {
    pub id: String,
    pub gts_id_segments: Vec<GtsIdSegment>,
}

impl GtsID {
    /// Parse and validate a GTS identifier string.
    ///
    /// # Errors
    /// Returns `GtsError::InvalidId` or `GtsError::InvalidSegment` when the
    /// string is not a valid GTS identifier.
    pub fn new(id: &str) -> Result<Self, GtsError> {
        let raw = id.trim();

        if !raw.starts_with(GTS_PREFIX) {
            return Err(GtsError::InvalidId {
                id: id.to_owned(),
                cause: format!("Does not start with '{GTS_PREFIX}'"),
            });
        }

        if raw.len() > MAX_ID_LEN {
            return Err(GtsError::InvalidId {
                id: id.to_owned(),
                cause: "Too long".to_owned(),
            });
        }

        let parts = Self::split_segments(&raw[GTS_PREFIX.len()..]);

        let mut gts_id_segments = Vec::new();
        let mut offset = GTS_PREFIX.len();
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part == "~" {
                return Err(GtsError::InvalidId {
                    id: id.to_owned(),
                    cause: format!("GTS segment #{} @ offset {offset} is empty", i + 1),
                });
            }
            gts_id_segments.push(GtsIdSegment::new(i + 1, offset, part)?);
            offset += part.len();
        }

        Ok(GtsID {
            id: raw.to_owned(),
            gts_id_segments,
        })
    }

    /// Splits the part after `gts.` on `~`, keeping the `~` attached to the
    /// segment it terminates so a trailing `~` is detectable.
    fn split_segments(remainder: &str) -> Vec<String> {
        let tilde_parts: Vec<&str> = remainder.split('~').collect();
        let mut parts = Vec::new();

        for i in 0..tilde_parts.len() {
            if i < tilde_parts.len() - 1 {
                parts.push(format!("{}~", tilde_parts[i]));
                if i == tilde_parts.len() - 2 && tilde_parts[i + 1].is_empty() {
                    break;
                }
            } else {
                parts.push(tilde_parts[i].to_owned());
            }
        }

        parts
    }

    #[must_use]
    pub fn is_type(&self) -> bool {
        self.id.ends_with('~')
    }

    /// Identifier of the type this entity belongs to: every segment except
    /// the last, re-joined. `None` for identifiers with fewer than two segments.
    #[must_use]
    pub fn get_type_id(&self) -> Option<String> {
        if self.gts_id_segments.len() < 2 {
            return None;
        }
        let joined: String = self.gts_id_segments[..self.gts_id_segments.len() - 1]
            .iter()
            .map(|s| s.segment.as_str())
            .collect();
        Some(format!("{GTS_PREFIX}{joined}"))
    }

    /// Deterministic UUID v5 of this identifier under the GTS namespace.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::new_v5(&GTS_NS, self.id.as_bytes())
    }

    /// Check if a string is a valid GTS identifier.
    #[must_use]
    pub fn is_valid(s: &str) -> bool {
        if !s.starts_with(GTS_PREFIX) {
            return false;
        }
        Self::new(s).is_ok()
    }

    /// Matches this identifier against a wildcard pattern.
    ///
    /// A pattern without `*` matches only the identical canonical string; a
    /// pattern ending in `*` matches any identifier whose canonical string
    /// starts with the pattern minus the `*`.
    #[must_use]
    pub fn wildcard_match(&self, pattern: &GtsWildcard) -> bool {
        let p = pattern.as_ref();

        if !p.contains('*') {
            return self.id == p;
        }
        if p.matches('*').count() > 1 || !p.ends_with('*') {
            return false;
        }

        self.id.starts_with(&p[..p.len() - 1])
    }

    /// Splits an `id@path` expression into the identifier and the optional
    /// attribute path after the first `@`.
    ///
    /// # Errors
    /// Returns `GtsError::InvalidId` if the path after `@` is empty.
    pub fn split_at_path(gts_with_path: &str) -> Result<(String, Option<String>), GtsError> {
        let Some((gts, path)) = gts_with_path.split_once('@') else {
            return Ok((gts_with_path.to_owned(), None));
        };

        if path.is_empty() {
            return Err(GtsError::InvalidId {
                id: gts_with_path.to_owned(),
                cause: "Attribute path cannot be empty".to_owned(),
            });
        }

        Ok((gts.to_owned(), Some(path.to_owned())))
    }
}

impl fmt::Display for GtsID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for GtsID {
    type Err = GtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for GtsID {
    fn as_ref(&self) -> &str {
        &self.id
    }
}

/// GTS wildcard pattern.
///
/// A stricter construction of [`GtsID`]: at most one `*` token, and only as
/// the terminal token of the pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct GtsWildcard {
    pub id: String,
    pub gts_id_segments: Vec<GtsIdSegment>,
}

impl GtsWildcard {
    /// Creates a new GTS wildcard pattern.
    ///
    /// # Errors
    /// Returns `GtsError::InvalidWildcard` if the pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, GtsError> {
        let p = pattern.trim();

        if !p.starts_with(GTS_PREFIX) {
            return Err(GtsError::InvalidWildcard {
                pattern: pattern.to_owned(),
                cause: format!("Does not start with '{GTS_PREFIX}'"),
            });
        }

        if p.matches('*').count() > 1 {
            return Err(GtsError::InvalidWildcard {
                pattern: pattern.to_owned(),
                cause: "The wildcard '*' token is allowed only once".to_owned(),
            });
        }

        if p.contains('*') && !p.ends_with(".*") && !p.ends_with("~*") {
            return Err(GtsError::InvalidWildcard {
                pattern: pattern.to_owned(),
                cause: "The wildcard '*' token is allowed only at the end of the pattern"
                    .to_owned(),
            });
        }

        let gts_id = GtsID::new(p).map_err(|e| GtsError::InvalidWildcard {
            pattern: pattern.to_owned(),
            cause: e.to_string(),
        })?;

        Ok(GtsWildcard {
            id: gts_id.id,
            gts_id_segments: gts_id.gts_id_segments,
        })
    }
}

impl fmt::Display for GtsWildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for GtsWildcard {
    type Err = GtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for GtsWildcard {
    fn as_ref(&self) -> &str {
        &self.id
    }
}
