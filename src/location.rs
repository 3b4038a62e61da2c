//! Textual addressing of frames inside image containers.
//!
//! Every public entry point accepts one of three forms:
//!
//! - `path` - the whole file
//! - `NNNNNN@path` - a single frame, 1-based
//! - `path:hint` - the whole file, with an interpretation hint such as `:mrc`
//!   (read as a volume) or `:mrcs` (read as a stack of images)
//!
//! The hint is stripped before any filesystem access and kept on the
//! [`Location`] for dispatch.
//!
//! In a location with no directory before its first `@`, that `@` is the
//! index separator, so a bare `image@2x.png` is rejected. Once a path
//! separator precedes it (`./image@2x.png`, `run@2/a.mrc`) the `@` is part
//! of the path. [`Location::new`] and [`Location::indexed`] never parse.

use std::fmt;

use crate::error::{ImageError, Result};

/// Reserved index meaning "the whole file".
pub const NO_INDEX: u32 = 0;

/// Extensions whose files may hold either a volume or an image stack.
pub const AMBIGUOUS_EXTENSIONS: &[&str] = &["mrc"];

// =============================================================================
// FormatHint
// =============================================================================

/// Interpretation hint carried by a `path:hint` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormatHint {
    /// `:mrc` - read the file as one 3D volume
    Volume,
    /// `:mrcs` - read the file as a stack of 2D images
    Stack,
    /// Any other token, kept verbatim
    Other(String),
}

impl FormatHint {
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "mrc" => FormatHint::Volume,
            "mrcs" => FormatHint::Stack,
            _ => FormatHint::Other(token.to_string()),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            FormatHint::Volume => "mrc",
            FormatHint::Stack => "mrcs",
            FormatHint::Other(token) => token,
        }
    }
}

// =============================================================================
// Location
// =============================================================================

/// Address of a whole file or of one frame inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    index: Option<u32>,
    path: String,
    hint: Option<FormatHint>,
}

impl Location {
    /// Address a whole file. A trailing `:hint` is split off the path.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, hint) = split_format_hint(&path);
        Self {
            index: None,
            path: path.to_string(),
            hint,
        }
    }

    /// Address frame `index` (1-based) of `path`. [`NO_INDEX`] addresses the whole file.
    pub fn indexed(index: u32, path: impl Into<String>) -> Self {
        Self::new(path).with_index(index)
    }

    /// Parse the textual grammar `NNN@path`, `path` or `path:hint`.
    ///
    /// Text before the first `@` that contains no path separator must be an
    /// index: `run@2/a.mrc` and `./image@2x.png` are paths, a bare
    /// `image@2x.png` is an [`ImageError::InvalidLocation`].
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ImageError::invalid_location(text, "empty location"));
        }

        let (index, rest) = match text.split_once('@') {
            Some((prefix, rest)) if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) => {
                let index = prefix.parse::<u32>().map_err(|e| {
                    ImageError::invalid_location(text, format!("bad index: {}", e))
                })?;
                (index, rest)
            }
            Some(("", _)) => {
                return Err(ImageError::invalid_location(text, "missing index before '@'"));
            }
            Some((prefix, _)) if !prefix.contains(['/', '\\']) => {
                return Err(ImageError::invalid_location(
                    text,
                    format!("index '{}' is not a number", prefix),
                ));
            }
            // '@' inside a directory name
            _ => (NO_INDEX, text),
        };

        let location = Location::indexed(index, rest);
        if location.path.is_empty() {
            return Err(ImageError::invalid_location(text, "empty path"));
        }
        Ok(location)
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = (index != NO_INDEX).then_some(index);
        self
    }

    pub fn with_hint(mut self, hint: FormatHint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// 1-based frame index, `None` for the whole file.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Index as the raw integer, [`NO_INDEX`] for the whole file.
    pub fn raw_index(&self) -> u32 {
        self.index.unwrap_or(NO_INDEX)
    }

    /// Filesystem path, without any hint.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn hint(&self) -> Option<&FormatHint> {
        self.hint.as_ref()
    }

    /// Path with its `:hint` suffix re-attached.
    pub fn hinted_path(&self) -> String {
        match &self.hint {
            Some(hint) => format!("{}:{}", self.path, hint.token()),
            None => self.path.clone(),
        }
    }

    /// Lower-cased extension of the path, without the dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }

    pub fn forces_volume(&self) -> bool {
        self.hint == Some(FormatHint::Volume)
    }

    pub fn forces_stack(&self) -> bool {
        self.hint == Some(FormatHint::Stack)
    }

    /// Whether a whole-file write here produces a stack rather than a volume.
    ///
    /// A hint decides; without one only the `.mrcs` extension means a stack.
    pub fn writes_stack(&self) -> bool {
        match self.hint {
            Some(FormatHint::Stack) => true,
            Some(FormatHint::Volume) => false,
            _ => self.extension().as_deref() == Some("mrcs"),
        }
    }

    /// Render as `NNNNNN@path` when indexed, else as the bare (hinted) path.
    pub fn to_address_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{:06}@{}", index, self.hinted_path()),
            None => write!(f, "{}", self.hinted_path()),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Domain objects that know where their pixels live.
pub trait HasLocation {
    /// 1-based index inside the file, or [`NO_INDEX`].
    fn location_index(&self) -> u32;

    fn file_name(&self) -> String;

    /// Whether the object is a 3D volume (drives the `:mrc` suffix fix-up).
    fn is_volume(&self) -> bool {
        false
    }

    fn location(&self) -> Location {
        let file_name = self.file_name();
        let mut location = Location::indexed(self.location_index(), file_name);
        if self.is_volume() && location.hint.is_none() && has_ambiguous_extension(&location.path) {
            location.hint = Some(FormatHint::Volume);
        }
        location
    }
}

/// Values accepted wherever a location is expected.
pub trait IntoLocation {
    fn into_location(self) -> Result<Location>;
}

impl IntoLocation for Location {
    fn into_location(self) -> Result<Location> {
        Ok(self)
    }
}

impl IntoLocation for &Location {
    fn into_location(self) -> Result<Location> {
        Ok(self.clone())
    }
}

impl IntoLocation for &str {
    fn into_location(self) -> Result<Location> {
        Location::parse(self)
    }
}

impl IntoLocation for String {
    fn into_location(self) -> Result<Location> {
        Location::parse(&self)
    }
}

impl IntoLocation for &String {
    fn into_location(self) -> Result<Location> {
        Location::parse(self)
    }
}

impl IntoLocation for (u32, &str) {
    fn into_location(self) -> Result<Location> {
        pair_location(self.0, self.1)
    }
}

impl IntoLocation for (u32, String) {
    fn into_location(self) -> Result<Location> {
        pair_location(self.0, &self.1)
    }
}

impl<T: HasLocation + ?Sized> IntoLocation for &T {
    fn into_location(self) -> Result<Location> {
        let location = self.location();
        if location.path.is_empty() {
            return Err(ImageError::invalid_location(
                location.to_string(),
                "object reports an empty file name",
            ));
        }
        Ok(location)
    }
}

fn pair_location(index: u32, path: &str) -> Result<Location> {
    let location = Location::indexed(index, path);
    if location.path.is_empty() {
        return Err(ImageError::invalid_location(
            format!("({}, \"{}\")", index, path),
            "empty path",
        ));
    }
    Ok(location)
}

/// Turn any accepted value into a [`Location`].
pub fn parse_location<T: IntoLocation>(value: T) -> Result<Location> {
    value.into_location()
}

/// Remove a trailing `:hint` annotation from a path.
pub fn strip_format_hint(path: &str) -> &str {
    split_format_hint(path).0
}

fn split_format_hint(path: &str) -> (&str, Option<FormatHint>) {
    if let Some((head, token)) = path.rsplit_once(':') {
        let is_token = !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphanumeric());
        if is_token && !head.is_empty() {
            return (head, Some(FormatHint::from_token(token)));
        }
    }
    (path, None)
}

/// Lower-cased text after the last `.` of the file name.
pub fn extension_of(path: &str) -> Option<String> {
    let path = strip_format_hint(path);
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn has_ambiguous_extension(path: &str) -> bool {
    extension_of(path).is_some_and(|ext| AMBIGUOUS_EXTENSIONS.contains(&ext.as_str()))
}

// =============================================================================
// Tests
// =============================================================================
