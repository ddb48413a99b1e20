//! Tag definitions served by the simulated controller.
//!
//! Tags are declared once at startup from `--tag` arguments and are immutable
//! afterwards except for their data region, which tag services read from.

use std::str::FromStr;

use thiserror::Error;

/// Longest accepted tag name, in bytes.
pub const MAX_NAME_LEN: usize = 40;

/// A CIP elementary data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum TagType {
    /// Signed 8-bit integer.
    SINT,
    /// Signed 16-bit integer.
    INT,
    /// Signed 32-bit integer.
    DINT,
    /// Signed 64-bit integer.
    LINT,
    /// 32-bit IEEE float.
    REAL,
    /// 64-bit IEEE float.
    LREAL,
}

impl TagType {
    /// The CIP type code transported in read replies.
    pub fn wire_code(&self) -> u16 {
        match self {
            Self::SINT => 0x00C2,
            Self::INT => 0x00C3,
            Self::DINT => 0x00C4,
            Self::LINT => 0x00C5,
            Self::REAL => 0x00CA,
            Self::LREAL => 0x00CB,
        }
    }

    /// Size of one element of this type, in bytes.
    pub fn elem_size(&self) -> usize {
        match self {
            Self::SINT => 1,
            Self::INT => 2,
            Self::DINT | Self::REAL => 4,
            Self::LINT | Self::LREAL => 8,
        }
    }
}

impl FromStr for TagType {
    type Err = TagSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SINT" => Ok(Self::SINT),
            "INT" => Ok(Self::INT),
            "DINT" => Ok(Self::DINT),
            "LINT" => Ok(Self::LINT),
            "REAL" => Ok(Self::REAL),
            "LREAL" => Ok(Self::LREAL),
            _ => Err(TagSpecError::Type(s.to_string())),
        }
    }
}

/// A named, typed, possibly multi-dimensional data region.
#[derive(Debug, Clone, PartialEq)]
pub struct TagDef {
    name: String,
    tag_type: TagType,
    dims: Vec<u32>,
    data: Vec<u8>,
}

impl TagDef {
    /// Construct a tag with 1 to 3 strictly positive dimension extents and a
    /// zero-initialised data region.
    pub fn new(name: &str, tag_type: TagType, dims: &[u32]) -> Result<Self, TagSpecError> {
        if !valid_name(name) {
            return Err(TagSpecError::Name(name.to_string()));
        }
        if dims.is_empty() || dims.len() > 3 || dims.contains(&0) {
            return Err(TagSpecError::Dimensions(name.to_string()));
        }

        let data_len = dims
            .iter()
            .try_fold(tag_type.elem_size(), |acc, d| {
                acc.checked_mul(*d as usize)
            })
            .ok_or_else(|| TagSpecError::Dimensions(name.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            tag_type,
            dims: dims.to_vec(),
            data: vec![0; data_len],
        })
    }

    /// The tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The element type.
    pub fn tag_type(&self) -> TagType {
        self.tag_type
    }

    /// The declared dimension extents (1 to 3 of them).
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// Total number of elements across all dimensions.
    pub fn elem_count(&self) -> usize {
        self.data.len() / self.tag_type.elem_size()
    }

    /// The tag data region.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the tag data region.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Flat byte offset of the element addressed by `indices`.
    ///
    /// The index count must equal the declared dimension count and every
    /// index must be inside its extent; `None` is the out-of-range condition
    /// the CIP layer reports with extended status `0x2105`.
    ///
    /// Row-major: with extents `e0, e1, e2` (missing extents behave as 1) the
    /// flat element index is `i0*e1*e2 + i1*e2 + i2`.
    pub fn element_offset(&self, indices: &[u32]) -> Option<usize> {
        if indices.len() != self.dims.len() {
            return None;
        }

        let mut flat = 0usize;
        for (idx, extent) in indices.iter().zip(self.dims.iter()) {
            if idx >= extent {
                return None;
            }
            flat = flat * *extent as usize + *idx as usize;
        }

        Some(flat * self.tag_type.elem_size())
    }
}

/// The set of tags a simulated controller serves, keyed by exact name.
///
/// Lookup is a linear scan; tag counts are small.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagStore {
    tags: Vec<TagDef>,
}

impl TagStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag definition. Names must be unique.
    pub fn insert(&mut self, tag: TagDef) -> Result<(), TagSpecError> {
        if self.find(tag.name()).is_some() {
            return Err(TagSpecError::Duplicate(tag.name().to_string()));
        }
        self.tags.push(tag);
        Ok(())
    }

    /// Exact-match lookup by name.
    pub fn find(&self, name: &str) -> Option<&TagDef> {
        self.tags.iter().find(|t| t.name == name)
    }

    /// Mutable exact-match lookup, for populating tag data.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut TagDef> {
        self.tags.iter_mut().find(|t| t.name == name)
    }

    /// Number of tags in the store.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True when no tags are defined.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// A parsed `--tag` declaration of the form `name:TYPE[d1]`, `name:TYPE[d1,d2]`
/// or `name:TYPE[d1,d2,d3]`.
///
/// A scalar is declared as a one-element array, e.g. `Counter:DINT[1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpec {
    /// Tag name.
    pub name: String,
    /// Element type.
    pub tag_type: TagType,
    /// Dimension extents.
    pub dims: Vec<u32>,
}

impl TagSpec {
    /// Materialise the declaration into a zero-filled [`TagDef`].
    pub fn build(&self) -> Result<TagDef, TagSpecError> {
        TagDef::new(&self.name, self.tag_type, &self.dims)
    }
}

impl FromStr for TagSpec {
    type Err = TagSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TagSpecError::Malformed(s.to_string());

        let (name, rest) = s.split_once(':').ok_or_else(malformed)?;
        if !valid_name(name) {
            return Err(TagSpecError::Name(name.to_string()));
        }

        let (type_str, dims_str) = rest
            .strip_suffix(']')
            .and_then(|r| r.split_once('['))
            .ok_or_else(malformed)?;
        let tag_type = type_str.parse::<TagType>()?;

        let dims = dims_str
            .split(',')
            .map(|d| d.parse::<u32>().ok().filter(|d| *d > 0))
            .collect::<Option<Vec<_>>>()
            .filter(|d| (1..=3).contains(&d.len()))
            .ok_or_else(|| TagSpecError::Dimensions(s.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            tag_type,
            dims,
        })
    }
}

/// Tag names are ASCII, start with a letter, continue with letters, digits or
/// underscores, and fit in [`MAX_NAME_LEN`] bytes.
fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    name.len() <= MAX_NAME_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Errors raised while parsing and materialising `--tag` declarations.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagSpecError {
    /// The declaration does not follow `name:TYPE[dims]`.
    #[error("invalid tag declaration {0:?}, expected name:TYPE[dims]")]
    Malformed(String),

    /// The tag name is not a valid identifier.
    #[error("invalid tag name {0:?}")]
    Name(String),

    /// The element type is not one of SINT, INT, DINT, LINT, REAL, LREAL.
    #[error("unknown tag type {0:?}")]
    Type(String),

    /// The dimension list is empty, longer than 3, or contains a zero.
    #[error("invalid dimensions in {0:?}, expected 1 to 3 positive integers")]
    Dimensions(String),

    /// A tag with the same name already exists.
    #[error("duplicate tag {0:?}")]
    Duplicate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec() {
        let spec: TagSpec = "MyTag:DINT[10]".parse().unwrap();
        assert_eq!(spec.name, "MyTag");
        assert_eq!(spec.tag_type, TagType::DINT);
        assert_eq!(spec.dims, vec![10]);

        let spec: TagSpec = "Grid_2:REAL[4,8]".parse().unwrap();
        assert_eq!(spec.tag_type, TagType::REAL);
        assert_eq!(spec.dims, vec![4, 8]);

        let spec: TagSpec = "Cube:LREAL[2,3,4]".parse().unwrap();
        assert_eq!(spec.dims, vec![2, 3, 4]);

        let tag = spec.build().unwrap();
        assert_eq!(tag.elem_count(), 24);
        assert_eq!(tag.data().len(), 24 * 8);
        assert!(tag.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_parse_spec_rejects() {
        assert_eq!(
            "MyTag".parse::<TagSpec>(),
            Err(TagSpecError::Malformed("MyTag".to_string()))
        );
        assert_eq!(
            "MyTag:DINT".parse::<TagSpec>(),
            Err(TagSpecError::Malformed("MyTag:DINT".to_string()))
        );
        assert_eq!(
            "1Tag:DINT[1]".parse::<TagSpec>(),
            Err(TagSpecError::Name("1Tag".to_string()))
        );
        assert_eq!(
            "Tag:BOOL[1]".parse::<TagSpec>(),
            Err(TagSpecError::Type("BOOL".to_string()))
        );
        assert_eq!(
            "Tag:DINT[0]".parse::<TagSpec>(),
            Err(TagSpecError::Dimensions("Tag:DINT[0]".to_string()))
        );
        assert_eq!(
            "Tag:DINT[1,2,3,4]".parse::<TagSpec>(),
            Err(TagSpecError::Dimensions("Tag:DINT[1,2,3,4]".to_string()))
        );
        assert!("Tag:DINT[]".parse::<TagSpec>().is_err());
        assert!("Tag:DINT[-1]".parse::<TagSpec>().is_err());
    }

    #[test]
    fn test_name_rules() {
        assert!(valid_name("a"));
        assert!(valid_name("Motor_1_Speed"));
        assert!(!valid_name(""));
        assert!(!valid_name("_lead"));
        assert!(!valid_name("has space"));
        assert!(!valid_name("tête"));

        let long = "a".repeat(MAX_NAME_LEN);
        assert!(valid_name(&long));
        assert!(!valid_name(&format!("{long}a")));
    }

    #[test]
    fn test_element_offset_one_dim() {
        let tag = TagDef::new("MyTag", TagType::DINT, &[10]).unwrap();

        assert_eq!(tag.element_offset(&[0]), Some(0));
        assert_eq!(tag.element_offset(&[3]), Some(12));
        assert_eq!(tag.element_offset(&[9]), Some(36));
        assert_eq!(tag.element_offset(&[10]), None);
        assert_eq!(tag.element_offset(&[]), None);
        assert_eq!(tag.element_offset(&[0, 0]), None);
    }

    #[test]
    fn test_element_offset_multi_dim() {
        let tag = TagDef::new("Grid", TagType::INT, &[4, 8]).unwrap();
        // element (2, 5) is flat index 2*8 + 5 = 21
        assert_eq!(tag.element_offset(&[2, 5]), Some(42));
        assert_eq!(tag.element_offset(&[3, 7]), Some(62));
        assert_eq!(tag.element_offset(&[4, 0]), None);
        assert_eq!(tag.element_offset(&[0, 8]), None);

        let tag = TagDef::new("Cube", TagType::SINT, &[2, 3, 4]).unwrap();
        // flat index i0*12 + i1*4 + i2
        assert_eq!(tag.element_offset(&[1, 2, 3]), Some(23));
        assert_eq!(tag.element_offset(&[0, 0, 0]), Some(0));
        assert_eq!(tag.element_offset(&[1, 2]), None);
    }

    #[test]
    fn test_store_lookup_and_duplicates() {
        let mut store = TagStore::new();
        store
            .insert(TagDef::new("A", TagType::DINT, &[1]).unwrap())
            .unwrap();
        store
            .insert(TagDef::new("B", TagType::INT, &[2]).unwrap())
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.find("A").unwrap().tag_type(), TagType::DINT);
        assert!(store.find("a").is_none());
        assert!(store.find("C").is_none());

        assert_eq!(
            store.insert(TagDef::new("A", TagType::REAL, &[1]).unwrap()),
            Err(TagSpecError::Duplicate("A".to_string()))
        );
    }

    #[test]
    fn test_wire_codes() {
        for (ty, code, size) in [
            (TagType::SINT, 0x00C2, 1),
            (TagType::INT, 0x00C3, 2),
            (TagType::DINT, 0x00C4, 4),
            (TagType::LINT, 0x00C5, 8),
            (TagType::REAL, 0x00CA, 4),
            (TagType::LREAL, 0x00CB, 8),
        ] {
            assert_eq!(ty.wire_code(), code);
            assert_eq!(ty.elem_size(), size);
        }
    }
}
